//! Core types for the vellum editing engine.
//!
//! This crate provides the shared vocabulary used by the overlay, cache,
//! and search crates without coupling them to each other: virtual
//! positions and ranges, window identity, the error taxonomy, and the
//! cancellation token.

pub mod cancel;
pub mod error;
pub mod position;
pub mod window;

pub use cancel::CancelToken;
pub use error::CoreError;
pub use position::{VirtualPosition, VirtualRange};
pub use window::WindowId;
