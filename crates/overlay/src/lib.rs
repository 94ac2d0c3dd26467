//! Per-window change/deletion overlay for vellum.
//!
//! Maintains the virtual view of a document: pending insertions and
//! logical deletions layered over an immutable backing store, addressed
//! purely through virtual positions. Reading, editing, searching, and
//! saving all go through this crate's [`Overlay`].

mod deletions;
mod overlay;
mod snapshot;

pub use overlay::Overlay;
pub use snapshot::OverlaySnapshot;
