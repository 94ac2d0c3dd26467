//! Bounded LRU cache for pending insertion bytes.
//!
//! One [`InsertCache`] is shared by every window of a session. The
//! overlay records insertion lengths; this crate holds the bytes, evicts
//! under byte-budget pressure to per-window dump files, and reloads
//! dumped nodes on demand.

mod cache;
mod list;

pub use cache::InsertCache;
