//! Incremental bidirectional search for vellum.
//!
//! Scans outward from the cursor in both directions concurrently,
//! reading through an overlay snapshot so pending insertions are matched
//! and deleted ranges are never seen. Repeat searches on a live-edited
//! window are served from the stored result set, refreshed by a
//! secondary scan over changed regions only.

mod engine;
mod results;
mod scan;

pub use engine::{
    ControlEvent, ScanKind, SearchConfig, SearchEngine, SearchEvent, SearchHooks, SearchOutcome,
};
pub use results::{SearchDirection, SearchMatch};
