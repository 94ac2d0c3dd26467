//! vellum: the editing core of a terminal text editor for files of
//! arbitrary size.
//!
//! Documents are never rewritten on a keystroke. Each window keeps a
//! virtual view: pending insertions and logical deletions layered over
//! an immutable backing store, addressed through `(anchor, offset)`
//! virtual positions. The pieces:
//!
//! - [`Session`]: owns the windows, the shared insertion cache, and
//!   the per-window search engines
//! - `vellum-overlay`: position mapping, deletion algebra, logical
//!   reads ([`VirtualPosition`], `Overlay`)
//! - `vellum-cache`: the byte-budgeted LRU cache for pending insertion
//!   bytes, spilling to per-window dump files
//! - `vellum-search`: cancellable bidirectional incremental search
//! - `vellum-store`: the backing-store boundary (file- and
//!   memory-backed)
//!
//! ```no_run
//! use std::sync::Arc;
//! use vellum::{Session, SearchDirection, SearchHooks, VirtualPosition};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut session = Session::with_defaults();
//! let store = Arc::new(vellum::FileStore::open("big.log")?);
//! let win = session.open_window(store)?;
//!
//! session.add_changes(win, VirtualPosition::ZERO, b"# prologue\n")?;
//! let outcome = session.search(
//!     win,
//!     "ERROR",
//!     VirtualPosition::ZERO,
//!     SearchDirection::Forward,
//!     &SearchHooks::default(),
//! )?;
//! println!("first hit: {:?}", outcome.nearest());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod session;
pub mod xdg;

pub use config::CoreConfig;
pub use session::Session;

pub use vellum_core::{CancelToken, CoreError, VirtualPosition, VirtualRange, WindowId};
pub use vellum_search::{
    ControlEvent, ScanKind, SearchDirection, SearchEvent, SearchHooks, SearchMatch, SearchOutcome,
};
pub use vellum_store::{BackingStore, FileStore, MemoryStore, StoreReader};

/// Initialize logging per the configuration. Call once at startup; a
/// `None` log file path leaves logging disabled.
pub fn init_logging(config: &CoreConfig) {
    if let Some(path) = &config.logging.file_path {
        let level = config
            .logging
            .min_level
            .parse()
            .unwrap_or(vellum_logger::LogLevel::Info);
        vellum_logger::init(path.clone(), config.logging.max_entries, level);
    }
}
