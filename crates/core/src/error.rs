//! Error taxonomy for the editing core.
//!
//! `CacheFull` and `BackingStoreUnavailable` propagate to the operation's
//! caller; `CacheMiss` is handled inside the overlay (dump fallback) and
//! only reaches callers when the fallback itself cannot serve it. Search
//! interruption is not an error at all; it is the
//! `SearchOutcome::Interrupted` result variant in `vellum-search`.

use std::fmt;

use crate::window::WindowId;

/// Recoverable and fatal failures of the overlay/cache core.
#[derive(Debug)]
pub enum CoreError {
    /// The insertion byte budget cannot accommodate a write even after
    /// evicting every other window's nodes. Recoverable: the caller dumps
    /// a window's cache explicitly and retries.
    CacheFull {
        /// Bytes the rejected write needed.
        requested: u64,
        /// Configured global budget.
        budget: u64,
    },
    /// The requested insertion bytes are not resident (already dumped).
    /// The overlay falls back to the dump target transparently; callers
    /// see this only when no dump file is registered for the window.
    CacheMiss {
        /// Window the anchor belongs to.
        window: WindowId,
        /// Anchor whose bytes are missing.
        anchor: u64,
    },
    /// The backing store (or the dump file standing in for it) became
    /// unreadable mid-operation. Fatal for the current operation; overlay
    /// state is rolled back before this is raised.
    BackingStoreUnavailable {
        /// What the core was doing when the store failed.
        context: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The position handed in does not address any byte of the window's
    /// current virtual view.
    InvalidPosition {
        /// Offending anchor.
        anchor: u64,
        /// Offending offset within the anchor's run.
        offset: u64,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheFull { requested, budget } => write!(
                f,
                "insertion cache full: {} bytes requested against a {} byte budget",
                requested, budget
            ),
            Self::CacheMiss { window, anchor } => {
                write!(f, "no cached bytes for {} anchor {}", window, anchor)
            }
            Self::BackingStoreUnavailable { context, source } => {
                write!(f, "backing store unavailable while {}: {}", context, source)
            }
            Self::InvalidPosition { anchor, offset } => {
                write!(f, "position ({}, {}) is not addressable", anchor, offset)
            }
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BackingStoreUnavailable { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl CoreError {
    /// Shorthand for wrapping an I/O failure of the store or dump file.
    pub fn store_unavailable(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::BackingStoreUnavailable {
            context: context.into(),
            source,
        }
    }

    /// `true` for outcomes the caller can recover from without losing
    /// overlay state.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CacheFull { .. } | Self::CacheMiss { .. })
    }
}
