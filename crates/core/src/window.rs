//! Window identity.

use std::fmt;

/// Opaque identifier for one editing window.
///
/// All overlay and cache state is partitioned by window id; the only
/// state shared across windows is the cache's global byte budget. Ids are
/// allocated by the owning session, never from process-wide statics, so
/// independent sessions (and tests) cannot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowId(u64);

impl WindowId {
    /// Wrap a raw id. Sessions allocate these from a private counter.
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The raw id, for logging and map keys.
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "win{}", self.0)
    }
}
