//! Backing store boundary for vellum.
//!
//! Provides the read-only store traits the editing core consumes, the
//! file- and memory-backed implementations, and the persisted dump format
//! used to spill cached insertion bytes.

mod dump;
mod store;

pub use dump::{DumpFile, DumpRecord};
pub use store::{read_span, BackingStore, FileStore, MemoryStore, StoreReader};
