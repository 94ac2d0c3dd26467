//! The backing store boundary.
//!
//! The editing core never mutates the document it was opened on; it reads
//! bytes at offsets and overlays pending edits on top. [`BackingStore`]
//! is that read surface. [`FileStore`] backs a window with a file on
//! disk; [`MemoryStore`] backs tests and scratch windows with an
//! in-memory buffer.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::{Context, Result};

/// An independent read cursor into a backing store.
///
/// Concurrent scan tasks each open their own reader so no shared mutable
/// read position exists between them.
pub trait StoreReader: Send {
    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes read; fewer than requested only at end-of-store.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

/// A byte-addressable, immutable view of an open document.
///
/// Implementations are shared between the owning window and any scan
/// tasks, so all methods take `&self`; stores with a real file handle
/// serialize their own cursor internally and hand out fresh cursors via
/// [`BackingStore::open_reader`].
pub trait BackingStore: Send + Sync {
    /// Current size of the store in bytes.
    fn size(&self) -> u64;

    /// Timestamp of the last known modification.
    fn last_modified(&self) -> SystemTime;

    /// Read up to `buf.len()` bytes at `offset` through the store's own
    /// cursor. Returns the number of bytes read (short only at
    /// end-of-store).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Re-check the underlying document for external modification.
    ///
    /// Returns `Some((old_size, new_size))` when the document changed
    /// since it was opened or last reloaded, `None` when it is unchanged.
    fn reload(&self) -> io::Result<Option<(u64, u64)>>;

    /// Open an independent read cursor.
    fn open_reader(&self) -> io::Result<Box<dyn StoreReader>>;
}

/// Read exactly `len` bytes at `offset`, or as many as the store has.
pub fn read_span(store: &dyn BackingStore, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = store.read_at(offset + filled as u64, &mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

// ============================================================================
// File-backed store
// ============================================================================

/// Stat snapshot used to detect external modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    size: u64,
    mtime: SystemTime,
}

/// A document backed by a file on disk.
///
/// The struct keeps one seekable handle for the single-threaded overlay
/// path (guarded by a mutex because `BackingStore` is shared with scan
/// snapshots) and opens fresh handles for concurrent readers.
pub struct FileStore {
    path: PathBuf,
    file: Mutex<File>,
    stamp: Mutex<FileStamp>,
}

impl FileStore {
    /// Open a file as a backing store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("Failed to open backing file: {}", path.display()))?;
        let stamp = Self::stat(&file)
            .with_context(|| format!("Failed to stat backing file: {}", path.display()))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            stamp: Mutex::new(stamp),
        })
    }

    /// Path this store was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stat(file: &File) -> io::Result<FileStamp> {
        let meta = file.metadata()?;
        Ok(FileStamp {
            size: meta.len(),
            mtime: meta.modified()?,
        })
    }
}

impl BackingStore for FileStore {
    fn size(&self) -> u64 {
        self.stamp.lock().expect("file stamp lock poisoned").size
    }

    fn last_modified(&self) -> SystemTime {
        self.stamp.lock().expect("file stamp lock poisoned").mtime
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.lock().expect("file handle lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        read_until_full(&mut *file, buf)
    }

    fn reload(&self) -> io::Result<Option<(u64, u64)>> {
        // Re-stat through a fresh handle: the held descriptor keeps stale
        // metadata on some platforms when the file was replaced in place.
        let file = File::open(&self.path)?;
        let fresh = Self::stat(&file)?;

        let mut stamp = self.stamp.lock().expect("file stamp lock poisoned");
        if fresh == *stamp {
            return Ok(None);
        }

        let old_size = stamp.size;
        *stamp = fresh;
        *self.file.lock().expect("file handle lock poisoned") = file;
        vellum_logger::info(format!(
            "backing file changed externally: {} ({} -> {} bytes)",
            self.path.display(),
            old_size,
            fresh.size
        ));
        Ok(Some((old_size, fresh.size)))
    }

    fn open_reader(&self) -> io::Result<Box<dyn StoreReader>> {
        Ok(Box::new(FileReader {
            file: File::open(&self.path)?,
        }))
    }
}

/// Private cursor over the store's file, one per scan task.
struct FileReader {
    file: File,
}

impl StoreReader for FileReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        read_until_full(&mut self.file, buf)
    }
}

/// Fill `buf` from the current cursor, stopping only at end-of-file.
fn read_until_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ============================================================================
// In-memory store
// ============================================================================

/// A backing store over an owned byte buffer.
///
/// Used for scratch windows and throughout the test suites. `replace`
/// swaps the content and advances the modification timestamp, standing in
/// for an external edit.
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

struct MemoryState {
    bytes: Vec<u8>,
    mtime: SystemTime,
    reported_size: u64,
}

impl MemoryStore {
    /// Create a store over `bytes`.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Self {
            state: Mutex::new(MemoryState {
                bytes,
                mtime: SystemTime::now(),
                reported_size: len,
            }),
        }
    }

    /// Create an empty store (a fresh scratch window).
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Replace the content, simulating an external modification that
    /// `reload` will then report.
    pub fn replace(&self, bytes: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().expect("memory store lock poisoned");
        state.bytes = bytes.into();
        state.mtime = SystemTime::now();
    }
}

impl BackingStore for MemoryStore {
    fn size(&self) -> u64 {
        self.state
            .lock()
            .expect("memory store lock poisoned")
            .reported_size
    }

    fn last_modified(&self) -> SystemTime {
        self.state.lock().expect("memory store lock poisoned").mtime
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.state.lock().expect("memory store lock poisoned");
        let len = state.bytes.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(state.bytes.len() - start);
        buf[..n].copy_from_slice(&state.bytes[start..start + n]);
        Ok(n)
    }

    fn reload(&self) -> io::Result<Option<(u64, u64)>> {
        let mut state = self.state.lock().expect("memory store lock poisoned");
        let new_size = state.bytes.len() as u64;
        if new_size == state.reported_size {
            return Ok(None);
        }
        let old_size = state.reported_size;
        state.reported_size = new_size;
        Ok(Some((old_size, new_size)))
    }

    fn open_reader(&self) -> io::Result<Box<dyn StoreReader>> {
        // Cheap snapshot: scan tasks read a stable copy of the content.
        let state = self.state.lock().expect("memory store lock poisoned");
        Ok(Box::new(MemoryReader {
            bytes: state.bytes.clone(),
        }))
    }
}

struct MemoryReader {
    bytes: Vec<u8>,
}

impl StoreReader for MemoryReader {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.bytes.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_store_reads() {
        let store = MemoryStore::new(b"hello world".to_vec());
        assert_eq!(store.size(), 11);

        let mut buf = [0u8; 5];
        assert_eq!(store.read_at(6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");

        // Short read at end-of-store.
        assert_eq!(store.read_at(9, &mut buf).unwrap(), 2);
    }

    #[test]
    fn test_memory_store_reload_reports_resize() {
        let store = MemoryStore::new(b"abc".to_vec());
        assert!(store.reload().unwrap().is_none());

        store.replace(b"abcdef".to_vec());
        assert_eq!(store.reload().unwrap(), Some((3, 6)));
        assert!(store.reload().unwrap().is_none());
        assert_eq!(store.size(), 6);
    }

    #[test]
    fn test_file_store_reads_and_independent_readers() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();

        let store = FileStore::open(tmp.path()).unwrap();
        assert_eq!(store.size(), 10);

        let mut a = store.open_reader().unwrap();
        let mut b = store.open_reader().unwrap();
        let mut buf_a = [0u8; 4];
        let mut buf_b = [0u8; 4];
        assert_eq!(a.read_at(0, &mut buf_a).unwrap(), 4);
        assert_eq!(b.read_at(6, &mut buf_b).unwrap(), 4);
        assert_eq!(&buf_a, b"0123");
        assert_eq!(&buf_b, b"6789");
    }

    #[test]
    fn test_read_span_clamps_to_store() {
        let store = MemoryStore::new(b"abcd".to_vec());
        let bytes = read_span(&store, 2, 10).unwrap();
        assert_eq!(bytes, b"cd");
    }
}
