//! Persisted cache dump files.
//!
//! When insertion bytes are evicted from the cache (budget pressure) or a
//! window is stashed on close, the bytes land in the window's dump file:
//! an append-only log of `(anchor: u64 LE, length: u32 LE, bytes)`
//! records. A later record for the same anchor supersedes earlier ones,
//! so eviction can always append the node's full current bytes without
//! rewriting the log. On window re-open the log is replayed in order to
//! rebuild the change table and repopulate the cache.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Byte length of a record header (`anchor: u64` + `length: u32`).
const RECORD_HEADER_LEN: u64 = 12;

/// One replayed dump record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
    /// Backing-store anchor the bytes were inserted at.
    pub anchor: u64,
    /// The inserted bytes.
    pub bytes: Vec<u8>,
}

/// Append-log of dumped insertion bytes for one window.
///
/// Keeps an in-memory index of the latest record per anchor so cache-miss
/// fallbacks are a single seek+read rather than a log scan.
pub struct DumpFile {
    path: PathBuf,
    file: File,
    /// anchor -> (payload offset, payload length) of the newest record.
    index: HashMap<u64, (u64, u32)>,
    /// Current end of the log, the offset the next record lands at.
    end: u64,
}

impl DumpFile {
    /// Create a fresh, empty dump file, truncating any previous one.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            file,
            index: HashMap::new(),
            end: 0,
        })
    }

    /// Open an existing dump file and build the record index.
    ///
    /// A truncated trailing record (crash mid-append) is dropped; every
    /// complete record stays replayable.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut dump = Self {
            path,
            file,
            index: HashMap::new(),
            end: 0,
        };
        dump.rebuild_index()?;
        Ok(dump)
    }

    /// Path of the log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` when no records are indexed.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// `true` when a record exists for `anchor`.
    pub fn contains(&self, anchor: u64) -> bool {
        self.index.contains_key(&anchor)
    }

    /// Append a record with the full current bytes for `anchor`.
    pub fn append(&mut self, anchor: u64, bytes: &[u8]) -> io::Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "insertion chunk exceeds the 4 GiB record limit",
            )
        })?;

        self.file.seek(SeekFrom::Start(self.end))?;
        self.file.write_all(&anchor.to_le_bytes())?;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(bytes)?;
        self.file.flush()?;

        self.index
            .insert(anchor, (self.end + RECORD_HEADER_LEN, len));
        self.end += RECORD_HEADER_LEN + u64::from(len);
        Ok(())
    }

    /// Read the latest bytes recorded for `anchor`, if any.
    pub fn read(&mut self, anchor: u64) -> io::Result<Option<Vec<u8>>> {
        let Some(&(offset, len)) = self.index.get(&anchor) else {
            return Ok(None);
        };
        self.file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; len as usize];
        self.file.read_exact(&mut bytes)?;
        Ok(Some(bytes))
    }

    /// Replay the log: the latest record per anchor, for every anchor
    /// that still fits the store.
    ///
    /// Records whose anchor lies beyond `store_size` are discarded; they
    /// can only come from a dump that outlived a shrunken file.
    pub fn replay(&mut self, store_size: u64) -> io::Result<Vec<DumpRecord>> {
        let anchors: Vec<u64> = self.index.keys().copied().collect();
        let mut records = Vec::with_capacity(anchors.len());

        for anchor in anchors {
            if anchor > store_size {
                vellum_logger::warn(format!(
                    "discarding dump record at anchor {} beyond store size {} ({})",
                    anchor,
                    store_size,
                    self.path.display()
                ));
                self.index.remove(&anchor);
                continue;
            }
            if let Some(bytes) = self.read(anchor)? {
                records.push(DumpRecord { anchor, bytes });
            }
        }

        records.sort_by_key(|r| r.anchor);
        Ok(records)
    }

    /// Drop every record and truncate the log (after a save has flushed
    /// the insertions into the backing store).
    pub fn clear(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.index.clear();
        self.end = 0;
        Ok(())
    }

    /// Delete the log from disk, consuming the handle.
    pub fn remove(self) -> io::Result<()> {
        drop(self.file);
        std::fs::remove_file(&self.path)
    }

    fn rebuild_index(&mut self) -> io::Result<()> {
        let file_len = self.file.metadata()?.len();
        let mut offset = 0u64;
        self.file.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        while offset + RECORD_HEADER_LEN <= file_len {
            self.file.read_exact(&mut header)?;
            let anchor = u64::from_le_bytes(header[0..8].try_into().expect("header slice"));
            let len = u32::from_le_bytes(header[8..12].try_into().expect("header slice"));

            let payload = offset + RECORD_HEADER_LEN;
            if payload + u64::from(len) > file_len {
                // Torn tail from an interrupted append.
                vellum_logger::warn(format!(
                    "dump file {} ends with a truncated record, dropping it",
                    self.path.display()
                ));
                break;
            }

            self.index.insert(anchor, (payload, len));
            offset = payload + u64::from(len);
            self.file.seek(SeekFrom::Start(offset))?;
        }

        self.end = offset;
        Ok(())
    }
}
