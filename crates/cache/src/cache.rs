//! The global insertion-byte cache.
//!
//! The overlay records only the *length* of each pending insertion; the
//! bytes themselves live here, keyed by `(window, anchor)`. The cache is
//! shared by every window in a session and bounded by one global byte
//! budget: when a write does not fit, the least recently used nodes are
//! flushed to their window's dump file and dropped until it does. The
//! node currently being written is never a victim.

use std::collections::HashMap;
use std::io;

use vellum_core::{CoreError, WindowId};
use vellum_store::{DumpFile, DumpRecord};

use crate::list::{LruList, SlotId};

/// Bytes pending insertion at one anchor of one window.
struct CacheNode {
    window: WindowId,
    anchor: u64,
    bytes: Vec<u8>,
}

/// Bounded, LRU-ordered store of pending insertion bytes.
pub struct InsertCache {
    /// Global byte budget across all windows.
    budget: u64,
    /// Payload bytes currently resident.
    used: u64,
    /// Recency order; the tail is the next eviction victim.
    list: LruList<CacheNode>,
    /// `(window, anchor)` -> slot in the recency list.
    index: HashMap<(WindowId, u64), SlotId>,
    /// Per-window dump files receiving evicted bytes.
    dumps: HashMap<WindowId, DumpFile>,
}

impl InsertCache {
    /// Create a cache with a global byte budget.
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            used: 0,
            list: LruList::new(),
            index: HashMap::new(),
            dumps: HashMap::new(),
        }
    }

    /// Configured global budget in bytes.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Payload bytes currently resident across all windows.
    pub fn resident_bytes(&self) -> u64 {
        self.used
    }

    /// Number of resident nodes.
    pub fn node_count(&self) -> usize {
        self.list.len()
    }

    /// `true` if bytes for `(window, anchor)` are resident.
    pub fn contains(&self, window: WindowId, anchor: u64) -> bool {
        self.index.contains_key(&(window, anchor))
    }

    /// Attach a dump file to a window. Eviction flushes, miss fallbacks,
    /// and stashes for the window all go through it.
    pub fn register_window(&mut self, window: WindowId, dump: DumpFile) {
        self.dumps.insert(window, dump);
    }

    /// `true` once `register_window` was called for `window`.
    pub fn is_registered(&self, window: WindowId) -> bool {
        self.dumps.contains_key(&window)
    }

    /// The `(window, anchor)` next in line for eviction.
    pub fn least_recently_used(&self) -> Option<(WindowId, u64)> {
        self.list.tail().map(|slot| {
            let node = self.list.get(slot);
            (node.window, node.anchor)
        })
    }

    /// Splice `bytes` into the node for `(window, anchor)` at `offset`.
    ///
    /// `offset == 0` on a non-resident anchor creates the node; a
    /// non-zero offset requires the node to be resident (callers reload
    /// dumped nodes first, see [`InsertCache::reload_from_dump`]).
    /// Fails with `CacheFull` when the budget cannot fit the write even
    /// after evicting every other node; nothing is mutated in that case.
    pub fn put(
        &mut self,
        window: WindowId,
        anchor: u64,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), CoreError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let needed = bytes.len() as u64;

        match self.index.get(&(window, anchor)).copied() {
            Some(slot) => {
                if offset > self.list.get(slot).bytes.len() {
                    return Err(CoreError::InvalidPosition {
                        anchor,
                        offset: offset as u64,
                    });
                }
                self.make_room(needed, Some(slot))?;
                let node = self.list.get_mut(slot);
                node.bytes.splice(offset..offset, bytes.iter().copied());
                self.used += needed;
                self.list.touch(slot);
            }
            None => {
                if offset != 0 {
                    return Err(CoreError::CacheMiss { window, anchor });
                }
                self.make_room(needed, None)?;
                let slot = self.list.push_front(CacheNode {
                    window,
                    anchor,
                    bytes: bytes.to_vec(),
                });
                self.index.insert((window, anchor), slot);
                self.used += needed;
            }
        }
        Ok(())
    }

    /// Borrow `len` bytes at `offset` within the node for
    /// `(window, anchor)`, marking it most recently used.
    pub fn get(
        &mut self,
        window: WindowId,
        anchor: u64,
        offset: usize,
        len: usize,
    ) -> Result<&[u8], CoreError> {
        let slot = self
            .index
            .get(&(window, anchor))
            .copied()
            .ok_or(CoreError::CacheMiss { window, anchor })?;
        self.list.touch(slot);

        let node = self.list.get(slot);
        if offset + len > node.bytes.len() {
            return Err(CoreError::InvalidPosition {
                anchor,
                offset: (offset + len) as u64,
            });
        }
        Ok(&node.bytes[offset..offset + len])
    }

    /// Borrow the full chunk for `(window, anchor)`.
    pub fn chunk(&mut self, window: WindowId, anchor: u64) -> Result<&[u8], CoreError> {
        let slot = self
            .index
            .get(&(window, anchor))
            .copied()
            .ok_or(CoreError::CacheMiss { window, anchor })?;
        self.list.touch(slot);
        Ok(&self.list.get(slot).bytes)
    }

    /// Re-admit a dumped node from the window's dump file.
    ///
    /// No-op when the node is already resident. Fails with `CacheMiss`
    /// when the dump holds no record for the anchor (or no dump is
    /// registered), with `BackingStoreUnavailable` when the dump file
    /// itself cannot be read.
    pub fn reload_from_dump(&mut self, window: WindowId, anchor: u64) -> Result<(), CoreError> {
        if self.contains(window, anchor) {
            return Ok(());
        }

        let bytes = {
            let dump = self
                .dumps
                .get_mut(&window)
                .ok_or(CoreError::CacheMiss { window, anchor })?;
            dump.read(anchor)
                .map_err(|e| {
                    CoreError::store_unavailable(
                        format!("reading dumped bytes for {} anchor {}", window, anchor),
                        e,
                    )
                })?
                .ok_or(CoreError::CacheMiss { window, anchor })?
        };

        self.make_room(bytes.len() as u64, None)?;
        self.used += bytes.len() as u64;
        let slot = self.list.push_front(CacheNode {
            window,
            anchor,
            bytes,
        });
        self.index.insert((window, anchor), slot);
        Ok(())
    }

    /// Read bytes straight from the window's dump file without admitting
    /// the node. Last-resort fallback for chunks too large for the
    /// budget.
    pub fn read_dumped(
        &mut self,
        window: WindowId,
        anchor: u64,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, CoreError> {
        let dump = self
            .dumps
            .get_mut(&window)
            .ok_or(CoreError::CacheMiss { window, anchor })?;
        let bytes = dump
            .read(anchor)
            .map_err(|e| {
                CoreError::store_unavailable(
                    format!("reading dumped bytes for {} anchor {}", window, anchor),
                    e,
                )
            })?
            .ok_or(CoreError::CacheMiss { window, anchor })?;

        if offset + len > bytes.len() {
            return Err(CoreError::InvalidPosition {
                anchor,
                offset: (offset + len) as u64,
            });
        }
        Ok(bytes[offset..offset + len].to_vec())
    }

    /// Replay the window's dump file: the surviving records, with anchors
    /// beyond `store_size` discarded. Used on window re-open to rebuild
    /// the change table.
    pub fn replay_dump(
        &mut self,
        window: WindowId,
        store_size: u64,
    ) -> Result<Vec<DumpRecord>, CoreError> {
        let Some(dump) = self.dumps.get_mut(&window) else {
            return Ok(Vec::new());
        };
        dump.replay(store_size)
            .map_err(|e| CoreError::store_unavailable(format!("replaying dump for {}", window), e))
    }

    /// Flush one node to its window's dump file and drop it.
    pub fn evict(&mut self, window: WindowId, anchor: u64) -> Result<(), CoreError> {
        let slot = self
            .index
            .get(&(window, anchor))
            .copied()
            .ok_or(CoreError::CacheMiss { window, anchor })?;
        self.evict_slot(slot)
    }

    /// Flush every resident node of `window` to its dump file.
    ///
    /// This is the explicit "stash" callers use to free budget after a
    /// `CacheFull`, and the close path uses it to persist pending bytes.
    /// Returns the number of bytes freed.
    pub fn stash_window(&mut self, window: WindowId) -> Result<u64, CoreError> {
        let slots: Vec<SlotId> = self
            .index
            .iter()
            .filter(|((w, _), _)| *w == window)
            .map(|(_, slot)| *slot)
            .collect();

        let mut freed = 0;
        for slot in slots {
            freed += self.list.get(slot).bytes.len() as u64;
            self.evict_slot(slot)?;
        }
        vellum_logger::debug(format!("stashed {} bytes for {}", freed, window));
        Ok(freed)
    }

    /// Drop every resident node of `window` without flushing and empty
    /// its dump file, keeping the registration. Used after a save has
    /// flushed all pending insertions into the backing store.
    pub fn clear_window(&mut self, window: WindowId) -> Result<(), CoreError> {
        let keys: Vec<(WindowId, u64)> = self
            .index
            .keys()
            .filter(|(w, _)| *w == window)
            .copied()
            .collect();

        for key in keys {
            let slot = self.index.remove(&key).expect("indexed slot");
            let node = self.list.remove(slot);
            self.used -= node.bytes.len() as u64;
        }

        if let Some(dump) = self.dumps.get_mut(&window) {
            dump.clear().map_err(|e| {
                CoreError::store_unavailable(format!("clearing dump for {}", window), e)
            })?;
        }
        Ok(())
    }

    /// Drop every resident node of `window` without flushing and detach
    /// its dump file. The caller decides whether the dump is kept (stash
    /// was called first), cleared, or deleted.
    pub fn release_window(&mut self, window: WindowId) -> Option<DumpFile> {
        let keys: Vec<(WindowId, u64)> = self
            .index
            .keys()
            .filter(|(w, _)| *w == window)
            .copied()
            .collect();

        for key in keys {
            let slot = self.index.remove(&key).expect("indexed slot");
            let node = self.list.remove(slot);
            self.used -= node.bytes.len() as u64;
        }
        self.dumps.remove(&window)
    }

    /// Evict victims from the tail until `needed` more bytes fit, never
    /// touching `protect`.
    fn make_room(&mut self, needed: u64, protect: Option<SlotId>) -> Result<(), CoreError> {
        if needed > self.budget {
            return Err(CoreError::CacheFull {
                requested: needed,
                budget: self.budget,
            });
        }

        while self.used + needed > self.budget {
            let mut victim = self.list.tail();
            while let Some(slot) = victim {
                if Some(slot) != protect {
                    break;
                }
                victim = self.list.prev(slot);
            }
            let Some(slot) = victim else {
                return Err(CoreError::CacheFull {
                    requested: needed,
                    budget: self.budget,
                });
            };
            self.evict_slot(slot)?;
        }
        Ok(())
    }

    fn evict_slot(&mut self, slot: SlotId) -> Result<(), CoreError> {
        let (window, anchor) = {
            let node = self.list.get(slot);
            (node.window, node.anchor)
        };

        // Flush before dropping so a dump failure leaves the node
        // resident and the cache consistent.
        {
            let node = self.list.get(slot);
            let dump = self.dumps.get_mut(&window).ok_or_else(|| {
                CoreError::store_unavailable(
                    format!("flushing {} anchor {}", window, anchor),
                    io::Error::new(io::ErrorKind::NotFound, "no dump target registered"),
                )
            })?;
            dump.append(anchor, &node.bytes).map_err(|e| {
                CoreError::store_unavailable(format!("flushing {} anchor {}", window, anchor), e)
            })?;
        }

        let node = self.list.remove(slot);
        self.index.remove(&(window, anchor));
        self.used -= node.bytes.len() as u64;
        vellum_logger::debug(format!(
            "evicted {} bytes for {} anchor {}",
            node.bytes.len(),
            window,
            anchor
        ));
        Ok(())
    }
}
