//! The per-window change/deletion overlay.
//!
//! An [`Overlay`] maps between real backing-store offsets and virtual
//! positions without ever moving store bytes: insertions are recorded as
//! `anchor -> length` (the bytes live in the shared cache), deletions as
//! ranges of virtual positions. Every mutating entry point updates the
//! change table, both deletion tables, and the byte counters together, so
//! callers can never observe a partial update.

use std::collections::BTreeMap;
use std::sync::Arc;

use vellum_cache::InsertCache;
use vellum_core::{CoreError, VirtualPosition, VirtualRange, WindowId};
use vellum_store::{read_span, BackingStore};

use crate::deletions::DeletionTables;

/// Change/deletion overlay for one window.
pub struct Overlay {
    window: WindowId,
    store: Arc<dyn BackingStore>,
    /// `anchor -> inserted byte count`. The bytes are in the cache (or
    /// its dump file); only lengths live here.
    changes: BTreeMap<u64, u64>,
    deletions: DeletionTables,
    inserted_bytes: u64,
    deleted_bytes: u64,
    /// Bumped by every successful mutation; search stamps result sets
    /// with it to detect live edits.
    revision: u64,
}

impl Overlay {
    /// Create an empty overlay over `store`.
    pub fn new(window: WindowId, store: Arc<dyn BackingStore>) -> Self {
        Self {
            window,
            store,
            changes: BTreeMap::new(),
            deletions: DeletionTables::default(),
            inserted_bytes: 0,
            deleted_bytes: 0,
            revision: 0,
        }
    }

    /// The window this overlay belongs to.
    pub fn window(&self) -> WindowId {
        self.window
    }

    /// The backing store the overlay reads through.
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// Total bytes pending insertion.
    pub fn inserted_bytes(&self) -> u64 {
        self.inserted_bytes
    }

    /// Total logical bytes covered by deletion ranges.
    pub fn deleted_bytes(&self) -> u64 {
        self.deleted_bytes
    }

    /// `true` once any edit has been recorded since the last save.
    pub fn any_changes_made(&self) -> bool {
        !self.changes.is_empty() || !self.deletions.is_empty()
    }

    /// `true` when no visible character remains (also for an empty
    /// document).
    pub fn all_characters_removed(&self) -> bool {
        self.first_valid_position().is_none()
    }

    /// Mutation counter, bumped by every successful edit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ------------------------------------------------------------------
    // Position geometry
    // ------------------------------------------------------------------

    pub(crate) fn chunk_len(&self, anchor: u64) -> u64 {
        self.changes.get(&anchor).copied().unwrap_or(0)
    }

    /// Addressable offsets at `anchor`: the inserted chunk plus the real
    /// store byte, when the anchor is inside the store.
    fn run_len(&self, anchor: u64) -> u64 {
        self.chunk_len(anchor) + u64::from(anchor < self.store.size())
    }

    pub(crate) fn next_chunk_anchor_after(&self, anchor: u64) -> Option<u64> {
        self.changes
            .range(anchor + 1..)
            .next()
            .map(|(&a, _)| a)
    }

    /// One past the last addressable position.
    pub fn end_position(&self) -> VirtualPosition {
        let size = self.store.size();
        VirtualPosition::new(size, self.chunk_len(size))
    }

    /// `true` if `pos` addresses a logical byte (deleted or not).
    pub fn is_valid_position(&self, pos: VirtualPosition) -> bool {
        pos.anchor <= self.store.size() && pos.offset < self.run_len(pos.anchor)
    }

    /// Step one logical byte forward, ignoring deletions.
    fn next_raw(&self, pos: VirtualPosition) -> Option<VirtualPosition> {
        if pos.offset + 1 < self.run_len(pos.anchor) {
            return Some(VirtualPosition::new(pos.anchor, pos.offset + 1));
        }
        let next = pos.anchor + 1;
        if next > self.store.size() || self.run_len(next) == 0 {
            return None;
        }
        Some(VirtualPosition::new(next, 0))
    }

    /// Step one logical byte backward, ignoring deletions.
    fn prev_raw(&self, pos: VirtualPosition) -> Option<VirtualPosition> {
        if pos.offset > 0 {
            return Some(VirtualPosition::new(pos.anchor, pos.offset - 1));
        }
        let mut anchor = pos.anchor;
        while anchor > 0 {
            anchor -= 1;
            let run = self.run_len(anchor);
            if run > 0 {
                return Some(VirtualPosition::new(anchor, run - 1));
            }
        }
        None
    }

    /// First valid, non-deleted position at or after `pos`.
    pub(crate) fn normalize_forward(&self, pos: VirtualPosition) -> Option<VirtualPosition> {
        let mut p = pos;
        loop {
            if !self.is_valid_position(p) {
                return None;
            }
            match self.deletions.containing(p) {
                None => return Some(p),
                Some(range) => p = range.end,
            }
        }
    }

    /// Advance to the next visible character.
    ///
    /// Skips positions inside deletion ranges and steps across anchor
    /// boundaries (out of an insertion chunk onto the real byte, or onto
    /// the next anchor). `None` past the last visible character.
    pub fn next_position(&self, pos: VirtualPosition) -> Option<VirtualPosition> {
        let p = self.next_raw(pos)?;
        self.normalize_forward(p)
    }

    /// Retreat to the previous visible character. `None` before the
    /// first visible character.
    pub fn prev_position(&self, pos: VirtualPosition) -> Option<VirtualPosition> {
        let mut p = self.prev_raw(pos)?;
        loop {
            match self.deletions.containing(p) {
                None => return Some(p),
                Some(range) => p = self.prev_raw(range.start)?,
            }
        }
    }

    /// `true` if the character at `pos` is inside a deletion range.
    pub fn is_deleted(&self, pos: VirtualPosition) -> bool {
        self.deletions.containing(pos).is_some()
    }

    /// Start of the deletion range covering `pos`.
    pub fn deletion_start(&self, pos: VirtualPosition) -> Option<VirtualPosition> {
        self.deletions.containing(pos).map(|r| r.start)
    }

    /// End (exclusive) of the deletion range covering `pos`.
    pub fn deletion_end(&self, pos: VirtualPosition) -> Option<VirtualPosition> {
        self.deletions.containing(pos).map(|r| r.end)
    }

    /// First visible character of the document.
    pub fn first_valid_position(&self) -> Option<VirtualPosition> {
        self.normalize_forward(VirtualPosition::ZERO)
    }

    /// Last visible character of the document.
    pub fn last_valid_position(&self) -> Option<VirtualPosition> {
        self.prev_position(self.end_position())
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Insert `bytes` logically at `pos`.
    ///
    /// Splices into the existing chunk when the anchor already has one
    /// (including appending at the real-byte position), otherwise starts
    /// a new chunk. The bytes are written through to the cache first; the
    /// tables are only touched once the cache holds them, so a
    /// `CacheFull` leaves the overlay unchanged.
    pub fn add_changes(
        &mut self,
        cache: &mut InsertCache,
        pos: VirtualPosition,
        bytes: &[u8],
    ) -> Result<(), CoreError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let chunk = self.chunk_len(pos.anchor);
        if pos.anchor > self.store.size() || pos.offset > chunk {
            return Err(CoreError::InvalidPosition {
                anchor: pos.anchor,
                offset: pos.offset,
            });
        }

        // A chunk whose bytes were dumped must be resident again before
        // splicing into it.
        if chunk > 0 && !cache.contains(self.window, pos.anchor) {
            cache.reload_from_dump(self.window, pos.anchor)?;
        }
        cache.put(self.window, pos.anchor, pos.offset as usize, bytes)?;

        let len = bytes.len() as u64;
        *self.changes.entry(pos.anchor).or_insert(0) += len;
        self.inserted_bytes += len;
        if self
            .deletions
            .shift_for_insertion(pos.anchor, pos.offset, len)
        {
            // Inserted strictly inside a deleted range: absorbed by it.
            self.deleted_bytes += len;
        }
        self.revision += 1;
        Ok(())
    }

    /// Mark `[start, end)` deleted, merging with overlapping or abutting
    /// ranges.
    ///
    /// Returns the caller's new effective cursor: the nearest visible
    /// position after the removal, falling back to the nearest before
    /// it, or `None` when no visible character remains.
    pub fn remove_characters(
        &mut self,
        start: VirtualPosition,
        end: VirtualPosition,
    ) -> Result<Option<VirtualPosition>, CoreError> {
        self.check_range(start, end)?;
        if start == end {
            return Ok(self.normalize_forward(start).or_else(|| self.prev_position(start)));
        }

        let newly_deleted = self.diff_bytes(start, end);
        self.deletions.insert_merged(VirtualRange { start, end });
        self.deleted_bytes += newly_deleted;
        self.revision += 1;

        Ok(self
            .normalize_forward(end)
            .or_else(|| self.prev_position(start)))
    }

    /// Remove deletion marks within `[start, end)`. Inverse of
    /// [`Overlay::remove_characters`], used for rollback.
    pub fn undelete(
        &mut self,
        start: VirtualPosition,
        end: VirtualPosition,
    ) -> Result<(), CoreError> {
        self.check_range(start, end)?;
        if start == end {
            return Ok(());
        }

        let undeleted = self.deletions.remove_overlaps(VirtualRange { start, end });
        for r in undeleted {
            self.deleted_bytes -= self.count_raw(r.start, r.end);
        }
        self.revision += 1;
        Ok(())
    }

    /// Clear all overlay state after a save has flushed the pending
    /// insertions into the backing store: the store now reflects virtual
    /// content directly.
    pub fn normalize_after_save(&mut self, cache: &mut InsertCache) -> Result<(), CoreError> {
        cache.clear_window(self.window)?;
        self.changes.clear();
        self.deletions.clear();
        self.inserted_bytes = 0;
        self.deleted_bytes = 0;
        self.revision += 1;
        Ok(())
    }

    /// Rebuild the change table from the window's dump file on re-open,
    /// re-admitting what fits the cache budget. Records beyond the
    /// current store size were already discarded by the replay. Returns
    /// the number of restored chunks.
    pub fn restore_from_dump(&mut self, cache: &mut InsertCache) -> Result<usize, CoreError> {
        let records = cache.replay_dump(self.window, self.store.size())?;
        let mut restored = 0;

        for record in records {
            let len = record.bytes.len() as u64;
            if len == 0 {
                continue;
            }
            self.changes.insert(record.anchor, len);
            self.inserted_bytes += len;
            match cache.put(self.window, record.anchor, 0, &record.bytes) {
                Ok(()) => {}
                // Stays dumped; reads fall back to the dump file.
                Err(CoreError::CacheFull { .. }) => {}
                Err(e) => return Err(e),
            }
            restored += 1;
        }

        if restored > 0 {
            self.revision += 1;
            vellum_logger::debug(format!(
                "restored {} dumped chunks for {}",
                restored, self.window
            ));
        }
        Ok(restored)
    }

    fn check_range(&self, start: VirtualPosition, end: VirtualPosition) -> Result<(), CoreError> {
        if end < start || (!self.is_valid_position(start) && start != self.end_position()) {
            return Err(CoreError::InvalidPosition {
                anchor: start.anchor,
                offset: start.offset,
            });
        }
        if !self.is_valid_position(end) && end != self.end_position() {
            return Err(CoreError::InvalidPosition {
                anchor: end.anchor,
                offset: end.offset,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------

    /// Assemble up to `max_bytes` of contiguous logical bytes starting at
    /// `pos`, stitching real-store spans, cached insertion bytes, and
    /// skipping deletion ranges.
    ///
    /// Returns the bytes read and the position immediately after the last
    /// byte returned (the end position when the document is exhausted).
    /// Stops early, returning fewer bytes, when insertion bytes are
    /// neither resident nor servable from the dump file.
    pub fn continuous_chars(
        &self,
        cache: &mut InsertCache,
        pos: VirtualPosition,
        max_bytes: usize,
    ) -> (Vec<u8>, VirtualPosition) {
        let end = self.end_position();
        let mut out = Vec::new();
        let Some(mut p) = self.normalize_forward(pos.min(end)) else {
            return (out, end);
        };

        while out.len() < max_bytes && p < end {
            if let Some(range) = self.deletions.containing(p) {
                p = range.end;
                continue;
            }
            if !self.is_valid_position(p) {
                p = end;
                break;
            }

            let remaining = max_bytes - out.len();
            let chunk = self.chunk_len(p.anchor);

            if p.offset < chunk {
                // Inside an insertion chunk.
                let mut take = ((chunk - p.offset) as usize).min(remaining);
                if let Some(d) = self.deletions.first_starting_at_or_after(p) {
                    if d.start.anchor == p.anchor && d.start.offset < p.offset + take as u64 {
                        take = (d.start.offset - p.offset) as usize;
                    }
                }
                match self.chunk_slice(cache, p.anchor, p.offset as usize, take) {
                    Ok(bytes) => {
                        out.extend_from_slice(&bytes);
                        p = VirtualPosition::new(p.anchor, p.offset + take as u64);
                    }
                    Err(e) => {
                        vellum_logger::debug(format!(
                            "continuous read stopped early at {}: {}",
                            p, e
                        ));
                        break;
                    }
                }
            } else {
                // A span of real store bytes, up to the next insertion
                // anchor, deletion start, or end-of-store.
                let size = self.store.size();
                if p.anchor >= size {
                    break;
                }
                let mut span = size - p.anchor;
                if let Some(next_chunk) = self.next_chunk_anchor_after(p.anchor) {
                    span = span.min(next_chunk - p.anchor);
                }
                if let Some(d) = self.deletions.first_starting_at_or_after(p) {
                    if d.start.anchor < p.anchor + span {
                        span = d.start.anchor - p.anchor;
                    }
                }
                span = span.min(remaining as u64);

                match read_span(self.store.as_ref(), p.anchor, span as usize) {
                    Ok(bytes) => {
                        let n = bytes.len() as u64;
                        out.extend_from_slice(&bytes);
                        p = VirtualPosition::new(p.anchor + n, 0);
                        if n < span {
                            // Store ended short (shrunk underneath us).
                            break;
                        }
                    }
                    Err(e) => {
                        vellum_logger::debug(format!(
                            "continuous read stopped early at {}: {}",
                            p, e
                        ));
                        break;
                    }
                }
            }
        }

        let after = self.normalize_forward(p.min(end)).unwrap_or(end);
        (out, after)
    }

    /// Logical byte distance between two positions: the number of
    /// non-deleted logical bytes in `[min(a, b), max(a, b))`.
    pub fn diff_bytes(&self, a: VirtualPosition, b: VirtualPosition) -> u64 {
        self.diff_bytes_skipping(a, b, &[])
    }

    /// Like [`Overlay::diff_bytes`], additionally treating `skip` ranges
    /// as absent. Used by paste/move operations that must not count their
    /// own source range.
    pub fn diff_bytes_skipping(
        &self,
        a: VirtualPosition,
        b: VirtualPosition,
        skip: &[VirtualRange],
    ) -> u64 {
        let window = VirtualRange::new(a, b);
        if window.is_empty() {
            return 0;
        }
        let raw = self.count_raw(window.start, window.end);

        // Clip the absent ranges (tracked deletions plus the caller's
        // skip set) to the window and merge them so overlaps are not
        // subtracted twice.
        let mut absent: Vec<VirtualRange> = self
            .deletions
            .overlapping(window)
            .into_iter()
            .chain(skip.iter().copied())
            .filter_map(|r| {
                let clipped = VirtualRange {
                    start: r.start.max(window.start),
                    end: r.end.min(window.end),
                };
                (!clipped.is_empty()).then_some(clipped)
            })
            .collect();
        absent.sort_by_key(|r| r.start);

        let mut removed = 0;
        let mut current: Option<VirtualRange> = None;
        for r in absent {
            match current {
                None => current = Some(r),
                Some(ref mut c) => {
                    if r.start <= c.end {
                        c.end = c.end.max(r.end);
                    } else {
                        removed += self.count_raw(c.start, c.end);
                        current = Some(r);
                    }
                }
            }
        }
        if let Some(c) = current {
            removed += self.count_raw(c.start, c.end);
        }

        raw - removed
    }

    /// Number of valid positions strictly before `p`, ignoring deletions.
    fn index_raw(&self, p: VirtualPosition) -> u64 {
        let size = self.store.size();
        let real_below = p.anchor.min(size);
        let inserted_below: u64 = self.changes.range(..p.anchor).map(|(_, &len)| len).sum();
        real_below + inserted_below + p.offset.min(self.run_len(p.anchor))
    }

    /// Valid positions in `[lo, hi)`, ignoring deletions.
    pub(crate) fn count_raw(&self, lo: VirtualPosition, hi: VirtualPosition) -> u64 {
        if hi <= lo {
            return 0;
        }
        self.index_raw(hi) - self.index_raw(lo)
    }

    pub(crate) fn chunk_slice(
        &self,
        cache: &mut InsertCache,
        anchor: u64,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, CoreError> {
        match cache.get(self.window, anchor, offset, len) {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(CoreError::CacheMiss { .. }) => {
                match cache.reload_from_dump(self.window, anchor) {
                    Ok(()) => Ok(cache.get(self.window, anchor, offset, len)?.to_vec()),
                    // Chunk larger than the whole budget: serve it
                    // straight from the dump without admission.
                    Err(CoreError::CacheFull { .. }) => {
                        cache.read_dumped(self.window, anchor, offset, len)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    // Snapshot construction (see `snapshot.rs`) needs read access to the
    // tables.
    pub(crate) fn changes_map(&self) -> &BTreeMap<u64, u64> {
        &self.changes
    }

    pub(crate) fn deletion_tables(&self) -> &DeletionTables {
        &self.deletions
    }

    /// Deletion ranges in start order (for the search engine's
    /// changed-region scheduling).
    pub fn deletion_ranges(&self) -> Vec<VirtualRange> {
        self.deletions.iter().collect()
    }

    /// Insertion chunks as `(anchor, length)` in anchor order.
    pub fn change_entries(&self) -> Vec<(u64, u64)> {
        self.changes.iter().map(|(&a, &l)| (a, l)).collect()
    }

    #[cfg(test)]
    pub(crate) fn deletion_tables_are_inverse(&self) -> bool {
        self.deletions.tables_are_inverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_store::{DumpFile, MemoryStore};

    fn pos(anchor: u64, offset: u64) -> VirtualPosition {
        VirtualPosition::new(anchor, offset)
    }

    fn setup(content: &[u8], budget: u64) -> (Overlay, InsertCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let window = WindowId::from_raw(1);
        let mut cache = InsertCache::new(budget);
        cache.register_window(window, DumpFile::create(dir.path().join("w.dump")).unwrap());
        let overlay = Overlay::new(window, Arc::new(MemoryStore::new(content.to_vec())));
        (overlay, cache, dir)
    }

    fn read_all(overlay: &Overlay, cache: &mut InsertCache) -> Vec<u8> {
        overlay
            .continuous_chars(cache, VirtualPosition::ZERO, usize::MAX)
            .0
    }

    #[test]
    fn test_insert_read_round_trip() {
        let (mut overlay, mut cache, _dir) = setup(b"", 64);
        overlay.add_changes(&mut cache, pos(0, 0), b"hello").unwrap();

        let (bytes, after) = overlay.continuous_chars(&mut cache, pos(0, 0), 5);
        assert_eq!(bytes, b"hello");
        assert_eq!(after, overlay.end_position());
        assert_eq!(overlay.inserted_bytes(), 5);
        assert!(overlay.any_changes_made());
    }

    #[test]
    fn test_delete_head_of_fresh_insertion() {
        // Empty window, insert "hello", delete "he": reads yield "llo".
        let (mut overlay, mut cache, _dir) = setup(b"", 64);
        overlay.add_changes(&mut cache, pos(0, 0), b"hello").unwrap();
        overlay.remove_characters(pos(0, 0), pos(0, 2)).unwrap();

        let (bytes, _) = overlay.continuous_chars(&mut cache, pos(0, 0), 10);
        assert_eq!(bytes, b"llo");
        assert!(overlay.any_changes_made());
        assert_eq!(overlay.deleted_bytes(), 2);
    }

    #[test]
    fn test_insert_splits_existing_chunk() {
        let (mut overlay, mut cache, _dir) = setup(b"", 64);
        overlay.add_changes(&mut cache, pos(0, 0), b"held").unwrap();
        overlay.add_changes(&mut cache, pos(0, 2), b"llo wor").unwrap();

        assert_eq!(read_all(&overlay, &mut cache), b"hello world");
        assert_eq!(overlay.inserted_bytes(), 11);
    }

    #[test]
    fn test_insert_before_and_after_real_byte() {
        let (mut overlay, mut cache, _dir) = setup(b"b", 64);
        // Chunk at anchor 0 reads before the real byte; appending at the
        // real-byte position keeps extending the same chunk.
        overlay.add_changes(&mut cache, pos(0, 0), b"a").unwrap();
        overlay.add_changes(&mut cache, pos(1, 0), b"c").unwrap();

        assert_eq!(read_all(&overlay, &mut cache), b"abc");
    }

    #[test]
    fn test_continuous_read_stitches_all_sources() {
        let (mut overlay, mut cache, _dir) = setup(b"0123456789", 64);
        overlay.add_changes(&mut cache, pos(3, 0), b"abc").unwrap();
        overlay.remove_characters(pos(5, 0), pos(8, 0)).unwrap();

        // 012 abc 34 89 (567 deleted, insertion anchored at 3).
        assert_eq!(read_all(&overlay, &mut cache), b"012abc3489");

        // Bounded reads stop mid-stream and resume exactly.
        let (head, after) = overlay.continuous_chars(&mut cache, pos(0, 0), 4);
        assert_eq!(head, b"012a");
        let (tail, _) = overlay.continuous_chars(&mut cache, after, 100);
        assert_eq!(tail, b"bc3489");
    }

    #[test]
    fn test_next_prev_are_inverse_on_visible_positions() {
        let (mut overlay, mut cache, _dir) = setup(b"0123456789", 64);
        overlay.add_changes(&mut cache, pos(2, 0), b"xy").unwrap();
        overlay.remove_characters(pos(4, 0), pos(7, 0)).unwrap();
        overlay.remove_characters(pos(9, 0), pos(10, 0)).unwrap();

        let mut p = overlay.first_valid_position().unwrap();
        let mut walked = vec![p];
        while let Some(next) = overlay.next_position(p) {
            // prev_position undoes next_position at every visible step.
            assert_eq!(overlay.prev_position(next), Some(p));
            p = next;
            walked.push(p);
        }
        // 10 store bytes + 2 inserted - 4 deleted visible positions.
        assert_eq!(walked.len(), 8);
        assert_eq!(overlay.last_valid_position(), Some(p));
    }

    #[test]
    fn test_traversal_skips_deleted_insertion() {
        let (mut overlay, mut cache, _dir) = setup(b"ab", 64);
        overlay.add_changes(&mut cache, pos(1, 0), b"xyz").unwrap();
        // Delete the whole inserted chunk.
        overlay.remove_characters(pos(1, 0), pos(1, 3)).unwrap();

        assert_eq!(read_all(&overlay, &mut cache), b"ab");
        // Stepping from 'a' lands on the real byte 'b', not the chunk.
        assert_eq!(overlay.next_position(pos(0, 0)), Some(pos(1, 3)));
    }

    #[test]
    fn test_diff_bytes_is_symmetric_and_deletion_aware() {
        let (mut overlay, mut cache, _dir) = setup(b"0123456789", 64);
        assert_eq!(overlay.diff_bytes(pos(2, 0), pos(7, 0)), 5);
        assert_eq!(
            overlay.diff_bytes(pos(7, 0), pos(2, 0)),
            overlay.diff_bytes(pos(2, 0), pos(7, 0))
        );

        overlay.add_changes(&mut cache, pos(4, 0), b"ab").unwrap();
        assert_eq!(overlay.diff_bytes(pos(2, 0), pos(7, 0)), 7);

        overlay.remove_characters(pos(5, 0), pos(7, 0)).unwrap();
        assert_eq!(overlay.diff_bytes(pos(2, 0), pos(7, 0)), 5);
        assert_eq!(overlay.diff_bytes(pos(2, 0), pos(2, 0)), 0);
    }

    #[test]
    fn test_diff_bytes_skipping_extra_ranges() {
        let (overlay, _cache, _dir) = setup(b"0123456789", 64);
        let skip = [VirtualRange {
            start: pos(3, 0),
            end: pos(5, 0),
        }];
        assert_eq!(overlay.diff_bytes_skipping(pos(0, 0), pos(10, 0), &skip), 8);

        // Overlapping skip ranges are not double-counted.
        let skip = [
            VirtualRange {
                start: pos(3, 0),
                end: pos(6, 0),
            },
            VirtualRange {
                start: pos(5, 0),
                end: pos(8, 0),
            },
        ];
        assert_eq!(overlay.diff_bytes_skipping(pos(0, 0), pos(10, 0), &skip), 5);
    }

    #[test]
    fn test_undelete_restores_exactly() {
        let (mut overlay, mut cache, _dir) = setup(b"0123456789", 64);
        overlay.remove_characters(pos(2, 0), pos(6, 0)).unwrap();
        assert_eq!(overlay.deleted_bytes(), 4);
        assert_eq!(read_all(&overlay, &mut cache), b"016789");

        overlay.undelete(pos(2, 0), pos(6, 0)).unwrap();
        assert_eq!(overlay.deleted_bytes(), 0);
        assert_eq!(read_all(&overlay, &mut cache), b"0123456789");
        assert!(overlay.deletion_tables_are_inverse());
    }

    #[test]
    fn test_remove_characters_returns_next_visible_cursor() {
        let (mut overlay, _cache, _dir) = setup(b"0123456789", 64);
        let cursor = overlay.remove_characters(pos(3, 0), pos(6, 0)).unwrap();
        assert_eq!(cursor, Some(pos(6, 0)));

        // Deleting up to the end falls back to the position before the
        // removal.
        let cursor = overlay.remove_characters(pos(6, 0), pos(10, 0)).unwrap();
        assert_eq!(cursor, Some(pos(2, 0)));

        // Deleting everything leaves no cursor.
        let cursor = overlay.remove_characters(pos(0, 0), pos(3, 0)).unwrap();
        assert_eq!(cursor, None);
        assert!(overlay.all_characters_removed());
    }

    #[test]
    fn test_adjacent_deletions_merge() {
        let (mut overlay, _cache, _dir) = setup(b"0123456789", 64);
        overlay.remove_characters(pos(2, 0), pos(4, 0)).unwrap();
        overlay.remove_characters(pos(4, 0), pos(6, 0)).unwrap();
        overlay.remove_characters(pos(1, 0), pos(3, 0)).unwrap();

        assert_eq!(overlay.deletion_ranges(), vec![VirtualRange {
            start: pos(1, 0),
            end: pos(6, 0),
        }]);
        assert_eq!(overlay.deleted_bytes(), 5);
        assert_eq!(overlay.deletion_start(pos(3, 0)), Some(pos(1, 0)));
        assert_eq!(overlay.deletion_end(pos(3, 0)), Some(pos(6, 0)));
    }

    #[test]
    fn test_deletion_then_insertion_at_same_position() {
        let (mut overlay, mut cache, _dir) = setup(b"abcdef", 64);
        overlay.remove_characters(pos(2, 0), pos(4, 0)).unwrap();
        // Insertion placed at the deleted range's start stays visible;
        // the deleted characters stay hidden.
        overlay.add_changes(&mut cache, pos(2, 0), b"XY").unwrap();

        assert_eq!(read_all(&overlay, &mut cache), b"abXYef");
        assert_eq!(overlay.deleted_bytes(), 2);
        assert!(overlay.deletion_tables_are_inverse());
    }

    #[test]
    fn test_cache_full_leaves_overlay_untouched() {
        let (mut overlay, mut cache, _dir) = setup(b"", 4);
        let err = overlay
            .add_changes(&mut cache, pos(0, 0), b"too big to fit")
            .unwrap_err();
        assert!(matches!(err, CoreError::CacheFull { .. }));
        assert!(!overlay.any_changes_made());
        assert_eq!(overlay.inserted_bytes(), 0);
    }

    #[test]
    fn test_reads_fall_back_to_dump_after_stash() {
        let (mut overlay, mut cache, _dir) = setup(b"ab", 64);
        overlay.add_changes(&mut cache, pos(1, 0), b"-inserted-").unwrap();
        cache.stash_window(overlay.window()).unwrap();
        assert_eq!(cache.resident_bytes(), 0);

        // The overlay reloads the dumped chunk transparently.
        assert_eq!(read_all(&overlay, &mut cache), b"a-inserted-b");
        assert!(cache.contains(overlay.window(), 1));
    }

    #[test]
    fn test_normalize_after_save_resets_everything() {
        let (mut overlay, mut cache, _dir) = setup(b"abcdef", 64);
        overlay.add_changes(&mut cache, pos(3, 0), b"xyz").unwrap();
        overlay.remove_characters(pos(0, 0), pos(2, 0)).unwrap();

        overlay.normalize_after_save(&mut cache).unwrap();
        assert!(!overlay.any_changes_made());
        assert_eq!(overlay.inserted_bytes(), 0);
        assert_eq!(overlay.deleted_bytes(), 0);
        assert_eq!(cache.resident_bytes(), 0);
        assert_eq!(read_all(&overlay, &mut cache), b"abcdef");
    }

    #[test]
    fn test_restore_from_dump_rebuilds_change_table() {
        let dir = tempfile::tempdir().unwrap();
        let window = WindowId::from_raw(1);
        let store = Arc::new(MemoryStore::new(b"0123456789".to_vec()));
        let dump_path = dir.path().join("w.dump");

        // First session: edit, stash, close.
        {
            let mut cache = InsertCache::new(64);
            cache.register_window(window, DumpFile::create(&dump_path).unwrap());
            let mut overlay = Overlay::new(window, Arc::clone(&store) as Arc<dyn BackingStore>);
            overlay.add_changes(&mut cache, pos(4, 0), b"mid").unwrap();
            overlay.add_changes(&mut cache, pos(10, 0), b"end").unwrap();
            cache.stash_window(window).unwrap();
        }

        // Second session: replay the dump.
        let mut cache = InsertCache::new(64);
        cache.register_window(window, DumpFile::open(&dump_path).unwrap());
        let mut overlay = Overlay::new(window, Arc::clone(&store) as Arc<dyn BackingStore>);
        let restored = overlay.restore_from_dump(&mut cache).unwrap();

        assert_eq!(restored, 2);
        assert_eq!(overlay.inserted_bytes(), 6);
        assert_eq!(read_all(&overlay, &mut cache), b"0123mid456789end");
    }

    #[test]
    fn test_invalid_positions_are_rejected() {
        let (mut overlay, mut cache, _dir) = setup(b"abc", 64);
        let err = overlay
            .add_changes(&mut cache, pos(9, 0), b"x")
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPosition { .. }));

        let err = overlay.remove_characters(pos(9, 0), pos(9, 1)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPosition { .. }));
    }
}
