//! Immutable overlay snapshots for concurrent readers.
//!
//! Scan tasks cannot share the live overlay (it is single-threaded by
//! design), so the search engine takes an [`OverlaySnapshot`]: the
//! change/deletion tables flattened into a list of visible segments, the
//! insertion bytes fully materialized, and a shared handle to the backing
//! store. The snapshot addresses the document as a dense *logical index*
//! space `0..len()` (deleted ranges simply do not appear) and maps
//! logical indexes back to virtual positions in O(log segments).

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use vellum_cache::InsertCache;
use vellum_core::{CoreError, VirtualPosition};
use vellum_store::{BackingStore, StoreReader};

use crate::overlay::Overlay;

/// Where a visible segment's bytes come from.
#[derive(Debug, Clone, Copy)]
enum SegmentSource {
    /// Real bytes at a backing-store offset.
    Store { offset: u64 },
    /// Bytes of a pending insertion chunk.
    Insert { anchor: u64, chunk_offset: u64 },
}

/// One maximal run of visible bytes.
#[derive(Debug, Clone, Copy)]
struct Segment {
    logical_start: u64,
    len: u64,
    /// Position of the segment's first byte.
    base: VirtualPosition,
    source: SegmentSource,
}

/// A frozen, read-only view of one window's virtual document.
pub struct OverlaySnapshot {
    store: Arc<dyn BackingStore>,
    chunks: BTreeMap<u64, Vec<u8>>,
    segments: Vec<Segment>,
    total: u64,
}

impl Overlay {
    /// Freeze the overlay into a snapshot for concurrent readers.
    ///
    /// Insertion bytes are materialized up front (with dump fallback), so
    /// snapshot reads never touch the cache and never miss.
    pub fn snapshot(&self, cache: &mut InsertCache) -> Result<OverlaySnapshot, CoreError> {
        let mut chunks = BTreeMap::new();
        for (&anchor, &len) in self.changes_map() {
            let bytes = self.chunk_slice(cache, anchor, 0, len as usize)?;
            chunks.insert(anchor, bytes);
        }

        let end = self.end_position();
        let mut segments: Vec<Segment> = Vec::new();
        let mut logical = 0u64;
        let mut p = match self.normalize_forward(VirtualPosition::ZERO) {
            Some(p) => p,
            None => end,
        };

        while p < end {
            if let Some(range) = self.deletion_tables().containing(p) {
                p = range.end;
                continue;
            }
            if !self.is_valid_position(p) {
                break;
            }

            let chunk = self.chunk_len(p.anchor);
            let (len, source, next) = if p.offset < chunk {
                let mut take = chunk - p.offset;
                if let Some(d) = self.deletion_tables().first_starting_at_or_after(p) {
                    if d.start.anchor == p.anchor && d.start.offset < p.offset + take {
                        take = d.start.offset - p.offset;
                    }
                }
                (
                    take,
                    SegmentSource::Insert {
                        anchor: p.anchor,
                        chunk_offset: p.offset,
                    },
                    VirtualPosition::new(p.anchor, p.offset + take),
                )
            } else {
                let size = self.store().size();
                let mut span = size - p.anchor;
                if let Some(next_chunk) = self.next_chunk_anchor_after(p.anchor) {
                    span = span.min(next_chunk - p.anchor);
                }
                if let Some(d) = self.deletion_tables().first_starting_at_or_after(p) {
                    if d.start.anchor < p.anchor + span {
                        span = d.start.anchor - p.anchor;
                    }
                }
                (
                    span,
                    SegmentSource::Store { offset: p.anchor },
                    VirtualPosition::new(p.anchor + span, 0),
                )
            };

            segments.push(Segment {
                logical_start: logical,
                len,
                base: p,
                source,
            });
            logical += len;
            p = next;
        }

        Ok(OverlaySnapshot {
            store: Arc::clone(self.store()),
            chunks,
            segments,
            total: logical,
        })
    }
}

impl OverlaySnapshot {
    /// Visible logical bytes in the snapshot.
    pub fn len(&self) -> u64 {
        self.total
    }

    /// `true` when no visible byte exists.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Open an independent store cursor for one scan task.
    pub fn open_reader(&self) -> io::Result<Box<dyn StoreReader>> {
        self.store.open_reader()
    }

    /// The position of the visible byte at logical index `idx`.
    pub fn position_at(&self, idx: u64) -> Option<VirtualPosition> {
        if idx >= self.total {
            return None;
        }
        let seg = self.segment_for(idx);
        let j = idx - seg.logical_start;
        Some(match seg.source {
            SegmentSource::Insert { anchor, chunk_offset } => {
                VirtualPosition::new(anchor, chunk_offset + j)
            }
            SegmentSource::Store { offset } => {
                if j == 0 {
                    seg.base
                } else {
                    VirtualPosition::new(offset + j, 0)
                }
            }
        })
    }

    /// The logical index of the first visible byte at or after `pos`
    /// (`len()` when none exists).
    pub fn index_at_or_after(&self, pos: VirtualPosition) -> u64 {
        // Last segment starting at or before `pos`.
        let idx = self.segments.partition_point(|s| s.base <= pos);
        if idx == 0 {
            return 0;
        }
        let seg = &self.segments[idx - 1];

        let j = match seg.source {
            SegmentSource::Insert { anchor, chunk_offset } => {
                if pos.anchor != anchor {
                    seg.len
                } else {
                    pos.offset.saturating_sub(chunk_offset)
                }
            }
            SegmentSource::Store { offset } => {
                if pos.anchor <= offset {
                    0
                } else {
                    pos.anchor - offset
                }
            }
        };
        (seg.logical_start + j.min(seg.len)).min(self.total)
    }

    /// Read visible bytes `[lo, hi)` through `reader`.
    ///
    /// `hi` is clamped to the snapshot length. A store that shrank
    /// underneath the snapshot yields a short result rather than an
    /// error.
    pub fn read(
        &self,
        reader: &mut dyn StoreReader,
        lo: u64,
        hi: u64,
    ) -> io::Result<Vec<u8>> {
        let hi = hi.min(self.total);
        if lo >= hi {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity((hi - lo) as usize);

        let mut idx = self.segments.partition_point(|s| s.logical_start + s.len <= lo);
        let mut cursor = lo;
        while cursor < hi && idx < self.segments.len() {
            let seg = &self.segments[idx];
            let in_seg = cursor - seg.logical_start;
            let take = (seg.len - in_seg).min(hi - cursor) as usize;

            match seg.source {
                SegmentSource::Insert { anchor, chunk_offset } => {
                    let chunk = &self.chunks[&anchor];
                    let start = (chunk_offset + in_seg) as usize;
                    out.extend_from_slice(&chunk[start..start + take]);
                }
                SegmentSource::Store { offset } => {
                    let mut buf = vec![0u8; take];
                    let n = reader.read_at(offset + in_seg, &mut buf)?;
                    out.extend_from_slice(&buf[..n]);
                    if n < take {
                        break;
                    }
                }
            }

            cursor += take as u64;
            idx += 1;
        }
        Ok(out)
    }

    fn segment_for(&self, idx: u64) -> &Segment {
        let i = self.segments.partition_point(|s| s.logical_start <= idx);
        &self.segments[i - 1]
    }
}
