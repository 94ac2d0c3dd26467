//! Scan producers.
//!
//! Each producer owns a private store cursor and walks a region of the
//! snapshot's logical index space in growing chunks, matching every chunk
//! and handing batches of `(logical index, length)` hits to the consumer
//! over a channel. Producers check the cancel token between chunks and
//! always finish the chunk they are on; nothing is torn down mid-read.

use std::sync::mpsc::Sender;

use regex::bytes::Regex;

use vellum_core::CancelToken;
use vellum_overlay::OverlaySnapshot;

/// Compile a literal needle into a byte matcher.
pub(crate) fn literal_matcher(needle: &str) -> Regex {
    Regex::new(&regex::escape(needle)).expect("escaped literal always compiles")
}

/// Which producer a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanSide {
    /// Scanning from the cursor towards the end.
    Forward,
    /// Scanning from the start towards the cursor.
    Backward,
    /// Secondary scan over changed regions.
    Changed,
}

/// Producer-to-consumer message.
#[derive(Debug)]
pub(crate) enum ScanMessage {
    /// A batch of matches as `(logical index, byte length)`.
    Matches(Vec<(u64, usize)>),
    /// The producer finished (or stopped at a cancel/read boundary).
    Done(ScanSide),
}

/// Chunk growth schedule for the expanding read windows.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Chunking {
    pub initial: u64,
    pub max: u64,
}

impl Chunking {
    fn grow(self, chunk: u64) -> u64 {
        (chunk * 2).min(self.max.max(self.initial))
    }
}

/// Scan `[lo, hi)` front to back in growing chunks.
///
/// Chunks overlap backwards by `overlap` bytes (needle length minus one)
/// so matches straddling a chunk boundary are still seen; the resulting
/// duplicates collapse in the consumer's ordered set.
pub(crate) fn scan_ascending(
    snapshot: &OverlaySnapshot,
    matcher: &Regex,
    lo: u64,
    hi: u64,
    overlap: u64,
    chunking: Chunking,
    cancel: &CancelToken,
    tx: &Sender<ScanMessage>,
) {
    let mut reader = match snapshot.open_reader() {
        Ok(r) => r,
        Err(e) => {
            vellum_logger::warn(format!("search reader unavailable: {}", e));
            return;
        }
    };

    let mut start = lo;
    let mut chunk = chunking.initial.max(1);
    while start < hi && !cancel.is_cancelled() {
        let end = (start + chunk).min(hi);
        let read_lo = start.saturating_sub(overlap);
        match snapshot.read(reader.as_mut(), read_lo, end) {
            Ok(bytes) => {
                let batch = match_chunk(matcher, &bytes, read_lo);
                if !batch.is_empty() && tx.send(ScanMessage::Matches(batch)).is_err() {
                    break;
                }
                if (bytes.len() as u64) < end - read_lo {
                    // Store ended short underneath the snapshot.
                    break;
                }
            }
            Err(e) => {
                vellum_logger::warn(format!("search read failed at {}: {}", start, e));
                break;
            }
        }
        start = end;
        chunk = chunking.grow(chunk);
    }
}

/// Scan `[lo, hi)` back to front in growing chunks, overlapping forward
/// so boundary-straddling matches are seen.
pub(crate) fn scan_descending(
    snapshot: &OverlaySnapshot,
    matcher: &Regex,
    lo: u64,
    hi: u64,
    overlap: u64,
    chunking: Chunking,
    cancel: &CancelToken,
    tx: &Sender<ScanMessage>,
) {
    let mut reader = match snapshot.open_reader() {
        Ok(r) => r,
        Err(e) => {
            vellum_logger::warn(format!("search reader unavailable: {}", e));
            return;
        }
    };

    let mut end = hi;
    let mut chunk = chunking.initial.max(1);
    while end > lo && !cancel.is_cancelled() {
        let start = end.saturating_sub(chunk).max(lo);
        let read_hi = (end + overlap).min(snapshot.len());
        match snapshot.read(reader.as_mut(), start, read_hi) {
            Ok(bytes) => {
                let batch: Vec<(u64, usize)> = match_chunk(matcher, &bytes, start)
                    .into_iter()
                    // Matches at or past `end` were covered by the
                    // previous (higher) chunk or belong to the other
                    // producer's region.
                    .filter(|&(idx, _)| idx < end)
                    .collect();
                if !batch.is_empty() && tx.send(ScanMessage::Matches(batch)).is_err() {
                    break;
                }
            }
            Err(e) => {
                vellum_logger::warn(format!("search read failed at {}: {}", start, e));
                break;
            }
        }
        end = start;
        chunk = chunking.grow(chunk);
    }
}

/// Scan a list of disjoint regions front to back (the secondary scan).
pub(crate) fn scan_regions(
    snapshot: &OverlaySnapshot,
    matcher: &Regex,
    regions: &[(u64, u64)],
    overlap: u64,
    chunking: Chunking,
    cancel: &CancelToken,
    tx: &Sender<ScanMessage>,
) {
    for &(lo, hi) in regions {
        if cancel.is_cancelled() {
            break;
        }
        scan_ascending(snapshot, matcher, lo, hi, overlap, chunking, cancel, tx);
    }
}

fn match_chunk(matcher: &Regex, bytes: &[u8], base: u64) -> Vec<(u64, usize)> {
    matcher
        .find_iter(bytes)
        .map(|m| (base + m.start() as u64, m.end() - m.start()))
        .collect()
}
