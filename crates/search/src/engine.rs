//! The per-window search engine.
//!
//! For every search string the engine runs `Idle -> ScanningInitial ->
//! Idle` once, then serves repeat queries from the stored result set.
//! Live edits (overlay revision advanced, store timestamp unchanged)
//! trigger `Idle -> ScanningIncremental -> Idle`: a secondary scan over
//! the merged changed regions only. An advanced store timestamp means
//! the document moved underneath the results, which are then dropped and
//! rebuilt by a fresh initial scan.
//!
//! The initial scan runs two producers concurrently, one expanding
//! from the cursor towards the end, one from the start towards the
//! cursor, each with a private store cursor. The consumer polls the
//! caller's control channel (resize, interrupt) and the producers'
//! results channel every iteration, never blocking indefinitely on
//! either. On interrupt it waits for producers to finish their current
//! chunk, discards the partial set, and reports `Interrupted` with the
//! best match known so far.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, SystemTime};

use vellum_cache::InsertCache;
use vellum_core::{CancelToken, CoreError, VirtualPosition, WindowId};
use vellum_overlay::{Overlay, OverlaySnapshot};

use crate::results::{ResultSet, SearchDirection, SearchMatch};
use crate::scan::{self, Chunking, ScanMessage, ScanSide};

/// Events the embedding event loop feeds into a running search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Terminal resized; search keeps running, a redraw is requested.
    Resize,
    /// User interrupt; the scan winds down at the next safe point.
    Interrupt,
}

/// Notifications emitted while a scan is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEvent {
    /// The first known nearest match, reported before the scan finishes.
    EarlyMatch(SearchMatch),
    /// A resize arrived mid-scan; the UI should repaint.
    RedrawRequested,
}

/// How a search call ended. Interruption is a normal outcome, not an
/// error; it carries the best match known when the user bailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Completed(Option<SearchMatch>),
    Interrupted(Option<SearchMatch>),
}

impl SearchOutcome {
    /// The reported match, regardless of how the search ended.
    pub fn nearest(self) -> Option<SearchMatch> {
        match self {
            Self::Completed(m) | Self::Interrupted(m) => m,
        }
    }

    /// `true` when the user interrupted the scan.
    pub fn was_interrupted(self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

/// What the most recent query actually did: the observable trace of the
/// engine's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// Full bidirectional scan of the document.
    Initial,
    /// Secondary scan over changed regions only.
    Incremental,
    /// Served from the stored result set, no scan at all.
    FromCache,
}

/// Tuning knobs for the scan producers and the result set.
#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    /// First chunk size of an expanding read window, in bytes.
    pub initial_chunk: u64,
    /// Chunk size ceiling, in bytes.
    pub max_chunk: u64,
    /// Result cap on each side of the scan origin.
    pub max_results_per_direction: usize,
    /// Consumer poll granularity.
    pub poll_interval: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_chunk: 64 * 1024,
            max_chunk: 1024 * 1024,
            max_results_per_direction: 1000,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Caller-supplied channels for one search call.
///
/// All fields are optional conveniences except the cancel token, which
/// producers poll between chunks; `ControlEvent::Interrupt` trips it
/// from the consumer side.
#[derive(Default)]
pub struct SearchHooks<'a> {
    /// Resize/interrupt events from the main loop.
    pub control: Option<&'a Receiver<ControlEvent>>,
    /// Early-match and redraw notifications back to the UI.
    pub events: Option<&'a Sender<SearchEvent>>,
    /// Cancellation observed by every producer.
    pub cancel: CancelToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    mtime: SystemTime,
    revision: u64,
}

/// Stored results for one search string.
struct SearchState {
    results: ResultSet,
    stamp: Stamp,
    /// Wrap-once serving order for `next_match`.
    queue: VecDeque<SearchMatch>,
    queue_direction: SearchDirection,
    last_returned: Option<SearchMatch>,
}

/// Search engine for one window: result sets per search string plus the
/// scan machinery.
pub struct SearchEngine {
    window: WindowId,
    config: SearchConfig,
    states: HashMap<String, SearchState>,
    last_scan: Option<ScanKind>,
}

impl SearchEngine {
    /// Engine with default tuning.
    pub fn new(window: WindowId) -> Self {
        Self::with_config(window, SearchConfig::default())
    }

    pub fn with_config(window: WindowId, config: SearchConfig) -> Self {
        Self {
            window,
            config,
            states: HashMap::new(),
            last_scan: None,
        }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    /// What the most recent call did (`None` before the first search).
    pub fn last_scan(&self) -> Option<ScanKind> {
        self.last_scan
    }

    /// Number of stored matches for `needle`.
    pub fn result_count(&self, needle: &str) -> usize {
        self.states.get(needle).map_or(0, |st| st.results.len())
    }

    /// Forget all stored results (e.g. when the window is closed).
    pub fn clear(&mut self) {
        self.states.clear();
        self.last_scan = None;
    }

    /// Search `needle` from `cursor`, preferring matches in `direction`.
    ///
    /// Runs an initial scan, an incremental scan, or no scan at all
    /// depending on what changed since the last search for this needle;
    /// the reported match is the nearest one strictly past the cursor in
    /// the preferred direction, wrapping to the other side when that
    /// side is empty.
    pub fn search(
        &mut self,
        overlay: &Overlay,
        cache: &mut InsertCache,
        needle: &str,
        cursor: VirtualPosition,
        direction: SearchDirection,
        hooks: &SearchHooks<'_>,
    ) -> Result<SearchOutcome, CoreError> {
        if needle.is_empty() {
            self.last_scan = Some(ScanKind::FromCache);
            return Ok(SearchOutcome::Completed(None));
        }

        let stamp = Stamp {
            mtime: overlay.store().last_modified(),
            revision: overlay.revision(),
        };

        enum Plan {
            Serve,
            Incremental,
            Full,
        }
        let plan = match self.states.get(needle) {
            Some(st) if st.stamp == stamp => Plan::Serve,
            Some(st) if st.stamp.mtime == stamp.mtime => Plan::Incremental,
            _ => Plan::Full,
        };

        match plan {
            Plan::Serve => self.last_scan = Some(ScanKind::FromCache),
            Plan::Incremental => {
                if let Some(outcome) =
                    self.incremental_scan(overlay, cache, needle, cursor, direction, stamp, hooks)?
                {
                    return Ok(outcome);
                }
            }
            Plan::Full => {
                if let Some(outcome) =
                    self.initial_scan(overlay, cache, needle, cursor, direction, stamp, hooks)?
                {
                    return Ok(outcome);
                }
            }
        }

        let state = self
            .states
            .get_mut(needle)
            .expect("state exists after scan");
        state
            .results
            .retain(|pos| overlay.is_valid_position(pos) && !overlay.is_deleted(pos));
        state.queue = state.results.serve_order(cursor, direction);
        state.queue_direction = direction;
        let nearest = state.queue.pop_front();
        state.last_returned = nearest;
        Ok(SearchOutcome::Completed(nearest))
    }

    /// The next stored match strictly past the last one returned, in
    /// `direction`. Matches whose positions have since been deleted are
    /// skipped. An exhausted, up-to-date result set yields `None`
    /// without any rescan; a stale one triggers the appropriate scan
    /// first.
    pub fn next_match(
        &mut self,
        overlay: &Overlay,
        cache: &mut InsertCache,
        needle: &str,
        direction: SearchDirection,
        hooks: &SearchHooks<'_>,
    ) -> Result<Option<SearchMatch>, CoreError> {
        let stamp = Stamp {
            mtime: overlay.store().last_modified(),
            revision: overlay.revision(),
        };
        let fresh = self
            .states
            .get(needle)
            .is_some_and(|st| st.stamp == stamp);

        if !fresh {
            let cursor = self
                .states
                .get(needle)
                .and_then(|st| st.last_returned)
                .map(|m| m.position)
                .or_else(|| overlay.first_valid_position())
                .unwrap_or(VirtualPosition::ZERO);
            return Ok(self
                .search(overlay, cache, needle, cursor, direction, hooks)?
                .nearest());
        }

        self.last_scan = Some(ScanKind::FromCache);
        let state = self.states.get_mut(needle).expect("fresh state exists");
        if state.queue_direction != direction {
            let from = state
                .last_returned
                .map(|m| m.position)
                .unwrap_or(VirtualPosition::ZERO);
            state.queue = state.results.serve_order(from, direction);
            state.queue_direction = direction;
        }

        while let Some(m) = state.queue.pop_front() {
            if overlay.is_valid_position(m.position) && !overlay.is_deleted(m.position) {
                state.last_returned = Some(m);
                return Ok(Some(m));
            }
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Scans
    // ------------------------------------------------------------------

    /// Full bidirectional scan. Returns `Some(outcome)` only when the
    /// scan was interrupted (partial results are discarded).
    fn initial_scan(
        &mut self,
        overlay: &Overlay,
        cache: &mut InsertCache,
        needle: &str,
        cursor: VirtualPosition,
        direction: SearchDirection,
        stamp: Stamp,
        hooks: &SearchHooks<'_>,
    ) -> Result<Option<SearchOutcome>, CoreError> {
        let snapshot = overlay.snapshot(cache)?;
        let origin = snapshot.index_at_or_after(cursor);
        let total = snapshot.len();
        let matcher = scan::literal_matcher(needle);
        let overlap = needle.len().saturating_sub(1) as u64;
        let chunking = Chunking {
            initial: self.config.initial_chunk,
            max: self.config.max_chunk,
        };

        vellum_logger::debug(format!(
            "search '{}' in {}: initial scan of {} bytes from index {}",
            needle, self.window, total, origin
        ));

        let mut results = ResultSet::default();
        let (tx, rx) = mpsc::channel();
        let interrupted = thread::scope(|scope| {
            let snap = &snapshot;
            let matcher = &matcher;
            let cancel = &hooks.cancel;

            let tx_fwd = tx.clone();
            scope.spawn(move || {
                scan::scan_ascending(
                    snap, matcher, origin, total, overlap, chunking, cancel, &tx_fwd,
                );
                let _ = tx_fwd.send(ScanMessage::Done(ScanSide::Forward));
            });
            let tx_bwd = tx.clone();
            scope.spawn(move || {
                scan::scan_descending(snap, matcher, 0, origin, overlap, chunking, cancel, &tx_bwd);
                let _ = tx_bwd.send(ScanMessage::Done(ScanSide::Backward));
            });
            drop(tx);

            self.consume(&rx, snap, &mut results, cursor, direction, hooks, 2, true)
        });

        self.last_scan = Some(ScanKind::Initial);
        if interrupted {
            let nearest = results.nearest(cursor, direction);
            self.states.remove(needle);
            vellum_logger::debug(format!("search '{}' interrupted", needle));
            return Ok(Some(SearchOutcome::Interrupted(nearest)));
        }

        let origin_pos = snapshot.position_at(origin).unwrap_or(overlay.end_position());
        results.enforce_caps(origin_pos, self.config.max_results_per_direction);
        self.states.insert(
            needle.to_string(),
            SearchState {
                results,
                stamp,
                queue: VecDeque::new(),
                queue_direction: direction,
                last_returned: None,
            },
        );
        Ok(None)
    }

    /// Secondary scan over the merged, deletion-aware changed regions.
    /// Returns `Some(outcome)` only on interruption (the stored state
    /// keeps its old stamp, so the next call retries).
    fn incremental_scan(
        &mut self,
        overlay: &Overlay,
        cache: &mut InsertCache,
        needle: &str,
        cursor: VirtualPosition,
        direction: SearchDirection,
        stamp: Stamp,
        hooks: &SearchHooks<'_>,
    ) -> Result<Option<SearchOutcome>, CoreError> {
        let snapshot = overlay.snapshot(cache)?;
        let matcher = scan::literal_matcher(needle);
        let overlap = needle.len().saturating_sub(1) as u64;
        let pad = overlap.max(1);
        let chunking = Chunking {
            initial: self.config.initial_chunk,
            max: self.config.max_chunk,
        };

        // Changed regions in logical index space: every pending insertion
        // chunk, plus the seam each deletion leaves behind, widened so
        // matches straddling a region edge are still found.
        let mut regions: Vec<(u64, u64)> = Vec::new();
        for (anchor, _) in overlay.change_entries() {
            let lo = snapshot.index_at_or_after(VirtualPosition::new(anchor, 0));
            let hi = snapshot.index_at_or_after(VirtualPosition::new(anchor + 1, 0));
            regions.push((lo.saturating_sub(pad), (hi + pad).min(snapshot.len())));
        }
        for range in overlay.deletion_ranges() {
            let seam = snapshot.index_at_or_after(range.start);
            regions.push((seam.saturating_sub(pad), (seam + pad).min(snapshot.len())));
        }
        regions.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::new();
        for (lo, hi) in regions {
            match merged.last_mut() {
                Some(last) if lo <= last.1 => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }

        vellum_logger::debug(format!(
            "search '{}' in {}: secondary scan of {} changed regions",
            needle,
            self.window,
            merged.len()
        ));

        let mut fresh = ResultSet::default();
        let (tx, rx) = mpsc::channel();
        let interrupted = thread::scope(|scope| {
            let snap = &snapshot;
            let matcher = &matcher;
            let cancel = &hooks.cancel;
            let regions = &merged;

            let tx_chg = tx.clone();
            scope.spawn(move || {
                scan::scan_regions(snap, matcher, regions, overlap, chunking, cancel, &tx_chg);
                let _ = tx_chg.send(ScanMessage::Done(ScanSide::Changed));
            });
            drop(tx);

            self.consume(&rx, snap, &mut fresh, cursor, direction, hooks, 1, false)
        });

        self.last_scan = Some(ScanKind::Incremental);
        let state = self
            .states
            .get_mut(needle)
            .expect("incremental needs a prior state");
        if interrupted {
            // Keep the old state (and stamp) so the next query retries.
            let nearest = state.results.nearest(cursor, direction);
            return Ok(Some(SearchOutcome::Interrupted(nearest)));
        }

        for m in fresh.serve_order(VirtualPosition::ZERO, SearchDirection::Forward) {
            state.results.insert(m);
        }
        let origin = snapshot.index_at_or_after(cursor);
        let origin_pos = snapshot.position_at(origin).unwrap_or(overlay.end_position());
        state
            .results
            .enforce_caps(origin_pos, self.config.max_results_per_direction);
        state.stamp = stamp;
        Ok(None)
    }

    /// The consumer loop: poll control events, then producer messages,
    /// until every producer reported done. Returns `true` when the scan
    /// was cancelled.
    #[allow(clippy::too_many_arguments)]
    fn consume(
        &self,
        rx: &Receiver<ScanMessage>,
        snapshot: &OverlaySnapshot,
        results: &mut ResultSet,
        cursor: VirtualPosition,
        direction: SearchDirection,
        hooks: &SearchHooks<'_>,
        producers: usize,
        report_early: bool,
    ) -> bool {
        let mut done = 0;
        let mut early_sent = !report_early;

        while done < producers {
            if let Some(control) = hooks.control {
                while let Ok(event) = control.try_recv() {
                    match event {
                        ControlEvent::Resize => {
                            // A resize never cancels the search.
                            if let Some(events) = hooks.events {
                                let _ = events.send(SearchEvent::RedrawRequested);
                            }
                        }
                        ControlEvent::Interrupt => hooks.cancel.cancel(),
                    }
                }
            }

            match rx.recv_timeout(self.config.poll_interval) {
                Ok(ScanMessage::Matches(batch)) => {
                    for (idx, len) in batch {
                        if let Some(position) = snapshot.position_at(idx) {
                            results.insert(SearchMatch { position, len });
                        }
                    }
                    if !early_sent {
                        if let Some(nearest) = results.nearest(cursor, direction) {
                            if let Some(events) = hooks.events {
                                let _ = events.send(SearchEvent::EarlyMatch(nearest));
                            }
                            early_sent = true;
                        }
                    }
                }
                Ok(ScanMessage::Done(_)) => done += 1,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        hooks.cancel.is_cancelled()
    }
}
