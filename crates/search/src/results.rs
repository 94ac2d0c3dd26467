//! Per-search result bookkeeping.
//!
//! Matches are kept in an ordered map keyed by virtual position, which
//! deduplicates re-discovered matches for free (the secondary scan
//! re-finds matches inside changed regions). The set is capped per
//! direction relative to the scan origin so an absurd needle on a huge
//! document cannot grow without bound: the farthest matches are the
//! ones trimmed, the nearest always survive.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

use vellum_core::VirtualPosition;

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    /// Position of the first matched byte.
    pub position: VirtualPosition,
    /// Match length in bytes.
    pub len: usize,
}

/// Which way a match query walks the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchDirection {
    /// Towards the end of the document (`n` after `/`).
    #[default]
    Forward,
    /// Towards the start of the document (`N`, or `?` searches).
    Backward,
}

impl SearchDirection {
    /// The opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

/// Ordered, deduplicated, capped set of matches for one search string.
#[derive(Debug, Default)]
pub(crate) struct ResultSet {
    matches: BTreeMap<VirtualPosition, usize>,
}

impl ResultSet {
    pub(crate) fn len(&self) -> usize {
        self.matches.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub(crate) fn insert(&mut self, m: SearchMatch) {
        self.matches.insert(m.position, m.len);
    }

    /// Drop matches that no longer survive `keep` (deleted or otherwise
    /// invalidated positions).
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(VirtualPosition) -> bool) {
        self.matches.retain(|&pos, _| keep(pos));
    }

    /// Enforce the per-direction cap around `origin`: at most `cap`
    /// matches at or after it, at most `cap` before it, trimming the
    /// farthest first.
    pub(crate) fn enforce_caps(&mut self, origin: VirtualPosition, cap: usize) {
        loop {
            let after = self.matches.range(origin..).count();
            if after <= cap {
                break;
            }
            let &farthest = self
                .matches
                .range(origin..)
                .next_back()
                .map(|(p, _)| p)
                .expect("non-empty side");
            self.matches.remove(&farthest);
        }
        loop {
            let before = self.matches.range(..origin).count();
            if before <= cap {
                break;
            }
            let &farthest = self
                .matches
                .range(..origin)
                .next()
                .map(|(p, _)| p)
                .expect("non-empty side");
            self.matches.remove(&farthest);
        }
    }

    /// The match the engine should report first for a scan anchored at
    /// `cursor`: the nearest strictly past it in `direction`, else the
    /// nearest on the other side.
    pub(crate) fn nearest(
        &self,
        cursor: VirtualPosition,
        direction: SearchDirection,
    ) -> Option<SearchMatch> {
        self.serve_order(cursor, direction).pop_front()
    }

    /// Full wrap-once serving order for `next_match` queries.
    ///
    /// Forward: everything strictly after `cursor` in document order,
    /// then the remainder from the top of the document. Backward: the
    /// mirror image. A match exactly at `cursor` lands in the wrapped
    /// tail, so repeating a search never reports the cursor's own match
    /// first.
    pub(crate) fn serve_order(
        &self,
        cursor: VirtualPosition,
        direction: SearchDirection,
    ) -> VecDeque<SearchMatch> {
        let to_match = |(&position, &len): (&VirtualPosition, &usize)| SearchMatch { position, len };
        match direction {
            SearchDirection::Forward => self
                .matches
                .range((Bound::Excluded(cursor), Bound::Unbounded))
                .map(to_match)
                .chain(self.matches.range(..=cursor).map(to_match))
                .collect(),
            SearchDirection::Backward => self
                .matches
                .range(..cursor)
                .rev()
                .map(to_match)
                .chain(self.matches.range(cursor..).rev().map(to_match))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(anchor: u64) -> VirtualPosition {
        VirtualPosition::at_store(anchor)
    }

    fn m(anchor: u64) -> SearchMatch {
        SearchMatch {
            position: pos(anchor),
            len: 3,
        }
    }

    fn set(anchors: &[u64]) -> ResultSet {
        let mut s = ResultSet::default();
        for &a in anchors {
            s.insert(m(a));
        }
        s
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(
            SearchDirection::Forward.opposite(),
            SearchDirection::Backward
        );
        assert_eq!(
            SearchDirection::Backward.opposite(),
            SearchDirection::Forward
        );
    }

    #[test]
    fn test_duplicate_inserts_collapse() {
        let mut s = set(&[4]);
        s.insert(m(4));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_forward_serve_order_wraps_once() {
        // Matches at 0, 4, 8 with the cursor on the match at 4.
        let s = set(&[0, 4, 8]);
        let order: Vec<u64> = s
            .serve_order(pos(4), SearchDirection::Forward)
            .into_iter()
            .map(|m| m.position.anchor)
            .collect();
        assert_eq!(order, vec![8, 0, 4]);
    }

    #[test]
    fn test_backward_serve_order_wraps_once() {
        let s = set(&[0, 4, 8]);
        let order: Vec<u64> = s
            .serve_order(pos(4), SearchDirection::Backward)
            .into_iter()
            .map(|m| m.position.anchor)
            .collect();
        assert_eq!(order, vec![0, 8, 4]);
    }

    #[test]
    fn test_caps_trim_farthest_matches() {
        let mut s = set(&[0, 1, 2, 10, 11, 12, 13]);
        s.enforce_caps(pos(10), 2);

        // Before origin 10 keeps 1 and 2 (0 is farthest); at or after
        // keeps 10 and 11 (12 and 13 are farthest).
        let kept: Vec<u64> = s
            .serve_order(pos(0), SearchDirection::Forward)
            .into_iter()
            .map(|m| m.position.anchor)
            .collect();
        assert_eq!(kept, vec![1, 2, 10, 11]);
    }

    #[test]
    fn test_retain_filters_dead_positions() {
        let mut s = set(&[0, 4, 8]);
        s.retain(|p| p.anchor != 4);
        assert_eq!(s.len(), 2);
        assert_eq!(
            s.nearest(pos(0), SearchDirection::Forward).unwrap().position,
            pos(8)
        );
    }
}
