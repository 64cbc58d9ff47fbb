//! Combinatorial track-candidate search.
//!
//! Candidates are built depth-first, one plane at a time in z order. Each hit
//! of the current plane is offered to the [`ExtensionGate`] together with the
//! last non-missing hit of the prefix; accepted hits are pushed and the search
//! descends. Planes without hits are bridged with a missing slot while the
//! missing budget lasts, which is what keeps the otherwise exponential search
//! bounded. A candidate is stored once the last plane is passed and the
//! running count is below the configured maximum.
//!
//! The search performs no deduplication; overlapping candidates are resolved
//! downstream by fit quality.

pub mod policy;

use crate::event::EventHits;
use log::debug;
pub use policy::{
    Extension, ExtensionGate, PairWindow, ResidualWindowGate, ScaledDistanceGate, SearchPolicy,
};

/// A straight line needs two measured points.
const MIN_HITS_PER_CANDIDATE: usize = 2;

/// Flat arena of candidate tuples, `planes` slots per candidate. Slots hold
/// the hit index inside the plane's hit list, `None` for a missing hit.
///
/// The arena is reused across events; [`CandidateSet::reset`] keeps the
/// allocation.
#[derive(Clone, Debug, Default)]
pub struct CandidateSet {
    planes: usize,
    slots: Vec<Option<usize>>,
    truncated: bool,
}

impl CandidateSet {
    pub fn new(planes: usize) -> Self {
        Self {
            planes,
            slots: Vec::new(),
            truncated: false,
        }
    }

    pub fn reset(&mut self, planes: usize) {
        self.planes = planes;
        self.slots.clear();
        self.truncated = false;
    }

    pub fn planes(&self) -> usize {
        self.planes
    }

    pub fn len(&self) -> usize {
        if self.planes == 0 {
            0
        } else {
            self.slots.len() / self.planes
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether the candidate limit cut the search short.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn get(&self, index: usize) -> &[Option<usize>] {
        let start = index * self.planes;
        &self.slots[start..start + self.planes]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Option<usize>]> + '_ {
        self.slots.chunks_exact(self.planes.max(1))
    }

    fn push(&mut self, candidate: &[Option<usize>]) {
        debug_assert_eq!(candidate.len(), self.planes);
        self.slots.extend_from_slice(candidate);
    }

    /// Candidates as `-1`-for-missing index tuples.
    pub fn to_index_tuples(&self) -> Vec<Vec<i64>> {
        self.iter()
            .map(|c| c.iter().map(|s| s.map_or(-1, |i| i as i64)).collect())
            .collect()
    }
}

pub fn missing_hits(candidate: &[Option<usize>]) -> usize {
    candidate.iter().filter(|s| s.is_none()).count()
}

/// Depth-first candidate finder parameterised by an extension rule.
pub struct TrackSearch {
    gate: Box<dyn ExtensionGate>,
    allowed_missing: usize,
    max_candidates: usize,
    prefix: Vec<Option<usize>>,
}

impl TrackSearch {
    pub fn new(gate: Box<dyn ExtensionGate>, allowed_missing: usize, max_candidates: usize) -> Self {
        Self {
            gate,
            allowed_missing,
            max_candidates,
            prefix: Vec::new(),
        }
    }

    pub fn from_policy(policy: &SearchPolicy, allowed_missing: usize, max_candidates: usize) -> Self {
        Self::new(policy.gate(), allowed_missing, max_candidates)
    }

    pub fn allowed_missing(&self) -> usize {
        if self.gate.allows_missing() {
            self.allowed_missing
        } else {
            0
        }
    }

    /// Fills `out` with every candidate of `event`. `out` is reset first.
    pub fn find(&mut self, event: &EventHits, out: &mut CandidateSet) {
        let planes = event.planes.len();
        out.reset(planes);
        if planes == 0 || self.max_candidates == 0 {
            return;
        }
        let mut prefix = std::mem::take(&mut self.prefix);
        prefix.clear();
        prefix.reserve(planes);
        self.extend(event, 0, 0, &mut prefix, out);
        self.prefix = prefix;
        debug!(
            "event {}: {} candidates (hits per plane {:?}{})",
            event.event_number,
            out.len(),
            event.hit_counts(),
            if out.truncated() { ", truncated" } else { "" }
        );
    }

    fn extend(
        &self,
        event: &EventHits,
        plane: usize,
        missing: usize,
        prefix: &mut Vec<Option<usize>>,
        out: &mut CandidateSet,
    ) {
        if out.len() >= self.max_candidates {
            out.truncated = true;
            return;
        }
        if plane == event.planes.len() {
            if prefix.len() - missing >= MIN_HITS_PER_CANDIDATE {
                out.push(prefix);
            }
            return;
        }

        let hits = &event.planes[plane];
        if hits.is_empty() {
            if missing < self.allowed_missing() {
                prefix.push(None);
                self.extend(event, plane + 1, missing + 1, prefix, out);
                prefix.pop();
            }
            return;
        }

        let reference = prefix
            .iter()
            .enumerate()
            .rev()
            .find_map(|(p, slot)| slot.map(|i| (p, &event.planes[p][i])));
        for (idx, hit) in hits.iter().enumerate() {
            let ext = Extension {
                plane,
                hit,
                reference,
                hits_on_plane: hits.len(),
                hits_on_reference: reference.map_or(0, |(p, _)| event.planes[p].len()),
            };
            if !self.gate.accept(&ext) {
                continue;
            }
            prefix.push(Some(idx));
            self.extend(event, plane + 1, missing, prefix, out);
            prefix.pop();
            if out.truncated() {
                return;
            }
        }
    }
}
