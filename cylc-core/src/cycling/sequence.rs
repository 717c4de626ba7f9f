//! A lazy, potentially infinite ordered stream of cycle points, defined by
//! a recurrence step plus optional start/end bounds and exclusions.
//! Sequences are immutable once built.

use crate::cycling::point::{CyclePoint, Duration};

#[derive(Debug, Clone)]
pub struct Sequence {
    start: CyclePoint,
    step: Duration,
    end: Option<CyclePoint>,
    exclusions: Vec<CyclePoint>,
}

impl Sequence {
    pub fn new(start: CyclePoint, step: Duration, end: Option<CyclePoint>) -> Self {
        Self {
            start,
            step,
            end,
            exclusions: Vec::new(),
        }
    }

    pub fn with_exclusions(mut self, exclusions: Vec<CyclePoint>) -> Self {
        self.exclusions = exclusions;
        self
    }

    fn is_excluded(&self, point: &CyclePoint) -> bool {
        self.exclusions.contains(point)
    }

    fn past_end(&self, point: &CyclePoint) -> bool {
        matches!(&self.end, Some(end) if point > end)
    }

    /// The first in-sequence point `>= p`, honoring exclusions (which are
    /// checked *after* a candidate point is proposed, per the graph
    /// expander's tie-break rule).
    pub fn first_on_or_after(&self, p: &CyclePoint) -> Option<CyclePoint> {
        if self.step.is_zero() {
            return if &self.start >= p && !self.is_excluded(&self.start) {
                Some(self.start.clone())
            } else {
                None
            };
        }
        let mut candidate = self.start.clone();
        // Walk forward from `start` in `step` increments. Cycling graphs
        // run for months/years of ticks, not millions, so a linear walk is
        // fine; `first_on_or_after` is only ever called at startup or
        // after a large jump.
        while &candidate < p {
            if self.past_end(&candidate) {
                return None;
            }
            candidate = candidate.add(&self.step);
        }
        loop {
            if self.past_end(&candidate) {
                return None;
            }
            if !self.is_excluded(&candidate) {
                return Some(candidate);
            }
            candidate = candidate.add(&self.step);
        }
    }

    /// The next in-sequence point strictly after `p`.
    pub fn next_after(&self, p: &CyclePoint) -> Option<CyclePoint> {
        if self.step.is_zero() {
            return None;
        }
        let mut candidate = match self.first_on_or_after(p) {
            Some(c) if &c > p => return Some(c),
            Some(c) => c.add(&self.step),
            None => return None,
        };
        loop {
            if self.past_end(&candidate) {
                return None;
            }
            if !self.is_excluded(&candidate) {
                return Some(candidate);
            }
            candidate = candidate.add(&self.step);
        }
    }

    /// The last in-sequence point strictly before `p`.
    pub fn previous_before(&self, p: &CyclePoint) -> Option<CyclePoint> {
        if &self.start >= p {
            return None;
        }
        if self.step.is_zero() {
            return Some(self.start.clone());
        }
        let mut last = None;
        let mut candidate = self.start.clone();
        while &candidate < p {
            if self.past_end(&candidate) {
                break;
            }
            if !self.is_excluded(&candidate) {
                last = Some(candidate.clone());
            }
            candidate = candidate.add(&self.step);
        }
        last
    }

    /// Step forward from `from` by `steps` sequence occurrences (0 returns
    /// `from` itself, clamped to the first in-sequence point on or after it).
    pub fn advance(&self, from: &CyclePoint, steps: u32) -> Option<CyclePoint> {
        let mut point = self.first_on_or_after(from)?;
        for _ in 0..steps {
            point = self.next_after(&point)?;
        }
        Some(point)
    }

    /// Whether `p` is a point this sequence would ever produce.
    pub fn contains(&self, p: &CyclePoint) -> bool {
        if self.is_excluded(p) || p < &self.start || self.past_end(p) {
            return false;
        }
        match self.first_on_or_after(p) {
            Some(candidate) => &candidate == p,
            None => false,
        }
    }
}
