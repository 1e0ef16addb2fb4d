//! RAFI adaptive recovery overlay
//!
//! Risk-aware failure identification keeps a failure record per degraded
//! stripe and a detection interval per concurrent-failure count
//! (`d_1 >= d_2 >= …`). A stripe enters the RAFI set when the remaining
//! time to natural recovery of *every* current failure exceeds the
//! detection threshold for its failure count; riskier stripes are then
//! rebuilt without waiting for component repair.

use std::collections::HashMap;

/// Transition of a stripe's RAFI membership on a new failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RafiTransition {
    OutToOut,
    OutToIn,
    InToOut,
    InToIn,
}

#[derive(Clone, Debug, Default)]
struct FailureRecord {
    /// Natural recovery times of the current failures
    ends: Vec<f64>,
    in_set: bool,
}

/// Per-run RAFI bookkeeping
#[derive(Clone, Debug)]
pub struct RafiState {
    intervals: Vec<f64>,
    records: HashMap<usize, FailureRecord>,
    /// Latest scheduled rebuild per stripe; stale deliveries are skipped
    pending: HashMap<usize, u64>,
}

impl RafiState {
    #[must_use]
    pub fn new(intervals: Vec<f64>) -> Self {
        Self {
            intervals,
            records: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Detection threshold for a stripe carrying `failures` failures
    #[must_use]
    pub fn detect_interval(&self, failures: usize) -> f64 {
        let slot = failures.clamp(1, self.intervals.len());
        self.intervals[slot - 1]
    }

    /// Record a failure with natural recovery at `end`; returns the
    /// membership transition and the current failure count.
    pub fn on_failure(&mut self, stripe: usize, now: f64, end: f64) -> (RafiTransition, usize) {
        let record = self.records.entry(stripe).or_default();
        record.ends.retain(|e| *e > now);
        record.ends.push(end);

        let failures = record.ends.len();
        let threshold = {
            let slot = failures.clamp(1, self.intervals.len());
            self.intervals[slot - 1]
        };
        let timeout = record.ends.iter().all(|e| e - now >= threshold);

        let transition = match (record.in_set, timeout) {
            (false, false) => RafiTransition::OutToOut,
            (false, true) => RafiTransition::OutToIn,
            (true, false) => RafiTransition::InToOut,
            (true, true) => RafiTransition::InToIn,
        };
        record.in_set = timeout;
        (transition, failures)
    }

    /// A contributing failure recovered naturally. Clears the record once
    /// every listed failure has passed; returns whether it was cleared.
    pub fn on_natural_recovery(&mut self, stripe: usize, now: f64) -> bool {
        let Some(record) = self.records.get(&stripe) else {
            return true;
        };
        if record.ends.iter().any(|e| *e > now) {
            return false;
        }
        self.records.remove(&stripe);
        self.pending.remove(&stripe);
        true
    }

    /// Stripe currently carries a failure record?
    #[must_use]
    pub fn is_tracked(&self, stripe: usize) -> bool {
        self.records.contains_key(&stripe)
    }

    /// Remember the rebuild scheduled for a stripe; supersedes any
    /// earlier pending rebuild.
    pub fn set_pending(&mut self, stripe: usize, seq: u64) {
        self.pending.insert(stripe, seq);
    }

    /// At delivery: claim the stripe if `seq` is still its current
    /// rebuild. Stale (superseded or naturally recovered) deliveries
    /// return false.
    pub fn take_if_current(&mut self, stripe: usize, seq: u64) -> bool {
        if self.pending.get(&stripe) == Some(&seq) {
            self.pending.remove(&stripe);
            self.records.remove(&stripe);
            true
        } else {
            false
        }
    }

    /// Drop all bookkeeping for a stripe (it was rebuilt or lost)
    pub fn clear(&mut self, stripe: usize) {
        self.records.remove(&stripe);
        self.pending.remove(&stripe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_failure_below_threshold_stays_out() {
        // detect_intervals = [1.0, 0.5]; failure recovers naturally at
        // t=0.7, under the one-failure threshold of 1.0.
        let mut rafi = RafiState::new(vec![1.0, 0.5]);
        let (transition, failures) = rafi.on_failure(7, 0.0, 0.7);
        assert_eq!(transition, RafiTransition::OutToOut);
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_second_failure_enters_set() {
        let mut rafi = RafiState::new(vec![1.0, 0.5]);
        rafi.on_failure(7, 0.0, 0.7);
        // Second concurrent failure at t=0.1 recovering at t=0.9: both
        // remaining times (0.6, 0.8) clear the two-failure threshold 0.5,
        // so the rebuild fires at 0.1 + 0.5 = 0.6.
        let (transition, failures) = rafi.on_failure(7, 0.1, 0.9);
        assert_eq!(transition, RafiTransition::OutToIn);
        assert_eq!(failures, 2);
        assert_eq!(0.1 + rafi.detect_interval(failures), 0.6);
    }

    #[test]
    fn test_expired_failures_drop_from_record() {
        let mut rafi = RafiState::new(vec![1.0, 0.5]);
        rafi.on_failure(3, 0.0, 0.7);
        // At t=0.8 the first failure already recovered; only the new one
        // counts.
        let (_, failures) = rafi.on_failure(3, 0.8, 5.0);
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_natural_recovery_clears_when_all_passed() {
        let mut rafi = RafiState::new(vec![1.0, 0.5]);
        rafi.on_failure(3, 0.0, 0.7);
        rafi.on_failure(3, 0.1, 0.9);
        assert!(!rafi.on_natural_recovery(3, 0.75));
        assert!(rafi.is_tracked(3));
        assert!(rafi.on_natural_recovery(3, 0.95));
        assert!(!rafi.is_tracked(3));
    }

    #[test]
    fn test_stale_delivery_is_skipped() {
        let mut rafi = RafiState::new(vec![2.0, 1.0]);
        rafi.on_failure(5, 0.0, 10.0);
        rafi.set_pending(5, 1);
        // Escalation reschedules with a newer sequence.
        rafi.on_failure(5, 0.5, 12.0);
        rafi.set_pending(5, 2);

        assert!(!rafi.take_if_current(5, 1));
        assert!(rafi.take_if_current(5, 2));
        assert!(!rafi.is_tracked(5));
    }
}
