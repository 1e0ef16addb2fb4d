//! Event records and the stable event queue

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use durasim_topology::NodeId;

/// What happened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Failure,
    Recovered,
    LatentDefect,
    LatentRecovered,
    EagerRecoveryStart,
    EagerRecoveryInstallment,
    RafiRecovered,
}

/// Failure/recovery discriminant carried by machine events
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventInfo {
    /// Originated above machine level; classified by the handler
    #[default]
    Unclassified,
    /// Transient outage at or below the fail timeout
    ShortTransient,
    /// Transient outage beyond the fail timeout
    LongTransient,
    /// Destroys the component's chunks
    Permanent,
    /// Re-issued by the contention queue; bypasses requeueing
    QueuedRequeue,
}

impl EventInfo {
    /// Transient outage (chunks crash rather than corrupt)?
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Unclassified | Self::ShortTransient | Self::LongTransient
        )
    }
}

/// Payload of the batched recovery events
#[derive(Clone, Debug)]
pub enum EventPayload {
    /// One eager-recovery installment
    Installment(InstallmentSet),
    /// Stripes listed on a RAFI rebuild
    StripeSet(Vec<usize>),
}

/// Stripes collected into one eager-recovery installment
#[derive(Clone, Debug)]
pub struct InstallmentSet {
    pub stripes: Vec<usize>,
    /// When the machine originally failed
    pub original_failure_time: f64,
    /// When this installment started draining
    pub batch_start: f64,
    /// Set on the final installment: the rate to release
    pub bandwidth_need: Option<f64>,
}

/// A simulation event; a small value record dispatched by tag
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub time: f64,
    pub node: NodeId,
    pub info: EventInfo,
    pub next_recovery_time: Option<f64>,
    /// Pre-cancelled events are dequeued but not handled
    pub ignore: bool,
    pub payload: Option<Box<EventPayload>>,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind, time: f64, node: NodeId) -> Self {
        Self {
            kind,
            time,
            node,
            info: EventInfo::Unclassified,
            next_recovery_time: None,
            ignore: false,
            payload: None,
        }
    }

    #[must_use]
    pub fn with_info(mut self, info: EventInfo) -> Self {
        self.info = info;
        self
    }

    #[must_use]
    pub fn with_recovery(mut self, t: f64) -> Self {
        self.next_recovery_time = Some(t);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Outage length when the paired recovery is known
    #[must_use]
    pub fn outage(&self) -> Option<f64> {
        self.next_recovery_time.map(|r| r - self.time)
    }
}

struct Entry {
    time: f64,
    seq: u64,
    event: Event,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.time.total_cmp(&other.time) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Min-heap of events, stable for equal timestamps.
///
/// Same-time events dequeue in insertion order; that ordering is
/// observable and relied on by the handler.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue, returning the event's insertion sequence
    pub fn push(&mut self, event: Event) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry {
            time: event.time,
            seq,
            event,
        }));
        seq
    }

    /// Remove and return the earliest event with its sequence
    pub fn pop(&mut self) -> Option<(u64, Event)> {
        self.heap.pop().map(|Reverse(entry)| (entry.seq, entry.event))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durasim_topology::Topology;

    fn node() -> NodeId {
        Topology::new().root()
    }

    #[test]
    fn test_orders_by_time() {
        let mut q = EventQueue::new();
        q.push(Event::new(EventKind::Failure, 5.0, node()));
        q.push(Event::new(EventKind::Failure, 1.0, node()));
        q.push(Event::new(EventKind::Failure, 3.0, node()));

        let times: Vec<f64> = std::iter::from_fn(|| q.pop()).map(|(_, e)| e.time).collect();
        assert_eq!(times, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_stable_for_equal_times() {
        let mut q = EventQueue::new();
        let a = q.push(Event::new(EventKind::Failure, 2.0, node()));
        let b = q.push(Event::new(EventKind::Recovered, 2.0, node()));
        let c = q.push(Event::new(EventKind::LatentDefect, 2.0, node()));

        let seqs: Vec<u64> = std::iter::from_fn(|| q.pop()).map(|(s, _)| s).collect();
        assert_eq!(seqs, vec![a, b, c]);
    }

    #[test]
    fn test_interleaved_push_pop() {
        let mut q = EventQueue::new();
        q.push(Event::new(EventKind::Failure, 10.0, node()));
        q.push(Event::new(EventKind::Failure, 1.0, node()));
        assert_eq!(q.pop().unwrap().1.time, 1.0);
        q.push(Event::new(EventKind::Failure, 4.0, node()));
        assert_eq!(q.pop().unwrap().1.time, 4.0);
        assert_eq!(q.pop().unwrap().1.time, 10.0);
        assert!(q.pop().is_none());
    }
}
