//! Cross-rack bandwidth contention
//!
//! Repairs re-materialize as requests against per-rack FIFO queues. A
//! request names the racks its repair streams cross, and its effective
//! completion slides to the latest moment its rack set can service it
//! given the requests already in flight.

use std::collections::HashMap;

use durasim_topology::NodeId;

/// FIFO contention model over rack uplinks
#[derive(Clone, Debug, Default)]
pub struct FifoContention {
    /// Per rack: the time its uplink frees up
    busy_until: HashMap<NodeId, f64>,
    queue_count: u64,
    total_wait: f64,
}

impl FifoContention {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `sources` rack uplinks out of `racks` for a repair that
    /// nominally starts at `start` and takes `duration` hours. Returns the
    /// effective completion time.
    pub fn occupy(&mut self, start: f64, racks: &[NodeId], sources: usize, duration: f64) -> f64 {
        let mut frees: Vec<(f64, NodeId)> = racks
            .iter()
            .map(|r| (self.busy_until.get(r).copied().unwrap_or(0.0), *r))
            .collect();
        // Least-loaded uplinks first; ties broken by rack id for
        // reproducibility.
        frees.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        frees.truncate(sources.max(1).min(frees.len().max(1)));

        let ready = frees
            .iter()
            .map(|(free, _)| *free)
            .fold(start, f64::max);
        let end = ready + duration;
        for (_, rack) in &frees {
            self.busy_until.insert(*rack, end);
        }

        if ready > start {
            self.queue_count += 1;
            self.total_wait += ready - start;
        }
        end
    }

    /// (times queued, average queue wait in hours)
    #[must_use]
    pub fn statistics(&self) -> (u64, f64) {
        let avg = if self.queue_count == 0 {
            0.0
        } else {
            self.total_wait / self.queue_count as f64
        };
        (self.queue_count, avg)
    }
}
