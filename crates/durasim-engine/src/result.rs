//! Result accumulators and the per-iteration result record
//!
//! The result is a plain value owned by the handler and snapshotted at
//! the end of the run; nothing here is process-global.

use std::collections::{BTreeMap, HashSet};

use durasim_topology::NodeId;

/// Which component class destroyed a stripe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossCause {
    /// Latent sector error discovered the loss
    Lse,
    /// Disk failure
    Disk,
    /// Permanent machine failure
    Machine,
}

/// One stripe loss
#[derive(Clone, Debug)]
pub struct UndurableInfo {
    pub stripe: usize,
    pub time: f64,
    pub cause: LossCause,
    pub component: NodeId,
}

/// Event and repair tallies kept during a run
#[derive(Clone, Debug, Default)]
pub struct Counters {
    pub latent_failures: u64,
    pub scrubs: u64,
    pub scrub_repairs: u64,
    pub disk_failures: u64,
    pub disk_repairs: u64,
    pub machine_failures: u64,
    pub machine_repairs: u64,
    pub perm_machine_failures: u64,
    pub short_temp_machine_failures: u64,
    pub long_temp_machine_failures: u64,
    pub machine_failures_from_rack: u64,
    pub eager_machine_repairs: u64,
    pub eager_slice_repairs: u64,
    pub skipped_latent: u64,
    pub incomplete_recovery_attempts: u64,
    pub anomalous_available: u64,
    pub repairs: u64,
    pub optimal_repairs: u64,
    pub events_handled: u64,
}

/// Per-iteration result record
#[derive(Clone, Debug)]
pub struct SimResult {
    /// Stripes permanently lost
    pub undurable_count: u64,
    /// Times a stripe crossed into unavailability
    pub unavailable_count: u64,
    /// Loss records with cause attribution
    pub undurable_infos: Vec<UndurableInfo>,
    /// Per stripe: closed unavailability windows
    pub unavailable_durations: BTreeMap<usize, Vec<(f64, f64)>>,

    /// Probability of data loss
    pub pdl: f64,
    /// Probability of unavailability (time-weighted)
    pub pua: f64,
    /// Normalized magnitude of data loss, bytes lost per TiB stored
    pub nomdl: f64,
    /// Total repair cost in MiB transferred
    pub total_repair_transfers: f64,
    /// Peak instantaneous recovery bandwidth, MB/hr
    pub max_recovery_bandwidth: f64,

    pub queue_times: u64,
    pub avg_queue_time: f64,

    pub counters: Counters,
}

impl SimResult {
    /// Loss breakdown: (by LSE, by disk, by machine, distinct disks
    /// causing loss, distinct machines causing loss)
    #[must_use]
    pub fn undurable_details(&self) -> (u64, u64, u64, usize, usize) {
        let mut by_lse = 0;
        let mut by_disk = 0;
        let mut by_machine = 0;
        let mut disks: HashSet<NodeId> = HashSet::new();
        let mut machines: HashSet<NodeId> = HashSet::new();

        for info in &self.undurable_infos {
            match info.cause {
                LossCause::Lse => by_lse += 1,
                LossCause::Disk => {
                    by_disk += 1;
                    disks.insert(info.component);
                }
                LossCause::Machine => {
                    by_machine += 1;
                    machines.insert(info.component);
                }
            }
        }
        (by_lse, by_disk, by_machine, disks.len(), machines.len())
    }

    /// Total repair cost in TiB
    #[must_use]
    pub fn total_repair_transfers_tib(&self) -> f64 {
        self.total_repair_transfers / f64::from(1u32 << 20)
    }

    /// One CSV row:
    /// `PDL, PUA, TRC, NOMDL, by_LSE, by_disk, by_node, #disks, #nodes,
    /// queue_times*avg_queue_time`
    #[must_use]
    pub fn csv_row(&self) -> String {
        let (by_lse, by_disk, by_machine, disks, machines) = self.undurable_details();
        format!(
            "{:.4e},{:.4e},{:.4e},{:.4e},{by_lse},{by_disk},{by_machine},{disks},{machines},{}*{:.4}",
            self.pdl,
            self.pua,
            self.total_repair_transfers_tib(),
            self.nomdl,
            self.queue_times,
            self.avg_queue_time,
        )
    }

    /// Human-oriented one-liner for the log
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "unavailable={} undurable={} PDL={:.4e} PUA={:.4e} TRC={:.4e}TiB NOMDL={:.4e} queue={}*{:.4}h",
            self.unavailable_count,
            self.undurable_count,
            self.pdl,
            self.pua,
            self.total_repair_transfers_tib(),
            self.nomdl,
            self.queue_times,
            self.avg_queue_time,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durasim_topology::Topology;

    fn result_with(infos: Vec<UndurableInfo>) -> SimResult {
        SimResult {
            undurable_count: infos.len() as u64,
            unavailable_count: 0,
            undurable_infos: infos,
            unavailable_durations: BTreeMap::new(),
            pdl: 0.0,
            pua: 0.0,
            nomdl: 0.0,
            total_repair_transfers: 0.0,
            max_recovery_bandwidth: 0.0,
            queue_times: 0,
            avg_queue_time: 0.0,
            counters: Counters::default(),
        }
    }

    #[test]
    fn test_undurable_details_dedup_components() {
        let node = Topology::new().root();
        let infos = vec![
            UndurableInfo {
                stripe: 1,
                time: 10.0,
                cause: LossCause::Disk,
                component: node,
            },
            UndurableInfo {
                stripe: 2,
                time: 11.0,
                cause: LossCause::Disk,
                component: node,
            },
            UndurableInfo {
                stripe: 3,
                time: 12.0,
                cause: LossCause::Lse,
                component: node,
            },
        ];
        let result = result_with(infos);
        assert_eq!(result.undurable_details(), (1, 2, 0, 1, 0));
    }

    #[test]
    fn test_csv_row_shape() {
        let result = result_with(Vec::new());
        let row = result.csv_row();
        assert_eq!(row.split(',').count(), 10);
        assert!(row.ends_with("0*0.0000"));
    }
}
