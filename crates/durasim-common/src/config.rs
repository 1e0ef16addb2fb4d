//! Simulation configuration
//!
//! This module defines the configuration structures for a simulation run,
//! their defaults, validation, and the quantities derived from them
//! (chunks per disk, stripe count, nominal repair times).
//!
//! Sizes follow the conventions of the original reliability studies:
//! `total_active_storage` is in PiB, `chunk_size` in MiB, `disk_capacity`
//! in vendor TB (10^12 bytes), bandwidths in MB/hr, and all times in hours.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::DistributionSpec;

/// Chunks of a stripe land on distinct racks only while `n` stays at or
/// below this bound.
pub const NUM_CHUNKS_DIFF_RACKS: usize = 15;

/// Root configuration for a simulation run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Horizon and seeding
    pub simulation: SimulationConfig,
    /// Cluster sizing and topology counts
    pub cluster: ClusterConfig,
    /// Redundancy scheme selection
    pub redundancy: RedundancyConfig,
    /// Stripe placement policy
    pub placement: PlacementConfig,
    /// Recovery discipline (bandwidth, lazy/eager/RAFI policies)
    pub recovery: RecoveryConfig,
    /// Cross-rack bandwidth contention model
    pub contention: ContentionConfig,
    /// Scheduled perturbations
    pub perturbations: PerturbationConfig,
    /// Metric selection for result emission
    pub output: OutputConfig,
}

/// Horizon and seeding
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Simulation horizon in hours
    pub total_time: f64,
    /// Master RNG seed; iteration i runs with `seed + i`
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            total_time: 87_600.0, // ten years
            seed: 0,
        }
    }
}

/// Cluster sizing and topology counts
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Logical stored data in PiB
    pub total_active_storage: f64,
    /// Chunk size in MiB
    pub chunk_size: u32,
    /// Disk capacity in vendor TB (10^12 bytes)
    pub disk_capacity: f64,
    pub disks_per_machine: usize,
    pub machines_per_rack: usize,
    pub rack_count: usize,
    pub datacenters: usize,
    /// Optional XML layout file overriding the counts above
    pub layout_file: Option<PathBuf>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            total_active_storage: 1.0,
            chunk_size: 256,
            disk_capacity: 4.0,
            disks_per_machine: 10,
            machines_per_rack: 8,
            rack_count: 32,
            datacenters: 1,
            layout_file: None,
        }
    }
}

impl ClusterConfig {
    /// Disk capacity in GiB (vendor TB translated to binary units)
    #[must_use]
    pub fn disk_capacity_gib(&self) -> f64 {
        self.disk_capacity * 1e12 / f64::from(1u32 << 30)
    }

    /// Maximum chunks a disk can hold
    #[must_use]
    pub fn max_chunks_per_disk(&self) -> usize {
        (self.disk_capacity_gib() * 1024.0 / f64::from(self.chunk_size)).floor() as usize
    }

    /// Total disk count across the cluster
    #[must_use]
    pub fn total_disks(&self) -> usize {
        self.rack_count * self.machines_per_rack * self.disks_per_machine
    }

    /// Number of stripes needed to hold `total_active_storage` under a
    /// scheme storing `k` data chunks per stripe.
    #[must_use]
    pub fn total_slices(&self, k: usize) -> usize {
        let storage_mib = self.total_active_storage * f64::from(1u32 << 30);
        (storage_mib / (k as f64 * f64::from(self.chunk_size))).ceil() as usize
    }
}

/// Redundancy scheme selection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RedundancyConfig {
    /// Scheme in `SCHEME_p1_p2_…` form, e.g. `RS_14_10`, `LRC_16_10_2`,
    /// `MSR_14_10_12`
    pub data_redundancy: String,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            data_redundancy: "RS_9_6".to_string(),
        }
    }
}

/// Placement family selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementFamily {
    /// Spread placement: every stripe picks disks uniformly at random
    Sss,
    /// Partitioned placement: disks pre-divided into disjoint groups of n
    Pss,
    /// Bounded-scatter placement parameterized by scatter width
    Copyset,
}

/// Stripe placement policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub data_placement: PlacementFamily,
    /// CopySet scatter width, `n-1 <= s <= machines-1`
    pub scatter_width: usize,
    /// Constrain each stripe to exactly `distinct_racks` racks
    pub hierarchical: bool,
    pub distinct_racks: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            data_placement: PlacementFamily::Sss,
            scatter_width: 0,
            hierarchical: false,
            distinct_racks: 0,
        }
    }
}

/// Recovery discipline
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Cross-rack recovery bandwidth cap in MB/hr
    pub recovery_bandwidth_cross_rack: f64,
    /// Intra-rack recovery bandwidth cap in MB/hr (hierarchical placements)
    pub recovery_bandwidth_intra_rack: f64,
    /// Per-node bandwidth in MB/hr
    pub node_bandwidth: f64,

    /// Rebuild all damaged chunks of a stripe at once instead of one
    pub lazy_recovery: bool,
    /// Chunks-intact threshold at or below which a stripe is rebuilt;
    /// ignored (forced to n-1) unless `lazy_recovery` is set
    pub recovery_threshold: usize,
    /// Under backlog, rebuild only for availability until the degraded
    /// count drains below `max_degraded_slices`
    pub lazy_only_available: bool,
    /// Fraction of stripes allowed to sit degraded before the lazy
    /// threshold snaps back
    pub max_degraded_slices: f64,
    /// Bucket boundaries (hours since failure) for the probabilistic
    /// threshold bump
    pub availability_to_durability_threshold: Vec<f64>,
    /// Per-bucket probability of bumping the threshold
    pub recovery_probability: Vec<f64>,
    /// Count availability events (crashed chunks) toward the threshold
    pub availability_counts_for_recovery: bool,

    /// Use parallel repair for every rebuild
    pub parallel_repair: bool,
    /// Chunks per eager-recovery installment
    pub installment_size: usize,
    /// Speculatively rebuild during long machine transients
    pub eager_recovery: bool,

    /// RAFI detection intervals `d_1..d_{n-k}`; enables RAFI when present
    pub detect_intervals: Option<Vec<f64>>,

    /// Transient outages at or below this length count as short
    pub machine_fail_timeout: f64,
    /// Fraction of machine failures that are permanent
    pub machine_permanent_fraction: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recovery_bandwidth_cross_rack: 128_000.0,
            recovery_bandwidth_intra_rack: 1_280_000.0,
            node_bandwidth: 360_000.0,
            lazy_recovery: false,
            recovery_threshold: 0,
            lazy_only_available: true,
            max_degraded_slices: 0.1,
            availability_to_durability_threshold: vec![0.0, 24.0],
            recovery_probability: vec![0.0, 1.0],
            availability_counts_for_recovery: true,
            parallel_repair: false,
            installment_size: 100,
            eager_recovery: false,
            detect_intervals: None,
            machine_fail_timeout: 0.25,
            machine_permanent_fraction: 0.008,
        }
    }
}

impl RecoveryConfig {
    /// RAFI variant enabled?
    #[must_use]
    pub fn rafi_recovery(&self) -> bool {
        self.detect_intervals.is_some()
    }

    /// Effective base recovery threshold for a scheme of width `n`
    #[must_use]
    pub fn effective_threshold(&self, n: usize) -> usize {
        if self.lazy_recovery {
            self.recovery_threshold
        } else {
            n - 1
        }
    }

    /// Probabilistic lazy-threshold bump.
    ///
    /// `availability_to_durability_threshold` partitions
    /// `time_since_failed` into buckets; the matching
    /// `recovery_probability` entry decides whether the threshold jumps to
    /// `n - 1` for this repair. The bucket index is clamped to the table.
    pub fn available_lazy_threshold<R: Rng>(
        &self,
        n: usize,
        time_since_failed: f64,
        rng: &mut R,
    ) -> usize {
        let base = self.effective_threshold(n);
        let gap = n - 1 - base;
        if gap == 0 || self.recovery_probability.is_empty() {
            return base;
        }

        let bucket = self
            .availability_to_durability_threshold
            .iter()
            .take_while(|b| **b < time_since_failed)
            .count()
            .saturating_sub(1)
            .min(self.recovery_probability.len() - 1);

        if rng.random_range(0.0..1.0) < self.recovery_probability[bucket] {
            base + gap
        } else {
            base
        }
    }
}

/// Bandwidth contention model selector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentionModel {
    #[default]
    Fifo,
}

/// Cross-rack bandwidth contention
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentionConfig {
    /// Skip the contention queue entirely
    pub queue_disable: bool,
    pub bandwidth_contention: ContentionModel,
}

impl Default for ContentionConfig {
    fn default() -> Self {
        Self {
            queue_disable: true,
            bandwidth_contention: ContentionModel::Fifo,
        }
    }
}

/// Component kind targeted by a correlated-failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Rack,
    Machine,
    Disk,
}

/// How many components of which kind an injection hits
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FailureScope {
    pub count: usize,
    pub component: ComponentKind,
}

/// A scheduled correlated failure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelatedFailureSpec {
    /// When the outage starts (hours)
    pub occurrence_timestamp: f64,
    /// Components made unavailable
    pub scope: FailureScope,
    /// Outage length (hours)
    pub downtime: f64,
    /// Optional destructive overlap
    pub lost: Option<LostScope>,
    /// Re-inject the same failure every year this many times
    #[serde(default = "default_annual_repeats")]
    pub annual_repeats: usize,
}

fn default_annual_repeats() -> usize {
    10
}

/// Destructive subset of a correlated failure
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LostScope {
    pub scope: FailureScope,
    pub downtime: f64,
    /// Draw the lost components from the unavailable set instead of
    /// independently
    #[serde(default)]
    pub choose_from_unavailable: bool,
}

/// A scheduled rolling upgrade
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpgradeSpec {
    pub start: f64,
    /// Machines taken down per batch
    pub concurrence: usize,
    /// Gap between batches (hours)
    pub interval: f64,
    /// Per-batch downtime (hours)
    pub downtime: f64,
}

/// A scheduled system-scaling step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScalingSpec {
    pub start: f64,
    /// 0 = grow disks in place, 1 = disks per machine, 2 = machines per
    /// rack, 3 = racks
    pub style: u8,
    /// Units added per style target
    pub additions: usize,
    /// Stripes added on top of the base population
    pub added_slices: usize,
    /// Delay before new stripes start joining (hours)
    pub slice_join_delay: f64,
    /// Stripes joining per hour during the ramp
    pub slice_rate: f64,
    /// Rebalance existing chunks onto the new units (charged to TRC)
    #[serde(default)]
    pub load_balancing: bool,
    /// Failure/recovery overrides for the added disks
    #[serde(default)]
    pub disk_generators: Option<(DistributionSpec, DistributionSpec)>,
}

/// Scheduled perturbations applied before the event loop starts
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerturbationConfig {
    /// Probability that a chunk is flagged pre-corrupt at placement
    pub block_failure: Option<f64>,
    pub system_scaling: Vec<ScalingSpec>,
    pub system_upgrade: Vec<UpgradeSpec>,
    pub correlated_failures: Vec<CorrelatedFailureSpec>,
}

/// Metric selection for result emission
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Metric codes to emit, e.g. `["PDL", "PUA", "TRC", "NOMDL"]`
    pub outputs: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            outputs: vec![
                "PDL".to_string(),
                "PUA".to_string(),
                "TRC".to_string(),
                "NOMDL".to_string(),
            ],
        }
    }
}

/// Nominal repair times derived from bandwidth caps and placement spread
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RepairTimes {
    /// Hours to rebuild one chunk
    pub chunk: f64,
    /// Hours to rebuild one disk
    pub disk: f64,
    /// Hours to rebuild one machine
    pub node: f64,
}

impl SimConfig {
    /// Load a configuration file (TOML)
    pub fn load(path: &Path) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| Error::configuration(e.to_string()))?;
        cfg.try_deserialize()
            .map_err(|e| Error::configuration(e.to_string()))
    }

    /// Validate the configuration against the chosen scheme's `(n, k)`.
    ///
    /// Fails fast on anything the simulation could only discover mid-run.
    pub fn validate(&self, n: usize, k: usize) -> Result<()> {
        if self.simulation.total_time <= 0.0 {
            return Err(Error::configuration("total_time must be positive"));
        }
        if self.cluster.chunk_size == 0 {
            return Err(Error::configuration("chunk_size must be positive"));
        }
        if self.cluster.max_chunks_per_disk() == 0 {
            return Err(Error::configuration(
                "disk_capacity too small for one chunk",
            ));
        }

        let required_pib = self.cluster.total_active_storage * n as f64 / k as f64;
        let available_pib = self.cluster.disk_capacity_gib() * self.cluster.total_disks() as f64
            / f64::from(1u32 << 20);
        if required_pib >= available_pib {
            return Err(Error::InsufficientCapacity {
                required_pib,
                available_pib,
            });
        }

        if self.placement.hierarchical {
            if self.placement.distinct_racks == 0
                || self.placement.distinct_racks > self.cluster.rack_count
            {
                return Err(Error::configuration(format!(
                    "distinct_racks {} out of range for {} racks",
                    self.placement.distinct_racks, self.cluster.rack_count
                )));
            }
            if n / self.placement.distinct_racks == 0 {
                return Err(Error::configuration(
                    "distinct_racks exceeds stripe width",
                ));
            }
        }

        if self.placement.data_placement == PlacementFamily::Copyset {
            let machines = self.cluster.rack_count * self.cluster.machines_per_rack;
            if self.placement.scatter_width < n - 1 || self.placement.scatter_width >= machines {
                return Err(Error::configuration(format!(
                    "scatter_width {} outside [{}, {})",
                    self.placement.scatter_width,
                    n - 1,
                    machines
                )));
            }
        }

        if self.recovery.lazy_recovery && self.recovery.recovery_threshold >= n {
            return Err(Error::configuration(
                "recovery_threshold must stay below stripe width",
            ));
        }
        if let Some(intervals) = &self.recovery.detect_intervals {
            if intervals.len() != n - k {
                return Err(Error::configuration(format!(
                    "detect_intervals must list {} thresholds, got {}",
                    n - k,
                    intervals.len()
                )));
            }
        }
        if self.recovery.recovery_probability.len()
            != self.recovery.availability_to_durability_threshold.len()
        {
            return Err(Error::configuration(
                "recovery_probability and availability_to_durability_threshold must align",
            ));
        }

        Ok(())
    }

    /// Rack spread the repair traffic fans out over
    #[must_use]
    pub fn repair_spread(&self, k: usize) -> usize {
        let racks = self.cluster.rack_count;
        let base = match self.placement.data_placement {
            PlacementFamily::Sss => racks,
            PlacementFamily::Pss => racks.min(k),
            PlacementFamily::Copyset => racks.min(self.placement.scatter_width),
        };
        if self.placement.hierarchical && self.placement.data_placement != PlacementFamily::Sss {
            base.min(self.placement.distinct_racks)
        } else {
            base
        }
    }

    /// Nominal repair times given the scheme's repair traffic ratio
    #[must_use]
    pub fn repair_times(&self, n: usize, k: usize, repair_traffic: f64) -> RepairTimes {
        let spread = self.repair_spread(k) as f64;
        let aggregate = self.recovery.recovery_bandwidth_cross_rack * spread;
        let aggregate_single =
            self.recovery.recovery_bandwidth_cross_rack * spread.min(k as f64);

        let overhead = n as f64 / k as f64;
        let used_disk_mib = overhead * self.cluster.total_active_storage
            * f64::from(1u32 << 30)
            / self.cluster.total_disks() as f64;

        let chunk = repair_traffic * f64::from(self.cluster.chunk_size) / aggregate_single;
        let disk = repair_traffic * used_disk_mib / aggregate;
        RepairTimes {
            chunk,
            disk,
            node: disk * self.cluster.disks_per_machine as f64,
        }
    }
}
