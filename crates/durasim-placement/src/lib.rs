//! Durasim Placement - materializing stripes onto disks
//!
//! Three placement families map logical stripes to physical disks:
//!
//! - **SSS** (spread): every stripe picks disks uniformly at random
//! - **PSS** (partitioned): disks are pre-divided into disjoint groups of
//!   `n`; a stripe lands on one whole group
//! - **CopySet**: bounded scatter width `s`; `⌈s/(n-1)⌉` permutations of
//!   copysets. Degenerates to PSS at `s = n-1` and to SSS at
//!   `s = machines-1`
//!
//! The hierarchical overlay constrains each stripe to exactly `r` racks
//! with per-rack quotas differing by at most one. Full disks (and groups
//! containing them) leave the candidate pool; placement fails after 100
//! fruitless retries.

mod copyset;
mod pss;
mod rebalance;
mod sss;

use rand::rngs::StdRng;

use durasim_common::config::{PlacementConfig, PlacementFamily};
use durasim_common::{Error, Result};
use durasim_topology::{NodeId, Topology};

pub use rebalance::rebalance;

/// Retries before a placement attempt is declared failed
pub(crate) const RETRY_LIMIT: u32 = 100;

/// Materialized stripe locations
#[derive(Clone, Debug, Default)]
pub struct Placement {
    /// Per stripe: the `n` disks hosting its chunks; position i is chunk i
    pub stripes: Vec<Vec<NodeId>>,
    /// PSS/CopySet: the candidate groups still accepting stripes
    pub groups: Vec<Vec<NodeId>>,
}

impl Placement {
    /// Chunk position of `disk` within `stripe`, if any
    #[must_use]
    pub fn chunk_index_on(&self, stripe: usize, disk: NodeId) -> Option<usize> {
        self.stripes[stripe].iter().position(|d| *d == disk)
    }
}

/// Per-rack chunk quotas for hierarchical placement
#[derive(Clone, Debug)]
pub struct HierQuota {
    /// Distinct racks per stripe
    pub racks: usize,
    /// Chunks on rack i; quotas differ by at most one and sum to n
    pub quotas: Vec<usize>,
}

impl HierQuota {
    pub fn new(n: usize, racks: usize) -> Result<Self> {
        let base = n / racks;
        if base == 0 {
            return Err(Error::configuration(
                "distinct_racks exceeds stripe width",
            ));
        }
        let mut quotas = vec![base; racks];
        for quota in quotas.iter_mut().take(n % racks) {
            *quota += 1;
        }
        Ok(Self { racks, quotas })
    }
}

/// The configured placement policy
#[derive(Clone, Debug)]
pub struct PlacementEngine {
    family: PlacementFamily,
    n: usize,
    scatter_width: usize,
    hier: Option<HierQuota>,
}

impl PlacementEngine {
    pub fn new(config: &PlacementConfig, n: usize) -> Result<Self> {
        let hier = if config.hierarchical {
            Some(HierQuota::new(n, config.distinct_racks)?)
        } else {
            None
        };
        Ok(Self {
            family: config.data_placement,
            n,
            scatter_width: config.scatter_width,
            hier,
        })
    }

    #[must_use]
    pub fn family(&self) -> PlacementFamily {
        self.family
    }

    #[must_use]
    pub fn hier(&self) -> Option<&HierQuota> {
        self.hier.as_ref()
    }

    /// Place `count` additional stripes, appending to `placement` and
    /// registering each chunk on its disk.
    pub fn place(
        &self,
        topo: &mut Topology,
        placement: &mut Placement,
        count: usize,
        rng: &mut StdRng,
    ) -> Result<()> {
        match self.family {
            PlacementFamily::Sss => match &self.hier {
                None => sss::distribute(self.n, topo, placement, count, rng),
                Some(quota) => sss::distribute_hier(self.n, quota, topo, placement, count, rng),
            },
            PlacementFamily::Pss => {
                if placement.groups.is_empty() {
                    placement.groups = match &self.hier {
                        None => pss::divide_into_groups(self.n, topo, rng)?,
                        Some(quota) => pss::divide_into_groups_hier(self.n, quota, topo, rng)?,
                    };
                }
                pss::distribute(self.n, topo, placement, count, rng)
            }
            PlacementFamily::Copyset => {
                if placement.groups.is_empty() {
                    placement.groups = match &self.hier {
                        None => {
                            copyset::divide_into_copysets(self.n, self.scatter_width, topo, rng)?
                        }
                        Some(quota) => copyset::divide_into_copysets_hier(
                            self.n,
                            self.scatter_width,
                            quota,
                            topo,
                            rng,
                        )?,
                    };
                }
                // Stripe assignment over copysets works exactly like PSS
                // group assignment.
                pss::distribute(self.n, topo, placement, count, rng)
            }
        }
    }
}

/// Register a stripe's chunk on a disk
pub(crate) fn register_chunk(topo: &mut Topology, disk: NodeId, stripe: usize) {
    if let Some(info) = topo.disk_mut(disk) {
        info.stripes.push(stripe);
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use durasim_topology::{DiskInfo, MachineInfo, NodeKind, Topology};

    /// Build a bare topology of `racks × machines × disks` without
    /// generators; placement never samples from them.
    pub fn grid(racks: usize, machines: usize, disks: usize, max_chunks: usize) -> Topology {
        let mut topo = Topology::new();
        let dc = topo.add_node(topo.root(), NodeKind::Datacenter);
        for _ in 0..racks {
            let rack = topo.add_node(dc, NodeKind::Rack);
            for _ in 0..machines {
                let machine = topo.add_node(
                    rack,
                    NodeKind::Machine(MachineInfo {
                        fail_timeout: 0.25,
                        permanent_fraction: 0.0,
                    }),
                );
                for _ in 0..disks {
                    topo.add_node(
                        machine,
                        NodeKind::Disk(DiskInfo {
                            max_chunks,
                            ..DiskInfo::default()
                        }),
                    );
                }
            }
        }
        topo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_hier_quota_split() {
        let q = HierQuota::new(14, 3).unwrap();
        assert_eq!(q.quotas, vec![5, 5, 4]);
        assert_eq!(q.quotas.iter().sum::<usize>(), 14);

        let q = HierQuota::new(9, 3).unwrap();
        assert_eq!(q.quotas, vec![3, 3, 3]);

        assert!(HierQuota::new(4, 5).is_err());
    }

    #[test]
    fn test_copyset_at_minimum_scatter_matches_pss() {
        let n = 6;
        let run = |config: &PlacementConfig| {
            let mut topo = testutil::grid(10, 2, 3, 100);
            let mut placement = Placement::default();
            let engine = PlacementEngine::new(config, n).unwrap();
            let mut rng = StdRng::seed_from_u64(77);
            engine
                .place(&mut topo, &mut placement, 40, &mut rng)
                .unwrap();
            placement.stripes
        };

        let pss = run(&PlacementConfig {
            data_placement: PlacementFamily::Pss,
            ..PlacementConfig::default()
        });
        let copyset = run(&PlacementConfig {
            data_placement: PlacementFamily::Copyset,
            scatter_width: n - 1,
            ..PlacementConfig::default()
        });

        assert_eq!(pss, copyset);
    }
}
