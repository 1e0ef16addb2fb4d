//! Scheduled perturbations
//!
//! Rolling upgrades, correlated failures and system scaling are applied
//! to the topology before the event loop starts: the first two inject
//! outage windows that event generation then honors, the last grows the
//! tree, optionally rebalances chunks, and splices the extra stripes
//! into the population schedule.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tracing::{debug, info};

use durasim_common::config::{
    ComponentKind, CorrelatedFailureSpec, FailureScope, ScalingSpec, UpgradeSpec,
};
use durasim_common::{Error, Result};
use durasim_placement::{Placement, PlacementEngine, rebalance};
use durasim_topology::{DiskInfo, FailureInterval, MachineInfo, NodeId, NodeKind, Topology};

use crate::schedule::TotalSlicesSchedule;

const HOURS_PER_YEAR: f64 = 8760.0;

/// Inject rolling-upgrade downtime windows onto every machine
pub fn apply_upgrades(topo: &mut Topology, specs: &[UpgradeSpec]) {
    for spec in specs {
        let machines = topo.machines();
        for (i, batch) in machines.chunks(spec.concurrence.max(1)).enumerate() {
            let start = spec.start + (spec.downtime + spec.interval) * i as f64;
            for machine in batch {
                topo.add_failure_interval(
                    *machine,
                    FailureInterval {
                        start,
                        end: start + spec.downtime,
                        lost: false,
                    },
                );
            }
        }
        debug!(start = spec.start, "rolling upgrade scheduled");
    }
}

fn components_of(topo: &Topology, kind: ComponentKind) -> Vec<NodeId> {
    match kind {
        ComponentKind::Rack => topo.racks(),
        ComponentKind::Machine => topo.machines(),
        ComponentKind::Disk => topo.disks(),
    }
}

/// Components of `kind` living under any of `parents`
fn components_under(topo: &Topology, parents: &[NodeId], kind: ComponentKind) -> Vec<NodeId> {
    let mut out = Vec::new();
    for parent in parents {
        match kind {
            ComponentKind::Rack => {
                if matches!(topo.node(*parent).kind, NodeKind::Rack) {
                    out.push(*parent);
                }
            }
            ComponentKind::Machine => match topo.node(*parent).kind {
                NodeKind::Machine(_) => out.push(*parent),
                NodeKind::Rack => out.extend(topo.node(*parent).children.iter().copied()),
                _ => {}
            },
            ComponentKind::Disk => out.extend(topo.disks_under(*parent)),
        }
    }
    out
}

fn pick(
    topo: &Topology,
    scope: FailureScope,
    pool: Option<Vec<NodeId>>,
    rng: &mut StdRng,
) -> Result<Vec<NodeId>> {
    let candidates = pool.unwrap_or_else(|| components_of(topo, scope.component));
    if candidates.len() < scope.count {
        return Err(Error::configuration(format!(
            "correlated failure wants {} components, cluster has {}",
            scope.count,
            candidates.len()
        )));
    }
    Ok(candidates
        .choose_multiple(rng, scope.count)
        .copied()
        .collect())
}

/// Inject correlated unavailability (and optional overlapping loss)
/// windows
pub fn apply_correlated_failures(
    topo: &mut Topology,
    specs: &[CorrelatedFailureSpec],
    rng: &mut StdRng,
) -> Result<()> {
    for spec in specs {
        for year in 0..spec.annual_repeats.max(1) {
            let start = spec.occurrence_timestamp + year as f64 * HOURS_PER_YEAR;
            let unavailable = pick(topo, spec.scope, None, rng)?;
            for component in &unavailable {
                topo.add_failure_interval(
                    *component,
                    FailureInterval {
                        start,
                        end: start + spec.downtime,
                        lost: false,
                    },
                );
            }
            info!(
                start,
                count = unavailable.len(),
                component = ?spec.scope.component,
                "correlated unavailability injected"
            );

            let Some(lost) = &spec.lost else {
                continue;
            };
            let pool = lost
                .choose_from_unavailable
                .then(|| components_under(topo, &unavailable, lost.scope.component));
            let destroyed = pick(topo, lost.scope, pool, rng)?;
            for component in destroyed {
                topo.add_failure_interval(
                    component,
                    FailureInterval {
                        start,
                        end: start + lost.downtime,
                        lost: true,
                    },
                );
            }
        }
    }
    Ok(())
}

/// Grow the topology per one scaling step's style
fn grow_topology(topo: &mut Topology, spec: &ScalingSpec) -> Result<()> {
    match spec.style {
        0 => {
            for disk in topo.disks() {
                if let Some(info) = topo.disk_mut(disk) {
                    info.max_chunks += spec.additions;
                }
            }
        }
        1 => {
            for machine in topo.machines() {
                let template = *topo.node(machine).children.first().ok_or_else(|| {
                    Error::configuration("scaling style 1 needs an existing disk to clone")
                })?;
                for _ in 0..spec.additions {
                    clone_disk(topo, machine, template, spec);
                }
            }
        }
        2 => {
            for rack in topo.racks() {
                let template = *topo.node(rack).children.first().ok_or_else(|| {
                    Error::configuration("scaling style 2 needs an existing machine to clone")
                })?;
                for _ in 0..spec.additions {
                    clone_machine(topo, rack, template, spec);
                }
            }
        }
        3 => {
            let racks = topo.racks();
            let template = *racks.first().ok_or_else(|| {
                Error::configuration("scaling style 3 needs an existing rack to clone")
            })?;
            let parent = topo
                .node(template)
                .parent
                .ok_or_else(|| Error::configuration("rack without a datacenter"))?;
            for _ in 0..spec.additions {
                clone_rack(topo, parent, template, spec);
            }
        }
        other => {
            return Err(Error::configuration(format!(
                "unknown scaling style {other}"
            )));
        }
    }
    Ok(())
}

fn clone_disk(topo: &mut Topology, machine: NodeId, template: NodeId, spec: &ScalingSpec) -> NodeId {
    let max_chunks = topo.disk(template).map_or(0, |d| d.max_chunks);
    let src = topo.node(template);
    let (mut failure, mut recovery) = (src.failure.clone(), src.recovery.clone());
    let (latent, scrub) = (src.latent.clone(), src.scrub.clone());
    if let Some((failure_spec, recovery_spec)) = spec.disk_generators {
        // Validated at configuration load; a bad spec cannot reach here.
        failure = durasim_topology::EventGenerator::new(failure_spec).ok().or(failure);
        recovery = durasim_topology::EventGenerator::new(recovery_spec).ok().or(recovery);
    }

    let disk = topo.add_node(
        machine,
        NodeKind::Disk(DiskInfo {
            max_chunks,
            ..DiskInfo::default()
        }),
    );
    let node = topo.node_mut(disk);
    node.failure = failure;
    node.recovery = recovery;
    node.latent = latent;
    node.scrub = scrub;
    disk
}

fn clone_machine(topo: &mut Topology, rack: NodeId, template: NodeId, spec: &ScalingSpec) -> NodeId {
    let info = match &topo.node(template).kind {
        NodeKind::Machine(m) => *m,
        _ => MachineInfo {
            fail_timeout: 0.25,
            permanent_fraction: 0.0,
        },
    };
    let src = topo.node(template);
    let (failure, recovery) = (src.failure.clone(), src.recovery.clone());
    let disk_templates = src.children.clone();

    let machine = topo.add_node(rack, NodeKind::Machine(info));
    let node = topo.node_mut(machine);
    node.failure = failure;
    node.recovery = recovery;
    for disk_template in disk_templates {
        clone_disk(topo, machine, disk_template, spec);
    }
    machine
}

fn clone_rack(topo: &mut Topology, dc: NodeId, template: NodeId, spec: &ScalingSpec) -> NodeId {
    let src = topo.node(template);
    let (failure, recovery) = (src.failure.clone(), src.recovery.clone());
    let machine_templates = src.children.clone();

    let rack = topo.add_node(dc, NodeKind::Rack);
    let node = topo.node_mut(rack);
    node.failure = failure;
    node.recovery = recovery;
    for machine_template in machine_templates {
        clone_machine(topo, rack, machine_template, spec);
    }
    rack
}

/// Apply every scaling step: grow the tree, optionally rebalance, place
/// the added stripes and splice their ramp into the schedule. Returns
/// chunks moved by load balancing (charged to TRC).
pub fn apply_scaling(
    topo: &mut Topology,
    placement: &mut Placement,
    engine: &PlacementEngine,
    schedule: &mut TotalSlicesSchedule,
    specs: &[ScalingSpec],
    rng: &mut StdRng,
) -> Result<usize> {
    let mut moved = 0;
    for spec in specs {
        grow_topology(topo, spec)?;
        if spec.load_balancing && spec.style != 0 {
            moved += rebalance(topo, placement, spec.style, spec.additions, rng)?;
        }
        engine.place(topo, placement, spec.added_slices, rng)?;
        schedule.add_ramp(
            spec.start + spec.slice_join_delay,
            spec.added_slices,
            spec.slice_rate,
        );
        info!(
            start = spec.start,
            style = spec.style,
            added_slices = spec.added_slices,
            "system scaling applied"
        );
    }
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use durasim_common::config::{LostScope, PlacementConfig};
    use rand::SeedableRng;

    fn grid(racks: usize, machines: usize, disks: usize) -> Topology {
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
                            max_chunks: 1000,
                            ..DiskInfo::default()
                        }),
                    );
                }
            }
        }
        topo
    }

    #[test]
    fn test_upgrade_batches_cover_all_machines() {
        let mut topo = grid(2, 4, 1);
        apply_upgrades(
            &mut topo,
            &[UpgradeSpec {
                start: 100.0,
                concurrence: 3,
                interval: 10.0,
                downtime: 2.0,
            }],
        );

        let machines = topo.machines();
        let windows: Vec<&FailureInterval> = machines
            .iter()
            .flat_map(|m| topo.node(*m).failure_intervals.iter())
            .collect();
        assert_eq!(windows.len(), 8);
        assert!(windows.iter().all(|iv| !iv.lost));
        // Batch 0 at 100, batch 1 at 112, batch 2 (remainder) at 124.
        assert_eq!(topo.node(machines[0]).failure_intervals[0].start, 100.0);
        assert_eq!(topo.node(machines[3]).failure_intervals[0].start, 112.0);
        assert_eq!(topo.node(machines[7]).failure_intervals[0].start, 124.0);
    }

    #[test]
    fn test_correlated_failure_injects_lost_overlap() {
        let mut topo = grid(4, 2, 2);
        let mut rng = StdRng::seed_from_u64(5);
        apply_correlated_failures(
            &mut topo,
            &[CorrelatedFailureSpec {
                occurrence_timestamp: 50.0,
                scope: FailureScope {
                    count: 2,
                    component: ComponentKind::Rack,
                },
                downtime: 4.0,
                lost: Some(LostScope {
                    scope: FailureScope {
                        count: 1,
                        component: ComponentKind::Disk,
                    },
                    downtime: 8.0,
                    choose_from_unavailable: true,
                }),
                annual_repeats: 1,
            }],
            &mut rng,
        )
        .unwrap();

        let rack_windows: usize = topo
            .racks()
            .iter()
            .map(|r| topo.node(*r).failure_intervals.len())
            .sum();
        assert_eq!(rack_windows, 2);

        let lost_disks: Vec<NodeId> = topo
            .disks()
            .into_iter()
            .filter(|d| topo.node(*d).failure_intervals.iter().any(|iv| iv.lost))
            .collect();
        assert_eq!(lost_disks.len(), 1);
        // The destroyed disk sits under an unavailable rack.
        let rack = topo.rack_of(lost_disks[0]).unwrap();
        assert!(!topo.node(rack).failure_intervals.is_empty());
    }

    #[test]
    fn test_scaling_style_three_adds_racks() {
        let mut topo = grid(2, 2, 2);
        let mut placement = Placement::default();
        let engine = PlacementEngine::new(&PlacementConfig::default(), 3).unwrap();
        let mut schedule = TotalSlicesSchedule::flat(0, 1000.0);
        let mut rng = StdRng::seed_from_u64(6);

        apply_scaling(
            &mut topo,
            &mut placement,
            &engine,
            &mut schedule,
            &[ScalingSpec {
                start: 100.0,
                style: 3,
                additions: 2,
                added_slices: 10,
                slice_join_delay: 0.0,
                slice_rate: 1.0,
                load_balancing: false,
                disk_generators: None,
            }],
            &mut rng,
        )
        .unwrap();

        assert_eq!(topo.racks().len(), 4);
        assert_eq!(topo.disks().len(), 16);
        assert_eq!(placement.stripes.len(), 10);
        assert_eq!(schedule.final_count(), 10);
        // Cloned racks inherit the tree shape.
        let new_rack = topo.racks()[3];
        assert_eq!(topo.node(new_rack).children.len(), 2);
        assert_eq!(topo.disks_under(new_rack).len(), 4);
    }
}
