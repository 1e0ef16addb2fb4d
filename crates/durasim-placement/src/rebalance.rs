//! Chunk rebalancing after system scaling
//!
//! When scaling adds disks, machines or racks, load balancing moves a
//! proportional share of existing chunks from the old units onto the new
//! ones within the same parent. Every move transfers one chunk and is
//! charged to total repair cost by the caller.

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tracing::debug;

use durasim_common::{Error, Result};
use durasim_topology::{NodeId, Topology};

use crate::Placement;

/// Move chunks toward units added by a scaling step of the given style.
///
/// `additions` is the number of new units per parent (disks per machine
/// for style 1, machines per rack for style 2, racks for style 3); the
/// new units are the last children of each parent. Returns the number of
/// chunks moved.
pub fn rebalance(
    topo: &mut Topology,
    placement: &mut Placement,
    style: u8,
    additions: usize,
    rng: &mut StdRng,
) -> Result<usize> {
    match style {
        1 => rebalance_level(topo, placement, additions, Level::Disk, rng),
        2 => rebalance_level(topo, placement, additions, Level::Machine, rng),
        3 => rebalance_level(topo, placement, additions, Level::Rack, rng),
        other => Err(Error::configuration(format!(
            "load balancing undefined for scaling style {other}"
        ))),
    }
}

#[derive(Clone, Copy)]
enum Level {
    Disk,
    Machine,
    Rack,
}

fn rebalance_level(
    topo: &mut Topology,
    placement: &mut Placement,
    additions: usize,
    level: Level,
    rng: &mut StdRng,
) -> Result<usize> {
    // (old disks, new disks, divisor) per rebalancing domain
    let domains: Vec<(Vec<NodeId>, Vec<NodeId>, usize)> = match level {
        Level::Disk => topo
            .machines()
            .into_iter()
            .map(|machine| {
                let children = topo.node(machine).children.clone();
                split_units(children, additions)
            })
            .collect::<Result<_>>()?,
        Level::Machine => topo
            .racks()
            .into_iter()
            .map(|rack| {
                let machines = topo.node(rack).children.clone();
                let (old, new, divisor) = split_units(machines, additions)?;
                Ok((
                    old.iter().flat_map(|m| topo.disks_under(*m)).collect(),
                    new.iter().flat_map(|m| topo.disks_under(*m)).collect(),
                    divisor,
                ))
            })
            .collect::<Result<_>>()?,
        Level::Rack => {
            let racks = topo.racks();
            let (old, new, divisor) = split_units(racks, additions)?;
            vec![(
                old.iter().flat_map(|r| topo.disks_under(*r)).collect(),
                new.iter().flat_map(|r| topo.disks_under(*r)).collect(),
                divisor,
            )]
        }
    };

    let mut moved = 0;
    for (old_disks, new_disks, divisor) in domains {
        if new_disks.is_empty() {
            continue;
        }
        for disk in old_disks {
            let hosted = topo.disk(disk).map(|i| i.stripes.clone()).unwrap_or_default();
            let share =
                (hosted.len() as f64 * additions as f64 / divisor as f64).round() as usize;
            let moving: Vec<usize> = hosted.choose_multiple(rng, share).copied().collect();

            for stripe in moving {
                let target = new_disks[rng.random_range(0..new_disks.len())];
                // A stripe never holds two chunks on one disk.
                if placement.stripes[stripe].contains(&target) {
                    continue;
                }
                move_chunk(topo, placement, stripe, disk, target);
                moved += 1;
            }
        }
    }
    debug!(moved, "load balancing finished");
    Ok(moved)
}

/// Split a parent's units into (old, new) plus the proportional divisor
fn split_units(units: Vec<NodeId>, additions: usize) -> Result<(Vec<NodeId>, Vec<NodeId>, usize)> {
    let total = units.len();
    if total <= additions {
        return Err(Error::configuration(format!(
            "cannot rebalance: {additions} additions out of {total} units"
        )));
    }
    let pre = total - additions;
    let old = units[..pre].to_vec();
    let new = units[pre..].to_vec();
    Ok((old, new, total))
}

fn move_chunk(
    topo: &mut Topology,
    placement: &mut Placement,
    stripe: usize,
    from: NodeId,
    to: NodeId,
) {
    if let Some(info) = topo.disk_mut(from) {
        info.stripes.retain(|s| *s != stripe);
        info.lse_stripes.retain(|s| *s != stripe);
    }
    if let Some(info) = topo.disk_mut(to) {
        info.stripes.push(stripe);
    }
    for slot in placement.stripes[stripe].iter_mut() {
        if *slot == from {
            *slot = to;
        }
    }
}
