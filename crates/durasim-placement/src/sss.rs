//! Spread placement: uniform random disks per stripe

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tracing::warn;

use durasim_common::config::NUM_CHUNKS_DIFF_RACKS;
use durasim_common::{Error, Result};
use durasim_topology::{NodeId, Topology};

use crate::{HierQuota, Placement, RETRY_LIMIT, register_chunk};

/// Place `count` stripes, each on `n` uniformly random disks with at most
/// one chunk per disk and (while `n` stays small) one chunk per rack.
pub fn distribute(
    n: usize,
    topo: &mut Topology,
    placement: &mut Placement,
    count: usize,
    rng: &mut StdRng,
) -> Result<()> {
    let separate_racks = n <= NUM_CHUNKS_DIFF_RACKS;
    // Rack pools of non-full disks, shared across stripes so exhausted
    // disks stay gone.
    let mut pool: Vec<Vec<NodeId>> = topo
        .disks_by_rack()
        .into_iter()
        .map(|disks| {
            disks
                .into_iter()
                .filter(|d| !topo.disk(*d).is_some_and(|i| i.is_full()))
                .collect()
        })
        .collect();

    let start = placement.stripes.len();
    for stripe in start..start + count {
        let mut location = Vec::with_capacity(n);
        let mut candidate_racks: Vec<usize> = (0..pool.len())
            .filter(|r| !pool[*r].is_empty())
            .collect();

        for _ in 0..n {
            pick_disk(
                stripe,
                &mut pool,
                &mut candidate_racks,
                &mut location,
                separate_racks,
                topo,
                rng,
            )?;
        }

        for (i, disk) in location.iter().enumerate() {
            register_chunk(topo, *disk, stripe);
            debug_assert!(!location[..i].contains(disk));
        }
        placement.stripes.push(location);
    }
    Ok(())
}

/// Choose one disk for the next chunk, pruning full disks as they turn up
fn pick_disk(
    stripe: usize,
    pool: &mut [Vec<NodeId>],
    candidate_racks: &mut Vec<usize>,
    location: &mut Vec<NodeId>,
    separate_racks: bool,
    topo: &Topology,
    rng: &mut StdRng,
) -> Result<()> {
    let mut retries = 0;
    let mut full_picks = 0;
    loop {
        retries += 1;
        if retries > RETRY_LIMIT {
            return Err(Error::Placement {
                stripe,
                retries: RETRY_LIMIT,
                reason: format!(
                    "picked a full disk {full_picks} times with {} candidate racks left",
                    candidate_racks.len()
                ),
            });
        }
        if candidate_racks.is_empty() {
            return Err(Error::Placement {
                stripe,
                retries,
                reason: "no candidate racks left".to_string(),
            });
        }
        let slot = rng.random_range(0..candidate_racks.len());
        let rack = candidate_racks[slot];
        let disk_slot = rng.random_range(0..pool[rack].len());
        let disk = pool[rack][disk_slot];

        if topo.disk(disk).is_some_and(|i| i.is_full()) {
            full_picks += 1;
            pool[rack].swap_remove(disk_slot);
            if pool[rack].is_empty() {
                warn!(rack, "rack is completely full");
                candidate_racks.swap_remove(slot);
            }
            continue;
        }
        if !separate_racks && location.contains(&disk) {
            continue;
        }

        if separate_racks {
            candidate_racks.swap_remove(slot);
        }
        location.push(disk);
        return Ok(());
    }
}

/// Hierarchical spread: every stripe spans exactly `quota.racks` racks
/// with the per-rack chunk quotas.
pub fn distribute_hier(
    n: usize,
    quota: &HierQuota,
    topo: &mut Topology,
    placement: &mut Placement,
    count: usize,
    rng: &mut StdRng,
) -> Result<()> {
    // rack -> machine -> non-full disks
    let mut pool: Vec<Vec<Vec<NodeId>>> = topo
        .racks()
        .iter()
        .map(|rack| {
            topo.node(*rack)
                .children
                .iter()
                .map(|machine| {
                    topo.node(*machine)
                        .children
                        .iter()
                        .filter(|d| !topo.disk(**d).is_some_and(|i| i.is_full()))
                        .copied()
                        .collect()
                })
                .collect()
        })
        .collect();

    let start = placement.stripes.len();
    for stripe in start..start + count {
        let rack_ids: Vec<usize> = (0..pool.len())
            .filter(|r| pool[*r].iter().any(|m| !m.is_empty()))
            .collect();
        if rack_ids.len() < quota.racks {
            return Err(Error::InsufficientRacks {
                available: rack_ids.len(),
                required: quota.racks,
            });
        }

        let chosen = select_racks(stripe, quota, &rack_ids, &pool, rng)?;

        let mut location = Vec::with_capacity(n);
        for (i, rack) in chosen.iter().enumerate() {
            let machines: Vec<usize> = (0..pool[*rack].len())
                .filter(|m| !pool[*rack][*m].is_empty())
                .collect();
            let picked: Vec<usize> = machines
                .choose_multiple(rng, quota.quotas[i])
                .copied()
                .collect();
            for machine in picked {
                let disks = &mut pool[*rack][machine];
                let disk_slot = rng.random_range(0..disks.len());
                let disk = disks[disk_slot];
                location.push(disk);
                register_chunk(topo, disk, stripe);
                if topo.disk(disk).is_some_and(|d| d.is_full()) {
                    disks.swap_remove(disk_slot);
                }
            }
        }

        debug_assert_eq!(location.len(), n);
        placement.stripes.push(location);
    }
    Ok(())
}

/// Sample rack sets until one satisfies every per-rack quota
fn select_racks(
    stripe: usize,
    quota: &HierQuota,
    rack_ids: &[usize],
    pool: &[Vec<Vec<NodeId>>],
    rng: &mut StdRng,
) -> Result<Vec<usize>> {
    for _ in 0..=RETRY_LIMIT {
        let chosen: Vec<usize> = rack_ids
            .choose_multiple(rng, quota.racks)
            .copied()
            .collect();
        let fits = chosen.iter().enumerate().all(|(i, rack)| {
            pool[*rack].iter().filter(|m| !m.is_empty()).count() >= quota.quotas[i]
        });
        if fits {
            return Ok(chosen);
        }
    }
    Err(Error::Placement {
        stripe,
        retries: RETRY_LIMIT,
        reason: "no rack set satisfies the per-rack quotas".to_string(),
    })
}
