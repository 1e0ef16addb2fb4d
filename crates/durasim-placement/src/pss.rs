//! Partitioned placement: disjoint disk groups of size n

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tracing::warn;

use durasim_common::{Error, Result};
use durasim_topology::{NodeId, Topology};

use crate::{HierQuota, Placement, RETRY_LIMIT, register_chunk};

/// Partition the cluster's disks into disjoint groups of `n`, the `n`
/// disks of each group on `n` distinct racks. Disks left over once fewer
/// than `n` racks still have free disks stay unused.
pub fn divide_into_groups(
    n: usize,
    topo: &Topology,
    rng: &mut StdRng,
) -> Result<Vec<Vec<NodeId>>> {
    let mut pool: Vec<Vec<NodeId>> = topo
        .disks_by_rack()
        .into_iter()
        .filter(|disks| !disks.is_empty())
        .collect();
    if pool.len() < n {
        return Err(Error::InsufficientRacks {
            available: pool.len(),
            required: n,
        });
    }

    let mut groups = Vec::new();
    while pool.len() >= n {
        let chosen: Vec<usize> = (0..pool.len()).collect();
        let mut racks: Vec<usize> = chosen.choose_multiple(rng, n).copied().collect();
        // Remove from the back so earlier indices stay valid.
        racks.sort_unstable_by(|a, b| b.cmp(a));

        let mut group = Vec::with_capacity(n);
        for rack in racks {
            let slot = rng.random_range(0..pool[rack].len());
            group.push(pool[rack].swap_remove(slot));
            if pool[rack].is_empty() {
                pool.swap_remove(rack);
            }
        }
        groups.push(group);
    }
    Ok(groups)
}

/// Hierarchical partitioning: each group spans exactly `quota.racks`
/// racks with the per-rack quotas.
pub fn divide_into_groups_hier(
    n: usize,
    quota: &HierQuota,
    topo: &Topology,
    rng: &mut StdRng,
) -> Result<Vec<Vec<NodeId>>> {
    let mut pool: Vec<Vec<NodeId>> = topo
        .disks_by_rack()
        .into_iter()
        .filter(|disks| !disks.is_empty())
        .collect();

    let mut groups = Vec::new();
    let mut retries = 0;
    while pool.len() >= quota.racks {
        let indices: Vec<usize> = (0..pool.len()).collect();
        let racks: Vec<usize> = indices.choose_multiple(rng, quota.racks).copied().collect();

        if racks
            .iter()
            .enumerate()
            .any(|(i, rack)| pool[*rack].len() < quota.quotas[i])
        {
            retries += 1;
            if retries > RETRY_LIMIT {
                // The leftovers cannot satisfy the quotas; stop with what
                // we have rather than spin forever.
                break;
            }
            continue;
        }

        let mut group = Vec::with_capacity(n);
        for (i, rack) in racks.iter().enumerate() {
            for _ in 0..quota.quotas[i] {
                let slot = rng.random_range(0..pool[*rack].len());
                group.push(pool[*rack].swap_remove(slot));
            }
        }
        // Drop exhausted racks, highest index first.
        let mut emptied: Vec<usize> = racks
            .into_iter()
            .filter(|rack| pool[*rack].is_empty())
            .collect();
        emptied.sort_unstable_by(|a, b| b.cmp(a));
        for rack in emptied {
            pool.swap_remove(rack);
        }

        groups.push(group);
    }

    if groups.is_empty() {
        return Err(Error::InsufficientRacks {
            available: pool.len(),
            required: quota.racks,
        });
    }
    Ok(groups)
}

/// Assign each stripe to a uniformly random candidate group. A group
/// whose disks hit capacity leaves the pool.
pub fn distribute(
    n: usize,
    topo: &mut Topology,
    placement: &mut Placement,
    count: usize,
    rng: &mut StdRng,
) -> Result<()> {
    let start = placement.stripes.len();
    for stripe in start..start + count {
        let mut retries = 0;
        let group = loop {
            retries += 1;
            if placement.groups.is_empty() || retries > RETRY_LIMIT {
                return Err(Error::Placement {
                    stripe,
                    retries,
                    reason: format!("{} candidate groups left", placement.groups.len()),
                });
            }
            let slot = rng.random_range(0..placement.groups.len());
            let full = placement.groups[slot]
                .iter()
                .any(|d| topo.disk(*d).is_some_and(|i| i.is_full()));
            if full {
                warn!(group = slot, "group is completely full, removing from pool");
                placement.groups.swap_remove(slot);
                continue;
            }
            break placement.groups[slot].clone();
        };

        debug_assert_eq!(group.len(), n);
        for disk in &group {
            register_chunk(topo, *disk, stripe);
        }
        placement.stripes.push(group);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::grid;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_groups_are_disjoint_and_rack_distinct() {
        let topo = grid(12, 2, 4, 100);
        let mut rng = StdRng::seed_from_u64(3);
        let groups = divide_into_groups(6, &topo, &mut rng).unwrap();

        let mut seen = HashSet::new();
        for group in &groups {
            assert_eq!(group.len(), 6);
            for disk in group {
                assert!(seen.insert(*disk), "groups must not share disks");
            }
            let racks: HashSet<_> = group.iter().map(|d| topo.rack_of(*d).unwrap()).collect();
            assert_eq!(racks.len(), 6);
        }
    }

    #[test]
    fn test_stripe_lands_on_whole_group() {
        let mut topo = grid(12, 2, 4, 100);
        let mut rng = StdRng::seed_from_u64(3);
        let mut placement = Placement {
            groups: divide_into_groups(6, &topo, &mut rng).unwrap(),
            ..Placement::default()
        };
        let groups: HashSet<Vec<_>> = placement.groups.iter().cloned().collect();
        distribute(6, &mut topo, &mut placement, 25, &mut rng).unwrap();

        for stripe in &placement.stripes {
            assert!(groups.contains(stripe));
        }
    }

    #[test]
    fn test_full_group_leaves_pool() {
        let mut topo = grid(6, 1, 1, 2);
        let mut rng = StdRng::seed_from_u64(8);
        let mut placement = Placement {
            groups: divide_into_groups(6, &topo, &mut rng).unwrap(),
            ..Placement::default()
        };
        assert_eq!(placement.groups.len(), 1);
        // Capacity 2 per disk: two stripes fit, the third must fail.
        distribute(6, &mut topo, &mut placement, 2, &mut rng).unwrap();
        assert!(distribute(6, &mut topo, &mut placement, 1, &mut rng).is_err());
        assert!(placement.groups.is_empty());
    }

    #[test]
    fn test_hier_groups_follow_quota() {
        let topo = grid(9, 2, 4, 100);
        let quota = HierQuota::new(8, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let groups = divide_into_groups_hier(8, &quota, &topo, &mut rng).unwrap();

        for group in &groups {
            assert_eq!(group.len(), 8);
            let racks: HashSet<_> = group.iter().map(|d| topo.rack_of(*d).unwrap()).collect();
            assert_eq!(racks.len(), 4);
        }
    }
}
