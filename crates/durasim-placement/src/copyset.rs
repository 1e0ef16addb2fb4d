//! CopySet placement: bounded scatter width
//!
//! Copysets are built from `⌈s/(n-1)⌉` permutations of the cluster's
//! disks; within a permutation every disk appears in at most one copyset.
//! At `s = n-1` a single permutation reproduces PSS; at
//! `s = machines-1` the copyset population approaches full spread.

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use durasim_common::{Error, Result};
use durasim_topology::{NodeId, Topology};

use crate::HierQuota;

/// Build the copyset population for scatter width `s`.
pub fn divide_into_copysets(
    n: usize,
    s: usize,
    topo: &Topology,
    rng: &mut StdRng,
) -> Result<Vec<Vec<NodeId>>> {
    let total_disks = topo.disks().len();
    let permutations = (s as f64 / (n - 1) as f64).ceil() as usize;
    let per_permutation = total_disks / n;

    let mut copysets = Vec::with_capacity(permutations * per_permutation);
    for _ in 0..permutations {
        permutation(n, per_permutation, topo, rng, &mut copysets, None)?;
    }
    if copysets.is_empty() {
        return Err(Error::InsufficientDisks {
            available: total_disks,
            required: n,
        });
    }
    Ok(copysets)
}

/// Hierarchical copysets: each spans exactly `quota.racks` racks with the
/// per-rack quotas.
pub fn divide_into_copysets_hier(
    n: usize,
    s: usize,
    quota: &HierQuota,
    topo: &Topology,
    rng: &mut StdRng,
) -> Result<Vec<Vec<NodeId>>> {
    let total_disks = topo.disks().len();
    let permutations = (s as f64 / (n - 1) as f64).ceil() as usize;
    let per_permutation = total_disks / n;

    let mut copysets = Vec::with_capacity(permutations * per_permutation);
    for _ in 0..permutations {
        permutation(n, per_permutation, topo, rng, &mut copysets, Some(quota))?;
    }
    if copysets.is_empty() {
        return Err(Error::InsufficientDisks {
            available: total_disks,
            required: n,
        });
    }
    Ok(copysets)
}

/// One permutation pass: form up to `target` copysets, each disk used at
/// most once.
fn permutation(
    n: usize,
    target: usize,
    topo: &Topology,
    rng: &mut StdRng,
    copysets: &mut Vec<Vec<NodeId>>,
    quota: Option<&HierQuota>,
) -> Result<()> {
    // rack -> unused disks within this permutation
    let mut pool: Vec<Vec<NodeId>> = topo
        .disks_by_rack()
        .into_iter()
        .filter(|disks| !disks.is_empty())
        .collect();

    let spread = quota.map_or(n, |q| q.racks);

    for _ in 0..target {
        if pool.len() < spread {
            break;
        }
        let indices: Vec<usize> = (0..pool.len()).collect();
        let mut racks: Vec<usize> = indices.choose_multiple(rng, spread).copied().collect();

        if let Some(q) = quota {
            if racks
                .iter()
                .enumerate()
                .any(|(i, rack)| pool[*rack].len() < q.quotas[i])
            {
                continue;
            }
        }

        let mut copyset = Vec::with_capacity(n);
        // Walk from the highest index so rack removal keeps the rest valid.
        let quotas: Vec<usize> = match quota {
            Some(q) => q.quotas.clone(),
            None => vec![1; spread],
        };
        let mut picks: Vec<(usize, usize)> =
            racks.drain(..).zip(quotas.into_iter()).collect();
        picks.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        for (rack, take) in picks {
            for _ in 0..take {
                let slot = rng.random_range(0..pool[rack].len());
                copyset.push(pool[rack].swap_remove(slot));
            }
            if pool[rack].is_empty() {
                pool.swap_remove(rack);
            }
        }

        if copyset.len() == n {
            copysets.push(copyset);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::grid;
    use rand::SeedableRng;
    use std::collections::{HashMap, HashSet};

    #[test]
    fn test_copysets_have_width_n_on_distinct_racks() {
        let topo = grid(10, 2, 3, 100);
        let mut rng = StdRng::seed_from_u64(17);
        let copysets = divide_into_copysets(6, 10, &topo, &mut rng).unwrap();

        for set in &copysets {
            assert_eq!(set.len(), 6);
            let racks: HashSet<_> = set.iter().map(|d| topo.rack_of(*d).unwrap()).collect();
            assert_eq!(racks.len(), 6);
        }
    }

    #[test]
    fn test_permutation_count_scales_with_scatter_width() {
        let topo = grid(10, 2, 3, 100);
        // 60 disks, n = 6 -> up to 10 copysets per permutation.
        let mut rng = StdRng::seed_from_u64(2);
        let narrow = divide_into_copysets(6, 5, &topo, &mut rng).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let wide = divide_into_copysets(6, 15, &topo, &mut rng).unwrap();

        // s = n-1 is a single permutation (the PSS degenerate case);
        // s = 15 runs ceil(15/5) = 3, whose first pass replays the same
        // draws and whose extra passes add more sets.
        assert!(!narrow.is_empty() && narrow.len() <= 10);
        assert_eq!(wide[..narrow.len()], narrow[..]);
        assert!(wide.len() > narrow.len());
    }

    #[test]
    fn test_disks_unique_within_permutation() {
        let topo = grid(10, 2, 3, 100);
        let mut rng = StdRng::seed_from_u64(4);
        let copysets = divide_into_copysets(6, 5, &topo, &mut rng).unwrap();

        // Single permutation: no disk may repeat anywhere.
        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for set in &copysets {
            for disk in set {
                *counts.entry(*disk).or_default() += 1;
            }
        }
        assert!(counts.values().all(|c| *c == 1));
    }

    #[test]
    fn test_hier_copysets_follow_quota() {
        let topo = grid(10, 2, 3, 100);
        let quota = HierQuota::new(6, 3).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let copysets = divide_into_copysets_hier(6, 10, &quota, &topo, &mut rng).unwrap();

        for set in &copysets {
            assert_eq!(set.len(), 6);
            let mut by_rack: HashMap<NodeId, usize> = HashMap::new();
            for disk in set {
                *by_rack.entry(topo.rack_of(*disk).unwrap()).or_default() += 1;
            }
            assert_eq!(by_rack.len(), 3);
            assert!(by_rack.values().all(|c| *c == 2));
        }
    }
}
