//! Locally repairable codes with one local parity per group (m0 = 1)

use durasim_common::{ChunkHealth, available_count};

use crate::scheme::{RedundancyScheme, SchemeError, check_len, check_nk, check_single, restore};

/// LRC(n, k, l): `k` data chunks in `l` local groups of `b = k/l`, one
/// local parity per group, and `m1 = n - k - l` global parities.
///
/// State layout: data chunks first, then the `l` local parities in group
/// order, then the global parities.
#[derive(Clone, Copy, Debug)]
pub struct Lrc {
    n: usize,
    k: usize,
    l: usize,
    m1: usize,
}

/// Local parities repair a single in-group loss for free-ish (m0 = 1).
const M0: usize = 1;

impl Lrc {
    pub fn new(n: usize, k: usize, l: usize) -> Result<Self, SchemeError> {
        check_nk("LRC", n, k)?;
        let invalid = |reason: String| SchemeError::InvalidParameters {
            scheme: "LRC".to_string(),
            reason,
        };
        if l == 0 || k % l != 0 {
            return Err(invalid(format!("l={l} must divide k={k}")));
        }
        let m1 = n
            .checked_sub(k + l * M0)
            .ok_or_else(|| invalid(format!("n={n} too small for k={k}, l={l}")))?;
        Ok(Self { n, k, l, m1 })
    }

    pub(crate) fn local_parities(&self) -> usize {
        self.l
    }

    pub(crate) fn global_parities(&self) -> usize {
        self.m1
    }

    /// Data chunks per local group
    fn group_width(&self) -> usize {
        self.k / self.l
    }

    /// Local group of a position, `None` for global parities
    pub(crate) fn group_of(&self, index: usize) -> Option<usize> {
        let b = self.group_width();
        if index < self.k {
            Some(index / b)
        } else if index < self.k + self.l {
            Some(index - self.k)
        } else {
            None
        }
    }

    /// Positions of local group `g`: its data chunks plus its local parity
    fn group_positions(&self, g: usize) -> impl Iterator<Item = usize> {
        let b = self.group_width();
        (g * b..(g + 1) * b).chain(std::iter::once(self.k + g))
    }

    fn group_losses(&self, state: &[ChunkHealth], g: usize) -> usize {
        self.group_positions(g)
            .filter(|i| !state[*i].is_available())
            .count()
    }

    /// Local-then-global solvability.
    ///
    /// Each local group with at most `m0` losses repairs itself; every
    /// group beyond that contributes its losses as unknowns and its local
    /// parity as one usable equation, and the global parities add `m1`
    /// more. Repairable iff the equations cover the unknowns. The local
    /// pass reaches its fixpoint in one sweep because groups are disjoint.
    pub(crate) fn solvable(&self, state: &[ChunkHealth]) -> bool {
        let avail = available_count(state);
        if avail == self.n {
            return true;
        }
        if avail < self.k {
            return false;
        }

        let mut equations = self.m1;
        let mut unknowns = (self.k + self.l..self.n)
            .filter(|i| !state[*i].is_available())
            .count();
        for g in 0..self.l {
            let losses = self.group_losses(state, g);
            if losses > M0 {
                equations += M0;
                unknowns += losses;
            }
        }
        equations >= unknowns
    }

    pub(crate) fn single_repair_cost(&self, state: &[ChunkHealth], index: usize) -> f64 {
        let local = self
            .group_of(index)
            .is_some_and(|g| self.group_losses(state, g) <= M0);
        if local { self.orc() } else { self.rc() }
    }
}

impl RedundancyScheme for Lrc {
    fn name(&self) -> &'static str {
        "LRC"
    }

    fn n(&self) -> usize {
        self.n
    }

    fn k(&self) -> usize {
        self.k
    }

    fn is_mds(&self) -> bool {
        false
    }

    fn orc(&self) -> f64 {
        self.k as f64 / self.l as f64
    }

    fn is_repairable(&self, state: &[ChunkHealth]) -> bool {
        self.solvable(state)
    }

    fn single_repair(&self, state: &mut [ChunkHealth], index: usize) -> Result<f64, SchemeError> {
        check_single(self, state, index)?;
        let cost = self.single_repair_cost(state, index);
        state[index] = ChunkHealth::Normal;
        Ok(cost)
    }

    fn parallel_repair(
        &self,
        state: &mut [ChunkHealth],
        only_lost: bool,
    ) -> Result<f64, SchemeError> {
        check_len(self.n, state)?;
        if !self.is_repairable(state) {
            return Err(SchemeError::Unrepairable);
        }

        let single = state
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_lost() || (!only_lost && **c == ChunkHealth::Crashed))
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let repaired = restore(state, only_lost);
        debug_assert_eq!(repaired, single.len());

        match single.as_slice() {
            [] => Ok(0.0),
            // A lone loss inside a local group localizes; a global parity
            // rebuild always reads k chunks.
            [index] if *index < self.k + self.l => Ok(self.orc()),
            [_] => Ok(self.rc()),
            _ => Ok(self.rc() + repaired as f64 - 1.0),
        }
    }
}
