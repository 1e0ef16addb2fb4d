//! XORBAS: LRC whose parity blocks form one more implied parity group
//!
//! All `l + m1` parity chunks XOR to a recoverable relation, so a single
//! loss anywhere in the combined parity group repairs at optimal cost and
//! closes states plain LRC cannot.

use durasim_common::ChunkHealth;

use crate::Lrc;
use crate::scheme::{RedundancyScheme, SchemeError, check_len, check_single, restore};

/// XORBAS(n, k, l); usually `l + m1 = k/l + 1`.
#[derive(Clone, Copy, Debug)]
pub struct Xorbas {
    inner: Lrc,
}

impl Xorbas {
    pub fn new(n: usize, k: usize, l: usize) -> Result<Self, SchemeError> {
        Ok(Self {
            inner: Lrc::new(n, k, l)?,
        })
    }

    /// Apply the implied-parity closure: a lone loss in the combined
    /// parity group counts as recovered before the LRC test runs.
    fn closed_state(&self, state: &[ChunkHealth]) -> Vec<ChunkHealth> {
        let k = self.inner.k();
        let mut closed = state.to_vec();
        let mut parity_losses = (k..self.inner.n()).filter(|i| !closed[*i].is_available());
        if let (Some(lone), None) = (parity_losses.next(), parity_losses.next()) {
            closed[lone] = ChunkHealth::Normal;
        }
        closed
    }
}

impl RedundancyScheme for Xorbas {
    fn name(&self) -> &'static str {
        "XORBAS"
    }

    fn n(&self) -> usize {
        self.inner.n()
    }

    fn k(&self) -> usize {
        self.inner.k()
    }

    fn is_mds(&self) -> bool {
        false
    }

    fn orc(&self) -> f64 {
        self.inner.orc()
    }

    fn is_repairable(&self, state: &[ChunkHealth]) -> bool {
        state.len() == self.n() && self.inner.solvable(&self.closed_state(state))
    }

    fn single_repair(&self, state: &mut [ChunkHealth], index: usize) -> Result<f64, SchemeError> {
        check_single(self, state, index)?;

        // The parity group as a whole repairs a lone parity loss at ORC.
        let parity_group_losses = (self.k()..self.n())
            .filter(|i| !state[*i].is_available())
            .count();
        let optimal = (index >= self.k() && parity_group_losses <= 1)
            || self.inner.single_repair_cost(state, index) == self.orc();

        state[index] = ChunkHealth::Normal;
        Ok(if optimal { self.orc() } else { self.rc() })
    }

    fn parallel_repair(
        &self,
        state: &mut [ChunkHealth],
        only_lost: bool,
    ) -> Result<f64, SchemeError> {
        check_len(self.n(), state)?;
        if !self.is_repairable(state) {
            return Err(SchemeError::Unrepairable);
        }
        let repaired = restore(state, only_lost);
        match repaired {
            0 => Ok(0.0),
            1 => Ok(self.orc()),
            _ => Ok(self.rc() + repaired as f64 - 1.0),
        }
    }
}
