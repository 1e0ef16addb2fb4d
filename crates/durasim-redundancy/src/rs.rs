//! Reed-Solomon: the baseline MDS scheme

use durasim_common::ChunkHealth;

use crate::scheme::{RedundancyScheme, SchemeError, check_len, check_nk, check_single, restore};

/// RS(n, k): any `k` surviving chunks reconstruct the stripe.
#[derive(Clone, Copy, Debug)]
pub struct Rs {
    n: usize,
    k: usize,
}

impl Rs {
    pub fn new(n: usize, k: usize) -> Result<Self, SchemeError> {
        check_nk("RS", n, k)?;
        Ok(Self { n, k })
    }
}

impl RedundancyScheme for Rs {
    fn name(&self) -> &'static str {
        "RS"
    }

    fn n(&self) -> usize {
        self.n
    }

    fn k(&self) -> usize {
        self.k
    }

    fn orc(&self) -> f64 {
        self.k as f64
    }

    fn single_repair(&self, state: &mut [ChunkHealth], index: usize) -> Result<f64, SchemeError> {
        check_single(self, state, index)?;
        state[index] = ChunkHealth::Normal;
        Ok(self.k as f64)
    }

    /// One degraded read serves every rebuild: download `k` chunks once,
    /// then fan the decoded repairs out.
    fn parallel_repair(
        &self,
        state: &mut [ChunkHealth],
        only_lost: bool,
    ) -> Result<f64, SchemeError> {
        check_len(self.n, state)?;
        if !self.is_repairable(state) {
            return Err(SchemeError::Unrepairable);
        }
        let repaired = restore(state, only_lost);
        if repaired == 0 {
            Ok(0.0)
        } else {
            Ok((repaired + self.k - 1) as f64)
        }
    }
}
