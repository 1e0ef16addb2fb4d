//! DOUBLER: structural MSR variant
//!
//! Parameterized like a regenerating code but repaired through the plain
//! MDS path; kept for layout studies that only need its stripe geometry.

use durasim_common::ChunkHealth;

use crate::scheme::{RedundancyScheme, SchemeError, check_len, check_nk, check_single, restore};

#[derive(Clone, Copy, Debug)]
pub struct Doubler {
    n: usize,
    k: usize,
    r: usize,
}

impl Doubler {
    pub fn new(n: usize, k: usize, r: usize) -> Result<Self, SchemeError> {
        check_nk("DOUBLER", n, k)?;
        if r == 0 {
            return Err(SchemeError::InvalidParameters {
                scheme: "DOUBLER".to_string(),
                reason: "r must be positive".to_string(),
            });
        }
        Ok(Self { n, k, r })
    }

    #[must_use]
    pub fn r(&self) -> usize {
        self.r
    }
}

impl RedundancyScheme for Doubler {
    fn name(&self) -> &'static str {
        "DOUBLER"
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behaves_like_mds() {
        let doubler = Doubler::new(14, 10, 2).unwrap();
        let mut s = vec![ChunkHealth::Normal; 14];
        s[0] = ChunkHealth::Corrupted;
        assert!(doubler.is_repairable(&s));
        assert_eq!(doubler.single_repair(&mut s, 0).unwrap(), 10.0);
    }

    #[test]
    fn test_rejects_zero_r() {
        assert!(Doubler::new(14, 10, 0).is_err());
    }
}
