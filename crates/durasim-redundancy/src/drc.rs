//! Double regenerating codes: rack-aware by construction

use durasim_common::{ChunkHealth, available_count};

use crate::scheme::{RedundancyScheme, SchemeError, check_len, check_nk, check_single, restore};

/// DRC(n, k, r): chunks grouped onto `r` racks, with intra-rack
/// aggregation before the cross-rack transfer.
#[derive(Clone, Copy, Debug)]
pub struct Drc {
    n: usize,
    k: usize,
    r: usize,
}

impl Drc {
    pub fn new(n: usize, k: usize, r: usize) -> Result<Self, SchemeError> {
        check_nk("DRC", n, k)?;
        if r == 0 || r > n {
            return Err(SchemeError::InvalidParameters {
                scheme: "DRC".to_string(),
                reason: format!("r={r} must lie in (0, n={n}]"),
            });
        }
        Ok(Self { n, k, r })
    }

    /// Rack group count
    #[must_use]
    pub fn r(&self) -> usize {
        self.r
    }
}

impl RedundancyScheme for Drc {
    fn name(&self) -> &'static str {
        "DRC"
    }

    fn n(&self) -> usize {
        self.n
    }

    fn k(&self) -> usize {
        self.k
    }

    fn orc(&self) -> f64 {
        let r = self.r as f64;
        let kr_over_n = (self.k as f64 * r / self.n as f64).floor();
        (r - 1.0) / (r - kr_over_n)
    }

    fn single_repair(&self, state: &mut [ChunkHealth], index: usize) -> Result<f64, SchemeError> {
        check_single(self, state, index)?;
        let cost = if available_count(state) >= self.n - 1 {
            self.orc()
        } else {
            self.k as f64
        };
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
        let avail = available_count(state);
        let repaired = restore(state, only_lost);
        match repaired {
            0 => Ok(0.0),
            1 if avail >= self.n - 1 => Ok(self.orc()),
            _ => Ok((repaired + self.k - 1) as f64),
        }
    }

    /// DRC is hierarchical by construction; placement flags change nothing.
    fn repair_traffic(&self, _hierarchical: bool, _distinct_racks: usize) -> f64 {
        self.orc()
    }
}
