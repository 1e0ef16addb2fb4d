//! Minimum-storage regenerating codes

use durasim_common::{ChunkHealth, available_count};

use crate::scheme::{RedundancyScheme, SchemeError, check_len, check_nk, check_single, restore};

/// MSR(n, k, d): MDS layout whose single-failure repair reads fractional
/// chunks from `d` helpers instead of `k` whole chunks.
#[derive(Clone, Copy, Debug)]
pub struct Msr {
    n: usize,
    k: usize,
    d: usize,
}

impl Msr {
    pub fn new(n: usize, k: usize, d: usize) -> Result<Self, SchemeError> {
        check_nk("MSR", n, k)?;
        if d < k || d >= n {
            return Err(SchemeError::InvalidParameters {
                scheme: "MSR".to_string(),
                reason: format!("d={d} must lie in [k={k}, n={n})"),
            });
        }
        Ok(Self { n, k, d })
    }

    /// Helper count for regeneration
    #[must_use]
    pub fn d(&self) -> usize {
        self.d
    }
}

impl RedundancyScheme for Msr {
    fn name(&self) -> &'static str {
        "MSR"
    }

    fn n(&self) -> usize {
        self.n
    }

    fn k(&self) -> usize {
        self.k
    }

    fn orc(&self) -> f64 {
        self.d as f64 / (self.d - self.k + 1) as f64
    }

    fn repair_sources(&self) -> usize {
        self.d
    }

    fn single_repair(&self, state: &mut [ChunkHealth], index: usize) -> Result<f64, SchemeError> {
        check_single(self, state, index)?;
        let cost = if available_count(state) >= self.d {
            self.orc()
        } else {
            self.k as f64
        };
        state[index] = ChunkHealth::Normal;
        Ok(cost)
    }

    /// Regeneration cannot batch: the optimal path exists only for a lone
    /// failure with `d` helpers on line.
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
            1 if avail >= self.d => Ok(self.orc()),
            _ => Ok((repaired + self.k - 1) as f64),
        }
    }

    /// Under hierarchical placement over `r` racks, intra-rack reads are
    /// free and only `1 - (n/r - 1)/d` of the regeneration traffic crosses
    /// racks.
    fn repair_traffic(&self, hierarchical: bool, distinct_racks: usize) -> f64 {
        if hierarchical && distinct_racks > 0 {
            let per_rack = self.n as f64 / distinct_racks as f64;
            self.orc() * (1.0 - (per_rack - 1.0) / self.d as f64)
        } else {
            self.orc()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(spec: &[i8]) -> Vec<ChunkHealth> {
        spec.iter()
            .map(|s| match s {
                1 => ChunkHealth::Normal,
                0 => ChunkHealth::Crashed,
                _ => ChunkHealth::Corrupted,
            })
            .collect()
    }

    #[test]
    fn test_parameter_bounds() {
        assert!(Msr::new(14, 10, 12).is_ok());
        assert!(Msr::new(14, 10, 9).is_err());
        assert!(Msr::new(14, 10, 14).is_err());
    }

    #[test]
    fn test_orc() {
        let msr = Msr::new(14, 10, 12).unwrap();
        assert!((msr.orc() - 4.0).abs() < 1e-12); // 12 / 3
        assert_eq!(msr.repair_sources(), 12);
    }

    #[test]
    fn test_single_repair_needs_d_helpers() {
        let msr = Msr::new(14, 10, 12).unwrap();

        let mut s = state(&[1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, 1, 1]);
        assert_eq!(msr.single_repair(&mut s, 11).unwrap(), 4.0);

        // Two failures leave 12 normal... drop one more to dip below d.
        let mut s = state(&[1, 1, 0, 0, 1, 1, 1, 1, 1, 1, 1, -1, 1, 1]);
        assert_eq!(msr.single_repair(&mut s, 11).unwrap(), 10.0);
    }

    #[test]
    fn test_parallel_repair_lone_failure_regenerates() {
        let msr = Msr::new(14, 10, 12).unwrap();
        let mut s = state(&[1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, 1, 1]);
        assert!((msr.parallel_repair(&mut s, true).unwrap() - 4.0).abs() < 1e-12);

        let mut s = state(&[-1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, 1, 1]);
        assert_eq!(msr.parallel_repair(&mut s, true).unwrap(), 11.0);
    }

    #[test]
    fn test_hierarchical_traffic_discount() {
        let msr = Msr::new(14, 10, 12).unwrap();
        assert!((msr.repair_traffic(false, 0) - 4.0).abs() < 1e-12);
        // r = 7 racks: n/r = 2, discount (2-1)/12.
        let expected = 4.0 * (1.0 - 1.0 / 12.0);
        assert!((msr.repair_traffic(true, 7) - expected).abs() < 1e-12);
    }
}
