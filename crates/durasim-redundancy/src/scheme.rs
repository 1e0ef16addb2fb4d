//! The `RedundancyScheme` contract and scheme-string parsing

use durasim_common::{ChunkHealth, Error as CommonError, available_count};
use std::fmt;
use thiserror::Error;

use crate::{Doubler, Drc, Lrc, Msr, Rs, Xorbas};

/// Errors specific to redundancy scheme operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemeError {
    #[error("unknown scheme: {0}")]
    UnknownScheme(String),

    #[error("invalid parameters for {scheme}: {reason}")]
    InvalidParameters { scheme: String, reason: String },

    #[error("state length {got} does not match stripe width {expected}")]
    StateLength { expected: usize, got: usize },

    #[error("state is not repairable")]
    Unrepairable,

    #[error("chunk {index} is not lost")]
    NotLost { index: usize },
}

impl From<SchemeError> for CommonError {
    fn from(e: SchemeError) -> Self {
        match e {
            SchemeError::UnknownScheme(s) => CommonError::InvalidRedundancy {
                scheme: s,
                reason: "unknown scheme".to_string(),
            },
            SchemeError::InvalidParameters { scheme, reason } => {
                CommonError::InvalidRedundancy { scheme, reason }
            }
            other => CommonError::invariant(other.to_string()),
        }
    }
}

/// A data redundancy scheme: a pure function over stripe state.
///
/// A stripe holds `n` chunks of which `k` suffice to reconstruct the data.
/// Repair costs are in chunk-equivalents. `is_repairable` reads the state
/// as-is (only `Normal` chunks can serve reads); callers decide whether
/// `Crashed` chunks should be folded back to `Normal` first when testing
/// durability instead of availability.
pub trait RedundancyScheme: fmt::Debug {
    /// Scheme name as written in configuration strings
    fn name(&self) -> &'static str;

    /// Stripe width
    fn n(&self) -> usize;

    /// Data chunks per stripe
    fn k(&self) -> usize;

    /// Maximum-distance-separable?
    fn is_mds(&self) -> bool {
        true
    }

    /// Normal repair cost: read `k` chunks
    fn rc(&self) -> f64 {
        self.k() as f64
    }

    /// Optimal repair cost for a single failure
    fn orc(&self) -> f64;

    /// Distinct source units a repair stream reads from (`k`, or `d` for
    /// regenerating codes); drives contention-queue sizing
    fn repair_sources(&self) -> usize {
        self.k()
    }

    /// Can this state still serve reads / be rebuilt?
    fn is_repairable(&self, state: &[ChunkHealth]) -> bool {
        available_count(state) >= self.k()
    }

    /// Rebuild the single chunk at `index`, returning the cost.
    ///
    /// The chunk must not be `Normal`; the state must be repairable.
    fn single_repair(&self, state: &mut [ChunkHealth], index: usize) -> Result<f64, SchemeError>;

    /// Rebuild every `Corrupted` and `LatentError` chunk (and `Crashed`
    /// unless `only_lost`), returning the cost. Zero cost if nothing needed
    /// rebuilding.
    fn parallel_repair(
        &self,
        state: &mut [ChunkHealth],
        only_lost: bool,
    ) -> Result<f64, SchemeError>;

    /// Cross-rack traffic per repaired chunk under the given placement
    fn repair_traffic(&self, hierarchical: bool, distinct_racks: usize) -> f64 {
        let _ = (hierarchical, distinct_racks);
        self.orc()
    }
}

/// Verify the state vector matches the stripe width
pub(crate) fn check_len(n: usize, state: &[ChunkHealth]) -> Result<(), SchemeError> {
    if state.len() == n {
        Ok(())
    } else {
        Err(SchemeError::StateLength {
            expected: n,
            got: state.len(),
        })
    }
}

/// Shared single-repair guard: repairable state, lost target
pub(crate) fn check_single(
    scheme: &dyn RedundancyScheme,
    state: &[ChunkHealth],
    index: usize,
) -> Result<(), SchemeError> {
    check_len(scheme.n(), state)?;
    if !scheme.is_repairable(state) {
        return Err(SchemeError::Unrepairable);
    }
    if state[index] == ChunkHealth::Normal {
        return Err(SchemeError::NotLost { index });
    }
    Ok(())
}

/// Rebuild damaged chunks in place, returning how many were repaired
pub(crate) fn restore(state: &mut [ChunkHealth], only_lost: bool) -> usize {
    let mut repaired = 0;
    for chunk in state.iter_mut() {
        let rebuild = chunk.is_lost() || (!only_lost && *chunk == ChunkHealth::Crashed);
        if rebuild {
            *chunk = ChunkHealth::Normal;
            repaired += 1;
        }
    }
    repaired
}

/// Parse a scheme string of the form `SCHEME_p1_p2_…`.
///
/// Examples: `RS_14_10`, `LRC_16_10_2`, `XORBAS_16_10_2`, `MSR_14_10_12`,
/// `DRC_8_6_4`, `DOUBLER_14_10_2`.
pub fn parse_scheme(spec: &str) -> Result<Box<dyn RedundancyScheme>, SchemeError> {
    let mut parts = spec.split('_');
    let name = parts
        .next()
        .ok_or_else(|| SchemeError::UnknownScheme(spec.to_string()))?
        .to_ascii_uppercase();
    let params: Vec<usize> = parts
        .map(|p| {
            p.parse::<usize>().map_err(|_| SchemeError::InvalidParameters {
                scheme: spec.to_string(),
                reason: format!("non-integer parameter `{p}`"),
            })
        })
        .collect::<Result<_, _>>()?;

    let take = |i: usize| -> Result<usize, SchemeError> {
        params
            .get(i)
            .copied()
            .ok_or_else(|| SchemeError::InvalidParameters {
                scheme: spec.to_string(),
                reason: format!("expected at least {} parameters", i + 1),
            })
    };

    match name.as_str() {
        "RS" => Ok(Box::new(Rs::new(take(0)?, take(1)?)?)),
        "LRC" => Ok(Box::new(Lrc::new(take(0)?, take(1)?, take(2)?)?)),
        "XORBAS" => Ok(Box::new(Xorbas::new(take(0)?, take(1)?, take(2)?)?)),
        "MSR" => Ok(Box::new(Msr::new(take(0)?, take(1)?, take(2)?)?)),
        "DRC" => Ok(Box::new(Drc::new(take(0)?, take(1)?, take(2)?)?)),
        "DOUBLER" => Ok(Box::new(Doubler::new(take(0)?, take(1)?, take(2)?)?)),
        _ => Err(SchemeError::UnknownScheme(spec.to_string())),
    }
}

/// Shared `(n, k)` sanity check
pub(crate) fn check_nk(scheme: &str, n: usize, k: usize) -> Result<(), SchemeError> {
    if k == 0 || n == 0 || k >= n {
        return Err(SchemeError::InvalidParameters {
            scheme: scheme.to_string(),
            reason: format!("need 0 < k < n, got n={n} k={k}"),
        });
    }
    Ok(())
}
