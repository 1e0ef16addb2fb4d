//! Core type definitions for durasim
//!
//! This module defines the fundamental simulation types: per-chunk health
//! states and the stochastic distribution specifications attached to
//! topology components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Health of a single chunk within a stripe.
///
/// A stripe of `n` chunks carries one `ChunkHealth` per position. The
/// durable count is `#Normal + #Crashed`; the available count is `#Normal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkHealth {
    /// Chunk is durable and available
    Normal,
    /// Temporarily unavailable (machine transient failure); durable but not available
    Crashed,
    /// Permanently lost (disk failure or permanent node failure)
    Corrupted,
    /// Undetected corruption on disk; lost until a scrub discovers it
    LatentError,
}

impl ChunkHealth {
    /// Chunk still holds its data somewhere durable
    #[must_use]
    pub fn is_durable(self) -> bool {
        matches!(self, Self::Normal | Self::Crashed)
    }

    /// Chunk can be read right now
    #[must_use]
    pub fn is_available(self) -> bool {
        matches!(self, Self::Normal)
    }

    /// Chunk contents are gone until rebuilt
    #[must_use]
    pub fn is_lost(self) -> bool {
        matches!(self, Self::Corrupted | Self::LatentError)
    }
}

impl fmt::Display for ChunkHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Crashed => "crashed",
            Self::Corrupted => "corrupted",
            Self::LatentError => "latent-error",
        };
        write!(f, "{s}")
    }
}

/// Count of durable chunks in a state vector
#[must_use]
pub fn durable_count(state: &[ChunkHealth]) -> usize {
    state.iter().filter(|c| c.is_durable()).count()
}

/// Count of available chunks in a state vector
#[must_use]
pub fn available_count(state: &[ChunkHealth]) -> usize {
    state.iter().filter(|c| c.is_available()).count()
}

/// Stochastic distribution attached to a topology component.
///
/// Times are in hours. The textual form used in layout files is
/// `weibull(shape, scale[, location])`, `exp(lambda)`,
/// `gamma(shape, scale)` or `constant(value)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DistributionSpec {
    Weibull {
        shape: f64,
        scale: f64,
        #[serde(default)]
        location: f64,
    },
    Exp {
        lambda: f64,
    },
    Gamma {
        shape: f64,
        scale: f64,
    },
    Constant {
        value: f64,
    },
}

impl FromStr for DistributionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, rest) = s
            .split_once('(')
            .ok_or_else(|| Error::InvalidDistribution(s.to_string()))?;
        let args = rest
            .strip_suffix(')')
            .ok_or_else(|| Error::InvalidDistribution(s.to_string()))?;
        let params: Vec<f64> = args
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| Error::InvalidDistribution(s.to_string()))?;

        match (name.trim(), params.as_slice()) {
            ("weibull", [shape, scale]) => Ok(Self::Weibull {
                shape: *shape,
                scale: *scale,
                location: 0.0,
            }),
            ("weibull", [shape, scale, location]) => Ok(Self::Weibull {
                shape: *shape,
                scale: *scale,
                location: *location,
            }),
            ("exp", [lambda]) => Ok(Self::Exp { lambda: *lambda }),
            ("gamma", [shape, scale]) => Ok(Self::Gamma {
                shape: *shape,
                scale: *scale,
            }),
            ("constant", [value]) => Ok(Self::Constant { value: *value }),
            _ => Err(Error::InvalidDistribution(s.to_string())),
        }
    }
}

impl fmt::Display for DistributionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weibull {
                shape,
                scale,
                location,
            } => write!(f, "weibull({shape}, {scale}, {location})"),
            Self::Exp { lambda } => write!(f, "exp({lambda})"),
            Self::Gamma { shape, scale } => write!(f, "gamma({shape}, {scale})"),
            Self::Constant { value } => write!(f, "constant({value})"),
        }
    }
}
