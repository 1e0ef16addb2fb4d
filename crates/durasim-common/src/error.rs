//! Error types for durasim
//!
//! This module defines the common error types used throughout the simulator.

use thiserror::Error;

/// Common result type for durasim operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for durasim
#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors (fail fast at startup)
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown placement family: {0}")]
    UnknownPlacement(String),

    #[error("invalid redundancy scheme `{scheme}`: {reason}")]
    InvalidRedundancy { scheme: String, reason: String },

    #[error(
        "insufficient raw capacity: need {required_pib:.3} PiB for stored data, cluster holds {available_pib:.3} PiB"
    )]
    InsufficientCapacity {
        required_pib: f64,
        available_pib: f64,
    },

    // Layout errors
    #[error("layout error: {0}")]
    Layout(String),

    #[error("invalid distribution spec `{0}`")]
    InvalidDistribution(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Placement errors (fatal mid-setup)
    #[error("placement failed for stripe {stripe} after {retries} retries: {reason}")]
    Placement {
        stripe: usize,
        retries: u32,
        reason: String,
    },

    #[error("insufficient racks for placement: have {available}, need {required}")]
    InsufficientRacks { available: usize, required: usize },

    #[error("insufficient disks for placement: have {available}, need {required}")]
    InsufficientDisks { available: usize, required: usize },

    // Simulation invariant violations (abort the run)
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a layout error
    pub fn layout(msg: impl Into<String>) -> Self {
        Self::Layout(msg.into())
    }

    /// Create an invariant-violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Check if this error should abort before the simulation starts
    #[must_use]
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::UnknownPlacement(_)
                | Self::InvalidRedundancy { .. }
                | Self::InsufficientCapacity { .. }
                | Self::Layout(_)
                | Self::InvalidDistribution(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_classification() {
        assert!(Error::configuration("x").is_startup());
        assert!(
            Error::InvalidRedundancy {
                scheme: "RS_1".into(),
                reason: "too few parameters".into()
            }
            .is_startup()
        );
        assert!(!Error::invariant("negative bandwidth").is_startup());
    }

    #[test]
    fn test_display() {
        let e = Error::Placement {
            stripe: 42,
            retries: 100,
            reason: "picked full disk".into(),
        };
        assert!(e.to_string().contains("stripe 42"));
    }
}
