//! Durasim Redundancy - data redundancy scheme family
//!
//! This crate models redundancy schemes as pure functions over stripe
//! state: repairability tests and repair costs in chunk-equivalents. No
//! codec arithmetic happens here; chunks are opaque.
//!
//! # Schemes
//!
//! - **RS**: classic Reed-Solomon, MDS
//! - **LRC**: locally repairable codes with one local parity per group
//! - **XORBAS**: LRC with an implied parity over the combined parity group
//! - **MSR**: minimum-storage regenerating codes, `d` helper nodes
//! - **DRC**: double regenerating codes, rack-aware by construction
//! - **DOUBLER**: MSR-parameterized structural variant
//!
//! # Example
//!
//! ```
//! use durasim_redundancy::parse_scheme;
//! use durasim_common::ChunkHealth;
//!
//! let scheme = parse_scheme("RS_9_6").unwrap();
//! let mut state = vec![ChunkHealth::Normal; 9];
//! state[3] = ChunkHealth::Corrupted;
//! assert!(scheme.is_repairable(&state));
//! assert_eq!(scheme.single_repair(&mut state, 3).unwrap(), 6.0);
//! ```

mod doubler;
mod drc;
mod lrc;
mod msr;
mod rs;
mod scheme;
mod xorbas;

pub use doubler::Doubler;
pub use drc::Drc;
pub use lrc::Lrc;
pub use msr::Msr;
pub use rs::Rs;
pub use scheme::{RedundancyScheme, SchemeError, parse_scheme};
pub use xorbas::Xorbas;
