//! Durasim Common - Shared types and utilities
//!
//! This crate provides common types, error definitions, and the simulation
//! configuration used across all durasim components.

pub mod config;
pub mod error;
pub mod types;

pub use config::SimConfig;
pub use error::{Error, Result};
pub use types::*;
