//! Durasim Engine - the event-driven reliability core
//!
//! The engine drains a stable min-heap of component events over the
//! simulated horizon, driving per-stripe chunk state through failure,
//! latent defect, scrub, eager/lazy recovery and RAFI adaptive rebuild,
//! and accumulates the reliability metrics (PDL, PUA, NOMDL, TRC).
//!
//! Everything is single-threaded: the only concurrency is the simulated
//! wall clock, and ordering between same-time events is fixed by
//! insertion sequence.

pub mod contention;
pub mod event;
pub mod generate;
pub mod handler;
pub mod perturb;
pub mod rafi;
pub mod result;
pub mod schedule;
pub mod simulation;

pub use contention::FifoContention;
pub use event::{Event, EventInfo, EventKind, EventQueue};
pub use handler::EventHandler;
pub use result::{LossCause, SimResult};
pub use schedule::TotalSlicesSchedule;
pub use simulation::Simulation;
