//! Durasim Topology - cluster hierarchy and stochastic event sources
//!
//! The cluster is a static tree Root → Datacenter → Rack → Machine → Disk.
//! Nodes live in an arena and reference each other by index, which keeps
//! parent lookups cheap inside the simulation hot loop and avoids owning
//! back-references.
//!
//! Every node carries a failure/recovery generator pair; disks additionally
//! carry latent-error and scrub generators plus per-disk stripe bookkeeping.

pub mod arena;
pub mod generators;
pub mod layout;

pub use arena::{DiskInfo, FailureInterval, MachineInfo, Node, NodeId, NodeKind, Topology};
pub use generators::EventGenerator;
pub use layout::{LayoutSpec, build_topology, layout_from_config, load_layout};
