//! Node arena for the cluster tree

use derive_more::Display;

use crate::generators::EventGenerator;

/// Arena index of a topology node
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{_0}")]
pub struct NodeId(u32);

impl NodeId {
    /// Position in the arena
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Level-specific payload of a node
#[derive(Clone, Debug)]
pub enum NodeKind {
    Root,
    Datacenter,
    Rack,
    Machine(MachineInfo),
    Disk(DiskInfo),
}

impl NodeKind {
    /// Level name for logs
    #[must_use]
    pub fn level(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Datacenter => "datacenter",
            Self::Rack => "rack",
            Self::Machine(_) => "machine",
            Self::Disk(_) => "disk",
        }
    }
}

/// Machine-level failure behavior
#[derive(Clone, Copy, Debug)]
pub struct MachineInfo {
    /// Transient outages at or below this length are short (hours)
    pub fail_timeout: f64,
    /// Fraction of failures that destroy the machine
    pub permanent_fraction: f64,
}

/// Disk-level capacity and stripe bookkeeping
#[derive(Clone, Debug, Default)]
pub struct DiskInfo {
    /// Chunk capacity
    pub max_chunks: usize,
    /// Stripes with a chunk on this disk
    pub stripes: Vec<usize>,
    /// Stripes currently hit by an undiscovered latent error here
    pub lse_stripes: Vec<usize>,
}

impl DiskInfo {
    /// Disk cannot take more chunks
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.stripes.len() >= self.max_chunks
    }
}

/// Externally scheduled outage window
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FailureInterval {
    pub start: f64,
    pub end: f64,
    /// Destructive (chunks become Corrupted) vs transient (Crashed)
    pub lost: bool,
}

/// A topology node
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
    pub failure: Option<EventGenerator>,
    pub recovery: Option<EventGenerator>,
    /// Disks only: latent sector error process
    pub latent: Option<EventGenerator>,
    /// Disks only: scrub schedule
    pub scrub: Option<EventGenerator>,
    pub failure_intervals: Vec<FailureInterval>,
    pub last_failure_time: f64,
    pub last_bandwidth_need: f64,
}

/// The cluster tree, arena-allocated
#[derive(Clone, Debug)]
pub struct Topology {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Topology {
    /// Create a topology holding only the root
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            id: NodeId(0),
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Root,
            failure: None,
            recovery: None,
            latent: None,
            scrub: None,
            failure_intervals: Vec::new(),
            last_failure_time: 0.0,
            last_bandwidth_need: 0.0,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a node under `parent`
    pub fn add_node(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            kind,
            failure: None,
            recovery: None,
            latent: None,
            scrub: None,
            failure_intervals: Vec::new(),
            last_failure_time: 0.0,
            last_bandwidth_need: 0.0,
        });
        self.nodes[parent.index()].children.push(id);
        id
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// All nodes in creation order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// All racks in creation order
    pub fn racks(&self) -> Vec<NodeId> {
        self.ids_of(|k| matches!(k, NodeKind::Rack))
    }

    /// All machines in creation order
    pub fn machines(&self) -> Vec<NodeId> {
        self.ids_of(|k| matches!(k, NodeKind::Machine(_)))
    }

    /// All disks in creation order
    pub fn disks(&self) -> Vec<NodeId> {
        self.ids_of(|k| matches!(k, NodeKind::Disk(_)))
    }

    fn ids_of(&self, pred: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| pred(&n.kind))
            .map(|n| n.id)
            .collect()
    }

    /// Disks grouped per rack, rack creation order
    pub fn disks_by_rack(&self) -> Vec<Vec<NodeId>> {
        self.racks()
            .iter()
            .map(|rack| self.disks_under(*rack))
            .collect()
    }

    /// All disks in the subtree rooted at `id`
    pub fn disks_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_disks(id, &mut out);
        out
    }

    fn collect_disks(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let node = self.node(id);
        if matches!(node.kind, NodeKind::Disk(_)) {
            out.push(id);
            return;
        }
        for child in &node.children {
            self.collect_disks(*child, out);
        }
    }

    /// Nearest enclosing rack
    #[must_use]
    pub fn rack_of(&self, id: NodeId) -> Option<NodeId> {
        self.ancestor_of(id, |k| matches!(k, NodeKind::Rack))
    }

    /// Nearest enclosing machine
    #[must_use]
    pub fn machine_of(&self, id: NodeId) -> Option<NodeId> {
        self.ancestor_of(id, |k| matches!(k, NodeKind::Machine(_)))
    }

    fn ancestor_of(&self, id: NodeId, pred: impl Fn(&NodeKind) -> bool) -> Option<NodeId> {
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            let node = self.node(c);
            if pred(&node.kind) {
                return Some(c);
            }
            cursor = node.parent;
        }
        None
    }

    /// Disk payload accessor; `None` for non-disk nodes
    #[must_use]
    pub fn disk(&self, id: NodeId) -> Option<&DiskInfo> {
        match &self.node(id).kind {
            NodeKind::Disk(d) => Some(d),
            _ => None,
        }
    }

    pub fn disk_mut(&mut self, id: NodeId) -> Option<&mut DiskInfo> {
        match &mut self.node_mut(id).kind {
            NodeKind::Disk(d) => Some(d),
            _ => None,
        }
    }

    /// Machine payload accessor; `None` for non-machine nodes
    #[must_use]
    pub fn machine(&self, id: NodeId) -> Option<&MachineInfo> {
        match &self.node(id).kind {
            NodeKind::Machine(m) => Some(m),
            _ => None,
        }
    }

    /// Schedule an outage window on a node
    pub fn add_failure_interval(&mut self, id: NodeId, interval: FailureInterval) {
        self.node_mut(id).failure_intervals.push(interval);
    }

    /// Dotted path for logs, e.g. `root.dc0.rack3.machine2.disk7`
    #[must_use]
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            let node = self.node(c);
            parts.push(format!("{}{}", node.kind.level(), node.id));
            cursor = node.parent;
        }
        parts.reverse();
        parts.join(".")
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_tree() -> (Topology, NodeId, NodeId, NodeId) {
        let mut topo = Topology::new();
        let dc = topo.add_node(topo.root(), NodeKind::Datacenter);
        let rack = topo.add_node(dc, NodeKind::Rack);
        let machine = topo.add_node(
            rack,
            NodeKind::Machine(MachineInfo {
                fail_timeout: 0.25,
                permanent_fraction: 0.01,
            }),
        );
        let disk = topo.add_node(
            machine,
            NodeKind::Disk(DiskInfo {
                max_chunks: 100,
                ..DiskInfo::default()
            }),
        );
        (topo, rack, machine, disk)
    }

    #[test]
    fn test_parent_lookups() {
        let (topo, rack, machine, disk) = tiny_tree();
        assert_eq!(topo.rack_of(disk), Some(rack));
        assert_eq!(topo.machine_of(disk), Some(machine));
        assert_eq!(topo.rack_of(rack), Some(rack));
        assert_eq!(topo.machine_of(rack), None);
    }

    #[test]
    fn test_disks_under() {
        let (mut topo, rack, machine, disk) = tiny_tree();
        let disk2 = topo.add_node(
            machine,
            NodeKind::Disk(DiskInfo {
                max_chunks: 100,
                ..DiskInfo::default()
            }),
        );
        assert_eq!(topo.disks_under(rack), vec![disk, disk2]);
        assert_eq!(topo.disks(), vec![disk, disk2]);
    }

    #[test]
    fn test_disk_capacity() {
        let (mut topo, _, _, disk) = tiny_tree();
        let info = topo.disk_mut(disk).unwrap();
        info.stripes.extend(0..100);
        assert!(info.is_full());
    }
}
