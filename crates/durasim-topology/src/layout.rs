//! Cluster layout loading
//!
//! A layout describes the tree shape and the per-level event
//! distributions. It comes either from an XML file or is synthesized from
//! the counts in the simulation configuration.
//!
//! ```xml
//! <layout>
//!   <datacenter count="1">
//!     <rack count="32" failure="exp(0.00001142)" recovery="weibull(1.0, 24)">
//!       <machine count="8" failure="weibull(1.0, 8760)" recovery="weibull(1.0, 0.5)"
//!                fail_timeout="0.25" permanent_fraction="0.008">
//!         <disk count="10" failure="weibull(1.12, 10302, 6)" recovery="weibull(2.0, 12, 6)"
//!               latent="weibull(1.0, 9259)" scrub="weibull(3.0, 168, 6)"/>
//!       </machine>
//!     </rack>
//!   </datacenter>
//! </layout>
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use durasim_common::config::{ClusterConfig, RecoveryConfig};
use durasim_common::{DistributionSpec, Error, Result};

use crate::arena::{DiskInfo, MachineInfo, NodeKind, Topology};
use crate::generators::EventGenerator;

const RACK_FAILURE: &str = "exp(0.00001142)";
const RACK_RECOVERY: &str = "weibull(1.0, 24)";
const MACHINE_FAILURE: &str = "weibull(1.0, 8760)";
const MACHINE_RECOVERY: &str = "weibull(1.0, 0.5)";
const DISK_FAILURE: &str = "weibull(1.12, 10302, 6)";
const DISK_RECOVERY: &str = "weibull(2.0, 12, 6)";
const DISK_LATENT: &str = "weibull(1.0, 9259)";
const DISK_SCRUB: &str = "weibull(3.0, 168, 6)";

fn default_count() -> usize {
    1
}

/// Root of a layout file
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename = "layout")]
pub struct LayoutSpec {
    #[serde(rename = "datacenter")]
    pub datacenters: Vec<DatacenterSpec>,
}

/// One datacenter level entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatacenterSpec {
    #[serde(rename = "@count", default = "default_count")]
    pub count: usize,
    #[serde(rename = "rack")]
    pub racks: Vec<RackSpec>,
}

/// One rack level entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RackSpec {
    #[serde(rename = "@count", default = "default_count")]
    pub count: usize,
    #[serde(rename = "@failure")]
    pub failure: Option<String>,
    #[serde(rename = "@recovery")]
    pub recovery: Option<String>,
    #[serde(rename = "machine")]
    pub machines: Vec<MachineSpec>,
}

/// One machine level entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MachineSpec {
    #[serde(rename = "@count", default = "default_count")]
    pub count: usize,
    #[serde(rename = "@failure")]
    pub failure: Option<String>,
    #[serde(rename = "@recovery")]
    pub recovery: Option<String>,
    #[serde(rename = "@fail_timeout")]
    pub fail_timeout: Option<f64>,
    #[serde(rename = "@permanent_fraction")]
    pub permanent_fraction: Option<f64>,
    #[serde(rename = "disk")]
    pub disks: Vec<DiskSpec>,
}

/// One disk level entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpec {
    #[serde(rename = "@count", default = "default_count")]
    pub count: usize,
    #[serde(rename = "@failure")]
    pub failure: Option<String>,
    #[serde(rename = "@recovery")]
    pub recovery: Option<String>,
    #[serde(rename = "@latent")]
    pub latent: Option<String>,
    #[serde(rename = "@scrub")]
    pub scrub: Option<String>,
}

/// Read a layout file
pub fn load_layout(path: &Path) -> Result<LayoutSpec> {
    let text = fs::read_to_string(path)?;
    quick_xml::de::from_str(&text).map_err(|e| Error::layout(e.to_string()))
}

/// Synthesize a layout from configuration counts and defaults
#[must_use]
pub fn layout_from_config(cluster: &ClusterConfig, recovery: &RecoveryConfig) -> LayoutSpec {
    LayoutSpec {
        datacenters: vec![DatacenterSpec {
            count: cluster.datacenters,
            racks: vec![RackSpec {
                count: cluster.rack_count / cluster.datacenters.max(1),
                failure: None,
                recovery: None,
                machines: vec![MachineSpec {
                    count: cluster.machines_per_rack,
                    failure: None,
                    recovery: None,
                    fail_timeout: Some(recovery.machine_fail_timeout),
                    permanent_fraction: Some(recovery.machine_permanent_fraction),
                    disks: vec![DiskSpec {
                        count: cluster.disks_per_machine,
                        failure: None,
                        recovery: None,
                        latent: None,
                        scrub: None,
                    }],
                }],
            }],
        }],
    }
}

fn generator(attr: Option<&String>, default: &str) -> Result<EventGenerator> {
    let spec: DistributionSpec = attr.map_or(default, String::as_str).parse()?;
    EventGenerator::new(spec)
}

/// Materialize a topology from a layout.
///
/// `max_chunks_per_disk` applies uniformly; per-disk overrides are not a
/// layout concern.
pub fn build_topology(spec: &LayoutSpec, max_chunks_per_disk: usize) -> Result<Topology> {
    let mut topo = Topology::new();

    for dc_spec in &spec.datacenters {
        for _ in 0..dc_spec.count {
            let dc = topo.add_node(topo.root(), NodeKind::Datacenter);
            for rack_spec in &dc_spec.racks {
                for _ in 0..rack_spec.count {
                    let rack = topo.add_node(dc, NodeKind::Rack);
                    {
                        let node = topo.node_mut(rack);
                        node.failure = Some(generator(rack_spec.failure.as_ref(), RACK_FAILURE)?);
                        node.recovery =
                            Some(generator(rack_spec.recovery.as_ref(), RACK_RECOVERY)?);
                    }
                    for machine_spec in &rack_spec.machines {
                        for _ in 0..machine_spec.count {
                            let machine = topo.add_node(
                                rack,
                                NodeKind::Machine(MachineInfo {
                                    fail_timeout: machine_spec.fail_timeout.unwrap_or(0.25),
                                    permanent_fraction: machine_spec
                                        .permanent_fraction
                                        .unwrap_or(0.0),
                                }),
                            );
                            {
                                let node = topo.node_mut(machine);
                                node.failure = Some(generator(
                                    machine_spec.failure.as_ref(),
                                    MACHINE_FAILURE,
                                )?);
                                node.recovery = Some(generator(
                                    machine_spec.recovery.as_ref(),
                                    MACHINE_RECOVERY,
                                )?);
                            }
                            for disk_spec in &machine_spec.disks {
                                for _ in 0..disk_spec.count {
                                    let disk = topo.add_node(
                                        machine,
                                        NodeKind::Disk(DiskInfo {
                                            max_chunks: max_chunks_per_disk,
                                            ..DiskInfo::default()
                                        }),
                                    );
                                    let node = topo.node_mut(disk);
                                    node.failure =
                                        Some(generator(disk_spec.failure.as_ref(), DISK_FAILURE)?);
                                    node.recovery = Some(generator(
                                        disk_spec.recovery.as_ref(),
                                        DISK_RECOVERY,
                                    )?);
                                    node.latent =
                                        Some(generator(disk_spec.latent.as_ref(), DISK_LATENT)?);
                                    node.scrub =
                                        Some(generator(disk_spec.scrub.as_ref(), DISK_SCRUB)?);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    if topo.disks().is_empty() {
        return Err(Error::layout("layout produces no disks"));
    }
    Ok(topo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
<layout>
  <datacenter count="1">
    <rack count="4" failure="exp(0.00001142)" recovery="weibull(1.0, 24)">
      <machine count="2" fail_timeout="0.25" permanent_fraction="0.008">
        <disk count="3" failure="weibull(1.12, 10302, 6)"/>
      </machine>
    </rack>
  </datacenter>
</layout>
"#;

    #[test]
    fn test_parse_and_build() {
        let spec: LayoutSpec = quick_xml::de::from_str(SAMPLE).unwrap();
        assert_eq!(spec.datacenters.len(), 1);
        assert_eq!(spec.datacenters[0].racks[0].count, 4);

        let topo = build_topology(&spec, 1000).unwrap();
        assert_eq!(topo.racks().len(), 4);
        assert_eq!(topo.machines().len(), 8);
        assert_eq!(topo.disks().len(), 24);

        let disk = topo.disks()[0];
        assert_eq!(topo.disk(disk).unwrap().max_chunks, 1000);
        assert!(topo.node(disk).latent.is_some());
        assert!(topo.node(disk).scrub.is_some());
    }

    #[test]
    fn test_load_from_file() {
        let mut f = tempfile::Builder::new().suffix(".xml").tempfile().unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        let spec = load_layout(f.path()).unwrap();
        assert_eq!(spec.datacenters[0].racks[0].machines[0].count, 2);
    }

    #[test]
    fn test_from_config_counts() {
        let cluster = ClusterConfig::default();
        let recovery = RecoveryConfig::default();
        let spec = layout_from_config(&cluster, &recovery);
        let topo = build_topology(&spec, cluster.max_chunks_per_disk()).unwrap();
        assert_eq!(topo.racks().len(), cluster.rack_count);
        assert_eq!(topo.disks().len(), cluster.total_disks());
    }

    #[test]
    fn test_bad_distribution_rejected() {
        let xml = SAMPLE.replace("exp(0.00001142)", "zipf(2)");
        let spec: LayoutSpec = quick_xml::de::from_str(&xml).unwrap();
        assert!(build_topology(&spec, 1000).is_err());
    }
}
