//! End-to-end scenarios driving the handler with hand-built event
//! sequences.

use rand::SeedableRng;
use rand::rngs::StdRng;

use durasim_common::SimConfig;
use durasim_common::config::PlacementConfig;
use durasim_engine::{Event, EventHandler, EventInfo, EventKind, EventQueue, TotalSlicesSchedule};
use durasim_placement::{Placement, PlacementEngine};
use durasim_redundancy::{RedundancyScheme, parse_scheme};
use durasim_topology::{DiskInfo, MachineInfo, NodeId, NodeKind, Topology};

fn grid(racks: usize, machines: usize, disks: usize, max_chunks: usize) -> Topology {
    let mut topo = Topology::new();
    let dc = topo.add_node(topo.root(), NodeKind::Datacenter);
    for _ in 0..racks {
        let rack = topo.add_node(dc, NodeKind::Rack);
        for _ in 0..machines {
            let machine = topo.add_node(
                rack,
                NodeKind::Machine(MachineInfo {
                    fail_timeout: 0.25,
                    permanent_fraction: 0.0,
                }),
            );
            for _ in 0..disks {
                topo.add_node(
                    machine,
                    NodeKind::Disk(DiskInfo {
                        max_chunks,
                        ..DiskInfo::default()
                    }),
                );
            }
        }
    }
    topo
}

struct Fixture {
    config: SimConfig,
    scheme: Box<dyn RedundancyScheme>,
    topo: Topology,
    placement: Placement,
    rng: StdRng,
}

impl Fixture {
    fn new(scheme_spec: &str, racks: usize, stripes: usize) -> Self {
        let scheme = parse_scheme(scheme_spec).unwrap();
        let mut config = SimConfig::default();
        config.simulation.total_time = 87_600.0;
        config.redundancy.data_redundancy = scheme_spec.to_string();

        let mut topo = grid(racks, 2, 2, 100_000);
        let engine = PlacementEngine::new(&PlacementConfig::default(), scheme.n()).unwrap();
        let mut placement = Placement::default();
        let mut rng = StdRng::seed_from_u64(1234);
        engine
            .place(&mut topo, &mut placement, stripes, &mut rng)
            .unwrap();

        Self {
            config,
            scheme,
            topo,
            placement,
            rng,
        }
    }

    /// Drive the prepared events through a fresh handler
    fn run(&mut self, events: Vec<Event>) -> durasim_engine::SimResult {
        let schedule = TotalSlicesSchedule::flat(
            self.placement.stripes.len(),
            self.config.simulation.total_time,
        );
        let mut handler =
            EventHandler::new(&self.config, self.scheme.as_ref(), &self.placement, schedule);
        let mut queue = EventQueue::new();
        for event in events {
            queue.push(event);
        }
        while let Some((seq, event)) = queue.pop() {
            handler
                .handle(seq, &event, &mut queue, &mut self.topo, &mut self.rng)
                .unwrap();
        }
        handler.finish()
    }

    fn stripes_on(&self, disk: NodeId) -> usize {
        self.topo.disk(disk).unwrap().stripes.len()
    }
}

/// RS(9,6): one disk failure and recovery, no latent errors, no
/// contention. Every hosted stripe is rebuilt once at cost k, and no
/// data is lost.
#[test]
fn single_disk_failure_rebuilds_every_hosted_stripe() {
    let mut fixture = Fixture::new("RS_9_6", 12, 120);
    let disk = fixture.topo.disks()[0];
    let hosted = fixture.stripes_on(disk);
    assert!(hosted > 0);

    let result = fixture.run(vec![
        Event::new(EventKind::Failure, 100.0, disk).with_recovery(110.0),
        Event::new(EventKind::Recovered, 110.0, disk),
    ]);

    assert_eq!(result.undurable_count, 0);
    assert_eq!(result.pdl, 0.0);
    assert_eq!(result.counters.repairs, hosted as u64);
    assert_eq!(result.counters.optimal_repairs, 0);
    // Each repair reads k = 6 chunks of 256 MiB.
    let expected = hosted as f64 * 6.0 * 256.0;
    assert!((result.total_repair_transfers - expected).abs() < 1e-6);
}

/// RS(3,1) triple replication: replicas die one after another with no
/// repair in between; the stripe is recorded lost exactly once, blamed
/// on the disk that destroyed the last copy.
#[test]
fn replicated_stripe_lost_when_last_copy_dies() {
    let mut fixture = Fixture::new("RS_3_1", 6, 40);
    let stripe0 = fixture.placement.stripes[0].clone();
    assert_eq!(stripe0.len(), 3);

    // Fail the three hosting disks back to back, recoveries far away.
    let events = stripe0
        .iter()
        .enumerate()
        .map(|(i, disk)| {
            Event::new(EventKind::Failure, 10.0 + i as f64, *disk).with_recovery(1_000.0)
        })
        .collect();
    let result = fixture.run(events);

    let lost: Vec<_> = result
        .undurable_infos
        .iter()
        .filter(|info| info.stripe == 0)
        .collect();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].component, stripe0[2]);
    assert_eq!(lost[0].cause, durasim_engine::LossCause::Disk);

    // Two of three replicas gone is degraded but not lost.
    assert!(
        result
            .undurable_infos
            .iter()
            .all(|info| info.time >= 12.0)
    );
}

/// Consecutive scrub passes over a disk with an empty latent-error set
/// are free.
#[test]
fn idempotent_scrub_is_free() {
    let mut fixture = Fixture::new("RS_9_6", 12, 60);
    let disk = fixture.topo.disks()[0];

    let result = fixture.run(vec![
        Event::new(EventKind::LatentRecovered, 50.0, disk),
        Event::new(EventKind::LatentRecovered, 60.0, disk),
    ]);

    assert_eq!(result.counters.scrubs, 2);
    assert_eq!(result.counters.scrub_repairs, 0);
    assert_eq!(result.total_repair_transfers, 0.0);
}

/// A latent defect is invisible until a scrub finds and repairs it.
#[test]
fn latent_defect_repaired_by_scrub() {
    let mut fixture = Fixture::new("RS_9_6", 12, 60);
    let disk = fixture.topo.disks()[0];

    let result = fixture.run(vec![
        Event::new(EventKind::LatentDefect, 50.0, disk),
        Event::new(EventKind::LatentRecovered, 500.0, disk),
    ]);

    assert_eq!(result.counters.latent_failures, 1);
    assert_eq!(result.counters.scrub_repairs, 1);
    assert_eq!(result.undurable_count, 0);
    // Scrub repair of one chunk reads k chunks.
    assert!((result.total_repair_transfers - 6.0 * 256.0).abs() < 1e-6);
}

/// Transient machine outages crash chunks without destroying them; the
/// paired recovery restores every crashed chunk for free.
#[test]
fn transient_machine_outage_round_trip() {
    let mut fixture = Fixture::new("RS_9_6", 12, 120);
    let machine = fixture.topo.machines()[0];

    let result = fixture.run(vec![
        Event::new(EventKind::Failure, 100.0, machine)
            .with_info(EventInfo::LongTransient)
            .with_recovery(105.0),
        Event::new(EventKind::Recovered, 105.0, machine).with_info(EventInfo::LongTransient),
    ]);

    assert_eq!(result.undurable_count, 0);
    assert_eq!(result.counters.repairs, 0);
    assert_eq!(result.total_repair_transfers, 0.0);
    assert_eq!(result.counters.long_temp_machine_failures, 1);
    assert_eq!(result.counters.machine_repairs, 1);
}

/// A permanent machine failure corrupts chunks on all its disks; the
/// machine-level rebuild restores them and charges repair traffic.
#[test]
fn permanent_machine_failure_rebuilds_on_recovery() {
    let mut fixture = Fixture::new("RS_9_6", 12, 120);
    let machine = fixture.topo.machines()[0];
    let hosted: usize = fixture
        .topo
        .disks_under(machine)
        .iter()
        .map(|d| fixture.stripes_on(*d))
        .sum();
    assert!(hosted > 0);

    let result = fixture.run(vec![
        Event::new(EventKind::Failure, 100.0, machine)
            .with_info(EventInfo::Permanent)
            .with_recovery(150.0),
        Event::new(EventKind::Recovered, 150.0, machine).with_info(EventInfo::Permanent),
    ]);

    assert_eq!(result.undurable_count, 0);
    assert_eq!(result.counters.perm_machine_failures, 1);
    assert_eq!(result.counters.repairs, hosted as u64);
}

/// With RAFI enabled, a permanent machine failure whose natural repair
/// sits far beyond the detection interval is rebuilt adaptively at
/// `failure + d_1`, and the eventual machine recovery finds nothing left
/// to do.
#[test]
fn rafi_rebuilds_ahead_of_natural_recovery() {
    let mut fixture = Fixture::new("RS_9_6", 12, 120);
    fixture.config.recovery.detect_intervals = Some(vec![10.0, 5.0, 1.0]);
    let machine = fixture.topo.machines()[0];
    let hosted: usize = fixture
        .topo
        .disks_under(machine)
        .iter()
        .map(|d| fixture.stripes_on(*d))
        .sum();
    assert!(hosted > 0);

    let result = fixture.run(vec![
        Event::new(EventKind::Failure, 100.0, machine)
            .with_info(EventInfo::Permanent)
            .with_recovery(1_000.0),
        Event::new(EventKind::Recovered, 1_000.0, machine).with_info(EventInfo::Permanent),
    ]);

    assert_eq!(result.undurable_count, 0);
    // Every hosted stripe was rebuilt exactly once, by RAFI at t=110
    // rather than by the machine recovery at t=1000.
    assert_eq!(result.counters.repairs, hosted as u64);
    let expected = hosted as f64 * 6.0 * 256.0;
    assert!((result.total_repair_transfers - expected).abs() < 1e-6);
}

/// Unavailability windows are well-formed: ordered, non-overlapping,
/// never negative.
#[test]
fn unavailability_windows_are_ordered() {
    let mut fixture = Fixture::new("RS_9_6", 12, 120);
    let disks = fixture.topo.disks();

    // Knock out four disks in four different racks with staggered
    // recoveries to push some stripes past repairability.
    let mut events = Vec::new();
    for (i, disk) in disks.iter().step_by(4).take(4).enumerate() {
        let fail = 100.0 + i as f64;
        let recover = 200.0 + i as f64 * 10.0;
        events.push(Event::new(EventKind::Failure, fail, *disk).with_recovery(recover));
        events.push(Event::new(EventKind::Recovered, recover, *disk));
    }
    let result = fixture.run(events);

    for windows in result.unavailable_durations.values() {
        let mut previous_end = f64::NEG_INFINITY;
        for (start, end) in windows {
            assert!(end >= start, "window ends before it starts");
            assert!(*start >= previous_end, "windows overlap");
            previous_end = *end;
        }
    }
}
