//! Event generation from the topology
//!
//! Each rack, machine and disk produces an alternating (Failure,
//! Recovered) sequence over the horizon from its generators. Injected
//! failure intervals take precedence: a natural window overlapping one
//! snaps outward to cover it, and non-overlapping intervals are emitted
//! as standalone pairs. Disks additionally emit latent defects between
//! recoveries and scrub passes on their own schedule.

use rand::Rng;
use rand::rngs::StdRng;

use durasim_common::Result;
use durasim_topology::{EventGenerator, FailureInterval, NodeId, NodeKind, Topology};

use crate::event::{Event, EventInfo, EventKind, EventQueue};

/// Generate all component events over `[0, end_time]`.
///
/// Nodes are visited in arena order, so a fixed seed reproduces the
/// exact event population.
pub fn generate_events(
    topo: &mut Topology,
    end_time: f64,
    eager_recovery: bool,
    queue: &mut EventQueue,
    rng: &mut StdRng,
) -> Result<()> {
    let ids: Vec<NodeId> = topo.nodes().map(|n| n.id).collect();
    for id in ids {
        let mut intervals = std::mem::take(&mut topo.node_mut(id).failure_intervals);
        intervals.sort_by(|a, b| a.start.total_cmp(&b.start));

        let node = topo.node(id);
        let failure = node.failure.clone();
        let recovery = node.recovery.clone();
        let latent = node.latent.clone();
        let scrub = node.scrub.clone();

        match &node.kind {
            NodeKind::Root | NodeKind::Datacenter => {}
            NodeKind::Rack => {
                if let (Some(failure), Some(recovery)) = (failure, recovery) {
                    subtree_events(id, &failure, &recovery, intervals, end_time, queue, rng);
                }
            }
            NodeKind::Machine(info) => {
                let fail_timeout = info.fail_timeout;
                let permanent_fraction = info.permanent_fraction;
                if let (Some(failure), Some(recovery)) = (failure, recovery) {
                    machine_events(
                        id,
                        fail_timeout,
                        permanent_fraction,
                        &failure,
                        &recovery,
                        intervals,
                        end_time,
                        eager_recovery,
                        queue,
                        rng,
                    );
                }
            }
            NodeKind::Disk(_) => {
                if let (Some(failure), Some(recovery)) = (failure, recovery) {
                    disk_events(
                        id,
                        &failure,
                        &recovery,
                        latent.as_ref(),
                        intervals,
                        end_time,
                        queue,
                        rng,
                    );
                }
                if let Some(scrub) = scrub {
                    scrub_events(id, &scrub, end_time, queue, rng);
                }
            }
        }
    }
    Ok(())
}

/// Merge injected intervals into a natural window, snapping its bounds
/// outward on overlap. Intervals ending before the window are drained to
/// `passed`; later intervals stay queued. Returns whether a merged
/// interval was destructive.
fn merge_window(
    window_fail: &mut f64,
    window_recover: &mut f64,
    intervals: &mut Vec<FailureInterval>,
    passed: &mut Vec<FailureInterval>,
) -> bool {
    let mut lost = false;
    let mut i = 0;
    while i < intervals.len() {
        let iv = intervals[i];
        if iv.end < *window_fail {
            passed.push(iv);
            intervals.remove(i);
        } else if iv.start <= *window_recover {
            if iv.start < *window_fail {
                *window_fail = iv.start;
            }
            if iv.end > *window_recover {
                *window_recover = iv.end;
            }
            lost |= iv.lost;
            intervals.remove(i);
        } else {
            i += 1;
        }
    }
    lost
}

/// Rack-level events; the handler recurses them into the subtree.
fn subtree_events(
    id: NodeId,
    failure: &EventGenerator,
    recovery: &EventGenerator,
    mut intervals: Vec<FailureInterval>,
    end_time: f64,
    queue: &mut EventQueue,
    rng: &mut StdRng,
) {
    let emit_standalone = |queue: &mut EventQueue, iv: FailureInterval| {
        let info = if iv.lost {
            EventInfo::Permanent
        } else {
            EventInfo::Unclassified
        };
        queue.push(
            Event::new(EventKind::Failure, iv.start, id)
                .with_info(info)
                .with_recovery(iv.end),
        );
        queue.push(Event::new(EventKind::Recovered, iv.end, id).with_info(info));
    };

    let mut current = 0.0;
    loop {
        let mut failure_time = failure.next_after(current, rng);
        if failure_time > end_time {
            for iv in intervals.drain(..) {
                emit_standalone(queue, iv);
            }
            return;
        }
        let mut recovery_time = recovery.next_after(failure_time, rng);

        let mut passed = Vec::new();
        let lost = merge_window(&mut failure_time, &mut recovery_time, &mut intervals, &mut passed);
        for iv in passed {
            emit_standalone(queue, iv);
        }

        let info = if lost {
            EventInfo::Permanent
        } else {
            EventInfo::Unclassified
        };
        queue.push(
            Event::new(EventKind::Failure, failure_time, id)
                .with_info(info)
                .with_recovery(recovery_time),
        );
        queue.push(Event::new(EventKind::Recovered, recovery_time, id).with_info(info));

        if recovery_time > end_time {
            return;
        }
        current = recovery_time;
    }
}

/// Classify a machine outage
fn classify(duration: f64, fail_timeout: f64) -> EventInfo {
    if duration <= fail_timeout {
        EventInfo::ShortTransient
    } else {
        EventInfo::LongTransient
    }
}

#[allow(clippy::too_many_arguments)]
fn machine_events(
    id: NodeId,
    fail_timeout: f64,
    permanent_fraction: f64,
    failure: &EventGenerator,
    recovery: &EventGenerator,
    mut intervals: Vec<FailureInterval>,
    end_time: f64,
    eager_recovery: bool,
    queue: &mut EventQueue,
    rng: &mut StdRng,
) {
    let emit_standalone = |queue: &mut EventQueue, iv: FailureInterval| {
        let info = if iv.lost {
            EventInfo::Permanent
        } else {
            classify(iv.end - iv.start, fail_timeout)
        };
        queue.push(
            Event::new(EventKind::Failure, iv.start, id)
                .with_info(info)
                .with_recovery(iv.end),
        );
        queue.push(Event::new(EventKind::Recovered, iv.end, id).with_info(info));
    };

    let mut current = 0.0;
    loop {
        let mut failure_time = failure.next_after(current, rng);
        // The permanence draw happens for every natural failure so the
        // RNG stream stays aligned across horizons.
        let permanent_draw = rng.random_range(0.0..1.0) < permanent_fraction;
        if failure_time > end_time {
            for iv in intervals.drain(..) {
                emit_standalone(queue, iv);
            }
            return;
        }
        let mut recovery_time = recovery.next_after(failure_time, rng);

        let mut passed = Vec::new();
        let lost = merge_window(&mut failure_time, &mut recovery_time, &mut intervals, &mut passed);
        for iv in passed {
            emit_standalone(queue, iv);
        }

        let info = if lost || permanent_draw {
            EventInfo::Permanent
        } else {
            classify(recovery_time - failure_time, fail_timeout)
        };
        queue.push(
            Event::new(EventKind::Failure, failure_time, id)
                .with_info(info)
                .with_recovery(recovery_time),
        );
        if eager_recovery
            && info == EventInfo::LongTransient
            && failure_time + fail_timeout < recovery_time.min(end_time)
        {
            queue.push(
                Event::new(EventKind::EagerRecoveryStart, failure_time + fail_timeout, id)
                    .with_recovery(recovery_time),
            );
        }
        queue.push(Event::new(EventKind::Recovered, recovery_time, id).with_info(info));

        if recovery_time > end_time {
            return;
        }
        current = recovery_time;
    }
}

#[allow(clippy::too_many_arguments)]
fn disk_events(
    id: NodeId,
    failure: &EventGenerator,
    recovery: &EventGenerator,
    latent: Option<&EventGenerator>,
    mut intervals: Vec<FailureInterval>,
    end_time: f64,
    queue: &mut EventQueue,
    rng: &mut StdRng,
) {
    let emit_standalone = |queue: &mut EventQueue, iv: FailureInterval| {
        queue.push(
            Event::new(EventKind::Failure, iv.start, id).with_recovery(iv.end),
        );
        queue.push(Event::new(EventKind::Recovered, iv.end, id));
    };

    let mut current = 0.0;
    let mut last_recover = 0.0;
    loop {
        let mut failure_time = failure.next_after(current, rng);
        if failure_time > end_time {
            for iv in intervals.drain(..) {
                emit_standalone(queue, iv);
            }
            if let Some(latent) = latent {
                latent_events(id, latent, last_recover, end_time, queue, rng);
            }
            return;
        }
        let mut recovery_time = recovery.next_after(failure_time, rng);

        let mut passed = Vec::new();
        merge_window(&mut failure_time, &mut recovery_time, &mut intervals, &mut passed);
        for iv in passed {
            emit_standalone(queue, iv);
        }

        queue.push(
            Event::new(EventKind::Failure, failure_time, id).with_recovery(recovery_time),
        );
        if let Some(latent) = latent {
            latent_events(id, latent, last_recover, failure_time, queue, rng);
        }
        queue.push(Event::new(EventKind::Recovered, recovery_time, id));

        if recovery_time > end_time {
            return;
        }
        last_recover = recovery_time;
        current = recovery_time;
    }
}

/// Latent defects strike between a recovery and the next failure
fn latent_events(
    id: NodeId,
    latent: &EventGenerator,
    start: f64,
    until: f64,
    queue: &mut EventQueue,
    rng: &mut StdRng,
) {
    let mut current = start;
    loop {
        current = latent.next_after(current, rng);
        if current > until {
            return;
        }
        queue.push(Event::new(EventKind::LatentDefect, current, id));
    }
}

/// Scrub passes over the whole horizon
fn scrub_events(
    id: NodeId,
    scrub: &EventGenerator,
    end_time: f64,
    queue: &mut EventQueue,
    rng: &mut StdRng,
) {
    let mut current = 0.0;
    loop {
        current = scrub.next_after(current, rng);
        if current > end_time {
            return;
        }
        queue.push(Event::new(EventKind::LatentRecovered, current, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durasim_common::DistributionSpec;
    use durasim_topology::{DiskInfo, MachineInfo, NodeKind};
    use rand::SeedableRng;

    fn constant(value: f64) -> EventGenerator {
        EventGenerator::new(DistributionSpec::Constant { value }).unwrap()
    }

    fn drain(queue: &mut EventQueue) -> Vec<Event> {
        std::iter::from_fn(|| queue.pop()).map(|(_, e)| e).collect()
    }

    fn disk_fixture(max_chunks: usize) -> (Topology, NodeId) {
        let mut topo = Topology::new();
        let dc = topo.add_node(topo.root(), NodeKind::Datacenter);
        let rack = topo.add_node(dc, NodeKind::Rack);
        let machine = topo.add_node(
            rack,
            NodeKind::Machine(MachineInfo {
                fail_timeout: 0.25,
                permanent_fraction: 0.0,
            }),
        );
        let disk = topo.add_node(
            machine,
            NodeKind::Disk(DiskInfo {
                max_chunks,
                ..DiskInfo::default()
            }),
        );
        (topo, disk)
    }

    #[test]
    fn test_disk_alternating_pairs() {
        let (mut topo, disk) = disk_fixture(10);
        {
            let node = topo.node_mut(disk);
            node.failure = Some(constant(100.0));
            node.recovery = Some(constant(10.0));
        }
        let mut queue = EventQueue::new();
        let mut rng = StdRng::seed_from_u64(1);
        generate_events(&mut topo, 250.0, false, &mut queue, &mut rng).unwrap();

        let events = drain(&mut queue);
        let disk_events: Vec<&Event> = events.iter().filter(|e| e.node == disk).collect();
        // Failures at 100 and 210, recoveries at 110 and 220.
        assert_eq!(disk_events.len(), 4);
        assert_eq!(disk_events[0].kind, EventKind::Failure);
        assert_eq!(disk_events[0].time, 100.0);
        assert_eq!(disk_events[0].next_recovery_time, Some(110.0));
        assert_eq!(disk_events[1].kind, EventKind::Recovered);
        assert_eq!(disk_events[2].time, 210.0);
        assert_eq!(disk_events[3].time, 220.0);
    }

    #[test]
    fn test_machine_outage_classification() {
        let (mut topo, disk) = disk_fixture(10);
        let machine = topo.machine_of(disk).unwrap();
        {
            let node = topo.node_mut(machine);
            node.failure = Some(constant(50.0));
            node.recovery = Some(constant(0.1)); // under the 0.25 timeout
        }
        let mut queue = EventQueue::new();
        let mut rng = StdRng::seed_from_u64(2);
        generate_events(&mut topo, 60.0, false, &mut queue, &mut rng).unwrap();

        let events = drain(&mut queue);
        let fail = events
            .iter()
            .find(|e| e.node == machine && e.kind == EventKind::Failure)
            .unwrap();
        assert_eq!(fail.info, EventInfo::ShortTransient);
    }

    #[test]
    fn test_long_transient_schedules_eager_start() {
        let (mut topo, disk) = disk_fixture(10);
        let machine = topo.machine_of(disk).unwrap();
        {
            let node = topo.node_mut(machine);
            node.failure = Some(constant(50.0));
            node.recovery = Some(constant(5.0));
        }
        let mut queue = EventQueue::new();
        let mut rng = StdRng::seed_from_u64(3);
        generate_events(&mut topo, 60.0, true, &mut queue, &mut rng).unwrap();

        let events = drain(&mut queue);
        let eager = events
            .iter()
            .find(|e| e.kind == EventKind::EagerRecoveryStart)
            .unwrap();
        assert_eq!(eager.node, machine);
        assert_eq!(eager.time, 50.25);
        assert_eq!(eager.next_recovery_time, Some(55.0));
    }

    #[test]
    fn test_injected_interval_snaps_window() {
        let (mut topo, disk) = disk_fixture(10);
        {
            let node = topo.node_mut(disk);
            node.failure = Some(constant(100.0));
            node.recovery = Some(constant(10.0));
        }
        // Overlaps the natural window [100, 110): snaps to [95, 120).
        topo.add_failure_interval(
            disk,
            FailureInterval {
                start: 95.0,
                end: 120.0,
                lost: false,
            },
        );
        let mut queue = EventQueue::new();
        let mut rng = StdRng::seed_from_u64(4);
        generate_events(&mut topo, 150.0, false, &mut queue, &mut rng).unwrap();

        let events = drain(&mut queue);
        let fail = events
            .iter()
            .find(|e| e.node == disk && e.kind == EventKind::Failure)
            .unwrap();
        assert_eq!(fail.time, 95.0);
        assert_eq!(fail.next_recovery_time, Some(120.0));
    }

    #[test]
    fn test_non_overlapping_interval_emitted_standalone() {
        let (mut topo, disk) = disk_fixture(10);
        {
            let node = topo.node_mut(disk);
            node.failure = Some(constant(100.0));
            node.recovery = Some(constant(10.0));
        }
        topo.add_failure_interval(
            disk,
            FailureInterval {
                start: 20.0,
                end: 30.0,
                lost: true,
            },
        );
        let mut queue = EventQueue::new();
        let mut rng = StdRng::seed_from_u64(5);
        generate_events(&mut topo, 150.0, false, &mut queue, &mut rng).unwrap();

        let events = drain(&mut queue);
        let disk_failures: Vec<&Event> = events
            .iter()
            .filter(|e| e.node == disk && e.kind == EventKind::Failure)
            .collect();
        assert_eq!(disk_failures.len(), 2);
        assert_eq!(disk_failures[0].time, 20.0);
        assert_eq!(disk_failures[0].next_recovery_time, Some(30.0));
        assert_eq!(disk_failures[1].time, 100.0);
    }

    #[test]
    fn test_scrub_schedule_covers_horizon() {
        let (mut topo, disk) = disk_fixture(10);
        {
            let node = topo.node_mut(disk);
            node.failure = Some(constant(1e9)); // never fails
            node.recovery = Some(constant(1.0));
            node.scrub = Some(constant(168.0));
        }
        let mut queue = EventQueue::new();
        let mut rng = StdRng::seed_from_u64(6);
        generate_events(&mut topo, 1000.0, false, &mut queue, &mut rng).unwrap();

        let events = drain(&mut queue);
        let scrubs = events
            .iter()
            .filter(|e| e.kind == EventKind::LatentRecovered)
            .count();
        assert_eq!(scrubs, 5); // 168, 336, 504, 672, 840
    }
}
