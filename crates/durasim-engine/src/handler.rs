//! The core event handler: per-stripe state transitions and metric
//! accumulation
//!
//! For each dequeued event the handler transitions chunk state, updates
//! degradation counters, and possibly enqueues follow-on events (queued
//! recoveries, eager installments, RAFI rebuilds). All results accumulate
//! into a value-typed [`SimResult`] snapshotted by [`EventHandler::finish`].

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use std::collections::BTreeMap;
use tracing::{info, trace, warn};

use durasim_common::config::{PlacementFamily, RepairTimes, SimConfig};
use durasim_common::{ChunkHealth, Error, Result};
use durasim_placement::Placement;
use durasim_redundancy::RedundancyScheme;
use durasim_topology::{NodeId, NodeKind, Topology};

use crate::contention::FifoContention;
use crate::event::{Event, EventInfo, EventKind, EventPayload, EventQueue, InstallmentSet};
use crate::rafi::{RafiState, RafiTransition};
use crate::result::{Counters, LossCause, SimResult, UndurableInfo};
use crate::schedule::TotalSlicesSchedule;

/// Stripe state: a live chunk vector, or the terminal lost marker
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StripeStatus {
    Active(Vec<ChunkHealth>),
    Lost,
}

/// The reliability engine's state machine
pub struct EventHandler<'a> {
    conf: &'a SimConfig,
    scheme: &'a dyn RedundancyScheme,
    placement: &'a Placement,

    n: usize,
    k: usize,
    chunk_size: f64,
    end_time: f64,
    recovery_threshold: usize,
    repair_times: RepairTimes,
    /// Cross-rack traffic per repaired chunk relative to ORC
    traffic_ratio: f64,

    schedule: TotalSlicesSchedule,
    total_slices: usize,

    status: Vec<StripeStatus>,

    current_slice_degraded: i64,
    current_avail_slice_degraded: i64,
    current_recovery_bandwidth: f64,
    max_recovery_bandwidth: f64,

    unavailable_count: u64,
    undurable_infos: Vec<UndurableInfo>,
    unavailable_durations: BTreeMap<usize, Vec<(f64, Option<f64>)>>,
    total_repair_transfers: f64,
    counters: Counters,

    contention: Option<FifoContention>,
    rafi: Option<RafiState>,
}

impl<'a> EventHandler<'a> {
    pub fn new(
        conf: &'a SimConfig,
        scheme: &'a dyn RedundancyScheme,
        placement: &'a Placement,
        schedule: TotalSlicesSchedule,
    ) -> Self {
        let n = scheme.n();
        let k = scheme.k();
        let total_slices = schedule.final_count();
        // A ramp clamped by the horizon can leave placed stripes that
        // never go live; they still need state slots.
        let state_slots = total_slices.max(placement.stripes.len());
        let hier = conf.placement.hierarchical;
        let racks = conf.placement.distinct_racks;
        let traffic_ratio = scheme.repair_traffic(hier, racks) / scheme.orc();
        let repair_times = conf.repair_times(n, k, scheme.repair_traffic(hier, racks));

        Self {
            conf,
            scheme,
            placement,
            n,
            k,
            chunk_size: f64::from(conf.cluster.chunk_size),
            end_time: conf.simulation.total_time,
            recovery_threshold: conf.recovery.effective_threshold(n),
            repair_times,
            traffic_ratio,
            schedule,
            total_slices,
            status: vec![StripeStatus::Active(vec![ChunkHealth::Normal; n]); state_slots],
            current_slice_degraded: 0,
            current_avail_slice_degraded: 0,
            current_recovery_bandwidth: 0.0,
            max_recovery_bandwidth: 0.0,
            unavailable_count: 0,
            undurable_infos: Vec::new(),
            unavailable_durations: BTreeMap::new(),
            total_repair_transfers: 0.0,
            counters: Counters::default(),
            contention: (!conf.contention.queue_disable).then(FifoContention::new),
            rafi: conf
                .recovery
                .detect_intervals
                .clone()
                .map(RafiState::new),
        }
    }

    /// Flag chunks pre-corrupt with probability `p` (block failure
    /// perturbation).
    pub fn apply_block_failures(&mut self, p: f64, topo: &Topology, rng: &mut StdRng) {
        for stripe in 0..self.placement.stripes.len() {
            for position in 0..self.n {
                if rng.random_range(0.0..1.0) < p {
                    let was_normal = self
                        .state(stripe)
                        .is_some_and(|s| s[position] == ChunkHealth::Normal);
                    if was_normal {
                        self.slice_degraded(stripe);
                        if let StripeStatus::Active(state) = &mut self.status[stripe] {
                            state[position] = ChunkHealth::Corrupted;
                        }
                    }
                }
            }
            if self.is_lost(stripe) {
                let disk = self.placement.stripes[stripe][0];
                self.mark_lost(stripe, 0.0, LossCause::Disk, disk, topo);
            }
        }
    }

    // ---- stripe state helpers -------------------------------------------

    fn state(&self, stripe: usize) -> Option<&Vec<ChunkHealth>> {
        match &self.status[stripe] {
            StripeStatus::Active(s) => Some(s),
            StripeStatus::Lost => None,
        }
    }

    fn durable_count(&self, stripe: usize) -> usize {
        self.state(stripe).map_or(0, |s| {
            s.iter().filter(|c| c.is_durable()).count()
        })
    }

    fn available_count(&self, stripe: usize) -> usize {
        self.state(stripe).map_or(0, |s| {
            s.iter().filter(|c| c.is_available()).count()
        })
    }

    fn is_lost_marker(&self, stripe: usize) -> bool {
        matches!(self.status[stripe], StripeStatus::Lost)
    }

    /// Readable right now?
    fn is_repairable(&self, stripe: usize) -> bool {
        self.state(stripe)
            .is_some_and(|s| self.scheme.is_repairable(s))
    }

    /// Durably gone? Crashed chunks fold back to Normal before the test.
    fn is_lost(&self, stripe: usize) -> bool {
        let Some(state) = self.state(stripe) else {
            return true;
        };
        let reduced: Vec<ChunkHealth> = state
            .iter()
            .map(|c| match c {
                ChunkHealth::Crashed => ChunkHealth::Normal,
                other => *other,
            })
            .collect();
        !self.scheme.is_repairable(&reduced)
    }

    fn slice_degraded(&mut self, stripe: usize) {
        if self.durable_count(stripe) == self.n {
            self.current_slice_degraded += 1;
        }
        self.slice_degraded_availability(stripe);
    }

    fn slice_recovered(&mut self, stripe: usize) {
        if self.durable_count(stripe) == self.n {
            self.current_slice_degraded -= 1;
        }
        self.slice_recovered_availability(stripe);
    }

    fn slice_degraded_availability(&mut self, stripe: usize) {
        if self.k == 1 {
            return; // replication is not affected by this
        }
        if self.available_count(stripe) == self.n {
            self.current_avail_slice_degraded += 1;
        }
    }

    fn slice_recovered_availability(&mut self, stripe: usize) {
        if self.k == 1 {
            return;
        }
        if self.available_count(stripe) == self.n {
            self.current_avail_slice_degraded -= 1;
        }
    }

    fn start_unavailable(&mut self, stripe: usize, ts: f64) {
        let windows = self.unavailable_durations.entry(stripe).or_default();
        match windows.last() {
            Some((_, None)) => {}
            _ => windows.push((ts, None)),
        }
    }

    fn end_unavailable(&mut self, stripe: usize, ts: f64) {
        let lost = self.is_lost(stripe);
        let end_time = self.end_time;
        let windows = self.unavailable_durations.entry(stripe).or_default();
        if windows.is_empty() {
            windows.push((ts, Some(end_time)));
            return;
        }
        if lost {
            match windows.last_mut() {
                Some(last @ (_, None)) => last.1 = Some(end_time),
                _ => windows.push((ts, Some(end_time))),
            }
        } else if let Some(last) = windows.last_mut() {
            last.1 = Some(ts);
        }
    }

    fn mark_lost(
        &mut self,
        stripe: usize,
        time: f64,
        cause: LossCause,
        component: NodeId,
        topo: &Topology,
    ) {
        info!(
            time,
            stripe,
            durable = self.durable_count(stripe),
            component = %topo.path_of(component),
            "stripe lost"
        );
        self.end_unavailable(stripe, time);
        self.status[stripe] = StripeStatus::Lost;
        self.undurable_infos.push(UndurableInfo {
            stripe,
            time,
            cause,
            component,
        });
        if let Some(rafi) = &mut self.rafi {
            rafi.clear(stripe);
        }
    }

    // ---- repairs --------------------------------------------------------

    /// Rebuild a single chunk; returns the transfer in MiB
    fn repair(&mut self, stripe: usize, index: usize) -> Result<f64> {
        let StripeStatus::Active(state) = &mut self.status[stripe] else {
            return Err(Error::invariant("repair on a lost stripe"));
        };
        let cost = self
            .scheme
            .single_repair(state, index)
            .map_err(|e| Error::invariant(e.to_string()))?;
        if cost < self.scheme.rc() {
            self.counters.optimal_repairs += 1;
        }
        Ok(cost * self.chunk_size)
    }

    /// Rebuild every damaged chunk; returns the transfer in MiB
    fn parallel_repair(&mut self, stripe: usize, only_lost: bool) -> Result<f64> {
        let StripeStatus::Active(state) = &mut self.status[stripe] else {
            return Err(Error::invariant("repair on a lost stripe"));
        };
        let cost = self
            .scheme
            .parallel_repair(state, only_lost)
            .map_err(|e| Error::invariant(e.to_string()))?;
        Ok(cost * self.chunk_size)
    }

    fn charge_repair(&mut self, transferred_mib: f64) {
        self.counters.repairs += 1;
        self.total_repair_transfers += transferred_mib * self.traffic_ratio;
    }

    /// Charge transfer that happened outside the event loop (e.g. load
    /// balancing during scaling) to total repair cost.
    pub fn charge_external_transfer(&mut self, transferred_mib: f64) {
        self.total_repair_transfers += transferred_mib;
    }

    // ---- bandwidth accounting -------------------------------------------

    fn raise_bandwidth(&mut self, amount: f64) {
        self.current_recovery_bandwidth += amount;
        if self.current_recovery_bandwidth > self.max_recovery_bandwidth {
            self.max_recovery_bandwidth = self.current_recovery_bandwidth;
        }
    }

    fn release_bandwidth(&mut self, amount: f64) -> Result<()> {
        self.current_recovery_bandwidth -= amount;
        if self.current_recovery_bandwidth < 0.0 {
            // Epsilon slack absorbs float drift; anything worse aborts.
            if self.current_recovery_bandwidth > -1.0 {
                self.current_recovery_bandwidth = 0.0;
            } else {
                return Err(Error::invariant(format!(
                    "recovery bandwidth fell to {}",
                    self.current_recovery_bandwidth
                )));
            }
        }
        Ok(())
    }

    // ---- lazy threshold -------------------------------------------------

    /// Effective rebuild threshold under backlog hysteresis
    fn lazy_threshold(&self, current_total: usize) -> usize {
        let mut threshold = self.recovery_threshold;
        if self.conf.recovery.lazy_only_available {
            threshold = self.n - 1;
        }
        if (self.current_slice_degraded as f64)
            < self.conf.recovery.max_degraded_slices * current_total as f64
        {
            threshold = self.recovery_threshold;
        }
        threshold
    }

    fn threshold_crossed(&self, stripe: usize, threshold: usize) -> bool {
        if self.durable_count(stripe) <= threshold {
            return true;
        }
        self.conf.recovery.availability_counts_for_recovery
            && self.available_count(stripe) <= threshold
    }

    // ---- dispatch -------------------------------------------------------

    pub fn handle(
        &mut self,
        seq: u64,
        event: &Event,
        queue: &mut EventQueue,
        topo: &mut Topology,
        rng: &mut StdRng,
    ) -> Result<()> {
        trace!(?event.kind, event.time, node = %event.node, "dispatch");
        self.counters.events_handled += 1;
        match event.kind {
            EventKind::Failure => self.handle_failure(event.node, event, queue, topo, rng),
            EventKind::Recovered => self.handle_recovery(event.node, event, queue, topo, rng),
            EventKind::LatentDefect => self.handle_latent_defect(event.node, event, topo, rng),
            EventKind::LatentRecovered => self.handle_latent_recovered(event.node, event, topo),
            EventKind::EagerRecoveryStart => self.handle_eager_start(event, queue, topo, rng),
            EventKind::EagerRecoveryInstallment => self.handle_eager_installment(event, topo, rng),
            EventKind::RafiRecovered => self.handle_rafi_recovered(seq, event, topo),
        }
    }

    // ---- failures -------------------------------------------------------

    fn handle_failure(
        &mut self,
        unit: NodeId,
        event: &Event,
        queue: &mut EventQueue,
        topo: &mut Topology,
        rng: &mut StdRng,
    ) -> Result<()> {
        if event.ignore {
            return Ok(());
        }
        match topo.node(unit).kind {
            NodeKind::Machine(info) => {
                self.machine_failure(unit, info.fail_timeout, event, queue, topo)
            }
            NodeKind::Disk(_) => self.disk_failure(unit, event, topo),
            _ => {
                let children = topo.node(unit).children.clone();
                for child in children {
                    self.handle_failure(child, event, queue, topo, rng)?;
                }
                Ok(())
            }
        }
    }

    fn machine_failure(
        &mut self,
        machine: NodeId,
        fail_timeout: f64,
        event: &Event,
        queue: &mut EventQueue,
        topo: &mut Topology,
    ) -> Result<()> {
        let time = event.time;
        let current_total = self.schedule.live_at(time);
        self.counters.machine_failures += 1;
        topo.node_mut(machine).last_failure_time = time;

        let permanent = event.info == EventInfo::Permanent;
        match event.info {
            EventInfo::Permanent => self.counters.perm_machine_failures += 1,
            EventInfo::ShortTransient => self.counters.short_temp_machine_failures += 1,
            EventInfo::LongTransient => self.counters.long_temp_machine_failures += 1,
            _ => {
                self.counters.machine_failures_from_rack += 1;
                if event.outage().is_some_and(|o| o <= fail_timeout) {
                    self.counters.short_temp_machine_failures += 1;
                } else {
                    self.counters.long_temp_machine_failures += 1;
                }
            }
        }

        // (failure count -> stripes) awaiting a RAFI rebuild schedule
        let mut rafi_batches: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        let disks = topo.node(machine).children.clone();
        for disk in disks {
            let stripes = topo.disk(disk).map(|d| d.stripes.clone()).unwrap_or_default();
            for stripe in stripes {
                if stripe >= current_total || self.is_lost_marker(stripe) {
                    continue;
                }

                if permanent {
                    self.slice_degraded(stripe);
                } else {
                    self.slice_degraded_availability(stripe);
                }

                let repairable_before = self.is_repairable(stripe);
                let Some(index) = self.placement.chunk_index_on(stripe, disk) else {
                    return Err(Error::invariant(format!(
                        "stripe {stripe} registered on disk {disk} without a chunk there"
                    )));
                };
                let StripeStatus::Active(state) = &mut self.status[stripe] else {
                    continue;
                };
                if state[index] == ChunkHealth::Corrupted {
                    continue;
                }
                if permanent {
                    state[index] = ChunkHealth::Corrupted;
                } else if state[index] == ChunkHealth::Normal {
                    state[index] = ChunkHealth::Crashed;
                }

                if repairable_before && !self.is_repairable(stripe) {
                    self.unavailable_count += 1;
                    self.start_unavailable(stripe, time);
                }

                let degraded_enough =
                    self.available_count(stripe) <= self.recovery_threshold;
                if let Some(rafi) = &mut self.rafi {
                    let end = event.next_recovery_time.unwrap_or(time);
                    let (transition, failures) = rafi.on_failure(stripe, time, end);
                    let risky = matches!(
                        transition,
                        RafiTransition::OutToIn | RafiTransition::InToIn
                    );
                    if risky && degraded_enough {
                        rafi_batches.entry(failures).or_default().push(stripe);
                    }
                }

                if permanent && self.is_lost(stripe) {
                    self.mark_lost(stripe, time, LossCause::Machine, machine, topo);
                }
            }
        }

        if let Some(rafi) = &mut self.rafi {
            for (failures, stripes) in rafi_batches {
                let recover_time = time + rafi.detect_interval(failures);
                let seq = queue.push(
                    Event::new(EventKind::RafiRecovered, recover_time, machine)
                        .with_payload(EventPayload::StripeSet(stripes.clone())),
                );
                for stripe in stripes {
                    rafi.set_pending(stripe, seq);
                }
            }
        }
        Ok(())
    }

    fn disk_failure(&mut self, disk: NodeId, event: &Event, topo: &mut Topology) -> Result<()> {
        let time = event.time;
        let current_total = self.schedule.live_at(time);
        self.counters.disk_failures += 1;
        topo.node_mut(disk).last_failure_time = time;

        let mut projected_bandwidth = 0.0;
        let stripes = topo.disk(disk).map(|d| d.stripes.clone()).unwrap_or_default();
        for stripe in stripes {
            if stripe >= current_total || self.is_lost_marker(stripe) {
                continue;
            }

            self.slice_degraded(stripe);
            let repairable_before = self.is_repairable(stripe);

            let Some(index) = self.placement.chunk_index_on(stripe, disk) else {
                return Err(Error::invariant(format!(
                    "stripe {stripe} registered on disk {disk} without a chunk there"
                )));
            };
            let StripeStatus::Active(state) = &mut self.status[stripe] else {
                continue;
            };
            if state[index] == ChunkHealth::Corrupted {
                continue;
            }
            state[index] = ChunkHealth::Corrupted;

            if repairable_before && !self.is_repairable(stripe) {
                self.unavailable_count += 1;
                self.start_unavailable(stripe, time);
            }

            if self.is_lost(stripe) {
                self.mark_lost(stripe, time, LossCause::Disk, disk, topo);
                continue;
            }

            if self.threshold_crossed(stripe, self.recovery_threshold) {
                projected_bandwidth +=
                    (self.k - 1 + (self.n - self.available_count(stripe))) as f64;
            }
        }

        // Spread the projected transfer over the repair window.
        if let Some(outage) = event.outage() {
            if outage > 0.0 {
                projected_bandwidth /= outage;
            }
        }
        topo.node_mut(disk).last_bandwidth_need = projected_bandwidth;
        self.raise_bandwidth(projected_bandwidth);
        Ok(())
    }

    // ---- recoveries -----------------------------------------------------

    fn handle_recovery(
        &mut self,
        unit: NodeId,
        event: &Event,
        queue: &mut EventQueue,
        topo: &mut Topology,
        rng: &mut StdRng,
    ) -> Result<()> {
        if event.ignore {
            return Ok(());
        }
        match topo.node(unit).kind {
            NodeKind::Machine(_) => self.machine_recovery(unit, event, queue, topo),
            NodeKind::Disk(_) => self.disk_recovery(unit, event, queue, topo),
            _ => {
                let children = topo.node(unit).children.clone();
                for child in children {
                    self.handle_recovery(child, event, queue, topo, rng)?;
                }
                Ok(())
            }
        }
    }

    fn machine_recovery(
        &mut self,
        machine: NodeId,
        event: &Event,
        queue: &mut EventQueue,
        topo: &mut Topology,
    ) -> Result<()> {
        let time = event.time;
        let current_total = self.schedule.live_at(time);

        if event.info.is_transient() {
            self.counters.machine_repairs += 1;
            let disks = topo.node(machine).children.clone();
            for disk in disks {
                let stripes = topo.disk(disk).map(|d| d.stripes.clone()).unwrap_or_default();
                for stripe in stripes {
                    if stripe >= current_total || self.is_lost_marker(stripe) {
                        continue;
                    }

                    if let Some(rafi) = &mut self.rafi {
                        rafi.on_natural_recovery(stripe, time);
                    }

                    if self.available_count(stripe) < self.n {
                        let repairable_before = self.is_repairable(stripe);
                        let Some(index) = self.placement.chunk_index_on(stripe, disk) else {
                            continue;
                        };
                        if let StripeStatus::Active(state) = &mut self.status[stripe] {
                            if state[index] == ChunkHealth::Crashed {
                                state[index] = ChunkHealth::Normal;
                            }
                        }
                        self.slice_recovered_availability(stripe);
                        if !repairable_before && self.is_repairable(stripe) {
                            self.end_unavailable(stripe, time);
                        }
                    } else if event.info == EventInfo::ShortTransient {
                        // A repair inside the fail timeout already rebuilt
                        // chunks this outage took down.
                        self.counters.anomalous_available += 1;
                        warn!(stripe, time, "anomalous available count");
                    }
                }
            }
            return Ok(());
        }

        // Permanent machine loss: rebuild, possibly through the queue.
        if event.info == EventInfo::QueuedRequeue || self.contention.is_none() {
            self.counters.machine_repairs += 1;
            let disks = topo.node(machine).children.clone();
            for disk in disks {
                self.rebuild_disk_stripes(disk, time, current_total, topo)?;
            }
            Ok(())
        } else {
            let racks = self.repair_rack_set(machine, topo);
            if racks.is_empty() {
                return Ok(());
            }
            let duration = self.repair_times.node;
            let sources = self.scheme.repair_sources();
            let contention = self.contention.as_mut().expect("queue enabled");
            let recovery_time = contention.occupy(time - duration, &racks, sources, duration);
            queue.push(
                Event::new(EventKind::Recovered, recovery_time, machine)
                    .with_info(EventInfo::QueuedRequeue),
            );
            Ok(())
        }
    }

    fn disk_recovery(
        &mut self,
        disk: NodeId,
        event: &Event,
        queue: &mut EventQueue,
        topo: &mut Topology,
    ) -> Result<()> {
        let time = event.time;
        let current_total = self.schedule.live_at(time);

        if event.info != EventInfo::QueuedRequeue && self.contention.is_some() {
            let racks = self.repair_rack_set(disk, topo);
            if racks.is_empty() {
                // An empty disk has nothing queuing for repair.
                return Ok(());
            }
            let duration = self.repair_times.disk;
            let sources = self.scheme.repair_sources();
            let contention = self.contention.as_mut().expect("queue enabled");
            let recovery_time = contention.occupy(time - duration, &racks, sources, duration);
            queue.push(
                Event::new(EventKind::Recovered, recovery_time, disk)
                    .with_info(EventInfo::QueuedRequeue),
            );
            return Ok(());
        }

        self.counters.disk_repairs += 1;
        let need = topo.node(disk).last_bandwidth_need;
        topo.node_mut(disk).last_bandwidth_need = 0.0;
        self.release_bandwidth(need)?;

        self.rebuild_disk_stripes(disk, time, current_total, topo)
    }

    /// Rebuild the threshold-crossing stripes hosted on a disk
    fn rebuild_disk_stripes(
        &mut self,
        disk: NodeId,
        time: f64,
        current_total: usize,
        topo: &mut Topology,
    ) -> Result<()> {
        let stripes = topo.disk(disk).map(|d| d.stripes.clone()).unwrap_or_default();
        for stripe in stripes {
            if stripe >= current_total || self.is_lost_marker(stripe) {
                continue;
            }
            if !self.is_repairable(stripe) {
                continue;
            }

            if let Some(rafi) = &mut self.rafi {
                // Stripes still carrying live failure records belong to
                // the RAFI rebuild path.
                if !rafi.on_natural_recovery(stripe, time) {
                    continue;
                }
            }

            // Recomputed per stripe: repairs drain the degraded backlog,
            // which can snap the threshold back mid-loop.
            let threshold = self.lazy_threshold(current_total);
            if !self.threshold_crossed(stripe, threshold) {
                continue;
            }

            let Some(index) = self.placement.chunk_index_on(stripe, disk) else {
                continue;
            };
            let damaged = self
                .state(stripe)
                .is_some_and(|s| s[index].is_lost());
            if damaged {
                let repairable_before = self.is_repairable(stripe);
                let transferred =
                    if self.conf.recovery.lazy_recovery || self.conf.recovery.parallel_repair {
                        self.parallel_repair(stripe, false)?
                    } else {
                        self.repair(stripe, index)?
                    };
                if let Some(info) = topo.disk_mut(disk) {
                    info.lse_stripes.retain(|s| *s != stripe);
                }
                self.charge_repair(transferred);

                if !repairable_before && self.is_repairable(stripe) {
                    self.end_unavailable(stripe, time);
                }
            }
            // must come after all counters are updated
            self.slice_recovered(stripe);
        }
        Ok(())
    }

    /// Racks a repair for `unit` (disk or machine) streams across
    fn repair_rack_set(&self, unit: NodeId, topo: &Topology) -> Vec<NodeId> {
        if self.conf.placement.data_placement == PlacementFamily::Sss {
            return topo.racks();
        }
        let own_disks: Vec<NodeId> = match topo.node(unit).kind {
            NodeKind::Disk(_) => vec![unit],
            _ => topo.disks_under(unit),
        };
        let mut racks = Vec::new();
        for group in &self.placement.groups {
            if !own_disks.iter().any(|d| group.contains(d)) {
                continue;
            }
            for member in group {
                if own_disks.contains(member) {
                    continue;
                }
                if let Some(rack) = topo.rack_of(*member) {
                    if !racks.contains(&rack) {
                        racks.push(rack);
                    }
                }
            }
        }
        racks
    }

    // ---- latent errors and scrubs ---------------------------------------

    fn handle_latent_defect(
        &mut self,
        disk: NodeId,
        event: &Event,
        topo: &mut Topology,
        rng: &mut StdRng,
    ) -> Result<()> {
        if !matches!(topo.node(disk).kind, NodeKind::Disk(_)) {
            return Err(Error::invariant(
                "latent defect raised on a non-disk component",
            ));
        }
        let time = event.time;
        let current_total = self.schedule.live_at(time);

        let stripes = topo.disk(disk).map(|d| d.stripes.clone()).unwrap_or_default();
        let Some(stripe) = stripes.choose(rng).copied() else {
            return Ok(());
        };
        if stripe >= current_total {
            return Ok(());
        }
        if self.is_lost_marker(stripe) {
            self.counters.skipped_latent += 1;
            return Ok(());
        }

        let repairable_before = self.is_repairable(stripe);
        let Some(index) = self.placement.chunk_index_on(stripe, disk) else {
            return Err(Error::invariant(format!(
                "stripe {stripe} registered on disk {disk} without a chunk there"
            )));
        };
        // An LSE cannot hit lost chunks, nor one chunk twice.
        let already_lost = self
            .state(stripe)
            .is_some_and(|s| s[index].is_lost());
        if already_lost {
            self.counters.skipped_latent += 1;
            return Ok(());
        }

        self.slice_degraded(stripe);
        if let StripeStatus::Active(state) = &mut self.status[stripe] {
            state[index] = ChunkHealth::LatentError;
        }
        if let Some(info) = topo.disk_mut(disk) {
            info.lse_stripes.push(stripe);
        }
        self.counters.latent_failures += 1;

        if repairable_before && !self.is_repairable(stripe) {
            self.unavailable_count += 1;
            self.start_unavailable(stripe, time);
        }
        if self.is_lost(stripe) {
            self.mark_lost(stripe, time, LossCause::Lse, disk, topo);
        }
        Ok(())
    }

    fn handle_latent_recovered(
        &mut self,
        disk: NodeId,
        event: &Event,
        topo: &mut Topology,
    ) -> Result<()> {
        if !matches!(topo.node(disk).kind, NodeKind::Disk(_)) {
            return Err(Error::invariant("scrub raised on a non-disk component"));
        }
        let time = event.time;
        let current_total = self.schedule.live_at(time);
        self.counters.scrubs += 1;

        let hit = topo
            .disk(disk)
            .map(|d| d.lse_stripes.clone())
            .unwrap_or_default();
        for stripe in hit {
            if stripe >= current_total || self.is_lost_marker(stripe) {
                continue;
            }
            if !self.is_repairable(stripe) {
                continue;
            }
            let Some(index) = self.placement.chunk_index_on(stripe, disk) else {
                continue;
            };
            let latent = self
                .state(stripe)
                .is_some_and(|s| s[index] == ChunkHealth::LatentError);
            if !latent {
                continue;
            }

            self.counters.scrub_repairs += 1;
            let transferred = self.repair(stripe, index)?;
            if let Some(info) = topo.disk_mut(disk) {
                info.lse_stripes.retain(|s| *s != stripe);
            }
            self.charge_repair(transferred);
            self.slice_recovered(stripe);
        }
        Ok(())
    }

    // ---- eager recovery -------------------------------------------------

    fn handle_eager_start(
        &mut self,
        event: &Event,
        queue: &mut EventQueue,
        topo: &mut Topology,
        rng: &mut StdRng,
    ) -> Result<()> {
        let machine = event.node;
        if !matches!(topo.node(machine).kind, NodeKind::Machine(_)) {
            return Err(Error::invariant("eager recovery on a non-machine"));
        }
        let Some(machine_recovery) = event.next_recovery_time else {
            return Ok(());
        };
        let time = event.time;
        if machine_recovery <= time {
            return Ok(());
        }
        self.counters.eager_machine_repairs += 1;
        topo.node_mut(machine).last_failure_time = time;

        // Spare bandwidth drives the whole eager window; the chunk budget
        // is what that rate can move before the machine itself recovers.
        let mut rate = self.conf.recovery.recovery_bandwidth_cross_rack
            - self.current_recovery_bandwidth;
        if rate <= 0.0 {
            return Ok(());
        }
        let window = machine_recovery - time;
        let budget = ((rate / self.chunk_size) * window) as usize;
        if budget < 1 {
            return Ok(());
        }
        rate = budget as f64 * self.chunk_size / window;
        self.raise_bandwidth(rate);

        let installment_size = self.conf.recovery.installment_size;
        let mut current_size = installment_size.min(budget);
        let mut batch: Vec<usize> = Vec::new();
        let mut total_chunks = 0_usize;
        let mut batch_chunks = 0_usize;
        let mut batch_time = time;

        let disks = topo.node(machine).children.clone();
        for disk in disks {
            let stripes = topo.disk(disk).map(|d| d.stripes.clone()).unwrap_or_default();
            for stripe in stripes {
                // This timeout expiry is the first moment the system has
                // recognized the failure; fully available stripes here are
                // the timeout-boundary anomaly.
                if self.available_count(stripe) >= self.n {
                    self.counters.anomalous_available += 1;
                }
                if self.is_lost_marker(stripe) {
                    continue;
                }

                let drain = current_size as f64 * self.chunk_size / rate;
                let threshold = self.conf.recovery.available_lazy_threshold(
                    self.n,
                    batch_time + drain - time,
                    rng,
                );
                if !self.threshold_crossed(stripe, threshold) {
                    continue;
                }

                let crashed = self
                    .state(stripe)
                    .map_or(0, |s| s.iter().filter(|c| **c == ChunkHealth::Crashed).count());
                batch.push(stripe);
                total_chunks += self.k + crashed - 1;
                batch_chunks += self.k + crashed - 1;

                if batch_chunks + self.k < current_size {
                    continue;
                }

                // Installment full: drain it and open the next one.
                batch_time += batch_chunks as f64 * self.chunk_size / rate;
                let last = total_chunks + self.k >= budget;
                queue.push(
                    Event::new(EventKind::EagerRecoveryInstallment, batch_time, machine)
                        .with_payload(EventPayload::Installment(InstallmentSet {
                            stripes: std::mem::take(&mut batch),
                            original_failure_time: time,
                            batch_start: batch_time,
                            bandwidth_need: last.then_some(rate),
                        })),
                );
                if last {
                    return Ok(());
                }
                current_size = installment_size.min(budget - total_chunks);
                batch_chunks = 0;
            }
        }

        if batch.is_empty() {
            // Nothing to recover eagerly: give the bandwidth back.
            self.release_bandwidth(rate)?;
            return Ok(());
        }
        batch_time += batch_chunks as f64 * self.chunk_size / rate;
        queue.push(
            Event::new(EventKind::EagerRecoveryInstallment, batch_time, machine).with_payload(
                EventPayload::Installment(InstallmentSet {
                    stripes: batch,
                    original_failure_time: time,
                    batch_start: batch_time,
                    bandwidth_need: Some(rate),
                }),
            ),
        );
        Ok(())
    }

    fn handle_eager_installment(
        &mut self,
        event: &Event,
        topo: &mut Topology,
        rng: &mut StdRng,
    ) -> Result<()> {
        let Some(payload) = &event.payload else {
            return Ok(());
        };
        let EventPayload::Installment(set) = payload.as_ref() else {
            return Ok(());
        };
        let time = event.time;

        for &stripe in &set.stripes {
            if self.is_lost_marker(stripe) {
                continue;
            }
            let threshold = self.conf.recovery.available_lazy_threshold(
                self.n,
                time - set.original_failure_time,
                rng,
            );
            if !self.threshold_crossed(stripe, threshold) {
                continue;
            }
            if self.is_lost(stripe) {
                self.mark_lost(stripe, time, LossCause::Machine, event.node, topo);
                continue;
            }
            if !self.is_repairable(stripe) {
                continue;
            }

            self.counters.eager_slice_repairs += 1;
            if self.conf.recovery.lazy_recovery {
                let transferred = self.parallel_repair(stripe, false)?;
                self.charge_repair(transferred);
                self.slice_recovered(stripe);
            } else {
                if self.available_count(stripe) >= self.n {
                    continue;
                }
                if self.available_count(stripe) == self.k - 1 {
                    self.end_unavailable(stripe, time);
                }
                let crashed = self
                    .state(stripe)
                    .and_then(|s| s.iter().position(|c| *c == ChunkHealth::Crashed));
                let Some(index) = crashed else {
                    warn!(stripe, "no crashed chunk for eager repair");
                    continue;
                };
                let transferred = self.repair(stripe, index)?;
                self.charge_repair(transferred);
                self.slice_recovered(stripe);
            }
        }

        if let Some(rate) = set.bandwidth_need {
            self.release_bandwidth(rate)?;
        }
        Ok(())
    }

    // ---- RAFI -----------------------------------------------------------

    fn handle_rafi_recovered(
        &mut self,
        seq: u64,
        event: &Event,
        topo: &mut Topology,
    ) -> Result<()> {
        if event.ignore {
            return Ok(());
        }
        let Some(payload) = &event.payload else {
            return Ok(());
        };
        let EventPayload::StripeSet(stripes) = payload.as_ref() else {
            return Ok(());
        };
        let time = event.time;

        for &stripe in stripes {
            let current = self
                .rafi
                .as_mut()
                .is_some_and(|r| r.take_if_current(stripe, seq));
            if !current {
                continue;
            }
            if self.is_lost_marker(stripe) {
                continue;
            }
            if self.is_lost(stripe) {
                self.mark_lost(stripe, time, LossCause::Machine, event.node, topo);
                continue;
            }
            if !self.is_repairable(stripe) {
                continue;
            }
            let transferred = self.parallel_repair(stripe, true)?;
            self.charge_repair(transferred);
            self.slice_recovered(stripe);
        }
        Ok(())
    }

    // ---- finish ---------------------------------------------------------

    /// Snapshot the run into a result record
    pub fn finish(self) -> SimResult {
        let undurable_count = self.undurable_infos.len() as u64;
        let pdl = undurable_count as f64 / self.total_slices.max(1) as f64;

        let stripe_hours = self.schedule.stripe_hours();
        let end_time = self.end_time;
        let unavailable_hours: f64 = self
            .unavailable_durations
            .values()
            .flat_map(|windows| {
                windows
                    .iter()
                    .map(move |(start, end)| end.unwrap_or(end_time) - start)
            })
            .sum();
        let pua = if stripe_hours > 0.0 {
            unavailable_hours / stripe_hours
        } else {
            0.0
        };

        // Bytes lost per TiB stored.
        let chunk_bytes = self.chunk_size * f64::from(1u32 << 20);
        let stored_tib = self.conf.cluster.total_active_storage * f64::from(1u32 << 10);
        let nomdl = undurable_count as f64 * chunk_bytes * self.k as f64 / stored_tib;

        let (queue_times, avg_queue_time) = self
            .contention
            .as_ref()
            .map_or((0, 0.0), FifoContention::statistics);

        info!(
            undurable_count,
            unavailable = self.unavailable_count,
            pdl,
            pua,
            nomdl,
            trc_mib = self.total_repair_transfers,
            max_recovery_bandwidth = self.max_recovery_bandwidth,
            total_repairs = self.counters.repairs,
            optimal_repairs = self.counters.optimal_repairs,
            anomalous_available = self.counters.anomalous_available,
            skipped_latent = self.counters.skipped_latent,
            "simulation finished"
        );

        SimResult {
            undurable_count,
            unavailable_count: self.unavailable_count,
            undurable_infos: self.undurable_infos,
            unavailable_durations: self
                .unavailable_durations
                .into_iter()
                .map(|(stripe, windows)| {
                    let closed = windows
                        .into_iter()
                        .map(|(start, end)| (start, end.unwrap_or(end_time)))
                        .collect();
                    (stripe, closed)
                })
                .collect(),
            pdl,
            pua,
            nomdl,
            total_repair_transfers: self.total_repair_transfers,
            max_recovery_bandwidth: self.max_recovery_bandwidth,
            queue_times,
            avg_queue_time,
            counters: self.counters,
        }
    }
}
