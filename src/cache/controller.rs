//! The top-level cache controller.
//!
//! Exposes the packet API (`add_rq` / `add_wq` / `add_pq` / `return_data` /
//! `get_occupancy` / `get_size`) and the per-tick scheduler `operate`, which
//! drains the queues in the fixed order fill → writeback → read →
//! (conditionally) prefetch. The controller owns the tag arrays, the
//! replacement policy, the MSHR, and every statistic the report prints.
//!
//! Collaborators are passed into `operate` each tick rather than stored:
//! the level below implements [`Downstream`], the per-core return paths are
//! [`CorePort`]s. This keeps the hierarchy free of reference cycles.

use tracing::{debug, trace};

use crate::cache::block::{CompressedSlot, EVICT_ALL};
use crate::cache::packet::{AccessType, Packet, QueueKind};
use crate::cache::queues::{Enqueue, Mshr, PacketQueue};
use crate::cache::tag_array::{BaselineTagArray, FillSlot, SuperblockTagArray};
use crate::compression::bdi;
use crate::compression::CompressionTracker;
use crate::config::{CacheConfig, MAX_READ_PER_CYCLE};
use crate::replacement::{HawkeyePolicy, ReplacementDecision};
use crate::stats::CacheStats;

// ─────────────────────────────────────────────────────────────────────────────
// Collaborator interfaces
// ─────────────────────────────────────────────────────────────────────────────

/// Result of handing a packet to a queue-owning component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    Accepted,
    Merged,
    Full,
}

/// The memory level below this cache.
pub trait Downstream {
    fn add_rq(&mut self, packet: &Packet, now: u64) -> RequestOutcome;
    fn add_wq(&mut self, packet: &Packet, now: u64) -> RequestOutcome;
    fn add_pq(&mut self, packet: &Packet, now: u64) -> RequestOutcome;
    fn get_occupancy(&self, queue: QueueKind, address: u64) -> usize;
    fn get_size(&self, queue: QueueKind, address: u64) -> usize;
    fn increment_wq_full(&mut self, address: u64);
}

/// Per-core upstream return path. Completed packets are parked here for the
/// core model (or a test) to collect.
#[derive(Clone, Debug, Default)]
pub struct CorePort {
    pub instruction_returns: Vec<Packet>,
    pub data_returns: Vec<Packet>,
}

impl CorePort {
    pub fn return_data(&mut self, packet: &Packet) {
        if packet.instruction {
            self.instruction_returns.push(packet.clone());
        } else {
            self.data_returns.push(packet.clone());
        }
    }

    pub fn drain(&mut self) -> Vec<Packet> {
        let mut out = std::mem::take(&mut self.instruction_returns);
        out.append(&mut self.data_returns);
        out
    }
}

/// Outcome of the public enqueue API.
#[derive(Clone, Debug, PartialEq)]
pub enum AddOutcome {
    /// Satisfied immediately (forwarded from a pending writeback); the
    /// packet carries the data.
    Serviced(Box<Packet>),
    Queued,
    Merged,
    Full,
}

/// Simple DRAM stand-in: unbounded queues, fixed latency, everything
/// accepted. Reads come back through `operate`.
#[derive(Clone, Debug)]
pub struct MainMemory {
    latency: u64,
    pending: std::collections::VecDeque<Packet>,
    pub reads: u64,
    pub writes: u64,
    pub wq_full_signals: u64,
}

impl MainMemory {
    pub fn new(latency: u64) -> Self {
        Self {
            latency,
            pending: std::collections::VecDeque::new(),
            reads: 0,
            writes: 0,
            wq_full_signals: 0,
        }
    }

    /// Deliver every response whose latency has elapsed.
    pub fn operate(&mut self, now: u64, llc: &mut Cache) {
        while let Some(front) = self.pending.front() {
            if front.event_cycle > now {
                break;
            }
            let packet = self.pending.pop_front().expect("non-empty");
            llc.return_data(&packet, now);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl Downstream for MainMemory {
    fn add_rq(&mut self, packet: &Packet, now: u64) -> RequestOutcome {
        let mut p = packet.clone();
        p.event_cycle = now + self.latency;
        self.pending.push_back(p);
        self.reads += 1;
        RequestOutcome::Accepted
    }

    fn add_wq(&mut self, _packet: &Packet, _now: u64) -> RequestOutcome {
        self.writes += 1;
        RequestOutcome::Accepted
    }

    fn add_pq(&mut self, packet: &Packet, now: u64) -> RequestOutcome {
        self.add_rq(packet, now)
    }

    fn get_occupancy(&self, _queue: QueueKind, _address: u64) -> usize {
        0
    }

    fn get_size(&self, _queue: QueueKind, _address: u64) -> usize {
        usize::MAX
    }

    fn increment_wq_full(&mut self, _address: u64) {
        self.wq_full_signals += 1;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// The cache
// ─────────────────────────────────────────────────────────────────────────────

/// What a fill attempt produced.
enum Allocation {
    Filled { set: usize, way: usize, slot: usize },
    Stalled,
    Bypassed,
}

pub struct Cache {
    pub name: String,
    cfg: CacheConfig,

    tags: SuperblockTagArray,
    baseline: BaselineTagArray,
    pub policy: HawkeyePolicy,

    rq: PacketQueue,
    wq: PacketQueue,
    pq: PacketQueue,
    mshr: Mshr,

    pub stats: CacheStats,
    pub tracker: CompressionTracker,
}

impl Cache {
    pub fn new(name: impl Into<String>, cfg: CacheConfig) -> Self {
        cfg.validate().expect("invalid cache configuration");
        Self {
            name: name.into(),
            tags: SuperblockTagArray::new(cfg.num_sets, cfg.num_ways),
            baseline: BaselineTagArray::new(cfg.num_sets, cfg.num_ways),
            policy: HawkeyePolicy::new(&cfg),
            rq: PacketQueue::new(cfg.rq_size),
            wq: PacketQueue::new(cfg.wq_size),
            pq: PacketQueue::new(cfg.pq_size),
            mshr: Mshr::new(cfg.mshr_size),
            stats: CacheStats::new(cfg.num_cpus),
            tracker: CompressionTracker::new(),
            cfg,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    pub fn tags(&self) -> &SuperblockTagArray {
        &self.tags
    }

    /// Clear measurement state at the end of warmup.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    // ── Public packet API ────────────────────────────────────────────────────

    /// Queue a read. A read matching a pending writeback is serviced from
    /// the write queue without touching the tag array.
    pub fn add_rq(&mut self, packet: &Packet, now: u64) -> AddOutcome {
        if let Some(wi) = self.wq.check_queue(packet.address) {
            let mut serviced = packet.clone();
            serviced.data = self.wq.entry(wi).data;
            serviced.program_data = self.wq.entry(wi).program_data;
            self.stats.record_hit(packet.cpu, packet.kind);
            self.wq.forward += 1;
            self.rq.access += 1;
            trace!(address = packet.address, "rq forwarded from wq");
            return AddOutcome::Serviced(Box::new(serviced));
        }

        if self.rq.check_queue(packet.address).is_some() {
            self.rq.merged += 1;
            self.rq.access += 1;
            return AddOutcome::Merged;
        }

        if self.rq.is_full() {
            self.rq.full += 1;
            return AddOutcome::Full;
        }

        let mut p = packet.clone();
        p.event_cycle = Self::charged_cycle(p.event_cycle, now, self.cfg.latency);
        let pushed = self.rq.push(p);
        debug_assert!(matches!(pushed, Enqueue::Inserted(_)));
        self.rq.to_cache += 1;
        self.rq.access += 1;
        AddOutcome::Queued
    }

    /// Queue a writeback.
    pub fn add_wq(&mut self, packet: &Packet, now: u64) -> AddOutcome {
        if self.wq.check_queue(packet.address).is_some() {
            self.wq.merged += 1;
            self.wq.access += 1;
            return AddOutcome::Merged;
        }
        if self.wq.is_full() {
            self.wq.full += 1;
            return AddOutcome::Full;
        }
        let mut p = packet.clone();
        p.event_cycle = Self::charged_cycle(p.event_cycle, now, self.cfg.latency);
        self.wq.push(p);
        self.wq.to_cache += 1;
        self.wq.access += 1;
        AddOutcome::Queued
    }

    /// Queue a prefetch. Duplicates merge, tightening the fill level.
    pub fn add_pq(&mut self, packet: &Packet, now: u64) -> AddOutcome {
        if let Some(wi) = self.wq.check_queue(packet.address) {
            let mut serviced = packet.clone();
            serviced.data = self.wq.entry(wi).data;
            serviced.program_data = self.wq.entry(wi).program_data;
            self.stats.record_hit(packet.cpu, packet.kind);
            self.wq.forward += 1;
            self.pq.access += 1;
            return AddOutcome::Serviced(Box::new(serviced));
        }

        if let Some(i) = self.pq.check_queue(packet.address) {
            let entry = self.pq.entry_mut(i);
            if packet.fill_level < entry.fill_level {
                entry.fill_level = packet.fill_level;
            }
            self.pq.merged += 1;
            self.pq.access += 1;
            return AddOutcome::Merged;
        }

        if self.pq.is_full() {
            self.pq.full += 1;
            return AddOutcome::Full;
        }

        let mut p = packet.clone();
        p.event_cycle = Self::charged_cycle(p.event_cycle, now, self.cfg.latency);
        self.pq.push(p);
        self.pq.to_cache += 1;
        self.pq.access += 1;
        AddOutcome::Queued
    }

    /// Issue a prefetch for `pf_addr` on behalf of `cpu`.
    pub fn prefetch_line(&mut self, cpu: usize, ip: u64, pf_addr: u64, level: u32, now: u64) -> bool {
        self.stats.pf_requested += 1;
        if self.pq.is_full() {
            return false;
        }
        let mut packet = Packet::new(cpu, AccessType::Prefetch, pf_addr).with_ip(ip);
        packet.fill_level = level;
        packet.event_cycle = now;
        match self.add_pq(&packet, now) {
            AddOutcome::Full => false,
            _ => {
                self.stats.pf_issued += 1;
                true
            }
        }
    }

    /// Data returning from downstream for an in-flight miss.
    pub fn return_data(&mut self, packet: &Packet, now: u64) {
        let index = self
            .mshr
            .on_return(packet, now)
            .unwrap_or_else(|| panic!("{}: return_data with no matching MSHR entry", self.name));
        self.mshr.bump_event_cycle(index, now, self.cfg.latency);
        self.mshr.update_fill_cycle();
    }

    pub fn get_occupancy(&self, queue: QueueKind, _address: u64) -> usize {
        match queue {
            QueueKind::Mshr => self.mshr.occupancy(),
            QueueKind::Rq => self.rq.occupancy(),
            QueueKind::Wq => self.wq.occupancy(),
            QueueKind::Pq => self.pq.occupancy(),
        }
    }

    pub fn get_size(&self, queue: QueueKind, _address: u64) -> usize {
        match queue {
            QueueKind::Mshr => self.mshr.size(),
            QueueKind::Rq => self.rq.size(),
            QueueKind::Wq => self.wq.size(),
            QueueKind::Pq => self.pq.size(),
        }
    }

    pub fn increment_wq_full(&mut self, _address: u64) {
        self.wq.full += 1;
    }

    /// One scheduler tick: fills, then writebacks, then reads, then — only
    /// when the read queue is idle — prefetches.
    pub fn operate(&mut self, now: u64, lower: &mut dyn Downstream, cores: &mut [CorePort]) {
        self.handle_fill(now, lower, cores);
        self.handle_writeback(now, lower, cores);
        self.handle_read(now, lower, cores);
        if self.pq.occupancy() > 0 && self.rq.occupancy() == 0 {
            self.handle_prefetch(now, lower, cores);
        }
    }

    fn charged_cycle(event_cycle: u64, now: u64, latency: u64) -> u64 {
        if event_cycle < now {
            now + latency
        } else {
            event_cycle + latency
        }
    }

    fn route_up(&self, cores: &mut [CorePort], packet: &Packet) {
        if packet.fill_level < self.cfg.fill_level {
            cores[packet.cpu].return_data(packet);
        }
    }

    // ── Fill path ────────────────────────────────────────────────────────────

    fn handle_fill(&mut self, now: u64, lower: &mut dyn Downstream, cores: &mut [CorePort]) {
        let Some(index) = self.mshr.ready_fill(now) else {
            return;
        };
        let packet = self.mshr.entry(index).clone();

        match self.allocate(&packet, now, lower) {
            Allocation::Stalled => {
                self.stats.stall[packet.kind.index()] += 1;
            }
            Allocation::Bypassed => {
                self.stats.record_miss(packet.cpu, packet.kind);
                self.stats.bypassed += 1;
                self.route_up(cores, &packet);
                self.mshr.remove(index);
                self.mshr.update_fill_cycle();
            }
            Allocation::Filled { .. } => {
                self.stats.record_miss(packet.cpu, packet.kind);
                if packet.kind == AccessType::Prefetch {
                    self.stats.pf_fill += 1;
                }
                self.route_up(cores, &packet);
                self.mshr.remove(index);
                self.mshr.update_fill_cycle();
            }
        }
    }

    /// Find room for a line and install it, honouring the writeback
    /// discipline. Shared by the MSHR fill path and writeback misses.
    fn allocate(&mut self, packet: &Packet, now: u64, lower: &mut dyn Downstream) -> Allocation {
        if self.cfg.compressed_cache {
            self.allocate_compressed(packet, now, lower)
        } else {
            self.allocate_baseline(packet, now, lower)
        }
    }

    fn allocate_compressed(
        &mut self,
        packet: &Packet,
        now: u64,
        lower: &mut dyn Downstream,
    ) -> Allocation {
        let compressed_size = bdi::fill_compress(&packet.program_data);
        let cf = crate::compression::compression_factor(compressed_size);
        let set = self.tags.set_of(packet.address);

        let probe = self.policy.probe(packet.cpu, set, packet.address, packet.kind);

        let (way, slot) = match self.tags.find_fill_slot(packet.address, cf) {
            FillSlot::InSuperblock { way, slot } => (way, slot),
            FillSlot::EmptyWay { way } => (way, 0),
            FillSlot::NeedVictim => {
                let prediction = self.policy.predict(packet.ip, packet.kind);
                let allow_bypass = self.cfg.llc_bypass && packet.kind != AccessType::Writeback;
                let decision = self.policy.find_victim(
                    set,
                    prediction,
                    allow_bypass,
                    self.tags.ways(set),
                );
                match decision {
                    ReplacementDecision::Bypass => {
                        self.policy.update_bypass(
                            packet.cpu,
                            set,
                            packet.address,
                            packet.ip,
                            packet.kind,
                        );
                        return Allocation::Bypassed;
                    }
                    ReplacementDecision::Way(way) => {
                        if !self.evict_way(set, way, packet, now, lower) {
                            return Allocation::Stalled;
                        }
                        (way, 0)
                    }
                }
            }
        };

        let overwritten = self.tags.slot(set, way, slot);
        if overwritten.valid && overwritten.prefetch && !overwritten.used {
            self.stats.pf_useless += 1;
        }

        self.tags.fill(set, way, slot, packet, cf, compressed_size);
        self.tracker.increment(cf);
        self.policy.update(
            packet.cpu,
            set,
            probe,
            packet.address,
            packet.ip,
            packet.kind,
            compressed_size,
            Some(self.tags.ways(set)),
        );
        debug!(set, way, slot, address = packet.address, cf, "allocated");
        Allocation::Filled { set, way, slot }
    }

    fn allocate_baseline(
        &mut self,
        packet: &Packet,
        now: u64,
        lower: &mut dyn Downstream,
    ) -> Allocation {
        let set = self.baseline.set_of(packet.address);
        let probe = self.policy.probe(packet.cpu, set, packet.address, packet.kind);

        let invalid = (0..self.cfg.num_ways).find(|&w| !self.baseline.way(set, w).valid);
        let way = match invalid {
            Some(w) => w,
            None => {
                let prediction = self.policy.predict(packet.ip, packet.kind);
                let allow_bypass = self.cfg.llc_bypass && packet.kind != AccessType::Writeback;
                match self.policy.find_victim(set, prediction, allow_bypass, &[]) {
                    ReplacementDecision::Bypass => {
                        self.policy.update_bypass(
                            packet.cpu,
                            set,
                            packet.address,
                            packet.ip,
                            packet.kind,
                        );
                        return Allocation::Bypassed;
                    }
                    ReplacementDecision::Way(w) => {
                        let victim = self.baseline.way(set, w);
                        if victim.valid && victim.dirty {
                            if Self::wq_has_no_room(lower, victim.address) {
                                lower.increment_wq_full(victim.address);
                                return Allocation::Stalled;
                            }
                            let wb = self.writeback_packet_baseline(set, w, packet, now);
                            lower.add_wq(&wb, now);
                        }
                        if victim.valid && victim.prefetch && !victim.used {
                            self.stats.pf_useless += 1;
                        }
                        w
                    }
                }
            }
        };

        self.baseline.fill(set, way, packet);
        self.policy.update(
            packet.cpu,
            set,
            probe,
            packet.address,
            packet.ip,
            packet.kind,
            crate::config::BLOCK_SIZE as u32,
            None,
        );
        Allocation::Filled { set, way, slot: 0 }
    }

    fn wq_has_no_room(lower: &dyn Downstream, address: u64) -> bool {
        lower.get_occupancy(QueueKind::Wq, address) == lower.get_size(QueueKind::Wq, address)
    }

    /// Drain every dirty slot of a way to the lower write queue, then
    /// invalidate the whole way. A full write queue cancels the operation
    /// (already-drained slots stay drained); the caller retries next tick.
    fn evict_way(
        &mut self,
        set: usize,
        way: usize,
        trigger: &Packet,
        now: u64,
        lower: &mut dyn Downstream,
    ) -> bool {
        for slot in self.tags.dirty_slots(set, way) {
            let victim = self.tags.slot(set, way, slot).clone();
            if Self::wq_has_no_room(lower, victim.address) {
                lower.increment_wq_full(victim.address);
                return false;
            }
            let wb = self.writeback_packet(&victim, trigger, now);
            self.tags.evict(set, way, slot);
            lower.add_wq(&wb, now);
        }
        self.tags.evict(set, way, EVICT_ALL);
        true
    }

    fn writeback_packet(&self, victim: &CompressedSlot, trigger: &Packet, now: u64) -> Packet {
        let mut wb = Packet::new(trigger.cpu, AccessType::Writeback, victim.full_addr);
        wb.address = victim.address;
        wb.data = victim.data;
        wb.program_data = victim.program_data;
        wb.instr_id = trigger.instr_id;
        wb.ip = 0; // a writeback has no originating instruction
        wb.fill_level = self.cfg.fill_level << 1;
        wb.event_cycle = now;
        wb
    }

    fn writeback_packet_baseline(&self, set: usize, way: usize, trigger: &Packet, now: u64) -> Packet {
        let victim = self.baseline.way(set, way);
        let mut wb = Packet::new(trigger.cpu, AccessType::Writeback, victim.full_addr);
        wb.address = victim.address;
        wb.data = victim.data;
        wb.program_data = victim.program_data;
        wb.instr_id = trigger.instr_id;
        wb.ip = 0;
        wb.fill_level = self.cfg.fill_level << 1;
        wb.event_cycle = now;
        wb
    }

    // ── Writeback path ───────────────────────────────────────────────────────

    fn handle_writeback(&mut self, now: u64, lower: &mut dyn Downstream, cores: &mut [CorePort]) {
        let Some(head) = self.wq.head_entry() else {
            return;
        };
        if head.event_cycle > now {
            return;
        }
        let packet = head.clone();

        let hit = if self.cfg.compressed_cache {
            self.writeback_lookup_compressed(&packet)
        } else {
            self.baseline.lookup(packet.address).map(|w| (w, 0))
        };

        if let Some((way, slot)) = hit {
            let set = if self.cfg.compressed_cache {
                self.tags.set_of(packet.address)
            } else {
                self.baseline.set_of(packet.address)
            };
            let probe = self.policy.probe(packet.cpu, set, packet.address, packet.kind);
            self.policy.update(
                packet.cpu,
                set,
                probe,
                packet.address,
                packet.ip,
                AccessType::Writeback,
                crate::config::BLOCK_SIZE as u32,
                None,
            );
            if self.cfg.compressed_cache {
                self.tags.mark_dirty(set, way, slot);
            } else {
                self.baseline.way_mut(set, way).dirty = true;
            }
            self.stats.record_hit(packet.cpu, packet.kind);
            self.route_up(cores, &packet);
            self.wq.pop_head();
            return;
        }

        // Writeback miss: allocate directly from the write queue.
        match self.allocate(&packet, now, lower) {
            Allocation::Stalled => {
                self.stats.stall[packet.kind.index()] += 1;
            }
            Allocation::Bypassed => {
                unreachable!("writebacks never bypass");
            }
            Allocation::Filled { set, way, slot } => {
                if self.cfg.compressed_cache {
                    self.tags.mark_dirty(set, way, slot);
                } else {
                    self.baseline.way_mut(set, way).dirty = true;
                }
                self.stats.record_miss(packet.cpu, packet.kind);
                self.wq.pop_head();
            }
        }
    }

    /// Writeback hit detection for the compressed array: a hit whose way
    /// sits at a different compression factor than the incoming data is
    /// invalidated and handled as a miss (the incoming value supersedes the
    /// resident one, dirty or not).
    fn writeback_lookup_compressed(&mut self, packet: &Packet) -> Option<(usize, usize)> {
        let (way, slot) = self.tags.lookup(packet.address)?;
        let set = self.tags.set_of(packet.address);
        let incoming_cf =
            crate::compression::compression_factor(bdi::fill_compress(&packet.program_data));
        if self.tags.way(set, way).compression_factor != incoming_cf {
            self.tags.evict(set, way, slot);
            debug!(set, way, slot, "writeback factor mismatch, forcing victim");
            return None;
        }
        Some((way, slot))
    }

    // ── Read path ────────────────────────────────────────────────────────────

    fn handle_read(&mut self, now: u64, lower: &mut dyn Downstream, cores: &mut [CorePort]) {
        for _ in 0..MAX_READ_PER_CYCLE {
            let Some(head) = self.rq.head_entry() else {
                return;
            };
            if head.event_cycle > now || self.rq.occupancy() == 0 {
                return;
            }
            let packet = head.clone();
            if !self.service_demand(&packet, now, lower, cores, false) {
                return; // stalled on MSHR space; retry next tick
            }
        }
    }

    fn handle_prefetch(&mut self, now: u64, lower: &mut dyn Downstream, cores: &mut [CorePort]) {
        let Some(head) = self.pq.head_entry() else {
            return;
        };
        if head.event_cycle > now {
            return;
        }
        let packet = head.clone();
        self.service_demand(&packet, now, lower, cores, true);
    }

    /// Service the head of the read (or prefetch) queue. Returns false when
    /// the request could not be handled this tick.
    fn service_demand(
        &mut self,
        packet: &Packet,
        now: u64,
        lower: &mut dyn Downstream,
        cores: &mut [CorePort],
        from_pq: bool,
    ) -> bool {
        let hit = if self.cfg.compressed_cache {
            self.tags.lookup(packet.address)
        } else {
            self.baseline.lookup(packet.address).map(|w| (w, 0))
        };

        if let Some((way, slot)) = hit {
            self.service_hit(packet, way, slot, cores);
            if from_pq {
                self.pq.pop_head();
            } else {
                self.rq.pop_head();
            }
            return true;
        }

        // Miss.
        match self.mshr.check(packet.address) {
            Some(index) => {
                self.mshr.merge(index, packet);
                self.stats.mshr_merged[packet.kind.index()] += 1;
                self.stats.record_miss(packet.cpu, packet.kind);
            }
            None if self.mshr.is_full() => {
                self.stats.stall[packet.kind.index()] += 1;
                return false;
            }
            None => {
                self.mshr.insert(packet.clone(), now);
                let sent = if packet.kind == AccessType::Prefetch {
                    lower.add_pq(packet, now)
                } else {
                    lower.add_rq(packet, now)
                };
                debug_assert_ne!(sent, RequestOutcome::Full, "lower level refused a miss");
                self.stats.record_miss(packet.cpu, packet.kind);
            }
        }

        if from_pq {
            self.pq.pop_head();
        } else {
            self.rq.pop_head();
        }
        true
    }

    fn service_hit(&mut self, packet: &Packet, way: usize, slot: usize, cores: &mut [CorePort]) {
        let mut response = packet.clone();

        if self.cfg.compressed_cache {
            let set = self.tags.set_of(packet.address);
            let probe = self.policy.probe(packet.cpu, set, packet.address, packet.kind);
            let resident = self.tags.slot(set, way, slot);
            let compressed_size = resident.compressed_size;
            response.data = resident.data;
            response.program_data = resident.program_data;

            // Prefetched line touched by a demand: useful, bit cleared.
            if resident.prefetch && packet.kind.is_demand() {
                self.stats.pf_useful += 1;
            }
            self.tags.touch(set, way, slot, packet.kind.is_demand());

            self.policy.update(
                packet.cpu,
                set,
                probe,
                packet.address,
                packet.ip,
                packet.kind,
                compressed_size,
                Some(self.tags.ways(set)),
            );
        } else {
            let set = self.baseline.set_of(packet.address);
            let probe = self.policy.probe(packet.cpu, set, packet.address, packet.kind);
            let resident = self.baseline.way_mut(set, way);
            response.data = resident.data;
            response.program_data = resident.program_data;
            if resident.prefetch && packet.kind.is_demand() {
                self.stats.pf_useful += 1;
                resident.prefetch = false;
            }
            resident.used = true;
            self.policy.update(
                packet.cpu,
                set,
                probe,
                packet.address,
                packet.ip,
                packet.kind,
                crate::config::BLOCK_SIZE as u32,
                None,
            );
        }

        self.stats.record_hit(packet.cpu, packet.kind);
        self.route_up(cores, &response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::packet::fill_level;
    use crate::config::CacheConfig;

    fn small_cache() -> Cache {
        let mut cfg = CacheConfig::llc(1);
        cfg.num_sets = 16;
        cfg.num_ways = 4;
        cfg.mshr_size = 4;
        cfg.rq_size = 4;
        cfg.wq_size = 4;
        cfg.pq_size = 4;
        Cache::new("LLC", cfg)
    }

    fn demand(addr: u64, ip: u64) -> Packet {
        Packet::new(0, AccessType::Load, addr).with_ip(ip)
    }

    #[test]
    fn miss_then_fill_then_hit() {
        let mut llc = small_cache();
        let mut mem = MainMemory::new(50);
        let mut cores = vec![CorePort::default()];
        let addr = 0x8040u64;

        let mut p = demand(addr, 0x400);
        p.fill_level = fill_level::L2; // below LLC's own level, so data returns
        assert_eq!(llc.add_rq(&p, 0), AddOutcome::Queued);

        let mut cycle = 0;
        while cores[0].data_returns.is_empty() && cycle < 500 {
            llc.operate(cycle, &mut mem, &mut cores);
            mem.operate(cycle, &mut llc);
            cycle += 1;
        }
        assert_eq!(cores[0].data_returns.len(), 1, "miss should complete");
        assert_eq!(llc.stats.miss[AccessType::Load.index()], 1);
        assert!(llc.tags().lookup(p.address).is_some());

        // Second access to the same line: a hit this time.
        assert_eq!(llc.add_rq(&p, cycle), AddOutcome::Queued);
        for c in cycle..cycle + 100 {
            llc.operate(c, &mut mem, &mut cores);
            mem.operate(c, &mut llc);
        }
        assert_eq!(llc.stats.hit[AccessType::Load.index()], 1);
        assert_eq!(cores[0].data_returns.len(), 2);
    }

    #[test]
    fn read_matching_pending_writeback_is_forwarded() {
        let mut llc = small_cache();
        let addr = 0x9000u64;
        let mut wb = Packet::new(0, AccessType::Writeback, addr);
        wb.data = 0x1234;
        assert_eq!(llc.add_wq(&wb, 0), AddOutcome::Queued);

        let mut rd = demand(addr, 0x400);
        rd.fill_level = fill_level::L2;
        match llc.add_rq(&rd, 0) {
            AddOutcome::Serviced(p) => assert_eq!(p.data, 0x1234),
            other => panic!("expected forwarding, got {other:?}"),
        }
        assert_eq!(llc.stats.hit[AccessType::Load.index()], 1);
    }

    #[test]
    fn duplicate_reads_merge_in_the_queue() {
        let mut llc = small_cache();
        let p = demand(0xA000, 0x400);
        assert_eq!(llc.add_rq(&p, 0), AddOutcome::Queued);
        assert_eq!(llc.add_rq(&p, 0), AddOutcome::Merged);
    }

    #[test]
    fn queue_full_is_reported() {
        let mut llc = small_cache();
        for i in 0..4u64 {
            assert_eq!(llc.add_rq(&demand(0xB000 + i * 64, 0x400), 0), AddOutcome::Queued);
        }
        assert_eq!(llc.add_rq(&demand(0xF000, 0x400), 0), AddOutcome::Full);
    }

    #[test]
    fn prefetch_upgraded_by_demand_keeps_mshr_progress() {
        let mut llc = small_cache();
        let mut mem = MainMemory::new(1000); // slow: keeps the miss in flight
        let mut cores = vec![CorePort::default()];
        let addr = 0xC040u64;

        let mut pf = Packet::new(0, AccessType::Prefetch, addr).with_ip(0x500);
        pf.fill_level = fill_level::LLC;
        llc.add_pq(&pf, 0);
        // Drain the prefetch into the MSHR (it becomes ready one cache
        // latency after insertion).
        for c in 0..=25 {
            llc.operate(c, &mut mem, &mut cores);
        }
        assert_eq!(llc.get_occupancy(QueueKind::Mshr, 0), 1);

        // A demand load to the same line merges and upgrades.
        let mut ld = demand(addr, 0x400);
        ld.fill_level = fill_level::L2;
        llc.add_rq(&ld, 26);
        for c in 26..=60 {
            llc.operate(c, &mut mem, &mut cores);
        }
        assert_eq!(llc.get_occupancy(QueueKind::Mshr, 0), 1);
        assert_eq!(llc.stats.mshr_merged[AccessType::Load.index()], 1);
    }

    #[test]
    fn writeback_miss_allocates_dirty() {
        let mut llc = small_cache();
        let mut mem = MainMemory::new(10);
        let mut cores = vec![CorePort::default()];
        let addr = 0xD000u64;

        let wb = Packet::new(0, AccessType::Writeback, addr);
        llc.add_wq(&wb, 0);
        for c in 0..100 {
            llc.operate(c, &mut mem, &mut cores);
            mem.operate(c, &mut llc);
        }
        let (way, slot) = llc.tags().lookup(wb.address).expect("writeback fills");
        let set = llc.tags().set_of(wb.address);
        assert!(llc.tags().slot(set, way, slot).dirty);
        assert_eq!(llc.stats.miss[AccessType::Writeback.index()], 1);
    }
}
