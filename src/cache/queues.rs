//! FIFO packet queues and the miss-status holding registers.

use tracing::trace;

use crate::cache::packet::{Packet, ReturnStatus};

/// Outcome of a queue insertion attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueue {
    /// Inserted at this index.
    Inserted(usize),
    /// Deduplicated against the entry at this index.
    Merged(usize),
    /// No room; the caller defers and retries next tick.
    Full,
}

/// Bounded FIFO of packets with line-address deduplication.
///
/// Entries keep their slot from insertion to removal; `head` only designates
/// the oldest entry. Statistics mirror the counters the report prints.
#[derive(Clone, Debug)]
pub struct PacketQueue {
    entries: Vec<Option<Packet>>,
    head: usize,
    tail: usize,
    occupancy: usize,

    pub access: u64,
    pub merged: u64,
    pub to_cache: u64,
    pub forward: u64,
    pub full: u64,
}

impl PacketQueue {
    pub fn new(size: usize) -> Self {
        Self {
            entries: vec![None; size],
            head: 0,
            tail: 0,
            occupancy: 0,
            access: 0,
            merged: 0,
            to_cache: 0,
            forward: 0,
            full: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    pub fn is_full(&self) -> bool {
        self.occupancy == self.entries.len()
    }

    /// Index of the entry holding the same line address, if any.
    pub fn check_queue(&self, address: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|p| p.address == address))
    }

    pub fn entry(&self, index: usize) -> &Packet {
        self.entries[index].as_ref().expect("empty queue slot")
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut Packet {
        self.entries[index].as_mut().expect("empty queue slot")
    }

    /// Oldest entry, if the queue is non-empty.
    pub fn head_entry(&self) -> Option<&Packet> {
        self.entries[self.head].as_ref()
    }

    /// Insert at the tail. The caller is responsible for having checked for
    /// merges first; this only reports `Full` or the slot used.
    pub fn push(&mut self, packet: Packet) -> Enqueue {
        if self.is_full() {
            self.full += 1;
            return Enqueue::Full;
        }
        debug_assert!(self.entries[self.tail].is_none(), "tail slot occupied");
        let index = self.tail;
        self.entries[index] = Some(packet);
        self.tail = (self.tail + 1) % self.entries.len();
        self.occupancy += 1;
        Enqueue::Inserted(index)
    }

    /// Drop the oldest entry and return it.
    pub fn pop_head(&mut self) -> Option<Packet> {
        let packet = self.entries[self.head].take()?;
        self.head = (self.head + 1) % self.entries.len();
        self.occupancy -= 1;
        Some(packet)
    }
}

/// Miss-status holding registers: in-flight misses deduplicated by line
/// address, with completion tracking and latency accounting.
#[derive(Clone, Debug)]
pub struct Mshr {
    entries: Vec<Option<Packet>>,
    occupancy: usize,
    /// In-flight demand loads, for effective-latency amortisation.
    read_occupancy: usize,
    num_returned: usize,
    next_fill_index: Option<usize>,
    next_fill_cycle: u64,

    pub merged: u64,
}

impl Mshr {
    pub fn new(size: usize) -> Self {
        Self {
            entries: vec![None; size],
            occupancy: 0,
            read_occupancy: 0,
            num_returned: 0,
            next_fill_index: None,
            next_fill_cycle: u64::MAX,
            merged: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn occupancy(&self) -> usize {
        self.occupancy
    }

    pub fn is_full(&self) -> bool {
        self.occupancy == self.entries.len()
    }

    pub fn entry(&self, index: usize) -> &Packet {
        self.entries[index].as_ref().expect("empty MSHR slot")
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut Packet {
        self.entries[index].as_mut().expect("empty MSHR slot")
    }

    /// Index of the in-flight miss for this line address.
    pub fn check(&self, address: u64) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|p| p.address == address))
    }

    /// Register a new miss. Concurrent demand readers share the wait: every
    /// resident entry's effective latency advances by the elapsed time
    /// divided among the readers.
    pub fn insert(&mut self, mut packet: Packet, now: u64) {
        let is_demand_load = packet.kind == crate::cache::packet::AccessType::Load;

        let index = self
            .entries
            .iter()
            .position(|e| e.is_none())
            .expect("MSHR insert on full table");
        packet.returned = ReturnStatus::Inflight;
        packet.effective_latency = 0;
        packet.last_update_cycle = now;
        self.entries[index] = Some(packet);
        self.occupancy += 1;
        if is_demand_load {
            self.read_occupancy += 1;
        }

        if !is_demand_load || self.read_occupancy <= 1 {
            return;
        }
        let share = self.read_occupancy as u64 - 1;
        for entry in self.entries.iter_mut().flatten() {
            entry.effective_latency += (now - entry.last_update_cycle) / share;
            entry.last_update_cycle = now;
        }
    }

    /// Record data coming back from downstream. Returns the entry index.
    /// The caller adds its own fill latency afterwards via
    /// [`Self::bump_event_cycle`].
    pub fn on_return(&mut self, packet: &Packet, now: u64) -> Option<usize> {
        let index = self.check(packet.address)?;
        let read_occupancy = self.read_occupancy;
        let entry = self.entry_mut(index);

        entry.returned = ReturnStatus::Completed;
        entry.data = packet.data;
        entry.program_data = packet.program_data;
        entry.latency = now.saturating_sub(entry.event_cycle);
        let elapsed = now.saturating_sub(entry.last_update_cycle);
        if read_occupancy != 0 {
            entry.effective_latency += elapsed / read_occupancy as u64;
        } else {
            entry.effective_latency += elapsed;
        }

        self.num_returned += 1;
        Some(index)
    }

    /// Merge a queued request into the in-flight miss at `index`: the fill
    /// level tightens to the smaller requester, and a prefetch entry caught
    /// by a demand request is upgraded in place — keeping its event cycle
    /// and returned flag so downstream progress is not lost.
    pub fn merge(&mut self, index: usize, incoming: &Packet) {
        let entry = self.entries[index].as_mut().expect("merging into empty MSHR slot");

        if incoming.fill_level < entry.fill_level {
            entry.fill_level = incoming.fill_level;
        }

        if entry.kind == crate::cache::packet::AccessType::Prefetch
            && incoming.kind != crate::cache::packet::AccessType::Prefetch
        {
            let returned = entry.returned;
            let event_cycle = entry.event_cycle;
            let fill_level = entry.fill_level;
            *entry = incoming.clone();
            entry.returned = returned;
            entry.event_cycle = event_cycle;
            entry.fill_level = fill_level;
            if entry.kind == crate::cache::packet::AccessType::Load {
                self.read_occupancy += 1;
            }
        }

        self.merged += 1;
    }

    /// Re-time an entry after a return: the fill happens `latency` cycles
    /// past `now` (or past its pending event, whichever is later).
    pub fn bump_event_cycle(&mut self, index: usize, now: u64, latency: u64) {
        let entry = self.entry_mut(index);
        if entry.event_cycle < now {
            entry.event_cycle = now + latency;
        } else {
            entry.event_cycle += latency;
        }
    }

    /// Recompute which completed entry fills next.
    pub fn update_fill_cycle(&mut self) {
        let mut min_cycle = u64::MAX;
        let mut min_index = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(p) = entry {
                if p.returned == ReturnStatus::Completed && p.event_cycle < min_cycle {
                    min_cycle = p.event_cycle;
                    min_index = Some(i);
                }
            }
        }
        self.next_fill_cycle = min_cycle;
        self.next_fill_index = min_index;
    }

    /// The completed entry whose fill time has arrived, if any.
    pub fn ready_fill(&self, now: u64) -> Option<usize> {
        self.next_fill_index
            .filter(|_| self.next_fill_cycle <= now)
    }

    /// Remove a completed entry and hand it back.
    pub fn remove(&mut self, index: usize) -> Packet {
        let packet = self.entries[index].take().expect("removing empty MSHR slot");
        self.occupancy -= 1;
        if packet.kind == crate::cache::packet::AccessType::Load {
            self.read_occupancy -= 1;
        }
        self.num_returned -= 1;
        trace!(address = packet.address, "mshr retire");
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::packet::AccessType;

    fn packet(addr: u64) -> Packet {
        Packet::new(0, AccessType::Load, addr << 6)
    }

    #[test]
    fn queue_is_fifo_and_bounded() {
        let mut q = PacketQueue::new(2);
        assert!(matches!(q.push(packet(1)), Enqueue::Inserted(0)));
        assert!(matches!(q.push(packet(2)), Enqueue::Inserted(1)));
        assert_eq!(q.push(packet(3)), Enqueue::Full);
        assert_eq!(q.full, 1);
        assert_eq!(q.pop_head().unwrap().address, 1);
        assert_eq!(q.pop_head().unwrap().address, 2);
        assert!(q.pop_head().is_none());
    }

    #[test]
    fn check_queue_finds_matching_line() {
        let mut q = PacketQueue::new(4);
        q.push(packet(7));
        assert_eq!(q.check_queue(7), Some(0));
        assert_eq!(q.check_queue(8), None);
    }

    #[test]
    fn mshr_dedups_and_retires() {
        let mut m = Mshr::new(4);
        m.insert(packet(5), 100);
        assert_eq!(m.check(5), Some(0));
        assert_eq!(m.occupancy(), 1);

        let mut response = packet(5);
        response.data = 42;
        let idx = m.on_return(&response, 150).unwrap();
        m.bump_event_cycle(idx, 150, 10);
        m.update_fill_cycle();
        assert_eq!(m.ready_fill(159), None);
        assert_eq!(m.ready_fill(160), Some(idx));

        let retired = m.remove(idx);
        assert_eq!(retired.data, 42);
        assert_eq!(m.occupancy(), 0);
        m.update_fill_cycle();
        assert_eq!(m.ready_fill(1000), None);
    }

    #[test]
    fn concurrent_readers_split_effective_latency() {
        let mut m = Mshr::new(4);
        m.insert(packet(1), 0);
        // Second demand load 10 cycles later: the first entry's 10 waiting
        // cycles are charged in full (one prior reader).
        m.insert(packet(2), 10);
        assert_eq!(m.entry(0).effective_latency, 10);
        assert_eq!(m.entry(0).last_update_cycle, 10);
    }
}
