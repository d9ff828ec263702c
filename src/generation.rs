//! Rotating generations of port ownership
//!
//! A [`Generation`] is one refresh cycle's view of which local ports belong to
//! the monitored process tree, plus the traffic seen on ports it did not know
//! about. The [`GenerationStore`] keeps the last three generations in a ring
//! and publishes the newest one through a single atomic index, so the packet
//! classifier never takes a lock and never sees a half-built generation.
//!
//! Traffic recorded as unknown in generation `G` is credited once `G + 1`
//! proves the port was ours. That comparison happens when `G + 2` is
//! installed, which is why the ring holds three slots: the retiring pair
//! stays addressable while the new generation is already live.

use crate::meter::{MeterSet, MeterSnapshot};
use crate::traffic::{Direction, IpVersion, Transport};
use arc_swap::ArcSwapOption;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Number of generations held by the store
pub const RING_SIZE: usize = 3;

/// Number of distinct transport ports
const PORT_SPACE: usize = u16::MAX as usize + 1;

/// Kernel socket identifiers owned by the monitored tree
pub type InodeSet = HashSet<u64>;

/// Local port -> owning socket inode
pub type PortMap = HashMap<u16, u64>;

/// One port map per protocol/version pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortTables {
    pub tcp4: PortMap,
    pub tcp6: PortMap,
    pub udp4: PortMap,
    pub udp6: PortMap,
}

impl PortTables {
    pub fn get(&self, transport: Transport, version: IpVersion) -> &PortMap {
        match (transport, version) {
            (Transport::Tcp, IpVersion::V4) => &self.tcp4,
            (Transport::Tcp, IpVersion::V6) => &self.tcp6,
            (Transport::Udp, IpVersion::V4) => &self.udp4,
            (Transport::Udp, IpVersion::V6) => &self.udp6,
        }
    }

    pub fn get_mut(&mut self, transport: Transport, version: IpVersion) -> &mut PortMap {
        match (transport, version) {
            (Transport::Tcp, IpVersion::V4) => &mut self.tcp4,
            (Transport::Tcp, IpVersion::V6) => &mut self.tcp6,
            (Transport::Udp, IpVersion::V4) => &mut self.udp4,
            (Transport::Udp, IpVersion::V6) => &mut self.udp6,
        }
    }

    pub fn total_ports(&self) -> usize {
        self.tcp4.len() + self.tcp6.len() + self.udp4.len() + self.udp6.len()
    }
}

/// Per-port byte accumulator for traffic on ports a generation did not own
///
/// A dense array of atomics: recording is a single `fetch_add` with no
/// allocation, and draining swaps each slot back to zero so every byte leaves
/// the bucket at most once.
pub struct PortCounters {
    slots: Box<[AtomicU64]>,
}

impl PortCounters {
    pub fn new() -> Self {
        Self {
            slots: std::iter::repeat_with(|| AtomicU64::new(0))
                .take(PORT_SPACE)
                .collect(),
        }
    }

    pub fn add(&self, port: u16, bytes: u64) {
        self.slots[port as usize].fetch_add(bytes, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn get(&self, port: u16) -> u64 {
        self.slots[port as usize].load(Ordering::Relaxed)
    }

    /// Take every non-zero entry, leaving the bucket empty
    pub fn drain(&self) -> impl Iterator<Item = (u16, u64)> + '_ {
        self.slots.iter().enumerate().filter_map(|(port, slot)| {
            let bytes = slot.swap(0, Ordering::Relaxed);
            (bytes != 0).then_some((port as u16, bytes))
        })
    }
}

impl Default for PortCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PortCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self
            .slots
            .iter()
            .filter(|s| s.load(Ordering::Relaxed) != 0)
            .count();
        f.debug_struct("PortCounters").field("ports", &used).finish()
    }
}

/// The eight unknown-traffic buckets (protocol x version x direction)
#[derive(Debug, Default)]
pub struct UnknownBuckets {
    buckets: [PortCounters; 8],
}

impl UnknownBuckets {
    fn slot(transport: Transport, version: IpVersion, direction: Direction) -> usize {
        transport.index() * 4 + version.index() * 2 + direction.index()
    }

    pub fn bucket(
        &self,
        transport: Transport,
        version: IpVersion,
        direction: Direction,
    ) -> &PortCounters {
        &self.buckets[Self::slot(transport, version, direction)]
    }
}

/// One refresh cycle's snapshot
///
/// Inodes and port maps are fixed at construction. Only the unknown buckets
/// change afterwards, and only through atomics.
#[derive(Debug)]
pub struct Generation {
    serial: u64,
    inodes: InodeSet,
    ports: PortTables,
    unknown: UnknownBuckets,
}

impl Generation {
    pub fn new(inodes: InodeSet, ports: PortTables) -> Self {
        Self {
            serial: 0,
            inodes,
            ports,
            unknown: UnknownBuckets::default(),
        }
    }

    /// Position in the install sequence (1 for the first swapped generation)
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn inodes(&self) -> &InodeSet {
        &self.inodes
    }

    pub fn owns_port(&self, transport: Transport, version: IpVersion, port: u16) -> bool {
        self.ports.get(transport, version).contains_key(&port)
    }

    pub fn record_unknown(
        &self,
        transport: Transport,
        version: IpVersion,
        direction: Direction,
        port: u16,
        bytes: u64,
    ) {
        self.unknown
            .bucket(transport, version, direction)
            .add(port, bytes);
    }

    #[cfg(test)]
    pub fn unknown_bytes(
        &self,
        transport: Transport,
        version: IpVersion,
        direction: Direction,
        port: u16,
    ) -> u64 {
        self.unknown.bucket(transport, version, direction).get(port)
    }
}

/// What a swap did with the retired generation's unknown traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Serial of the generation whose buckets were drained
    pub retired_serial: u64,
    /// Bytes credited to the global counters
    pub recovered_bytes: u64,
    /// The same bytes, split by counter
    pub recovered: MeterSnapshot,
    /// Number of (bucket, port) entries credited
    pub recovered_ports: usize,
    /// Bytes on ports the successor did not own either, now discarded
    pub dropped_bytes: u64,
}

/// Result of installing a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutcome {
    pub serial: u64,
    /// `None` until the ring holds two generations behind the new one
    pub reconciliation: Option<Reconciliation>,
}

/// Three-slot ring of generations with a lock-free current pointer
///
/// Single writer: only one thread may call [`GenerationStore::swap`]. Any
/// number of threads may call [`GenerationStore::current`] concurrently.
pub struct GenerationStore {
    slots: [ArcSwapOption<Generation>; RING_SIZE],
    cur: AtomicUsize,
    installed: AtomicU64,
    meters: Arc<MeterSet>,
}

impl GenerationStore {
    pub fn new(meters: Arc<MeterSet>) -> Self {
        Self {
            slots: std::array::from_fn(|_| ArcSwapOption::empty()),
            cur: AtomicUsize::new(0),
            installed: AtomicU64::new(0),
            meters,
        }
    }

    pub fn meters(&self) -> &Arc<MeterSet> {
        &self.meters
    }

    /// The generation packets are currently classified against
    ///
    /// `None` only before the first swap. The returned `Arc` keeps the
    /// generation alive even if the writer rotates past it meanwhile.
    pub fn current(&self) -> Option<Arc<Generation>> {
        let idx = self.cur.load(Ordering::Acquire);
        self.slots[idx].load_full()
    }

    /// Number of generations installed so far
    pub fn installed(&self) -> u64 {
        self.installed.load(Ordering::Relaxed)
    }

    /// Install `generation` as current and reconcile the one two steps back
    pub fn swap(&self, mut generation: Generation) -> SwapOutcome {
        let serial = self.installed.fetch_add(1, Ordering::Relaxed) + 1;
        generation.serial = serial;

        let cur_idx = self.cur.load(Ordering::Acquire);
        let prev_idx = (cur_idx + RING_SIZE - 1) % RING_SIZE;
        let next_idx = (cur_idx + 1) % RING_SIZE;

        // Fully built before it becomes reachable through `cur`
        self.slots[next_idx].store(Some(Arc::new(generation)));
        self.cur.store(next_idx, Ordering::Release);

        let reconciliation = match (
            self.slots[prev_idx].load_full(),
            self.slots[cur_idx].load_full(),
        ) {
            (Some(retired), Some(successor)) => Some(self.reconcile(&retired, &successor)),
            _ => None,
        };

        SwapOutcome {
            serial,
            reconciliation,
        }
    }

    /// Credit `retired`'s unknown traffic on ports that `successor` owns
    fn reconcile(&self, retired: &Generation, successor: &Generation) -> Reconciliation {
        let mut result = Reconciliation {
            retired_serial: retired.serial,
            ..Default::default()
        };

        for transport in Transport::ALL {
            for version in IpVersion::ALL {
                let owned = successor.ports.get(transport, version);
                for direction in Direction::ALL {
                    let bucket = retired.unknown.bucket(transport, version, direction);
                    for (port, bytes) in bucket.drain() {
                        if owned.contains_key(&port) {
                            self.meters.add(direction, version, bytes);
                            result.recovered.add(direction, version, bytes);
                            result.recovered_bytes = result.recovered_bytes.wrapping_add(bytes);
                            result.recovered_ports += 1;
                        } else {
                            result.dropped_bytes = result.dropped_bytes.wrapping_add(bytes);
                        }
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(tcp4: &[(u16, u64)]) -> PortTables {
        PortTables {
            tcp4: tcp4.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn generation(tcp4: &[(u16, u64)]) -> Generation {
        let inodes = tcp4.iter().map(|&(_, inode)| inode).collect();
        Generation::new(inodes, tables(tcp4))
    }

    fn store() -> GenerationStore {
        GenerationStore::new(Arc::new(MeterSet::new()))
    }

    #[test]
    fn test_empty_store_has_no_current() {
        let store = store();
        assert!(store.current().is_none());
        assert_eq!(store.installed(), 0);
    }

    #[test]
    fn test_swap_publishes_new_generation() {
        let store = store();
        let outcome = store.swap(generation(&[(8080, 100)]));
        assert_eq!(outcome.serial, 1);

        let current = store.current().unwrap();
        assert_eq!(current.serial(), 1);
        assert!(current.owns_port(Transport::Tcp, IpVersion::V4, 8080));
        assert!(!current.owns_port(Transport::Udp, IpVersion::V4, 8080));
        assert!(current.inodes().contains(&100));
    }

    #[test]
    fn test_first_two_swaps_skip_reconciliation() {
        let store = store();
        assert_eq!(store.swap(generation(&[])).reconciliation, None);
        assert_eq!(store.swap(generation(&[])).reconciliation, None);
        assert!(store.swap(generation(&[])).reconciliation.is_some());
    }

    #[test]
    fn test_in_flight_reader_keeps_old_generation() {
        let store = store();
        store.swap(generation(&[(1, 1)]));
        let held = store.current().unwrap();
        store.swap(generation(&[(2, 2)]));
        store.swap(generation(&[(3, 3)]));
        store.swap(generation(&[(4, 4)]));

        assert_eq!(held.serial(), 1);
        assert!(held.owns_port(Transport::Tcp, IpVersion::V4, 1));
        assert_eq!(store.current().unwrap().serial(), 4);
    }

    #[test]
    fn test_unknown_traffic_recovered_after_third_swap() {
        let store = store();
        store.swap(generation(&[(8080, 100)]));

        let g0 = store.current().unwrap();
        store.meters().add(Direction::Send, IpVersion::V4, 1500);
        g0.record_unknown(Transport::Tcp, IpVersion::V4, Direction::Send, 9090, 200);

        let second = store.swap(generation(&[(8080, 100), (9090, 101)]));
        assert_eq!(second.reconciliation, None);
        assert_eq!(store.meters().get(Direction::Send, IpVersion::V4), 1500);

        let third = store.swap(generation(&[(8080, 100), (9090, 101)]));
        let rec = third.reconciliation.unwrap();
        assert_eq!(rec.retired_serial, 1);
        assert_eq!(rec.recovered_bytes, 200);
        assert_eq!(rec.recovered_ports, 1);
        assert_eq!(rec.recovered.tx_ipv4, 200);
        assert_eq!(rec.dropped_bytes, 0);
        assert_eq!(store.meters().get(Direction::Send, IpVersion::V4), 1700);
    }

    #[test]
    fn test_recovered_traffic_counted_once() {
        let store = store();
        store.swap(generation(&[]));
        store
            .current()
            .unwrap()
            .record_unknown(Transport::Udp, IpVersion::V6, Direction::Recv, 5353, 64);

        let mut ports = PortTables::default();
        ports.udp6.insert(5353, 7);
        store.swap(Generation::new([7].into(), ports.clone()));
        store.swap(Generation::new([7].into(), ports.clone()));
        store.swap(Generation::new([7].into(), ports.clone()));
        store.swap(Generation::new([7].into(), ports));

        assert_eq!(
            store.meters().snapshot(),
            MeterSnapshot {
                rx_ipv6: 64,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_port_unknown_in_successor_is_dropped() {
        let store = store();
        store.swap(generation(&[]));
        store
            .current()
            .unwrap()
            .record_unknown(Transport::Tcp, IpVersion::V4, Direction::Recv, 443, 900);

        store.swap(generation(&[]));
        let rec = store.swap(generation(&[(443, 5)])).reconciliation.unwrap();

        // Known only two generations later: too late
        assert_eq!(rec.dropped_bytes, 900);
        assert_eq!(rec.recovered_bytes, 0);
        store.swap(generation(&[(443, 5)]));
        assert_eq!(store.meters().snapshot(), MeterSnapshot::default());
    }

    #[test]
    fn test_reconciliation_matches_protocol_and_version() {
        let store = store();
        store.swap(generation(&[]));
        let g = store.current().unwrap();
        // Port 53 becomes known as TCP4 only
        g.record_unknown(Transport::Udp, IpVersion::V4, Direction::Send, 53, 10);
        g.record_unknown(Transport::Tcp, IpVersion::V6, Direction::Send, 53, 20);
        g.record_unknown(Transport::Tcp, IpVersion::V4, Direction::Recv, 53, 30);

        store.swap(generation(&[(53, 9)]));
        let rec = store.swap(generation(&[])).reconciliation.unwrap();

        assert_eq!(rec.recovered_bytes, 30);
        assert_eq!(
            rec.recovered,
            MeterSnapshot {
                rx_ipv4: 30,
                ..Default::default()
            }
        );
        assert_eq!(rec.dropped_bytes, 30);
        assert_eq!(
            store.meters().snapshot(),
            MeterSnapshot {
                rx_ipv4: 30,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_port_counters_drain_empties_bucket() {
        let counters = PortCounters::new();
        counters.add(0, 1);
        counters.add(65535, 2);
        counters.add(65535, 3);

        let drained: Vec<(u16, u64)> = counters.drain().collect();
        assert_eq!(drained, vec![(0, 1), (65535, 5)]);
        assert_eq!(counters.drain().count(), 0);
        assert_eq!(counters.get(65535), 0);
    }

    #[test]
    fn test_unknown_buckets_are_independent() {
        let g = generation(&[]);
        for transport in Transport::ALL {
            for version in IpVersion::ALL {
                for direction in Direction::ALL {
                    g.record_unknown(transport, version, direction, 1000, 1);
                }
            }
        }
        g.record_unknown(Transport::Udp, IpVersion::V6, Direction::Recv, 1000, 4);

        assert_eq!(
            g.unknown_bytes(Transport::Udp, IpVersion::V6, Direction::Recv, 1000),
            5
        );
        assert_eq!(
            g.unknown_bytes(Transport::Tcp, IpVersion::V4, Direction::Send, 1000),
            1
        );
    }

    #[test]
    fn test_concurrent_readers_never_lose_attributed_bytes() {
        let store = Arc::new(store());
        store.swap(generation(&[(80, 1)]));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for _ in 0..10_000 {
                        let current = store.current().unwrap();
                        assert!(current.owns_port(Transport::Tcp, IpVersion::V4, 80));
                        store.meters().add(Direction::Send, IpVersion::V4, 1);
                    }
                });
            }

            for _ in 0..50 {
                store.swap(generation(&[(80, 1)]));
            }
        });

        assert_eq!(store.meters().get(Direction::Send, IpVersion::V4), 40_000);
        assert_eq!(store.installed(), 51);
    }
}
