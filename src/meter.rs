// Cumulative byte counters for the monitored process tree

use crate::traffic::{Direction, IpVersion};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// The four global traffic counters
///
/// Written by the classifier (live attribution) and by generation swaps
/// (reconciliation), read by the reporter. All access is a single atomic
/// operation; counters only grow and wrap on overflow.
#[derive(Debug, Default)]
pub struct MeterSet {
    tx_ipv4: AtomicU64,
    rx_ipv4: AtomicU64,
    tx_ipv6: AtomicU64,
    rx_ipv6: AtomicU64,
}

impl MeterSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, direction: Direction, version: IpVersion) -> &AtomicU64 {
        match (direction, version) {
            (Direction::Send, IpVersion::V4) => &self.tx_ipv4,
            (Direction::Recv, IpVersion::V4) => &self.rx_ipv4,
            (Direction::Send, IpVersion::V6) => &self.tx_ipv6,
            (Direction::Recv, IpVersion::V6) => &self.rx_ipv6,
        }
    }

    /// Credit `bytes` to the counter selected by direction and IP version
    pub fn add(&self, direction: Direction, version: IpVersion, bytes: u64) {
        self.counter(direction, version)
            .fetch_add(bytes, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn get(&self, direction: Direction, version: IpVersion) -> u64 {
        self.counter(direction, version).load(Ordering::Relaxed)
    }

    /// Read all four counters
    ///
    /// The loads are independent, so a snapshot taken while traffic flows may
    /// mix values from slightly different instants. Each value is still exact.
    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            tx_ipv4: self.tx_ipv4.load(Ordering::Relaxed),
            rx_ipv4: self.rx_ipv4.load(Ordering::Relaxed),
            tx_ipv6: self.tx_ipv6.load(Ordering::Relaxed),
            rx_ipv6: self.rx_ipv6.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the global counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MeterSnapshot {
    pub tx_ipv4: u64,
    pub rx_ipv4: u64,
    pub tx_ipv6: u64,
    pub rx_ipv6: u64,
}

impl MeterSnapshot {
    /// Add `bytes` to the field selected by direction and IP version
    pub fn add(&mut self, direction: Direction, version: IpVersion, bytes: u64) {
        let field = match (direction, version) {
            (Direction::Send, IpVersion::V4) => &mut self.tx_ipv4,
            (Direction::Recv, IpVersion::V4) => &mut self.rx_ipv4,
            (Direction::Send, IpVersion::V6) => &mut self.tx_ipv6,
            (Direction::Recv, IpVersion::V6) => &mut self.rx_ipv6,
        };
        *field = field.wrapping_add(bytes);
    }

    pub fn total_tx(&self) -> u64 {
        self.tx_ipv4.wrapping_add(self.tx_ipv6)
    }

    pub fn total_rx(&self) -> u64 {
        self.rx_ipv4.wrapping_add(self.rx_ipv6)
    }
}
