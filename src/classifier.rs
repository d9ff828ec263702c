//! Per-packet traffic attribution
//!
//! Every captured packet is reduced to (direction, IP version, transport,
//! local port, size) and looked up in the current generation. Owned ports go
//! straight to the global counters; unowned ports are parked in the
//! generation's unknown buckets for a later reconciliation.
//!
//! This runs once per packet: no locks, no allocation, no logging.

use crate::backends::capture::{DecodedPacket, NetworkLayer};
use crate::generation::GenerationStore;
use crate::traffic::{Direction, IpVersion, Transport};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

/// Addresses of the monitored interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalAddrs {
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl LocalAddrs {
    /// Pick the first usable address of each family
    ///
    /// Loopback addresses and link-local IPv6 addresses are never chosen.
    pub fn from_addresses(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        let mut local = Self::default();
        for addr in addrs {
            match addr {
                IpAddr::V4(v4) if !v4.is_loopback() => {
                    local.ipv4.get_or_insert(v4);
                }
                IpAddr::V6(v6) if !v6.is_loopback() && !v6.is_unicast_link_local() => {
                    local.ipv6.get_or_insert(v6);
                }
                _ => {}
            }
        }
        local
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_none() && self.ipv6.is_none()
    }

    /// Send if we are the source, Recv if we are the destination
    pub fn direction_of(&self, network: &NetworkLayer) -> Option<Direction> {
        match *network {
            NetworkLayer::V4 { src, dst, .. } => direction(self.ipv4, src, dst),
            NetworkLayer::V6 { src, dst, .. } => direction(self.ipv6, src, dst),
        }
    }
}

fn direction<A: PartialEq>(local: Option<A>, src: A, dst: A) -> Option<Direction> {
    let local = local?;
    if src == local {
        Some(Direction::Send)
    } else if dst == local {
        Some(Direction::Recv)
    } else {
        None
    }
}

impl fmt::Display for LocalAddrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ipv4 {
            Some(v4) => write!(f, "ipv4={}", v4)?,
            None => write!(f, "ipv4=-")?,
        }
        match self.ipv6 {
            Some(v6) => write!(f, " ipv6={}", v6),
            None => write!(f, " ipv6=-"),
        }
    }
}

/// Why a packet was not counted anywhere
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Neither IPv4 nor IPv6
    NoNetworkLayer,
    /// Neither source nor destination is a local address
    ForeignAddress,
    /// Neither TCP nor UDP
    NoTransportLayer,
    /// No generation installed yet
    NoGeneration,
}

/// Outcome of classifying one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Port owned by the monitored tree; counted immediately
    Attributed {
        direction: Direction,
        version: IpVersion,
        bytes: u64,
    },
    /// Port not (yet) known; held in the current generation's unknown bucket
    Deferred {
        transport: Transport,
        version: IpVersion,
        direction: Direction,
        port: u16,
        bytes: u64,
    },
    Discarded(DiscardReason),
}

/// Attributes decoded packets to the monitored process tree
pub struct TrafficClassifier {
    local: LocalAddrs,
    store: Arc<GenerationStore>,
}

impl TrafficClassifier {
    pub fn new(local: LocalAddrs, store: Arc<GenerationStore>) -> Self {
        Self { local, store }
    }

    pub fn classify(&self, packet: &DecodedPacket) -> Classification {
        let Some(network) = packet.network else {
            return Classification::Discarded(DiscardReason::NoNetworkLayer);
        };
        let Some(direction) = self.local.direction_of(&network) else {
            return Classification::Discarded(DiscardReason::ForeignAddress);
        };
        let Some(segment) = packet.transport else {
            return Classification::Discarded(DiscardReason::NoTransportLayer);
        };
        let Some(generation) = self.store.current() else {
            return Classification::Discarded(DiscardReason::NoGeneration);
        };

        let version = network.version();
        let transport = segment.protocol();
        let port = segment.local_port(direction);
        let bytes = network.byte_len();

        if generation.owns_port(transport, version, port) {
            self.store.meters().add(direction, version, bytes);
            Classification::Attributed {
                direction,
                version,
                bytes,
            }
        } else {
            generation.record_unknown(transport, version, direction, port, bytes);
            Classification::Deferred {
                transport,
                version,
                direction,
                port,
                bytes,
            }
        }
    }
}

/// Packet counts per classification outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierStats {
    pub attributed: u64,
    pub deferred: u64,
    pub discarded: u64,
}

impl ClassifierStats {
    pub fn record(&mut self, outcome: &Classification) {
        match outcome {
            Classification::Attributed { .. } => self.attributed += 1,
            Classification::Deferred { .. } => self.deferred += 1,
            Classification::Discarded(_) => self.discarded += 1,
        }
    }
}
