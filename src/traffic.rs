//! Traffic dimensions shared by the classifier, the generation store and the meters
//!
//! Every byte the monitor sees is keyed by transport protocol, IP version and
//! direction. The enums here are small `Copy` types with stable indices so the
//! hot path can address fixed arrays instead of hashing.

use serde::Serialize;
use std::fmt;

/// Transport-layer protocol of a captured segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub const ALL: [Transport; 2] = [Transport::Tcp, Transport::Udp];

    pub fn index(self) -> usize {
        match self {
            Transport::Tcp => 0,
            Transport::Udp => 1,
        }
    }
}

/// Network-layer IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    pub fn index(self) -> usize {
        match self {
            IpVersion::V4 => 0,
            IpVersion::V6 => 1,
        }
    }
}

/// Direction relative to the monitored interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// Local address is the packet source (Tx)
    Send,
    /// Local address is the packet destination (Rx)
    Recv,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Send, Direction::Recv];

    pub fn index(self) -> usize {
        match self {
            Direction::Send => 0,
            Direction::Recv => 1,
        }
    }
}

/// Name of the kernel address table for a protocol/version pair ("tcp", "udp6", ...)
pub fn table_name(transport: Transport, version: IpVersion) -> &'static str {
    match (transport, version) {
        (Transport::Tcp, IpVersion::V4) => "tcp",
        (Transport::Tcp, IpVersion::V6) => "tcp6",
        (Transport::Udp, IpVersion::V4) => "udp",
        (Transport::Udp, IpVersion::V6) => "udp6",
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "TCP"),
            Transport::Udp => write!(f, "UDP"),
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "tx"),
            Direction::Recv => write!(f, "rx"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_names_are_distinct() {
        let names: HashSet<&str> = Transport::ALL
            .iter()
            .flat_map(|&t| IpVersion::ALL.iter().map(move |&v| table_name(t, v)))
            .collect();
        assert_eq!(names.len(), 4);
        assert!(names.contains("tcp6"));
        assert!(names.contains("udp"));
    }

    #[test]
    fn test_indices_cover_all_variants() {
        let t: Vec<usize> = Transport::ALL.iter().map(|t| t.index()).collect();
        let v: Vec<usize> = IpVersion::ALL.iter().map(|v| v.index()).collect();
        let d: Vec<usize> = Direction::ALL.iter().map(|d| d.index()).collect();
        assert_eq!(t, vec![0, 1]);
        assert_eq!(v, vec![0, 1]);
        assert_eq!(d, vec![0, 1]);
    }
}
