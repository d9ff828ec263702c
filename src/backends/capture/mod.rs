// Packet capture backend trait and implementations

use super::BackendPriority;
use crate::classifier::LocalAddrs;
use crate::traffic::{Direction, IpVersion, Transport};
use anyhow::Result;
use std::net::{Ipv4Addr, Ipv6Addr};

#[cfg(feature = "capture-pnet")]
pub mod pnet;

/// Network layer of a decoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkLayer {
    V4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        /// Header plus payload bytes of the IP segment
        len: u64,
    },
    V6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        len: u64,
    },
}

impl NetworkLayer {
    pub fn version(&self) -> IpVersion {
        match self {
            NetworkLayer::V4 { .. } => IpVersion::V4,
            NetworkLayer::V6 { .. } => IpVersion::V6,
        }
    }

    pub fn byte_len(&self) -> u64 {
        match *self {
            NetworkLayer::V4 { len, .. } | NetworkLayer::V6 { len, .. } => len,
        }
    }
}

/// Transport layer of a decoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLayer {
    Tcp { src_port: u16, dst_port: u16 },
    Udp { src_port: u16, dst_port: u16 },
}

impl TransportLayer {
    pub fn protocol(&self) -> Transport {
        match self {
            TransportLayer::Tcp { .. } => Transport::Tcp,
            TransportLayer::Udp { .. } => Transport::Udp,
        }
    }

    /// The port on our side of the exchange
    pub fn local_port(&self, direction: Direction) -> u16 {
        let (TransportLayer::Tcp { src_port, dst_port }
        | TransportLayer::Udp { src_port, dst_port }) = *self;
        match direction {
            Direction::Send => src_port,
            Direction::Recv => dst_port,
        }
    }
}

/// A captured packet reduced to what the classifier needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodedPacket {
    pub network: Option<NetworkLayer>,
    pub transport: Option<TransportLayer>,
}

/// Packet capture backend trait
///
/// A backend is bound to one device when opened and yields packets until the
/// process ends; it cannot be restarted.
pub trait CaptureBackend: Send {
    /// Backend name (e.g., "pnet")
    fn name(&self) -> &'static str;

    /// Addresses of the capture device used to tell Tx from Rx
    fn local_addrs(&self) -> LocalAddrs;

    /// Block for the next packet
    ///
    /// `Ok(None)` means the read timed out; callers use it to check for
    /// cancellation and call again.
    fn next_packet(&mut self) -> Result<Option<DecodedPacket>>;
}

/// Capture backend metadata for selection
#[derive(Debug, Clone)]
pub struct CaptureBackendInfo {
    pub name: &'static str,
    pub priority: BackendPriority,
    pub available: bool,
}

/// Network interface as reported by the capture layer
#[derive(Debug, Clone)]
pub struct InterfaceSummary {
    pub name: String,
    pub is_up: bool,
    pub is_loopback: bool,
    pub local: LocalAddrs,
}

/// Detect all capture backends compiled into this build
pub fn detect_capture_backends() -> Vec<CaptureBackendInfo> {
    #[allow(unused_mut)]
    let mut backends = Vec::new();

    #[cfg(feature = "capture-pnet")]
    backends.push(CaptureBackendInfo {
        name: "pnet",
        priority: BackendPriority::Good,
        available: pnet::PnetCapture::is_available(),
    });

    backends
}

/// Open the best available capture backend on `device`
pub fn open_live(device: &str, preference: Option<&str>) -> Result<Box<dyn CaptureBackend>> {
    if let Some(name) = preference {
        return create_capture_backend(name, device);
    }

    let best = detect_capture_backends()
        .into_iter()
        .filter(|b| b.available)
        .max_by_key(|b| b.priority)
        .ok_or_else(|| anyhow::anyhow!("No capture backend available"))?;

    create_capture_backend(best.name, device)
}

fn create_capture_backend(name: &str, device: &str) -> Result<Box<dyn CaptureBackend>> {
    match name {
        #[cfg(feature = "capture-pnet")]
        "pnet" => Ok(Box::new(pnet::PnetCapture::open(device)?)),

        _ => {
            let _ = device;
            Err(anyhow::anyhow!("Unknown capture backend: {}", name))
        }
    }
}

/// Interfaces visible to the capture layer
pub fn list_interfaces() -> Vec<InterfaceSummary> {
    #[cfg(feature = "capture-pnet")]
    {
        pnet::interfaces()
    }

    #[cfg(not(feature = "capture-pnet"))]
    {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_port_follows_direction() {
        let tcp = TransportLayer::Tcp {
            src_port: 40000,
            dst_port: 443,
        };
        assert_eq!(tcp.local_port(Direction::Send), 40000);
        assert_eq!(tcp.local_port(Direction::Recv), 443);
        assert_eq!(tcp.protocol(), Transport::Tcp);

        let udp = TransportLayer::Udp {
            src_port: 53,
            dst_port: 5353,
        };
        assert_eq!(udp.local_port(Direction::Recv), 5353);
        assert_eq!(udp.protocol(), Transport::Udp);
    }

    #[test]
    fn test_network_layer_accessors() {
        let v6 = NetworkLayer::V6 {
            src: Ipv6Addr::LOCALHOST,
            dst: Ipv6Addr::LOCALHOST,
            len: 1280,
        };
        assert_eq!(v6.version(), IpVersion::V6);
        assert_eq!(v6.byte_len(), 1280);
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(open_live("lo", Some("pcap-ng")).is_err());
    }
}
