// pnet-based packet capture backend

use super::{CaptureBackend, DecodedPacket, InterfaceSummary, NetworkLayer, TransportLayer};
use crate::classifier::LocalAddrs;
use ::pnet::datalink::{self, Channel, ChannelType, DataLinkReceiver, NetworkInterface};
use ::pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use ::pnet::packet::ipv4::Ipv4Packet;
use ::pnet::packet::ipv6::Ipv6Packet;
use ::pnet::packet::tcp::TcpPacket;
use ::pnet::packet::udp::UdpPacket;
use anyhow::{Context, Result};
use std::io;
use std::time::Duration;

/// Receive every protocol on the socket
const ETH_P_ALL: u16 = 0x0003;

/// Upper bound on a blocking read, so the capture thread notices cancellation
const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Room for a whole offloaded (GRO/TSO) datagram, the largest IP length field
const READ_BUFFER_SIZE: usize = u16::MAX as usize + 1;

const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER: usize = 40;

/// IP-level live capture on one interface
///
/// Opens a cooked (layer 3) packet socket, so frames arrive without a link
/// header regardless of the device type.
pub struct PnetCapture {
    interface: String,
    local: LocalAddrs,
    rx: Box<dyn DataLinkReceiver>,
}

impl PnetCapture {
    pub fn is_available() -> bool {
        // pnet raw sockets on Linux and BSD
        cfg!(target_os = "linux")
            || cfg!(target_os = "freebsd")
            || cfg!(target_os = "openbsd")
            || cfg!(target_os = "netbsd")
    }

    pub fn open(device: &str) -> Result<Self> {
        let interface = find_interface(device)?;
        let local = local_addrs(&interface);
        if local.is_empty() {
            anyhow::bail!(
                "Interface {} has no usable IPv4 or IPv6 address to match traffic against",
                device
            );
        }
        log::info!("Local addresses on {}: {}", device, local);

        let rx = match datalink::channel(&interface, channel_config()) {
            Ok(Channel::Ethernet(_, rx)) => {
                log::info!("Successfully created packet capture channel for {}", device);
                rx
            }
            Ok(_) => {
                return Err(anyhow::anyhow!("Unsupported channel type for {}", device));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create channel for {}", device));
            }
        };

        Ok(Self {
            interface: device.to_string(),
            local,
            rx,
        })
    }
}

impl CaptureBackend for PnetCapture {
    fn name(&self) -> &'static str {
        "pnet"
    }

    fn local_addrs(&self) -> LocalAddrs {
        self.local
    }

    fn next_packet(&mut self) -> Result<Option<DecodedPacket>> {
        match self.rx.next() {
            Ok(bytes) => Ok(Some(decode_ip_packet(bytes))),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Packet receive error on {}", self.interface)),
        }
    }
}

fn channel_config() -> datalink::Config {
    datalink::Config {
        read_buffer_size: READ_BUFFER_SIZE,
        read_timeout: Some(READ_TIMEOUT),
        channel_type: ChannelType::Layer3(ETH_P_ALL),
        promiscuous: false,
        ..Default::default()
    }
}

fn find_interface(device: &str) -> Result<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == device)
        .ok_or_else(|| anyhow::anyhow!("Network interface {} not found", device))
}

fn local_addrs(interface: &NetworkInterface) -> LocalAddrs {
    LocalAddrs::from_addresses(interface.ips.iter().map(|net| net.ip()))
}

pub(super) fn interfaces() -> Vec<InterfaceSummary> {
    datalink::interfaces()
        .into_iter()
        .map(|iface| InterfaceSummary {
            local: local_addrs(&iface),
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
            name: iface.name,
        })
        .collect()
}

/// Decode a raw IP datagram (no link header)
///
/// Anything that is not a well-formed IPv4/IPv6 header decodes to an empty
/// packet, which the classifier discards.
pub(crate) fn decode_ip_packet(bytes: &[u8]) -> DecodedPacket {
    match bytes.first().map(|b| b >> 4) {
        Some(4) => decode_ipv4(bytes),
        Some(6) => decode_ipv6(bytes),
        _ => None,
    }
    .unwrap_or_default()
}

fn decode_ipv4(bytes: &[u8]) -> Option<DecodedPacket> {
    let ipv4 = Ipv4Packet::new(bytes)?;
    let header_len = ipv4.get_header_length() as usize * 4;
    let total_len = ipv4.get_total_length() as usize;
    if header_len < IPV4_MIN_HEADER || total_len < header_len || bytes.len() < header_len {
        return None;
    }
    let len = total_len.min(bytes.len());

    // Only the first fragment carries the transport header
    let transport = if ipv4.get_fragment_offset() == 0 {
        decode_transport(ipv4.get_next_level_protocol(), &bytes[header_len..len])
    } else {
        None
    };

    Some(DecodedPacket {
        network: Some(NetworkLayer::V4 {
            src: ipv4.get_source(),
            dst: ipv4.get_destination(),
            len: len as u64,
        }),
        transport,
    })
}

fn decode_ipv6(bytes: &[u8]) -> Option<DecodedPacket> {
    let ipv6 = Ipv6Packet::new(bytes)?;
    let len = (IPV6_HEADER + ipv6.get_payload_length() as usize).min(bytes.len());

    Some(DecodedPacket {
        network: Some(NetworkLayer::V6 {
            src: ipv6.get_source(),
            dst: ipv6.get_destination(),
            len: len as u64,
        }),
        transport: decode_transport(ipv6.get_next_header(), &bytes[IPV6_HEADER..len]),
    })
}

fn decode_transport(protocol: IpNextHeaderProtocol, payload: &[u8]) -> Option<TransportLayer> {
    match protocol {
        IpNextHeaderProtocols::Tcp => TcpPacket::new(payload).map(|tcp| TransportLayer::Tcp {
            src_port: tcp.get_source(),
            dst_port: tcp.get_destination(),
        }),
        IpNextHeaderProtocols::Udp => UdpPacket::new(payload).map(|udp| TransportLayer::Udp {
            src_port: udp.get_source(),
            dst_port: udp.get_destination(),
        }),
        _ => None,
    }
}
