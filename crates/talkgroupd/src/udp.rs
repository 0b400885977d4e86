//! UDP multicast transport.
//!
//! Every open group gets its own socket joined to the group's receive
//! address. Frames go out to the transmit address and, when the group lists
//! rallypoints, to each connected rallypoint as well. Several groups may
//! share an address; receivers route on the frame's group hash.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use talkgroup_core::config::NetworkConfig;
use talkgroup_core::group::GroupConfig;
use talkgroup_core::wire::{group_hash, Frame, GroupHash, FRAME_HEADER_LEN, MAX_PAYLOAD};
use talkgroup_engine::{Transport, TransportError, TransportEvent, TransportSink};

use crate::rallypoint::{LinkTiming, RallypointLink};

/// Consecutive receive errors after which a group's link is reported lost.
pub const MAX_RECV_FAILURES: u32 = 5;

struct GroupLink {
    socket: Arc<UdpSocket>,
    dest: SocketAddrV4,
    rallypoints: Vec<RallypointLink>,
    recv_task: JoinHandle<()>,
}

impl Drop for GroupLink {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

pub struct UdpTransport {
    network: NetworkConfig,
    /// 0 = let the kernel pick.
    interface_index: u32,
    links: DashMap<String, GroupLink>,
}

impl UdpTransport {
    pub fn new(network: NetworkConfig) -> Result<Self> {
        let interface_index = if network.interface.is_empty() {
            0
        } else {
            if_index(&network.interface)?
        };
        tracing::info!(
            interface = %network.interface,
            index = interface_index,
            ttl = network.multicast_ttl,
            "udp transport ready"
        );
        Ok(Self {
            network,
            interface_index,
            links: DashMap::new(),
        })
    }

    fn open_link(&self, group: &GroupConfig, sink: TransportSink) -> Result<GroupLink> {
        let (rx, tx) = resolve_addresses(group, &self.network)?;
        let hash = group_hash(&group.id);

        let socket = make_group_socket(rx, self.interface_index, self.network.multicast_ttl)
            .with_context(|| format!("failed to create socket for {rx}"))?;
        let socket = Arc::new(
            UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?,
        );

        let recv_task = tokio::spawn(recv_loop(
            socket.clone(),
            group.id.clone(),
            hash,
            sink.clone(),
        ));

        let timing = LinkTiming {
            reconnect: Duration::from_secs(self.network.rallypoint_reconnect_secs.max(1)),
            ping: Duration::from_secs(self.network.rallypoint_ping_secs.max(1)),
        };
        let rallypoints = group
            .rallypoints
            .iter()
            .map(|rp| RallypointLink::spawn(rp, &group.id, hash, timing, sink.clone()))
            .collect();

        tracing::info!(group = %group.id, %rx, %tx, "group link open");
        Ok(GroupLink {
            socket,
            dest: tx,
            rallypoints,
            recv_task,
        })
    }
}

impl Transport for UdpTransport {
    fn open(&self, group: &GroupConfig, sink: TransportSink) -> Result<(), TransportError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TransportError::Refused(
                group.id.clone(),
                "no async runtime".into(),
            ));
        }
        let link = self
            .open_link(group, sink)
            .map_err(|e| TransportError::Refused(group.id.clone(), format!("{e:#}")))?;
        self.links.insert(group.id.clone(), link);
        Ok(())
    }

    fn close(&self, group_id: &str) {
        if self.links.remove(group_id).is_some() {
            tracing::info!(group = %group_id, "group link closed");
        }
    }

    fn send(&self, group_id: &str, frame: &Frame) -> Result<(), TransportError> {
        let link = self
            .links
            .get(group_id)
            .ok_or_else(|| TransportError::NotOpen(group_id.to_string()))?;
        let bytes = Bytes::from(frame.encode()?);

        let mut relayed = false;
        for rp in &link.rallypoints {
            relayed |= rp.send(bytes.clone());
        }

        match link.socket.try_send_to(&bytes, SocketAddr::V4(link.dest)) {
            Ok(_) => Ok(()),
            Err(e) if relayed => {
                tracing::debug!(group = %group_id, error = %e, "multicast send failed, relayed only");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn recv_loop(socket: Arc<UdpSocket>, group_id: String, hash: GroupHash, sink: TransportSink) {
    let mut buf = vec![0u8; FRAME_HEADER_LEN + MAX_PAYLOAD];
    let mut failures = 0u32;

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => {
                failures = 0;
                r
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(group = %group_id, error = %e, failures, "recv_from failed");
                if failures >= MAX_RECV_FAILURES {
                    let _ = sink.send(TransportEvent::LinkLost { group_id });
                    return;
                }
                continue;
            }
        };

        match Frame::decode(&buf[..len]) {
            Ok(frame) if frame.group_hash == hash => {
                let event = TransportEvent::Frame {
                    group_id: group_id.clone(),
                    frame,
                };
                if sink.send(event).is_err() {
                    return;
                }
            }
            Ok(_) => tracing::trace!(group = %group_id, "frame for another group"),
            Err(e) => tracing::trace!(group = %group_id, %from, error = %e, "undecodable datagram"),
        }
    }
}

/// Receive and transmit addresses for a group.
///
/// An empty receive address or zero port falls back to the network
/// defaults. An empty transmit address or zero port falls back to the
/// receive side.
pub fn resolve_addresses(
    group: &GroupConfig,
    network: &NetworkConfig,
) -> Result<(SocketAddrV4, SocketAddrV4)> {
    let rx_addr = if group.rx.address.is_empty() {
        network.default_address.as_str()
    } else {
        group.rx.address.as_str()
    };
    let rx_ip: Ipv4Addr = rx_addr
        .parse()
        .with_context(|| format!("bad receive address {rx_addr:?}"))?;
    if !rx_ip.is_multicast() {
        anyhow::bail!("receive address {rx_ip} is not multicast");
    }
    let rx_port = if group.rx.port == 0 {
        network.default_port
    } else {
        group.rx.port
    };

    let tx_ip: Ipv4Addr = if group.tx.address.is_empty() {
        rx_ip
    } else {
        group
            .tx
            .address
            .parse()
            .with_context(|| format!("bad transmit address {:?}", group.tx.address))?
    };
    let tx_port = if group.tx.port == 0 { rx_port } else { group.tx.port };

    Ok((
        SocketAddrV4::new(rx_ip, rx_port),
        SocketAddrV4::new(tx_ip, tx_port),
    ))
}

/// Create a UDP socket bound to `rx`'s port and joined to its group.
fn make_group_socket(rx: SocketAddrV4, interface_index: u32, ttl: u32) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, rx.port());
    socket.bind(&bind_addr.into()).context("bind()")?;

    if interface_index == 0 {
        socket
            .join_multicast_v4(rx.ip(), &Ipv4Addr::UNSPECIFIED)
            .context("IP_ADD_MEMBERSHIP")?;
    } else {
        socket
            .join_multicast_v4_n(rx.ip(), &InterfaceIndexOrAddress::Index(interface_index))
            .context("IP_ADD_MEMBERSHIP")?;
    }
    socket.set_multicast_ttl_v4(ttl).context("IP_MULTICAST_TTL")?;
    // Other engines on this host are group members too.
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;

    Ok(socket.into())
}

/// Get the interface index for a named interface.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use talkgroup_core::group::NetworkAddress;

    fn group(rx: (&str, u16), tx: (&str, u16)) -> GroupConfig {
        GroupConfig {
            id: "g".into(),
            rx: NetworkAddress {
                address: rx.0.into(),
                port: rx.1,
            },
            tx: NetworkAddress {
                address: tx.0.into(),
                port: tx.1,
            },
            ..GroupConfig::default()
        }
    }

    #[test]
    fn empty_addresses_fall_back() {
        let network = NetworkConfig::default();
        let (rx, tx) = resolve_addresses(&group(("", 0), ("", 0)), &network).unwrap();
        assert_eq!(rx, "239.42.43.1:49000".parse().unwrap());
        assert_eq!(tx, rx);

        let (rx, tx) = resolve_addresses(&group(("239.1.1.1", 7000), ("", 7001)), &network).unwrap();
        assert_eq!(rx, "239.1.1.1:7000".parse().unwrap());
        assert_eq!(tx, "239.1.1.1:7001".parse().unwrap());
    }

    #[test]
    fn bad_addresses_are_refused() {
        let network = NetworkConfig::default();
        assert!(resolve_addresses(&group(("not-an-ip", 0), ("", 0)), &network).is_err());
        assert!(resolve_addresses(&group(("10.0.0.1", 0), ("", 0)), &network).is_err());
        assert!(resolve_addresses(&group(("", 0), ("bogus", 0)), &network).is_err());
    }

    #[test]
    fn unknown_interface_is_an_error() {
        assert!(if_index("no-such-if0").is_err());
        assert!(UdpTransport::new(NetworkConfig {
            interface: "no-such-if0".into(),
            ..NetworkConfig::default()
        })
        .is_err());
    }

    #[test]
    fn send_on_unopened_group_fails() {
        let transport = UdpTransport::new(NetworkConfig::default()).unwrap();
        let frame = Frame::new(
            talkgroup_core::wire::FrameKind::Raw,
            group_hash("g"),
            [0; 8],
            Vec::new(),
        );
        assert!(matches!(
            transport.send("g", &frame),
            Err(TransportError::NotOpen(_))
        ));
        transport.close("g");
    }
}
