//! UDP sensor-network driver
//!
//! One socket for unicast traffic, one joined to the multicast group
//! clients use for SEARCHGW/ADVERTISE.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::protocol::MAX_SN_PACKET_LEN;

use super::{to_socket_addr, SensorAddress, SensorNetwork};

/// UDP driver for the sensor side
pub struct UdpSensorNetwork {
    unicast: UdpSocket,
    multicast: UdpSocket,
    group: SocketAddrV4,
}

impl UdpSensorNetwork {
    /// Bind the gateway's unicast port and join the multicast group.
    pub async fn bind(bind: SocketAddrV4, group: SocketAddrV4) -> io::Result<Self> {
        let unicast = UdpSocket::bind(SocketAddr::V4(bind)).await?;
        unicast.set_broadcast(true)?;

        // The multicast socket needs SO_REUSEADDR before bind so several
        // gateways can share a host during tests.
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        raw.set_nonblocking(true)?;
        raw.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port())).into())?;
        let multicast = UdpSocket::from_std(raw.into())?;
        multicast.join_multicast_v4(*group.ip(), Ipv4Addr::UNSPECIFIED)?;

        debug!("sensor network on {} (group {})", bind, group);
        Ok(Self {
            unicast,
            multicast,
            group,
        })
    }
}

#[async_trait]
impl SensorNetwork for UdpSensorNetwork {
    async fn recv(&self) -> io::Result<(SensorAddress, Bytes)> {
        let mut ubuf = [0u8; MAX_SN_PACKET_LEN];
        let mut mbuf = [0u8; MAX_SN_PACKET_LEN];
        loop {
            // Whichever socket has a datagram first wins; SEARCHGW arrives
            // on the group socket, everything else on the unicast one.
            tokio::select! {
                result = self.unicast.recv_from(&mut ubuf) => {
                    let (n, from) = result?;
                    if let SocketAddr::V4(v4) = from {
                        return Ok((SensorAddress::from(v4), Bytes::copy_from_slice(&ubuf[..n])));
                    }
                }
                result = self.multicast.recv_from(&mut mbuf) => {
                    let (n, from) = result?;
                    if let SocketAddr::V4(v4) = from {
                        return Ok((SensorAddress::from(v4), Bytes::copy_from_slice(&mbuf[..n])));
                    }
                }
            }
        }
    }

    async fn unicast(&self, addr: SensorAddress, data: &[u8]) -> io::Result<()> {
        self.unicast.send_to(data, to_socket_addr(addr)).await?;
        Ok(())
    }

    async fn broadcast(&self, data: &[u8]) -> io::Result<()> {
        self.unicast
            .send_to(data, SocketAddr::V4(self.group))
            .await?;
        Ok(())
    }
}
