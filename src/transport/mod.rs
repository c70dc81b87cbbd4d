//! Sensor-network transport
//!
//! The gateway reaches its clients through a `SensorNetwork` driver:
//! blocking-style receive plus unicast and broadcast sends. Addresses are
//! opaque fixed-size byte tuples so Zigbee/XBee-style drivers fit the same
//! seam as UDP.

mod udp;

pub use udp::UdpSensorNetwork;

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use bytes::Bytes;

/// Opaque sensor-network address. Fixed size, equality and hashing only;
/// the driver decides what the octets mean.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SensorAddress([u8; 8]);

impl SensorAddress {
    pub fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice, zero-padded to the fixed width.
    /// Slices longer than 8 octets are rejected by the caller's config
    /// validation; here the tail is ignored.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl From<SocketAddrV4> for SensorAddress {
    fn from(addr: SocketAddrV4) -> Self {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&addr.ip().octets());
        buf[4..6].copy_from_slice(&addr.port().to_be_bytes());
        Self(buf)
    }
}

impl From<SensorAddress> for SocketAddrV4 {
    fn from(addr: SensorAddress) -> Self {
        let ip = Ipv4Addr::new(addr.0[0], addr.0[1], addr.0[2], addr.0[3]);
        let port = u16::from_be_bytes([addr.0[4], addr.0[5]]);
        SocketAddrV4::new(ip, port)
    }
}

impl fmt::Debug for SensorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensorAddress({})", self)
    }
}

impl fmt::Display for SensorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Sensor-network driver seam.
///
/// `recv` resolves to the next datagram and its originating address;
/// cancellation happens by dropping the future (the recv task selects
/// against the shutdown channel).
#[async_trait]
pub trait SensorNetwork: Send + Sync {
    /// Receive the next datagram. Returns the sender address with the
    /// payload, replacing the C-style last-sender side channel.
    async fn recv(&self) -> io::Result<(SensorAddress, Bytes)>;

    /// Send to a single client address
    async fn unicast(&self, addr: SensorAddress, data: &[u8]) -> io::Result<()>;

    /// Send to the sensor-network broadcast/multicast group
    async fn broadcast(&self, data: &[u8]) -> io::Result<()>;
}

/// Convert an opaque address back to a socket address for UDP sends
pub(crate) fn to_socket_addr(addr: SensorAddress) -> SocketAddr {
    SocketAddr::V4(addr.into())
}
