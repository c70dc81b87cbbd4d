//! Forwarder table tests

use std::net::SocketAddrV4;

use smallvec::SmallVec;

use crate::client::{ClientId, ClientKind, ClientLocation, ClientRegistry};
use crate::protocol::WirelessNodeId;
use crate::transport::SensorAddress;

use super::ForwarderTable;

fn addr(n: u8) -> SensorAddress {
    let sock: SocketAddrV4 = format!("10.0.0.{}:2000", n).parse().unwrap();
    SensorAddress::from(sock)
}

fn node(bytes: &[u8]) -> WirelessNodeId {
    SmallVec::from_slice(bytes)
}

#[test]
fn undeclared_forwarder_is_unknown() {
    let table = ForwarderTable::new();
    assert!(!table.contains(addr(1)));
    assert!(!table.add_client(addr(1), node(&[1, 2]), dummy_handle()));
}

#[test]
fn declared_forwarder_maps_nodes() {
    let table = ForwarderTable::new();
    table.declare("F", addr(1));
    assert!(table.contains(addr(1)));
    assert_eq!(table.name_of(addr(1)).as_deref(), Some("F"));

    let handle = dummy_handle();
    assert_eq!(table.client_of(addr(1), &node(&[0x0A, 0x0B])), None);
    assert!(table.add_client(addr(1), node(&[0x0A, 0x0B]), handle));
    assert_eq!(table.client_of(addr(1), &node(&[0x0A, 0x0B])), Some(handle));
}

#[test]
fn remove_client_unmaps_the_node() {
    let table = ForwarderTable::new();
    table.declare("F", addr(1));
    let handle = dummy_handle();
    table.add_client(addr(1), node(&[0x0A, 0x0B]), handle);

    table.remove_client(handle);
    assert_eq!(table.client_of(addr(1), &node(&[0x0A, 0x0B])), None);
}

fn dummy_handle() -> crate::client::ClientHandle {
    // Handles are opaque; mint one through a throwaway registry.
    let registry = ClientRegistry::new(1);
    registry
        .create(
            ClientLocation::Direct(addr(200)),
            ClientId::from("x"),
            ClientKind::Transparent,
        )
        .unwrap()
}
