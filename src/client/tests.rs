//! Client registry and roster tests

use std::net::SocketAddrV4;

use pretty_assertions::assert_eq;

use crate::protocol::{GatewayError, SnTopic};
use crate::transport::SensorAddress;

use super::{
    load_predefined_topics, load_roster, ClientId, ClientKind, ClientLocation, ClientRegistry,
    ClientStatus, TopicTable,
};

fn addr(n: u8) -> SensorAddress {
    let sock: SocketAddrV4 = format!("192.168.1.{}:2000", n).parse().unwrap();
    SensorAddress::from(sock)
}

#[test]
fn create_and_resolve_by_both_indexes() {
    let registry = ClientRegistry::new(8);
    let handle = registry
        .create(
            ClientLocation::Direct(addr(1)),
            ClientId::from("s1"),
            ClientKind::Transparent,
        )
        .unwrap();

    assert_eq!(registry.get_by_address(addr(1)), Some(handle));
    assert_eq!(registry.get_by_client_id(&ClientId::from("s1")), Some(handle));
    assert_eq!(registry.len(), 1);
}

#[test]
fn one_client_per_id() {
    let registry = ClientRegistry::new(8);
    registry
        .create(
            ClientLocation::Direct(addr(1)),
            ClientId::from("s1"),
            ClientKind::Transparent,
        )
        .unwrap();
    let err = registry
        .create(
            ClientLocation::Direct(addr(2)),
            ClientId::from("s1"),
            ClientKind::Transparent,
        )
        .unwrap_err();
    assert!(matches!(err, GatewayError::ProtocolViolation(_)));
}

#[test]
fn stale_handle_resolves_to_none() {
    let registry = ClientRegistry::new(8);
    let handle = registry
        .create(
            ClientLocation::Direct(addr(1)),
            ClientId::from("s1"),
            ClientKind::Transparent,
        )
        .unwrap();

    registry.forget(handle);
    assert!(registry.with(handle, |_| ()).is_none());
    assert!(registry.with_mut(handle, |_| ()).is_none());
    assert_eq!(registry.get_by_address(addr(1)), None);

    // A new client reusing the slot gets a fresh generation; the old
    // handle stays dead.
    let newer = registry
        .create(
            ClientLocation::Direct(addr(1)),
            ClientId::from("s2"),
            ClientKind::Transparent,
        )
        .unwrap();
    assert!(registry.with(handle, |_| ()).is_none());
    assert!(registry.with(newer, |_| ()).is_some());
}

#[test]
fn capacity_is_enforced() {
    let registry = ClientRegistry::new(1);
    registry
        .create(
            ClientLocation::Direct(addr(1)),
            ClientId::from("s1"),
            ClientKind::Transparent,
        )
        .unwrap();
    let err = registry
        .create(
            ClientLocation::Direct(addr(2)),
            ClientId::from("s2"),
            ClientKind::Transparent,
        )
        .unwrap_err();
    assert!(matches!(err, GatewayError::RegistryFull));

    // Ephemeral slots live outside the capacity budget.
    let eph = registry.create_ephemeral(addr(3));
    assert!(registry.with(eph, |c| c.ephemeral).unwrap());
    assert_eq!(registry.len(), 1);
}

#[test]
fn roster_gates_creation() {
    let registry = ClientRegistry::new(8);
    registry.set_roster([ClientId::from("listed")]);

    assert!(matches!(
        registry.create(
            ClientLocation::Direct(addr(1)),
            ClientId::from("unlisted"),
            ClientKind::Transparent,
        ),
        Err(GatewayError::AuthRejected)
    ));
    assert!(registry
        .create(
            ClientLocation::Direct(addr(1)),
            ClientId::from("listed"),
            ClientKind::Transparent,
        )
        .is_ok());
}

#[test]
fn rebind_moves_the_address_index() {
    let registry = ClientRegistry::new(8);
    let handle = registry
        .create(
            ClientLocation::Direct(addr(1)),
            ClientId::from("s1"),
            ClientKind::Transparent,
        )
        .unwrap();

    assert!(registry.rebind_address(handle, addr(2)));
    assert_eq!(registry.get_by_address(addr(1)), None);
    assert_eq!(registry.get_by_address(addr(2)), Some(handle));
}

#[test]
fn forwarded_clients_never_rebind() {
    let registry = ClientRegistry::new(8);
    let handle = registry
        .create(
            ClientLocation::Forwarded {
                forwarder: addr(9),
                node_id: smallvec::SmallVec::from_slice(&[0x0A, 0x0B]),
            },
            ClientId::from("s3"),
            ClientKind::ForwardedTransparent,
        )
        .unwrap();

    assert!(!registry.rebind_address(handle, addr(2)));
}

#[test]
fn status_defaults_to_disconnected() {
    let registry = ClientRegistry::new(8);
    let handle = registry
        .create(
            ClientLocation::Direct(addr(1)),
            ClientId::from("s1"),
            ClientKind::Transparent,
        )
        .unwrap();
    assert_eq!(
        registry.with(handle, |c| c.status),
        Some(ClientStatus::Disconnected)
    );
}

#[test]
fn topic_table_spaces() {
    let mut topics = TopicTable::new();
    topics.add_predefined(7, "pre/defined");

    let id = topics.register("a/b").unwrap();
    assert_eq!(topics.register("a/b"), Some(id)); // dedupe by name
    assert_eq!(topics.name_of(&SnTopic::Normal(id)).as_deref(), Some("a/b"));
    assert_eq!(
        topics.name_of(&SnTopic::PreDefined(7)).as_deref(),
        Some("pre/defined")
    );
    assert_eq!(topics.name_of(&SnTopic::Short(*b"ab")).as_deref(), Some("ab"));

    // Clean session: normal space cleared, pre-defined survives
    topics.erase_normal();
    assert_eq!(topics.name_of(&SnTopic::Normal(id)), None);
    assert_eq!(
        topics.name_of(&SnTopic::PreDefined(7)).as_deref(),
        Some("pre/defined")
    );
}

#[test]
fn register_skips_predefined_ids() {
    let mut topics = TopicTable::new();
    topics.add_predefined(1, "taken");
    let id = topics.register("fresh").unwrap();
    assert_ne!(id, 1);
}

#[test]
fn roster_file_parses() {
    let input = b"# comment\n\
        s1, 192.168.1.10:2001, transparent\n\
        \n\
        n7, -, forwarded-transparent\n" as &[u8];
    let entries = load_roster(input).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, ClientId::from("s1"));
    assert!(entries[0].address.is_some());
    assert_eq!(entries[0].kind, ClientKind::Transparent);
    assert_eq!(entries[1].address, None);
    assert_eq!(entries[1].kind, ClientKind::ForwardedTransparent);
}

#[test]
fn roster_rejects_forwarded_with_address() {
    let input = b"n7, 192.168.1.10:2001, forwarded-transparent\n" as &[u8];
    assert!(load_roster(input).is_err());
}

#[test]
fn predefined_topics_file_parses() {
    let input = b"s1, 1, home/temp\n*, 9, gateway/broadcast\n" as &[u8];
    let entries = load_predefined_topics(input).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].client_id, Some(ClientId::from("s1")));
    assert_eq!(entries[0].topic_id, 1);
    assert_eq!(entries[1].client_id, None);
    assert_eq!(entries[1].topic_name, "gateway/broadcast");
}

#[test]
fn predefined_topic_id_zero_rejected() {
    let input = b"s1, 0, broken\n" as &[u8];
    assert!(load_predefined_topics(input).is_err());
}
