//! Client receive and demultiplexing
//!
//! Reads raw datagrams from the sensor network, resolves the originating
//! logical client (direct, forwarded or QoS -1 proxy) and posts exactly
//! one event per well-formed packet - or drops the datagram with a logged
//! reason. The recv task never waits on handler progress except through
//! the bounded packet-events queue.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::client::{ClientHandle, ClientId, ClientLocation};
use crate::codec::decode;
use crate::event::Event;
use crate::protocol::{
    Encapsulated, GatewayError, MsgType, SnConnect, SnDisconnect, SnPacket, WirelessNodeId,
};
use crate::transport::{SensorAddress, SensorNetwork};

use super::GatewayContext;

/// Where a packet physically came from; recorded on the client at
/// creation and fixed for the lifetime of the session.
enum Origin {
    Direct(SensorAddress),
    Forwarded {
        forwarder: SensorAddress,
        node_id: WirelessNodeId,
    },
}

pub(super) async fn run(
    ctx: Arc<GatewayContext>,
    sensor: Arc<dyn SensorNetwork>,
    mut shutdown: broadcast::Receiver<()>,
) {
    // Transport errors are retried a bounded number of times before the
    // task gives up; a healthy read resets the counter.
    const MAX_CONSECUTIVE_FAILURES: u32 = 5;
    let mut failures = 0u32;

    loop {
        let (sender, datagram) = tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("client recv task stopped");
                return;
            }
            result = sensor.recv() => match result {
                Ok(d) => {
                    failures = 0;
                    d
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        tracing::error!("sensor network read failing persistently: {}", e);
                        return;
                    }
                    warn!("sensor network read failed: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        // Runt datagrams are dropped without a log line; the sensor side
        // is noisy by nature.
        if datagram.len() < 2 {
            continue;
        }

        let packet = match decode(&datagram) {
            Ok((packet, _)) => packet,
            Err(e) => {
                debug!("malformed datagram from {}: {}", sender, e);
                continue;
            }
        };

        match packet.msg_type() {
            // The gateway's own beacons echoed back, or another gateway's.
            MsgType::Advertise | MsgType::GwInfo => continue,
            MsgType::SearchGw => {
                trace!("SEARCHGW <- {}", sender);
                if !ctx.packet_events.post(Event::Broadcast(packet)).await {
                    return;
                }
                continue;
            }
            MsgType::Encapsulated => {
                let SnPacket::Encapsulated(encap) = packet else {
                    continue;
                };
                dispatch_encapsulated(&ctx, sender, encap).await;
                continue;
            }
            _ => {}
        }

        // Direct traffic: the QoS -1 proxy claims its senders first.
        if ctx.proxy.is_active() {
            if let Some(name) = ctx.proxy.client_name(sender) {
                if !packet.is_qos_minus_one_publish() {
                    warn!(
                        "{} at {} can send only PUBLISH with QoS -1, {} discarded",
                        name,
                        sender,
                        packet.name()
                    );
                    continue;
                }
                // Binding to the synthetic client is infallible while the
                // proxy is immutable.
                if let Some(client) = ctx.proxy.client(sender) {
                    if !ctx.packet_events.post(Event::ClientRecv(client, packet)).await {
                        return;
                    }
                }
                continue;
            }
        }

        let client = ctx.registry.get_by_address(sender);
        dispatch(&ctx, Origin::Direct(sender), client, packet).await;
    }
}

/// Decapsulate a frame-02 message and resolve the wireless node
async fn dispatch_encapsulated(ctx: &GatewayContext, sender: SensorAddress, encap: Encapsulated) {
    if !ctx.forwarders.contains(sender) {
        warn!(
            "forwarder at {} is not declared, message discarded",
            sender
        );
        return;
    }

    let inner = match decode(&encap.inner) {
        Ok((packet, _)) => packet,
        Err(e) => {
            debug!("malformed encapsulated frame via {}: {}", sender, e);
            return;
        }
    };

    // The wireless node may be unknown until its first CONNECT.
    let client = ctx.forwarders.client_of(sender, &encap.node_id);
    dispatch(
        ctx,
        Origin::Forwarded {
            forwarder: sender,
            node_id: encap.node_id,
        },
        client,
        inner,
    )
    .await;
}

/// The resolution rules of the dispatch pipeline: established clients go
/// straight to the handler, unknown senders are answered or created.
async fn dispatch(
    ctx: &GatewayContext,
    origin: Origin,
    client: Option<ClientHandle>,
    packet: SnPacket,
) {
    if let Some(client) = client {
        let disconnected = ctx
            .registry
            .with(client, |c| c.status.is_disconnected())
            .unwrap_or(true);

        if disconnected && packet.msg_type() != MsgType::Connect {
            // A disconnected client gets a courtesy DISCONNECT and
            // nothing reaches the broker.
            let id = ctx.registry.with(client, |c| c.id.clone());
            debug!(
                "client {} is not connected, {} answered with DISCONNECT",
                id.map(|i| i.to_string()).unwrap_or_default(),
                packet.name()
            );
            ctx.client_send
                .post(Event::ClientSend(
                    client,
                    SnPacket::Disconnect(SnDisconnect::default()),
                ))
                .await;
            return;
        }

        ctx.packet_events
            .post(Event::ClientRecv(client, packet))
            .await;
        return;
    }

    // Unknown sender.
    if let SnPacket::Connect(ref connect) = packet {
        match admit(ctx, &origin, connect) {
            Ok(client) => {
                ctx.packet_events
                    .post(Event::ClientRecv(client, packet))
                    .await;
            }
            Err(e) => {
                let addr = match &origin {
                    Origin::Direct(a) => a,
                    Origin::Forwarded { forwarder, .. } => forwarder,
                };
                warn!(
                    "client {} at {} rejected: {}, CONNECT discarded",
                    ClientId::new(connect.client_id.clone()),
                    addr,
                    e
                );
                if let Origin::Direct(addr) = origin {
                    // Answer with CONNACK(not supported) through a one-shot
                    // slot so the sender stops retrying.
                    let ephemeral = ctx.registry.create_ephemeral(addr);
                    ctx.client_send
                        .post(Event::ClientSend(
                            ephemeral,
                            SnPacket::ConnAck(crate::protocol::SnConnAck {
                                code: crate::protocol::ReturnCode::NotSupported,
                            }),
                        ))
                        .await;
                }
            }
        }
        return;
    }

    match origin {
        Origin::Direct(addr) => {
            // Non-CONNECT from an address the registry has never seen:
            // answer with DISCONNECT so clients that survived a gateway
            // restart fall back to a fresh handshake.
            debug!(
                "client at {} is not connecting, {} answered with DISCONNECT",
                addr,
                packet.name()
            );
            let ephemeral = ctx.registry.create_ephemeral(addr);
            ctx.client_send
                .post(Event::ClientSend(
                    ephemeral,
                    SnPacket::Disconnect(SnDisconnect::default()),
                ))
                .await;
        }
        Origin::Forwarded { forwarder, .. } => {
            debug!(
                "unknown wireless node behind {} sent {}, discarded",
                forwarder,
                packet.name()
            );
        }
    }
}

/// Resolve or create the client for a CONNECT from an unknown L2 source
fn admit(
    ctx: &GatewayContext,
    origin: &Origin,
    connect: &SnConnect,
) -> Result<ClientHandle, GatewayError> {
    let id = ClientId::new(connect.client_id.clone());
    let existing = ctx.registry.get_by_client_id(&id);

    match origin {
        Origin::Forwarded { forwarder, node_id } => {
            let client = match existing {
                Some(client) => client,
                None => ctx.registry.create(
                    ClientLocation::Forwarded {
                        forwarder: *forwarder,
                        node_id: node_id.clone(),
                    },
                    id,
                    ctx.params.forwarded_client_kind(),
                )?,
            };
            ctx.forwarders.add_client(*forwarder, node_id.clone(), client);
            Ok(client)
        }
        Origin::Direct(addr) => match existing {
            Some(client) => {
                let unbound = ctx
                    .registry
                    .with(client, |c| matches!(c.location, ClientLocation::Unbound))
                    .unwrap_or(false);
                if ctx.params.client_authentication && !unbound {
                    // Rebinding is refused with authentication on; the
                    // CONNECT only passes from the registered address.
                    return Err(GatewayError::AuthRejected);
                }
                if !ctx.registry.rebind_address(client, *addr) {
                    return Err(GatewayError::ProtocolViolation(
                        "forwarded client cannot move to a direct address",
                    ));
                }
                Ok(client)
            }
            None => ctx
                .registry
                .create(ClientLocation::Direct(*addr), id, ctx.params.client_kind()),
        },
    }
}
