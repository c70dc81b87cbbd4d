//! Packet-handling task
//!
//! The single consumer of packet-events. Advances per-client state
//! machines and emits outbound events; every registry mutation after
//! admission happens on this task, which is what makes the single-writer
//! discipline hold.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::client::{ClientHandle, ClientStatus};
use crate::event::{Event, EventReceiver, TimeoutKind};
use crate::mqtt::MqttPacket;
use crate::protocol::{GatewayError, SnDisconnect, SnPacket};

use super::{connection, publish, GatewayContext};

pub(super) async fn run(
    ctx: Arc<GatewayContext>,
    mut events: EventReceiver,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("packet handler stopped");
                return;
            }
            event = events.take() => match event {
                Some(event) => event,
                None => return,
            },
        };

        match event {
            Event::ClientRecv(client, packet) => {
                ctx.registry.with_mut(client, |c| c.touch());
                if let Err(e) = dispatch_sn(&ctx, client, packet).await {
                    react(&ctx, client, e).await;
                }
            }
            Event::BrokerRecv(client, packet) => {
                if let Err(e) = dispatch_mqtt(&ctx, client, packet).await {
                    react(&ctx, client, e).await;
                }
            }
            Event::Broadcast(packet) => {
                if matches!(packet, SnPacket::SearchGw(_)) {
                    connection::handle_searchgw(&ctx).await;
                }
            }
            Event::Timeout(client, kind) => handle_timeout(&ctx, client, kind).await,
            // Send events live on their own queues; one landing here is a
            // routing bug worth hearing about.
            Event::ClientSend(..) | Event::BrokerSend(..) => {
                warn!("send event misrouted into packet-events");
            }
        }
    }
}

/// Error policy: a protocol violation on an established client tears
/// the session down; everything else is logged and dropped.
async fn react(ctx: &GatewayContext, client: ClientHandle, error: GatewayError) {
    match &error {
        GatewayError::ProtocolViolation(msg) => {
            let established = ctx
                .registry
                .with(client, |c| c.status.is_established())
                .unwrap_or(false);
            warn!("protocol violation: {}", msg);
            if established {
                ctx.registry.with_mut(client, |c| {
                    c.status = ClientStatus::Disconnected;
                    c.sleep_queue.clear();
                    c.sleep_replay_pending = 0;
                });
                ctx.client_send
                    .post(Event::ClientSend(
                        client,
                        SnPacket::Disconnect(SnDisconnect::default()),
                    ))
                    .await;
                // No broker socket survives the teardown.
                ctx.broker_send
                    .post(Event::BrokerSend(client, MqttPacket::Disconnect))
                    .await;
            }
        }
        GatewayError::UnknownClient => {
            debug!("event for a stale client handle, dropped");
        }
        e => warn!("packet handling failed: {}", e),
    }
}

async fn dispatch_sn(
    ctx: &GatewayContext,
    client: ClientHandle,
    packet: SnPacket,
) -> Result<(), GatewayError> {
    match packet {
        SnPacket::Connect(connect) => connection::handle_connect(ctx, client, connect).await,
        SnPacket::WillTopic(wt) => connection::handle_willtopic(ctx, client, wt).await,
        SnPacket::WillMsg(wm) => connection::handle_willmsg(ctx, client, wm).await,
        SnPacket::Disconnect(d) => connection::handle_disconnect(ctx, client, d).await,
        SnPacket::PingReq(_) => connection::handle_pingreq(ctx, client).await,
        SnPacket::PingResp => Ok(()), // liveness only; touch already done
        SnPacket::WillTopicUpd(_) => {
            connection::handle_willtopicupd(ctx, client).await;
            Ok(())
        }
        SnPacket::WillMsgUpd(_) => {
            connection::handle_willmsgupd(ctx, client).await;
            Ok(())
        }
        SnPacket::Publish(p) => publish::handle_sn_publish(ctx, client, p).await,
        SnPacket::Register(r) => publish::handle_register(ctx, client, r).await,
        SnPacket::RegAck(a) => publish::handle_regack(ctx, client, a).await,
        SnPacket::Subscribe(s) => publish::handle_subscribe(ctx, client, s).await,
        SnPacket::Unsubscribe(u) => publish::handle_unsubscribe(ctx, client, u).await,
        SnPacket::PubAck(a) => publish::handle_sn_puback(ctx, client, a).await,
        packet @ (SnPacket::PubRec { .. } | SnPacket::PubRel { .. } | SnPacket::PubComp { .. }) => {
            publish::relay_qos2_upstream(ctx, client, &packet).await;
            Ok(())
        }
        other => {
            debug!("unexpected {} from a client, ignored", other.name());
            Ok(())
        }
    }
}

async fn dispatch_mqtt(
    ctx: &GatewayContext,
    client: ClientHandle,
    packet: MqttPacket,
) -> Result<(), GatewayError> {
    match packet {
        MqttPacket::ConnAck(ack) => connection::handle_broker_connack(ctx, client, ack).await,
        MqttPacket::Publish(p) => publish::handle_broker_publish(ctx, client, p).await,
        MqttPacket::SubAck(s) => publish::handle_broker_suback(ctx, client, s).await,
        MqttPacket::PingResp => {
            publish::handle_broker_pingresp(ctx, client).await;
            Ok(())
        }
        MqttPacket::PingReq => {
            // Brokers do not normally probe, but answering is harmless.
            ctx.broker_send
                .post(Event::BrokerSend(client, MqttPacket::PingResp))
                .await;
            Ok(())
        }
        MqttPacket::Disconnect => {
            connection::handle_broker_disconnect(ctx, client).await;
            Ok(())
        }
        packet @ (MqttPacket::PubAck { .. }
        | MqttPacket::PubRec { .. }
        | MqttPacket::PubRel { .. }
        | MqttPacket::PubComp { .. }
        | MqttPacket::UnsubAck { .. }) => {
            publish::handle_broker_ack(ctx, client, &packet).await;
            Ok(())
        }
        other => {
            debug!("unexpected {} from the broker, ignored", other.name());
            Ok(())
        }
    }
}

/// Timer expirations: keep-alive loss and registry garbage collection
async fn handle_timeout(ctx: &GatewayContext, client: ClientHandle, kind: TimeoutKind) {
    match kind {
        TimeoutKind::KeepAlive => {
            let info = ctx
                .registry
                .with(client, |c| (c.id.clone(), c.status.is_established()));
            let Some((id, established)) = info else {
                return;
            };
            if !established {
                return;
            }
            info!("client {} lost (keep-alive expired)", id);
            ctx.registry.with_mut(client, |c| {
                c.status = ClientStatus::Lost;
                c.lost_at = Some(std::time::Instant::now());
                c.sleep_queue.clear();
                c.sleep_replay_pending = 0;
            });
            ctx.broker_send
                .post(Event::BrokerSend(client, MqttPacket::Disconnect))
                .await;
        }
        TimeoutKind::Expire => {
            ctx.forwarders.remove_client(client);
            ctx.links.drop_link(client);
            ctx.registry.forget(client);
        }
    }
}
