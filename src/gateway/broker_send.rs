//! Broker send task
//!
//! Drains the broker-send queue and writes packets onto the owning
//! client's uplink. CONNECTs establish the link on demand; failure to
//! reach the broker is surfaced back through packet-events as a refused
//! CONNACK so the state machine sees one code path.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::event::{Event, EventReceiver};
use crate::mqtt::{MqttConnAck, MqttPacket};

use super::GatewayContext;

/// MQTT 3.x CONNACK code for "server unavailable"
const CONNACK_SERVER_UNAVAILABLE: u8 = 3;

pub(super) async fn run(
    ctx: Arc<GatewayContext>,
    mut events: EventReceiver,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("broker send task stopped");
                return;
            }
            event = events.take() => match event {
                Some(event) => event,
                None => return,
            },
        };

        let Event::BrokerSend(client, packet) = event else {
            warn!("non-broker event misrouted into broker-send");
            continue;
        };

        match packet {
            MqttPacket::Connect(_) => {
                let link = match ctx.links.link_for(client).await {
                    Ok(link) => link,
                    Err(e) => {
                        debug!("broker unreachable: {}", e);
                        bounce_connack(&ctx, client).await;
                        continue;
                    }
                };
                if link.send(packet).await.is_err() {
                    bounce_connack(&ctx, client).await;
                }
            }
            MqttPacket::Disconnect => {
                // The shared aggregator session outlives any one client;
                // only transparent links get torn down.
                if ctx.links.aggregator() {
                    debug!("client disconnect not forwarded on the shared link");
                    continue;
                }
                if let Some(link) = ctx.links.existing(client) {
                    let _ = link.send(MqttPacket::Disconnect).await;
                }
                ctx.links.drop_link(client);
            }
            packet => {
                let Some(link) = ctx.links.existing(client) else {
                    debug!("no broker link for this client, {} dropped", packet.name());
                    continue;
                };
                if let Err(e) = link.send(packet).await {
                    warn!("uplink send failed: {}", e);
                }
            }
        }
    }
}

/// Synthesize a refused CONNACK so the handler answers the client with
/// CONNACK(congestion) through the ordinary path.
async fn bounce_connack(ctx: &GatewayContext, client: crate::client::ClientHandle) {
    ctx.packet_events
        .post(Event::BrokerRecv(
            client,
            MqttPacket::ConnAck(MqttConnAck {
                session_present: false,
                code: CONNACK_SERVER_UNAVAILABLE,
            }),
        ))
        .await;
}
