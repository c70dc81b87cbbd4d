//! Client send task
//!
//! Drains the client-send queue, serializes packets and writes them to the
//! sensor network - unicast to direct clients, frame-02 encapsulated to
//! forwarded ones, broadcast for the beacon traffic.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::client::ClientLocation;
use crate::codec::encode;
use crate::event::{Event, EventReceiver};
use crate::protocol::{Encapsulated, SnPacket};
use crate::transport::SensorNetwork;

use super::GatewayContext;

pub(super) async fn run(
    ctx: Arc<GatewayContext>,
    sensor: Arc<dyn SensorNetwork>,
    mut events: EventReceiver,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        let event = tokio::select! {
            biased;

            _ = shutdown.recv() => {
                debug!("client send task stopped");
                return;
            }
            event = events.take() => match event {
                Some(event) => event,
                None => return,
            },
        };

        match event {
            Event::ClientSend(client, packet) => {
                // The location snapshot is all the sender reads; client
                // state stays with the handler.
                let location = ctx.registry.with(client, |c| (c.location.clone(), c.id.clone()));
                let Some((location, id)) = location else {
                    debug!("{} for a stale client handle, dropped", packet.name());
                    continue;
                };
                trace!("{} -> {}", packet.name(), id);

                match location {
                    ClientLocation::Direct(addr) => {
                        buf.clear();
                        if let Err(e) = encode(&packet, &mut buf) {
                            warn!("encode of {} failed: {}", packet.name(), e);
                            continue;
                        }
                        if let Err(e) = sensor.unicast(addr, &buf).await {
                            warn!("unicast to {} failed: {}", addr, e);
                        }
                    }
                    ClientLocation::Forwarded { forwarder, node_id } => {
                        // Inner frame first, then the encapsulation.
                        buf.clear();
                        if let Err(e) = encode(&packet, &mut buf) {
                            warn!("encode of {} failed: {}", packet.name(), e);
                            continue;
                        }
                        let inner = buf.split().freeze();
                        let wrapped = SnPacket::Encapsulated(Encapsulated {
                            ctrl: 0x00,
                            node_id,
                            inner,
                        });
                        buf.clear();
                        if let Err(e) = encode(&wrapped, &mut buf) {
                            warn!("encapsulation encode failed: {}", e);
                            continue;
                        }
                        if let Err(e) = sensor.unicast(forwarder, &buf).await {
                            warn!("unicast to forwarder {} failed: {}", forwarder, e);
                        }
                    }
                    ClientLocation::Unbound => {
                        debug!("{} for an unbound roster client, dropped", packet.name());
                    }
                }
            }
            Event::Broadcast(packet) => {
                trace!("{} -> broadcast", packet.name());
                buf.clear();
                if let Err(e) = encode(&packet, &mut buf) {
                    warn!("encode of {} failed: {}", packet.name(), e);
                    continue;
                }
                if let Err(e) = sensor.broadcast(&buf).await {
                    warn!("broadcast failed: {}", e);
                }
            }
            _ => warn!("non-client event misrouted into client-send"),
        }
    }
}
