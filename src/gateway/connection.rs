//! MQTT-SN connection state machine
//!
//! CONNECT with its three-phase will setup, DISCONNECT/sleep, PINGREQ and
//! the SEARCHGW/ADVERTISE beacons. Each handler advances one client's
//! state and emits events; nothing here touches a socket.

use bytes::Bytes;
use tracing::{debug, info};

use crate::client::{ClientHandle, ClientStatus, PendingWill};
use crate::event::Event;
use crate::mqtt::{MqttConnAck, MqttConnect, MqttPacket, MqttWill};
use crate::protocol::{
    GatewayError, GwInfo, ReturnCode, SnConnAck, SnConnect, SnDisconnect, SnPacket, WillMsg,
    WillTopic,
};

use super::GatewayContext;

/// CONNECT from a client
pub(super) async fn handle_connect(
    ctx: &GatewayContext,
    client: ClientHandle,
    connect: SnConnect,
) -> Result<(), GatewayError> {
    // A sleeping client reconnecting resumes its session: CONNACK at once,
    // replay the buffer, and leave the broker session untouched.
    let sleeping = ctx
        .registry
        .with(client, |c| c.status.is_sleeping())
        .ok_or(GatewayError::UnknownClient)?;
    if sleeping {
        ctx.registry.with_mut(client, |c| {
            c.status = ClientStatus::Active;
            c.touch();
        });
        ctx.client_send
            .post(Event::ClientSend(
                client,
                SnPacket::ConnAck(SnConnAck {
                    code: ReturnCode::Accepted,
                }),
            ))
            .await;
        flush_sleep_queue(ctx, client).await;
        return Ok(());
    }

    // Fresh handshake: zero the CONNECT scratch and copy the negotiated
    // parameters over.
    ctx.registry
        .with_mut(client, |c| {
            c.pending_connect.clean_session = connect.clean_session;
            c.pending_connect.keep_alive = connect.duration;
            c.pending_connect.will = None;
            c.keep_alive = connect.duration;
            c.waiting_will_msg = false;
            c.fresh_session = false;
            c.lost_at = None;
            c.touch();

            if connect.clean_session {
                c.waited_pub_msgids.clear();
                c.waited_sub_msgids.clear();
                c.inflight_pub_topics.clear();
                c.held_publishes.clear();
                c.subscriptions.clear();
                c.uplink_backlog.clear();
                // Pre-defined ids survive the clean session.
                c.topics.erase_normal();
                c.fresh_session = true;
            }
        })
        .ok_or(GatewayError::UnknownClient)?;

    if connect.will {
        ctx.registry.with_mut(client, |c| {
            c.status = ClientStatus::AwaitingWillTopic;
        });
        ctx.client_send
            .post(Event::ClientSend(client, SnPacket::WillTopicReq))
            .await;
    } else {
        send_broker_connect(ctx, client).await?;
    }
    Ok(())
}

/// WILLTOPIC: second phase of the will setup
pub(super) async fn handle_willtopic(
    ctx: &GatewayContext,
    client: ClientHandle,
    will_topic: WillTopic,
) -> Result<(), GatewayError> {
    let status = ctx
        .registry
        .with(client, |c| c.status)
        .ok_or(GatewayError::UnknownClient)?;
    if status != ClientStatus::AwaitingWillTopic {
        debug!("WILLTOPIC outside the handshake window, ignored");
        return Ok(());
    }

    if will_topic.topic.is_empty() {
        // Empty body withdraws the will; proceed without one.
        ctx.registry.with_mut(client, |c| {
            c.pending_connect.will = None;
        });
        return send_broker_connect(ctx, client).await;
    }

    ctx.registry.with_mut(client, |c| {
        c.pending_connect.will = Some(PendingWill {
            topic: will_topic.topic,
            qos: will_topic.qos,
            retain: will_topic.retain,
            message: None,
        });
        c.waiting_will_msg = true;
        c.status = ClientStatus::AwaitingWillMsg;
    });
    ctx.client_send
        .post(Event::ClientSend(client, SnPacket::WillMsgReq))
        .await;
    Ok(())
}

/// WILLMSG: final phase; the MQTT CONNECT goes out only now
pub(super) async fn handle_willmsg(
    ctx: &GatewayContext,
    client: ClientHandle,
    will_msg: WillMsg,
) -> Result<(), GatewayError> {
    let waiting = ctx
        .registry
        .with(client, |c| c.waiting_will_msg)
        .ok_or(GatewayError::UnknownClient)?;
    if !waiting {
        debug!("WILLMSG while not waiting for one, ignored");
        return Ok(());
    }

    ctx.registry.with_mut(client, |c| {
        if let Some(will) = c.pending_connect.will.as_mut() {
            will.message = Some(will_msg.message);
        }
        c.waiting_will_msg = false;
    });
    send_broker_connect(ctx, client).await
}

/// Compose the buffered MQTT CONNECT and hand it to the broker sender
async fn send_broker_connect(
    ctx: &GatewayContext,
    client: ClientHandle,
) -> Result<(), GatewayError> {
    let connect = compose_connect(ctx, client)?;
    ctx.registry.with_mut(client, |c| {
        c.status = ClientStatus::AwaitingConnack;
    });
    ctx.broker_send
        .post(Event::BrokerSend(client, MqttPacket::Connect(connect)))
        .await;
    Ok(())
}

/// Build the MQTT CONNECT from the per-client scratch and the credential
/// policy.
fn compose_connect(
    ctx: &GatewayContext,
    client: ClientHandle,
) -> Result<Box<MqttConnect>, GatewayError> {
    let (id, pending) = ctx
        .registry
        .with(client, |c| (c.id.clone(), c.pending_connect.clone()))
        .ok_or(GatewayError::UnknownClient)?;

    let params = &ctx.params;
    let split_len = params.imei_len + params.pw_len;
    let (username, password) = if params.client_id_to_user_password && id.len() == split_len {
        // ClientId doubles as IMEI-login + password for brokers that
        // authorize per device.
        let bytes = id.as_bytes();
        let login = String::from_utf8_lossy(&bytes[..params.imei_len]).into_owned();
        let pass = Bytes::copy_from_slice(&bytes[params.imei_len..]);
        info!("client {} split into broker credentials for {}", id, login);
        (Some(login), Some(pass))
    } else {
        (
            params.login_id.clone(),
            params.password.clone(),
        )
    };

    let will = pending.will.as_ref().map(|w| MqttWill {
        topic: w.topic.clone(),
        payload: w.message.clone().unwrap_or_default(),
        qos: w.qos.into(),
        retain: w.retain,
    });

    Ok(Box::new(MqttConnect {
        version: params.mqtt_version,
        client_id: id.as_str_lossy().into_owned(),
        clean_session: pending.clean_session,
        keep_alive: pending.keep_alive,
        username,
        password,
        will,
    }))
}

/// Broker CONNACK completes (or fails) the handshake
pub(super) async fn handle_broker_connack(
    ctx: &GatewayContext,
    client: ClientHandle,
    ack: MqttConnAck,
) -> Result<(), GatewayError> {
    let status = ctx
        .registry
        .with(client, |c| c.status)
        .ok_or(GatewayError::UnknownClient)?;
    if status != ClientStatus::AwaitingConnack {
        debug!("broker CONNACK in state {:?}, ignored", status);
        return Ok(());
    }

    if ack.accepted() {
        let (backlog, synthetic, fresh) = ctx
            .registry
            .with_mut(client, |c| {
                c.status = ClientStatus::Active;
                c.touch();
                (
                    std::mem::take(&mut c.uplink_backlog),
                    c.kind == crate::client::ClientKind::QoSm1,
                    c.fresh_session,
                )
            })
            .unwrap_or_default();
        debug!(
            "broker accepted the {} session",
            if fresh { "fresh" } else { "resumed" }
        );
        // QoS -1 senders never did a handshake; nothing to acknowledge.
        if !synthetic {
            ctx.client_send
                .post(Event::ClientSend(
                    client,
                    SnPacket::ConnAck(SnConnAck {
                        code: ReturnCode::Accepted,
                    }),
                ))
                .await;
        }
        for publish in backlog {
            ctx.broker_send
                .post(Event::BrokerSend(client, MqttPacket::Publish(publish)))
                .await;
        }
    } else {
        // 3 is "server unavailable" in MQTT 3.x; everything else is a
        // policy rejection.
        let code = if ack.code == 3 {
            ReturnCode::Congestion
        } else {
            ReturnCode::NotSupported
        };
        ctx.registry.with_mut(client, |c| {
            c.status = ClientStatus::Disconnected;
            c.pending_connect.will = None;
            c.uplink_backlog.clear();
        });
        ctx.client_send
            .post(Event::ClientSend(
                client,
                SnPacket::ConnAck(SnConnAck { code }),
            ))
            .await;
    }
    Ok(())
}

/// DISCONNECT from a client: duration 0 ends the session, anything else
/// puts the client to sleep with the broker session kept alive.
pub(super) async fn handle_disconnect(
    ctx: &GatewayContext,
    client: ClientHandle,
    disconnect: SnDisconnect,
) -> Result<(), GatewayError> {
    let duration = disconnect.duration.unwrap_or(0);

    if duration == 0 {
        ctx.registry.with_mut(client, |c| {
            c.status = ClientStatus::Disconnected;
            c.pending_connect.will = None;
            c.waiting_will_msg = false;
            c.sleep_queue.clear();
            c.sleep_replay_pending = 0;
            c.ping_held = false;
        });
        // The broker socket goes away with the session; the
        // broker sender closes the link after this frame.
        ctx.broker_send
            .post(Event::BrokerSend(client, MqttPacket::Disconnect))
            .await;
    } else {
        ctx.registry.with_mut(client, |c| {
            c.status = ClientStatus::Asleep;
            c.sleep_duration = duration;
            c.touch();
        });
    }

    ctx.client_send
        .post(Event::ClientSend(
            client,
            SnPacket::Disconnect(SnDisconnect::default()),
        ))
        .await;
    Ok(())
}

/// PINGREQ: wakes a sleeping client to drain its buffer, otherwise relays
/// the liveness probe to the broker.
pub(super) async fn handle_pingreq(
    ctx: &GatewayContext,
    client: ClientHandle,
) -> Result<(), GatewayError> {
    let (sleeping, buffered) = ctx
        .registry
        .with(client, |c| (c.status.is_sleeping(), !c.sleep_queue.is_empty()))
        .ok_or(GatewayError::UnknownClient)?;

    if sleeping && buffered {
        // Every buffered PUBLISH re-enters packet-events and the
        // PINGRESP is held until the replay drains.
        ctx.registry.with_mut(client, |c| {
            c.status = ClientStatus::Awake;
            c.ping_held = true;
            c.touch();
        });
        flush_sleep_queue(ctx, client).await;
    } else {
        ctx.registry.with_mut(client, |c| {
            c.awaiting_pingresp = true;
            c.touch();
        });
        ctx.broker_send
            .post(Event::BrokerSend(client, MqttPacket::PingReq))
            .await;
    }
    Ok(())
}

/// Replay the sleep queue through packet-events so the normal downstream
/// path (topic resolution included) applies.
pub(super) async fn flush_sleep_queue(ctx: &GatewayContext, client: ClientHandle) {
    let drained: Vec<_> = ctx
        .registry
        .with_mut(client, |c| {
            let drained: Vec<_> = c.sleep_queue.drain(..).collect();
            c.sleep_replay_pending += drained.len() as u32;
            drained
        })
        .unwrap_or_default();

    for publish in drained {
        ctx.packet_events
            .post(Event::BrokerRecv(client, MqttPacket::Publish(publish)))
            .await;
    }
}

/// SEARCHGW: answer with GWINFO on the broadcast path
pub(super) async fn handle_searchgw(ctx: &GatewayContext) {
    ctx.client_send
        .post(Event::Broadcast(SnPacket::GwInfo(GwInfo {
            gw_id: ctx.params.gateway_id,
            gw_addr: Bytes::new(),
        })))
        .await;
}

/// Runtime will updates are not supported; say so.
pub(super) async fn handle_willtopicupd(ctx: &GatewayContext, client: ClientHandle) {
    ctx.client_send
        .post(Event::ClientSend(
            client,
            SnPacket::WillTopicResp {
                code: ReturnCode::NotSupported,
            },
        ))
        .await;
}

pub(super) async fn handle_willmsgupd(ctx: &GatewayContext, client: ClientHandle) {
    ctx.client_send
        .post(Event::ClientSend(
            client,
            SnPacket::WillMsgResp {
                code: ReturnCode::NotSupported,
            },
        ))
        .await;
}

/// Broker closed the session (EOF or MQTT DISCONNECT)
pub(super) async fn handle_broker_disconnect(ctx: &GatewayContext, client: ClientHandle) {
    let established = ctx
        .registry
        .with(client, |c| c.status.is_established() || c.status == ClientStatus::AwaitingConnack)
        .unwrap_or(false);
    if !established {
        return;
    }
    ctx.registry.with_mut(client, |c| {
        c.status = ClientStatus::Disconnected;
        c.sleep_queue.clear();
        c.sleep_replay_pending = 0;
        c.ping_held = false;
    });
    ctx.links.drop_link(client);
    ctx.client_send
        .post(Event::ClientSend(
            client,
            SnPacket::Disconnect(SnDisconnect::default()),
        ))
        .await;
}
