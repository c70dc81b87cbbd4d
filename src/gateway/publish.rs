//! Publish, register and subscribe translation
//!
//! Topic-id resolution in both directions, the REGISTER/REGACK exchange,
//! SUBSCRIBE/SUBACK forwarding, QoS ack passthrough, and the downstream
//! path with sleep buffering and replay bookkeeping.

use tracing::{debug, warn};

use crate::client::{ClientHandle, ClientStatus, HeldPublish};
use crate::event::Event;
use crate::mqtt::{
    MqttConnect, MqttPacket, MqttPublish, MqttSubAck, MqttSubscribe, MqttUnsubscribe, QoS,
};
use crate::protocol::{
    GatewayError, RegAck, Register, ReturnCode, SnPacket, SnPubAck, SnPublish, SnQoS, SnSubAck,
    SnSubscribe, SnTopic, SnTopicFilter, SnUnsubscribe, TopicIdKind,
};

use super::GatewayContext;

/// Sleep-queue depth per client; the oldest message gives way
const MAX_SLEEP_QUEUE: usize = 100;

/// MQTT wildcard matching for aggregator-mode routing
pub(super) fn topic_matches(filter: &str, topic: &str) -> bool {
    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let mut f_idx = 0;
    let mut t_idx = 0;

    while f_idx < filter_parts.len() && t_idx < topic_parts.len() {
        let f = filter_parts[f_idx];
        if f == "#" {
            return true;
        } else if f == "+" || f == topic_parts[t_idx] {
            f_idx += 1;
            t_idx += 1;
        } else {
            return false;
        }
    }

    // A trailing "#" also matches the parent level.
    if f_idx < filter_parts.len() && filter_parts[f_idx] == "#" {
        return true;
    }
    f_idx == filter_parts.len() && t_idx == topic_parts.len()
}

/// PUBLISH from a client, upstream
pub(super) async fn handle_sn_publish(
    ctx: &GatewayContext,
    client: ClientHandle,
    publish: SnPublish,
) -> Result<(), GatewayError> {
    let (kind, status) = ctx
        .registry
        .with(client, |c| (c.kind, c.status))
        .ok_or(GatewayError::UnknownClient)?;

    if publish.qos == SnQoS::MinusOne {
        if kind != crate::client::ClientKind::QoSm1 {
            return Err(GatewayError::ProtocolViolation(
                "QoS -1 PUBLISH from a connected client",
            ));
        }
        return handle_qos_minus_one(ctx, client, status, publish).await;
    }

    let name = ctx
        .registry
        .with(client, |c| c.topics.name_of(&publish.topic))
        .ok_or(GatewayError::UnknownClient)?;
    let Some(name) = name else {
        // Stale or never-registered id: tell the client so it REGISTERs.
        ctx.client_send
            .post(Event::ClientSend(
                client,
                SnPacket::PubAck(SnPubAck {
                    topic_id: publish.topic.id_field(),
                    msg_id: publish.msg_id,
                    code: ReturnCode::InvalidTopicId,
                }),
            ))
            .await;
        return Ok(());
    };

    let qos: QoS = publish.qos.into();
    let mqtt_publish = MqttPublish {
        dup: publish.dup,
        qos,
        retain: publish.retain,
        topic: name,
        packet_id: (qos != QoS::AtMostOnce).then_some(publish.msg_id),
        payload: publish.payload,
    };

    if qos != QoS::AtMostOnce {
        ctx.registry.with_mut(client, |c| {
            c.inflight_pub_topics
                .insert(publish.msg_id, publish.topic.id_field());
        });
    }

    match status {
        ClientStatus::AwaitingConnack => {
            ctx.registry
                .with_mut(client, |c| c.uplink_backlog.push(mqtt_publish));
        }
        _ => {
            ctx.broker_send
                .post(Event::BrokerSend(client, MqttPacket::Publish(mqtt_publish)))
                .await;
        }
    }
    Ok(())
}

/// QoS -1: fire-and-forget through the proxy's synthetic client. The
/// broker session is brought up lazily on the first publish.
async fn handle_qos_minus_one(
    ctx: &GatewayContext,
    client: ClientHandle,
    status: ClientStatus,
    publish: SnPublish,
) -> Result<(), GatewayError> {
    let name = ctx
        .registry
        .with(client, |c| c.topics.name_of(&publish.topic))
        .ok_or(GatewayError::UnknownClient)?;
    let Some(name) = name else {
        warn!("QoS -1 PUBLISH with unknown topic id {}, discarded", publish.topic.id_field());
        return Ok(());
    };

    let mqtt_publish = MqttPublish {
        dup: false,
        qos: QoS::AtMostOnce,
        retain: publish.retain,
        topic: name,
        packet_id: None,
        payload: publish.payload,
    };

    match status {
        ClientStatus::Active => {
            ctx.broker_send
                .post(Event::BrokerSend(client, MqttPacket::Publish(mqtt_publish)))
                .await;
        }
        ClientStatus::AwaitingConnack => {
            ctx.registry
                .with_mut(client, |c| c.uplink_backlog.push(mqtt_publish));
        }
        _ => {
            // First publish from this sender: connect the synthetic
            // session, park the message until CONNACK.
            let connect = ctx
                .registry
                .with_mut(client, |c| {
                    c.status = ClientStatus::AwaitingConnack;
                    c.uplink_backlog.push(mqtt_publish);
                    Box::new(MqttConnect {
                        version: ctx.params.mqtt_version,
                        client_id: c.id.as_str_lossy().into_owned(),
                        clean_session: true,
                        keep_alive: 0,
                        username: ctx.params.login_id.clone(),
                        password: ctx.params.password.clone(),
                        will: None,
                    })
                })
                .ok_or(GatewayError::UnknownClient)?;
            ctx.broker_send
                .post(Event::BrokerSend(client, MqttPacket::Connect(connect)))
                .await;
        }
    }
    Ok(())
}

/// REGISTER from a client: assign a normal topic id
pub(super) async fn handle_register(
    ctx: &GatewayContext,
    client: ClientHandle,
    register: Register,
) -> Result<(), GatewayError> {
    let assigned = ctx
        .registry
        .with_mut(client, |c| c.topics.register(&register.topic_name))
        .ok_or(GatewayError::UnknownClient)?;

    let ack = match assigned {
        Some(topic_id) => RegAck {
            topic_id,
            msg_id: register.msg_id,
            code: ReturnCode::Accepted,
        },
        None => RegAck {
            topic_id: 0,
            msg_id: register.msg_id,
            code: ReturnCode::NotSupported,
        },
    };
    ctx.client_send
        .post(Event::ClientSend(client, SnPacket::RegAck(ack)))
        .await;
    Ok(())
}

/// REGACK from a client releases the publishes parked on that topic
pub(super) async fn handle_regack(
    ctx: &GatewayContext,
    client: ClientHandle,
    ack: RegAck,
) -> Result<(), GatewayError> {
    let released = ctx
        .registry
        .with_mut(client, |c| {
            let topic_id = c.waited_pub_msgids.remove(&ack.msg_id)?;
            let (matching, rest): (Vec<_>, Vec<_>) = c
                .held_publishes
                .drain(..)
                .partition(|h| h.topic_id == topic_id);
            c.held_publishes = rest;
            Some((topic_id, matching))
        })
        .ok_or(GatewayError::UnknownClient)?;

    let Some((topic_id, held)) = released else {
        debug!("REGACK with unknown msg id {}, ignored", ack.msg_id);
        return Ok(());
    };

    if ack.code != ReturnCode::Accepted {
        warn!(
            "client rejected REGISTER for topic id {} ({:?}), {} messages dropped",
            topic_id,
            ack.code,
            held.len()
        );
        return Ok(());
    }

    for held in held {
        ctx.client_send
            .post(Event::ClientSend(client, SnPacket::Publish(held.publish)))
            .await;
    }
    Ok(())
}

/// SUBSCRIBE from a client, forwarded upstream one filter at a time
pub(super) async fn handle_subscribe(
    ctx: &GatewayContext,
    client: ClientHandle,
    subscribe: SnSubscribe,
) -> Result<(), GatewayError> {
    let qos: QoS = subscribe.qos.into();

    let resolved = ctx
        .registry
        .with_mut(client, |c| match &subscribe.topic {
            SnTopicFilter::Name(name) => {
                let wildcard = name.contains('+') || name.contains('#');
                if wildcard {
                    Some((name.clone(), 0))
                } else {
                    c.topics.register(name).map(|id| (name.clone(), id))
                }
            }
            SnTopicFilter::PreDefined(id) => c
                .topics
                .name_of(&SnTopic::PreDefined(*id))
                .map(|name| (name, *id)),
            SnTopicFilter::Short(s) => std::str::from_utf8(s)
                .ok()
                .map(|name| (name.to_string(), u16::from_be_bytes(*s))),
        })
        .ok_or(GatewayError::UnknownClient)?;

    let Some((filter, topic_id)) = resolved else {
        let code = match subscribe.topic {
            SnTopicFilter::PreDefined(_) => ReturnCode::InvalidTopicId,
            _ => ReturnCode::NotSupported,
        };
        ctx.client_send
            .post(Event::ClientSend(
                client,
                SnPacket::SubAck(SnSubAck {
                    qos: SnQoS::AtMostOnce,
                    topic_id: 0,
                    msg_id: subscribe.msg_id,
                    code,
                }),
            ))
            .await;
        return Ok(());
    };

    ctx.registry.with_mut(client, |c| {
        c.waited_sub_msgids.insert(subscribe.msg_id, topic_id);
        if !c.subscriptions.contains(&filter) {
            c.subscriptions.push(filter.clone());
        }
    });

    ctx.broker_send
        .post(Event::BrokerSend(
            client,
            MqttPacket::Subscribe(MqttSubscribe {
                packet_id: subscribe.msg_id,
                filter,
                qos,
            }),
        ))
        .await;
    Ok(())
}

/// Broker SUBACK becomes the SN SUBACK carrying the granted topic id
pub(super) async fn handle_broker_suback(
    ctx: &GatewayContext,
    client: ClientHandle,
    suback: MqttSubAck,
) -> Result<(), GatewayError> {
    let topic_id = ctx
        .registry
        .with_mut(client, |c| c.waited_sub_msgids.remove(&suback.packet_id))
        .ok_or(GatewayError::UnknownClient)?
        .unwrap_or(0);

    let rc = suback.return_codes.first().copied().unwrap_or(0x80);
    let (qos, code) = if rc >= 0x80 {
        (SnQoS::AtMostOnce, ReturnCode::NotSupported)
    } else {
        (
            QoS::from_u8(rc & 0x03).unwrap_or(QoS::AtMostOnce).into(),
            ReturnCode::Accepted,
        )
    };

    ctx.client_send
        .post(Event::ClientSend(
            client,
            SnPacket::SubAck(SnSubAck {
                qos,
                topic_id,
                msg_id: suback.packet_id,
                code,
            }),
        ))
        .await;
    Ok(())
}

/// UNSUBSCRIBE from a client
pub(super) async fn handle_unsubscribe(
    ctx: &GatewayContext,
    client: ClientHandle,
    unsubscribe: SnUnsubscribe,
) -> Result<(), GatewayError> {
    let filter = ctx
        .registry
        .with_mut(client, |c| {
            let filter = match &unsubscribe.topic {
                SnTopicFilter::Name(name) => Some(name.clone()),
                SnTopicFilter::PreDefined(id) => c.topics.name_of(&SnTopic::PreDefined(*id)),
                SnTopicFilter::Short(s) => std::str::from_utf8(s).ok().map(|s| s.to_string()),
            };
            if let Some(filter) = &filter {
                c.subscriptions.retain(|f| f != filter);
            }
            filter
        })
        .ok_or(GatewayError::UnknownClient)?;

    let Some(filter) = filter else {
        // Nothing to unsubscribe upstream; acknowledge anyway.
        ctx.client_send
            .post(Event::ClientSend(
                client,
                SnPacket::UnsubAck {
                    msg_id: unsubscribe.msg_id,
                },
            ))
            .await;
        return Ok(());
    };

    ctx.broker_send
        .post(Event::BrokerSend(
            client,
            MqttPacket::Unsubscribe(MqttUnsubscribe {
                packet_id: unsubscribe.msg_id,
                filter,
            }),
        ))
        .await;
    Ok(())
}

/// Client-side QoS acks relayed upstream
pub(super) async fn handle_sn_puback(
    ctx: &GatewayContext,
    client: ClientHandle,
    ack: SnPubAck,
) -> Result<(), GatewayError> {
    if ack.code != ReturnCode::Accepted {
        debug!("client PUBACK with {:?}, not relayed", ack.code);
        return Ok(());
    }
    ctx.broker_send
        .post(Event::BrokerSend(
            client,
            MqttPacket::PubAck {
                packet_id: ack.msg_id,
            },
        ))
        .await;
    Ok(())
}

/// QoS 2 frames pass through without local state (flow bookkeeping is the
/// broker's and the client's business).
pub(super) async fn relay_qos2_upstream(
    ctx: &GatewayContext,
    client: ClientHandle,
    packet: &SnPacket,
) {
    let mqtt = match packet {
        SnPacket::PubRec { msg_id } => MqttPacket::PubRec { packet_id: *msg_id },
        SnPacket::PubRel { msg_id } => MqttPacket::PubRel { packet_id: *msg_id },
        SnPacket::PubComp { msg_id } => MqttPacket::PubComp { packet_id: *msg_id },
        _ => return,
    };
    ctx.broker_send.post(Event::BrokerSend(client, mqtt)).await;
}

/// PUBLISH from the broker, downstream. The handle tags the owning link;
/// in aggregator mode the message is re-routed by subscription match.
pub(super) async fn handle_broker_publish(
    ctx: &GatewayContext,
    client: ClientHandle,
    publish: MqttPublish,
) -> Result<(), GatewayError> {
    // Sleep-queue replays come back through packet-events tagged with the
    // sleeping client; they are directed deliveries, not routing input.
    let replaying = ctx
        .registry
        .with(client, |c| c.sleep_replay_pending > 0)
        .unwrap_or(false);
    if replaying {
        deliver(ctx, client, publish).await;
        finish_replay_step(ctx, client).await;
        return Ok(());
    }

    if ctx.params.aggregator {
        let mut targets = Vec::new();
        ctx.registry.for_each(|handle, c| {
            if c.kind.is_aggregated()
                && c.status.is_established()
                && c.subscriptions.iter().any(|f| topic_matches(f, &publish.topic))
            {
                targets.push(handle);
            }
        });
        if targets.is_empty() {
            debug!("no aggregated subscriber for {}, dropped", publish.topic);
            return Ok(());
        }
        for target in targets {
            deliver(ctx, target, publish.clone()).await;
        }
    } else {
        deliver(ctx, client, publish).await;
    }
    Ok(())
}

/// Deliver one downstream PUBLISH to one client: buffer when asleep,
/// resolve or register the topic id otherwise.
async fn deliver(ctx: &GatewayContext, client: ClientHandle, publish: MqttPublish) {
    enum Action {
        Buffered,
        Send(SnPublish),
        Hold(Register),
        Drop(&'static str),
    }

    let action = ctx.registry.with_mut(client, |c| {
        match c.status {
            ClientStatus::Asleep => {
                // The queue fills only while the client sleeps.
                if c.sleep_queue.len() >= MAX_SLEEP_QUEUE {
                    c.sleep_queue.pop_front();
                }
                c.sleep_queue.push_back(publish.clone());
                return Action::Buffered;
            }
            ClientStatus::Active | ClientStatus::Awake => {}
            _ => return Action::Drop("client not connected"),
        }

        let qos: SnQoS = publish.qos.into();
        let msg_id = if qos == SnQoS::AtMostOnce {
            0
        } else {
            publish.packet_id.unwrap_or_else(|| c.next_msg_id())
        };

        let topic = match c.topics.id_of(&publish.topic) {
            Some((TopicIdKind::Normal, id)) => SnTopic::Normal(id),
            Some((TopicIdKind::PreDefined, id)) | Some((TopicIdKind::Short, id)) => {
                SnTopic::PreDefined(id)
            }
            None if publish.topic.len() == 2 && publish.topic.is_ascii() => {
                let b = publish.topic.as_bytes();
                SnTopic::Short([b[0], b[1]])
            }
            None => {
                // Unknown topic: REGISTER first, park the publish until
                // the REGACK arrives.
                let Some(id) = c.topics.register(&publish.topic) else {
                    return Action::Drop("topic id space exhausted");
                };
                let msg_id_reg = c.next_msg_id();
                c.waited_pub_msgids.insert(msg_id_reg, id);
                c.held_publishes.push(HeldPublish {
                    topic_id: id,
                    publish: SnPublish {
                        dup: false,
                        qos,
                        retain: publish.retain,
                        topic: SnTopic::Normal(id),
                        msg_id,
                        payload: publish.payload.clone(),
                    },
                });
                return Action::Hold(Register {
                    topic_id: id,
                    msg_id: msg_id_reg,
                    topic_name: publish.topic.clone(),
                });
            }
        };

        Action::Send(SnPublish {
            dup: publish.dup,
            qos,
            retain: publish.retain,
            topic,
            msg_id,
            payload: publish.payload.clone(),
        })
    });

    match action {
        Some(Action::Send(sn)) => {
            ctx.client_send
                .post(Event::ClientSend(client, SnPacket::Publish(sn)))
                .await;
        }
        Some(Action::Hold(register)) => {
            ctx.client_send
                .post(Event::ClientSend(client, SnPacket::Register(register)))
                .await;
        }
        Some(Action::Buffered) => {}
        Some(Action::Drop(reason)) => debug!("downstream PUBLISH dropped: {}", reason),
        None => debug!("downstream PUBLISH for a stale client handle"),
    }
}

/// Replay bookkeeping: once the last replayed event is handled the held
/// PINGRESP goes out and the client goes back to sleep.
async fn finish_replay_step(ctx: &GatewayContext, client: ClientHandle) {
    let respond = ctx
        .registry
        .with_mut(client, |c| {
            c.sleep_replay_pending = c.sleep_replay_pending.saturating_sub(1);
            if c.ping_held && c.sleep_replay_pending == 0 && c.sleep_queue.is_empty() {
                c.ping_held = false;
                c.status = ClientStatus::Asleep;
                true
            } else {
                false
            }
        })
        .unwrap_or(false);

    if respond {
        ctx.client_send
            .post(Event::ClientSend(client, SnPacket::PingResp))
            .await;
    }
}

/// Broker-side QoS acks relayed downstream
pub(super) async fn handle_broker_ack(
    ctx: &GatewayContext,
    client: ClientHandle,
    packet: &MqttPacket,
) {
    let sn = match packet {
        MqttPacket::PubAck { packet_id } => {
            let topic_id = ctx
                .registry
                .with_mut(client, |c| c.inflight_pub_topics.remove(packet_id))
                .flatten()
                .unwrap_or(0);
            SnPacket::PubAck(SnPubAck {
                topic_id,
                msg_id: *packet_id,
                code: ReturnCode::Accepted,
            })
        }
        MqttPacket::PubRec { packet_id } => SnPacket::PubRec { msg_id: *packet_id },
        MqttPacket::PubRel { packet_id } => SnPacket::PubRel { msg_id: *packet_id },
        MqttPacket::PubComp { packet_id } => SnPacket::PubComp { msg_id: *packet_id },
        MqttPacket::UnsubAck { packet_id } => SnPacket::UnsubAck { msg_id: *packet_id },
        _ => return,
    };
    ctx.client_send.post(Event::ClientSend(client, sn)).await;
}

/// Broker PINGRESP: answer the client that owes one
pub(super) async fn handle_broker_pingresp(ctx: &GatewayContext, client: ClientHandle) {
    let direct = ctx
        .registry
        .with_mut(client, |c| {
            let was = c.awaiting_pingresp;
            c.awaiting_pingresp = false;
            was
        })
        .unwrap_or(false);

    let target = if direct {
        Some(client)
    } else if ctx.params.aggregator {
        // Shared link: the response belongs to whichever client pinged.
        let mut found = None;
        ctx.registry.for_each(|handle, c| {
            if found.is_none() && c.awaiting_pingresp {
                found = Some(handle);
            }
        });
        if let Some(found) = found {
            ctx.registry.with_mut(found, |c| c.awaiting_pingresp = false);
        }
        found
    } else {
        None
    };

    if let Some(target) = target {
        ctx.client_send
            .post(Event::ClientSend(target, SnPacket::PingResp))
            .await;
    }
}
