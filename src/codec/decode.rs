//! MQTT-SN frame decoding

use bytes::Bytes;
use smallvec::SmallVec;

use crate::protocol::{
    flags, Advertise, DecodeError, Encapsulated, GwInfo, MsgType, RegAck, Register, ReturnCode,
    SearchGw, SnConnAck, SnConnect, SnDisconnect, SnPacket, SnPingReq, SnPubAck, SnPublish,
    SnQoS, SnSubAck, SnSubscribe, SnTopic, SnTopicFilter, SnUnsubscribe, TopicIdKind, WillMsg,
    WillTopic, MAX_CLIENT_ID_LEN, MAX_SN_PACKET_LEN,
};

use super::{read_length, read_str, read_u16};

/// Decode one MQTT-SN frame from the front of `buf`.
///
/// Returns the packet and the number of octets consumed. Trailing bytes
/// after the frame are left untouched; a length prefix pointing past the
/// buffer is `InsufficientData`.
pub fn decode(buf: &[u8]) -> Result<(SnPacket, usize), DecodeError> {
    let (frame_len, prefix) = read_length(buf)?;
    if frame_len > MAX_SN_PACKET_LEN {
        return Err(DecodeError::PacketTooLarge);
    }
    if buf.len() < frame_len {
        return Err(DecodeError::InsufficientData);
    }
    if frame_len < prefix + 1 {
        return Err(DecodeError::InvalidLength);
    }

    let msg_type = buf[prefix];
    let body = &buf[prefix + 1..frame_len];
    let msg_type = MsgType::from_u8(msg_type).ok_or(DecodeError::InvalidMsgType(msg_type))?;

    let packet = match msg_type {
        MsgType::Advertise => {
            if body.len() < 3 {
                return Err(DecodeError::InsufficientData);
            }
            SnPacket::Advertise(Advertise {
                gw_id: body[0],
                duration: read_u16(&body[1..])?,
            })
        }
        MsgType::SearchGw => {
            if body.is_empty() {
                return Err(DecodeError::InsufficientData);
            }
            SnPacket::SearchGw(SearchGw { radius: body[0] })
        }
        MsgType::GwInfo => {
            if body.is_empty() {
                return Err(DecodeError::InsufficientData);
            }
            SnPacket::GwInfo(GwInfo {
                gw_id: body[0],
                gw_addr: Bytes::copy_from_slice(&body[1..]),
            })
        }
        MsgType::Connect => {
            if body.len() < 4 {
                return Err(DecodeError::InsufficientData);
            }
            let fl = body[0];
            // body[1] is the protocol id, 0x01 for MQTT-SN 1.2
            if body[1] != 0x01 {
                return Err(DecodeError::MalformedPacket("unknown protocol id"));
            }
            let client_id = &body[4..];
            if client_id.is_empty() || client_id.len() > MAX_CLIENT_ID_LEN {
                return Err(DecodeError::MalformedPacket("bad client id length"));
            }
            SnPacket::Connect(SnConnect {
                will: fl & flags::WILL != 0,
                clean_session: fl & flags::CLEAN_SESSION != 0,
                duration: read_u16(&body[2..])?,
                client_id: Bytes::copy_from_slice(client_id),
            })
        }
        MsgType::ConnAck => {
            if body.is_empty() {
                return Err(DecodeError::InsufficientData);
            }
            SnPacket::ConnAck(SnConnAck {
                code: ReturnCode::from_u8(body[0]).ok_or(DecodeError::InvalidReturnCode(body[0]))?,
            })
        }
        MsgType::WillTopicReq => SnPacket::WillTopicReq,
        MsgType::WillTopic => SnPacket::WillTopic(decode_will_topic(body)?),
        MsgType::WillMsgReq => SnPacket::WillMsgReq,
        MsgType::WillMsg => SnPacket::WillMsg(WillMsg {
            message: Bytes::copy_from_slice(body),
        }),
        MsgType::Register => {
            if body.len() < 4 {
                return Err(DecodeError::InsufficientData);
            }
            SnPacket::Register(Register {
                topic_id: read_u16(body)?,
                msg_id: read_u16(&body[2..])?,
                topic_name: read_str(&body[4..])?.to_string(),
            })
        }
        MsgType::RegAck => {
            if body.len() < 5 {
                return Err(DecodeError::InsufficientData);
            }
            SnPacket::RegAck(RegAck {
                topic_id: read_u16(body)?,
                msg_id: read_u16(&body[2..])?,
                code: ReturnCode::from_u8(body[4]).ok_or(DecodeError::InvalidReturnCode(body[4]))?,
            })
        }
        MsgType::Publish => {
            if body.len() < 5 {
                return Err(DecodeError::InsufficientData);
            }
            let fl = body[0];
            let qos = SnQoS::from_flags((fl & flags::QOS_MASK) >> flags::QOS_SHIFT);
            let id_field = read_u16(&body[1..])?;
            let topic = decode_topic(fl, id_field)?;
            SnPacket::Publish(SnPublish {
                dup: fl & flags::DUP != 0,
                qos,
                retain: fl & flags::RETAIN != 0,
                topic,
                msg_id: read_u16(&body[3..])?,
                payload: Bytes::copy_from_slice(&body[5..]),
            })
        }
        MsgType::PubAck => {
            if body.len() < 5 {
                return Err(DecodeError::InsufficientData);
            }
            SnPacket::PubAck(SnPubAck {
                topic_id: read_u16(body)?,
                msg_id: read_u16(&body[2..])?,
                code: ReturnCode::from_u8(body[4]).ok_or(DecodeError::InvalidReturnCode(body[4]))?,
            })
        }
        MsgType::PubRec => SnPacket::PubRec { msg_id: read_u16(body)? },
        MsgType::PubRel => SnPacket::PubRel { msg_id: read_u16(body)? },
        MsgType::PubComp => SnPacket::PubComp { msg_id: read_u16(body)? },
        MsgType::Subscribe => {
            let (dup, qos, msg_id, topic) = decode_sub_header(body)?;
            SnPacket::Subscribe(SnSubscribe { dup, qos, msg_id, topic })
        }
        MsgType::SubAck => {
            if body.len() < 6 {
                return Err(DecodeError::InsufficientData);
            }
            let fl = body[0];
            SnPacket::SubAck(SnSubAck {
                qos: SnQoS::from_flags((fl & flags::QOS_MASK) >> flags::QOS_SHIFT),
                topic_id: read_u16(&body[1..])?,
                msg_id: read_u16(&body[3..])?,
                code: ReturnCode::from_u8(body[5]).ok_or(DecodeError::InvalidReturnCode(body[5]))?,
            })
        }
        MsgType::Unsubscribe => {
            let (_, _, msg_id, topic) = decode_sub_header(body)?;
            SnPacket::Unsubscribe(SnUnsubscribe { msg_id, topic })
        }
        MsgType::UnsubAck => SnPacket::UnsubAck { msg_id: read_u16(body)? },
        MsgType::PingReq => SnPacket::PingReq(SnPingReq {
            client_id: if body.is_empty() {
                None
            } else {
                Some(Bytes::copy_from_slice(body))
            },
        }),
        MsgType::PingResp => SnPacket::PingResp,
        MsgType::Disconnect => SnPacket::Disconnect(SnDisconnect {
            duration: if body.is_empty() {
                None
            } else {
                Some(read_u16(body)?)
            },
        }),
        MsgType::WillTopicUpd => SnPacket::WillTopicUpd(decode_will_topic(body)?),
        MsgType::WillTopicResp => {
            if body.is_empty() {
                return Err(DecodeError::InsufficientData);
            }
            SnPacket::WillTopicResp {
                code: ReturnCode::from_u8(body[0]).ok_or(DecodeError::InvalidReturnCode(body[0]))?,
            }
        }
        MsgType::WillMsgUpd => SnPacket::WillMsgUpd(WillMsg {
            message: Bytes::copy_from_slice(body),
        }),
        MsgType::WillMsgResp => {
            if body.is_empty() {
                return Err(DecodeError::InsufficientData);
            }
            SnPacket::WillMsgResp {
                code: ReturnCode::from_u8(body[0]).ok_or(DecodeError::InvalidReturnCode(body[0]))?,
            }
        }
        MsgType::Encapsulated => {
            if body.len() < 2 {
                return Err(DecodeError::InsufficientData);
            }
            let ctrl = body[0];
            let id_len = body[1] as usize;
            if !(2..=8).contains(&id_len) {
                return Err(DecodeError::InvalidNodeIdLength(body[1]));
            }
            if body.len() < 2 + id_len {
                return Err(DecodeError::InsufficientData);
            }
            let node_id = SmallVec::from_slice(&body[2..2 + id_len]);
            SnPacket::Encapsulated(Encapsulated {
                ctrl,
                node_id,
                inner: Bytes::copy_from_slice(&body[2 + id_len..]),
            })
        }
    };

    Ok((packet, frame_len))
}

fn decode_will_topic(body: &[u8]) -> Result<WillTopic, DecodeError> {
    // Empty body = will deletion request; represented as an empty topic.
    if body.is_empty() {
        return Ok(WillTopic {
            qos: SnQoS::AtMostOnce,
            retain: false,
            topic: String::new(),
        });
    }
    let fl = body[0];
    Ok(WillTopic {
        qos: SnQoS::from_flags((fl & flags::QOS_MASK) >> flags::QOS_SHIFT),
        retain: fl & flags::RETAIN != 0,
        topic: read_str(&body[1..])?.to_string(),
    })
}

fn decode_topic(fl: u8, id_field: u16) -> Result<SnTopic, DecodeError> {
    match TopicIdKind::from_flags(fl & flags::TOPIC_ID_TYPE_MASK)
        .ok_or(DecodeError::InvalidTopicIdType(fl & flags::TOPIC_ID_TYPE_MASK))?
    {
        TopicIdKind::Normal => Ok(SnTopic::Normal(id_field)),
        TopicIdKind::PreDefined => Ok(SnTopic::PreDefined(id_field)),
        TopicIdKind::Short => Ok(SnTopic::Short(id_field.to_be_bytes())),
    }
}

fn decode_sub_header(body: &[u8]) -> Result<(bool, SnQoS, u16, SnTopicFilter), DecodeError> {
    if body.len() < 4 {
        return Err(DecodeError::InsufficientData);
    }
    let fl = body[0];
    let msg_id = read_u16(&body[1..])?;
    let rest = &body[3..];
    let topic = match TopicIdKind::from_flags(fl & flags::TOPIC_ID_TYPE_MASK)
        .ok_or(DecodeError::InvalidTopicIdType(fl & flags::TOPIC_ID_TYPE_MASK))?
    {
        TopicIdKind::Normal => SnTopicFilter::Name(read_str(rest)?.to_string()),
        TopicIdKind::PreDefined => SnTopicFilter::PreDefined(read_u16(rest)?),
        TopicIdKind::Short => {
            if rest.len() < 2 {
                return Err(DecodeError::InsufficientData);
            }
            SnTopicFilter::Short([rest[0], rest[1]])
        }
    };
    Ok((
        fl & flags::DUP != 0,
        SnQoS::from_flags((fl & flags::QOS_MASK) >> flags::QOS_SHIFT),
        msg_id,
        topic,
    ))
}
