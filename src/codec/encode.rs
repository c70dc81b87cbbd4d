//! MQTT-SN frame encoding

use bytes::{BufMut, BytesMut};

use crate::protocol::{flags, EncodeError, SnPacket, SnTopicFilter, WillTopic};

use super::write_length;

/// Encode one MQTT-SN frame into `buf`.
pub fn encode(packet: &SnPacket, buf: &mut BytesMut) -> Result<(), EncodeError> {
    // Body is built separately so the right length-prefix form can be
    // chosen once the size is known.
    let mut body = BytesMut::with_capacity(32);
    body.put_u8(packet.msg_type() as u8);

    match packet {
        SnPacket::Advertise(p) => {
            body.put_u8(p.gw_id);
            body.put_u16(p.duration);
        }
        SnPacket::SearchGw(p) => {
            body.put_u8(p.radius);
        }
        SnPacket::GwInfo(p) => {
            body.put_u8(p.gw_id);
            body.put_slice(&p.gw_addr);
        }
        SnPacket::Connect(p) => {
            let mut fl = 0u8;
            if p.will {
                fl |= flags::WILL;
            }
            if p.clean_session {
                fl |= flags::CLEAN_SESSION;
            }
            body.put_u8(fl);
            body.put_u8(0x01); // protocol id
            body.put_u16(p.duration);
            body.put_slice(&p.client_id);
        }
        SnPacket::ConnAck(p) => {
            body.put_u8(p.code as u8);
        }
        SnPacket::WillTopicReq | SnPacket::WillMsgReq | SnPacket::PingResp => {}
        SnPacket::WillTopic(p) | SnPacket::WillTopicUpd(p) => {
            encode_will_topic(p, &mut body);
        }
        SnPacket::WillMsg(p) | SnPacket::WillMsgUpd(p) => {
            body.put_slice(&p.message);
        }
        SnPacket::Register(p) => {
            body.put_u16(p.topic_id);
            body.put_u16(p.msg_id);
            body.put_slice(p.topic_name.as_bytes());
        }
        SnPacket::RegAck(p) => {
            body.put_u16(p.topic_id);
            body.put_u16(p.msg_id);
            body.put_u8(p.code as u8);
        }
        SnPacket::Publish(p) => {
            let mut fl = (p.qos.to_flags() << flags::QOS_SHIFT) | p.topic.kind() as u8;
            if p.dup {
                fl |= flags::DUP;
            }
            if p.retain {
                fl |= flags::RETAIN;
            }
            body.put_u8(fl);
            body.put_u16(p.topic.id_field());
            body.put_u16(p.msg_id);
            body.put_slice(&p.payload);
        }
        SnPacket::PubAck(p) => {
            body.put_u16(p.topic_id);
            body.put_u16(p.msg_id);
            body.put_u8(p.code as u8);
        }
        SnPacket::PubRec { msg_id } | SnPacket::PubRel { msg_id } | SnPacket::PubComp { msg_id } => {
            body.put_u16(*msg_id);
        }
        SnPacket::Subscribe(p) => {
            let mut fl = (p.qos.to_flags() << flags::QOS_SHIFT) | filter_kind(&p.topic);
            if p.dup {
                fl |= flags::DUP;
            }
            body.put_u8(fl);
            body.put_u16(p.msg_id);
            encode_filter(&p.topic, &mut body);
        }
        SnPacket::SubAck(p) => {
            body.put_u8(p.qos.to_flags() << flags::QOS_SHIFT);
            body.put_u16(p.topic_id);
            body.put_u16(p.msg_id);
            body.put_u8(p.code as u8);
        }
        SnPacket::Unsubscribe(p) => {
            body.put_u8(filter_kind(&p.topic));
            body.put_u16(p.msg_id);
            encode_filter(&p.topic, &mut body);
        }
        SnPacket::UnsubAck { msg_id } => {
            body.put_u16(*msg_id);
        }
        SnPacket::PingReq(p) => {
            if let Some(id) = &p.client_id {
                body.put_slice(id);
            }
        }
        SnPacket::Disconnect(p) => {
            if let Some(d) = p.duration {
                body.put_u16(d);
            }
        }
        SnPacket::WillTopicResp { code } | SnPacket::WillMsgResp { code } => {
            body.put_u8(*code as u8);
        }
        SnPacket::Encapsulated(p) => {
            if !(2..=8).contains(&p.node_id.len()) {
                return Err(EncodeError::InvalidTopic);
            }
            body.put_u8(p.ctrl);
            body.put_u8(p.node_id.len() as u8);
            body.put_slice(&p.node_id);
            body.put_slice(&p.inner);
        }
    }

    write_length(buf, body.len())?;
    buf.put_slice(&body);
    Ok(())
}

fn encode_will_topic(p: &WillTopic, body: &mut BytesMut) {
    // Empty topic encodes as the empty-bodied deletion form.
    if p.topic.is_empty() {
        return;
    }
    let mut fl = p.qos.to_flags() << flags::QOS_SHIFT;
    if p.retain {
        fl |= flags::RETAIN;
    }
    body.put_u8(fl);
    body.put_slice(p.topic.as_bytes());
}

fn filter_kind(topic: &SnTopicFilter) -> u8 {
    match topic {
        SnTopicFilter::Name(_) => 0,
        SnTopicFilter::PreDefined(_) => 1,
        SnTopicFilter::Short(_) => 2,
    }
}

fn encode_filter(topic: &SnTopicFilter, body: &mut BytesMut) {
    match topic {
        SnTopicFilter::Name(name) => body.put_slice(name.as_bytes()),
        SnTopicFilter::PreDefined(id) => body.put_u16(*id),
        SnTopicFilter::Short(s) => body.put_slice(s),
    }
}
