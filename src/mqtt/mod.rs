//! MQTT uplink packet definitions
//!
//! The broker-facing frame set: the packets the gateway translates MQTT-SN
//! traffic into. Protocol level (3.1 / 3.1.1 / 5.0) is selected by
//! configuration; v5 frames carry empty property blocks.

mod codec;

#[cfg(test)]
mod tests;

pub use codec::{MqttDecoder, MqttEncoder};

use bytes::Bytes;

use crate::protocol::SnQoS;

/// MQTT protocol level carried in CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MqttVersion {
    /// MQTT 3.1 (MQIsdp, level 3)
    V31 = 3,
    /// MQTT 3.1.1 (level 4)
    V311 = 4,
    /// MQTT 5.0 (level 5)
    V5 = 5,
}

impl MqttVersion {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            3 => Some(MqttVersion::V31),
            4 => Some(MqttVersion::V311),
            5 => Some(MqttVersion::V5),
            _ => None,
        }
    }

    pub fn protocol_name(self) -> &'static str {
        match self {
            MqttVersion::V31 => "MQIsdp",
            MqttVersion::V311 | MqttVersion::V5 => "MQTT",
        }
    }
}

/// MQTT quality of service (no -1 on the broker side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

impl From<SnQoS> for QoS {
    /// QoS -1 publishes are relayed upstream as QoS 0.
    fn from(q: SnQoS) -> Self {
        match q {
            SnQoS::AtMostOnce | SnQoS::MinusOne => QoS::AtMostOnce,
            SnQoS::AtLeastOnce => QoS::AtLeastOnce,
            SnQoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

impl From<QoS> for SnQoS {
    fn from(q: QoS) -> Self {
        match q {
            QoS::AtMostOnce => SnQoS::AtMostOnce,
            QoS::AtLeastOnce => SnQoS::AtLeastOnce,
            QoS::ExactlyOnce => SnQoS::ExactlyOnce,
        }
    }
}

/// MQTT packet - unified representation across protocol levels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttPacket {
    Connect(Box<MqttConnect>),
    ConnAck(MqttConnAck),
    Publish(MqttPublish),
    PubAck { packet_id: u16 },
    PubRec { packet_id: u16 },
    PubRel { packet_id: u16 },
    PubComp { packet_id: u16 },
    Subscribe(MqttSubscribe),
    SubAck(MqttSubAck),
    Unsubscribe(MqttUnsubscribe),
    UnsubAck { packet_id: u16 },
    PingReq,
    PingResp,
    Disconnect,
}

impl MqttPacket {
    /// Control packet type as u8
    pub fn packet_type(&self) -> u8 {
        match self {
            MqttPacket::Connect(_) => 1,
            MqttPacket::ConnAck(_) => 2,
            MqttPacket::Publish(_) => 3,
            MqttPacket::PubAck { .. } => 4,
            MqttPacket::PubRec { .. } => 5,
            MqttPacket::PubRel { .. } => 6,
            MqttPacket::PubComp { .. } => 7,
            MqttPacket::Subscribe(_) => 8,
            MqttPacket::SubAck(_) => 9,
            MqttPacket::Unsubscribe(_) => 10,
            MqttPacket::UnsubAck { .. } => 11,
            MqttPacket::PingReq => 12,
            MqttPacket::PingResp => 13,
            MqttPacket::Disconnect => 14,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MqttPacket::Connect(_) => "CONNECT",
            MqttPacket::ConnAck(_) => "CONNACK",
            MqttPacket::Publish(_) => "PUBLISH",
            MqttPacket::PubAck { .. } => "PUBACK",
            MqttPacket::PubRec { .. } => "PUBREC",
            MqttPacket::PubRel { .. } => "PUBREL",
            MqttPacket::PubComp { .. } => "PUBCOMP",
            MqttPacket::Subscribe(_) => "SUBSCRIBE",
            MqttPacket::SubAck(_) => "SUBACK",
            MqttPacket::Unsubscribe(_) => "UNSUBSCRIBE",
            MqttPacket::UnsubAck { .. } => "UNSUBACK",
            MqttPacket::PingReq => "PINGREQ",
            MqttPacket::PingResp => "PINGRESP",
            MqttPacket::Disconnect => "DISCONNECT",
        }
    }
}

/// Will message carried in CONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttWill {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// CONNECT (gateway -> broker)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConnect {
    pub version: MqttVersion,
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub will: Option<MqttWill>,
}

/// CONNACK (broker -> gateway). `code` 0 is accepted; non-zero codes keep
/// their wire value so the handler can map them to SN return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttConnAck {
    pub session_present: bool,
    pub code: u8,
}

impl MqttConnAck {
    pub fn accepted(&self) -> bool {
        self.code == 0
    }
}

/// PUBLISH, either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttPublish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present only for QoS > 0
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

/// SUBSCRIBE (gateway -> broker), single filter per frame - the gateway
/// forwards SN SUBSCRIBEs one at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSubscribe {
    pub packet_id: u16,
    pub filter: String,
    pub qos: QoS,
}

/// SUBACK (broker -> gateway)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSubAck {
    pub packet_id: u16,
    /// Granted QoS or 0x80 failure per filter
    pub return_codes: Vec<u8>,
}

/// UNSUBSCRIBE (gateway -> broker)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttUnsubscribe {
    pub packet_id: u16,
    pub filter: String,
}
