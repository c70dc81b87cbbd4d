//! MQTT-SN protocol definitions and types
//!
//! Defines the MQTT-SN 1.2 message grammar subset the gateway dispatches on,
//! together with the gateway-wide error taxonomy.

mod error;
mod packet;

pub use error::{DecodeError, EncodeError, GatewayError};
pub use packet::*;

/// MQTT-SN message type octet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Advertise = 0x00,
    SearchGw = 0x01,
    GwInfo = 0x02,
    Connect = 0x04,
    ConnAck = 0x05,
    WillTopicReq = 0x06,
    WillTopic = 0x07,
    WillMsgReq = 0x08,
    WillMsg = 0x09,
    Register = 0x0A,
    RegAck = 0x0B,
    Publish = 0x0C,
    PubAck = 0x0D,
    PubComp = 0x0E,
    PubRec = 0x0F,
    PubRel = 0x10,
    Subscribe = 0x12,
    SubAck = 0x13,
    Unsubscribe = 0x14,
    UnsubAck = 0x15,
    PingReq = 0x16,
    PingResp = 0x17,
    Disconnect = 0x18,
    WillTopicUpd = 0x1A,
    WillTopicResp = 0x1B,
    WillMsgUpd = 0x1C,
    WillMsgResp = 0x1D,
    Encapsulated = 0xFE,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(MsgType::Advertise),
            0x01 => Some(MsgType::SearchGw),
            0x02 => Some(MsgType::GwInfo),
            0x04 => Some(MsgType::Connect),
            0x05 => Some(MsgType::ConnAck),
            0x06 => Some(MsgType::WillTopicReq),
            0x07 => Some(MsgType::WillTopic),
            0x08 => Some(MsgType::WillMsgReq),
            0x09 => Some(MsgType::WillMsg),
            0x0A => Some(MsgType::Register),
            0x0B => Some(MsgType::RegAck),
            0x0C => Some(MsgType::Publish),
            0x0D => Some(MsgType::PubAck),
            0x0E => Some(MsgType::PubComp),
            0x0F => Some(MsgType::PubRec),
            0x10 => Some(MsgType::PubRel),
            0x12 => Some(MsgType::Subscribe),
            0x13 => Some(MsgType::SubAck),
            0x14 => Some(MsgType::Unsubscribe),
            0x15 => Some(MsgType::UnsubAck),
            0x16 => Some(MsgType::PingReq),
            0x17 => Some(MsgType::PingResp),
            0x18 => Some(MsgType::Disconnect),
            0x1A => Some(MsgType::WillTopicUpd),
            0x1B => Some(MsgType::WillTopicResp),
            0x1C => Some(MsgType::WillMsgUpd),
            0x1D => Some(MsgType::WillMsgResp),
            0xFE => Some(MsgType::Encapsulated),
            _ => None,
        }
    }
}

/// MQTT-SN quality of service level.
///
/// Unlike MQTT proper, MQTT-SN defines a fourth level (QoS −1, wire pattern
/// 0b11): a fire-and-forget publish from a sender that never connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SnQoS {
    /// At most once delivery
    #[default]
    AtMostOnce,
    /// At least once delivery
    AtLeastOnce,
    /// Exactly once delivery
    ExactlyOnce,
    /// Fire-and-forget from an unconnected sender
    MinusOne,
}

impl SnQoS {
    /// Decode from the two QoS bits of the flags octet
    pub fn from_flags(bits: u8) -> Self {
        match bits & 0x03 {
            0 => SnQoS::AtMostOnce,
            1 => SnQoS::AtLeastOnce,
            2 => SnQoS::ExactlyOnce,
            _ => SnQoS::MinusOne,
        }
    }

    /// Encode into the two QoS bits of the flags octet
    pub fn to_flags(self) -> u8 {
        match self {
            SnQoS::AtMostOnce => 0,
            SnQoS::AtLeastOnce => 1,
            SnQoS::ExactlyOnce => 2,
            SnQoS::MinusOne => 3,
        }
    }
}

/// MQTT-SN return code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReturnCode {
    Accepted = 0x00,
    Congestion = 0x01,
    InvalidTopicId = 0x02,
    NotSupported = 0x03,
}

impl ReturnCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(ReturnCode::Accepted),
            0x01 => Some(ReturnCode::Congestion),
            0x02 => Some(ReturnCode::InvalidTopicId),
            0x03 => Some(ReturnCode::NotSupported),
            _ => None,
        }
    }
}

/// Topic-id sub-space selector carried in the two low flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TopicIdKind {
    /// Id assigned by REGISTER/SUBSCRIBE at runtime
    #[default]
    Normal = 0,
    /// Id configured out-of-band, survives clean session
    PreDefined = 1,
    /// Two-character topic name used directly as the id field
    Short = 2,
}

impl TopicIdKind {
    pub fn from_flags(bits: u8) -> Option<Self> {
        match bits & 0x03 {
            0 => Some(TopicIdKind::Normal),
            1 => Some(TopicIdKind::PreDefined),
            2 => Some(TopicIdKind::Short),
            _ => None,
        }
    }
}

/// Flags octet bit layout
pub mod flags {
    pub const DUP: u8 = 0x80;
    pub const QOS_SHIFT: u8 = 5;
    pub const QOS_MASK: u8 = 0x60;
    pub const RETAIN: u8 = 0x10;
    pub const WILL: u8 = 0x08;
    pub const CLEAN_SESSION: u8 = 0x04;
    pub const TOPIC_ID_TYPE_MASK: u8 = 0x03;
}

/// Maximum MQTT-SN packet length the gateway accepts
pub const MAX_SN_PACKET_LEN: usize = 1024;

/// ClientId length ceiling. MQTT-SN 1.2 says 23 octets; accept up to 256
/// for robustness against non-conforming senders.
pub const MAX_CLIENT_ID_LEN: usize = 256;
