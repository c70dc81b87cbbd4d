//! MQTT-SN packet definitions
//!
//! Value types for every message the gateway handles. Packets own their
//! payload bytes; events carry them by value and nothing is shared between
//! events.

use bytes::Bytes;
use smallvec::SmallVec;

use super::{MsgType, ReturnCode, SnQoS, TopicIdKind};

/// Wireless node id inside a forwarder encapsulation, 2-8 octets
pub type WirelessNodeId = SmallVec<[u8; 8]>;

/// MQTT-SN packet - one variant per message type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnPacket {
    Advertise(Advertise),
    SearchGw(SearchGw),
    GwInfo(GwInfo),
    Connect(SnConnect),
    ConnAck(SnConnAck),
    WillTopicReq,
    WillTopic(WillTopic),
    WillMsgReq,
    WillMsg(WillMsg),
    Register(Register),
    RegAck(RegAck),
    Publish(SnPublish),
    PubAck(SnPubAck),
    PubRec { msg_id: u16 },
    PubRel { msg_id: u16 },
    PubComp { msg_id: u16 },
    Subscribe(SnSubscribe),
    SubAck(SnSubAck),
    Unsubscribe(SnUnsubscribe),
    UnsubAck { msg_id: u16 },
    PingReq(SnPingReq),
    PingResp,
    Disconnect(SnDisconnect),
    WillTopicUpd(WillTopic),
    WillTopicResp { code: ReturnCode },
    WillMsgUpd(WillMsg),
    WillMsgResp { code: ReturnCode },
    Encapsulated(Encapsulated),
}

impl SnPacket {
    /// Message type of this packet
    pub fn msg_type(&self) -> MsgType {
        match self {
            SnPacket::Advertise(_) => MsgType::Advertise,
            SnPacket::SearchGw(_) => MsgType::SearchGw,
            SnPacket::GwInfo(_) => MsgType::GwInfo,
            SnPacket::Connect(_) => MsgType::Connect,
            SnPacket::ConnAck(_) => MsgType::ConnAck,
            SnPacket::WillTopicReq => MsgType::WillTopicReq,
            SnPacket::WillTopic(_) => MsgType::WillTopic,
            SnPacket::WillMsgReq => MsgType::WillMsgReq,
            SnPacket::WillMsg(_) => MsgType::WillMsg,
            SnPacket::Register(_) => MsgType::Register,
            SnPacket::RegAck(_) => MsgType::RegAck,
            SnPacket::Publish(_) => MsgType::Publish,
            SnPacket::PubAck(_) => MsgType::PubAck,
            SnPacket::PubRec { .. } => MsgType::PubRec,
            SnPacket::PubRel { .. } => MsgType::PubRel,
            SnPacket::PubComp { .. } => MsgType::PubComp,
            SnPacket::Subscribe(_) => MsgType::Subscribe,
            SnPacket::SubAck(_) => MsgType::SubAck,
            SnPacket::Unsubscribe(_) => MsgType::Unsubscribe,
            SnPacket::UnsubAck { .. } => MsgType::UnsubAck,
            SnPacket::PingReq(_) => MsgType::PingReq,
            SnPacket::PingResp => MsgType::PingResp,
            SnPacket::Disconnect(_) => MsgType::Disconnect,
            SnPacket::WillTopicUpd(_) => MsgType::WillTopicUpd,
            SnPacket::WillTopicResp { .. } => MsgType::WillTopicResp,
            SnPacket::WillMsgUpd(_) => MsgType::WillMsgUpd,
            SnPacket::WillMsgResp { .. } => MsgType::WillMsgResp,
            SnPacket::Encapsulated(_) => MsgType::Encapsulated,
        }
    }

    /// Message name for log lines
    pub fn name(&self) -> &'static str {
        match self.msg_type() {
            MsgType::Advertise => "ADVERTISE",
            MsgType::SearchGw => "SEARCHGW",
            MsgType::GwInfo => "GWINFO",
            MsgType::Connect => "CONNECT",
            MsgType::ConnAck => "CONNACK",
            MsgType::WillTopicReq => "WILLTOPICREQ",
            MsgType::WillTopic => "WILLTOPIC",
            MsgType::WillMsgReq => "WILLMSGREQ",
            MsgType::WillMsg => "WILLMSG",
            MsgType::Register => "REGISTER",
            MsgType::RegAck => "REGACK",
            MsgType::Publish => "PUBLISH",
            MsgType::PubAck => "PUBACK",
            MsgType::PubRec => "PUBREC",
            MsgType::PubRel => "PUBREL",
            MsgType::PubComp => "PUBCOMP",
            MsgType::Subscribe => "SUBSCRIBE",
            MsgType::SubAck => "SUBACK",
            MsgType::Unsubscribe => "UNSUBSCRIBE",
            MsgType::UnsubAck => "UNSUBACK",
            MsgType::PingReq => "PINGREQ",
            MsgType::PingResp => "PINGRESP",
            MsgType::Disconnect => "DISCONNECT",
            MsgType::WillTopicUpd => "WILLTOPICUPD",
            MsgType::WillTopicResp => "WILLTOPICRESP",
            MsgType::WillMsgUpd => "WILLMSGUPD",
            MsgType::WillMsgResp => "WILLMSGRESP",
            MsgType::Encapsulated => "ENCAPSULATED",
        }
    }

    /// True for a PUBLISH carrying QoS -1 (the only packet an unconnected
    /// sender may legally emit)
    pub fn is_qos_minus_one_publish(&self) -> bool {
        matches!(self, SnPacket::Publish(p) if p.qos == SnQoS::MinusOne)
    }
}

/// ADVERTISE broadcast by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertise {
    /// Gateway id advertised to the sensor network
    pub gw_id: u8,
    /// Seconds until the next ADVERTISE
    pub duration: u16,
}

/// SEARCHGW broadcast by a client looking for gateways
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchGw {
    pub radius: u8,
}

/// GWINFO answer to SEARCHGW
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GwInfo {
    pub gw_id: u8,
    /// Gateway address, present only when another client answers
    pub gw_addr: Bytes,
}

/// CONNECT from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnConnect {
    pub will: bool,
    pub clean_session: bool,
    /// Keep-alive duration in seconds
    pub duration: u16,
    /// Opaque client identifier
    pub client_id: Bytes,
}

/// CONNACK to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnConnAck {
    pub code: ReturnCode,
}

/// WILLTOPIC / WILLTOPICUPD body. An empty-bodied WILLTOPIC (no flags, no
/// topic) asks for will deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillTopic {
    pub qos: SnQoS,
    pub retain: bool,
    pub topic: String,
}

/// WILLMSG / WILLMSGUPD body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMsg {
    pub message: Bytes,
}

/// REGISTER, either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    /// 0 when client-originated, assigned id when gateway-originated
    pub topic_id: u16,
    pub msg_id: u16,
    pub topic_name: String,
}

/// REGACK, either direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegAck {
    pub topic_id: u16,
    pub msg_id: u16,
    pub code: ReturnCode,
}

/// Topic reference inside a PUBLISH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnTopic {
    /// Runtime-assigned id
    Normal(u16),
    /// Out-of-band id
    PreDefined(u16),
    /// Two-character short name
    Short([u8; 2]),
}

impl SnTopic {
    pub fn kind(&self) -> TopicIdKind {
        match self {
            SnTopic::Normal(_) => TopicIdKind::Normal,
            SnTopic::PreDefined(_) => TopicIdKind::PreDefined,
            SnTopic::Short(_) => TopicIdKind::Short,
        }
    }

    /// Raw value of the two-octet topic-id field
    pub fn id_field(&self) -> u16 {
        match self {
            SnTopic::Normal(id) | SnTopic::PreDefined(id) => *id,
            SnTopic::Short(s) => u16::from_be_bytes(*s),
        }
    }
}

/// PUBLISH, either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnPublish {
    pub dup: bool,
    pub qos: SnQoS,
    pub retain: bool,
    pub topic: SnTopic,
    /// 0 for QoS 0 and -1
    pub msg_id: u16,
    pub payload: Bytes,
}

/// PUBACK carries the topic id so the client can learn about stale ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnPubAck {
    pub topic_id: u16,
    pub msg_id: u16,
    pub code: ReturnCode,
}

/// Topic reference inside SUBSCRIBE/UNSUBSCRIBE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnTopicFilter {
    /// Full topic name, may contain wildcards
    Name(String),
    /// Pre-defined id
    PreDefined(u16),
    /// Short name
    Short([u8; 2]),
}

/// SUBSCRIBE from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnSubscribe {
    pub dup: bool,
    pub qos: SnQoS,
    pub msg_id: u16,
    pub topic: SnTopicFilter,
}

/// SUBACK to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnSubAck {
    pub qos: SnQoS,
    /// Granted topic id, 0 for wildcard filters
    pub topic_id: u16,
    pub msg_id: u16,
    pub code: ReturnCode,
}

/// UNSUBSCRIBE from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnUnsubscribe {
    pub msg_id: u16,
    pub topic: SnTopicFilter,
}

/// PINGREQ; a sleeping client identifies itself to trigger the buffered
/// message flush
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnPingReq {
    pub client_id: Option<Bytes>,
}

/// DISCONNECT, either direction. `duration` > 0 requests sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnDisconnect {
    pub duration: Option<u16>,
}

/// Frame-02 forwarder encapsulation. The inner MQTT-SN frame stays
/// undecoded until the dispatcher resolves the wireless node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encapsulated {
    /// Control octet, 0x00 in frame-02
    pub ctrl: u8,
    pub node_id: WirelessNodeId,
    pub inner: Bytes,
}
