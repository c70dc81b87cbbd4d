//! Protocol and gateway error types

use std::fmt;

/// Errors that can occur while decoding an MQTT-SN or MQTT frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough data in the datagram or buffer
    InsufficientData,
    /// Unknown or reserved message type
    InvalidMsgType(u8),
    /// Length prefix does not match the datagram
    InvalidLength,
    /// Packet exceeds the maximum size
    PacketTooLarge,
    /// Invalid QoS bits
    InvalidQoS(u8),
    /// Invalid topic-id type bits
    InvalidTopicIdType(u8),
    /// Invalid UTF-8 string
    InvalidUtf8,
    /// Invalid return code
    InvalidReturnCode(u8),
    /// Wireless node id outside the 2-8 octet range
    InvalidNodeIdLength(u8),
    /// Malformed packet
    MalformedPacket(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientData => write!(f, "insufficient data in buffer"),
            Self::InvalidMsgType(t) => write!(f, "invalid message type: 0x{:02x}", t),
            Self::InvalidLength => write!(f, "invalid length prefix"),
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::InvalidQoS(q) => write!(f, "invalid QoS value: {}", q),
            Self::InvalidTopicIdType(t) => write!(f, "invalid topic id type: {}", t),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 string"),
            Self::InvalidReturnCode(c) => write!(f, "invalid return code: 0x{:02x}", c),
            Self::InvalidNodeIdLength(n) => write!(f, "wireless node id length {} out of range", n),
            Self::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors that can occur while encoding a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Packet too large for the wire format
    PacketTooLarge,
    /// String or binary field exceeds its length field
    FieldTooLong,
    /// Topic name invalid for the selected topic-id kind
    InvalidTopic,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooLarge => write!(f, "packet too large"),
            Self::FieldTooLong => write!(f, "field too long"),
            Self::InvalidTopic => write!(f, "invalid topic"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Gateway-level errors.
///
/// All `handle_*` operations return this discriminated result; callers
/// choose whether to log-and-drop, answer the client, or tear a task down.
#[derive(Debug)]
pub enum GatewayError {
    /// Frame failed to decode
    MalformedPacket(DecodeError),
    /// Sender address or handle does not resolve to a client
    UnknownClient,
    /// Encapsulated frame from an undeclared forwarder
    UnknownForwarder,
    /// Packet not legal for the peer's state (e.g. non-PUBLISH from a
    /// QoS -1 sender)
    ProtocolViolation(&'static str),
    /// Broker connection failed or is not established
    BrokerUnavailable,
    /// Registry capacity exhausted
    RegistryFull,
    /// ClientId not authorized
    AuthRejected,
    /// Keep-alive or handshake deadline expired
    Timeout,
    /// Sensor-network or broker socket error
    Transport(std::io::Error),
    /// Frame failed to encode
    Encode(EncodeError),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPacket(e) => write!(f, "malformed packet: {}", e),
            Self::UnknownClient => write!(f, "unknown client"),
            Self::UnknownForwarder => write!(f, "unknown forwarder"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::BrokerUnavailable => write!(f, "broker unavailable"),
            Self::RegistryFull => write!(f, "client registry full"),
            Self::AuthRejected => write!(f, "client not authorized"),
            Self::Timeout => write!(f, "timeout"),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Encode(e) => write!(f, "encode error: {}", e),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<DecodeError> for GatewayError {
    fn from(e: DecodeError) -> Self {
        GatewayError::MalformedPacket(e)
    }
}

impl From<EncodeError> for GatewayError {
    fn from(e: EncodeError) -> Self {
        GatewayError::Encode(e)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Transport(e)
    }
}
