//! MQTT frame codec
//!
//! Symmetric encoder/decoder for the uplink packet set. Both sides of every
//! frame are implemented so tests can speak for the broker.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::{DecodeError, EncodeError};

use super::{
    MqttConnAck, MqttConnect, MqttPacket, MqttPublish, MqttSubAck, MqttSubscribe,
    MqttUnsubscribe, MqttVersion, MqttWill, QoS,
};

/// Maximum remaining length (268,435,455 bytes)
const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Read a Variable Byte Integer from buffer.
/// Returns (value, bytes_consumed) or error.
#[inline]
fn read_variable_int(buf: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut multiplier: u32 = 1;
    let mut value: u32 = 0;
    let mut pos = 0;

    loop {
        if pos >= buf.len() {
            return Err(DecodeError::InsufficientData);
        }
        if pos >= 4 {
            return Err(DecodeError::InvalidLength);
        }

        let byte = buf[pos];
        value += ((byte & 0x7F) as u32) * multiplier;
        pos += 1;

        if (byte & 0x80) == 0 {
            break;
        }

        multiplier *= 128;
    }

    Ok((value, pos))
}

/// Write a Variable Byte Integer to buffer
#[inline]
fn write_variable_int(buf: &mut BytesMut, mut value: u32) -> Result<(), EncodeError> {
    if value > MAX_REMAINING_LENGTH as u32 {
        return Err(EncodeError::PacketTooLarge);
    }
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
    Ok(())
}

#[inline]
fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16, DecodeError> {
    if buf.len() < *pos + 2 {
        return Err(DecodeError::InsufficientData);
    }
    let v = u16::from_be_bytes([buf[*pos], buf[*pos + 1]]);
    *pos += 2;
    Ok(v)
}

#[inline]
fn read_string(buf: &[u8], pos: &mut usize) -> Result<String, DecodeError> {
    let len = read_u16(buf, pos)? as usize;
    if buf.len() < *pos + len {
        return Err(DecodeError::InsufficientData);
    }
    let s = std::str::from_utf8(&buf[*pos..*pos + len]).map_err(|_| DecodeError::InvalidUtf8)?;
    *pos += len;
    Ok(s.to_string())
}

#[inline]
fn read_binary(buf: &[u8], pos: &mut usize) -> Result<Bytes, DecodeError> {
    let len = read_u16(buf, pos)? as usize;
    if buf.len() < *pos + len {
        return Err(DecodeError::InsufficientData);
    }
    let b = Bytes::copy_from_slice(&buf[*pos..*pos + len]);
    *pos += len;
    Ok(b)
}

#[inline]
fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), EncodeError> {
    if s.len() > 65535 {
        return Err(EncodeError::FieldTooLong);
    }
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

#[inline]
fn write_binary(buf: &mut BytesMut, data: &[u8]) -> Result<(), EncodeError> {
    if data.len() > 65535 {
        return Err(EncodeError::FieldTooLong);
    }
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Skip a v5 property block at `pos`
#[inline]
fn skip_properties(buf: &[u8], pos: &mut usize) -> Result<(), DecodeError> {
    let (len, consumed) = read_variable_int(&buf[*pos..])?;
    *pos += consumed;
    if buf.len() < *pos + len as usize {
        return Err(DecodeError::InsufficientData);
    }
    *pos += len as usize;
    Ok(())
}

/// MQTT packet encoder, parameterized by protocol level
#[derive(Debug, Clone, Copy)]
pub struct MqttEncoder {
    version: MqttVersion,
}

impl MqttEncoder {
    pub fn new(version: MqttVersion) -> Self {
        Self { version }
    }

    fn v5(&self) -> bool {
        self.version == MqttVersion::V5
    }

    /// Encode one packet into `buf`
    pub fn encode(&self, packet: &MqttPacket, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let mut body = BytesMut::with_capacity(64);
        let first_byte = match packet {
            MqttPacket::Connect(c) => {
                self.encode_connect(c, &mut body)?;
                0x10
            }
            MqttPacket::ConnAck(a) => {
                body.put_u8(a.session_present as u8);
                body.put_u8(a.code);
                if self.v5() {
                    body.put_u8(0); // empty properties
                }
                0x20
            }
            MqttPacket::Publish(p) => {
                write_string(&mut body, &p.topic)?;
                if p.qos != QoS::AtMostOnce {
                    body.put_u16(p.packet_id.unwrap_or(0));
                }
                if self.v5() {
                    body.put_u8(0);
                }
                body.put_slice(&p.payload);
                let mut fb = 0x30u8 | ((p.qos as u8) << 1);
                if p.dup {
                    fb |= 0x08;
                }
                if p.retain {
                    fb |= 0x01;
                }
                fb
            }
            MqttPacket::PubAck { packet_id } => {
                body.put_u16(*packet_id);
                0x40
            }
            MqttPacket::PubRec { packet_id } => {
                body.put_u16(*packet_id);
                0x50
            }
            MqttPacket::PubRel { packet_id } => {
                body.put_u16(*packet_id);
                0x62
            }
            MqttPacket::PubComp { packet_id } => {
                body.put_u16(*packet_id);
                0x70
            }
            MqttPacket::Subscribe(s) => {
                body.put_u16(s.packet_id);
                if self.v5() {
                    body.put_u8(0);
                }
                write_string(&mut body, &s.filter)?;
                body.put_u8(s.qos as u8);
                0x82
            }
            MqttPacket::SubAck(a) => {
                body.put_u16(a.packet_id);
                if self.v5() {
                    body.put_u8(0);
                }
                body.put_slice(&a.return_codes);
                0x90
            }
            MqttPacket::Unsubscribe(u) => {
                body.put_u16(u.packet_id);
                if self.v5() {
                    body.put_u8(0);
                }
                write_string(&mut body, &u.filter)?;
                0xA2
            }
            MqttPacket::UnsubAck { packet_id } => {
                body.put_u16(*packet_id);
                0xB0
            }
            MqttPacket::PingReq => 0xC0,
            MqttPacket::PingResp => 0xD0,
            MqttPacket::Disconnect => 0xE0,
        };

        buf.put_u8(first_byte);
        write_variable_int(buf, body.len() as u32)?;
        buf.put_slice(&body);
        Ok(())
    }

    fn encode_connect(&self, c: &MqttConnect, body: &mut BytesMut) -> Result<(), EncodeError> {
        write_string(body, c.version.protocol_name())?;
        body.put_u8(c.version as u8);

        let mut connect_flags = 0u8;
        if c.clean_session {
            connect_flags |= 0x02;
        }
        if let Some(will) = &c.will {
            connect_flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                connect_flags |= 0x20;
            }
        }
        if c.username.is_some() {
            connect_flags |= 0x80;
        }
        if c.password.is_some() {
            connect_flags |= 0x40;
        }
        body.put_u8(connect_flags);
        body.put_u16(c.keep_alive);
        if self.v5() {
            body.put_u8(0);
        }

        write_string(body, &c.client_id)?;
        if let Some(will) = &c.will {
            if self.v5() {
                body.put_u8(0); // will properties
            }
            write_string(body, &will.topic)?;
            write_binary(body, &will.payload)?;
        }
        if let Some(username) = &c.username {
            write_string(body, username)?;
        }
        if let Some(password) = &c.password {
            write_binary(body, password)?;
        }
        Ok(())
    }
}

/// MQTT packet decoder, parameterized by protocol level
#[derive(Debug, Clone, Copy)]
pub struct MqttDecoder {
    version: MqttVersion,
}

impl MqttDecoder {
    pub fn new(version: MqttVersion) -> Self {
        Self { version }
    }

    fn v5(&self) -> bool {
        self.version == MqttVersion::V5
    }

    /// Decode one packet from the front of `buf`.
    ///
    /// Returns `None` when the buffer holds only a partial frame (stream
    /// reads append and retry), otherwise the packet and consumed length.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(MqttPacket, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let first = buf[0];
        let (remaining, header_len) = match read_variable_int(&buf[1..]) {
            Ok(v) => v,
            Err(DecodeError::InsufficientData) => return Ok(None),
            Err(e) => return Err(e),
        };
        let total = 1 + header_len + remaining as usize;
        if buf.len() < total {
            return Ok(None);
        }
        let body = &buf[1 + header_len..total];
        let packet = self.decode_body(first, body)?;
        Ok(Some((packet, total)))
    }

    fn decode_body(&self, first: u8, body: &[u8]) -> Result<MqttPacket, DecodeError> {
        let packet_type = first >> 4;
        let mut pos = 0usize;
        match packet_type {
            1 => self.decode_connect(body),
            2 => {
                if body.len() < 2 {
                    return Err(DecodeError::InsufficientData);
                }
                // v5 properties after the reason code are irrelevant here
                Ok(MqttPacket::ConnAck(MqttConnAck {
                    session_present: body[0] & 0x01 != 0,
                    code: body[1],
                }))
            }
            3 => {
                let qos = QoS::from_u8((first >> 1) & 0x03).ok_or(DecodeError::InvalidQoS(first))?;
                let topic = read_string(body, &mut pos)?;
                let packet_id = if qos != QoS::AtMostOnce {
                    Some(read_u16(body, &mut pos)?)
                } else {
                    None
                };
                if self.v5() {
                    skip_properties(body, &mut pos)?;
                }
                Ok(MqttPacket::Publish(MqttPublish {
                    dup: first & 0x08 != 0,
                    qos,
                    retain: first & 0x01 != 0,
                    topic,
                    packet_id,
                    payload: Bytes::copy_from_slice(&body[pos..]),
                }))
            }
            4 => Ok(MqttPacket::PubAck { packet_id: read_u16(body, &mut pos)? }),
            5 => Ok(MqttPacket::PubRec { packet_id: read_u16(body, &mut pos)? }),
            6 => Ok(MqttPacket::PubRel { packet_id: read_u16(body, &mut pos)? }),
            7 => Ok(MqttPacket::PubComp { packet_id: read_u16(body, &mut pos)? }),
            8 => {
                let packet_id = read_u16(body, &mut pos)?;
                if self.v5() {
                    skip_properties(body, &mut pos)?;
                }
                let filter = read_string(body, &mut pos)?;
                if body.len() <= pos {
                    return Err(DecodeError::InsufficientData);
                }
                let qos = QoS::from_u8(body[pos] & 0x03).ok_or(DecodeError::InvalidQoS(body[pos]))?;
                Ok(MqttPacket::Subscribe(MqttSubscribe { packet_id, filter, qos }))
            }
            9 => {
                let packet_id = read_u16(body, &mut pos)?;
                if self.v5() {
                    skip_properties(body, &mut pos)?;
                }
                Ok(MqttPacket::SubAck(MqttSubAck {
                    packet_id,
                    return_codes: body[pos..].to_vec(),
                }))
            }
            10 => {
                let packet_id = read_u16(body, &mut pos)?;
                if self.v5() {
                    skip_properties(body, &mut pos)?;
                }
                let filter = read_string(body, &mut pos)?;
                Ok(MqttPacket::Unsubscribe(MqttUnsubscribe { packet_id, filter }))
            }
            11 => Ok(MqttPacket::UnsubAck { packet_id: read_u16(body, &mut pos)? }),
            12 => Ok(MqttPacket::PingReq),
            13 => Ok(MqttPacket::PingResp),
            14 => Ok(MqttPacket::Disconnect),
            t => Err(DecodeError::InvalidMsgType(t)),
        }
    }

    fn decode_connect(&self, body: &[u8]) -> Result<MqttPacket, DecodeError> {
        let mut pos = 0usize;
        let _protocol_name = read_string(body, &mut pos)?;
        if body.len() <= pos {
            return Err(DecodeError::InsufficientData);
        }
        let version = MqttVersion::from_u8(body[pos])
            .ok_or(DecodeError::MalformedPacket("unknown protocol level"))?;
        pos += 1;
        if body.len() <= pos {
            return Err(DecodeError::InsufficientData);
        }
        let connect_flags = body[pos];
        pos += 1;
        let keep_alive = read_u16(body, &mut pos)?;
        if version == MqttVersion::V5 {
            skip_properties(body, &mut pos)?;
        }

        let client_id = read_string(body, &mut pos)?;
        let will = if connect_flags & 0x04 != 0 {
            if version == MqttVersion::V5 {
                skip_properties(body, &mut pos)?;
            }
            let topic = read_string(body, &mut pos)?;
            let payload = read_binary(body, &mut pos)?;
            Some(MqttWill {
                topic,
                payload,
                qos: QoS::from_u8((connect_flags >> 3) & 0x03)
                    .ok_or(DecodeError::InvalidQoS(connect_flags))?,
                retain: connect_flags & 0x20 != 0,
            })
        } else {
            None
        };
        let username = if connect_flags & 0x80 != 0 {
            Some(read_string(body, &mut pos)?)
        } else {
            None
        };
        let password = if connect_flags & 0x40 != 0 {
            Some(read_binary(body, &mut pos)?)
        } else {
            None
        };

        Ok(MqttPacket::Connect(Box::new(MqttConnect {
            version,
            client_id,
            clean_session: connect_flags & 0x02 != 0,
            keep_alive,
            username,
            password,
            will,
        })))
    }
}
