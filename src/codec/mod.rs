//! MQTT-SN packet codec
//!
//! Wire encoding and decoding for MQTT-SN 1.2 frames with 1- or 3-byte
//! length prefixes. One datagram carries one frame; `decode` reports the
//! consumed length so encapsulated (inner) frames can be sliced out of a
//! larger buffer.

mod decode;
mod encode;


pub use decode::decode;
pub use encode::encode;

use bytes::{BufMut, BytesMut};

use crate::protocol::{DecodeError, EncodeError, MAX_SN_PACKET_LEN};

/// Read the length prefix: 1 octet, or 0x01 followed by a u16.
/// Returns (frame_length, prefix_octets).
#[inline]
pub fn read_length(buf: &[u8]) -> Result<(usize, usize), DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::InsufficientData);
    }
    if buf[0] == 0x01 {
        if buf.len() < 3 {
            return Err(DecodeError::InsufficientData);
        }
        let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        if len < 4 {
            return Err(DecodeError::InvalidLength);
        }
        Ok((len, 3))
    } else {
        let len = buf[0] as usize;
        if len < 2 {
            return Err(DecodeError::InvalidLength);
        }
        Ok((len, 1))
    }
}

/// Write the length prefix for a frame of `body_len` octets of payload
/// (message type included). Chooses the 3-octet form when the total would
/// not fit a single octet.
#[inline]
pub fn write_length(buf: &mut BytesMut, body_len: usize) -> Result<(), EncodeError> {
    // Total = prefix + body; the short form caps at 255.
    if body_len + 1 <= 0xFF {
        buf.put_u8((body_len + 1) as u8);
    } else if body_len + 3 <= MAX_SN_PACKET_LEN {
        buf.put_u8(0x01);
        buf.put_u16((body_len + 3) as u16);
    } else {
        return Err(EncodeError::PacketTooLarge);
    }
    Ok(())
}

/// Read a big-endian u16
#[inline]
pub fn read_u16(buf: &[u8]) -> Result<u16, DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::InsufficientData);
    }
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Interpret the remainder of a frame as UTF-8
#[inline]
pub fn read_str(buf: &[u8]) -> Result<&str, DecodeError> {
    std::str::from_utf8(buf).map_err(|_| DecodeError::InvalidUtf8)
}
