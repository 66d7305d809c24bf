//! Wire Protocol Framer & Dispatcher (C5, spec §4.5): fixed 16-byte
//! header, rotate-add checksum, and message-type dispatch.
//!
//! `Header::encode`/`decode` use `bytes::{Buf, BufMut}` rather than manual
//! slicing, matching the corpus's codec idiom
//! (`spark-core/src/data_plane/codec`).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CoreError, ErrorKind, PolyResult};

pub const HEADER_LEN: usize = 16;
pub const PROTOCOL_VERSION: u8 = 1;
pub const HANDSHAKE_MAGIC: u32 = 0x0050_4C43;

/// Message type tag, header offset 1 (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 1,
    Auth = 2,
    Command = 3,
    Response = 4,
    Error = 5,
    Heartbeat = 6,
    Publish = 7,
    Subscribe = 8,
    Unsubscribe = 9,
}

impl MessageType {
    pub fn from_u8(raw: u8) -> PolyResult<Self> {
        Ok(match raw {
            1 => MessageType::Handshake,
            2 => MessageType::Auth,
            3 => MessageType::Command,
            4 => MessageType::Response,
            5 => MessageType::Error,
            6 => MessageType::Heartbeat,
            7 => MessageType::Publish,
            8 => MessageType::Subscribe,
            9 => MessageType::Unsubscribe,
            other => {
                return Err(CoreError::with_code(
                    ErrorKind::InvalidParameter,
                    "wire.unknown_type",
                    format!("message type {other} is out of range"),
                ))
            }
        })
    }
}

bitflags::bitflags! {
    /// Header flags, offset 2 (spec §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageFlags: u16 {
        const ENCRYPTED  = 0x01;
        const COMPRESSED = 0x02;
        const URGENT     = 0x04;
        const RELIABLE   = 0x08;
    }
}

/// The 16-byte little-endian wire header (spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub message_type: u8,
    pub flags: MessageFlags,
    pub sequence: u32,
    pub payload_length: u32,
    pub checksum: u32,
}

impl Header {
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.version);
        out.put_u8(self.message_type);
        out.put_u16_le(self.flags.bits());
        out.put_u32_le(self.sequence);
        out.put_u32_le(self.payload_length);
        out.put_u32_le(self.checksum);
    }

    pub fn decode(buf: &mut impl Buf) -> PolyResult<Self> {
        if buf.remaining() < HEADER_LEN {
            return Err(CoreError::with_code(
                ErrorKind::InvalidParameter,
                "wire.short_header",
                "fewer than 16 bytes available for header",
            ));
        }
        let version = buf.get_u8();
        let message_type = buf.get_u8();
        let flags = MessageFlags::from_bits_truncate(buf.get_u16_le());
        let sequence = buf.get_u32_le();
        let payload_length = buf.get_u32_le();
        let checksum = buf.get_u32_le();
        Ok(Self { version, message_type, flags, sequence, payload_length, checksum })
    }
}

/// Rotate-add checksum: `c = ((c<<5)|(c>>27)) + byte`, initial `c = 0`,
/// masked to 32 bits each step. Empty payload hashes to 0 (spec §4.5).
pub fn rotate_add_checksum(payload: &[u8]) -> u32 {
    let mut c: u32 = 0;
    for &byte in payload {
        c = (c.rotate_left(5)).wrapping_add(byte as u32);
    }
    c
}

/// A fully framed message: header plus payload, as produced by
/// [`FrameCodec::encode`] or consumed by [`FrameCodec::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

/// Owns `max_message_size` and produces [`CoreError`] (`too-large`,
/// `checksum-mismatch`) rather than panicking (SPEC_FULL §4 C5
/// supplement).
pub struct FrameCodec {
    max_message_size: usize,
}

impl FrameCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Build and serialize a frame. Fails `too-large` if header + payload
    /// would exceed `max_message_size` (spec §4.5).
    pub fn encode(&self, message_type: MessageType, flags: MessageFlags, sequence: u32, payload: &[u8]) -> PolyResult<Bytes> {
        let total = HEADER_LEN + payload.len();
        if total > self.max_message_size {
            return Err(CoreError::too_large(format!(
                "frame of {total} bytes exceeds max_message_size {}",
                self.max_message_size
            )));
        }
        let header = Header {
            version: PROTOCOL_VERSION,
            message_type: message_type as u8,
            flags,
            sequence,
            payload_length: payload.len() as u32,
            checksum: rotate_add_checksum(payload),
        };
        let mut out = BytesMut::with_capacity(total);
        header.encode(&mut out);
        out.put_slice(payload);
        Ok(out.freeze())
    }

    /// Parse and validate a frame: version equality, type in range,
    /// payload length within the ceiling, and checksum equality (spec
    /// §4.5 "Deserialization").
    pub fn decode(&self, mut bytes: Bytes) -> PolyResult<Frame> {
        if bytes.len() > self.max_message_size {
            return Err(CoreError::too_large(format!(
                "frame of {} bytes exceeds max_message_size {}",
                bytes.len(),
                self.max_message_size
            )));
        }
        let header = Header::decode(&mut bytes)?;
        if header.version != PROTOCOL_VERSION {
            return Err(CoreError::with_code(
                ErrorKind::InvalidParameter,
                "wire.version_mismatch",
                format!("unsupported protocol version {}", header.version),
            ));
        }
        MessageType::from_u8(header.message_type)?;
        if header.payload_length as usize > self.max_message_size {
            return Err(CoreError::too_large("declared payload_length exceeds max_message_size"));
        }
        if bytes.remaining() < header.payload_length as usize {
            return Err(CoreError::with_code(
                ErrorKind::InvalidParameter,
                "wire.truncated_payload",
                "fewer payload bytes available than declared",
            ));
        }
        let payload = bytes.split_to(header.payload_length as usize);
        let computed = rotate_add_checksum(&payload);
        if computed != header.checksum {
            return Err(CoreError::checksum_mismatch("payload checksum does not match header"));
        }
        Ok(Frame { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_checksums_to_zero() {
        assert_eq!(rotate_add_checksum(&[]), 0);
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let codec = FrameCodec::new(4096);
        let payload = b"hello";
        let bytes = codec
            .encode(MessageType::Command, MessageFlags::RELIABLE, 1, payload)
            .unwrap();
        let frame = codec.decode(bytes).unwrap();
        assert_eq!(frame.header.sequence, 1);
        assert_eq!(frame.header.message_type, MessageType::Command as u8);
        assert_eq!(&frame.payload[..], payload);
    }

    #[test]
    fn handshake_frame_matches_literal_scenario_s1() {
        let codec = FrameCodec::new(4096);
        let payload = [0x43, 0x4C, 0x50, 0x01, 0x00, 0x00, 0x00];
        let bytes = codec
            .encode(MessageType::Handshake, MessageFlags::empty(), 1, &payload)
            .unwrap();
        let frame = codec.decode(bytes).unwrap();
        assert_eq!(frame.header.checksum, rotate_add_checksum(&payload));
        assert_eq!(frame.header.payload_length, 7);
    }

    #[test]
    fn flipped_payload_byte_fails_checksum_scenario_s2() {
        let codec = FrameCodec::new(4096);
        let mut payload = vec![0x43, 0x4C, 0x50, 0x01, 0x00, 0x00, 0x00];
        let bytes = codec
            .encode(MessageType::Handshake, MessageFlags::empty(), 1, &payload)
            .unwrap();
        payload[0] ^= 0xFF;
        let mut tampered = BytesMut::from(&bytes[..]);
        tampered[HEADER_LEN] = payload[0];
        let err = codec.decode(tampered.freeze()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let codec = FrameCodec::new(HEADER_LEN + 4);
        let err = codec
            .encode(MessageType::Command, MessageFlags::empty(), 1, &[0u8; 16])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooLarge);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut raw = BytesMut::new();
        raw.put_u8(PROTOCOL_VERSION);
        raw.put_u8(200);
        raw.put_u16_le(0);
        raw.put_u32_le(0);
        raw.put_u32_le(0);
        raw.put_u32_le(0);
        let codec = FrameCodec::new(4096);
        let err = codec.decode(raw.freeze()).unwrap_err();
        assert_eq!(err.code(), "wire.unknown_type");
    }
}
