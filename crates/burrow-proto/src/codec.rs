//! Codec for framing command envelopes on an established stream

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{ENVELOPE_HEADER_LEN, MAX_FRAME_SIZE};

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Payload serialization error: {0}")]
    Payload(#[from] bincode::Error),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Invalid envelope kind: {0}")]
    InvalidKind(u8),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether an envelope asks for something or answers an earlier request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Request,
    Reply,
}

impl EnvelopeKind {
    fn to_byte(self) -> u8 {
        match self {
            EnvelopeKind::Request => 0,
            EnvelopeKind::Reply => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0 => Ok(EnvelopeKind::Request),
            1 => Ok(EnvelopeKind::Reply),
            other => Err(CodecError::InvalidKind(other)),
        }
    }
}

/// A command id plus its serialized payload
///
/// `serial` identifies the transaction: the replying side echoes the serial
/// of the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub command_id: u32,
    pub serial: u32,
    pub kind: EnvelopeKind,
    /// Reply status code, always 0 on requests
    pub status: i32,
    pub payload: Bytes,
}

impl Envelope {
    pub fn request(command_id: u32, serial: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command_id,
            serial,
            kind: EnvelopeKind::Request,
            status: 0,
            payload: payload.into(),
        }
    }

    pub fn reply(command_id: u32, serial: u32, status: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            command_id,
            serial,
            kind: EnvelopeKind::Reply,
            status,
            payload: payload.into(),
        }
    }

    pub fn is_reply(&self) -> bool {
        self.kind == EnvelopeKind::Reply
    }
}

/// Envelope framing codec
///
/// Format: [length: u32][command_id: u32][serial: u32][kind: u8][status: i32][payload]
/// All integers big-endian; `length` counts every byte after itself.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
}

impl EnvelopeCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
        // Need at least 4 bytes for length header
        if src.len() < 4 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > self.max_frame_size {
            warn!(
                "Rejecting envelope frame of {} bytes (max {})",
                length, self.max_frame_size
            );
            return Err(CodecError::FrameTooLarge(length));
        }
        if length < ENVELOPE_HEADER_LEN {
            return Err(CodecError::FrameTooShort(length));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let mut frame = src.split_to(length);

        let command_id = frame.get_u32();
        let serial = frame.get_u32();
        let kind = EnvelopeKind::from_byte(frame.get_u8())?;
        let status = frame.get_i32();

        Ok(Some(Envelope {
            command_id,
            serial,
            kind,
            status,
            payload: frame.freeze(),
        }))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<(), CodecError> {
        let length = ENVELOPE_HEADER_LEN + envelope.payload.len();
        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge(length));
        }

        dst.reserve(4 + length);
        dst.put_u32(length as u32);
        dst.put_u32(envelope.command_id);
        dst.put_u32(envelope.serial);
        dst.put_u8(envelope.kind.to_byte());
        dst.put_i32(envelope.status);
        dst.extend_from_slice(&envelope.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(envelope: Envelope) -> BytesMut {
        let mut buf = BytesMut::new();
        EnvelopeCodec::default().encode(envelope, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_command_id_leads_the_frame() {
        let buf = encode(Envelope::request(3, 9, vec![0xaa, 0xbb]));

        assert_eq!(&buf[..4], &15u32.to_be_bytes());
        assert_eq!(&buf[4..8], &3u32.to_be_bytes());
        assert_eq!(&buf[8..12], &9u32.to_be_bytes());
        assert_eq!(buf[12], 0);
        assert_eq!(&buf[17..], &[0xaa, 0xbb]);
    }

    #[test]
    fn test_encode_decode_reply() {
        let envelope = Envelope::reply(2, 41, -7, vec![1, 2, 3]);
        let mut buf = encode(envelope.clone());

        let decoded = EnvelopeCodec::default().decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(envelope));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(Envelope::request(1, 1, vec![5; 32]));
        let mut codec = EnvelopeCodec::default();

        // Only provide length header
        let mut buf = BytesMut::from(&encoded[..4]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&encoded[4..20]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&encoded[20..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload.len(), 32);
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let mut buf = encode(Envelope::request(1, 1, Bytes::new()));
        buf.extend_from_slice(&encode(Envelope::request(3, 2, vec![7])));

        let mut codec = EnvelopeCodec::default();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command_id, 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().command_id, 3);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = EnvelopeCodec::new(64);
        let mut buf = BytesMut::new();
        buf.put_u32(65);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge(65))
        ));

        let mut out = BytesMut::new();
        let result = codec.encode(Envelope::request(1, 1, vec![0; 64]), &mut out);
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }

    #[test]
    fn test_frame_too_short() {
        let mut buf = BytesMut::new();
        buf.put_u32(4);
        buf.put_u32(3);

        assert!(matches!(
            EnvelopeCodec::default().decode(&mut buf),
            Err(CodecError::FrameTooShort(4))
        ));
    }

    #[test]
    fn test_invalid_kind() {
        let mut buf = encode(Envelope::request(3, 1, Bytes::new()));
        buf[12] = 9;

        assert!(matches!(
            EnvelopeCodec::default().decode(&mut buf),
            Err(CodecError::InvalidKind(9))
        ));
    }
}
