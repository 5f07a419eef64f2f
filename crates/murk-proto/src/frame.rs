//! Varint length-delimited framing.
//!
//! The RPC wire format: each frame is an unsigned LEB128 varint length
//! (at most [`MAX_VARINT_LEN`] bytes) followed by that many payload bytes.
//! The 4-byte method code that opens an RPC stream is not part of this
//! codec; the call layer consumes it before framing starts.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Longest valid encoding of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Default frame size bound.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Codec for varint length-delimited frames.
///
/// The length is validated against the frame bound before any allocation,
/// and a header that runs past [`MAX_VARINT_LEN`] bytes without
/// terminating is a protocol error rather than an ever-growing wait.
#[derive(Debug)]
pub struct VarintFrameCodec {
    max_frame: usize,
}

impl Default for VarintFrameCodec {
    fn default() -> VarintFrameCodec {
        VarintFrameCodec {
            max_frame: DEFAULT_MAX_FRAME,
        }
    }
}

impl VarintFrameCodec {
    /// Creates a codec with the default frame bound.
    pub fn new() -> VarintFrameCodec {
        VarintFrameCodec::default()
    }

    /// Creates a codec with a custom frame bound.
    pub fn with_max_frame(max_frame: usize) -> VarintFrameCodec {
        VarintFrameCodec { max_frame }
    }

    /// Appends the varint encoding of `value` to `dst`.
    pub fn put_varint(dst: &mut BytesMut, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                dst.put_u8(byte);
                return;
            }
            dst.put_u8(byte | 0x80);
        }
    }

    /// Tries to read a varint from the front of `src` without consuming.
    /// Returns `(value, encoded length)`.
    fn peek_varint(src: &[u8]) -> Result<Option<(u64, usize)>, ProtocolError> {
        let mut value: u64 = 0;
        for (i, &byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(Some((value, i + 1)));
            }
        }
        if src.len() >= MAX_VARINT_LEN {
            return Err(ProtocolError::BadFrameHeader);
        }
        Ok(None)
    }
}

impl Decoder for VarintFrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        let Some((length, header)) = Self::peek_varint(src)? else {
            return Ok(None);
        };

        let length = usize::try_from(length).unwrap_or(usize::MAX);
        if length > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                limit: self.max_frame,
            });
        }

        if src.len() < header + length {
            src.reserve(header + length - src.len());
            return Ok(None);
        }

        let _ = src.split_to(header);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for VarintFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if frame.len() > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.len(),
                limit: self.max_frame,
            });
        }
        dst.reserve(frame.len() + MAX_VARINT_LEN);
        Self::put_varint(dst, frame.len() as u64);
        dst.put_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_frames() {
        let mut codec = VarintFrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(Bytes::from_static(b"hello"), &mut wire).unwrap();
        codec.encode(Bytes::from_static(b""), &mut wire).unwrap();
        codec
            .encode(Bytes::from(vec![0xab; 300]), &mut wire)
            .unwrap();

        assert_eq!(codec.decode(&mut wire).unwrap().unwrap(), &b"hello"[..]);
        assert_eq!(codec.decode(&mut wire).unwrap().unwrap(), &b""[..]);
        assert_eq!(codec.decode(&mut wire).unwrap().unwrap().len(), 300);
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn multi_byte_length_prefix() {
        let mut codec = VarintFrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(Bytes::from(vec![7u8; 300]), &mut wire).unwrap();
        // 300 = 0xAC 0x02 as a varint
        assert_eq!(&wire[..2], &[0xac, 0x02]);
    }

    #[test]
    fn partial_frame_waits() {
        let mut codec = VarintFrameCodec::new();
        let mut wire = BytesMut::from(&[0x05, b'a', b'b'][..]);
        assert!(codec.decode(&mut wire).unwrap().is_none());
        wire.extend_from_slice(b"cde");
        assert_eq!(codec.decode(&mut wire).unwrap().unwrap(), &b"abcde"[..]);
    }

    #[test]
    fn unterminated_varint_is_an_error() {
        let mut codec = VarintFrameCodec::new();
        // ten continuation bytes and still no terminator
        let mut wire = BytesMut::from(&[0x80u8; MAX_VARINT_LEN][..]);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::BadFrameHeader)
        ));

        // nine continuation bytes might still terminate
        let mut wire = BytesMut::from(&[0x80u8; MAX_VARINT_LEN - 1][..]);
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_rejected_before_allocation() {
        let mut codec = VarintFrameCodec::with_max_frame(1024);
        let mut wire = BytesMut::new();
        VarintFrameCodec::put_varint(&mut wire, 2048);
        wire.put_slice(&[0u8; 16]);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::FrameTooLarge { size: 2048, limit: 1024 })
        ));

        let mut wire = BytesMut::new();
        let err = codec.encode(Bytes::from(vec![0u8; 2048]), &mut wire);
        assert!(matches!(err, Err(ProtocolError::FrameTooLarge { .. })));
    }
}
