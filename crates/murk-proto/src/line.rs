//! Line framing for the IRC wire protocol.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::message::MAX_MESSAGE_LEN;

/// Splits the byte stream into IRC lines.
///
/// Input lines are delimited by CR or LF in any combination; empty lines
/// are skipped. A run of [`MAX_MESSAGE_LEN`] bytes without a delimiter is
/// framed as a line of its own, so an overlong message cannot stall the
/// stream. Output lines get a CR-LF appended.
#[derive(Debug, Default)]
pub struct LineCodec;

fn is_delimiter(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            // skip delimiters left over from the previous line
            let start = src.iter().position(|&b| !is_delimiter(b));
            match start {
                None => {
                    src.clear();
                    return Ok(None);
                }
                Some(n) => {
                    let _ = src.split_to(n);
                }
            }

            match src.iter().position(|&b| is_delimiter(b)) {
                Some(end) => {
                    let line = src.split_to(end).freeze();
                    if !line.is_empty() {
                        return Ok(Some(line));
                    }
                }
                None if src.len() >= MAX_MESSAGE_LEN => {
                    // no delimiter in a full message worth of bytes
                    return Ok(Some(src.split_to(MAX_MESSAGE_LEN).freeze()));
                }
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        // a trailing partial line at EOF is dropped
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None => {
                src.clear();
                Ok(None)
            }
        }
    }
}

impl Encoder<Bytes> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: Bytes, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(line.len() + 2);
        dst.put_slice(&line);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
