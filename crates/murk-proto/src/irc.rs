//! IRC message codec for tokio.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::line::LineCodec;
use crate::message::Message;

/// Tokio codec that decodes IRC lines into [`Message`] values.
///
/// Malformed lines are logged and dropped rather than failing the stream;
/// the IRC protocol treats them as noise, not as connection errors.
#[derive(Debug, Default)]
pub struct IrcCodec {
    inner: LineCodec,
}

impl IrcCodec {
    /// Creates a new codec.
    pub fn new() -> IrcCodec {
        IrcCodec::default()
    }
}

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        while let Some(line) = self.inner.decode(src)? {
            match Message::parse(&line) {
                Some(msg) => return Ok(Some(msg)),
                None => {
                    tracing::warn!(line = %String::from_utf8_lossy(&line), "dropping invalid IRC message");
                }
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        while let Some(line) = self.inner.decode_eof(src)? {
            match Message::parse(&line) {
                Some(msg) => return Ok(Some(msg)),
                None => {
                    tracing::warn!(line = %String::from_utf8_lossy(&line), "dropping invalid IRC message");
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut out = Vec::with_capacity(64);
        msg.write_to(&mut out);
        self.inner.encode(Bytes::from(out), dst)
    }
}

impl Encoder<&Message> for IrcCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: &Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let mut out = Vec::with_capacity(64);
        msg.write_to(&mut out);
        self.inner.encode(Bytes::from(out), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_messages_and_skips_junk() {
        let mut codec = IrcCodec::new();
        let mut src = BytesMut::from(&b":pfx PING :tok\r\n: \r\nNOTICE x :y\r\n"[..]);

        let first = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(first.command, "PING");
        assert_eq!(first.prefix, "pfx");

        // the malformed ": " line is skipped entirely
        let second = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(second.command, "NOTICE");
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn encode_round_trips() {
        let mut codec = IrcCodec::new();
        let mut wire = BytesMut::new();
        let msg = Message::cmd("PRIVMSG").args(["#chan", "hello there"]);
        codec.encode(&msg, &mut wire).unwrap();
        assert_eq!(&wire[..], b"PRIVMSG #chan :hello there\r\n");

        let back = codec.decode(&mut wire).unwrap().unwrap();
        assert_eq!(back, msg);
    }
}
