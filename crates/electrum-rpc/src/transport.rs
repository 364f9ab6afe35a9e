//! Newline-delimited transport codec.
//!
//! The protocol exchanges one JSON object per frame, frames separated by a
//! single newline byte. This codec decodes incoming lines into the generic
//! [`Envelope`] and encodes outgoing [`Request`]s with the trailing
//! delimiter appended.
//!
//! Undecodable lines are logged and skipped inside `decode` rather than
//! surfaced: `FramedRead` treats any decoder error as terminal, so
//! returning one for a recoverable frame would poison the whole stream.
//! Only oversize buffers and I/O failures come out as errors.
//!
//! Frame format:
//! ```text
//! +------------------+----------+
//! |  N bytes (JSON)  |  b'\n'   |
//! +------------------+----------+
//! ```

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::protocol::{Envelope, Request};

/// Maximum frame size (8 MB); a buffer growing past this without a newline
/// means the peer is not speaking the protocol.
const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Frame delimiter
const DELIMITER: u8 = b'\n';

/// Codec for newline-delimited JSON frames
#[derive(Debug, Default)]
pub struct LineCodec;

impl LineCodec {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for LineCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src.iter().position(|b| *b == DELIMITER) else {
                if src.len() > MAX_FRAME_SIZE {
                    return Err(CodecError::FrameTooLarge(src.len()));
                }
                return Ok(None);
            };

            let line = src.split_to(pos + 1);
            let payload = &line[..pos];

            // Tolerate blank lines between frames
            if payload.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let Ok(json_str) = std::str::from_utf8(payload) else {
                warn!(len = payload.len(), "dropping non-UTF-8 frame");
                continue;
            };
            match serde_json::from_str(json_str) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => {
                    warn!(error = %e, "dropping undecodable frame");
                    continue;
                }
            }
        }
    }
}

impl Encoder<Request> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;

        if json.len() > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(json.len()));
        }

        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(DELIMITER);

        Ok(())
    }
}

/// Errors that can occur during codec operations; all of them poison the
/// stream and force a reconnect
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_delimiter() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();

        let req = Request::new(0, "server.banner", vec![]);
        codec.encode(req, &mut buf).unwrap();

        assert_eq!(buf.last(), Some(&b'\n'));
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[test]
    fn test_decode_reply() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":4,\"result\":\"hello\"}\n"[..]);

        let env = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(env.id, Some(4));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_delimiter() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":4"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b",\"result\":null}\n");
        let env = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(env.id, Some(4));
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(
            &b"{\"id\":0,\"result\":1}\n{\"method\":\"blockchain.headers.subscribe\",\"params\":[]}\n"
                [..],
        );

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.id, Some(0));

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert!(second.is_push());

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\n  \n{\"id\":9}\n"[..]);

        let env = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(env.id, Some(9));
    }

    #[test]
    fn test_decode_skips_invalid_json() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"not json at all\n"[..]);

        // The offending line is consumed without surfacing an error
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_continues_past_invalid_json() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"garbage\n{\"id\":1}\n"[..]);

        // One decode call scans past the bad line to the next valid frame
        let env = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(env.id, Some(1));
    }

    #[test]
    fn test_decode_skips_invalid_utf8() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&[0xff, 0xfe, 0x01, b'\n'][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_oversize_buffer() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        buf.resize(MAX_FRAME_SIZE + 1, b'x');

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }

    #[test]
    fn test_roundtrip_through_envelope() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();

        let req = Request::new(12, "blockchain.address.get_balance", vec!["1abc".to_string()]);
        codec.encode(req, &mut buf).unwrap();

        // Requests decode as envelopes on the far side
        let env = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(env.id, Some(12));
        assert_eq!(env.method.as_deref(), Some("blockchain.address.get_balance"));
    }
}
