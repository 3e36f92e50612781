//! Newline framing codec for the child's standard streams.
//!
//! Wraps AnyDelimiterCodec so that a frame is exactly the bytes between two
//! `\n` delimiters. The codec works directly on a `BytesMut` read buffer, so the
//! transport can drive it from plain non-blocking reads without an async reactor.

use std::io;

use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

/// Longest inbound frame accepted by default (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

const DELIMITER: &[u8] = b"\n";

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame grew past the limit before a newline arrived. The codec discards
    /// bytes up to the next newline and then resumes normal framing.
    #[error("frame exceeds {max} bytes, discarding until next newline")]
    TooLong { max: usize },

    #[error("frame contains an embedded newline")]
    EmbeddedNewline,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Codec that splits a byte stream on `\n` and appends `\n` on encode.
#[derive(Debug, Clone)]
pub struct LineCodec {
    inner: AnyDelimiterCodec,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                DELIMITER.to_vec(),
                DELIMITER.to_vec(),
                max_length,
            ),
        }
    }

    pub fn max_length(&self) -> usize {
        self.inner.max_length()
    }

    fn map_err(&self, err: AnyDelimiterCodecError) -> FrameError {
        match err {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => FrameError::TooLong {
                max: self.max_length(),
            },
            AnyDelimiterCodecError::Io(e) => FrameError::Io(e),
        }
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.inner.decode(src).map_err(|e| self.map_err(e))
    }

    /// Yields remaining complete frames, then any unterminated tail as a final frame.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.inner.decode_eof(src).map_err(|e| self.map_err(e))
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, line: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = line.as_ref();
        if line.as_bytes().contains(&b'\n') {
            return Err(FrameError::EmbeddedNewline);
        }
        tracing::trace!(frame_len = line.len(), "Encoding frame");
        self.inner.encode(line, dst).map_err(|e| self.map_err(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn splits_multiple_frames_from_one_buffer() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"ready\"}\n{\"type\":\"log\"}\npartial"[..]);

        let frames = drain(&mut codec, &mut buf);

        assert_eq!(frames, vec![
            Bytes::from_static(b"{\"type\":\"ready\"}"),
            Bytes::from_static(b"{\"type\":\"log\"}"),
        ]);
        assert_eq!(&buf[..], b"partial");
    }

    #[test]
    fn empty_line_is_an_empty_frame() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::new()));
        assert!(buf.is_empty());
    }

    #[test]
    fn eof_yields_unterminated_tail() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"one\ntwo"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Bytes::from_static(b"one")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Bytes::from_static(b"two")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn oversized_frame_is_reported_once_then_skipped() {
        let mut codec = LineCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::TooLong { max: 8 })
        ));

        buf.extend_from_slice(b"tail\nok\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::from_static(b"ok")));
    }

    #[test]
    fn encode_appends_single_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(r#"{"type":"message"}"#, &mut buf).unwrap();

        assert_eq!(&buf[..], b"{\"type\":\"message\"}\n");
    }

    #[test]
    fn encode_rejects_embedded_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();

        assert!(matches!(
            codec.encode("a\nb", &mut buf),
            Err(FrameError::EmbeddedNewline)
        ));
        assert!(buf.is_empty());
    }
}
