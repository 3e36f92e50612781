//! Non-blocking stdio transport between host and child.
//!
//! - **OutboundPipe**: host → child stdin, whole-frame queue flushed without blocking
//! - **InboundPipe**: child stdout/stderr → host, one read attempt per call, newline framing
//!
//! The handles must already be in non-blocking mode (the supervisor arranges this at
//! spawn). A `WouldBlock` from the OS is the normal "nothing right now" answer.

use std::fmt;
use std::io::{self, Read, Write};

use tokio_util::bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::codec::{DEFAULT_MAX_FRAME_LEN, FrameError, LineCodec};

/// Bytes requested from the OS per read attempt.
const READ_CHUNK: usize = 4096;

/// Outbound bytes allowed to queue while the child's stdin pipe is full (64 KiB).
pub const DEFAULT_MAX_PENDING_WRITE: usize = 64 * 1024;

/// Inbound pipe selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeKind {
    Stdout,
    Stderr,
}

impl PipeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for PipeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("child stdin is closed")]
    Closed,

    #[error("write to child stdin failed: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("outbound queue full ({pending} bytes pending), frame dropped")]
    Backlogged { pending: usize },

    #[error("invalid outbound frame: {0}")]
    InvalidFrame(#[from] FrameError),
}

/// Size limits for a [`Transport`].
#[derive(Debug, Clone, Copy)]
pub struct TransportLimits {
    pub max_frame_len: usize,
    pub max_pending_write: usize,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_pending_write: DEFAULT_MAX_PENDING_WRITE,
        }
    }
}

/// Host → child write end.
pub struct OutboundPipe {
    writer: Option<Box<dyn Write + Send>>,
    pending: BytesMut,
    codec: LineCodec,
    max_pending: usize,
}

impl OutboundPipe {
    pub fn new(writer: impl Write + Send + 'static, max_pending: usize) -> Self {
        Self {
            writer: Some(Box::new(writer)),
            pending: BytesMut::new(),
            codec: LineCodec::new(),
            max_pending,
        }
    }

    /// Frame `line` with a trailing newline and write as much as the pipe accepts.
    ///
    /// Whatever does not fit stays queued for [`flush`](Self::flush). Frames are
    /// queued whole or not at all, so the child never sees a torn line.
    pub fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        if self.writer.is_none() {
            return Err(TransportError::Closed);
        }

        let frame_len = line.len() + 1;
        if !self.pending.is_empty() && self.pending.len() + frame_len > self.max_pending {
            return Err(TransportError::Backlogged {
                pending: self.pending.len(),
            });
        }

        self.codec.encode(line, &mut self.pending)?;
        self.flush()
    }

    /// Write queued bytes until done or the pipe would block.
    pub fn flush(&mut self) -> Result<(), TransportError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(TransportError::Closed);
        };

        while !self.pending.is_empty() {
            match writer.write(&self.pending) {
                Ok(0) => {
                    let dropped = self.pending.len();
                    self.pending.clear();
                    tracing::warn!(dropped, "Child stdin accepted no bytes, dropping queue");
                    return Err(TransportError::WriteFailed(io::ErrorKind::WriteZero.into()));
                }
                Ok(n) => self.pending.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tracing::trace!(pending = self.pending.len(), "Child stdin full, deferring");
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Queued frames are lost; later writes are still attempted.
                    self.pending.clear();
                    return Err(TransportError::WriteFailed(e));
                }
            }
        }
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    pub fn close(&mut self) {
        if self.writer.take().is_some() {
            self.pending.clear();
            tracing::trace!("Closed child stdin");
        }
    }
}

/// Child → host read end with its reassembly buffer.
pub struct InboundPipe {
    kind: PipeKind,
    reader: Option<Box<dyn Read + Send>>,
    buf: BytesMut,
    codec: LineCodec,
}

impl InboundPipe {
    pub fn new(kind: PipeKind, reader: impl Read + Send + 'static, max_frame_len: usize) -> Self {
        Self {
            kind,
            reader: Some(Box::new(reader)),
            buf: BytesMut::with_capacity(READ_CHUNK),
            codec: LineCodec::with_max_length(max_frame_len),
        }
    }

    /// Return the next complete frame, performing at most one non-blocking read.
    ///
    /// Frames already buffered are returned without touching the OS. After the
    /// child closes the pipe, remaining frames drain and an unterminated tail is
    /// yielded as the final frame.
    pub fn try_read_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        let Some(reader) = self.reader.as_mut() else {
            return self.codec.decode_eof(&mut self.buf);
        };

        if let Some(frame) = self.codec.decode(&mut self.buf)? {
            return Ok(Some(frame));
        }

        let mut chunk = [0u8; READ_CHUNK];
        match reader.read(&mut chunk) {
            Ok(0) => {
                tracing::debug!(pipe = %self.kind, buffered = self.buf.len(), "Child closed pipe");
                self.reader = None;
                self.codec.decode_eof(&mut self.buf)
            }
            Ok(n) => {
                tracing::trace!(pipe = %self.kind, bytes = n, "Read from child");
                self.buf.extend_from_slice(&chunk[..n]);
                self.codec.decode(&mut self.buf)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(pipe = %self.kind, error = %e, "Read from child failed, closing pipe");
                self.reader = None;
                self.codec.decode_eof(&mut self.buf)
            }
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// True once the child closed the pipe (or it was closed locally).
    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::trace!(pipe = %self.kind, "Closed pipe");
        }
        self.buf.clear();
    }
}

/// The three stdio pipes of one child process.
pub struct Transport {
    stdin: OutboundPipe,
    stdout: InboundPipe,
    stderr: InboundPipe,
}

impl Transport {
    pub fn new(
        stdin: impl Write + Send + 'static,
        stdout: impl Read + Send + 'static,
        stderr: impl Read + Send + 'static,
        limits: TransportLimits,
    ) -> Self {
        Self {
            stdin: OutboundPipe::new(stdin, limits.max_pending_write),
            stdout: InboundPipe::new(PipeKind::Stdout, stdout, limits.max_frame_len),
            stderr: InboundPipe::new(PipeKind::Stderr, stderr, limits.max_frame_len),
        }
    }

    pub fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.stdin.write_line(line)
    }

    pub fn flush(&mut self) -> Result<(), TransportError> {
        self.stdin.flush()
    }

    pub fn try_read_frame(&mut self, pipe: PipeKind) -> Result<Option<Bytes>, FrameError> {
        self.pipe_mut(pipe).try_read_frame()
    }

    fn pipe_mut(&mut self, pipe: PipeKind) -> &mut InboundPipe {
        match pipe {
            PipeKind::Stdout => &mut self.stdout,
            PipeKind::Stderr => &mut self.stderr,
        }
    }

    /// Close all pipes. Each handle is dropped exactly once; repeated calls are no-ops.
    pub fn close(&mut self) {
        self.stdin.close();
        self.stdout.close();
        self.stderr.close();
    }

    pub fn is_closed(&self) -> bool {
        self.stdin.is_closed() && self.stdout.is_closed() && self.stderr.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Reader that hands out scripted chunks, answering WouldBlock when a chunk is `None`
    /// and EOF once the script runs out.
    struct ScriptedReader {
        chunks: VecDeque<Option<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(chunks: Vec<Option<Vec<u8>>>) -> Self {
            Self {
                chunks: chunks.into(),
            }
        }

        fn would_block_forever(chunks: Vec<Vec<u8>>) -> Self {
            let mut scripted: Vec<Option<Vec<u8>>> = chunks.into_iter().map(Some).collect();
            scripted.resize(scripted.len() + 4096, None);
            Self::new(scripted)
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(None) => Err(io::ErrorKind::WouldBlock.into()),
                Some(Some(chunk)) => {
                    assert!(chunk.len() <= buf.len());
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
            }
        }
    }

    /// Writer that accepts at most `capacity` bytes before answering WouldBlock.
    #[derive(Clone, Default)]
    struct ShallowPipe {
        written: Arc<Mutex<Vec<u8>>>,
        capacity: Arc<Mutex<usize>>,
    }

    impl ShallowPipe {
        fn with_capacity(capacity: usize) -> Self {
            Self {
                written: Arc::default(),
                capacity: Arc::new(Mutex::new(capacity)),
            }
        }

        fn grow(&self, by: usize) {
            *self.capacity.lock().unwrap() += by;
        }

        fn contents(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }
    }

    impl Write for ShallowPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut capacity = self.capacity.lock().unwrap();
            if *capacity == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(*capacity);
            *capacity -= n;
            self.written.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn drain(pipe: &mut InboundPipe, max_calls: usize) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for _ in 0..max_calls {
            if let Some(frame) = pipe.try_read_frame().unwrap() {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn frames_survive_every_chunk_split() {
        let stream = b"{\"type\":\"ready\"}\n{\"type\":\"log\",\"message\":\"a\"}\n\n{\"type\":\"error\",\"message\":\"b\"}\n";
        let expected: Vec<&[u8]> = stream
            .split(|b| *b == b'\n')
            .take(4)
            .collect();

        for first in 0..=stream.len() {
            for second in first..=stream.len() {
                let chunks = vec![
                    stream[..first].to_vec(),
                    stream[first..second].to_vec(),
                    stream[second..].to_vec(),
                ];
                let chunks = chunks.into_iter().filter(|c| !c.is_empty()).collect();
                let mut pipe = InboundPipe::new(
                    PipeKind::Stdout,
                    ScriptedReader::would_block_forever(chunks),
                    DEFAULT_MAX_FRAME_LEN,
                );

                let frames = drain(&mut pipe, 16);

                assert_eq!(frames, expected, "split at {first}/{second}");
                assert_eq!(pipe.buffered_len(), 0);
            }
        }
    }

    #[test]
    fn yields_one_frame_per_call() {
        let mut pipe = InboundPipe::new(
            PipeKind::Stdout,
            ScriptedReader::would_block_forever(vec![b"a\nb\nc\n".to_vec()]),
            DEFAULT_MAX_FRAME_LEN,
        );

        assert_eq!(pipe.try_read_frame().unwrap(), Some(Bytes::from_static(b"a")));
        assert_eq!(pipe.buffered_len(), 4);
        assert_eq!(pipe.try_read_frame().unwrap(), Some(Bytes::from_static(b"b")));
        assert_eq!(pipe.try_read_frame().unwrap(), Some(Bytes::from_static(b"c")));
        assert_eq!(pipe.try_read_frame().unwrap(), None);
    }

    #[test]
    fn would_block_returns_none_and_keeps_partial() {
        let mut pipe = InboundPipe::new(
            PipeKind::Stdout,
            ScriptedReader::new(vec![Some(b"{\"type\":".to_vec()), None]),
            DEFAULT_MAX_FRAME_LEN,
        );

        assert_eq!(pipe.try_read_frame().unwrap(), None);
        assert_eq!(pipe.try_read_frame().unwrap(), None);
        assert_eq!(pipe.buffered_len(), 8);
        assert!(!pipe.is_closed());
    }

    #[test]
    fn eof_flushes_tail_and_closes() {
        let mut pipe = InboundPipe::new(
            PipeKind::Stderr,
            ScriptedReader::new(vec![Some(b"warning: x\nno newline".to_vec())]),
            DEFAULT_MAX_FRAME_LEN,
        );

        assert_eq!(
            pipe.try_read_frame().unwrap(),
            Some(Bytes::from_static(b"warning: x"))
        );
        assert_eq!(
            pipe.try_read_frame().unwrap(),
            Some(Bytes::from_static(b"no newline"))
        );
        assert!(pipe.is_closed());
        assert_eq!(pipe.try_read_frame().unwrap(), None);
    }

    #[test]
    fn oversized_frame_reports_then_recovers() {
        let mut pipe = InboundPipe::new(
            PipeKind::Stdout,
            ScriptedReader::would_block_forever(vec![vec![b'x'; 64], b"\nok\n".to_vec()]),
            16,
        );

        assert!(matches!(
            pipe.try_read_frame(),
            Err(FrameError::TooLong { max: 16 })
        ));
        assert_eq!(drain(&mut pipe, 4), vec![Bytes::from_static(b"ok")]);
    }

    #[test]
    fn write_line_appends_exactly_one_newline() {
        let sink = ShallowPipe::with_capacity(usize::MAX);
        let mut out = OutboundPipe::new(sink.clone(), DEFAULT_MAX_PENDING_WRITE);

        out.write_line(r#"{"type":"message","inlet":0,"selector":"bang","args":[]}"#)
            .unwrap();

        assert_eq!(
            sink.contents(),
            b"{\"type\":\"message\",\"inlet\":0,\"selector\":\"bang\",\"args\":[]}\n"
        );
    }

    #[test]
    fn full_pipe_defers_then_flushes_in_order() {
        let sink = ShallowPipe::with_capacity(3);
        let mut out = OutboundPipe::new(sink.clone(), DEFAULT_MAX_PENDING_WRITE);

        out.write_line("first").unwrap();
        out.write_line("second").unwrap();
        assert_eq!(sink.contents(), b"fir");
        assert_eq!(out.pending_len(), "first\nsecond\n".len() - 3);

        sink.grow(64);
        out.flush().unwrap();

        assert_eq!(sink.contents(), b"first\nsecond\n");
        assert_eq!(out.pending_len(), 0);
    }

    #[test]
    fn backlog_drops_whole_frames() {
        let sink = ShallowPipe::with_capacity(0);
        let mut out = OutboundPipe::new(sink.clone(), 8);

        out.write_line("abcdef").unwrap();
        let err = out.write_line("gh").unwrap_err();

        assert!(matches!(err, TransportError::Backlogged { pending: 7 }));
        sink.grow(64);
        out.flush().unwrap();
        assert_eq!(sink.contents(), b"abcdef\n");
    }

    #[test]
    fn broken_pipe_is_reported_and_retried() {
        let mut out = OutboundPipe::new(BrokenPipe, DEFAULT_MAX_PENDING_WRITE);

        assert!(matches!(
            out.write_line("a"),
            Err(TransportError::WriteFailed(_))
        ));
        assert!(matches!(
            out.write_line("b"),
            Err(TransportError::WriteFailed(_))
        ));
        assert_eq!(out.pending_len(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let mut transport = Transport::new(
            ShallowPipe::with_capacity(16),
            ScriptedReader::new(vec![]),
            ScriptedReader::new(vec![]),
            TransportLimits::default(),
        );

        transport.close();
        transport.close();

        assert!(transport.is_closed());
        assert!(matches!(
            transport.write_line("x"),
            Err(TransportError::Closed)
        ));
        assert_eq!(transport.try_read_frame(PipeKind::Stdout).unwrap(), None);
    }
}
