use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::TransportError;

/// Raw response body as a stream of chunks.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Splits a chunked byte stream into newline-terminated lines.
///
/// Bytes are buffered until a `\n` arrives and only then decoded, so a UTF-8
/// sequence split across chunks decodes the same as an unsplit one.
#[derive(Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=idx).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Bytes held for a line that has not been terminated yet.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Ends framing; an unterminated trailing fragment is dropped.
    pub fn finish(self) -> usize {
        if !self.buf.is_empty() {
            debug!(bytes = self.buf.len(), "dropping unterminated trailing line");
        }
        self.buf.len()
    }
}

/// Adapts a body stream into a stream of complete lines.
pub fn frame_lines(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<String, TransportError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        framer: Option<LineFramer>,
        pending: std::collections::VecDeque<String>,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            framer: Some(LineFramer::new()),
            pending: std::collections::VecDeque::new(),
        },
        |mut state| async move {
            loop {
                if let Some(line) = state.pending.pop_front() {
                    return Ok(Some((line, state)));
                }
                let Some(framer) = state.framer.as_mut() else {
                    return Ok(None);
                };
                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(framer.push_chunk(&chunk));
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        if let Some(framer) = state.framer.take() {
                            framer.finish();
                        }
                    }
                }
            }
        },
    )
}
