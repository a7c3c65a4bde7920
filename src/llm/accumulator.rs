//! Incremental assembly of a streamed assistant reply.
//!
//! The gateway hands out text deltas; displays want the whole reply so far. The
//! accumulator sits between the two and only ever grows its buffer by appending.

use crate::error::Result;
use crate::llm::gateway::StreamChunk;
use futures::stream::{Stream, StreamExt};

/// Marker shown after the partial reply while it is still streaming
pub const CURSOR: &str = "\u{258c}";

/// Running buffer for one assistant reply
#[derive(Debug, Default, Clone)]
pub struct ResponseAccumulator {
    buffer: String,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return the full buffer
    pub fn push(&mut self, delta: &str) -> &str {
        self.buffer.push_str(delta);
        &self.buffer
    }

    pub fn snapshot(&self) -> &str {
        &self.buffer
    }

    /// The buffer as rendered mid-stream
    pub fn display(&self) -> String {
        format!("{}{}", self.buffer, CURSOR)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

/// Turn a stream of chunks into a stream of growing full-buffer snapshots.
///
/// Empty deltas produce no snapshot. The first error is forwarded and ends the stream.
pub fn accumulate<'a, S>(chunks: S) -> impl Stream<Item = Result<String>> + Send + 'a
where
    S: Stream<Item = Result<StreamChunk>> + Send + 'a,
{
    async_stream::stream! {
        let mut chunks = Box::pin(chunks);
        let mut accumulator = ResponseAccumulator::new();

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(StreamChunk::Content(delta)) => {
                    if !delta.is_empty() {
                        yield Ok(accumulator.push(&delta).to_string());
                    }
                }
                Ok(StreamChunk::Done) => break,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
}
