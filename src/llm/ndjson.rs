//! Newline-delimited JSON framing for streamed daemon responses.
//!
//! Bytes are buffered until a full line is available, so records and multi-byte
//! characters split across network chunks are reassembled. Lines that are blank or do
//! not parse are skipped with a warning; the stream carries on.

use crate::error::{Result, VisionChatError};
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::warn;

/// Accumulates raw bytes and hands back complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and drain every complete, non-blank line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = decode_line(&raw) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the body ends without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        decode_line(&raw)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_string())
}

/// Parse one line, logging and discarding it on failure
pub fn parse_record<T: DeserializeOwned>(line: &str) -> Option<T> {
    match serde_json::from_str(line) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping malformed stream line: {}", e);
            None
        }
    }
}

/// Decode a streaming response body into typed records.
///
/// A transport failure mid-body ends the stream with an error; `host` names the daemon
/// in that error.
pub fn records<T>(response: reqwest::Response, host: String) -> impl Stream<Item = Result<T>> + Send
where
    T: DeserializeOwned + Send + 'static,
{
    async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for line in lines.push(&bytes) {
                        if let Some(record) = parse_record::<T>(&line) {
                            yield Ok(record);
                        }
                    }
                }
                Err(e) => {
                    yield Err(VisionChatError::from_transport(e, &host));
                    return;
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(record) = parse_record::<T>(&line) {
                yield Ok(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_push_splits_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_push_holds_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"message\":{\"con").is_empty());
        let lines = buf.push(b"tent\":\"hi\"}}\n");
        assert_eq!(lines, vec!["{\"message\":{\"content\":\"hi\"}}"]);
    }

    #[test]
    fn test_push_skips_blank_and_crlf() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"\n\r\n{\"x\":true}\r\n   \n");
        assert_eq!(lines, vec!["{\"x\":true}"]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let text = "{\"c\":\"caf\u{e9}\"}\n";
        let bytes = text.as_bytes();
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut buf = LineBuffer::new();
        assert!(buf.push(&bytes[..split]).is_empty());
        let lines = buf.push(&bytes[split..]);

        let value: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(value["c"], "caf\u{e9}");
    }

    #[test]
    fn test_finish_returns_unterminated_tail() {
        let mut buf = LineBuffer::new();
        buf.push(b"{\"done\":true}");
        assert_eq!(buf.finish().as_deref(), Some("{\"done\":true}"));
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_parse_record_tolerates_garbage() {
        assert!(parse_record::<Value>("not json").is_none());
        assert_eq!(parse_record::<Value>("{\"k\":1}").unwrap()["k"], 1);
    }

    #[tokio::test]
    async fn test_records_from_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/stream")
            .with_status(200)
            .with_body("{\"n\":1}\nkeep-alive\n\n{\"n\":2}")
            .create_async()
            .await;

        let response = reqwest::get(format!("{}/stream", server.url())).await.unwrap();
        let collected: Vec<Value> = records::<Value>(response, server.url())
            .map(|r| r.unwrap())
            .collect()
            .await;

        mock.assert_async().await;
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0]["n"], 1);
        assert_eq!(collected[1]["n"], 2);
    }
}
