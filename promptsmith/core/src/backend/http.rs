//! HTTP plumbing shared by the provider adapters
//!
//! Client construction, status-to-error mapping, and the server-sent-events
//! reader that turns a response body into a [`TokenStream`].

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::traits::{StreamingToken, TokenStream};
use super::CONNECT_TIMEOUT;
use crate::error::UpstreamError;

/// Buffered events between the reader task and the consumer
const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Longest error body kept in [`UpstreamError::RequestFailed`]
const MAX_ERROR_BODY: usize = 512;

/// Build a client that gives up after `read_timeout` of silence
///
/// No total deadline is set: streams stay open as long as fragments keep
/// arriving, and non-streaming calls are bounded by the orchestrator.
pub(crate) fn build_client(read_timeout: Duration) -> Result<reqwest::Client, UpstreamError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(read_timeout)
        .build()
        .map_err(|e| UpstreamError::ConnectionFailed(format!("failed to build HTTP client: {e}")))
}

/// Map non-success statuses onto [`UpstreamError`]
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        401 | 403 => Err(UpstreamError::AuthenticationFailed),
        429 => {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000));
            Err(UpstreamError::RateLimited { retry_after_ms })
        }
        code => {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            Err(UpstreamError::RequestFailed { status: code, body })
        }
    }
}

/// Decode a JSON body, mapping failures to [`UpstreamError::InvalidResponse`]
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value, UpstreamError> {
    response
        .json::<Value>()
        .await
        .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
}

// =============================================================================
// Server-sent events
// =============================================================================

/// What one SSE `data:` payload means to a provider
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SseEvent {
    /// Text fragment
    Text(String),
    /// Provider signalled the end of the reply
    Done,
    /// Provider reported an error mid-stream
    Error(String),
    /// Nothing to forward (pings, metadata)
    Skip,
}

/// Incremental splitter for `data:` lines
///
/// Bytes are buffered undecoded until a newline arrives, so a character
/// split across network chunks is decoded whole.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed bytes, returning the `data:` payloads of every completed line
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

/// Classify one payload with a provider-specific extractor
pub(crate) fn classify(data: &str, extract: fn(&Value) -> SseEvent) -> SseEvent {
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(value) => extract(&value),
        Err(_) => SseEvent::Skip,
    }
}

/// Spawn the reader task for an SSE response
///
/// The task ends when the provider finishes, the body errors, `cancel`
/// fires, or the consumer drops the stream.
pub(crate) fn spawn_sse_stream(
    provider: &str,
    response: reqwest::Response,
    cancel: CancellationToken,
    extract: fn(&Value) -> SseEvent,
) -> TokenStream {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let task_cancel = cancel.clone();
    let provider_name = provider.to_string();

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut parser = SseParser::default();
        let mut full_response = String::new();

        loop {
            let chunk = tokio::select! {
                () = task_cancel.cancelled() => {
                    tracing::debug!(provider = %provider_name, "Stream cancelled, closing upstream connection");
                    return;
                }
                chunk = body.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                    return;
                }
                None => break,
            };

            for data in parser.push(&bytes) {
                match classify(&data, extract) {
                    SseEvent::Text(text) => {
                        full_response.push_str(&text);
                        if tx.send(StreamingToken::Token(text)).await.is_err() {
                            // Receiver dropped
                            return;
                        }
                    }
                    SseEvent::Done => {
                        let _ = tx
                            .send(StreamingToken::Complete {
                                message: full_response,
                            })
                            .await;
                        return;
                    }
                    SseEvent::Error(message) => {
                        let _ = tx.send(StreamingToken::Error(message)).await;
                        return;
                    }
                    SseEvent::Skip => {}
                }
            }
        }

        let _ = tx
            .send(StreamingToken::Complete {
                message: full_response,
            })
            .await;
    });

    TokenStream::new(provider, rx, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{serve_sse, SseServer};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn text_field(value: &Value) -> SseEvent {
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return SseEvent::Error(message.to_string());
        }
        value
            .get("text")
            .and_then(Value::as_str)
            .map_or(SseEvent::Skip, |t| SseEvent::Text(t.to_string()))
    }

    async fn open(server: &SseServer, read_timeout: Duration) -> TokenStream {
        let client = build_client(read_timeout).unwrap();
        let response = client.get(&server.url).send().await.unwrap();
        let response = check_status(response).await.unwrap();
        spawn_sse_stream("local", response, CancellationToken::new(), text_field)
    }

    async fn drain(stream: &mut TokenStream) -> Vec<StreamingToken> {
        let mut seen = Vec::new();
        while let Some(token) = stream.next_token().await {
            seen.push(token);
        }
        seen
    }

    fn token(text: &str) -> StreamingToken {
        StreamingToken::Token(text.to_string())
    }

    #[test]
    fn test_parser_handles_split_lines() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"data: {\"text\":").is_empty());
        let payloads = parser.push(b" \"hi\"}\n\ndata: [DONE]\n");
        assert_eq!(payloads, vec![r#"{"text": "hi"}"#.to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_parser_keeps_multibyte_characters_split_across_chunks() {
        let line = "data: {\"text\": \"héllo 日本\"}\n".as_bytes();
        let split = line
            .iter()
            .position(|b| *b == 0xE6)
            .map(|start| start + 1)
            .unwrap();

        let mut parser = SseParser::default();
        assert!(parser.push(&line[..split]).is_empty());
        let payloads = parser.push(&line[split..]);
        assert_eq!(payloads, vec![r#"{"text": "héllo 日本"}"#.to_string()]);
        assert!(!payloads[0].contains('\u{FFFD}'));
    }

    #[test]
    fn test_parser_ignores_event_and_comment_lines() {
        let mut parser = SseParser::default();
        let payloads = parser.push(b"event: ping\n: keepalive\ndata: {}\n");
        assert_eq!(payloads, vec!["{}".to_string()]);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("[DONE]", text_field), SseEvent::Done);
        assert_eq!(
            classify(&json!({"text": "a"}).to_string(), text_field),
            SseEvent::Text("a".into())
        );
        assert_eq!(classify("not json", text_field), SseEvent::Skip);
    }

    #[tokio::test]
    async fn test_stream_forwards_tokens_until_done_sentinel() {
        let server = serve_sse(
            vec![
                b"data: {\"text\": \"Hel\"}\n\n".to_vec(),
                b"data: {\"text\": \"lo\"}\n\ndata: [DONE]\n\n".to_vec(),
                b"data: {\"text\": \"ignored\"}\n\n".to_vec(),
            ],
            Duration::ZERO,
            false,
        )
        .await;
        let mut stream = open(&server, Duration::from_secs(5)).await;

        assert_eq!(
            drain(&mut stream).await,
            vec![
                token("Hel"),
                token("lo"),
                StreamingToken::Complete {
                    message: "Hello".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_completes_when_body_ends_without_sentinel() {
        let server = serve_sse(
            vec![
                b"data: {\"text\": \"a\"}\n".to_vec(),
                b"data: {\"text\": \"b\"}\n".to_vec(),
            ],
            Duration::ZERO,
            false,
        )
        .await;
        let mut stream = open(&server, Duration::from_secs(5)).await;

        assert_eq!(
            drain(&mut stream).await,
            vec![
                token("a"),
                token("b"),
                StreamingToken::Complete {
                    message: "ab".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_stops_at_provider_error() {
        let server = serve_sse(
            vec![
                b"data: {\"text\": \"partial\"}\n".to_vec(),
                b"data: {\"error\": \"overloaded\"}\n".to_vec(),
                b"data: {\"text\": \"never\"}\n".to_vec(),
            ],
            Duration::ZERO,
            false,
        )
        .await;
        let mut stream = open(&server, Duration::from_secs(5)).await;

        assert_eq!(
            drain(&mut stream).await,
            vec![token("partial"), StreamingToken::Error("overloaded".into())]
        );
    }

    #[tokio::test]
    async fn test_stream_decodes_characters_split_across_network_chunks() {
        let line = "data: {\"text\": \"héllo 日本\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xE6).unwrap() + 1;
        let server = serve_sse(
            vec![line[..split].to_vec(), line[split..].to_vec()],
            Duration::from_millis(20),
            false,
        )
        .await;
        let stream = open(&server, Duration::from_secs(5)).await;

        assert_eq!(
            stream.collect_text().await.unwrap(),
            "héllo 日本".to_string()
        );
    }

    #[tokio::test]
    async fn test_slow_stream_outlives_read_timeout() {
        let chunks = (0..8)
            .map(|i| format!("data: {{\"text\": \"{i}\"}}\n").into_bytes())
            .collect();
        let server = serve_sse(chunks, Duration::from_millis(60), false).await;
        // Total duration is well past the timeout; each gap is well under it
        let stream = open(&server, Duration::from_millis(400)).await;

        assert_eq!(stream.collect_text().await.unwrap(), "01234567".to_string());
    }

    #[tokio::test]
    async fn test_cancel_closes_upstream_connection() {
        let mut server = serve_sse(
            vec![b"data: {\"text\": \"first\"}\n".to_vec()],
            Duration::ZERO,
            true,
        )
        .await;
        let mut stream = open(&server, Duration::from_secs(30)).await;

        assert_eq!(stream.next_token().await, Some(token("first")));
        stream.cancel();
        assert_eq!(stream.next_token().await, None);
        tokio::time::timeout(Duration::from_secs(5), server.closed())
            .await
            .expect("connection closed after cancel");
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_upstream_connection() {
        let mut server = serve_sse(
            vec![b"data: {\"text\": \"first\"}\n".to_vec()],
            Duration::ZERO,
            true,
        )
        .await;
        let mut stream = open(&server, Duration::from_secs(30)).await;

        assert_eq!(stream.next_token().await, Some(token("first")));
        drop(stream);
        tokio::time::timeout(Duration::from_secs(5), server.closed())
            .await
            .expect("connection closed after drop");
    }
}
