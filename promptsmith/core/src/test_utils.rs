//! Scripted backends for unit tests
//!
//! [`MockBackend`] answers every capability from canned values, can be
//! switched to fail, and records each call so tests can assert exactly
//! which adapters were touched.
//!
//! # Usage
//!
//! ```ignore
//! let primary = MockBackend::new("primary").with_enhancement("T").with_score(90.0);
//! let registry = ProviderRegistry::from_adapters(vec![primary.shared()]);
//! // ... run the orchestrator ...
//! assert_eq!(primary.call_count(MockCallKind::Score), 1);
//! ```
//!
//! [`serve_sse`] stands up a one-shot local HTTP server that replies with a
//! scripted server-sent-events body, for exercising the real adapters'
//! stream reader over a socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::backend::{
    CompletionRequest, CompletionResponse, LlmBackend, ProviderKind, StreamingToken, TokenStream,
};
use crate::error::UpstreamError;
use crate::quality::{Enhancement, QualityScore, ScoreOutcome};

/// Which capability was invoked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockCallKind {
    /// `complete`
    Complete,
    /// `stream`
    Stream,
    /// `score_prompt_quality`
    Score,
    /// `enhance_prompt`
    Enhance,
}

/// One recorded call
#[derive(Clone, Debug)]
pub struct MockCall {
    /// Capability
    pub kind: MockCallKind,
    /// Prompt text passed in
    pub prompt: String,
}

/// Backend answering from canned values
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    kind: ProviderKind,
    reply: String,
    enhancement: Option<String>,
    score: Option<QualityScore>,
    defaulted_score: bool,
    stream_tokens: Vec<String>,
    latency: Option<Duration>,
    failing: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockBackend {
    /// Create a healthy backend named `name`
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            reply: format!("reply from {name}"),
            name,
            kind: ProviderKind::OpenAi,
            enhancement: None,
            score: None,
            defaulted_score: false,
            stream_tokens: vec!["Hello".into(), ", ".into(), "world".into()],
            latency: None,
            failing: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Report as `kind`
    #[must_use]
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Completion text
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    /// Text returned by `enhance_prompt`
    #[must_use]
    pub fn with_enhancement(mut self, text: impl Into<String>) -> Self {
        self.enhancement = Some(text.into());
        self
    }

    /// Uniform score with one feedback line
    #[must_use]
    pub fn with_score(self, overall: f64) -> Self {
        let feedback = vec![format!("{} feedback", self.name)];
        self.with_quality(QualityScore::uniform(overall, feedback))
    }

    /// Exact score
    #[must_use]
    pub fn with_quality(mut self, score: QualityScore) -> Self {
        self.score = Some(score);
        self
    }

    /// Report scores as defaulted rather than parsed
    #[must_use]
    pub fn with_defaulted_score(mut self) -> Self {
        self.defaulted_score = true;
        self
    }

    /// Fragments emitted by `stream`
    #[must_use]
    pub fn with_stream_tokens(mut self, tokens: &[&str]) -> Self {
        self.stream_tokens = tokens.iter().map(|t| (*t).to_string()).collect();
        self
    }

    /// Delay every call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every call
    #[must_use]
    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    /// Toggle failure at runtime
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Share as a trait object (call history stays shared with `self`)
    #[must_use]
    pub fn shared(&self) -> Arc<dyn LlmBackend> {
        Arc::new(self.clone())
    }

    /// Every recorded call
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Number of calls of one kind
    #[must_use]
    pub fn call_count(&self, kind: MockCallKind) -> usize {
        self.calls.lock().iter().filter(|c| c.kind == kind).count()
    }

    /// Number of calls of any kind
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    async fn enter(&self, kind: MockCallKind, prompt: &str) -> Result<(), UpstreamError> {
        self.calls.lock().push(MockCall {
            kind,
            prompt: prompt.to_string(),
        });
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::ConnectionFailed(format!("{} is down", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError> {
        self.enter(MockCallKind::Complete, &request.prompt).await?;
        Ok(CompletionResponse {
            content: self.reply.clone(),
            token_usage: None,
            model_id: self.model_id().to_string(),
            provider: self.name.clone(),
        })
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<TokenStream, UpstreamError> {
        self.enter(MockCallKind::Stream, &request.prompt).await?;
        let (tx, rx) = mpsc::channel(self.stream_tokens.len() + 1);
        for token in &self.stream_tokens {
            let _ = tx.send(StreamingToken::Token(token.clone())).await;
        }
        let _ = tx
            .send(StreamingToken::Complete {
                message: self.stream_tokens.concat(),
            })
            .await;
        Ok(TokenStream::new(self.name.clone(), rx, cancel))
    }

    async fn score_prompt_quality(
        &self,
        prompt: &str,
        _context: Option<&Value>,
    ) -> Result<ScoreOutcome, UpstreamError> {
        self.enter(MockCallKind::Score, prompt).await?;
        let score = self
            .score
            .clone()
            .unwrap_or_else(|| QualityScore::uniform(80.0, vec![]));
        Ok(if self.defaulted_score {
            ScoreOutcome::Defaulted(score)
        } else {
            ScoreOutcome::Scored(score)
        })
    }

    async fn enhance_prompt(&self, base_prompt: &str, _context: Option<&Value>) -> Enhancement {
        if let Err(error) = self.enter(MockCallKind::Enhance, base_prompt).await {
            return Enhancement::Unchanged {
                text: base_prompt.to_string(),
                error,
            };
        }
        Enhancement::Enhanced(
            self.enhancement
                .clone()
                .unwrap_or_else(|| format!("{base_prompt}\n\nRefined by {}", self.name)),
        )
    }
}

// =============================================================================
// Local SSE server
// =============================================================================

/// Handle to a server started by [`serve_sse`]
pub struct SseServer {
    /// Root URL of the server
    pub url: String,
    closed: oneshot::Receiver<()>,
}

impl SseServer {
    /// Resolve once the client has closed the connection
    pub async fn closed(&mut self) {
        let _ = (&mut self.closed).await;
    }
}

/// Serve one connection: answer any request with `chunks` as an SSE body
///
/// Each chunk is written separately, `gap` apart. With `hold_open` the
/// connection stays open after the last chunk until the client hangs up;
/// otherwise the server closes it, ending the body.
pub async fn serve_sse(chunks: Vec<Vec<u8>>, gap: Duration, hold_open: bool) -> SseServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (closed_tx, closed) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for chunk in chunks {
            if !gap.is_zero() {
                tokio::time::sleep(gap).await;
            }
            if socket.write_all(&chunk).await.is_err() {
                break;
            }
            let _ = socket.flush().await;
        }
        if hold_open {
            let mut scratch = [0u8; 256];
            while matches!(socket.read(&mut scratch).await, Ok(n) if n > 0) {}
        } else {
            let _ = socket.shutdown().await;
        }
        let _ = closed_tx.send(());
    });

    SseServer { url, closed }
}

/// Consume request headers and any `content-length` body
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 1024];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let body_len = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + body_len {
        match socket.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
        }
    }
}
