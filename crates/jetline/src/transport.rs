//! Transport seam: opening the streaming request and observing its progress
//!
//! A transport emits `Headers`, then zero or more `Progress` notifications
//! each carrying the full response text accumulated so far, then exactly
//! one `Done`. The default implementation drives a reqwest streaming POST;
//! tests (or exotic deployments) inject their own implementation through
//! [`crate::connect_with_transport`].

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The one status code treated as success for handshake and disconnect
pub const SUCCESS_STATUS: u16 = 200;

/// Validated request material handed to the transport
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Status transitions reported by a transport, in order:
/// `Headers`, zero or more `Progress`, one `Done`
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Response headers arrived
    Headers { status: u16 },
    /// More body bytes arrived; `text` is the full body received so far
    Progress { status: u16, text: String },
    /// The request finished; a status of 0 means it never completed
    Done { status: u16 },
}

/// A one-shot streaming request
///
/// Implementations stop promptly when `abort` is cancelled; no `Done` event
/// is required on that path, the connection has already torn down.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn run(
        &mut self,
        request: PreparedRequest,
        events: UnboundedSender<TransportEvent>,
        abort: CancellationToken,
    );
}

/// Streaming POST over reqwest
///
/// Mirrors XHR status semantics: a request that fails before or during the
/// body (connection refused, reset mid-stream) completes with status 0.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn run(
        &mut self,
        request: PreparedRequest,
        events: UnboundedSender<TransportEvent>,
        abort: CancellationToken,
    ) {
        let mut builder = self
            .client
            .post(&request.url)
            .header("content-type", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                debug!("request aborted before headers");
                return;
            }
            response = builder.send() => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!("request failed before headers: {err}");
                let _ = events.send(TransportEvent::Done { status: 0 });
                return;
            }
        };

        let status = response.status().as_u16();
        let _ = events.send(TransportEvent::Headers { status });

        // Raw bytes are accumulated and re-decoded as a whole so a UTF-8
        // sequence split across chunks never corrupts the text.
        let mut raw = BytesMut::new();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    debug!("request aborted after {} body bytes", raw.len());
                    return;
                }
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(chunk)) => {
                    raw.extend_from_slice(&chunk);
                    debug!("chunk received: {} bytes (total: {})", chunk.len(), raw.len());
                    let text = String::from_utf8_lossy(&raw).into_owned();
                    if events.send(TransportEvent::Progress { status, text }).is_err() {
                        return;
                    }
                }
                Some(Err(err)) => {
                    warn!("stream failed after {} body bytes: {err}", raw.len());
                    let _ = events.send(TransportEvent::Done { status: 0 });
                    return;
                }
                None => {
                    debug!("stream completed with {} body bytes", raw.len());
                    let _ = events.send(TransportEvent::Done { status });
                    return;
                }
            }
        }
    }
}
