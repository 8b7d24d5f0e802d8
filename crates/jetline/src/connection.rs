//! Connection state machine
//!
//! One task per connection drives everything: transport notifications, the
//! connection timeout and caller-initiated teardown are arbitrated by a
//! single `select!` loop, so state checks are atomic with respect to each
//! other and every terminal outcome (handshake resolution, disconnect)
//! fires exactly once. The poll order is fixed: cancellation beats the
//! timer, the timer beats transport traffic, so a late notification can
//! never re-enter dead state.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ModuleConfig, RequestConfig};
use crate::cursor::StreamCursor;
use crate::error::{ConnectError, StreamError};
use crate::gate::{AckGate, FrameClass, GateVerdict};
use crate::session::{Session, SessionEvent, StreamProgress};
use crate::transport::{PreparedRequest, Transport, TransportEvent, SUCCESS_STATUS};

/// Validate the configuration, open the transport and await the handshake
pub(crate) async fn establish(
    request: RequestConfig,
    module: ModuleConfig,
    mut transport: Box<dyn Transport>,
) -> Result<Session, ConnectError> {
    // Configuration errors surface before any request is opened.
    let url = request.build_url()?;
    let prepared = PreparedRequest {
        url,
        headers: request.headers,
        body: request.body,
    };

    let abort = CancellationToken::new();
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (ready_tx, ready_rx) = oneshot::channel();
    let progress = Arc::new(StreamProgress::default());

    info!("opening streaming request to {}", prepared.url);

    {
        let abort = abort.clone();
        tokio::spawn(async move {
            transport.run(prepared, transport_tx, abort).await;
        });
    }

    let driver = Driver {
        events: event_tx,
        gate: AckGate::new(module.is_acknowledge_filter, module.filter_acknowledge),
        cursor: StreamCursor::new(),
        progress: Arc::clone(&progress),
        abort: abort.clone(),
        buffer: String::new(),
        headers_seen: false,
        ready: Some(ready_tx),
    };
    tokio::spawn(driver.run(transport_rx, module.connection_timeout));

    match ready_rx.await {
        Ok(Ok(())) => Ok(Session::new(event_rx, progress, abort)),
        Ok(Err(err)) => Err(err),
        // The driver resolves the handshake on every exit path while it is
        // still pending; losing the sender means the connection was torn
        // down externally before the handshake settled.
        Err(_) => Err(ConnectError::RequestRejected),
    }
}

struct Driver {
    events: UnboundedSender<SessionEvent>,
    gate: AckGate,
    cursor: StreamCursor,
    progress: Arc<StreamProgress>,
    abort: CancellationToken,
    buffer: String,
    headers_seen: bool,
    /// `Some` while the handshake is unresolved; taken exactly once
    ready: Option<oneshot::Sender<Result<(), ConnectError>>>,
}

impl Driver {
    async fn run(mut self, mut transport_rx: UnboundedReceiver<TransportEvent>, timeout: Duration) {
        let abort = self.abort.clone();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut deadline_armed = true;
        let mut transport_open = true;

        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    debug!("connection torn down by caller");
                    return;
                }
                _ = &mut deadline, if deadline_armed => {
                    deadline_armed = false;
                    // Guarded at fire time: the handshake may have settled
                    // while this branch was already scheduled.
                    if !self.headers_seen || self.ready.is_some() {
                        info!("connection timeout elapsed before handshake");
                        self.reject(ConnectError::RequestTimeout);
                        self.abort.cancel();
                        return;
                    }
                }
                event = transport_rx.recv(), if transport_open => {
                    match event {
                        Some(TransportEvent::Headers { status }) => {
                            self.headers_seen = true;
                            if status != SUCCESS_STATUS {
                                warn!("handshake refused: status {status}");
                                self.reject(ConnectError::HttpError { status });
                                self.abort.cancel();
                                return;
                            }
                            debug!("headers received, status {status}");
                        }
                        Some(TransportEvent::Progress { status, text }) => {
                            if self.handle_progress(status, text) {
                                deadline_armed = false;
                            }
                        }
                        Some(TransportEvent::Done { status }) => {
                            if self.handle_done(status) {
                                self.abort.cancel();
                                return;
                            }
                            // A failed completion before the handshake
                            // settled; the connection timeout decides.
                            transport_open = false;
                        }
                        None => {
                            if self.ready.is_none() {
                                return;
                            }
                            transport_open = false;
                        }
                    }
                }
            }
        }
    }

    /// Drain newly completed frames and route them; returns true when this
    /// batch resolved the handshake
    fn handle_progress(&mut self, status: u16, text: String) -> bool {
        if status != SUCCESS_STATUS {
            return false;
        }
        self.buffer = text;
        self.progress
            .received
            .store(self.buffer.len(), Ordering::Release);
        if self.cursor.pointer() >= self.buffer.len() {
            return false;
        }

        let mut connected_now = false;
        for frame in self.cursor.drain(&self.buffer) {
            // Only JSON objects are classified; anything else was consumed
            // by the cursor and goes no further.
            if !frame.is_object() {
                debug!("skipping non-object frame");
                continue;
            }
            match self.gate.classify(&frame) {
                GateVerdict::Ignored => {}
                GateVerdict::Connected { then } => {
                    info!("handshake acknowledged");
                    connected_now = true;
                    if let Some(tx) = self.ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                    if let Some(class) = then {
                        self.emit_frame(class, frame);
                    }
                }
                GateVerdict::Frame(class) => self.emit_frame(class, frame),
            }
        }

        self.progress
            .consumed
            .store(self.cursor.pointer(), Ordering::Release);
        let _ = self.events.send(SessionEvent::ResponseLength {
            length: self.buffer.len(),
        });
        connected_now
    }

    /// Handle transport completion; returns false only for the one
    /// non-terminal case (failed completion while still connecting)
    fn handle_done(&mut self, status: u16) -> bool {
        self.cursor.note_stream_end(&self.buffer);

        if status == SUCCESS_STATUS {
            if self.ready.is_some() {
                info!("stream completed before an acknowledgment frame");
                self.reject(ConnectError::RequestRejected);
            } else {
                info!("stream completed cleanly");
                let _ = self.events.send(SessionEvent::Disconnect { error: None });
            }
            return true;
        }

        if self.ready.is_some() {
            // Echo of an abort before the handshake settled; nothing to
            // surface yet.
            debug!("stream ended with status {status} while connecting");
            return false;
        }

        let error = if status == 0 {
            StreamError::HttpAbort
        } else {
            StreamError::Network { status }
        };
        warn!("stream ended abnormally: {error}");
        let _ = self.events.send(SessionEvent::Disconnect {
            error: Some(error),
        });
        true
    }

    fn emit_frame(&self, class: FrameClass, frame: Value) {
        let event = match class {
            FrameClass::Heartbeat => SessionEvent::Heartbeat,
            FrameClass::Data => SessionEvent::Data { frame },
        };
        let _ = self.events.send(event);
    }

    fn reject(&mut self, error: ConnectError) {
        if let Some(tx) = self.ready.take() {
            let _ = tx.send(Err(error));
        }
    }
}
