//! The session handed to the application once the handshake completes
//!
//! Events arrive on a typed channel fixed at construction; there is no
//! post-hoc listener registration. `Disconnect` is terminal: it is the last
//! event, delivered at most once, and `recv` returns `None` afterwards.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;

/// Notifications emitted on an established session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A liveness frame arrived; carries no payload
    Heartbeat,
    /// An application data frame arrived
    Data { frame: Value },
    /// The response body grew; `length` is total bytes received so far.
    /// Fires once per inspected progress notification, including batches
    /// that yielded no new frame.
    ResponseLength { length: usize },
    /// The stream ended; `None` means a clean end-of-stream
    Disconnect { error: Option<StreamError> },
}

/// Shared read-side view of stream consumption, for the idle check
#[derive(Debug, Default)]
pub(crate) struct StreamProgress {
    /// Bytes consumed into frames by the cursor
    pub consumed: AtomicUsize,
    /// Bytes of response text received so far
    pub received: AtomicUsize,
}

/// An established streaming connection
pub struct Session {
    events: UnboundedReceiver<SessionEvent>,
    progress: Arc<StreamProgress>,
    abort: CancellationToken,
}

impl Session {
    pub(crate) fn new(
        events: UnboundedReceiver<SessionEvent>,
        progress: Arc<StreamProgress>,
        abort: CancellationToken,
    ) -> Self {
        Self {
            events,
            progress,
            abort,
        }
    }

    /// Receive the next session event
    ///
    /// Returns `None` once the connection has fully torn down and every
    /// buffered event has been delivered.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// True when every byte received so far has been consumed into frames
    ///
    /// False whenever a partial trailing frame is still waiting for more of
    /// the stream.
    pub fn is_idle(&self) -> bool {
        self.progress.consumed.load(Ordering::Acquire)
            == self.progress.received.load(Ordering::Acquire)
    }

    /// Tear the connection down
    ///
    /// Idempotent. No further events are emitted, regardless of what the
    /// transport delivers afterwards.
    pub fn disconnect(&self) {
        self.abort.cancel();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("idle", &self.is_idle())
            .field("disconnected", &self.abort.is_cancelled())
            .finish_non_exhaustive()
    }
}
