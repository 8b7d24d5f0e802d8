//! jetline - client for long-lived streaming NDJSON responses
//!
//! One POST request is opened and the server answers with a body that grows
//! over time, carrying newline-delimited JSON frames. Frames are decoded
//! incrementally as bytes arrive, tolerating delivery boundaries that land
//! mid-frame. The first frame accepted by the acknowledgment predicate
//! completes the handshake; after that the session emits heartbeat, data,
//! response-length and disconnect events.
//!
//! ```no_run
//! use jetline::{connect, ModuleConfig, RequestConfig, SessionEvent};
//!
//! # async fn demo() -> Result<(), jetline::ConnectError> {
//! let request = RequestConfig::new("https://example.com/stream")
//!     .query("channel", "alerts");
//! let mut session = connect(request, ModuleConfig::default()).await?;
//!
//! while let Some(event) = session.recv().await {
//!     match event {
//!         SessionEvent::Data { frame } => println!("frame: {frame}"),
//!         SessionEvent::Heartbeat => {}
//!         SessionEvent::ResponseLength { length } => println!("{length} bytes so far"),
//!         SessionEvent::Disconnect { error } => {
//!             println!("stream ended: {error:?}");
//!             break;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod connection;
mod cursor;
mod gate;

pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use config::{is_heartbeat, AckFilter, ModuleConfig, RequestConfig};
pub use error::{ConnectError, StreamError};
pub use session::{Session, SessionEvent};
pub use transport::{HttpTransport, Transport, TransportEvent};

/// Open the streaming request and await the handshake
///
/// Resolves to a [`Session`] once a frame satisfies the acknowledgment
/// filter, or rejects with a [`ConnectError`] describing why the handshake
/// failed. Reconnection policy is the caller's business.
pub async fn connect(request: RequestConfig, module: ModuleConfig) -> Result<Session, ConnectError> {
    connect_with_transport(request, module, HttpTransport::new()).await
}

/// Like [`connect`], with a caller-supplied transport
pub async fn connect_with_transport(
    request: RequestConfig,
    module: ModuleConfig,
    transport: impl Transport,
) -> Result<Session, ConnectError> {
    connection::establish(request, module, Box::new(transport)).await
}
