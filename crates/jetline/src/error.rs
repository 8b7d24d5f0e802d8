//! Error taxonomy for connect-time and stream-time failures
//!
//! Failures surface on exactly one of two channels: `ConnectError` rejects
//! the handshake returned by `connect`, `StreamError` rides along with the
//! terminal `Disconnect` event on an established session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a connect attempt failed before a session was established
#[derive(Debug, Error)]
pub enum ConnectError {
    /// A required configuration field was absent
    #[error("Missing Parameter: {0} is required")]
    MissingParameter(&'static str),

    /// A configuration field was present but unusable
    #[error("Parameter Error: {0}")]
    ParameterError(String),

    /// The server answered the request with a non-success status
    #[error("http-error: server responded with status {status}")]
    HttpError { status: u16 },

    /// Headers or the acknowledgment frame did not arrive in time
    #[error("request-timeout: handshake did not complete within the connection timeout")]
    RequestTimeout,

    /// The stream completed successfully without ever acknowledging us
    #[error("request-rejected: stream ended before an acknowledgment frame arrived")]
    RequestRejected,
}

/// Why an established stream ended, carried by the `Disconnect` event
///
/// Absent entirely (`Disconnect { error: None }`) when the server closed the
/// stream cleanly with a success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StreamError {
    /// The connection dropped without a final HTTP status
    #[error("http-abort: connection dropped before the stream completed")]
    HttpAbort,

    /// The stream terminated with a non-success HTTP status
    #[error("network-error: stream ended with status {status}")]
    Network { status: u16 },
}
