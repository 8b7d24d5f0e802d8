//! Request and module configuration
//!
//! `RequestConfig` describes the streaming POST to open; it is validated
//! once at connect time and not consulted again. `ModuleConfig` carries the
//! handshake policy: the connection timeout, the acknowledgment predicate,
//! and whether the acknowledging frame is forwarded to the application.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::error::ConnectError;

/// Default time allowed for headers plus the acknowledgment frame to arrive
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(3000);

/// Predicate deciding which frame completes the handshake
pub type AckFilter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Default acknowledgment predicate: the frame is a heartbeat
///
/// Also used after the handshake to separate heartbeat frames from
/// application data.
pub fn is_heartbeat(frame: &Value) -> bool {
    frame.get("name").and_then(Value::as_str) == Some("heartbeat")
}

/// Description of the streaming request to open
///
/// `path` may be a full URL on its own. When `ssl`, `host` and `port` are
/// all present, `{scheme}://{host}:{port}` is prepended to it instead.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub path: String,
    pub ssl: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Query pairs appended to the path in insertion order
    pub query: Vec<(String, String)>,
    /// Extra request headers; `content-type: application/json` is implicit
    pub headers: Vec<(String, String)>,
    /// Optional JSON request body
    pub body: Option<Value>,
}

impl RequestConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn endpoint(mut self, ssl: bool, host: impl Into<String>, port: u16) -> Self {
        self.ssl = Some(ssl);
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Assemble and validate the request URL
    pub(crate) fn build_url(&self) -> Result<String, ConnectError> {
        if self.path.is_empty() {
            return Err(ConnectError::ParameterError(
                "request path is required".to_string(),
            ));
        }

        let mut url = self.path.clone();

        if !self.query.is_empty() {
            let pairs: Vec<String> = self
                .query
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            url = format!("{}?{}", url, pairs.join("&"));
        }

        if let (Some(ssl), Some(host), Some(port)) = (self.ssl, self.host.as_deref(), self.port) {
            let scheme = if ssl { "https" } else { "http" };
            url = format!("{scheme}://{host}:{port}{url}");
        }

        Url::parse(&url)
            .map_err(|err| ConnectError::ParameterError(format!("request url {url:?}: {err}")))?;

        Ok(url)
    }
}

/// Handshake policy for a connection
#[derive(Clone)]
pub struct ModuleConfig {
    /// Time allowed before headers are received and the handshake completes
    pub connection_timeout: Duration,
    /// Predicate over decoded frames that completes the handshake
    pub is_acknowledge_filter: AckFilter,
    /// Suppress the handshake-triggering frame from application delivery
    pub filter_acknowledge: bool,
}

impl ModuleConfig {
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn acknowledge_filter(
        mut self,
        filter: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_acknowledge_filter = Arc::new(filter);
        self
    }

    pub fn filter_acknowledge(mut self, filter: bool) -> Self {
        self.filter_acknowledge = filter;
        self
    }
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            is_acknowledge_filter: Arc::new(is_heartbeat),
            filter_acknowledge: true,
        }
    }
}

impl fmt::Debug for ModuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleConfig")
            .field("connection_timeout", &self.connection_timeout)
            .field("filter_acknowledge", &self.filter_acknowledge)
            .finish_non_exhaustive()
    }
}
