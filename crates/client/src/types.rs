//! Public types for the resilient connection client.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Close code the transport reports for an abnormal drop (no close frame).
/// This is the only code that makes a disconnect reconnection-worthy.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No live transport. Initial state.
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Transport open and handshake complete.
    Connected,
    /// Torn down. Terminal — no further transitions.
    Destroyed,
}

impl ConnState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnState::Connected)
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, ConnState::Destroyed)
    }
}

/// An outbound or inbound message payload.
///
/// Binary payloads map to binary frames, structured payloads are serialized
/// to JSON text, plain text is written literally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl Payload {
    /// Returns the text content, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(t) => Some(t),
            _ => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Binary(b)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Json(v)
    }
}

/// Close notification from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    /// `true` if this close should be treated as an unexpected drop.
    pub fn is_abnormal(&self) -> bool {
        self.code == ABNORMAL_CLOSE
    }
}

/// Context handed to `before_reconnect` hooks for each scheduled retry.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectInfo {
    /// Retries already consumed before this one.
    pub attempts: u32,
    /// Configured cap; `None` means unlimited.
    pub max_attempts: Option<u32>,
    /// Delay until the scheduled retry fires.
    pub interval: Duration,
    pub url: String,
}

/// The event categories a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Message,
    Close,
    Error,
    NetworkStatus,
}

/// Event delivered to registered listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    Open,
    Message(Payload),
    Close(CloseFrame),
    Error(String),
    NetworkStatus(bool),
}

impl ListenerEvent {
    pub(crate) fn kind(&self) -> EventKind {
        match self {
            ListenerEvent::Open => EventKind::Open,
            ListenerEvent::Message(_) => EventKind::Message,
            ListenerEvent::Close(_) => EventKind::Close,
            ListenerEvent::Error(_) => EventKind::Error,
            ListenerEvent::NetworkStatus(_) => EventKind::NetworkStatus,
        }
    }
}

/// A registered listener callback.
pub type ListenerFn = Box<dyn FnMut(&ListenerEvent) + Send>;

/// Identifies a registered listener for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(pub(crate) u64);

/// Read-only, connection-scoped logging handle.
///
/// Exposed to hooks and plugins so their output carries the connection URL.
/// The handle is a value type with no mutators.
#[derive(Debug, Clone)]
pub struct ConnLog {
    url: Arc<str>,
}

impl ConnLog {
    pub(crate) fn new(url: Arc<str>) -> Self {
        Self { url }
    }

    pub fn info(&self, msg: &str) {
        tracing::info!(url = %self.url, "{msg}");
    }

    pub fn warn(&self, msg: &str) {
        tracing::warn!(url = %self.url, "{msg}");
    }

    pub fn error(&self, msg: &str) {
        tracing::error!(url = %self.url, "{msg}");
    }
}
