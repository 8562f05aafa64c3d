//! Transport boundary.
//!
//! The engine consumes an abstract bidirectional stream: a [`Connector`]
//! opens it, a [`Transport`] writes to it, and inbound traffic arrives as
//! [`TransportEvent`]s on a channel. The shipped WebSocket binding lives in
//! [`ws`]; tests substitute scripted fakes through the same traits.

pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crate::types::Payload;

/// Errors from the transport layer.
///
/// These are never returned to callers of `connect`/`send`; they surface
/// through the `on_error` hook and `error` listeners.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport closed")]
    Closed,
}

/// An outbound wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl From<Payload> for Frame {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Binary(b) => Frame::Binary(b),
            Payload::Json(v) => Frame::Text(v.to_string()),
            Payload::Text(t) => Frame::Text(t),
        }
    }
}

/// Inbound notification from a live transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A data frame arrived.
    Message(Payload),
    /// The transport closed. Code 1006 marks an abnormal drop.
    Closed { code: u16, reason: String },
    /// A transport-level fault. A `Closed` event follows.
    Error(String),
}

/// Write half of an open transport.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Initiates a graceful local close. Best-effort.
    async fn close(&mut self);
}

/// Opens transports. One successful call yields one live transport and the
/// event stream for its whole lifetime.
#[async_trait]
pub trait Connector: Send {
    async fn connect(
        &mut self,
        url: &str,
    ) -> Result<(Box<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError>;
}
