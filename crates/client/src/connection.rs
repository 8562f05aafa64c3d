//! Public connection handle.
//!
//! [`Connection`] is a cheap clonable front for the driver task. Every call
//! enqueues a command; the driver applies them in order, so a `connect()`
//! followed by `send()` is observed in that order even before the socket is
//! up. Dropping the last handle tears the connection down.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};

use crate::driver::{Cmd, Driver};
use crate::heartbeat::{Heartbeat, HeartbeatOptions};
use crate::plugin::Plugin;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Connector, ws::WsConnector};
use crate::types::{ConnState, EventKind, ListenerEvent, ListenerId, Payload};

/// Construction-time configuration.
pub struct Options {
    /// Retry timing after abnormal closes.
    pub reconnect: ReconnectPolicy,
    /// Retry budget. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    pub heartbeat: HeartbeatOptions,
    /// Plugins active from before the first connect attempt.
    pub plugins: Vec<Box<dyn Plugin>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            max_reconnect_attempts: None,
            heartbeat: HeartbeatOptions::default(),
            plugins: Vec::new(),
        }
    }
}

/// Handle to one resilient connection.
#[derive(Clone)]
pub struct Connection {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    state_rx: watch::Receiver<ConnState>,
    next_listener_id: Arc<AtomicU64>,
}

/// Registration receipt for a listener. Pass it back to
/// [`Connection::remove_listener`] to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    kind: EventKind,
    id: ListenerId,
}

impl Connection {
    /// Creates a connection to `url` over the default WebSocket transport.
    /// No connect attempt is made until [`Connection::connect`].
    pub fn new(url: impl Into<String>, options: Options) -> Self {
        Self::with_connector(url, options, Box::new(WsConnector))
    }

    /// Creates a connection over a caller-supplied transport. Test suites
    /// use this to drive the state machine without a network.
    pub fn with_connector(
        url: impl Into<String>,
        options: Options,
        connector: Box<dyn Connector>,
    ) -> Self {
        let url: Arc<str> = Arc::from(url.into());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnState::Disconnected);

        let driver = Driver::new(
            url,
            connector,
            cmd_tx.clone(),
            cmd_rx,
            state_tx,
            options.reconnect,
            options.max_reconnect_attempts,
            Heartbeat::new(options.heartbeat),
            options.plugins,
        );
        tokio::spawn(driver.run());

        Self {
            cmd_tx,
            state_rx,
            next_listener_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Starts a connect attempt. A no-op while connecting, connected, or
    /// destroyed.
    pub fn connect(&self) {
        let _ = self.cmd_tx.send(Cmd::Connect);
    }

    /// Pushes a payload through the outbound pipeline. While disconnected
    /// the payload still reaches `before_send` hooks (where plugins such as
    /// the offline stash pick it up) but is not written to the wire.
    pub fn send(&self, payload: impl Into<Payload>) {
        let _ = self.cmd_tx.send(Cmd::Send(payload.into()));
    }

    /// Registers an event listener.
    pub fn add_listener(
        &self,
        kind: EventKind,
        callback: impl FnMut(&ListenerEvent) + Send + 'static,
    ) -> Subscription {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let _ = self.cmd_tx.send(Cmd::AddListener {
            kind,
            id,
            callback: Box::new(callback),
        });
        Subscription { kind, id }
    }

    /// Detaches a previously registered listener.
    pub fn remove_listener(&self, sub: Subscription) {
        let _ = self.cmd_tx.send(Cmd::RemoveListener {
            kind: sub.kind,
            id: sub.id,
        });
    }

    /// Adds plugins to the running connection.
    pub fn add_plugins(&self, plugins: Vec<Box<dyn Plugin>>) {
        let _ = self.cmd_tx.send(Cmd::AddPlugins(plugins));
    }

    /// Removes plugins by name.
    pub fn remove_plugins(&self, names: Vec<String>) {
        let _ = self.cmd_tx.send(Cmd::RemovePlugins(names));
    }

    /// Reports a host network transition to `on_network_status` hooks and
    /// listeners. Does not by itself change the connection state.
    pub fn set_network_status(&self, online: bool) {
        let _ = self.cmd_tx.send(Cmd::NetworkStatus(online));
    }

    /// Tears the connection down permanently. Safe to call more than once.
    pub fn destroy(&self) {
        let _ = self.cmd_tx.send(Cmd::Destroy);
    }

    /// Last published connection state.
    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    /// Watch channel of state transitions, for callers that need to await
    /// a particular state.
    pub fn watch_state(&self) -> watch::Receiver<ConnState> {
        self.state_rx.clone()
    }
}
