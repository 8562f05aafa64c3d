//! Heartbeat monitor.
//!
//! Sends an application-level ping token on a fixed cadence while the
//! connection is up. Each tick schedules exactly the next one; the deadline
//! is cleared on close or destroy. The matching pong token is swallowed by
//! the connection before it reaches listeners.

use std::time::Duration;

use tokio::time::Instant;

use crate::types::Payload;

/// Heartbeat configuration.
#[derive(Debug, Clone)]
pub struct HeartbeatOptions {
    pub enable: bool,
    pub interval: Duration,
    /// Token sent on every tick, through the normal send path.
    pub ping: String,
    /// Inbound payloads equal to this token are treated as liveness acks.
    pub pong: String,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self {
            enable: false,
            interval: Duration::from_secs(30),
            ping: "ping".into(),
            pong: "pong".into(),
        }
    }
}

/// Tick scheduling state for one connection.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    opts: HeartbeatOptions,
    next: Option<Instant>,
}

impl Heartbeat {
    pub(crate) fn new(opts: HeartbeatOptions) -> Self {
        Self { opts, next: None }
    }

    /// Schedules the first tick, if heartbeating is enabled.
    pub(crate) fn start(&mut self) {
        if self.opts.enable {
            self.next = Some(Instant::now() + self.opts.interval);
        }
    }

    /// Clears any scheduled tick.
    pub(crate) fn stop(&mut self) {
        self.next = None;
    }

    /// Consumes the due tick and schedules the next one. Returns the ping
    /// payload to send.
    pub(crate) fn tick(&mut self) -> Payload {
        self.next = Some(Instant::now() + self.opts.interval);
        Payload::Text(self.opts.ping.clone())
    }

    /// Deadline of the pending tick, if one is scheduled.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.next
    }

    /// `true` if the inbound payload is the configured liveness ack.
    pub(crate) fn is_pong(&self, payload: &Payload) -> bool {
        payload.as_text() == Some(self.opts.pong.as_str())
    }
}
