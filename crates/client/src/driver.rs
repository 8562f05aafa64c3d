//! Connection driver: the single event-processing task.
//!
//! All mutable connection state lives here. Commands from the public handle,
//! transport events, heartbeat ticks, and reconnect deadlines are multiplexed
//! through one `select!` and processed strictly one at a time, so hooks,
//! listeners, and plugin state never see concurrent mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::heartbeat::Heartbeat;
use crate::hooks::{HookContext, HookEvent, HookRegistry, NotifyStage, TransformStage};
use crate::plugin::{Plugin, PluginHost};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy, decide};
use crate::transport::{Connector, Transport, TransportEvent};
use crate::types::{
    ABNORMAL_CLOSE, CloseFrame, ConnState, EventKind, ListenerEvent, ListenerFn, ListenerId,
    Payload, ReconnectInfo,
};

/// Commands accepted by the driver task.
pub(crate) enum Cmd {
    Connect,
    Send(Payload),
    AddListener {
        kind: EventKind,
        id: ListenerId,
        callback: ListenerFn,
    },
    RemoveListener {
        kind: EventKind,
        id: ListenerId,
    },
    AddPlugins(Vec<Box<dyn Plugin>>),
    RemovePlugins(Vec<String>),
    NetworkStatus(bool),
    Destroy,
}

enum Wake {
    Cmd(Option<Cmd>),
    Transport(Option<TransportEvent>),
    HeartbeatTick,
    ReconnectDue,
}

pub(crate) struct Driver {
    url: Arc<str>,
    connector: Box<dyn Connector>,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    state_tx: watch::Sender<ConnState>,
    state: ConnState,
    reconnect_enabled: bool,
    attempts: u32,
    max_attempts: Option<u32>,
    policy: ReconnectPolicy,
    heartbeat: Heartbeat,
    transport: Option<Box<dyn Transport>>,
    events_rx: Option<mpsc::Receiver<TransportEvent>>,
    reconnect_at: Option<Instant>,
    hooks: HookRegistry,
    plugins: PluginHost,
    listeners: HashMap<EventKind, Vec<(ListenerId, ListenerFn)>>,
    initial_plugins: Vec<Box<dyn Plugin>>,
    running: bool,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        url: Arc<str>,
        connector: Box<dyn Connector>,
        cmd_tx: mpsc::UnboundedSender<Cmd>,
        cmd_rx: mpsc::UnboundedReceiver<Cmd>,
        state_tx: watch::Sender<ConnState>,
        policy: ReconnectPolicy,
        max_attempts: Option<u32>,
        heartbeat: Heartbeat,
        initial_plugins: Vec<Box<dyn Plugin>>,
    ) -> Self {
        Self {
            url,
            connector,
            cmd_tx,
            cmd_rx,
            state_tx,
            state: ConnState::Disconnected,
            reconnect_enabled: true,
            attempts: 0,
            max_attempts,
            policy,
            heartbeat,
            transport: None,
            events_rx: None,
            reconnect_at: None,
            hooks: HookRegistry::new(),
            plugins: PluginHost::new(),
            listeners: HashMap::new(),
            initial_plugins,
            running: true,
        }
    }

    pub(crate) async fn run(mut self) {
        // Construction-time plugins are initialized before any command.
        let initial = std::mem::take(&mut self.initial_plugins);
        if !initial.is_empty() {
            let ctx = self.hook_ctx();
            self.plugins.add(initial, &ctx, &mut self.hooks);
        }

        while self.running {
            let hb_at = self.heartbeat.deadline();
            let rc_at = self.reconnect_at;

            let wake = {
                let events = &mut self.events_rx;
                tokio::select! {
                    cmd = self.cmd_rx.recv() => Wake::Cmd(cmd),
                    ev = next_event(events), if events.is_some() => Wake::Transport(ev),
                    _ = sleep_until_or_idle(hb_at), if hb_at.is_some() => Wake::HeartbeatTick,
                    _ = sleep_until_or_idle(rc_at), if rc_at.is_some() => Wake::ReconnectDue,
                }
            };

            match wake {
                Wake::Cmd(Some(cmd)) => self.handle_cmd(cmd).await,
                // Every handle dropped: tear down like an explicit destroy.
                Wake::Cmd(None) => self.do_destroy().await,
                Wake::Transport(Some(ev)) => self.handle_transport_event(ev).await,
                Wake::Transport(None) => self.on_event_channel_gone().await,
                Wake::HeartbeatTick => self.on_heartbeat_tick().await,
                Wake::ReconnectDue => self.on_reconnect_due().await,
            }
        }
    }

    async fn handle_cmd(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::Connect => self.do_connect().await,
            Cmd::Send(payload) => self.do_send(payload).await,
            Cmd::AddListener { kind, id, callback } => {
                let ctx = self.hook_ctx();
                let callback = self.hooks.rewrite_listener(&ctx, callback);
                self.listeners.entry(kind).or_default().push((id, callback));
            }
            Cmd::RemoveListener { kind, id } => {
                if let Some(list) = self.listeners.get_mut(&kind) {
                    list.retain(|(lid, _)| *lid != id);
                }
            }
            Cmd::AddPlugins(plugins) => {
                let ctx = self.hook_ctx();
                self.plugins.add(plugins, &ctx, &mut self.hooks);
            }
            Cmd::RemovePlugins(names) => self.plugins.remove(&names),
            Cmd::NetworkStatus(online) => {
                let ctx = self.hook_ctx();
                self.hooks
                    .trigger(&ctx, NotifyStage::OnNetworkStatus, &HookEvent::NetworkStatus(online));
                self.notify_listeners(&ListenerEvent::NetworkStatus(online));
            }
            Cmd::Destroy => self.do_destroy().await,
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(payload) => self.handle_message(payload),
            TransportEvent::Error(message) => self.handle_transport_error(message).await,
            TransportEvent::Closed { code, reason } => {
                self.handle_close(CloseFrame { code, reason }).await;
            }
        }
    }

    /// The event channel ended without a close frame. Treat as abnormal.
    async fn on_event_channel_gone(&mut self) {
        self.events_rx = None;
        if matches!(self.state, ConnState::Connected | ConnState::Connecting) {
            self.handle_close(CloseFrame {
                code: ABNORMAL_CLOSE,
                reason: "transport event channel closed".into(),
            })
            .await;
        }
    }

    async fn do_connect(&mut self) {
        if matches!(
            self.state,
            ConnState::Connected | ConnState::Connecting | ConnState::Destroyed
        ) {
            return;
        }

        let ctx = self.hook_ctx();
        self.hooks.trigger(&ctx, NotifyStage::BeforeConnect, &HookEvent::None);
        self.set_state(ConnState::Connecting);
        debug!(url = %self.url, "opening transport");

        match self.connector.connect(&self.url).await {
            Ok((transport, events_rx)) => {
                self.transport = Some(transport);
                self.events_rx = Some(events_rx);
                self.on_open();
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "connect failed");
                // Error first, then a synthesized abnormal close, so the
                // reconnection policy sees the same sequence a dropped live
                // transport produces.
                self.handle_transport_error(e.to_string()).await;
                self.handle_close(CloseFrame {
                    code: ABNORMAL_CLOSE,
                    reason: "connect failed".into(),
                })
                .await;
            }
        }
    }

    fn on_open(&mut self) {
        self.set_state(ConnState::Connected);
        self.attempts = 0;
        self.reconnect_enabled = true;
        info!(url = %self.url, "connected");

        let ctx = self.hook_ctx();
        self.hooks.trigger(&ctx, NotifyStage::AfterConnect, &HookEvent::None);
        self.notify_listeners(&ListenerEvent::Open);
        self.heartbeat.start();
    }

    fn handle_message(&mut self, payload: Payload) {
        if self.heartbeat.is_pong(&payload) {
            trace!(url = %self.url, "heartbeat ack");
            return;
        }

        let ctx = self.hook_ctx();
        self.hooks
            .trigger(&ctx, NotifyStage::AfterReceive, &HookEvent::Payload(payload.clone()));
        let payload = self.hooks.run_transform(&ctx, TransformStage::Receive, payload);
        self.notify_listeners(&ListenerEvent::Message(payload));
    }

    async fn handle_transport_error(&mut self, message: String) {
        error!(url = %self.url, error = %message, "transport error");

        let ctx = self.hook_ctx();
        self.hooks
            .trigger(&ctx, NotifyStage::OnError, &HookEvent::Error(message.clone()));
        self.notify_listeners(&ListenerEvent::Error(message));

        // Force the transport into a torn-down local state. Retry is driven
        // only by the close event that follows.
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.heartbeat.stop();
        if matches!(self.state, ConnState::Connected | ConnState::Connecting) {
            self.set_state(ConnState::Disconnected);
        }
    }

    async fn handle_close(&mut self, frame: CloseFrame) {
        if self.state.is_destroyed() {
            return;
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.events_rx = None;
        self.set_state(ConnState::Disconnected);

        let ctx = self.hook_ctx();
        self.hooks
            .trigger(&ctx, NotifyStage::OnClose, &HookEvent::Close(frame.clone()));
        self.notify_listeners(&ListenerEvent::Close(frame.clone()));
        self.heartbeat.stop();

        if frame.is_abnormal() {
            self.schedule_reconnect();
        } else {
            info!(url = %self.url, code = frame.code, "connection closed");
        }
    }

    async fn do_send(&mut self, payload: Payload) {
        let ctx = self.hook_ctx();
        self.hooks
            .trigger(&ctx, NotifyStage::BeforeSend, &HookEvent::Payload(payload.clone()));

        // Disconnected sends are a pure pipeline trigger — the extension
        // point the offline stash relies on.
        if !self.state.is_connected() {
            return;
        }

        let payload = self.hooks.run_transform(&ctx, TransformStage::Send, payload);
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.send(payload.into()).await {
                warn!(url = %self.url, error = %e, "transport write failed");
                self.handle_transport_error(e.to_string()).await;
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        match decide(self.reconnect_enabled, self.attempts, self.max_attempts, &self.policy) {
            ReconnectDecision::Disabled => {}
            ReconnectDecision::Exhausted => {
                // Terminal until a successful open resets the budget.
                self.reconnect_enabled = false;
                error!(
                    url = %self.url,
                    attempts = self.attempts,
                    "max reconnect attempts reached, giving up"
                );
            }
            ReconnectDecision::Retry { delay } => {
                let info = ReconnectInfo {
                    attempts: self.attempts,
                    max_attempts: self.max_attempts,
                    interval: delay,
                    url: self.url.to_string(),
                };
                let ctx = self.hook_ctx();
                self.hooks
                    .trigger(&ctx, NotifyStage::BeforeReconnect, &HookEvent::Reconnect(info));
                self.attempts += 1;
                warn!(
                    url = %self.url,
                    attempt = self.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "connection dropped, scheduling reconnect"
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
        }
    }

    async fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        info!(url = %self.url, attempt = self.attempts, "reconnecting");
        self.do_connect().await;
    }

    async fn on_heartbeat_tick(&mut self) {
        if !self.state.is_connected() {
            // A tick raced a disconnect: self-cancel.
            self.heartbeat.stop();
            return;
        }
        let ping = self.heartbeat.tick();
        trace!(url = %self.url, "heartbeat ping");
        self.do_send(ping).await;
    }

    async fn do_destroy(&mut self) {
        if self.state.is_destroyed() {
            self.running = false;
            return;
        }

        self.reconnect_enabled = false;
        self.reconnect_at = None;
        self.heartbeat.stop();
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.events_rx = None;
        self.plugins.teardown();
        self.set_state(ConnState::Destroyed);
        self.running = false;
        info!(url = %self.url, "connection destroyed");
    }

    fn notify_listeners(&mut self, event: &ListenerEvent) {
        if let Some(list) = self.listeners.get_mut(&event.kind()) {
            for (_, callback) in list.iter_mut() {
                callback(event);
            }
        }
    }

    fn set_state(&mut self, state: ConnState) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    fn hook_ctx(&self) -> HookContext {
        HookContext::new(self.url.clone(), self.state, self.attempts, self.cmd_tx.clone())
    }
}

async fn next_event(rx: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_or_idle(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        // Disabled by the select guard; never polled to completion.
        None => tokio::time::sleep(Duration::from_secs(86_400)).await,
    }
}
