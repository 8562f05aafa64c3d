//! Hook registry: the extension pipeline for lifecycle and data-path events.
//!
//! Stages are a closed enumeration — notification stages fan out to every
//! callback, transform stages thread a single value through the chain.
//! Registration returns a [`HookGuard`]; unregistration is a tombstone flip,
//! so a callback may unregister itself (or any other hook) mid-trigger.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::driver::Cmd;
use crate::types::{CloseFrame, ConnLog, ConnState, ListenerFn, Payload, ReconnectInfo};

/// Notification stages. Every registered callback runs, in registration
/// order; return values are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyStage {
    BeforeConnect,
    AfterConnect,
    BeforeSend,
    AfterReceive,
    BeforeReconnect,
    OnClose,
    OnError,
    OnNetworkStatus,
}

impl fmt::Display for NotifyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotifyStage::BeforeConnect => "before_connect",
            NotifyStage::AfterConnect => "after_connect",
            NotifyStage::BeforeSend => "before_send",
            NotifyStage::AfterReceive => "after_receive",
            NotifyStage::BeforeReconnect => "before_reconnect",
            NotifyStage::OnClose => "on_close",
            NotifyStage::OnError => "on_error",
            NotifyStage::OnNetworkStatus => "on_network_status",
        };
        f.write_str(name)
    }
}

/// Transform stages for payloads. Each callback receives the previous
/// callback's output; zero callbacks is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformStage {
    Send,
    Receive,
}

impl fmt::Display for TransformStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformStage::Send => f.write_str("transform_send"),
            TransformStage::Receive => f.write_str("transform_receive"),
        }
    }
}

/// Stage argument for notification hooks.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    None,
    Payload(Payload),
    Reconnect(ReconnectInfo),
    Close(CloseFrame),
    Error(String),
    NetworkStatus(bool),
}

pub type NotifyHook = Box<dyn FnMut(&HookContext, &HookEvent) + Send>;
pub type TransformHook = Box<dyn FnMut(&HookContext, Payload) -> Payload + Send>;
pub type ListenerHook = Box<dyn FnMut(&HookContext, ListenerFn) -> ListenerFn + Send>;

/// Unregister capability for a registered hook. Dropping the guard does
/// nothing; unregistration is explicit and idempotent.
#[derive(Clone)]
pub struct HookGuard {
    active: Arc<AtomicBool>,
}

impl HookGuard {
    pub fn unregister(&self) {
        self.active.store(false, Ordering::Relaxed);
    }
}

struct Entry<F> {
    callback: F,
    active: Arc<AtomicBool>,
}

impl<F> Entry<F> {
    fn new(callback: F) -> (Self, HookGuard) {
        let active = Arc::new(AtomicBool::new(true));
        let guard = HookGuard {
            active: active.clone(),
        };
        (Self { callback, active }, guard)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Connection view handed to every hook callback.
///
/// Carries a snapshot of the connection taken when the stage fired, plus the
/// live command path so callbacks (the stash flush, for one) can enqueue
/// sends that traverse the full pipeline.
pub struct HookContext {
    url: Arc<str>,
    state: ConnState,
    attempts: u32,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
}

impl HookContext {
    pub(crate) fn new(
        url: Arc<str>,
        state: ConnState,
        attempts: u32,
        cmd_tx: mpsc::UnboundedSender<Cmd>,
    ) -> Self {
        Self {
            url,
            state,
            attempts,
            cmd_tx,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Reconnect attempts consumed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn log(&self) -> ConnLog {
        ConnLog::new(self.url.clone())
    }

    /// Enqueues a payload onto the connection's own send path. The payload
    /// passes through the full hook pipeline when the command is processed.
    pub fn send(&self, payload: impl Into<Payload>) {
        let _ = self.cmd_tx.send(Cmd::Send(payload.into()));
    }
}

/// Ordered, per-stage callback lists.
#[derive(Default)]
pub struct HookRegistry {
    notify: HashMap<NotifyStage, Vec<Entry<NotifyHook>>>,
    transform_send: Vec<Entry<TransformHook>>,
    transform_receive: Vec<Entry<TransformHook>>,
    modify_listeners: Vec<Entry<ListenerHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a callback to a notification stage.
    pub fn register_notify(&mut self, stage: NotifyStage, callback: NotifyHook) -> HookGuard {
        let (entry, guard) = Entry::new(callback);
        self.notify.entry(stage).or_default().push(entry);
        guard
    }

    /// Appends a callback to a transform stage.
    pub fn register_transform(
        &mut self,
        stage: TransformStage,
        callback: TransformHook,
    ) -> HookGuard {
        let (entry, guard) = Entry::new(callback);
        self.slot(stage).push(entry);
        guard
    }

    /// Appends a callback to the `modify_listeners` stage.
    pub fn register_listener_hook(&mut self, callback: ListenerHook) -> HookGuard {
        let (entry, guard) = Entry::new(callback);
        self.modify_listeners.push(entry);
        guard
    }

    /// Invokes every active callback of a notification stage in order.
    pub fn trigger(&mut self, ctx: &HookContext, stage: NotifyStage, event: &HookEvent) {
        let Some(entries) = self.notify.get_mut(&stage) else {
            return;
        };
        for entry in entries.iter_mut() {
            if entry.is_active() {
                (entry.callback)(ctx, event);
            }
        }
        entries.retain(Entry::is_active);
    }

    /// Threads a payload through a transform stage. With zero callbacks the
    /// input is returned unchanged.
    pub fn run_transform(
        &mut self,
        ctx: &HookContext,
        stage: TransformStage,
        mut payload: Payload,
    ) -> Payload {
        let entries = self.slot(stage);
        for entry in entries.iter_mut() {
            if entry.is_active() {
                payload = (entry.callback)(ctx, payload);
            }
        }
        entries.retain(Entry::is_active);
        payload
    }

    /// Threads a freshly registered listener through `modify_listeners`.
    pub fn rewrite_listener(&mut self, ctx: &HookContext, mut listener: ListenerFn) -> ListenerFn {
        for entry in self.modify_listeners.iter_mut() {
            if entry.is_active() {
                listener = (entry.callback)(ctx, listener);
            }
        }
        self.modify_listeners.retain(Entry::is_active);
        listener
    }

    fn slot(&mut self, stage: TransformStage) -> &mut Vec<Entry<TransformHook>> {
        match stage {
            TransformStage::Send => &mut self.transform_send,
            TransformStage::Receive => &mut self.transform_receive,
        }
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let notify: usize = self.notify.values().map(Vec::len).sum();
        f.debug_struct("HookRegistry")
            .field("notify", &notify)
            .field("transform_send", &self.transform_send.len())
            .field("transform_receive", &self.transform_receive.len())
            .field("modify_listeners", &self.modify_listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use crate::types::ListenerEvent;

    fn test_ctx(state: ConnState) -> HookContext {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        HookContext::new(Arc::from("ws://test"), state, 0, cmd_tx)
    }

    #[test]
    fn notify_runs_in_registration_order() {
        let mut registry = HookRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["a", "b", "c"] {
            let seen = seen.clone();
            registry.register_notify(
                NotifyStage::BeforeSend,
                Box::new(move |_, _| seen.lock().unwrap().push(label)),
            );
        }

        let ctx = test_ctx(ConnState::Disconnected);
        registry.trigger(&ctx, NotifyStage::BeforeSend, &HookEvent::None);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn transform_with_zero_callbacks_is_identity() {
        let mut registry = HookRegistry::new();
        let ctx = test_ctx(ConnState::Connected);

        for payload in [
            Payload::Text(String::new()),
            Payload::Text("x".into()),
            Payload::Binary(Vec::new()),
            Payload::Json(serde_json::Value::Null),
        ] {
            let out = registry.run_transform(&ctx, TransformStage::Send, payload.clone());
            assert_eq!(out, payload);
            let out = registry.run_transform(&ctx, TransformStage::Receive, payload.clone());
            assert_eq!(out, payload);
        }
    }

    #[test]
    fn transform_chains_in_order() {
        let mut registry = HookRegistry::new();
        registry.register_transform(
            TransformStage::Send,
            Box::new(|_, p| match p {
                Payload::Text(t) => Payload::Text(format!("{t}1")),
                other => other,
            }),
        );
        registry.register_transform(
            TransformStage::Send,
            Box::new(|_, p| match p {
                Payload::Text(t) => Payload::Text(format!("{t}2")),
                other => other,
            }),
        );

        let ctx = test_ctx(ConnState::Connected);
        let out = registry.run_transform(&ctx, TransformStage::Send, Payload::Text("x".into()));
        assert_eq!(out, Payload::Text("x12".into()));
    }

    #[test]
    fn callback_can_unregister_itself_mid_trigger() {
        let mut registry = HookRegistry::new();
        let count = Arc::new(Mutex::new(0u32));

        // The guard is published after registration through a shared slot,
        // the same way a plugin stores its own guards.
        let slot: Arc<Mutex<Option<HookGuard>>> = Arc::new(Mutex::new(None));
        let slot_in_cb = slot.clone();
        let count_cb = count.clone();
        let guard = registry.register_notify(
            NotifyStage::AfterConnect,
            Box::new(move |_, _| {
                *count_cb.lock().unwrap() += 1;
                if let Some(g) = slot_in_cb.lock().unwrap().as_ref() {
                    g.unregister();
                }
            }),
        );
        *slot.lock().unwrap() = Some(guard);

        let ctx = test_ctx(ConnState::Connected);
        registry.trigger(&ctx, NotifyStage::AfterConnect, &HookEvent::None);
        registry.trigger(&ctx, NotifyStage::AfterConnect, &HookEvent::None);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = HookRegistry::new();
        let count = Arc::new(Mutex::new(0u32));
        let count_cb = count.clone();
        let guard = registry.register_notify(
            NotifyStage::OnClose,
            Box::new(move |_, _| *count_cb.lock().unwrap() += 1),
        );

        guard.unregister();
        guard.unregister();

        let ctx = test_ctx(ConnState::Disconnected);
        registry.trigger(&ctx, NotifyStage::OnClose, &HookEvent::None);
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn listener_rewrite_wraps_callable() {
        let mut registry = HookRegistry::new();
        let wrapped_calls = Arc::new(Mutex::new(0u32));
        let wrapped_calls_hook = wrapped_calls.clone();
        registry.register_listener_hook(Box::new(move |_, mut inner| {
            let wrapped_calls = wrapped_calls_hook.clone();
            Box::new(move |ev| {
                *wrapped_calls.lock().unwrap() += 1;
                inner(ev);
            })
        }));

        let inner_calls = Arc::new(Mutex::new(0u32));
        let inner_calls_l = inner_calls.clone();
        let listener: ListenerFn = Box::new(move |_| *inner_calls_l.lock().unwrap() += 1);

        let ctx = test_ctx(ConnState::Connected);
        let mut rewritten = registry.rewrite_listener(&ctx, listener);
        rewritten(&ListenerEvent::Open);

        assert_eq!(*wrapped_calls.lock().unwrap(), 1);
        assert_eq!(*inner_calls.lock().unwrap(), 1);
    }

    #[test]
    fn stage_display_names() {
        assert_eq!(NotifyStage::BeforeReconnect.to_string(), "before_reconnect");
        assert_eq!(NotifyStage::OnNetworkStatus.to_string(), "on_network_status");
        assert_eq!(TransformStage::Receive.to_string(), "transform_receive");
    }
}
