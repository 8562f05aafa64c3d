//! Offline-message stash plugin.
//!
//! Intercepts `send` calls made while the connection is down, holds the
//! payloads in a bounded FIFO set, and replays them through the normal send
//! path once the connection comes back. With a [`store::StashStore`]
//! attached, the set also survives process restarts: it is serialized to a
//! fixed durable slot on every stash and reloaded once on the first
//! reconnect. Best-effort only — eviction under capacity pressure and
//! failed persistence both drop messages silently (with a log line).

pub mod store;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use iws_client::hooks::{HookContext, HookEvent, HookGuard, HookRegistry, NotifyStage};
use iws_client::{Payload, Plugin};

use crate::store::StashStore;

/// Durable slot key holding the serialized stash between runs.
pub const STASH_STORE_KEY: &str = "iws-stash-offline-msg";

/// Stash configuration.
#[derive(Debug, Clone)]
pub struct StashOptions {
    /// Capacity of the stash set. The oldest entry is evicted beyond it.
    pub max_msgs: usize,
}

impl Default for StashOptions {
    fn default() -> Self {
        Self { max_msgs: 500 }
    }
}

struct StashState {
    queue: VecDeque<Payload>,
    max_msgs: usize,
    store: Option<Box<dyn StashStore>>,
    restored: bool,
}

impl StashState {
    /// Adds a payload unless an equal one is already queued. Evicts from
    /// the front when at capacity, then persists the whole set.
    fn stash(&mut self, payload: Payload) {
        // A zero-capacity stash holds nothing; evicting toward room that
        // can never exist would loop forever.
        if self.max_msgs == 0 {
            return;
        }
        if self.queue.contains(&payload) {
            return;
        }
        while self.queue.len() >= self.max_msgs {
            self.queue.pop_front();
            debug!("stash at capacity, evicted oldest entry");
        }
        self.queue.push_back(payload);
        self.persist();
    }

    fn persist(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        match serde_json::to_string(&self.queue) {
            Ok(json) => {
                if let Err(e) = store.save(STASH_STORE_KEY, &json) {
                    warn!(error = %e, "failed to persist stash");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize stash"),
        }
    }

    /// Loads entries persisted by a previous run into the set. Runs at most
    /// once per plugin instance; later reconnects skip it.
    fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        let Some(store) = self.store.as_mut() else {
            return;
        };
        match store.load(STASH_STORE_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<Vec<Payload>>(&json) {
                Ok(entries) => {
                    debug!(count = entries.len(), "restoring persisted stash");
                    // Crash-recovered entries predate anything stashed this
                    // run, so they replay first.
                    let mut merged: VecDeque<Payload> = VecDeque::new();
                    for payload in entries.into_iter().chain(self.queue.drain(..)) {
                        if !merged.contains(&payload) {
                            merged.push_back(payload);
                        }
                    }
                    while merged.len() > self.max_msgs {
                        merged.pop_front();
                    }
                    self.queue = merged;
                }
                Err(e) => warn!(error = %e, "discarding unreadable persisted stash"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to load persisted stash"),
        }
    }

    /// Empties the set in insertion order and clears the durable slot.
    fn drain(&mut self) -> Vec<Payload> {
        let drained: Vec<Payload> = self.queue.drain(..).collect();
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.clear(STASH_STORE_KEY) {
                warn!(error = %e, "failed to clear stash slot");
            }
        }
        drained
    }
}

/// The stash plugin. Registers on `before_send` to capture offline sends
/// and on `after_connect` to flush them.
pub struct StashPlugin {
    state: Arc<Mutex<StashState>>,
    guards: Vec<HookGuard>,
}

impl StashPlugin {
    /// In-memory stash. Contents are lost when the process exits.
    pub fn new(options: StashOptions) -> Self {
        Self::build(options, None)
    }

    /// Stash persisted to `store` under [`STASH_STORE_KEY`].
    pub fn with_store(options: StashOptions, store: Box<dyn StashStore>) -> Self {
        Self::build(options, Some(store))
    }

    fn build(options: StashOptions, store: Option<Box<dyn StashStore>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StashState {
                queue: VecDeque::new(),
                max_msgs: options.max_msgs,
                store,
                restored: false,
            })),
            guards: Vec::new(),
        }
    }

    /// Read-only view of the stash contents, for inspection and tests.
    pub fn probe(&self) -> StashProbe {
        StashProbe {
            state: self.state.clone(),
        }
    }
}

impl Plugin for StashPlugin {
    fn name(&self) -> &str {
        "stash"
    }

    fn register_hooks(&mut self, hooks: &mut HookRegistry) {
        let state = self.state.clone();
        self.guards.push(hooks.register_notify(
            NotifyStage::BeforeSend,
            Box::new(move |ctx: &HookContext, event: &HookEvent| {
                if ctx.is_connected() {
                    return;
                }
                if let HookEvent::Payload(payload) = event {
                    debug!(url = ctx.url(), "stashing payload sent while disconnected");
                    state.lock().unwrap().stash(payload.clone());
                }
            }),
        ));

        let state = self.state.clone();
        self.guards.push(hooks.register_notify(
            NotifyStage::AfterConnect,
            Box::new(move |ctx: &HookContext, _event: &HookEvent| {
                let drained = {
                    let mut st = state.lock().unwrap();
                    st.restore();
                    st.drain()
                };
                if drained.is_empty() {
                    return;
                }
                debug!(url = ctx.url(), count = drained.len(), "flushing stashed payloads");
                // Replay through the live send path so the full hook
                // pipeline applies again.
                for payload in drained {
                    ctx.send(payload);
                }
            }),
        ));
    }

    fn destroy(&mut self) {
        // Required cleanup: leaving these registered would keep stale
        // callbacks firing after removal.
        for guard in self.guards.drain(..) {
            guard.unregister();
        }
    }
}

/// Snapshot access to a plugin's stash set.
#[derive(Clone)]
pub struct StashProbe {
    state: Arc<Mutex<StashState>>,
}

impl StashProbe {
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Payload> {
        self.state.lock().unwrap().queue.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn state(max_msgs: usize, store: Option<Box<dyn StashStore>>) -> StashState {
        StashState {
            queue: VecDeque::new(),
            max_msgs,
            store,
            restored: false,
        }
    }

    #[test]
    fn duplicate_payloads_are_not_requeued() {
        let mut st = state(10, None);
        st.stash(Payload::Text("a".into()));
        st.stash(Payload::Text("a".into()));
        st.stash(Payload::Text("b".into()));
        assert_eq!(st.queue.len(), 2);
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let mut st = state(2, None);
        st.stash(Payload::Text("a".into()));
        st.stash(Payload::Text("b".into()));
        st.stash(Payload::Text("c".into()));
        let contents: Vec<_> = st.queue.iter().cloned().collect();
        assert_eq!(
            contents,
            vec![Payload::Text("b".into()), Payload::Text("c".into())],
        );
    }

    #[test]
    fn zero_capacity_stash_accepts_nothing() {
        let mut st = state(0, None);
        st.stash(Payload::Text("a".into()));
        st.stash(Payload::Text("b".into()));
        assert!(st.queue.is_empty());
    }

    #[test]
    fn restored_entries_replay_before_current_run_stashes() {
        let mut store = MemoryStore::new();
        store
            .save(STASH_STORE_KEY, r#"[{"text":"old1"},{"text":"old2"}]"#)
            .unwrap();

        let mut st = state(10, Some(Box::new(store)));
        st.stash(Payload::Text("new".into()));
        st.restore();

        let contents: Vec<_> = st.queue.iter().cloned().collect();
        assert_eq!(
            contents,
            vec![
                Payload::Text("old1".into()),
                Payload::Text("old2".into()),
                Payload::Text("new".into()),
            ],
        );
    }

    #[test]
    fn restore_respects_capacity() {
        let mut store = MemoryStore::new();
        store
            .save(STASH_STORE_KEY, r#"[{"text":"a"},{"text":"b"}]"#)
            .unwrap();

        let mut st = state(2, Some(Box::new(store)));
        st.stash(Payload::Text("c".into()));
        st.restore();

        let contents: Vec<_> = st.queue.iter().cloned().collect();
        assert_eq!(
            contents,
            vec![Payload::Text("b".into()), Payload::Text("c".into())],
        );
    }

    #[test]
    fn restore_loads_once_and_drain_clears_slot() {
        let mut store = MemoryStore::new();
        store
            .save(STASH_STORE_KEY, r#"[{"text":"x"},{"text":"y"}]"#)
            .unwrap();

        let mut st = state(10, Some(Box::new(store)));
        st.restore();
        assert_eq!(st.queue.len(), 2);

        let drained = st.drain();
        assert_eq!(
            drained,
            vec![Payload::Text("x".into()), Payload::Text("y".into())],
        );
        assert!(st.queue.is_empty());
        assert!(
            st.store
                .as_ref()
                .unwrap()
                .load(STASH_STORE_KEY)
                .unwrap()
                .is_none()
        );

        // Load-once: a second restore does not resurrect anything.
        st.restore();
        assert!(st.queue.is_empty());
    }

    #[test]
    fn unreadable_persisted_stash_is_discarded() {
        let mut store = MemoryStore::new();
        store.save(STASH_STORE_KEY, "not json").unwrap();
        let mut st = state(10, Some(Box::new(store)));
        st.restore();
        assert!(st.queue.is_empty());
    }

    #[test]
    fn stash_persists_current_set() {
        let mut st = state(10, Some(Box::new(MemoryStore::new())));
        st.stash(Payload::Text("a".into()));
        let json = st
            .store
            .as_ref()
            .unwrap()
            .load(STASH_STORE_KEY)
            .unwrap()
            .expect("persisted");
        let entries: Vec<Payload> = serde_json::from_str(&json).unwrap();
        assert_eq!(entries, vec![Payload::Text("a".into())]);
    }
}
