//! Scripted in-process transport for driving the connection state machine
//! without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use iws_client::{Connector, Frame, Transport, TransportError, TransportEvent};

#[derive(Default)]
struct Inner {
    sent: Mutex<Vec<Frame>>,
    connects: AtomicU32,
    /// Scripted connect outcomes, oldest first. Empty means succeed.
    outcomes: Mutex<VecDeque<bool>>,
    event_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

/// Handle shared between the test body and the connector it hands to the
/// connection under test.
#[derive(Clone, Default)]
pub struct FakeNet {
    inner: Arc<Inner>,
}

impl FakeNet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(FakeConnector { net: self.clone() })
    }

    /// Scripts the next `n` connect attempts to fail.
    pub fn fail_next_connects(&self, n: usize) {
        let mut outcomes = self.inner.outcomes.lock().unwrap();
        for _ in 0..n {
            outcomes.push_back(false);
        }
    }

    pub fn connect_count(&self) -> u32 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Delivers an event on the current transport's channel.
    pub async fn inject(&self, event: TransportEvent) {
        let tx = self
            .inner
            .event_tx
            .lock()
            .unwrap()
            .clone()
            .expect("no live transport");
        tx.send(event).await.expect("driver gone");
    }

    /// Simulates the peer dropping the connection.
    pub async fn drop_conn(&self) {
        self.inject(TransportEvent::Closed {
            code: 1006,
            reason: "connection dropped".into(),
        })
        .await;
    }
}

struct FakeConnector {
    net: FakeNet,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &mut self,
        _url: &str,
    ) -> Result<(Box<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError> {
        self.net.inner.connects.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .net
            .inner
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(true);
        if !ok {
            return Err(TransportError::Connect("scripted failure".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        *self.net.inner.event_tx.lock().unwrap() = Some(tx);
        Ok((
            Box::new(FakeTransport {
                net: self.net.clone(),
            }),
            rx,
        ))
    }
}

struct FakeTransport {
    net: FakeNet,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.net.inner.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Yields enough times for the driver task to drain its queues.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
