//! WebSocket transport binding (tokio-tungstenite).
//!
//! A connected stream is split into a write pump (drains an mpsc queue into
//! the sink) and a read pump (maps wire frames to [`TransportEvent`]s).
//! Both pumps stop on a shared cancellation token.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{Connector, Frame, Transport, TransportError, TransportEvent};
use crate::types::{ABNORMAL_CLOSE, Payload};

use async_trait::async_trait;

/// Close code reported when a peer closes without a frame code.
const NO_STATUS_CLOSE: u16 = 1005;

/// Opens real WebSocket connections.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &mut self,
        url: &str,
    ) -> Result<(Box<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(256);
        let cancel = CancellationToken::new();

        tokio::spawn(write_pump(write, write_rx, event_tx.clone(), cancel.clone()));
        tokio::spawn(read_pump(read, event_tx, write_tx.clone(), cancel.clone()));

        Ok((Box::new(WsTransport { write_tx, cancel }), event_rx))
    }
}

/// Write half of a live WebSocket.
struct WsTransport {
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let msg = match frame {
            Frame::Text(t) => tungstenite::Message::Text(t.into()),
            Frame::Binary(b) => tungstenite::Message::Binary(b.into()),
        };
        self.write_tx
            .send(msg)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        let _ = self
            .write_tx
            .send(tungstenite::Message::Close(None))
            .await;
        self.cancel.cancel();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drains the outbound queue into the WebSocket sink.
///
/// A failed write is reported the same way as a failed read: an `Error`
/// event followed by an abnormal close, so the reconnection policy sees
/// it. The sink is closed on the way out; the graceful close frame itself
/// is queued by [`WsTransport::close`] like any other outbound message.
async fn write_pump<S>(
    mut sink: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    event_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = sink.send(msg).await {
                    warn!("WebSocket write failed: {e}");
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    let _ = event_tx
                        .send(TransportEvent::Closed {
                            code: ABNORMAL_CLOSE,
                            reason: "write error".into(),
                        })
                        .await;
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Reads wire frames and publishes [`TransportEvent`]s.
///
/// Protocol pings are answered here; data frames, close frames, and read
/// errors are forwarded to the engine. A read error or a bare stream end is
/// reported as an abnormal close (1006) so the reconnection policy applies.
async fn read_pump<S>(
    mut read: S,
    event_tx: mpsc::Sender<TransportEvent>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let payload = Payload::Text(text.as_str().to_string());
                        if event_tx.send(TransportEvent::Message(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        let payload = Payload::Binary(data.to_vec());
                        if event_tx.send(TransportEvent::Message(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    Some(Ok(tungstenite::Message::Pong(_))) => {
                        trace!("received pong");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (u16::from(f.code), f.reason.as_str().to_string()),
                            None => (NO_STATUS_CLOSE, String::new()),
                        };
                        debug!(code, "received close frame");
                        let _ = event_tx.send(TransportEvent::Closed { code, reason }).await;
                        break;
                    }
                    Some(Ok(_)) => {} // Raw frames — ignore
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        let _ = event_tx
                            .send(TransportEvent::Closed {
                                code: ABNORMAL_CLOSE,
                                reason: "read error".into(),
                            })
                            .await;
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        let _ = event_tx
                            .send(TransportEvent::Closed {
                                code: ABNORMAL_CLOSE,
                                reason: "stream ended".into(),
                            })
                            .await;
                        break;
                    }
                }
            }
        }
    }
}
