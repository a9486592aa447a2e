//! [`UpstreamLink`] – the single persistent connection to the lock controller.
//!
//! The link owns at most one live handle.  Every state transition happens
//! under one mutex scoped to the link instance, so a disconnect triggered by
//! a failed command write and one triggered by a failed receive cannot race
//! into a double close or a "connected without a handle" state.
//!
//! The wire itself sits behind the [`LockConnector`] seam.  [`WsConnector`]
//! speaks WebSocket text frames via `tokio-tungstenite`; tests plug in an
//! in-memory connector.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lockgate_types::{
    ConnectError, LinkSettings, LinkState, ReceiveError, RelayMessage, SendError, TransportError,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Transport seam
// ─────────────────────────────────────────────────────────────────────────────

/// Write half of an open lock controller connection.
#[async_trait]
pub trait LockWriter: Send {
    /// Write one text message.
    async fn send_text(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Close the connection.  Errors are ignored; the handle is gone either way.
    async fn close(&mut self);
}

/// Read half of an open lock controller connection.
#[async_trait]
pub trait LockReader: Send {
    /// Wait for the next text message.
    ///
    /// `None` means the peer closed the connection.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
}

/// Opens connections to a lock controller endpoint.
#[async_trait]
pub trait LockConnector: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
    ) -> Result<(Box<dyn LockWriter>, Box<dyn LockReader>), TransportError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket transport
// ─────────────────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`LockConnector`] for controllers exposing a WebSocket endpoint
/// (e.g. `ws://192.168.137.122/ws`).
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl LockConnector for WsConnector {
    async fn open(
        &self,
        endpoint: &str,
    ) -> Result<(Box<dyn LockWriter>, Box<dyn LockReader>), TransportError> {
        let (ws_stream, _response) = connect_async(endpoint)
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let (tx, rx) = ws_stream.split();
        Ok((Box::new(WsWriter { tx }), Box::new(WsReader { rx })))
    }
}

struct WsWriter {
    tx: SplitSink<WsStream, Message>,
}

#[async_trait]
impl LockWriter for WsWriter {
    async fn send_text(&mut self, payload: &str) -> Result<(), TransportError> {
        self.tx
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.tx.close().await;
    }
}

struct WsReader {
    rx: SplitStream<WsStream>,
}

#[async_trait]
impl LockReader for WsReader {
    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.rx.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError(e.to_string()))),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UpstreamLink
// ─────────────────────────────────────────────────────────────────────────────

struct LiveHandle {
    generation: u64,
    writer: Arc<Mutex<Box<dyn LockWriter>>>,
    reader: Arc<Mutex<Box<dyn LockReader>>>,
}

/// The gateway's one connection to the door-lock controller.
///
/// Shared as `Arc<UpstreamLink>` between the
/// [`ReconnectSupervisor`][crate::supervisor::ReconnectSupervisor] and the
/// [`CommandRelay`][crate::command::CommandRelay].
pub struct UpstreamLink {
    endpoint: String,
    connect_timeout: Duration,
    connector: Arc<dyn LockConnector>,
    /// `Some` iff the link is connected.
    handle: Mutex<Option<LiveHandle>>,
    next_generation: AtomicU64,
    state_tx: watch::Sender<LinkState>,
}

impl UpstreamLink {
    /// Create a disconnected link to `endpoint` over `connector`.
    pub fn new(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
        connector: Arc<dyn LockConnector>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            connector,
            handle: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            state_tx,
        }
    }

    /// Create a WebSocket link from externally supplied settings.
    pub fn websocket(settings: &LinkSettings) -> Self {
        Self::new(
            settings.endpoint.clone(),
            settings.connect_timeout,
            Arc::new(WsConnector),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Last published state.  May be stale by the time the caller acts on it.
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Watch every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// State and handle presence, sampled together under the link lock.
    #[cfg(test)]
    pub(crate) async fn snapshot(&self) -> (LinkState, bool) {
        let guard = self.handle.lock().await;
        (self.state(), guard.is_some())
    }

    /// Open the connection, bounded by the connect timeout.
    ///
    /// Already being connected is a success; the existing handle is kept.
    /// On failure the link stays disconnected and retrying is up to the
    /// caller.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if self.handle.lock().await.is_some() {
            return Ok(());
        }

        // The lock is not held while dialing so that commands fail fast with
        // `NotConnected` instead of queueing behind a slow connect.
        let opened = tokio::time::timeout(self.connect_timeout, self.connector.open(&self.endpoint))
            .await
            .map_err(|_| ConnectError::Timeout {
                endpoint: self.endpoint.clone(),
                after: self.connect_timeout,
            })?;
        let (writer, reader) = opened.map_err(|e| ConnectError::Refused {
            endpoint: self.endpoint.clone(),
            reason: e.0,
        })?;

        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            drop(guard);
            let mut writer = writer;
            writer.close().await;
            return Ok(());
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        *guard = Some(LiveHandle {
            generation,
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        });
        self.state_tx.send_replace(LinkState::Connected);
        drop(guard);

        info!(endpoint = %self.endpoint, generation, "Connected to Door Lock");
        Ok(())
    }

    /// Wait up to `timeout` for exactly one inbound message.
    ///
    /// [`ReceiveError::Timeout`] is a polling result, not a failure.
    /// [`ReceiveError::ConnectionLost`] means the caller must tear the link
    /// down, and is also returned when the handle was already released by a
    /// failed send.
    pub async fn receive_one(&self, timeout: Duration) -> Result<RelayMessage, ReceiveError> {
        let reader = {
            let guard = self.handle.lock().await;
            match guard.as_ref() {
                Some(live) => Arc::clone(&live.reader),
                None => {
                    return Err(ReceiveError::ConnectionLost("link is not connected".into()));
                }
            }
        };

        let mut reader = reader.lock().await;
        match tokio::time::timeout(timeout, reader.next_text()).await {
            Err(_) => Err(ReceiveError::Timeout),
            Ok(Some(Ok(payload))) => Ok(RelayMessage::downstream(payload)),
            Ok(Some(Err(e))) => Err(ReceiveError::ConnectionLost(e.0)),
            Ok(None) => Err(ReceiveError::ConnectionLost("closed by peer".into())),
        }
    }

    /// Write `payload` to the lock controller.
    ///
    /// Never attempts to connect.  A write failure releases the handle it was
    /// written to and leaves the link disconnected.
    pub async fn send(&self, payload: &str) -> Result<(), SendError> {
        let (generation, writer) = {
            let guard = self.handle.lock().await;
            match guard.as_ref() {
                Some(live) => (live.generation, Arc::clone(&live.writer)),
                None => return Err(SendError::NotConnected),
            }
        };

        let result = writer.lock().await.send_text(payload).await;
        match result {
            Ok(()) => {
                debug!(payload, "command written to Door Lock");
                Ok(())
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Error sending command");
                self.release(Some(generation)).await;
                Err(SendError::ConnectionLost(e.0))
            }
        }
    }

    /// Release the handle if present.  Idempotent.
    pub async fn disconnect(&self) {
        self.release(None).await;
    }

    /// Take the handle out under the lock and close it outside the lock.
    ///
    /// With `Some(generation)` only that exact handle is released, so a stale
    /// failure can never tear down a newer connection.
    async fn release(&self, generation: Option<u64>) {
        let live = {
            let mut guard = self.handle.lock().await;
            let matches = match (guard.as_ref(), generation) {
                (Some(live), Some(g)) => live.generation == g,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches {
                return;
            }
            let live = guard.take();
            self.state_tx.send_replace(LinkState::Disconnected);
            live
        };

        if let Some(live) = live {
            debug!(endpoint = %self.endpoint, generation = live.generation, "releasing Door Lock handle");
            live.writer.lock().await.close().await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory transport for tests
// ─────────────────────────────────────────────────────────────────────────────
