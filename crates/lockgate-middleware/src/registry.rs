//! Fan-out to browser sessions.
//!
//! [`RelayBroadcaster`] is the seam the core talks to; [`SessionRegistry`] is
//! the in-process implementation the cockpit server registers its WebSocket
//! sessions with.  Each session owns a bounded outbox so one slow browser
//! never holds up delivery to the rest.

use std::collections::HashMap;

use async_trait::async_trait;
use lockgate_types::{LinkState, RelayMessage, SessionId};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

/// Default per-session outbox capacity (messages buffered before new ones
/// are dropped for that session).
const DEFAULT_CAPACITY: usize = 256;

/// Delivery sink for downstream-bound messages.
///
/// All operations are best-effort: a failed delivery to one session is
/// logged and swallowed, never returned to the caller.
#[async_trait]
pub trait RelayBroadcaster: Send + Sync {
    /// Deliver `message` to every currently registered session.
    async fn broadcast(&self, message: RelayMessage);

    /// Announce a link transition to every session.
    ///
    /// Implementations must record `state` as the status handed to sessions
    /// that join afterwards, atomically with the fan-out.
    async fn broadcast_status(&self, state: LinkState);

    /// Deliver `message` to exactly one session.
    ///
    /// Returns `false` when the session is unknown or its outbox rejected
    /// the message.
    async fn notify_one(&self, session: SessionId, message: RelayMessage) -> bool;
}

/// Receiving end handed to the transport for one joined session.
pub struct SessionHandle {
    pub id: SessionId,
    pub outbox: mpsc::Receiver<RelayMessage>,
}

struct Sessions {
    outboxes: HashMap<SessionId, mpsc::Sender<RelayMessage>>,
    /// Last announced link status.
    status: LinkState,
}

/// Set of live browser sessions.
pub struct SessionRegistry {
    inner: RwLock<Sessions>,
    capacity: usize,
}

impl SessionRegistry {
    /// Create a registry whose session outboxes hold `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Sessions {
                outboxes: HashMap::new(),
                status: LinkState::Disconnected,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Register a new session and queue the last announced link status as
    /// its first message.
    ///
    /// Status announcements take the same write lock, so a joining session
    /// sees each transition exactly once: either as its initial status or as
    /// a later broadcast, never both.
    pub async fn join(&self) -> SessionHandle {
        let (tx, outbox) = mpsc::channel(self.capacity);
        let id = SessionId::new();

        let mut inner = self.inner.write().await;
        let state = inner.status;
        // Fresh channel with capacity >= 1: cannot be full or closed.
        let _ = tx.try_send(RelayMessage::status(state));
        inner.outboxes.insert(id, tx);
        debug!(session = %id, ?state, sessions = inner.outboxes.len(), "session joined");

        SessionHandle { id, outbox }
    }

    /// Forget a session.  Unknown ids are ignored.
    pub async fn leave(&self, id: SessionId) {
        let mut inner = self.inner.write().await;
        if inner.outboxes.remove(&id).is_some() {
            debug!(session = %id, sessions = inner.outboxes.len(), "session left");
        }
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.outboxes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.outboxes.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn deliver(id: SessionId, tx: &mpsc::Sender<RelayMessage>, message: RelayMessage) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(session = %id, payload = %dropped.payload, "session outbox full, message dropped");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(session = %id, "session outbox closed");
            false
        }
    }
}

fn fan_out(outboxes: &HashMap<SessionId, mpsc::Sender<RelayMessage>>, message: RelayMessage) {
    debug!(payload = %message.payload, recipients = outboxes.len(), "broadcast to all sessions");
    for (id, tx) in outboxes {
        deliver(*id, tx, message.clone());
    }
}

#[async_trait]
impl RelayBroadcaster for SessionRegistry {
    async fn broadcast(&self, message: RelayMessage) {
        let inner = self.inner.read().await;
        fan_out(&inner.outboxes, message);
    }

    async fn broadcast_status(&self, state: LinkState) {
        let mut inner = self.inner.write().await;
        inner.status = state;
        fan_out(&inner.outboxes, RelayMessage::status(state));
    }

    async fn notify_one(&self, session: SessionId, message: RelayMessage) -> bool {
        let inner = self.inner.read().await;
        match inner.outboxes.get(&session) {
            Some(tx) => deliver(session, tx, message),
            None => {
                debug!(session = %session, "notify for unknown session dropped");
                false
            }
        }
    }
}
