use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Status vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// Broadcast when the lock controller link comes up.
pub const LOCK_CONNECTED: &str = "LOCK_CONNECTED";
/// Broadcast when the lock controller link is lost.
pub const LOCK_DISCONNECTED: &str = "LOCK_DISCONNECTED";
/// Reply to a command whose write failed mid-flight.
pub const ERR_CONNECTION_LOST: &str = "ERROR: Door Lock connection lost";
/// Reply to a command issued while the link is down.
pub const ERR_NOT_CONNECTED: &str = "ERROR: Door Lock not connected";

/// Acknowledgement sent back to the session that issued `payload`.
pub fn command_ack(payload: &str) -> String {
    format!("OK: Sent {payload} to Door Lock")
}

// ─────────────────────────────────────────────────────────────────────────────
// Link state
// ─────────────────────────────────────────────────────────────────────────────

/// Connection state of the single upstream lock controller link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
}

impl LinkState {
    /// The synthetic status text announcing this state to browsers.
    pub fn status_text(self) -> &'static str {
        match self {
            LinkState::Connected => LOCK_CONNECTED,
            LinkState::Disconnected => LOCK_DISCONNECTED,
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// Externally supplied endpoint and timing for the upstream link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// e.g. `ws://192.168.137.122/ws`
    pub endpoint: String,
    pub connect_timeout: Duration,
    /// How long one receive poll may block while listening.
    pub receive_timeout: Duration,
    /// Fixed wait between failed connect attempts.
    pub retry_interval: Duration,
}

impl LinkSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(3),
            receive_timeout: Duration::from_secs(1),
            retry_interval: Duration::from_secs(3),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay messages
// ─────────────────────────────────────────────────────────────────────────────

/// Which way a [`RelayMessage`] travels through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Browser → lock controller.
    UpstreamBound,
    /// Lock controller (or the gateway itself) → browser.
    DownstreamBound,
}

/// One unit of opaque text relayed through the gateway.
///
/// `id` and `timestamp` exist for logging only and never reach the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub payload: String,
}

impl RelayMessage {
    /// A message headed for browser sessions.
    pub fn downstream(payload: impl Into<String>) -> Self {
        Self::new(Direction::DownstreamBound, payload)
    }

    /// A command headed for the lock controller.
    pub fn upstream(payload: impl Into<String>) -> Self {
        Self::new(Direction::UpstreamBound, payload)
    }

    /// The [`ConnectionStatusEvent`][LinkState::status_text] for `state`.
    pub fn status(state: LinkState) -> Self {
        Self::downstream(state.status_text())
    }

    fn new(direction: Direction, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            direction,
            payload: payload.into(),
        }
    }
}

/// Opaque identity of one browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Browser wire frames
// ─────────────────────────────────────────────────────────────────────────────

/// Frame pushed to a browser: `{"event":"response","data":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerFrame {
    Response(String),
}

/// Frame received from a browser: `{"event":"command","data":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientFrame {
    Command(String),
}

impl ClientFrame {
    /// Decode a browser text frame.
    ///
    /// JSON frames must carry `"event":"command"`; any other JSON object is
    /// rejected.  Text that is not JSON at all is taken verbatim as a raw
    /// command, unless it is blank.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) if value.is_object() => serde_json::from_value(value).ok(),
            _ if text.trim().is_empty() => None,
            _ => Some(ClientFrame::Command(text.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure reported by a transport implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// A connect attempt to the lock controller did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("connect to {endpoint} timed out after {after:?}")]
    Timeout { endpoint: String, after: Duration },

    #[error("connect to {endpoint} refused: {reason}")]
    Refused { endpoint: String, reason: String },
}

/// Outcome of a single receive poll that produced no message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    /// Nothing arrived within the poll window; retry.
    #[error("no message within the receive window")]
    Timeout,

    /// The live connection is gone and must be torn down.
    #[error("Door Lock connection lost: {0}")]
    ConnectionLost(String),
}

/// Why a command could not be written to the lock controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Door Lock not connected")]
    NotConnected,

    #[error("Door Lock connection lost: {0}")]
    ConnectionLost(String),
}

impl SendError {
    /// Wire text replied to the originating session.
    pub fn reply_text(&self) -> &'static str {
        match self {
            SendError::NotConnected => ERR_NOT_CONNECTED,
            SendError::ConnectionLost(_) => ERR_CONNECTION_LOST,
        }
    }
}

/// Process-level failures of the gateway's collaborators.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Camera Error: {0}")]
    Camera(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("WebSocket handshake with {peer} failed: {reason}")]
    Handshake { peer: String, reason: String },
}
