//! `lockgate-middleware` – The Relay Core
//!
//! Owns the single connection to the door-lock controller and relays text
//! between it and every connected browser session.
//!
//! # Modules
//!
//! - [`link`] – [`UpstreamLink`]: connect / send / receive / disconnect with
//!   all state transitions under one lock, plus the WebSocket transport.
//! - [`supervisor`] – [`ReconnectSupervisor`]: background loop that keeps the
//!   link connected and relays everything the controller says.
//! - [`registry`] – [`RelayBroadcaster`] seam and the [`SessionRegistry`]
//!   fan-out over per-session outboxes.
//! - [`command`] – [`CommandRelay`]: forwards browser commands upstream and
//!   replies to the issuing session only.

pub mod command;
pub mod link;
pub mod registry;
pub mod supervisor;

pub use command::CommandRelay;
pub use link::{LockConnector, LockReader, LockWriter, UpstreamLink, WsConnector};
pub use registry::{RelayBroadcaster, SessionHandle, SessionRegistry};
pub use supervisor::{Phase, ReconnectSupervisor};
