//! `lockgate-cockpit` – The Browser-Facing Transport
//!
//! Boots a lightweight HTTP + WebSocket server (default port `8000`) that:
//!
//! 1. **Serves** the embedded door-lock control page at `/`.
//!
//! 2. **Bridges** every browser tab to the relay core over a WebSocket: each
//!    tab is registered on the [`SessionRegistry`] and first receives the
//!    current `LOCK_CONNECTED` / `LOCK_DISCONNECTED` status, then every
//!    message the lock controller sends.
//!
//! 3. **Accepts** `{"event":"command","data":"..."}` frames and forwards them
//!    through the [`CommandRelay`]; the outcome goes back to that tab only.
//!
//! 4. **Streams** the shared camera feed at `/video_feed` as
//!    `multipart/x-mixed-replace`.
//!
//! [`SessionRegistry`]: lockgate_middleware::SessionRegistry
//! [`CommandRelay`]: lockgate_middleware::CommandRelay

pub mod server;

pub use server::{CockpitServer, DEFAULT_PORT};
