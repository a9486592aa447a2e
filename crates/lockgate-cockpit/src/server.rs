//! [`CockpitServer`] – HTTP + WebSocket server for the door-lock control page.
//!
//! Listens on `0.0.0.0:8000` (configurable via [`CockpitServer::with_host`] /
//! [`CockpitServer::with_port`]).
//!
//! * WebSocket upgrades → one browser session on the [`SessionRegistry`].
//! * `GET /video_feed` → the shared camera stream as MJPEG.
//! * `GET /` → the embedded control page.
//! * Anything else → 404.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use lockgate_hal::{CameraFeed, STREAM_CONTENT_TYPE};
use lockgate_middleware::{CommandRelay, SessionRegistry, UpstreamLink};
use lockgate_types::{ClientFrame, GatewayError, ServerFrame};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default TCP port for the control page and WebSocket endpoint.
pub const DEFAULT_PORT: u16 = 8000;

/// The compiled-in control page (HTML + CSS + JS).
const INDEX_HTML: &str = include_str!("index.html");

// ─────────────────────────────────────────────────────────────────────────────
// CockpitServer
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a connection handler needs, shared across connections.
struct Shared {
    registry: Arc<SessionRegistry>,
    commands: CommandRelay,
    camera: CameraFeed,
}

/// Browser-facing transport: serves the control page, the video feed, and
/// one WebSocket session per browser tab.
pub struct CockpitServer {
    shared: Arc<Shared>,
    host: IpAddr,
    port: u16,
}

impl CockpitServer {
    /// Create a server on `0.0.0.0:`[`DEFAULT_PORT`].
    pub fn new(link: Arc<UpstreamLink>, registry: Arc<SessionRegistry>, camera: CameraFeed) -> Self {
        let commands = CommandRelay::new(link, registry.clone());
        Self {
            shared: Arc::new(Shared {
                registry,
                commands,
                camera,
            }),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening address (builder-style).
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Bind the configured address and serve until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Bind`] if the TCP listener cannot bind.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), GatewayError> {
        let addr = self.addr();
        let listener = TcpListener::bind(addr).await.map_err(|source| GatewayError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        self.serve(listener, cancel).await
    }

    /// Serve connections from an already bound `listener` until `cancel` fires.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), GatewayError> {
        let local = listener.local_addr()?;
        info!(addr = %local, "Web interface listening on http://{local}");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = Arc::clone(&self.shared);
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, shared, cancel).await {
                                warn!(peer = %peer, error = %e, "client connection error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                },
            }
        }

        info!("web interface stopped");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request routing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Session,
    VideoFeed,
    Index,
    NotFound,
}

/// `HEAD` requests get the response headers only.
fn is_head_request(head: &str) -> bool {
    head.starts_with("HEAD ")
}

/// Decide what to do with a request from its (possibly partial) head.
fn route(head: &str) -> Route {
    let is_ws_upgrade = head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });
    if is_ws_upgrade {
        return Route::Session;
    }

    let mut parts = head.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");
    let path = path.split('?').next().unwrap_or(path);

    match (method, path) {
        ("GET" | "HEAD", "/video_feed") => Route::VideoFeed,
        ("GET" | "HEAD", "/" | "/index.html") => Route::Index,
        _ => Route::NotFound,
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    // `peek` leaves the request in the socket so tungstenite's handshaker
    // still sees all of it.
    let mut buf = [0u8; 1024];
    let n = stream.peek(&mut buf).await?;
    let head = String::from_utf8_lossy(&buf[..n]);
    let head_only = is_head_request(&head);

    match route(&head) {
        Route::Session => handle_session(stream, peer, shared, cancel).await,
        Route::VideoFeed => serve_video(stream, peer, &shared.camera, head_only, cancel).await,
        Route::Index => {
            serve_static(stream, "200 OK", "text/html; charset=utf-8", INDEX_HTML, head_only).await
        }
        Route::NotFound => {
            serve_static(stream, "404 Not Found", "text/plain; charset=utf-8", "Not Found", head_only).await
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plain HTTP
// ─────────────────────────────────────────────────────────────────────────────

async fn serve_static(
    mut stream: TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
    head_only: bool,
) -> Result<(), GatewayError> {
    let mut response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        body.len(),
    );
    if !head_only {
        response.push_str(body);
    }
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

async fn serve_video(
    mut stream: TcpStream,
    peer: SocketAddr,
    camera: &CameraFeed,
    head_only: bool,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    let header = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {STREAM_CONTENT_TYPE}\r\n\
         Cache-Control: no-cache, no-store\r\n\
         Connection: close\r\n\
         \r\n"
    );
    stream.write_all(header.as_bytes()).await?;
    if head_only {
        return Ok(());
    }

    let mut parts = camera.subscribe();
    debug!(peer = %peer, viewers = camera.viewers(), "video viewer attached");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            part = parts.recv() => match part {
                Ok(part) => {
                    if stream.write_all(&part).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(peer = %peer, skipped, "video viewer lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    debug!(peer = %peer, "video viewer detached");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket: one browser session
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| GatewayError::Handshake {
            peer: peer.to_string(),
            reason: e.to_string(),
        })?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let mut session = shared.registry.join().await;
    info!(peer = %peer, session = %session.id, "Client connected");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            // ── Downstream: gateway → browser ───────────────────────────────
            outgoing = session.outbox.recv() => {
                let Some(message) = outgoing else { break };
                let json = match serde_json::to_string(&ServerFrame::Response(message.payload)) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(error = %e, "frame serialization error");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            // ── Upstream: browser → lock controller ────────────────────────
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => match ClientFrame::parse(text.as_str()) {
                    Some(ClientFrame::Command(payload)) => {
                        shared.commands.handle_command(session.id, &payload).await;
                    }
                    None => debug!(session = %session.id, "ignored browser frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(session = %session.id, error = %e, "browser socket error");
                    break;
                }
                _ => {}
            },
        }
    }

    shared.registry.leave(session.id).await;
    info!(peer = %peer, session = %session.id, "Client disconnected");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
