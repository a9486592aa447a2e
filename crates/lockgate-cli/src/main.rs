//! `lockgate` – Door-Lock Gateway
//!
//! This binary wires the gateway together and runs it until Ctrl-C:
//!
//! 1. Loads `~/.lockgate/config.toml` (defaults when absent) and initialises
//!    logging.
//! 2. Keeps a WebSocket link to the door-lock controller alive through the
//!    reconnect supervisor, relaying every lock message to all browsers.
//! 3. Shares the camera's MJPEG stream with every viewer.
//! 4. Serves the control page, `/video_feed`, and browser sessions.
//! 5. On **Ctrl-C** cancels every task and closes the lock link.

mod config;
mod telemetry;

use std::net::IpAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use lockgate_cockpit::CockpitServer;
use lockgate_hal::{CameraFeed, HttpMjpegSource};
use lockgate_middleware::{ReconnectSupervisor, SessionRegistry, UpstreamLink};
use lockgate_types::GatewayError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;

/// Delay before reopening the camera stream after a failure.
const CAMERA_RETRY: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialised before the runtime exists: the simple OTLP exporter must
    // not be created inside a Tokio context.
    let _guard = match telemetry::init_tracing("lockgate", &cfg) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}: {}", "Logging error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    print_banner(&cfg);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Runtime error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            println!("{}", "  ✓ Gateway stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> Result<(), GatewayError> {
    let host: IpAddr = cfg
        .server_host
        .parse()
        .map_err(|e| GatewayError::Config(format!("invalid server_host {:?}: {e}", cfg.server_host)))?;

    let cancel = CancellationToken::new();
    let settings = cfg.link_settings();

    // ── Lock relay core ───────────────────────────────────────────────────
    let link = Arc::new(UpstreamLink::websocket(&settings));
    let registry = Arc::new(SessionRegistry::default());
    let supervisor = ReconnectSupervisor::new(Arc::clone(&link), registry.clone(), &settings)
        .spawn(cancel.clone());

    // ── Camera pass-through ───────────────────────────────────────────────
    let camera = CameraFeed::default();
    let camera_task = camera.spawn(
        HttpMjpegSource::new(cfg.camera_stream_url()),
        CAMERA_RETRY,
        cancel.clone(),
    );

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                println!();
                println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C; stop the process externally"),
        }
    });

    // ── Browser-facing server ─────────────────────────────────────────────
    let server = CockpitServer::new(Arc::clone(&link), registry, camera)
        .with_host(host)
        .with_port(cfg.server_port);
    let result = server.run(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = supervisor.await {
        warn!(error = %e, "reconnect supervisor ended abnormally");
    }
    if let Err(e) = camera_task.await {
        warn!(error = %e, "camera feed ended abnormally");
    }
    link.disconnect().await;
    info!("lock link closed");

    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(cfg: &Config) {
    let web = format!("http://{}:{}", cfg.server_host, cfg.server_port);
    println!();
    println!("  {} {}",
        "Door Lock Gateway".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
    println!("  Web interface   {}", web.bold());
    println!("  Video feed      {}", format!("{web}/video_feed").bold());
    println!("  Door lock       {}", cfg.lock_endpoint().bold());
    println!("  Camera          {}", cfg.camera_stream_url().dimmed());
    println!();
    println!("  Press {} to stop.", "Ctrl-C".bold());
    println!();
}
