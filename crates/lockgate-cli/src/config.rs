//! Gateway configuration – reads `~/.lockgate/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lockgate_types::{GatewayError, LinkSettings};
use serde::Deserialize;

const MIN_CONNECT_TIMEOUT: Duration = Duration::from_millis(100);
const MIN_RECEIVE_POLL: Duration = Duration::from_millis(50);
const MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Gateway configuration as read from disk.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Bind address of the browser-facing server.
    #[serde(default = "default_server_host")]
    pub server_host: String,

    /// Bind port of the browser-facing server.
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Address of the door-lock controller.
    #[serde(default = "default_lock_ip")]
    pub lock_ip: String,

    #[serde(default = "default_lock_port")]
    pub lock_port: u16,

    /// WebSocket path on the lock controller.
    #[serde(default = "default_lock_path")]
    pub lock_path: String,

    /// Address of the MJPEG camera.
    #[serde(default = "default_camera_ip")]
    pub camera_ip: String,

    #[serde(default = "default_camera_path")]
    pub camera_path: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// How long each listening step waits for a lock message.
    #[serde(default = "default_receive_poll_ms")]
    pub receive_poll_ms: u64,

    /// Fixed delay between reconnect attempts.
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Write logs to this file instead of stdout.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8000
}
fn default_lock_ip() -> String {
    "192.168.137.122".to_string()
}
fn default_lock_port() -> u16 {
    80
}
fn default_lock_path() -> String {
    "/ws".to_string()
}
fn default_camera_ip() -> String {
    "192.168.137.51".to_string()
}
fn default_camera_path() -> String {
    "/stream".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    3
}
fn default_receive_poll_ms() -> u64 {
    1000
}
fn default_reconnect_interval_secs() -> u64 {
    3
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
            lock_ip: default_lock_ip(),
            lock_port: default_lock_port(),
            lock_path: default_lock_path(),
            camera_ip: default_camera_ip(),
            camera_path: default_camera_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            receive_poll_ms: default_receive_poll_ms(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Config {
    /// WebSocket URL of the lock controller, e.g. `ws://192.168.137.122/ws`.
    pub fn lock_endpoint(&self) -> String {
        let path = with_leading_slash(&self.lock_path);
        if self.lock_port == 80 {
            format!("ws://{}{}", self.lock_ip, path)
        } else {
            format!("ws://{}:{}{}", self.lock_ip, self.lock_port, path)
        }
    }

    pub fn camera_stream_url(&self) -> String {
        format!("http://{}{}", self.camera_ip, with_leading_slash(&self.camera_path))
    }

    /// Timing and endpoint for the upstream link and its supervisor.
    ///
    /// Zero timings would make the supervisor spin, so each is raised to its
    /// floor.
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            endpoint: self.lock_endpoint(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs).max(MIN_CONNECT_TIMEOUT),
            receive_timeout: Duration::from_millis(self.receive_poll_ms).max(MIN_RECEIVE_POLL),
            retry_interval: Duration::from_secs(self.reconnect_interval_secs).max(MIN_RECONNECT_INTERVAL),
        }
    }
}

fn with_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Return the config path: `$LOCKGATE_CONFIG`, else `~/.lockgate/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("LOCKGATE_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".lockgate").join("config.toml")
}

/// Load the config from disk, falling back to defaults when the file is
/// absent. Environment overrides are applied in both cases.
pub fn load() -> Result<Config, GatewayError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, GatewayError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| GatewayError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `LOCKGATE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LOCKGATE_SERVER_PORT` | `server_port` |
/// | `LOCKGATE_LOCK_IP` | `lock_ip` |
/// | `LOCKGATE_LOCK_PORT` | `lock_port` |
/// | `LOCKGATE_CAMERA_IP` | `camera_ip` |
/// | `LOCKGATE_LOG_LEVEL` | `log_level` |
///
/// Unparsable port values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("LOCKGATE_SERVER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.server_port = port;
    }
    if let Ok(v) = std::env::var("LOCKGATE_LOCK_IP") {
        cfg.lock_ip = v;
    }
    if let Ok(v) = std::env::var("LOCKGATE_LOCK_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.lock_port = port;
    }
    if let Ok(v) = std::env::var("LOCKGATE_CAMERA_IP") {
        cfg.camera_ip = v;
    }
    if let Ok(v) = std::env::var("LOCKGATE_LOG_LEVEL") {
        cfg.log_level = v;
    }
}
