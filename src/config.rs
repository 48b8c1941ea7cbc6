//! Connector configuration.
//!
//! Unlike the camera-deployment protocols this connector drives, the
//! connector itself takes no config *file* (spec §6: CLI surface is "none
//! required by the core"). Configuration is defaults overridable by the
//! three documented environment variables, read the same defensive way the
//! teacher's `load_config` reads `key=value` lines: an unparsable override
//! falls back to the compiled-in default rather than failing startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{ConnectorError, Result};

/// Default listen address: IPv4 loopback only (spec §3, §6).
const DEFAULT_LISTEN: &str = "127.0.0.1:9876";

/// Default firmware floor below which a camera is flagged unsupported.
const DEFAULT_MIN_FIRMWARE: &str = "11.11.0";

/// Standard-client request timeout (spec §4.3, §5).
pub const STANDARD_TIMEOUT_SECS: u64 = 30;
/// Upload-client request timeout (spec §4.4, §5).
pub const UPLOAD_TIMEOUT_SECS: u64 = 180;
/// Transport-retry back-off schedule, fixed (spec §4.3).
pub const RETRY_BACKOFF_SECS: [u64; 3] = [1, 2, 3];
/// Maximum total time budget for the transport retry loop, excluding the
/// per-attempt timeout itself (spec §4.3).
pub const RETRY_BUDGET_SECS: u64 = 6;

/// Default worker count for a scan session (spec §4.6 "default 20, max 30").
pub const DEFAULT_WORKERS: usize = 20;
pub const MAX_WORKERS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intensity {
    Conservative,
    Balanced,
    Aggressive,
}

impl Intensity {
    /// Worker-count mapping — an implementation choice left open by spec §9;
    /// resolution recorded in DESIGN.md.
    pub fn worker_count(self) -> usize {
        match self {
            Self::Conservative => 10,
            Self::Balanced => DEFAULT_WORKERS,
            Self::Aggressive => MAX_WORKERS,
        }
    }
}

impl Default for Intensity {
    fn default() -> Self {
        Self::Balanced
    }
}

/// Full connector configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Listen address for the connector's own loopback socket.
    pub listen: SocketAddr,
    /// Origins allowed through the gate in §4.5.
    pub allowed_origins: Vec<String>,
    /// Semver-style firmware floor (spec §4.7).
    pub min_firmware: String,
    /// Path to the certificate pinning store (spec §4.2).
    pub cert_store_path: PathBuf,
    /// Path to the connector's log file, if file logging is enabled.
    pub log_file: Option<PathBuf>,
}

impl ConnectorConfig {
    /// Build configuration from compiled-in defaults overridden by
    /// `ANAVA_CONNECTOR_LISTEN`, `ANAVA_CONNECTOR_ORIGINS`, and
    /// `ANAVA_CONNECTOR_MIN_FIRMWARE` (spec §6).
    pub fn from_env() -> Result<Self> {
        let listen = match std::env::var("ANAVA_CONNECTOR_LISTEN") {
            Ok(v) => v
                .parse()
                .map_err(|e| ConnectorError::Parse(format!("ANAVA_CONNECTOR_LISTEN: {e}")))?,
            Err(_) => DEFAULT_LISTEN.parse().expect("default listen addr parses"),
        };

        let allowed_origins = match std::env::var("ANAVA_CONNECTOR_ORIGINS") {
            Ok(v) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => default_origins(),
        };

        let min_firmware = std::env::var("ANAVA_CONNECTOR_MIN_FIRMWARE")
            .unwrap_or_else(|_| DEFAULT_MIN_FIRMWARE.to_string());

        let cert_store_path = cert_store_default_path();
        let log_file = default_log_path();

        Ok(Self {
            listen,
            allowed_origins,
            min_firmware,
            cert_store_path,
            log_file,
        })
    }
}

/// The web-app origin plus the localhost development origins mentioned in
/// spec §3 ("typically the web-app origin plus localhost development
/// origins").
fn default_origins() -> Vec<String> {
    vec![
        "https://app.anava.ai".to_string(),
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

/// Resolve `$HOME/.local/share/anava-connector` (or the Windows/macOS
/// equivalent env vars), falling back to the current directory — the
/// teacher never depends on a path-resolution crate, so this stays plain
/// `std::env` lookups rather than pulling in `directories`.
fn user_data_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("anava-connector");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("anava-connector");
    }
    if let Ok(appdata) = std::env::var("APPDATA") {
        return PathBuf::from(appdata).join("anava-connector");
    }
    PathBuf::from(".anava-connector")
}

fn cert_store_default_path() -> PathBuf {
    user_data_dir().join("cert-pins.json")
}

fn default_log_path() -> Option<PathBuf> {
    Some(user_data_dir().join("connector.log"))
}
