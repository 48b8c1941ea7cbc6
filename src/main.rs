//! Axis camera connector daemon.
//!
//! Runs as a foreground process managed by the OS service manager (spec
//! §4.5, §6); takes no required CLI arguments.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;

use axis_connector::config::ConnectorConfig;
use axis_connector::{server, ConnectorContext};
use clap::Parser;
use log::{error, info, LevelFilter, Metadata, Record};

#[derive(Debug, Parser)]
#[command(name = "axis-connector", about = "Localhost HTTP bridge for Axis camera discovery and deployment")]
struct Cli {
    /// Override the default log file path (mode 0600 either way).
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Disable file logging entirely; stderr only.
    #[arg(long)]
    no_log_file: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConnectorConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("axis-connector: configuration error: {e}");
            process::exit(2);
        }
    };

    let log_file = if cli.no_log_file {
        None
    } else {
        cli.log_file.or_else(|| config.log_file.clone())
    };

    if let Err(e) = setup_logging(log_file.as_deref()) {
        eprintln!("axis-connector: failed to set up logging: {e}");
        process::exit(1);
    }

    info!("axis-connector starting, listen={}", config.listen);
    log_network_diagnostics();

    let ctx = match ConnectorContext::build(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("fatal startup error: {e}");
            process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(ctx.config.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!("cannot bind {}: {e}", ctx.config.listen);
            process::exit(1);
        }
    };

    let router = server::build_router(ctx);
    let make_service = router.into_make_service_with_connect_info::<std::net::SocketAddr>();

    if let Err(e) = axum::serve(listener, make_service).with_graceful_shutdown(shutdown_signal()).await {
        error!("server loop exited with error: {e}");
        process::exit(1);
    }

    info!("axis-connector shut down cleanly");
}

/// Logs one diagnostic record of local network interfaces at startup, and
/// if `ANAVA_CONNECTOR_LAST_SCAN_TARGET` names a host from a prior scan,
/// attempts a best-effort TCP dial, logging success/failure only — never
/// fatal (spec §4.5).
fn log_network_diagnostics() {
    let own_ip = axis_connector::util::get_own_ip();
    let gateway = axis_connector::util::get_default_gateway();
    info!("local interfaces: own_ip={own_ip} gateway={gateway}");

    if let Ok(target) = std::env::var("ANAVA_CONNECTOR_LAST_SCAN_TARGET") {
        tokio::spawn(async move {
            match tokio::time::timeout(std::time::Duration::from_secs(2), tokio::net::TcpStream::connect(&target)).await {
                Ok(Ok(_)) => info!("startup dial to last scan target {target}: reachable"),
                Ok(Err(e)) => info!("startup dial to last scan target {target}: unreachable ({e})"),
                Err(_) => info!("startup dial to last scan target {target}: timed out"),
            }
        });
    }
}

/// Waits for SIGINT or SIGTERM (spec §6 "exits 0 on clean shutdown").
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// A small `log::Log` that writes formatted lines to stderr and, if
/// configured, duplicates them to a 0600 log file — a generalization of the
/// teacher's syslog-vs-stderr switch to "stderr (+ optional file)" (spec
/// §6 AMBIENT logging notes).
struct TeeLogger {
    level: LevelFilter,
    file: Option<Mutex<std::fs::File>>,
}

impl log::Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {:<5} [{}] {}\n",
            chrono::Utc::now().to_rfc3339(),
            record.level(),
            record.target(),
            record.args()
        );
        eprint!("{line}");
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = f.write_all(line.as_bytes());
            }
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn parse_level(value: &str) -> LevelFilter {
    match value.to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn setup_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = std::env::var("RUST_LOG").map(|v| parse_level(&v)).unwrap_or(LevelFilter::Info);

    match log_file {
        None => {
            env_logger::Builder::from_default_env().filter_level(level).init();
        }
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
            }
            let logger = TeeLogger { level, file: Some(Mutex::new(file)) };
            log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;
        }
    }

    Ok(())
}
