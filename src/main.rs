//! Websocket debugging console.
//!
//! Usage:
//!   debug-ws --port 3000 --config-file ./config.json
//!   WS_DEFAULT_URL=wss://echo.example/ws debug-ws --insecure

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use debug_ws::core::{
    ConnectionConfig, DEFAULT_INACTIVITY_TIMEOUT_MS, DEFAULT_KEEP_ALIVE_INTERVAL_MS,
    DEFAULT_KEEP_ALIVE_MESSAGE, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_URL, KeepAliveMode,
    WsTlsConfig,
};
use debug_ws::http::{self, AppState};
use debug_ws::journal::DEFAULT_JOURNAL_CAPACITY;
use debug_ws::session::{ConfigStore, DEFAULT_CONFIG_FILE, SessionArgs, SessionCoordinator};
use debug_ws::transport::TungsteniteTransport;

/// Buffered notifications per push-stream subscriber.
const NOTIFICATION_BUFFER: usize = 1024;

#[derive(Debug, Parser)]
#[command(name = "debug-ws", version, about = "Interactive websocket debugging console")]
struct Args {
    /// Port for the HTTP control surface.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Where the connection settings are saved between runs.
    #[arg(long, env = "WS_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Journal entries kept in memory; at least 1.
    #[arg(long, default_value_t = DEFAULT_JOURNAL_CAPACITY, value_parser = parse_capacity)]
    journal_capacity: usize,

    #[arg(long, env = "WS_DEFAULT_URL", default_value = DEFAULT_URL)]
    default_url: String,

    /// Keep-alive interval in milliseconds.
    #[arg(long, env = "WS_DEFAULT_KEEPALIVE_INTERVAL", default_value_t = DEFAULT_KEEP_ALIVE_INTERVAL_MS)]
    keep_alive_interval: u64,

    #[arg(long, env = "WS_DEFAULT_KEEPALIVE_MESSAGE", default_value = DEFAULT_KEEP_ALIVE_MESSAGE)]
    keep_alive_message: String,

    /// `message` or `protocol-ping`.
    #[arg(long, env = "WS_DEFAULT_KEEPALIVE_MODE", default_value = "message", value_parser = parse_mode)]
    keep_alive_mode: KeepAliveMode,

    /// Inactivity timeout in milliseconds; 0 disables the watchdog.
    #[arg(long, env = "WS_DEFAULT_IDLE_TIMEOUT", default_value_t = DEFAULT_INACTIVITY_TIMEOUT_MS)]
    idle_timeout: u64,

    /// Largest payload or file accepted for sending, in bytes.
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_PAYLOAD_BYTES)]
    max_file_size: usize,

    /// Skip TLS certificate validation for wss:// targets.
    #[arg(long, env = "WS_INSECURE_TLS")]
    insecure: bool,
}

fn parse_mode(raw: &str) -> Result<KeepAliveMode, String> {
    match raw {
        "message" => Ok(KeepAliveMode::Message),
        "protocol-ping" | "ping" => Ok(KeepAliveMode::ProtocolPing),
        other => Err(format!("unknown keep-alive mode: {other}")),
    }
}

fn parse_capacity(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("journal capacity must be at least 1".to_string()),
        Ok(capacity) => Ok(capacity),
        Err(err) => Err(err.to_string()),
    }
}

impl Args {
    fn connection_defaults(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.default_url.clone(),
            keep_alive_interval: self.keep_alive_interval,
            keep_alive_mode: self.keep_alive_mode,
            keep_alive_message: self.keep_alive_message.clone(),
            inactivity_timeout: self.idle_timeout,
            max_payload_bytes: self.max_file_size,
            ..ConnectionConfig::default()
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let no_color = std::env::var("NO_COLOR").is_ok()
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "debug-ws starting");

    let defaults = args.connection_defaults();
    defaults
        .validate()
        .context("invalid connection defaults")?;

    let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
    let session = SessionCoordinator::start(SessionArgs {
        defaults,
        transport: TungsteniteTransport::default(),
        tls: WsTlsConfig {
            validate_certs: !args.insecure,
        },
        store: ConfigStore::file(args.config_file.clone()),
        journal_capacity: args.journal_capacity,
        sink: Arc::new(notifications.clone()),
    })
    .await;
    if args.insecure {
        warn!("TLS certificate validation is disabled");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.bind, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;

    let state = AppState {
        session: session.clone(),
        notifications,
        max_upload_bytes: args.max_file_size,
    };
    http::serve(listener, state, shutdown_signal()).await?;

    session.shutdown().await;
    info!("debug-ws stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_capacity_must_be_positive() {
        assert_eq!(parse_capacity("250"), Ok(250));
        assert!(parse_capacity("0").is_err());
        assert!(parse_capacity("-1").is_err());

        let err = Args::try_parse_from(["debug-ws", "--journal-capacity", "0"])
            .expect_err("zero capacity");
        assert!(err.to_string().contains("at least 1"));
        let args = Args::try_parse_from(["debug-ws"]).expect("defaults");
        assert_eq!(args.journal_capacity, DEFAULT_JOURNAL_CAPACITY);
    }

    #[test]
    fn keep_alive_mode_accepts_the_short_alias() {
        assert_eq!(parse_mode("ping"), Ok(KeepAliveMode::ProtocolPing));
        assert!(parse_mode("pong").is_err());
    }
}
