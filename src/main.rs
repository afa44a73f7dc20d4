//! ttyrelay - terminal session relay
//!
//! Accepts downstream WebSocket clients on `--bind`, gates them behind a
//! shared password and relays their session events over one persistent
//! connection to the terminal backend at `--backend`.

use clap::Parser as ClapParser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ttyrelay::{
    config::{ConfigOverrides, FileConfig, RelayConfig},
    relay::{Relay, RelayError},
    shutdown::Shutdown,
};

/// ttyrelay - terminal session relay
///
/// Multiplexes password-authenticated WebSocket clients onto a single
/// upstream connection to a terminal backend.
#[derive(ClapParser, Debug)]
#[command(name = "ttyrelay", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file; flags and environment override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the downstream WebSocket server
    #[arg(long, env = "TTYRELAY_BIND")]
    bind: Option<SocketAddr>,

    /// Terminal backend address (host:port or ws:// / wss:// URL)
    #[arg(long, env = "TTYRELAY_BACKEND")]
    backend: Option<String>,

    /// Shared password clients must present
    #[arg(long, env = "TTYRELAY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Delay between upstream reconnect attempts, in milliseconds
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// Maximum concurrent downstream connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Origin allowed to open WebSocket connections (repeatable)
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,
}

impl Cli {
    fn into_parts(self) -> (Option<PathBuf>, ConfigOverrides) {
        let overrides = ConfigOverrides {
            bind: self.bind,
            backend: self.backend,
            password: self.password,
            reconnect_delay_ms: self.reconnect_delay_ms,
            max_connections: self.max_connections,
            allowed_origins: self.allowed_origins,
        };
        (self.config, overrides)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "ttyrelay exiting");
            eprintln!("ttyrelay: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ttyrelay=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(cli: Cli) -> Result<(), RelayError> {
    let (config_path, overrides) = cli.into_parts();
    let file = config_path
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = RelayConfig::resolve(file, overrides)?;

    tracing::info!(
        bind = %config.bind,
        backend = %config.backend_url,
        reconnect_delay_ms = config.reconnect_delay.as_millis() as u64,
        max_connections = config.max_connections,
        "starting relay"
    );

    let bound = Relay::new(config).bind().await?;
    let shutdown = bound.shutdown_handle();
    tokio::spawn(wait_for_signal(shutdown));
    bound.serve().await
}

async fn wait_for_signal(shutdown: Shutdown) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("received Ctrl+C"),
                    _ = term.recv() => tracing::info!("received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("received Ctrl+C");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received Ctrl+C");
    }
    shutdown.trigger();
}
