//! socksgate - SOCKS5 proxy server
//!
//! Binary entry point: flag parsing, logging setup, and signal-driven
//! shutdown around the library server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use socksgate::{PasswordAuth, Server, ServerConfig, SocksError};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// socksgate - SOCKS5 proxy server (RFC 1928 / RFC 1929)
#[derive(Parser, Debug)]
#[command(name = "socksgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:1080")]
    listen: String,

    /// Require username/password authentication with this username
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Password for username/password authentication
    #[arg(long, requires = "username")]
    password: Option<String>,

    /// UDP relay reply deadline in seconds
    #[arg(long, default_value_t = 5)]
    udp_timeout: u64,

    /// Shutdown drain deadline in seconds
    #[arg(long, default_value_t = 30)]
    shutdown_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_log)?;

    let mut config =
        ServerConfig::new().with_udp_reply_timeout(Duration::from_secs(args.udp_timeout));
    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        config = config.with_auth(Arc::new(PasswordAuth::new(username, password)));
    }

    info!("socksgate v{}", socksgate::VERSION);
    info!("listening on: {}", args.listen);

    let server = Arc::new(Server::new(config));

    // Handle Ctrl+C and termination signals (cross-platform)
    let shutdown_server = Arc::clone(&server);
    let shutdown_timeout = Duration::from_secs(args.shutdown_timeout);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On Windows, only handle Ctrl+C
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        if let Err(err) = shutdown_server.shutdown(shutdown_timeout).await {
            info!("shutdown: {err}");
        }
    });

    match server.listen_and_serve(args.listen.as_str()).await {
        Ok(()) | Err(SocksError::ServerClosed) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
