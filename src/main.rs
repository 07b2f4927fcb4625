//! Socksd - SOCKS5 proxy server
//!
//! This is the main entry point for the Socksd application.

use anyhow::{Context, Result};
use clap::Parser;
use socksd::config::{load_config, ServerConfig, UserConfig};
use socksd::{Server, ServerOptions, SocksdError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Socksd - SOCKS5 proxy server with CONNECT, BIND and UDP ASSOCIATE
#[derive(Parser, Debug)]
#[command(name = "socksd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(long)]
    listen: Option<String>,

    /// Require this username (with --password)
    #[arg(short, long, requires = "password")]
    username: Option<String>,

    /// Password for --username
    #[arg(short, long, requires = "username")]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    let config = build_config(&args)?;
    let listen = config.listen_addr()?;
    let shutdown_timeout = config.shutdown_timeout();

    info!("Socksd v{}", socksd::VERSION);
    if let Some(path) = &args.config {
        info!("Configuration loaded from: {:?}", path);
    }

    let server = Arc::new(Server::new(ServerOptions::from_config(&config)?));

    let serving = server.clone();
    let mut serve = tokio::spawn(async move { serving.listen_and_serve(listen).await });

    tokio::select! {
        result = &mut serve => {
            return finish(result.context("Server task failed")?);
        }
        result = shutdown_signal() => {
            result?;
        }
    }

    let outcome = server.shutdown(shutdown_timeout).await;
    finish(serve.await.context("Server task failed")?)?;
    outcome.map_err(Into::into)
}

/// Merge the configuration file with command line overrides
fn build_config(args: &Args) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?.server,
        None => ServerConfig::default(),
    };

    if let Some(listen) = &args.listen {
        config.listen = listen.clone();
    }

    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        config.socks.auth_required = true;
        config.socks.users = vec![UserConfig {
            username: username.clone(),
            password: password.clone(),
        }];
    }

    config.validate()?;
    Ok(config)
}

/// `serve` only returns `ServerClosed` after a requested shutdown
fn finish(result: Result<(), SocksdError>) -> Result<()> {
    match result {
        Ok(()) | Err(SocksdError::ServerClosed) => Ok(()),
        Err(e) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
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
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
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

    // RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
