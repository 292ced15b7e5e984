//! `lockd` - network-accessible named-mutex coordination server.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use lockd::{ConfigFile, LockServer};

/// Network-accessible named-mutex coordination service.
#[derive(Debug, Parser)]
#[command(name = "lockd", version, about)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the listening socket to.
    #[arg(long = "server.host")]
    server_host: Option<String>,

    /// Port to bind the listening socket to.
    #[arg(long = "server.port")]
    server_port: Option<u16>,

    /// Shared secret clients must present in their initial `Auth` frame.
    #[arg(long = "server.secretKey", env = "LOCKD_SECRET_KEY")]
    server_secret_key: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long = "log.level")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config_file = ConfigFile::load(cli.config.as_deref())?;
    if let Some(host) = cli.server_host {
        config_file.server.host = Some(host);
    }
    if let Some(port) = cli.server_port {
        config_file.server.port = Some(port);
    }
    if let Some(secret) = cli.server_secret_key {
        config_file.server.secret_key = Some(secret);
    }
    if let Some(level) = cli.log_level {
        config_file.log.level = Some(level);
    }

    let log_level = config_file.log_level();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&log_level)).init();

    let config = config_file.into_lock_config()?;
    if config.secret_key.is_empty() {
        log::warn!("no secret key configured; clients can authenticate with an empty Auth body");
    }

    let server = LockServer::new(std::sync::Arc::new(config));
    let (addr, mut handle) = server.start().await?;
    log::info!("lockd listening on {addr}");

    tokio::select! {
        res = &mut handle => {
            match res {
                Ok(()) => log::error!("accept loop exited unexpectedly"),
                Err(e) => log::error!("accept loop task panicked: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("received shutdown signal, draining in-flight sessions");
            server.shutdown(handle).await;
            log::info!("all sessions drained, exiting");
        }
    }

    Ok(())
}
