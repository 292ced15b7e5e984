//! Configuration loading: TOML file with environment-variable overrides,
//! modeled on the teacher's `Config::load()` in `config.rs`.

use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use tokio::time::Duration;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7070";
const DEFAULT_ACQ_TIMEOUT_SECS: u64 = 20;
const DEFAULT_HOLD_TIMEOUT_SECS: u64 = 20;

/// Resolved runtime configuration for a [`crate::server::LockServer`].
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub listen_addr: SocketAddr,
    pub secret_key: String,
    pub acq_timeout: Duration,
    pub hold_timeout: Duration,
}

/// On-disk / env-overridable configuration shape.
///
/// Field names use the same dotted style as the CLI flags
/// (`server.port`, `server.secretKey`) so a TOML file and the command
/// line read the same way.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Never logged; only ever read from file/env, never echoed back.
    #[serde(rename = "secretKey", alias = "secret_key")]
    pub secret_key: Option<String>,
    #[serde(rename = "acqTimeoutSecs", alias = "acq_timeout_secs")]
    pub acq_timeout_secs: Option<u64>,
    #[serde(rename = "holdTimeoutSecs", alias = "hold_timeout_secs")]
    pub hold_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogSection {
    pub level: Option<String>,
}

impl ConfigFile {
    /// Load a TOML config file if `path` is given and exists; otherwise
    /// start from an empty (all-default) config. Either way, apply the
    /// `LOCKD_*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
                toml::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?
            }
            Some(path) => {
                anyhow::bail!("config file not found: {}", path.display());
            }
            None => ConfigFile::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("LOCKD_HOST") {
            self.server.host = Some(host);
        }
        if let Ok(port) = std::env::var("LOCKD_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = Some(port);
            } else {
                log::warn!("ignoring malformed LOCKD_PORT value: {port}");
            }
        }
        if let Ok(secret) = std::env::var("LOCKD_SECRET_KEY") {
            self.server.secret_key = Some(secret);
        }
        if let Ok(level) = std::env::var("LOCKD_LOG_LEVEL") {
            self.log.level = Some(level);
        }
    }

    /// Resolve into a fully-populated [`LockConfig`], filling in defaults
    /// for anything left unset. Fails only if `host`/`port` don't combine
    /// into a valid socket address.
    pub fn into_lock_config(self) -> anyhow::Result<LockConfig> {
        let host = self.server.host.unwrap_or_else(|| "0.0.0.0".to_string());
        let addr = match self.server.port {
            Some(port) => format!("{host}:{port}"),
            None => DEFAULT_LISTEN_ADDR.to_string(),
        };
        let listen_addr = addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {addr:?}: {e}"))?;

        Ok(LockConfig {
            listen_addr,
            secret_key: self.server.secret_key.unwrap_or_default(),
            acq_timeout: Duration::from_secs(
                self.server.acq_timeout_secs.unwrap_or(DEFAULT_ACQ_TIMEOUT_SECS),
            ),
            hold_timeout: Duration::from_secs(
                self.server.hold_timeout_secs.unwrap_or(DEFAULT_HOLD_TIMEOUT_SECS),
            ),
        })
    }

    /// The configured log level, defaulting to `info`.
    pub fn log_level(&self) -> String {
        self.log.level.clone().unwrap_or_else(|| "info".to_string())
    }
}
