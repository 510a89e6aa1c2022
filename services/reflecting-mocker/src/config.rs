//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Each `[[endpoints]]` entry describes one reflecting endpoint bound either to
//! a TCP port (`[endpoints.tcp]`) or to a Unix socket (`[endpoints.unix]`).

use crate::endpoint::{Transport, check_base_path};
use axum::http::HeaderValue;
use handler::FaultFlags;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Env var overriding `[admin] listen_addr`
pub const ADMIN_ADDR_ENV: &str = "REFLECTOR_ADMIN_ADDR";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: Option<AdminConfig>,
    pub endpoints: Vec<EndpointConfig>,
}

/// Limits shared by all endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Concurrent requests per endpoint
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_body_bytes: default_max_body_bytes(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

/// Control plane listener
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub listen_addr: SocketAddr,
}

/// One reflecting endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    /// Prefix the endpoint is mounted under
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default)]
    pub tcp: Option<TcpConfig>,
    #[serde(default)]
    pub unix: Option<UnixConfig>,
    /// Fault flags the endpoint starts with (and resets to)
    #[serde(default)]
    pub faults: FaultFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpConfig {
    pub port: u16,
    /// Bind address; all interfaces when absent
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnixConfig {
    pub path: PathBuf,
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_base_path() -> String {
    "/".to_string()
}

impl EndpointConfig {
    /// The listener this endpoint binds to. Exactly one of `tcp`/`unix` must be set.
    pub fn transport(&self) -> common::Result<Transport> {
        match (&self.tcp, &self.unix) {
            (Some(tcp), None) => Ok(Transport::Tcp {
                port: tcp.port,
                ip: tcp.ip,
            }),
            (None, Some(unix)) => Ok(Transport::Unix {
                path: unix.path.clone(),
            }),
            (Some(_), Some(_)) => Err(common::Error::Config(format!(
                "endpoint `{}` sets both [tcp] and [unix]",
                self.id
            ))),
            (None, None) => Err(common::Error::Config(format!(
                "endpoint `{}` needs either [tcp] or [unix]",
                self.id
            ))),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, validate it, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.server.max_body_bytes == 0 {
            return Err(common::Error::Config(
                "max_body_bytes must be greater than 0".into(),
            ));
        }
        if config.server.drain_timeout_secs == 0 {
            return Err(common::Error::Config(
                "drain_timeout_secs must be greater than 0".into(),
            ));
        }
        if config.endpoints.is_empty() {
            return Err(common::Error::Config(
                "at least one [[endpoints]] entry is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for endpoint in &mut config.endpoints {
            if endpoint.id.trim().is_empty() {
                return Err(common::Error::Config("endpoint id must not be empty".into()));
            }
            if !seen.insert(endpoint.id.clone()) {
                return Err(common::Error::Config(format!(
                    "duplicate endpoint id `{}`",
                    endpoint.id
                )));
            }
            endpoint.transport()?;

            if let Err(reason) = check_base_path(&endpoint.base_path) {
                return Err(common::Error::Config(format!(
                    "endpoint `{}`: {reason}",
                    endpoint.id
                )));
            }
            let trimmed = endpoint.base_path.trim_end_matches('/');
            endpoint.base_path = if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            };

            if endpoint.faults.always_redirect && endpoint.faults.redirect_target.is_empty() {
                return Err(common::Error::Config(format!(
                    "endpoint `{}`: always_redirect requires a redirect_target",
                    endpoint.id
                )));
            }
            if HeaderValue::from_str(&endpoint.faults.redirect_target).is_err() {
                return Err(common::Error::Config(format!(
                    "endpoint `{}`: redirect_target is not a valid header value",
                    endpoint.id
                )));
            }
        }

        if let Ok(addr) = std::env::var(ADMIN_ADDR_ENV) {
            let listen_addr = addr.parse().map_err(|e| {
                common::Error::Config(format!("{ADMIN_ADDR_ENV} is not a socket address: {e}"))
            })?;
            config.admin = Some(AdminConfig { listen_addr });
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("reflecting-mocker.toml")
    }
}
