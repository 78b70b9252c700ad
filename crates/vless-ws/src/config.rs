//! Server configuration.
//!
//! Loaded from a JSON file, every field optional with the defaults below;
//! the command line may override individual fields afterwards.

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::vless::Uuid;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8226";
const DEFAULT_BUFFER_SIZE: usize = 8192;
const DEFAULT_PUSH_INTERVAL_SECS: i64 = 3600;
const DEFAULT_FIXED_TUNNEL_PATH: &str = "/ws-vless";

/// Fatal at startup: the process refuses to run on a bad configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP/WebSocket listener binds.
    pub listen_addr: SocketAddr,

    /// Users allowed in standalone mode; the control plane may extend the
    /// set at push time.
    pub allow_users: Vec<Uuid>,

    /// Fixed tunnel path served alongside the per-user `/{uuid}` paths.
    /// Requests here carry no path-bound user; the header claim alone is
    /// authorized.
    pub fixed_tunnel_path: String,

    /// Seconds between pushes to the control plane. Values at or below
    /// zero fall back to one hour.
    pub push_interval_secs: i64,

    /// Per-user traffic accounting toggle.
    pub enable_usage_metering: bool,

    /// Capacity of pooled relay buffers, bytes.
    pub buffer_size: usize,

    /// Control plane endpoint for usage pushes; absent means standalone.
    pub register_url: Option<String>,

    /// `Authorization` header value sent with each push.
    pub register_token: Option<String>,

    /// host:port pairs advertised in subscription URLs.
    pub sub_addresses: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.parse().unwrap(),
            allow_users: Vec::new(),
            fixed_tunnel_path: DEFAULT_FIXED_TUNNEL_PATH.to_string(),
            push_interval_secs: DEFAULT_PUSH_INTERVAL_SECS,
            enable_usage_metering: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            register_url: None,
            register_token: None,
            sub_addresses: Vec::new(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Rejects configurations the server cannot meaningfully run with.
    pub fn check_integrity(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be positive".into()));
        }

        if !self.fixed_tunnel_path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "fixed_tunnel_path must start with '/'".into(),
            ));
        }

        if self.allow_users.is_empty() && self.register_url.is_none() {
            return Err(ConfigError::Invalid(
                "no allowed users and no register_url: nobody could ever connect".into(),
            ));
        }

        if self.register_url.is_none() && self.register_token.is_some() {
            return Err(ConfigError::Invalid(
                "register_token set without register_url".into(),
            ));
        }

        Ok(())
    }

    pub fn push_interval(&self) -> Duration {
        if self.push_interval_secs <= 0 {
            return Duration::from_secs(DEFAULT_PUSH_INTERVAL_SECS as u64);
        }
        Duration::from_secs(self.push_interval_secs as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_usable_once_a_user_exists() {
        let mut config = Config::default();
        assert!(config.check_integrity().is_err());

        config.allow_users.push(Uuid::random());
        config.check_integrity().unwrap();

        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.push_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn parses_a_full_document() {
        let json = r#"{
            "listen_addr": "0.0.0.0:8226",
            "allow_users": ["a420aa94-5e8a-415d-9537-484be3774daa"],
            "fixed_tunnel_path": "/tunnel",
            "push_interval_secs": 7200,
            "enable_usage_metering": true,
            "buffer_size": 16384,
            "register_url": "https://cp.example.org/api/node",
            "register_token": "secret",
            "sub_addresses": ["proxy.example.org:443"]
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        config.check_integrity().unwrap();

        assert_eq!(config.allow_users.len(), 1);
        assert_eq!(config.fixed_tunnel_path, "/tunnel");
        assert_eq!(config.buffer_size, 16384);
        assert_eq!(config.push_interval(), Duration::from_secs(7200));
    }

    #[test]
    fn fixed_tunnel_path_defaults_and_must_be_rooted() {
        let mut config = Config::default();
        config.allow_users.push(Uuid::random());
        assert_eq!(config.fixed_tunnel_path, "/ws-vless");
        config.check_integrity().unwrap();

        config.fixed_tunnel_path = "ws-vless".to_string();
        assert!(config.check_integrity().is_err());
    }

    #[test]
    fn nonpositive_interval_falls_back() {
        let config: Config = serde_json::from_str(r#"{"push_interval_secs": -5}"#).unwrap();
        assert_eq!(config.push_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let r: Result<Config, _> = serde_json::from_str(r#"{"listne_addr": "0.0.0.0:1"}"#);
        assert!(r.is_err());
    }
}
