use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::message::Peer;

/// Prefix of environment overrides, e.g. `TC_LOG_LEVEL=debug` or
/// `TC_TRANSPORT__TRIES_MAXIMUM=5`.
pub const ENV_PREFIX: &str = "TC";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub log_level: String,
    pub listen_addr: SocketAddr,
    /// Known peers as `host:port`.
    pub peers: Vec<String>,
    pub transport: TransportConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: String::from("INFO"),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9999)),
            peers: Vec::new(),
            transport: TransportConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Defaults, overlaid by the file at `path` if given, overlaid by the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn peers(&self) -> Result<Vec<Peer>, ConfigError> {
        self.peers.iter()
            .map(|peer| peer.parse())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Attempts per send. Zero or less disables sending altogether.
    pub tries_maximum: i64,
    pub retry_backoff_ms: u64,
    /// Connect timeout of a send attempt. Platform default when unset.
    pub connect_timeout_ms: Option<u64>,
    pub probe_timeout_ms: u64,
    /// Largest frame accepted inbound or produced outbound.
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tries_maximum: 3,
            retry_backoff_ms: 2_000,
            connect_timeout_ms: None,
            probe_timeout_ms: 5_000,
            max_frame_size: 32 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    #[inline]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    #[inline]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
