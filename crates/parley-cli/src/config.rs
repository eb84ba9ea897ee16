//! `parley.toml` loading.
//!
//! Every section and field is optional; a missing file yields the defaults.

use parley_core::{BridgeConfig, ParleyError, ParleyResult};
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL users open to reach the feedback page. Derived from host
    /// and port when unset.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}

impl ServerConfig {
    /// Address to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured public URL, or `http://host:port`.
    pub fn public_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind_addr()),
        }
    }
}

/// Read and parse a TOML config file.
pub fn parse_config(path: &Path) -> ParleyResult<ParleyConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ParleyError::Config(format!("Failed to read config '{}': {e}", path.display()))
    })?;
    let config: ParleyConfig = toml::from_str(&content).map_err(|e| {
        ParleyError::Config(format!("Failed to parse config '{}': {e}", path.display()))
    })?;
    validate(&config)?;
    Ok(config)
}

/// Like [`parse_config`], but a file that does not exist yields defaults.
pub fn load_config(path: &Path) -> ParleyResult<ParleyConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(ParleyConfig::default());
    }
    parse_config(path)
}

fn validate(config: &ParleyConfig) -> ParleyResult<()> {
    let bridge = &config.bridge;
    if bridge.outbound_capacity < parley_session::MIN_OUTBOUND_CAPACITY {
        return Err(ParleyError::Config(format!(
            "bridge.outbound_capacity must be at least {}",
            parley_session::MIN_OUTBOUND_CAPACITY
        )));
    }
    if bridge.inbound_capacity == 0 {
        return Err(ParleyError::Config(
            "bridge.inbound_capacity must be at least 1".into(),
        ));
    }
    if bridge.default_timeout_secs == 0 {
        return Err(ParleyError::Config(
            "bridge.default_timeout_secs must be positive".into(),
        ));
    }
    Ok(())
}
