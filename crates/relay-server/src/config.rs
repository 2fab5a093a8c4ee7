//! Layered file + environment configuration (§4.K).
//!
//! A TOML file is read first (if present), then `RELAY_*` environment
//! variables override individual fields. Soft violations are clamped
//! with a warning rather than refusing to start, matching this
//! codebase's existing config-validation posture.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// HTTP/WebSocket bind address.
    pub bind_addr: String,
    /// Shared store connection URL (`redis://host:port/db`).
    pub store_url: String,
    /// Per-operation deadline against the shared store, in seconds.
    pub store_timeout_secs: u64,
    /// TTL applied to every room-scoped key, in seconds.
    pub room_ttl_secs: u64,
    /// Default room capacity when an init frame omits `limit`.
    pub default_room_limit: u32,
    /// Per-IP WebSocket upgrade rate limit (requests per second).
    pub rate_limit_per_sec: u32,
    /// Pub/sub channel used for cross-instance fan-out.
    pub pubsub_channel: String,
    /// Key prefix under which room-scoped store keys are namespaced.
    pub room_key_prefix: String,
    /// Log format: `"text"` or `"json"`.
    pub log_format: String,
    /// Optional path to additionally write logs to, beyond stderr.
    pub log_file: Option<String>,
}

const MIN_ROOM_TTL_SECS: u64 = 10;
const MAX_ROOM_LIMIT: u32 = 64;

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            store_url: "redis://127.0.0.1:6379/0".to_string(),
            store_timeout_secs: 2,
            room_ttl_secs: 24 * 60 * 60,
            default_room_limit: 10,
            rate_limit_per_sec: 20,
            pubsub_channel: "relay:signals".to_string(),
            room_key_prefix: "room".to_string(),
            log_format: "text".to_string(),
            log_file: None,
        }
    }
}

impl RelayConfig {
    /// Load from an optional TOML file, then apply `RELAY_*` environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        config.validate();
        Ok(config)
    }

    /// Default config file location (platform config dir / `relay.toml`),
    /// used when `--config` is not passed.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("signal-relay").join("relay.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("RELAY_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = env::var("RELAY_STORE_URL") {
            self.store_url = v;
        }
        if let Ok(v) = env::var("RELAY_STORE_TIMEOUT_SECS").ok().and_then(|s| s.parse().ok()) {
            self.store_timeout_secs = v;
        }
        if let Ok(v) = env::var("RELAY_ROOM_TTL_SECS").ok().and_then(|s| s.parse().ok()) {
            self.room_ttl_secs = v;
        }
        if let Ok(v) = env::var("RELAY_DEFAULT_ROOM_LIMIT").ok().and_then(|s| s.parse().ok()) {
            self.default_room_limit = v;
        }
        if let Ok(v) = env::var("RELAY_RATE_LIMIT_PER_SEC").ok().and_then(|s| s.parse().ok()) {
            self.rate_limit_per_sec = v;
        }
        if let Ok(v) = env::var("RELAY_PUBSUB_CHANNEL") {
            self.pubsub_channel = v;
        }
        if let Ok(v) = env::var("RELAY_ROOM_KEY_PREFIX") {
            self.room_key_prefix = v;
        }
        if let Ok(v) = env::var("RELAY_LOG_FORMAT") {
            self.log_format = v;
        }
        if let Ok(v) = env::var("RELAY_LOG_FILE") {
            self.log_file = Some(v);
        }
    }

    /// Clamp soft violations instead of refusing to start.
    pub fn validate(&mut self) {
        if self.room_ttl_secs < MIN_ROOM_TTL_SECS {
            tracing::warn!(
                "room_ttl_secs {} below minimum {}, clamping",
                self.room_ttl_secs,
                MIN_ROOM_TTL_SECS
            );
            self.room_ttl_secs = MIN_ROOM_TTL_SECS;
        }
        if self.default_room_limit == 0 || self.default_room_limit > MAX_ROOM_LIMIT {
            tracing::warn!(
                "default_room_limit {} out of range, clamping to {}",
                self.default_room_limit,
                MAX_ROOM_LIMIT
            );
            self.default_room_limit = self.default_room_limit.clamp(1, MAX_ROOM_LIMIT);
        }
        if self.bind_addr.parse::<SocketAddr>().is_err() {
            tracing::warn!("invalid bind_addr '{}', falling back to default", self.bind_addr);
            self.bind_addr = Self::default().bind_addr;
        }
        if self.pubsub_channel.is_empty() {
            tracing::warn!("empty pubsub_channel, falling back to default");
            self.pubsub_channel = Self::default().pubsub_channel;
        }
        if self.room_key_prefix.is_empty() {
            tracing::warn!("empty room_key_prefix, falling back to default");
            self.room_key_prefix = Self::default().room_key_prefix;
        }
        if self.store_timeout_secs == 0 {
            self.store_timeout_secs = Self::default().store_timeout_secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_fields() {
        let mut config = RelayConfig {
            room_ttl_secs: 1,
            default_room_limit: 0,
            bind_addr: "not-an-addr".into(),
            pubsub_channel: String::new(),
            room_key_prefix: String::new(),
            ..RelayConfig::default()
        };
        config.validate();
        assert_eq!(config.room_ttl_secs, MIN_ROOM_TTL_SECS);
        assert_eq!(config.default_room_limit, 1);
        assert_eq!(config.bind_addr, RelayConfig::default().bind_addr);
        assert_eq!(config.pubsub_channel, RelayConfig::default().pubsub_channel);
        assert_eq!(config.room_key_prefix, RelayConfig::default().room_key_prefix);
    }

    #[test]
    fn accepts_well_formed_config() {
        let mut config = RelayConfig::default();
        config.validate();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
    }
}
