//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use parley_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Shared secret presented by the identity gateway as a bearer token.
    /// Env: `GATEWAY_TOKEN`
    /// Default: empty (caller headers are trusted as-is).
    pub gateway_token: Option<String>,

    /// Sustained requests per second per client.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Bucket capacity per client.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,

    /// Interval of the expired typing indicator sweep.
    /// Env: `TYPING_SWEEP_SECS`
    pub typing_sweep_secs: u64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley"`
    pub instance_name: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("gateway_token", &self.gateway_token.as_ref().map(|_| "<redacted>"))
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("typing_sweep_secs", &self.typing_sweep_secs)
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            gateway_token: None,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            typing_sweep_secs: 30,
            instance_name: "Parley".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            parse_into(&mut config.http_addr, "HTTP_ADDR", &addr);
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(token) = lookup("GATEWAY_TOKEN") {
            if !token.is_empty() {
                config.gateway_token = Some(token);
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_PER_SEC") {
            parse_positive(&mut config.rate_limit_per_sec, "RATE_LIMIT_PER_SEC", &val);
        }

        if let Some(val) = lookup("RATE_LIMIT_BURST") {
            parse_positive(&mut config.rate_limit_burst, "RATE_LIMIT_BURST", &val);
        }

        if let Some(val) = lookup("TYPING_SWEEP_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.typing_sweep_secs = n,
                _ => tracing::warn!(value = %val, "Invalid TYPING_SWEEP_SECS, using default"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(value = %value, "Invalid {key}, using default"),
    }
}

fn parse_positive(slot: &mut f64, key: &str, value: &str) {
    match value.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n > 0.0 => *slot = n,
        _ => tracing::warn!(value = %value, "Invalid {key}, using default"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.gateway_token.is_none());
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/var/lib/parley/chat.db"),
            ("GATEWAY_TOKEN", "s3cret"),
            ("RATE_LIMIT_BURST", "5"),
            ("INSTANCE_NAME", "team chat"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/parley/chat.db"))
        );
        assert_eq!(config.gateway_token.as_deref(), Some("s3cret"));
        assert_eq!(config.rate_limit_burst, 5.0);
        assert_eq!(config.instance_name, "team chat");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = load(&[
            ("HTTP_ADDR", "not an address"),
            ("RATE_LIMIT_PER_SEC", "-3"),
            ("TYPING_SWEEP_SECS", "0"),
            ("GATEWAY_TOKEN", ""),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.rate_limit_per_sec, defaults.rate_limit_per_sec);
        assert_eq!(config.typing_sweep_secs, defaults.typing_sweep_secs);
        assert!(config.gateway_token.is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = load(&[("GATEWAY_TOKEN", "s3cret")]);
        assert!(!format!("{config:?}").contains("s3cret"));
    }
}
