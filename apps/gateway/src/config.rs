//! Gateway server configuration

use std::env;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use murmur_shared_config::{get_env_or_default, CommonConfig, Environment, WebSocketConfig};

/// Header carrying the authenticated caller identity when none is configured
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";

/// Gateway configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with other services
    pub common: CommonConfig,

    /// Server port (default: 8080)
    pub port: u16,

    /// Request header set by the upstream authenticator (default: x-user-id)
    pub identity_header: HeaderName,

    /// Real-time hub tuning
    pub websocket: WebSocketConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let common = CommonConfig::from_env().context("Failed to load common config")?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .context("Invalid PORT value")?;

        let identity_header = get_env_or_default("WS_IDENTITY_HEADER", DEFAULT_IDENTITY_HEADER);
        let identity_header = HeaderName::from_bytes(identity_header.trim().as_bytes())
            .with_context(|| format!("Invalid WS_IDENTITY_HEADER value '{}'", identity_header))?;

        let websocket = WebSocketConfig::from_env().context("Invalid WebSocket configuration")?;

        Ok(Self {
            common,
            port,
            identity_header,
            websocket,
        })
    }

    /// Log settings that are accepted but worth flagging
    pub fn warn_suspicious(&self) {
        let ws = &self.websocket;

        if ws.connection_timeout < ws.heartbeat_interval {
            tracing::warn!(
                connection_timeout_ms = ws.connection_timeout.as_millis() as u64,
                heartbeat_interval_ms = ws.heartbeat_interval.as_millis() as u64,
                "Connection timeout is shorter than the heartbeat interval; \
                 idle clients may be evicted between pings"
            );
        }

        if ws.enable_compression {
            tracing::warn!(
                level = ws.compression_level,
                "Compression is recorded per session but not negotiated by this transport"
            );
        }

        if ws.read_buffer_size != WebSocketConfig::default().read_buffer_size {
            tracing::warn!(
                read_buffer_size = ws.read_buffer_size,
                "Read buffer size is recorded but not applied by this transport"
            );
        }

        if ws.enable_cluster || ws.enable_message_queue {
            tracing::info!(
                cluster = ws.enable_cluster,
                node_id = ws.cluster_node_id.as_deref().unwrap_or(""),
                message_queue = ws.enable_message_queue,
                "Cluster and external queue settings are reserved and have no effect"
            );
        }
    }

    /// Get environment mode
    pub fn environment(&self) -> Environment {
        self.common.environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[test]
    fn test_defaults() {
        temp_env::with_vars_unset(
            ["PORT", "WS_IDENTITY_HEADER", "WS_SHARD_COUNT", "ENVIRONMENT"],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.port, 8080);
                assert_eq!(config.identity_header.as_str(), DEFAULT_IDENTITY_HEADER);
                assert_eq!(config.websocket.shard_count, 1);
                assert_eq!(config.environment(), Environment::Development);
            },
        );
    }

    #[test]
    fn test_overrides() {
        temp_env::with_vars(
            [
                ("PORT", Some("9000")),
                ("WS_IDENTITY_HEADER", Some("X-Auth-User")),
                ("WS_SHARD_COUNT", Some("8")),
                ("ENVIRONMENT", Some("production")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.port, 9000);
                // Header names are normalized to lowercase.
                assert_eq!(config.identity_header.as_str(), "x-auth-user");
                assert_eq!(config.websocket.shard_count, 8);
                assert_eq!(config.environment(), Environment::Production);
            },
        );
    }

    #[test]
    fn test_invalid_port() {
        temp_env::with_var("PORT", Some("not-a-port"), || {
            let err = Config::from_env().unwrap_err().to_string();
            assert!(err.contains("Invalid PORT value"));
        });
    }

    #[test]
    fn test_invalid_identity_header() {
        temp_env::with_var("WS_IDENTITY_HEADER", Some("bad header"), || {
            let err = Config::from_env().unwrap_err().to_string();
            assert!(err.contains("WS_IDENTITY_HEADER"));
        });
    }

    #[test]
    fn test_invalid_websocket_config() {
        temp_env::with_var("WS_COMPRESSION_LEVEL", Some("12"), || {
            let err = Config::from_env().unwrap_err().to_string();
            assert!(err.contains("Invalid WebSocket configuration"));
        });
    }

    #[test]
    #[traced_test]
    fn test_warns_on_short_connection_timeout() {
        temp_env::with_vars(
            [
                ("WS_HEARTBEAT_INTERVAL_MS", Some("30000")),
                ("WS_CONNECTION_TIMEOUT_MS", Some("10000")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.websocket.connection_timeout, Duration::from_secs(10));
                config.warn_suspicious();
            },
        );
        assert!(logs_contain("Connection timeout is shorter"));
    }

    #[test]
    #[traced_test]
    fn test_warns_on_unapplied_read_buffer_size() {
        temp_env::with_var("WS_READ_BUFFER_SIZE", Some("16384"), || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.websocket.read_buffer_size, 16384);
            config.warn_suspicious();
        });
        assert!(logs_contain("Read buffer size is recorded but not applied"));
    }

    #[test]
    #[traced_test]
    fn test_default_read_buffer_size_is_quiet() {
        temp_env::with_var_unset("WS_READ_BUFFER_SIZE", || {
            Config::from_env().unwrap().warn_suspicious();
        });
        assert!(!logs_contain("Read buffer size"));
    }
}
