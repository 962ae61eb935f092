//! WebSocket hub configuration types

use std::time::Duration;

use crate::{parse_env, parse_env_millis, ConfigError, ConfigResult};

/// Send timeout applied in blocking mode when none is configured
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(50);

/// Heartbeat cadence applied when none is configured
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Silence threshold applied when none is configured
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Tuning parameters for the real-time connection hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Admission ceiling for concurrently registered sessions
    pub max_connections: usize,

    /// Cadence of the ping / liveness scan cycle
    pub heartbeat_interval: Duration,

    /// Silence threshold before a session is forcibly closed
    pub connection_timeout: Duration,

    /// Outbound queue capacity per session
    pub message_buffer_size: usize,

    /// Transport read buffer size in bytes
    pub read_buffer_size: usize,

    /// Transport write buffer size in bytes
    pub write_buffer_size: usize,

    /// Inbound frame size ceiling in bytes
    pub max_message_size: usize,

    /// Whether transport-level compression is requested at session creation
    pub enable_compression: bool,

    /// Compression level (-2..=9), only meaningful with compression enabled
    pub compression_level: i32,

    /// Reserved: external message queue integration (not wired)
    pub enable_message_queue: bool,

    /// Capacity of the routing queue and of the broadcast job queue
    pub message_queue_size: usize,

    /// Reserved: cross-process clustering (not wired)
    pub enable_cluster: bool,

    /// Reserved: this node's identity within a cluster (not wired)
    pub cluster_node_id: Option<String>,

    /// Number of session partitions
    pub shard_count: usize,

    /// Size of the broadcast worker pool
    pub broadcast_worker_count: usize,

    /// Drop immediately when a session's outbound queue is full
    pub drop_on_full: bool,

    /// Close the session when a message had to be dropped for it
    pub close_on_backpressure: bool,

    /// Bounded wait for a full outbound queue when `drop_on_full` is off
    pub send_timeout: Duration,

    /// Ping sessions from a central worker pool instead of per-session timers
    pub enable_global_ping: bool,

    /// Size of the central ping worker pool
    pub ping_worker_count: usize,
}

impl WebSocketConfig {
    /// Load hub configuration from `WS_*` environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let defaults = Self::default();

        let config = Self {
            max_connections: parse_env("WS_MAX_CONNECTIONS", defaults.max_connections)?,
            heartbeat_interval: parse_env_millis(
                "WS_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            )?,
            connection_timeout: parse_env_millis(
                "WS_CONNECTION_TIMEOUT_MS",
                defaults.connection_timeout,
            )?,
            message_buffer_size: parse_env(
                "WS_MESSAGE_BUFFER_SIZE",
                defaults.message_buffer_size,
            )?,
            read_buffer_size: parse_env("WS_READ_BUFFER_SIZE", defaults.read_buffer_size)?,
            write_buffer_size: parse_env("WS_WRITE_BUFFER_SIZE", defaults.write_buffer_size)?,
            max_message_size: parse_env("WS_MAX_MESSAGE_SIZE", defaults.max_message_size)?,
            enable_compression: parse_env("WS_ENABLE_COMPRESSION", defaults.enable_compression)?,
            compression_level: parse_env("WS_COMPRESSION_LEVEL", defaults.compression_level)?,
            enable_message_queue: parse_env(
                "WS_ENABLE_MESSAGE_QUEUE",
                defaults.enable_message_queue,
            )?,
            message_queue_size: parse_env("WS_MESSAGE_QUEUE_SIZE", defaults.message_queue_size)?,
            enable_cluster: parse_env("WS_ENABLE_CLUSTER", defaults.enable_cluster)?,
            cluster_node_id: std::env::var("WS_CLUSTER_NODE_ID")
                .ok()
                .filter(|s| !s.is_empty()),
            shard_count: parse_env("WS_SHARD_COUNT", defaults.shard_count)?,
            broadcast_worker_count: parse_env(
                "WS_BROADCAST_WORKER_COUNT",
                defaults.broadcast_worker_count,
            )?,
            drop_on_full: parse_env("WS_DROP_ON_FULL", defaults.drop_on_full)?,
            close_on_backpressure: parse_env(
                "WS_CLOSE_ON_BACKPRESSURE",
                defaults.close_on_backpressure,
            )?,
            send_timeout: parse_env_millis("WS_SEND_TIMEOUT_MS", defaults.send_timeout)?,
            enable_global_ping: parse_env("WS_ENABLE_GLOBAL_PING", defaults.enable_global_ping)?,
            ping_worker_count: parse_env("WS_PING_WORKER_COUNT", defaults.ping_worker_count)?,
        };

        config.validate()?;
        Ok(config.normalized())
    }

    /// Reject settings that cannot be corrected silently
    pub fn validate(&self) -> ConfigResult<()> {
        if !(-2..=9).contains(&self.compression_level) {
            return Err(ConfigError::InvalidValue(
                "WS_COMPRESSION_LEVEL".to_string(),
                format!("{} is outside -2..=9", self.compression_level),
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "connection timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Raise counts and capacities to their minimums and fill unset durations
    pub fn normalized(mut self) -> Self {
        self.shard_count = self.shard_count.max(1);
        self.broadcast_worker_count = self.broadcast_worker_count.max(1);
        self.ping_worker_count = self.ping_worker_count.max(1);
        self.message_buffer_size = self.message_buffer_size.max(1);
        self.message_queue_size = self.message_queue_size.max(1);
        if self.send_timeout.is_zero() {
            self.send_timeout = DEFAULT_SEND_TIMEOUT;
        }
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = DEFAULT_HEARTBEAT_INTERVAL;
        }
        if self.connection_timeout.is_zero() {
            self.connection_timeout = DEFAULT_CONNECTION_TIMEOUT;
        }
        self
    }

    /// Interval of the per-session ping timer (90% of the heartbeat interval)
    pub fn session_ping_interval(&self) -> Duration {
        self.heartbeat_interval.mul_f64(0.9)
    }

    /// Compression level to apply at connect time, if compression is enabled
    pub fn connect_compression(&self) -> Option<i32> {
        self.enable_compression.then_some(self.compression_level)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            message_buffer_size: 256,
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            max_message_size: 64 * 1024,
            enable_compression: false,
            compression_level: 0,
            enable_message_queue: false,
            message_queue_size: 1024,
            enable_cluster: false,
            cluster_node_id: None,
            shard_count: 1,
            broadcast_worker_count: 1,
            drop_on_full: true,
            close_on_backpressure: false,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            enable_global_ping: false,
            ping_worker_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.shard_count, 1);
        assert_eq!(config.broadcast_worker_count, 1);
        assert_eq!(config.send_timeout, Duration::from_millis(50));
        assert!(config.drop_on_full);
        assert!(config.cluster_node_id.is_none());
    }

    #[test]
    fn test_normalized_raises_minimums() {
        let config = WebSocketConfig {
            shard_count: 0,
            broadcast_worker_count: 0,
            ping_worker_count: 0,
            message_buffer_size: 0,
            message_queue_size: 0,
            send_timeout: Duration::ZERO,
            heartbeat_interval: Duration::ZERO,
            connection_timeout: Duration::ZERO,
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.shard_count, 1);
        assert_eq!(config.broadcast_worker_count, 1);
        assert_eq!(config.ping_worker_count, 1);
        assert_eq!(config.message_buffer_size, 1);
        assert_eq!(config.message_queue_size, 1);
        assert_eq!(config.send_timeout, DEFAULT_SEND_TIMEOUT);
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(config.connection_timeout, DEFAULT_CONNECTION_TIMEOUT);
    }

    #[test]
    fn test_compression_level_out_of_range() {
        let config = WebSocketConfig {
            compression_level: 12,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_ping_interval_is_ninety_percent() {
        let config = WebSocketConfig {
            heartbeat_interval: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(config.session_ping_interval(), Duration::from_secs(9));
    }

    #[test]
    fn test_connect_compression() {
        let mut config = WebSocketConfig {
            compression_level: 6,
            ..Default::default()
        };
        assert_eq!(config.connect_compression(), None);
        config.enable_compression = true;
        assert_eq!(config.connect_compression(), Some(6));
    }

    #[test]
    fn test_from_env_reads_overrides() {
        temp_env::with_vars(
            [
                ("WS_SHARD_COUNT", Some("8")),
                ("WS_DROP_ON_FULL", Some("false")),
                ("WS_SEND_TIMEOUT_MS", Some("120")),
                ("WS_CLUSTER_NODE_ID", Some("node-a")),
                ("WS_BROADCAST_WORKER_COUNT", Some("0")),
            ],
            || {
                let config = WebSocketConfig::from_env().unwrap();
                assert_eq!(config.shard_count, 8);
                assert!(!config.drop_on_full);
                assert_eq!(config.send_timeout, Duration::from_millis(120));
                assert_eq!(config.cluster_node_id.as_deref(), Some("node-a"));
                assert_eq!(config.broadcast_worker_count, 1);
            },
        );
    }

    #[test]
    fn test_from_env_rejects_bad_compression_level() {
        temp_env::with_var("WS_COMPRESSION_LEVEL", Some("42"), || {
            assert!(WebSocketConfig::from_env().is_err());
        });
    }
}
