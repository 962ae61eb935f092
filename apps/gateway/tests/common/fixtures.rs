//! Test fixtures for gateway integration tests
//!
//! Provides hub configuration builders tuned for fast, deterministic tests.

#![allow(dead_code)]

use std::time::Duration;

use murmur_shared_config::WebSocketConfig;

/// Hub configuration builder
///
/// Starts from a configuration whose heartbeat is slow enough never to
/// interfere with a test unless the test asks for it.
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: WebSocketConfig,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: WebSocketConfig {
                heartbeat_interval: Duration::from_secs(30),
                connection_timeout: Duration::from_secs(60),
                message_buffer_size: 16,
                ..WebSocketConfig::default()
            },
        }
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    pub fn shards(mut self, shard_count: usize) -> Self {
        self.config.shard_count = shard_count;
        self
    }

    pub fn broadcast_workers(mut self, count: usize) -> Self {
        self.config.broadcast_worker_count = count;
        self
    }

    pub fn message_buffer_size(mut self, size: usize) -> Self {
        self.config.message_buffer_size = size;
        self
    }

    pub fn message_queue_size(mut self, size: usize) -> Self {
        self.config.message_queue_size = size;
        self
    }

    /// Backpressure policy applied to every outbound delivery
    pub fn backpressure(
        mut self,
        drop_on_full: bool,
        close_on_backpressure: bool,
        send_timeout: Duration,
    ) -> Self {
        self.config.drop_on_full = drop_on_full;
        self.config.close_on_backpressure = close_on_backpressure;
        self.config.send_timeout = send_timeout;
        self
    }

    pub fn heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self.config.connection_timeout = timeout;
        self
    }

    pub fn global_ping(mut self, workers: usize) -> Self {
        self.config.enable_global_ping = true;
        self.config.ping_worker_count = workers;
        self
    }

    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = bytes;
        self
    }

    pub fn compression(mut self, level: i32) -> Self {
        self.config.enable_compression = true;
        self.config.compression_level = level;
        self
    }

    pub fn build(self) -> WebSocketConfig {
        self.config
    }
}
