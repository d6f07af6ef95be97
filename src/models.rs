use serde::{Deserialize, Serialize};
use crate::core::DetectionConfig;

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Capacity of the ingest channel feeding the engine
    pub ingest_queue_size: usize,
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Whether to enable monitoring
    pub enabled: bool,
    /// Monitoring interval in seconds
    pub interval_seconds: u32,
    /// Trailing window covered by snapshot reports (seconds)
    pub report_window_seconds: u64,
}

/// Where attack reports are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Redis,
    Memory,
}

/// Report storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend
    pub backend: StorageBackend,
    /// Reports kept in the index
    pub report_capacity: usize,
    /// Report retention period in days
    pub retention_days: u64,
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Detection engine configuration
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
    /// Report storage configuration
    pub storage: StorageConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            report_window_seconds: 3600,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Redis,
            report_capacity: 100,
            retention_days: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                ingest_queue_size: 10_000,
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            detection: DetectionConfig::default(),
            monitoring: MonitoringConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}
