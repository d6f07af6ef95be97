//! Core functionality for the DDoS mitigation service.
//!
//! This module contains the streaming engine: connection tracking, the
//! sliding traffic window, signal detectors, fusion, mitigation, baseline
//! estimation, reporting and the background tasks that drive them.

pub mod event;
pub mod window;
pub mod connection_tracker;
pub mod detectors;
pub mod fusion;
pub mod mitigation;
pub mod baseline;
pub mod engine;
pub mod report;
pub mod report_store;
pub mod monitoring;
pub mod ingest;
pub mod simulator;

use serde::{Deserialize, Serialize};

use crate::config::ConfigurationError;

/// DDoS detection configuration
///
/// Every threshold the detectors, fusion and mitigation use lives here so
/// that it can be overridden at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Global request rate that raises a monitoring alert (requests per second)
    pub global_rps_limit: f64,
    /// Per-source request rate limit (requests per second)
    pub per_source_rps_limit: f64,
    /// Per-source new connection (SYN) rate limit (per second)
    pub connection_rate_limit: f64,
    /// Multiple of the baseline rate that counts as a spike
    pub traffic_spike_factor: f64,
    /// Relative packet size deviation that counts as anomalous
    pub packet_size_anomaly_stddev: f64,
    /// Share of identical recent fingerprints that counts as repetition
    pub pattern_similarity_threshold: f64,
    /// Connection age after which a low-volume source looks like slowloris
    pub slowloris_timeout_seconds: u64,
    /// Lifetime of a block rule
    pub block_ttl_seconds: u64,
    /// Fused confidence above which the source is blocked
    pub block_confidence_threshold: f64,
    /// Fused confidence above which the source is throttled
    pub throttle_confidence_threshold: f64,
    /// Maximum events held in the traffic window
    pub window_capacity: usize,
    /// Trailing interval used for rate computation
    pub window_duration_seconds: u64,
    /// Minimum global rate before the volumetric detector can fire
    pub volumetric_floor_rps: f64,
    /// Number of recent per-source fingerprints checked for repetition
    pub repetition_window: usize,
    /// Per-source fingerprint history capacity
    pub pattern_history_capacity: usize,
    /// Baseline rate before any traffic has been observed
    pub baseline_rps_initial: f64,
    /// Upper bound for the baseline rate
    pub baseline_rps_ceiling: f64,
    /// Minimum event-time spacing between baseline rate samples (0 samples every quiet event)
    pub baseline_sample_interval_ms: u64,
    /// Quiet events between average packet size recalculations
    pub baseline_recalc_interval: u64,
    /// Average packet size before any recalculation
    pub initial_avg_packet_size: f64,
    /// Half-open SYN count across the window that indicates a SYN flood
    pub syn_flood_threshold: usize,
    /// UDP/53 payloads below this size look like amplification queries
    pub dns_small_query_bytes: u64,
    /// Idle time after which a per-source record is evicted
    pub source_retention_seconds: u64,
    /// Upper bound on tracked sources
    pub max_tracked_sources: usize,
    /// Mitigation rules kept for reporting
    pub rule_history_capacity: usize,
    /// Mitigation rules included in a status snapshot
    pub status_rule_tail: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            global_rps_limit: 50.0,
            per_source_rps_limit: 10.0,
            connection_rate_limit: 5.0,
            traffic_spike_factor: 2.0,
            packet_size_anomaly_stddev: 1.5,
            pattern_similarity_threshold: 0.5,
            slowloris_timeout_seconds: 10,
            block_ttl_seconds: 3600,
            block_confidence_threshold: 0.7,
            throttle_confidence_threshold: 0.5,
            window_capacity: 1000,
            window_duration_seconds: 5,
            volumetric_floor_rps: 20.0,
            repetition_window: 10,
            pattern_history_capacity: 100,
            baseline_rps_initial: 10.0,
            baseline_rps_ceiling: 20.0,
            baseline_sample_interval_ms: 1000,
            baseline_recalc_interval: 100,
            initial_avg_packet_size: 500.0,
            syn_flood_threshold: 100,
            dns_small_query_bytes: 100,
            source_retention_seconds: 300,
            max_tracked_sources: 100_000,
            rule_history_capacity: 100,
            status_rule_tail: 10,
        }
    }
}

impl DetectionConfig {
    /// Check every option for a usable value
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        positive("global_rps_limit", self.global_rps_limit)?;
        positive("per_source_rps_limit", self.per_source_rps_limit)?;
        positive("connection_rate_limit", self.connection_rate_limit)?;
        positive("traffic_spike_factor", self.traffic_spike_factor)?;
        positive("packet_size_anomaly_stddev", self.packet_size_anomaly_stddev)?;
        positive("volumetric_floor_rps", self.volumetric_floor_rps)?;
        positive("baseline_rps_initial", self.baseline_rps_initial)?;
        positive("baseline_rps_ceiling", self.baseline_rps_ceiling)?;
        positive("initial_avg_packet_size", self.initial_avg_packet_size)?;
        unit_interval("pattern_similarity_threshold", self.pattern_similarity_threshold)?;
        unit_interval("block_confidence_threshold", self.block_confidence_threshold)?;
        unit_interval("throttle_confidence_threshold", self.throttle_confidence_threshold)?;

        bounded_seconds("slowloris_timeout_seconds", self.slowloris_timeout_seconds)?;
        bounded_seconds("block_ttl_seconds", self.block_ttl_seconds)?;
        bounded_seconds("window_duration_seconds", self.window_duration_seconds)?;
        bounded_seconds("source_retention_seconds", self.source_retention_seconds)?;
        if self.baseline_sample_interval_ms > MAX_DURATION_SECONDS * 1000 {
            return Err(ConfigurationError::OutOfRange {
                field: "baseline_sample_interval_ms",
                reason: format!("must not exceed {} ms", MAX_DURATION_SECONDS * 1000),
            });
        }
        non_zero("window_capacity", self.window_capacity)?;
        non_zero("repetition_window", self.repetition_window)?;
        non_zero("pattern_history_capacity", self.pattern_history_capacity)?;
        non_zero("baseline_recalc_interval", self.baseline_recalc_interval as usize)?;
        non_zero("syn_flood_threshold", self.syn_flood_threshold)?;
        non_zero("max_tracked_sources", self.max_tracked_sources)?;
        non_zero("rule_history_capacity", self.rule_history_capacity)?;

        if self.throttle_confidence_threshold >= self.block_confidence_threshold {
            return Err(ConfigurationError::OutOfRange {
                field: "throttle_confidence_threshold",
                reason: format!(
                    "must be below block_confidence_threshold ({})",
                    self.block_confidence_threshold
                ),
            });
        }
        if self.repetition_window > self.pattern_history_capacity {
            return Err(ConfigurationError::OutOfRange {
                field: "repetition_window",
                reason: format!(
                    "must not exceed pattern_history_capacity ({})",
                    self.pattern_history_capacity
                ),
            });
        }
        if self.baseline_rps_initial > self.baseline_rps_ceiling {
            return Err(ConfigurationError::OutOfRange {
                field: "baseline_rps_initial",
                reason: format!("must not exceed baseline_rps_ceiling ({})", self.baseline_rps_ceiling),
            });
        }

        Ok(())
    }

    /// Window duration as a float, for rate arithmetic
    pub fn window_seconds(&self) -> f64 {
        self.window_duration_seconds as f64
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::OutOfRange {
            field,
            reason: format!("must be a positive number, got {}", value),
        })
    }
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigurationError::OutOfRange {
            field,
            reason: format!("must lie in [0, 1], got {}", value),
        })
    }
}

/// Longest duration option accepted (ten years)
pub const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

fn bounded_seconds(field: &'static str, value: u64) -> Result<(), ConfigurationError> {
    if value == 0 || value > MAX_DURATION_SECONDS {
        return Err(ConfigurationError::OutOfRange {
            field,
            reason: format!("must lie in 1..={} seconds, got {}", MAX_DURATION_SECONDS, value),
        });
    }
    Ok(())
}

fn non_zero(field: &'static str, value: usize) -> Result<(), ConfigurationError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigurationError::OutOfRange {
            field,
            reason: "must be greater than zero".to_string(),
        })
    }
}

pub use event::{Event, EventError, Protocol, RawEvent, TcpFlags};
pub use window::TrafficWindow;
pub use connection_tracker::{ConnectionRecord, ConnectionTracker, SourceSummary};
pub use detectors::{DetectionContext, DetectionResult, DetectorError, SignalDetector, ThreatType};
pub use fusion::{Action, FusionEngine, FusionOutcome};
pub use mitigation::{MitigationController, MitigationRule};
pub use baseline::{BaselineEstimator, BaselineView};
pub use engine::{AttackPhase, AttackState, DecisionResult, ProtectionEngine, StatusSnapshot, TrafficMetrics};
pub use report::AttackReport;
pub use report_store::{MemoryReportStore, RedisReportStore, ReportStore, ReportStoreError};
pub use monitoring::Monitoring;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DetectionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_negative_rate_limit_rejected() {
        let config = DetectionConfig {
            per_source_rps_limit: -1.0,
            ..DetectionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::OutOfRange { field: "per_source_rps_limit", .. })
        ));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        for ttl in [0, MAX_DURATION_SECONDS + 1, 10_000_000_000_000_000, u64::MAX] {
            let config = DetectionConfig {
                block_ttl_seconds: ttl,
                ..DetectionConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigurationError::OutOfRange { field: "block_ttl_seconds", .. })
            ));
        }

        let config = DetectionConfig {
            window_duration_seconds: u64::MAX,
            ..DetectionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DetectionConfig {
            source_retention_seconds: u64::MAX,
            ..DetectionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DetectionConfig {
            baseline_sample_interval_ms: u64::MAX,
            ..DetectionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DetectionConfig {
            block_ttl_seconds: MAX_DURATION_SECONDS,
            ..DetectionConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_ordering_enforced() {
        let config = DetectionConfig {
            throttle_confidence_threshold: 0.8,
            block_confidence_threshold: 0.7,
            ..DetectionConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DetectionConfig {
            block_confidence_threshold: 1.5,
            ..DetectionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = DetectionConfig {
            window_capacity: 0,
            ..DetectionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::OutOfRange { field: "window_capacity", .. })
        ));
    }
}
