//! Signal detectors for the DDoS mitigation service.
//!
//! Each detector is a pure function of the current event and a read-only
//! [`DetectionContext`]. Detectors never mutate shared state; the engine
//! collects their results and hands them to fusion.

pub mod volumetric;
pub mod pattern;
pub mod behavioral;
pub mod protocol;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::baseline::BaselineView;
use crate::core::connection_tracker::ConnectionRecord;
use crate::core::event::Event;
use crate::core::window::TrafficWindow;
use crate::core::DetectionConfig;

pub use behavioral::BehavioralDetector;
pub use pattern::PatternDetector;
pub use protocol::ProtocolDetector;
pub use volumetric::VolumetricDetector;

/// Errors a detector can report instead of a result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Detector failure: {0}")]
    Failure(String),
}

/// Threat type tag attached to a detection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ThreatType {
    Volumetric,
    PatternAnomaly,
    PatternRepetition,
    RateLimitExceeded,
    Slowloris,
    ConnectionFlood,
    SynFlood,
    DnsAmplification,
    BlockedSource,
    /// Tag produced by an injected detector
    Custom(String),
}

impl ThreatType {
    pub fn as_str(&self) -> &str {
        match self {
            ThreatType::Volumetric => "volumetric",
            ThreatType::PatternAnomaly => "pattern_anomaly",
            ThreatType::PatternRepetition => "pattern_repetition",
            ThreatType::RateLimitExceeded => "rate_limit_exceeded",
            ThreatType::Slowloris => "slowloris",
            ThreatType::ConnectionFlood => "connection_flood",
            ThreatType::SynFlood => "syn_flood",
            ThreatType::DnsAmplification => "dns_amplification",
            ThreatType::BlockedSource => "blocked_ip",
            ThreatType::Custom(tag) => tag,
        }
    }
}

impl From<String> for ThreatType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "volumetric" => ThreatType::Volumetric,
            "pattern_anomaly" => ThreatType::PatternAnomaly,
            "pattern_repetition" => ThreatType::PatternRepetition,
            "rate_limit_exceeded" => ThreatType::RateLimitExceeded,
            "slowloris" => ThreatType::Slowloris,
            "connection_flood" => ThreatType::ConnectionFlood,
            "syn_flood" => ThreatType::SynFlood,
            "dns_amplification" => ThreatType::DnsAmplification,
            "blocked_ip" => ThreatType::BlockedSource,
            _ => ThreatType::Custom(tag),
        }
    }
}

impl From<ThreatType> for String {
    fn from(threat: ThreatType) -> Self {
        threat.as_str().to_string()
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named detail attributes a detector may attach to its result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_rps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_rps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spike_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_age_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syn_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Output of one signal detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub threat_type: Option<ThreatType>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub details: DetectionDetails,
}

impl DetectionResult {
    /// Nothing found
    pub fn clear() -> Self {
        Self {
            detected: false,
            threat_type: None,
            confidence: 0.0,
            details: DetectionDetails::default(),
        }
    }

    pub fn detected(threat_type: ThreatType, confidence: f64, details: DetectionDetails) -> Self {
        Self {
            detected: true,
            threat_type: Some(threat_type),
            confidence,
            details,
        }
    }
}

/// Read-only view of engine state handed to every detector for one event
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    /// Record of the event's source, already updated with this event
    pub record: &'a ConnectionRecord,
    pub window: &'a TrafficWindow,
    pub baseline: BaselineView,
    pub config: &'a DetectionConfig,
    /// Global rate recomputed from the window for this evaluation
    pub current_rps: f64,
}

/// A pure `(event, state) -> DetectionResult` analyzer
pub trait SignalDetector: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn evaluate(&self, event: &Event, ctx: &DetectionContext<'_>) -> Result<DetectionResult, DetectorError>;
}

/// The built-in detectors in fixed evaluation order
pub fn default_detectors() -> Vec<Box<dyn SignalDetector>> {
    vec![
        Box::new(VolumetricDetector),
        Box::new(PatternDetector),
        Box::new(BehavioralDetector),
        Box::new(ProtocolDetector),
    ]
}
