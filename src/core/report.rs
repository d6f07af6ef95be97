//! Attack reports.
//!
//! An [`AttackReport`] is a serializable summary of the engine state over a
//! trailing window: the attack episode, traffic counters, mitigation
//! timeline, top sources, an impact estimate and recommendations.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::connection_tracker::SourceSummary;
use crate::core::detectors::ThreatType;
use crate::core::engine::{AttackPhase, AttackState, TrafficMetrics};
use crate::core::mitigation::MitigationRule;
use crate::utils::generate_report_id;

const MAX_RECOMMENDATIONS: usize = 5;
/// Effectiveness below this share suggests detection is too slow
const EFFECTIVENESS_TARGET: f64 = 80.0;
const DETECTION_METHOD: &str = "multi_signal_fusion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Grade an attack by total volume and peak rate
    pub fn assess(total_requests: u64, peak_rps: f64) -> Self {
        if total_requests > 100_000 || peak_rps > 1000.0 {
            Severity::Critical
        } else if total_requests > 10_000 || peak_rps > 100.0 {
            Severity::High
        } else if total_requests > 1_000 || peak_rps > 50.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackSummary {
    pub attack_type: Option<ThreatType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub status: AttackPhase,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficStatistics {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub total_bytes: u64,
    pub peak_rps: f64,
    pub current_rps: f64,
    pub baseline_rps: f64,
    pub unique_sources: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub detection_time: Option<DateTime<Utc>>,
    pub detection_method: String,
    pub confidence_score: f64,
    pub threat_indicators: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationSummary {
    /// Rules applied within the report window
    pub timeline: Vec<MitigationRule>,
    pub blocked_sources: Vec<IpAddr>,
    pub effectiveness_percentage: f64,
    pub response_time_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackSources {
    pub unique_sources: usize,
    pub top_attackers: Vec<SourceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub requests_that_got_through: u64,
    pub potential_downtime_seconds: f64,
    pub risk_level: RiskLevel,
}

/// Persisted summary of an attack episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackReport {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub window_seconds: i64,
    pub attack_summary: AttackSummary,
    pub traffic_statistics: TrafficStatistics,
    pub detection_details: DetectionSummary,
    pub mitigation_actions: MitigationSummary,
    pub attack_sources: AttackSources,
    pub impact_assessment: ImpactAssessment,
    pub recommendations: Vec<String>,
}

/// Engine state captured for one report
#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub now: DateTime<Utc>,
    pub window: Duration,
    pub attack: AttackState,
    pub metrics: TrafficMetrics,
    pub current_rps: f64,
    pub rules: Vec<MitigationRule>,
    pub blocked_sources: Vec<IpAddr>,
    pub top_attackers: Vec<SourceSummary>,
    pub unique_sources: usize,
}

impl AttackReport {
    pub fn generate(inputs: ReportInputs) -> Self {
        let ReportInputs {
            now,
            window,
            attack,
            metrics,
            current_rps,
            rules,
            blocked_sources,
            top_attackers,
            unique_sources,
        } = inputs;

        let duration_seconds = attack
            .started_at
            .map_or(0.0, |start| seconds_between(start, now));
        let effectiveness = effectiveness_percentage(metrics.blocked_requests, metrics.total_requests);
        let response_time_seconds = match (attack.detected_at, attack.mitigated_at) {
            (Some(detected), Some(mitigated)) => seconds_between(detected, mitigated),
            _ => 0.0,
        };

        let impact_assessment = assess_impact(metrics.total_requests, metrics.blocked_requests, duration_seconds);
        let recommendations = recommendations(attack.attack_type.as_ref(), effectiveness);

        AttackReport {
            id: generate_report_id(now),
            created_at: now,
            window_seconds: window.num_seconds(),
            attack_summary: AttackSummary {
                attack_type: attack.attack_type,
                start_time: attack.started_at,
                end_time: now,
                duration_seconds,
                status: attack.phase,
                severity: Severity::assess(metrics.total_requests, metrics.peak_rps),
            },
            traffic_statistics: TrafficStatistics {
                total_requests: metrics.total_requests,
                blocked_requests: metrics.blocked_requests,
                total_bytes: metrics.total_bytes,
                peak_rps: metrics.peak_rps,
                current_rps,
                baseline_rps: metrics.baseline_rps,
                unique_sources,
            },
            detection_details: DetectionSummary {
                detection_time: attack.detected_at,
                detection_method: DETECTION_METHOD.to_string(),
                confidence_score: attack.peak_confidence,
                threat_indicators: attack.indicators,
            },
            mitigation_actions: MitigationSummary {
                timeline: rules,
                blocked_sources,
                effectiveness_percentage: effectiveness,
                response_time_seconds,
            },
            attack_sources: AttackSources {
                unique_sources,
                top_attackers,
            },
            impact_assessment,
            recommendations,
        }
    }
}

/// Share of requests that were blocked, in percent; 0 with no traffic
pub fn effectiveness_percentage(blocked_requests: u64, total_requests: u64) -> f64 {
    if total_requests == 0 {
        return 0.0;
    }
    blocked_requests as f64 / total_requests as f64 * 100.0
}

fn assess_impact(total_requests: u64, blocked_requests: u64, duration_seconds: f64) -> ImpactAssessment {
    let potential_downtime_seconds = if blocked_requests == 0 || total_requests == 0 {
        duration_seconds
    } else {
        duration_seconds * (1.0 - blocked_requests as f64 / total_requests as f64)
    };
    let risk_level = if (blocked_requests as f64) < total_requests as f64 * 0.8 {
        RiskLevel::High
    } else {
        RiskLevel::Low
    };

    ImpactAssessment {
        requests_that_got_through: total_requests.saturating_sub(blocked_requests),
        potential_downtime_seconds,
        risk_level,
    }
}

fn recommendations(attack_type: Option<&ThreatType>, effectiveness: f64) -> Vec<String> {
    let mut out: Vec<&str> = Vec::new();

    if effectiveness < EFFECTIVENESS_TARGET {
        out.push("Improve detection algorithms for faster response");
    }

    match attack_type {
        Some(ThreatType::Volumetric) | Some(ThreatType::SynFlood) | Some(ThreatType::DnsAmplification) => {
            out.push("Implement rate limiting at network edge");
            out.push("Consider CDN with DDoS protection");
        }
        Some(ThreatType::Slowloris) | Some(ThreatType::ConnectionFlood) => {
            out.push("Configure connection timeout limits");
            out.push("Implement connection pooling limits");
        }
        Some(ThreatType::RateLimitExceeded)
        | Some(ThreatType::PatternAnomaly)
        | Some(ThreatType::PatternRepetition) => {
            out.push("Add CAPTCHA challenges for suspicious requests");
            out.push("Implement Web Application Firewall (WAF)");
        }
        _ => {}
    }

    out.extend([
        "Enable permanent DDoS protection monitoring",
        "Set up automated alerting for traffic anomalies",
        "Create incident response playbook",
        "Regular security audits and penetration testing",
    ]);

    out.into_iter().take(MAX_RECOMMENDATIONS).map(str::to_string).collect()
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}
