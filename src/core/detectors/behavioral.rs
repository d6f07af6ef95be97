//! Per-source behavioral detection: rate limits, slow connections and
//! connection floods.

use crate::core::detectors::{DetectionContext, DetectionDetails, DetectionResult, DetectorError, SignalDetector, ThreatType};
use crate::core::event::Event;

/// Sources with fewer requests than this are candidates for slowloris
const SLOWLORIS_MAX_REQUESTS: u64 = 5;
const SLOWLORIS_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Default, Clone, Copy)]
pub struct BehavioralDetector;

impl SignalDetector for BehavioralDetector {
    fn name(&self) -> &str {
        "behavioral"
    }

    fn evaluate(&self, _event: &Event, ctx: &DetectionContext<'_>) -> Result<DetectionResult, DetectorError> {
        let record = ctx.record;
        let config = ctx.config;
        let window_seconds = config.window_seconds();

        let request_rate = record.request_rate(window_seconds);
        if request_rate > config.per_source_rps_limit {
            return Ok(DetectionResult::detected(
                ThreatType::RateLimitExceeded,
                (request_rate / (config.per_source_rps_limit * 2.0)).min(1.0),
                DetectionDetails {
                    request_rate: Some(request_rate),
                    request_count: Some(record.request_count),
                    limit: Some(config.per_source_rps_limit),
                    ..DetectionDetails::default()
                },
            ));
        }

        let age_seconds = record.connection_age().num_milliseconds() as f64 / 1000.0;
        if record.request_count < SLOWLORIS_MAX_REQUESTS && age_seconds > config.slowloris_timeout_seconds as f64 {
            return Ok(DetectionResult::detected(
                ThreatType::Slowloris,
                SLOWLORIS_CONFIDENCE,
                DetectionDetails {
                    connection_age_seconds: Some(age_seconds),
                    request_count: Some(record.request_count),
                    ..DetectionDetails::default()
                },
            ));
        }

        let syn_rate = record.syn_rate(window_seconds);
        if syn_rate > config.connection_rate_limit {
            return Ok(DetectionResult::detected(
                ThreatType::ConnectionFlood,
                (syn_rate / (config.connection_rate_limit * 2.0)).min(1.0),
                DetectionDetails {
                    request_rate: Some(syn_rate),
                    limit: Some(config.connection_rate_limit),
                    ..DetectionDetails::default()
                },
            ));
        }

        Ok(DetectionResult::clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detectors::test_support::{at, Harness};
    use crate::core::event::{Protocol, TcpFlags};
    use crate::core::DetectionConfig;
    use chrono::Utc;

    fn event(offset_ms: i64, base: chrono::DateTime<Utc>) -> Event {
        Event::new("10.0.0.7".parse().unwrap(), Protocol::Http, 400, at(base, offset_ms))
    }

    #[test]
    fn test_rate_limit_exceeded() {
        let base = Utc::now();
        let mut harness = Harness::new(DetectionConfig::default());
        let mut last = DetectionResult::clear();
        // 60 requests in 600ms: 12 rps over a 5s window
        for i in 0..60 {
            last = harness.run(&BehavioralDetector, &event(i * 10, base));
        }
        assert!(last.detected);
        assert_eq!(last.threat_type, Some(ThreatType::RateLimitExceeded));
        assert!((last.confidence - 12.0 / 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_steady_source_within_limit() {
        let base = Utc::now();
        let mut harness = Harness::new(DetectionConfig::default());
        for i in 0..50 {
            let result = harness.run(&BehavioralDetector, &event(i * 200, base));
            assert!(!result.detected, "event {} flagged: {:?}", i, result);
        }
    }

    #[test]
    fn test_slowloris_after_silence() {
        let base = Utc::now();
        let mut harness = Harness::new(DetectionConfig::default());
        for i in 0..3 {
            assert!(!harness.run(&BehavioralDetector, &event(i * 100, base)).detected);
        }
        let result = harness.run(&BehavioralDetector, &event(200 + 11_000, base));
        assert!(result.detected);
        assert_eq!(result.threat_type, Some(ThreatType::Slowloris));
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.details.request_count, Some(4));
    }

    #[test]
    fn test_busy_source_is_not_slowloris() {
        let base = Utc::now();
        let mut harness = Harness::new(DetectionConfig::default());
        for i in 0..5 {
            harness.run(&BehavioralDetector, &event(i * 100, base));
        }
        assert!(!harness.run(&BehavioralDetector, &event(20_000, base)).detected);
    }

    #[test]
    fn test_connection_flood_from_one_source() {
        let base = Utc::now();
        let mut harness = Harness::new(DetectionConfig::default());
        let mut last = DetectionResult::clear();
        // 30 SYNs: 6 per second, above the 5/s connection limit but below the request limit
        for i in 0..30 {
            let syn = Event::new("10.0.0.9".parse().unwrap(), Protocol::Tcp, 64, at(base, i * 30))
                .with_flags(TcpFlags::syn());
            last = harness.run(&BehavioralDetector, &syn);
        }
        assert!(last.detected);
        assert_eq!(last.threat_type, Some(ThreatType::ConnectionFlood));
        assert!((last.confidence - 0.6).abs() < 1e-9);
    }
}
