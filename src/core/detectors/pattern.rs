//! Packet size and pattern repetition detection.

use crate::core::detectors::{DetectionContext, DetectionDetails, DetectionResult, DetectorError, SignalDetector, ThreatType};
use crate::core::event::Event;

/// Two independent checks: packet size far from the learned average, and a
/// source repeating the same feature fingerprint.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternDetector;

impl SignalDetector for PatternDetector {
    fn name(&self) -> &str {
        "pattern"
    }

    fn evaluate(&self, event: &Event, ctx: &DetectionContext<'_>) -> Result<DetectionResult, DetectorError> {
        let avg_size = ctx.baseline.avg_packet_size;
        if avg_size > 0.0 {
            let deviation = (event.size as f64 - avg_size).abs() / avg_size;
            if deviation > ctx.config.packet_size_anomaly_stddev {
                return Ok(DetectionResult::detected(
                    ThreatType::PatternAnomaly,
                    (deviation / 5.0).min(1.0),
                    DetectionDetails {
                        packet_size: Some(event.size),
                        expected_size: Some(avg_size),
                        deviation: Some(deviation),
                        ..DetectionDetails::default()
                    },
                ));
            }
        }

        let fingerprint = event.fingerprint();
        match ctx.record.patterns().repetition_rate(fingerprint) {
            Some(rate) if rate >= ctx.config.pattern_similarity_threshold => Ok(DetectionResult::detected(
                ThreatType::PatternRepetition,
                rate,
                DetectionDetails {
                    pattern_hash: Some(format!("{:016x}", fingerprint)),
                    repetition_rate: Some(rate),
                    ..DetectionDetails::default()
                },
            )),
            _ => Ok(DetectionResult::clear()),
        }
    }
}
