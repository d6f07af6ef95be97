//! Volumetric spike detection.

use crate::core::detectors::{DetectionContext, DetectionDetails, DetectionResult, DetectorError, SignalDetector, ThreatType};
use crate::core::event::Event;

/// Flags global request rates well above the learned baseline
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumetricDetector;

impl SignalDetector for VolumetricDetector {
    fn name(&self) -> &str {
        "volumetric"
    }

    fn evaluate(&self, _event: &Event, ctx: &DetectionContext<'_>) -> Result<DetectionResult, DetectorError> {
        let current_rps = ctx.current_rps;
        if !current_rps.is_finite() {
            return Err(DetectorError::InvalidInput(format!("current rate is {}", current_rps)));
        }

        let baseline_rps = ctx.baseline.baseline_rps;
        let threshold = (baseline_rps * ctx.config.traffic_spike_factor).max(ctx.config.volumetric_floor_rps);
        if current_rps <= threshold {
            return Ok(DetectionResult::clear());
        }

        // high confidence at 3x baseline
        let spike_factor = current_rps / baseline_rps.max(1.0);
        Ok(DetectionResult::detected(
            ThreatType::Volumetric,
            (spike_factor / 3.0).min(1.0),
            DetectionDetails {
                current_rps: Some(current_rps),
                baseline_rps: Some(baseline_rps),
                spike_factor: Some(spike_factor),
                ..DetectionDetails::default()
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detectors::test_support::{at, Harness};
    use crate::core::event::Protocol;
    use crate::core::DetectionConfig;
    use chrono::Utc;

    #[test]
    fn test_quiet_traffic_not_flagged() {
        let base = Utc::now();
        let mut harness = Harness::new(DetectionConfig::default());
        for i in 0..50 {
            let event = Event::new("10.0.0.1".parse().unwrap(), Protocol::Tcp, 500, at(base, i * 100));
            let result = harness.run(&VolumetricDetector, &event);
            assert!(!result.detected);
        }
    }

    #[test]
    fn test_spike_above_floor_flagged() {
        let base = Utc::now();
        let mut harness = Harness::new(DetectionConfig::default());
        let mut last = DetectionResult::clear();
        // 101 events inside one second: 20.2 rps against a baseline of 10
        for i in 0..101 {
            let event = Event::new("10.0.0.1".parse().unwrap(), Protocol::Tcp, 500, at(base, i * 5));
            last = harness.run(&VolumetricDetector, &event);
        }
        assert!(last.detected);
        assert_eq!(last.threat_type, Some(ThreatType::Volumetric));
        assert!((last.confidence - 20.2 / 10.0 / 3.0).abs() < 1e-9);
        assert_eq!(last.details.current_rps, Some(20.2));
    }

    #[test]
    fn test_floor_prevents_low_baseline_false_positive() {
        let base = Utc::now();
        let config = DetectionConfig {
            baseline_rps_initial: 1.0,
            ..DetectionConfig::default()
        };
        let mut harness = Harness::new(config);
        let mut last = DetectionResult::clear();
        // 15 rps is 15x baseline but below the 20 rps floor
        for i in 0..75 {
            let event = Event::new("10.0.0.1".parse().unwrap(), Protocol::Tcp, 500, at(base, i * 10));
            last = harness.run(&VolumetricDetector, &event);
        }
        assert!(!last.detected);
    }
}
