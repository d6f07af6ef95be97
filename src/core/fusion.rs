//! Signal fusion and action selection.
//!
//! Runs the detectors in their fixed order with failure isolation, then
//! averages the confidences of those that fired and maps the result onto an
//! action.

use std::fmt;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::detectors::{DetectionContext, DetectionResult, DetectorError, SignalDetector, ThreatType};
use crate::core::event::Event;
use crate::core::DetectionConfig;

/// Decision taken for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Monitor,
    Throttle,
    Block,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Monitor => "monitor",
            Action::Throttle => "throttle",
            Action::Block => "block",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined verdict over all detections for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionOutcome {
    pub threat_detected: bool,
    /// Tag of the first detector, in evaluation order, that fired
    pub threat_type: Option<ThreatType>,
    pub confidence: f64,
    pub action: Action,
}

#[derive(Debug, Clone, Copy)]
pub struct FusionEngine {
    block_threshold: f64,
    throttle_threshold: f64,
}

impl FusionEngine {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            block_threshold: config.block_confidence_threshold,
            throttle_threshold: config.throttle_confidence_threshold,
        }
    }

    /// Fuse the detections that fired into one outcome
    pub fn fuse(&self, detections: &[DetectionResult]) -> FusionOutcome {
        let fired: Vec<&DetectionResult> = detections.iter().filter(|d| d.detected).collect();
        if fired.is_empty() {
            return FusionOutcome {
                threat_detected: false,
                threat_type: None,
                confidence: 0.0,
                action: Action::Allow,
            };
        }

        let confidence = fired.iter().map(|d| d.confidence).sum::<f64>() / fired.len() as f64;
        FusionOutcome {
            threat_detected: true,
            threat_type: fired[0].threat_type.clone(),
            confidence,
            action: self.select_action(confidence),
        }
    }

    pub fn select_action(&self, confidence: f64) -> Action {
        if confidence > self.block_threshold {
            Action::Block
        } else if confidence > self.throttle_threshold {
            Action::Throttle
        } else if confidence > 0.0 {
            Action::Monitor
        } else {
            Action::Allow
        }
    }
}

/// Run every detector against the event, keeping only the ones that fired.
///
/// A detector that errors, or returns a confidence outside [0, 1], counts as
/// not detected for this event.
pub fn collect_detections(
    detectors: &[Box<dyn SignalDetector>],
    event: &Event,
    ctx: &DetectionContext<'_>,
) -> Vec<DetectionResult> {
    let mut fired = Vec::new();
    for detector in detectors {
        match detector.evaluate(event, ctx).and_then(|result| validate(detector.as_ref(), result)) {
            Ok(result) if result.detected => fired.push(result),
            Ok(_) => {}
            Err(e) => warn!(
                "Detector {} failed on event from {}: {}",
                detector.name(),
                event.source,
                e
            ),
        }
    }
    fired
}

fn validate(detector: &dyn SignalDetector, result: DetectionResult) -> Result<DetectionResult, DetectorError> {
    if result.detected && !(result.confidence.is_finite() && (0.0..=1.0).contains(&result.confidence)) {
        return Err(DetectorError::Failure(format!(
            "{} reported confidence {}",
            detector.name(),
            result.confidence
        )));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detectors::test_support::Harness;
    use crate::core::detectors::{DetectionDetails, VolumetricDetector};
    use crate::core::event::Protocol;
    use chrono::Utc;

    struct Fixed(ThreatType, f64);

    impl SignalDetector for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn evaluate(&self, _event: &Event, _ctx: &DetectionContext<'_>) -> Result<DetectionResult, DetectorError> {
            Ok(DetectionResult::detected(self.0.clone(), self.1, DetectionDetails::default()))
        }
    }

    struct Broken;

    impl SignalDetector for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn evaluate(&self, _event: &Event, _ctx: &DetectionContext<'_>) -> Result<DetectionResult, DetectorError> {
            Err(DetectorError::Failure("unexpected input shape".to_string()))
        }
    }

    fn hit(threat: ThreatType, confidence: f64) -> DetectionResult {
        DetectionResult::detected(threat, confidence, DetectionDetails::default())
    }

    #[test]
    fn test_no_detections_allows() {
        let fusion = FusionEngine::new(&DetectionConfig::default());
        let outcome = fusion.fuse(&[DetectionResult::clear()]);
        assert!(!outcome.threat_detected);
        assert_eq!(outcome.action, Action::Allow);
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_mean_confidence_and_first_type() {
        let fusion = FusionEngine::new(&DetectionConfig::default());
        let outcome = fusion.fuse(&[
            hit(ThreatType::Volumetric, 0.9),
            DetectionResult::clear(),
            hit(ThreatType::SynFlood, 0.7),
        ]);
        assert!(outcome.threat_detected);
        assert_eq!(outcome.threat_type, Some(ThreatType::Volumetric));
        assert!((outcome.confidence - 0.8).abs() < 1e-9);
        assert_eq!(outcome.action, Action::Block);
    }

    #[test]
    fn test_action_thresholds() {
        let fusion = FusionEngine::new(&DetectionConfig::default());
        assert_eq!(fusion.select_action(0.71), Action::Block);
        assert_eq!(fusion.select_action(0.7), Action::Throttle);
        assert_eq!(fusion.select_action(0.51), Action::Throttle);
        assert_eq!(fusion.select_action(0.5), Action::Monitor);
        assert_eq!(fusion.select_action(0.1), Action::Monitor);
        assert_eq!(fusion.select_action(0.0), Action::Allow);
    }

    #[test]
    fn test_failing_detector_isolated() {
        let mut harness = Harness::new(DetectionConfig::default());
        let event = Event::new("10.0.0.1".parse().unwrap(), Protocol::Tcp, 500, Utc::now());
        harness.run(&VolumetricDetector, &event);

        let record = harness.tracker.get(&event.source).unwrap();
        let ctx = DetectionContext {
            record,
            window: &harness.window,
            baseline: harness.baseline.view(),
            config: &harness.config,
            current_rps: harness.window.current_rate(),
        };
        let detectors: Vec<Box<dyn SignalDetector>> = vec![
            Box::new(Broken),
            Box::new(Fixed(ThreatType::Custom("learned".to_string()), 0.6)),
            Box::new(Fixed(ThreatType::Slowloris, 1.7)),
        ];

        let fired = collect_detections(&detectors, &event, &ctx);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].threat_type, Some(ThreatType::Custom("learned".to_string())));
    }
}
