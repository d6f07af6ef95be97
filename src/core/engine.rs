//! Protection engine for the DDoS mitigation service.
//!
//! A single owned [`ProtectionEngine`] holds all mutable state (connection
//! records, traffic window, baseline, mitigation and attack state) behind one
//! lock, so that updating aggregates for an event and deciding on it are
//! atomic with respect to every other event. Event timestamps drive all time
//! arithmetic on the hot path.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use metrics::{gauge, histogram, increment_counter};
use serde::{Deserialize, Serialize};

use crate::config::ConfigurationError;
use crate::core::baseline::BaselineEstimator;
use crate::core::connection_tracker::ConnectionTracker;
use crate::core::detectors::{default_detectors, DetectionContext, DetectionResult, SignalDetector, ThreatType};
use crate::core::event::{Event, EventError, RawEvent};
use crate::core::fusion::{collect_detections, Action, FusionEngine};
use crate::core::mitigation::{MitigationController, MitigationRule};
use crate::core::report::{AttackReport, ReportInputs};
use crate::core::window::TrafficWindow;
use crate::core::DetectionConfig;
use crate::utils::saturating_sub;

/// Number of attacking sources carried into a report
const REPORT_TOP_SOURCES: usize = 10;

/// Lifecycle of the process-wide attack state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackPhase {
    #[default]
    Idle,
    /// A throttle-level decision was taken; no mitigation yet
    Detected,
    /// At least one block rule was applied during this episode
    Mitigating,
}

impl AttackPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackPhase::Idle => "idle",
            AttackPhase::Detected => "detected",
            AttackPhase::Mitigating => "mitigating",
        }
    }
}

/// Current attack episode, if any
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttackState {
    pub phase: AttackPhase,
    pub attack_type: Option<ThreatType>,
    pub started_at: Option<DateTime<Utc>>,
    pub detected_at: Option<DateTime<Utc>>,
    pub mitigated_at: Option<DateTime<Utc>>,
    /// Highest fused confidence seen during the episode
    pub peak_confidence: f64,
    /// Detections by threat type tag
    pub indicators: BTreeMap<String, u64>,
}

impl AttackState {
    pub fn is_active(&self) -> bool {
        self.phase != AttackPhase::Idle
    }

    pub fn is_mitigating(&self) -> bool {
        self.phase == AttackPhase::Mitigating
    }

    /// Returns true when this starts a new episode
    fn enter_detected(&mut self, threat_type: Option<ThreatType>, now: DateTime<Utc>) -> bool {
        if self.phase != AttackPhase::Idle {
            return false;
        }
        self.phase = AttackPhase::Detected;
        self.attack_type = threat_type;
        self.started_at = Some(now);
        self.detected_at = Some(now);
        true
    }

    /// Returns true when mitigation starts for the episode
    fn enter_mitigating(&mut self, threat_type: Option<ThreatType>, now: DateTime<Utc>) -> bool {
        if self.phase == AttackPhase::Mitigating {
            return false;
        }
        self.phase = AttackPhase::Mitigating;
        if threat_type.is_some() {
            self.attack_type = threat_type;
        }
        self.started_at.get_or_insert(now);
        self.detected_at.get_or_insert(now);
        self.mitigated_at = Some(now);
        true
    }
}

/// Engine-wide traffic counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficMetrics {
    pub baseline_rps: f64,
    pub current_rps: f64,
    pub peak_rps: f64,
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub detected_attacks: u64,
    pub false_positives: u64,
    pub invalid_events: u64,
    pub total_bytes: u64,
}

/// Decision for one evaluated event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub event_id: Option<String>,
    pub source: IpAddr,
    pub timestamp: DateTime<Utc>,
    pub threat_detected: bool,
    pub threat_type: Option<ThreatType>,
    pub confidence: f64,
    pub action: Action,
    /// Detector results that fired for this event, in evaluation order
    pub detections: Vec<DetectionResult>,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub protection_active: bool,
    pub attack_detected: bool,
    pub mitigation_active: bool,
    pub attack_phase: AttackPhase,
    pub attack_type: Option<ThreatType>,
    pub attack_start: Option<DateTime<Utc>>,
    pub attack_duration_seconds: Option<f64>,
    pub blocked_sources: Vec<IpAddr>,
    pub blocked_count: usize,
    pub recent_rules: Vec<MitigationRule>,
    pub metrics: TrafficMetrics,
    pub current_rps: f64,
    pub baseline_rps: f64,
    pub tracked_sources: usize,
}

struct EngineState {
    tracker: ConnectionTracker,
    window: TrafficWindow,
    baseline: BaselineEstimator,
    mitigation: MitigationController,
    attack: AttackState,
    metrics: TrafficMetrics,
}

/// Streaming detection and mitigation engine
pub struct ProtectionEngine {
    config: DetectionConfig,
    detectors: Vec<Box<dyn SignalDetector>>,
    fusion: FusionEngine,
    state: Mutex<EngineState>,
}

impl ProtectionEngine {
    /// Create an engine with the built-in detectors.
    ///
    /// # Returns
    ///
    /// * `Err(ConfigurationError)` if any option is out of range
    pub fn new(config: DetectionConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let state = EngineState {
            tracker: ConnectionTracker::new(config.clone()),
            window: TrafficWindow::new(config.window_capacity, config.window_duration_seconds),
            baseline: BaselineEstimator::new(&config),
            mitigation: MitigationController::new(config.block_ttl_seconds, config.rule_history_capacity),
            attack: AttackState::default(),
            metrics: TrafficMetrics {
                baseline_rps: config.baseline_rps_initial,
                ..TrafficMetrics::default()
            },
        };

        Ok(Self {
            fusion: FusionEngine::new(&config),
            detectors: default_detectors(),
            state: Mutex::new(state),
            config,
        })
    }

    /// Append a detector evaluated after the built-in ones
    pub fn with_detector(mut self, detector: Box<dyn SignalDetector>) -> Self {
        info!("Registered additional detector: {}", detector.name());
        self.detectors.push(detector);
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn detector_names(&self) -> Vec<String> {
        self.detectors.iter().map(|d| d.name().to_string()).collect()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evaluate one event: update aggregates, run the detectors, fuse their
    /// results and act on the decision.
    pub fn evaluate(&self, event: Event) -> DecisionResult {
        let started = Instant::now();
        let now = event.timestamp;

        let mut guard = self.lock();
        let state = &mut *guard;

        state.metrics.total_requests += 1;
        state.metrics.total_bytes = state.metrics.total_bytes.saturating_add(event.size);
        let overflowed = state.window.push(&event);
        if overflowed > 0 {
            debug!("Traffic window full, evicted {} oldest events", overflowed);
        }
        let current_rps = state.window.current_rate();
        state.metrics.current_rps = current_rps;
        if current_rps > state.metrics.peak_rps {
            state.metrics.peak_rps = current_rps;
        }

        let record = state.tracker.record(&event);

        if state.mitigation.is_blocked(&event.source, now) {
            state.metrics.blocked_requests += 1;
            let decision = DecisionResult {
                event_id: event.id,
                source: event.source,
                timestamp: now,
                threat_detected: true,
                threat_type: Some(ThreatType::BlockedSource),
                confidence: 1.0,
                action: Action::Block,
                detections: Vec::new(),
            };
            let baseline_rps = state.metrics.baseline_rps;
            drop(guard);
            publish(&decision, current_rps, baseline_rps, started);
            return decision;
        }

        let ctx = DetectionContext {
            record,
            window: &state.window,
            baseline: state.baseline.view(),
            config: &self.config,
            current_rps,
        };
        let detections = collect_detections(&self.detectors, &event, &ctx);
        let outcome = self.fusion.fuse(&detections);

        for detection in &detections {
            if let Some(threat) = &detection.threat_type {
                *state.attack.indicators.entry(threat.to_string()).or_insert(0) += 1;
            }
        }

        match outcome.action {
            Action::Block => {
                let reason = outcome.threat_type.as_ref().map_or("unknown", ThreatType::as_str);
                if state.mitigation.apply(event.source, reason, now) {
                    state.tracker.set_blocked(&event.source, true);
                    increment_counter!("ddos_mitigations_applied_total");
                }
                if state.attack.enter_mitigating(outcome.threat_type.clone(), now) {
                    state.metrics.detected_attacks += 1;
                    increment_counter!("ddos_attacks_detected_total");
                    info!(
                        "Attack mitigation started: {} (confidence {:.2}) from {}",
                        reason, outcome.confidence, event.source
                    );
                }
            }
            Action::Throttle => {
                if state.attack.enter_detected(outcome.threat_type.clone(), now) {
                    info!(
                        "Attack detected: {} (confidence {:.2}) from {}",
                        outcome.threat_type.as_ref().map_or("unknown", ThreatType::as_str),
                        outcome.confidence,
                        event.source
                    );
                }
            }
            Action::Monitor | Action::Allow => {}
        }

        if state.attack.is_active() && outcome.confidence > state.attack.peak_confidence {
            state.attack.peak_confidence = outcome.confidence;
        }

        if state.attack.phase == AttackPhase::Idle
            && outcome.action == Action::Allow
            && state.baseline.observe_quiet(&event, current_rps)
        {
            state.metrics.baseline_rps = state.baseline.baseline_rps();
        }

        let baseline_rps = state.metrics.baseline_rps;
        drop(guard);

        let decision = DecisionResult {
            event_id: event.id,
            source: event.source,
            timestamp: now,
            threat_detected: outcome.threat_detected,
            threat_type: outcome.threat_type,
            confidence: outcome.confidence,
            action: outcome.action,
            detections,
        };
        publish(&decision, current_rps, baseline_rps, started);
        decision
    }

    /// Validate a loosely-typed record and evaluate it.
    ///
    /// Invalid records are counted and rejected before reaching any detector.
    pub fn evaluate_raw(&self, raw: RawEvent) -> Result<DecisionResult, EventError> {
        match Event::try_from(raw) {
            Ok(event) => Ok(self.evaluate(event)),
            Err(e) => {
                self.lock().metrics.invalid_events += 1;
                increment_counter!("ddos_invalid_events_total");
                warn!("Rejected invalid event: {}", e);
                Err(e)
            }
        }
    }

    /// Block a source for the configured TTL; returns false if it already was
    pub fn apply(&self, source: IpAddr, reason: &str) -> bool {
        self.apply_at(source, reason, Utc::now())
    }

    pub fn apply_at(&self, source: IpAddr, reason: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        let applied = state.mitigation.apply(source, reason, now);
        if applied {
            state.tracker.set_blocked(&source, true);
            increment_counter!("ddos_mitigations_applied_total");
        }
        applied
    }

    pub fn is_blocked(&self, source: &IpAddr) -> bool {
        self.lock().mitigation.is_blocked(source, Utc::now())
    }

    /// Lift the block on a source reported as wrongly blocked.
    ///
    /// The false-positive counter is incremented either way; returns whether
    /// a block was lifted.
    pub fn record_false_positive(&self, source: &IpAddr) -> bool {
        let mut state = self.lock();
        state.metrics.false_positives += 1;
        let lifted = state.mitigation.lift(source);
        if lifted {
            state.tracker.set_blocked(source, false);
            info!("Block on {} lifted as a false positive", source);
        }
        lifted
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let state = self.lock();
        let blocked_sources = state.mitigation.blocked_sources(now);
        let current_rps = state.window.rate_at(now);
        let mut metrics = state.metrics.clone();
        metrics.current_rps = current_rps;

        StatusSnapshot {
            timestamp: now,
            protection_active: true,
            attack_detected: state.attack.is_active(),
            mitigation_active: state.attack.is_mitigating(),
            attack_phase: state.attack.phase,
            attack_type: state.attack.attack_type.clone(),
            attack_start: state.attack.started_at,
            attack_duration_seconds: state
                .attack
                .started_at
                .filter(|_| state.attack.is_active())
                .map(|start| seconds_between(start, now)),
            blocked_count: blocked_sources.len(),
            blocked_sources,
            recent_rules: state.mitigation.recent_rules(self.config.status_rule_tail),
            baseline_rps: metrics.baseline_rps,
            current_rps,
            metrics,
            tracked_sources: state.tracker.len(),
        }
    }

    /// Clear blocks, rule history and attack state in one step.
    ///
    /// Traffic counters and the learned baseline are kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        let was_active = state.attack.is_active();
        state.mitigation.reset();
        state.tracker.clear_blocked();
        state.attack = AttackState::default();
        if was_active {
            info!("Mitigation state reset, attack cleared");
        } else {
            debug!("Mitigation state reset with no active attack");
        }
    }

    /// Summarize the trailing `window` of activity
    pub fn report(&self, window: Duration) -> AttackReport {
        self.report_at(window, Utc::now())
    }

    pub fn report_at(&self, window: Duration, now: DateTime<Utc>) -> AttackReport {
        let since = saturating_sub(now, window);
        let state = self.lock();
        let inputs = ReportInputs {
            now,
            window,
            attack: state.attack.clone(),
            metrics: state.metrics.clone(),
            current_rps: state.window.rate_at(now),
            rules: state.mitigation.rules_since(since),
            blocked_sources: state.mitigation.blocked_sources(now),
            top_attackers: state.tracker.top_sources(REPORT_TOP_SOURCES, Some(since)),
            unique_sources: state.tracker.active_sources(since),
        };
        drop(state);
        AttackReport::generate(inputs)
    }

    /// Drop idle per-source records and expired blocks
    pub fn evict_stale(&self) -> usize {
        self.evict_stale_at(Utc::now())
    }

    pub fn evict_stale_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        for source in state.mitigation.prune_expired(now) {
            state.tracker.set_blocked(&source, false);
            debug!("Block on {} expired", source);
        }
        state.window.prune(now);
        let evicted = state.tracker.evict_stale(now);
        if evicted > 0 {
            debug!("Evicted {} stale source records", evicted);
        }
        evicted
    }
}

fn publish(decision: &DecisionResult, current_rps: f64, baseline_rps: f64, started: Instant) {
    increment_counter!("ddos_events_evaluated_total");
    increment_counter!("ddos_decisions_total", "action" => decision.action.as_str());
    if decision.threat_type == Some(ThreatType::BlockedSource) {
        increment_counter!("ddos_blocked_requests_total");
    }
    gauge!("ddos_current_rps", current_rps);
    gauge!("ddos_baseline_rps", baseline_rps);
    histogram!("ddos_evaluation_seconds", started.elapsed().as_secs_f64());

    debug!(
        "Event from {}: action={} confidence={:.2}",
        decision.source, decision.action, decision.confidence
    );
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}
