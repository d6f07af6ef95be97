//! Baseline estimation for normal traffic.
//!
//! The estimator only ever sees quiet events (no attack in progress, no
//! detection on the event). It keeps an exponential moving average of the
//! global rate, capped so that a slow ramp cannot drag the baseline up with
//! it, and periodically recomputes the average packet size.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::event::Event;
use crate::core::DetectionConfig;

const EMA_RETAIN: f64 = 0.9;
const EMA_WEIGHT: f64 = 0.1;
const SIZE_SAMPLE_CAPACITY: usize = 100;

/// Snapshot of the learned parameters the detectors read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineView {
    pub baseline_rps: f64,
    pub avg_packet_size: f64,
}

#[derive(Debug)]
pub struct BaselineEstimator {
    baseline_rps: f64,
    ceiling: f64,
    sample_interval: Duration,
    last_sample: Option<DateTime<Utc>>,
    avg_packet_size: f64,
    sizes: VecDeque<u64>,
    size_sum: u128,
    recalc_interval: u64,
    quiet_events: u64,
}

impl BaselineEstimator {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            baseline_rps: config.baseline_rps_initial,
            ceiling: config.baseline_rps_ceiling,
            sample_interval: Duration::milliseconds(config.baseline_sample_interval_ms as i64),
            last_sample: None,
            avg_packet_size: config.initial_avg_packet_size,
            sizes: VecDeque::with_capacity(SIZE_SAMPLE_CAPACITY),
            size_sum: 0,
            recalc_interval: config.baseline_recalc_interval,
            quiet_events: 0,
        }
    }

    pub fn view(&self) -> BaselineView {
        BaselineView {
            baseline_rps: self.baseline_rps,
            avg_packet_size: self.avg_packet_size,
        }
    }

    pub fn baseline_rps(&self) -> f64 {
        self.baseline_rps
    }

    /// Learn from one quiet event. Returns true when the rate baseline moved.
    pub fn observe_quiet(&mut self, event: &Event, current_rps: f64) -> bool {
        self.record_size(event.size);

        let due = self
            .last_sample
            .map_or(true, |last| event.timestamp - last >= self.sample_interval);
        if !due || current_rps <= 0.0 {
            return false;
        }

        self.baseline_rps = (self.baseline_rps * EMA_RETAIN + current_rps * EMA_WEIGHT).min(self.ceiling);
        self.last_sample = Some(event.timestamp);
        true
    }

    fn record_size(&mut self, size: u64) {
        if self.sizes.len() >= SIZE_SAMPLE_CAPACITY {
            if let Some(oldest) = self.sizes.pop_front() {
                self.size_sum -= u128::from(oldest);
            }
        }
        self.sizes.push_back(size);
        self.size_sum += u128::from(size);
        self.quiet_events += 1;

        if self.quiet_events % self.recalc_interval == 0 && !self.sizes.is_empty() {
            self.avg_packet_size = self.size_sum as f64 / self.sizes.len() as f64;
        }
    }
}
