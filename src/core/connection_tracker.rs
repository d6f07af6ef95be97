//! Per-source connection tracking.
//!
//! Keeps one [`ConnectionRecord`] per source address with aggregate
//! counters, recent arrival times for rate checks, and a bounded history of
//! pattern fingerprints. All per-source state is bounded, and stale records
//! are evicted after a retention period so spoofed sources cannot grow the
//! table without limit.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::event::Event;
use crate::core::DetectionConfig;
use crate::utils::saturating_sub;

/// Fixed-capacity fingerprint ring with incremental frequency counts over
/// the most recent `window` entries.
#[derive(Debug, Clone)]
pub struct PatternHistory {
    entries: VecDeque<u64>,
    capacity: usize,
    window: usize,
    recent_counts: HashMap<u64, usize>,
}

impl PatternHistory {
    pub fn new(capacity: usize, window: usize) -> Self {
        let window = window.min(capacity).max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            window,
            recent_counts: HashMap::with_capacity(window),
        }
    }

    pub fn push(&mut self, fingerprint: u64) {
        self.entries.push_back(fingerprint);
        *self.recent_counts.entry(fingerprint).or_insert(0) += 1;

        // the entry that just slid out of the recent window
        if self.entries.len() > self.window {
            let leaving = self.entries[self.entries.len() - 1 - self.window];
            if let Some(count) = self.recent_counts.get_mut(&leaving) {
                *count -= 1;
                if *count == 0 {
                    self.recent_counts.remove(&leaving);
                }
            }
        }

        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Share of the recent window equal to `fingerprint`, once the window is full
    pub fn repetition_rate(&self, fingerprint: u64) -> Option<f64> {
        if self.entries.len() < self.window {
            return None;
        }
        let count = self.recent_counts.get(&fingerprint).copied().unwrap_or(0);
        Some(count as f64 / self.window as f64)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Aggregate state for one source address
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub source: IpAddr,
    pub request_count: u64,
    pub bytes: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub blocked: bool,
    patterns: PatternHistory,
    arrivals: VecDeque<DateTime<Utc>>,
    syn_arrivals: VecDeque<DateTime<Utc>>,
}

impl ConnectionRecord {
    fn new(source: IpAddr, now: DateTime<Utc>, config: &DetectionConfig) -> Self {
        Self {
            source,
            request_count: 0,
            bytes: 0,
            first_seen: now,
            last_seen: now,
            blocked: false,
            patterns: PatternHistory::new(config.pattern_history_capacity, config.repetition_window),
            arrivals: VecDeque::new(),
            syn_arrivals: VecDeque::new(),
        }
    }

    pub fn patterns(&self) -> &PatternHistory {
        &self.patterns
    }

    /// Requests per second from this source over the trailing window
    pub fn request_rate(&self, window_seconds: f64) -> f64 {
        self.arrivals.len() as f64 / window_seconds
    }

    /// Half-open SYNs per second from this source over the trailing window
    pub fn syn_rate(&self, window_seconds: f64) -> f64 {
        self.syn_arrivals.len() as f64 / window_seconds
    }

    /// Time between the first and the latest event from this source
    pub fn connection_age(&self) -> Duration {
        self.last_seen - self.first_seen
    }

    pub fn summary(&self) -> SourceSummary {
        SourceSummary {
            source: self.source,
            requests: self.request_count,
            bytes: self.bytes,
            blocked: self.blocked,
            last_seen: self.last_seen,
        }
    }
}

/// Per-source line in status and report output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: IpAddr,
    pub requests: u64,
    pub bytes: u64,
    pub blocked: bool,
    pub last_seen: DateTime<Utc>,
}

/// Source-keyed table of connection records
#[derive(Debug)]
pub struct ConnectionTracker {
    records: HashMap<IpAddr, ConnectionRecord>,
    config: DetectionConfig,
    rate_window: Duration,
    retention: Duration,
}

impl ConnectionTracker {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            records: HashMap::new(),
            rate_window: Duration::seconds(config.window_duration_seconds as i64),
            retention: Duration::seconds(config.source_retention_seconds as i64),
            config,
        }
    }

    /// Account for one event from its source and return the updated record
    pub fn record(&mut self, event: &Event) -> &ConnectionRecord {
        let now = event.timestamp;
        if !self.records.contains_key(&event.source) && self.records.len() >= self.config.max_tracked_sources {
            self.make_room(now);
        }

        let config = &self.config;
        let record = self
            .records
            .entry(event.source)
            .or_insert_with(|| ConnectionRecord::new(event.source, now, config));

        record.request_count += 1;
        record.bytes = record.bytes.saturating_add(event.size);
        if now > record.last_seen {
            record.last_seen = now;
        }
        record.patterns.push(event.fingerprint());

        let cutoff = saturating_sub(now, self.rate_window);
        push_bounded(&mut record.arrivals, now, cutoff, config.window_capacity);
        if event.is_half_open_syn() {
            push_bounded(&mut record.syn_arrivals, now, cutoff, config.window_capacity);
        } else {
            trim_before(&mut record.syn_arrivals, cutoff);
        }

        record
    }

    pub fn get(&self, source: &IpAddr) -> Option<&ConnectionRecord> {
        self.records.get(source)
    }

    pub fn set_blocked(&mut self, source: &IpAddr, blocked: bool) {
        if let Some(record) = self.records.get_mut(source) {
            record.blocked = blocked;
        }
    }

    pub fn clear_blocked(&mut self) {
        for record in self.records.values_mut() {
            record.blocked = false;
        }
    }

    /// Drop records idle for longer than the retention period
    pub fn evict_stale(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = saturating_sub(now, self.retention);
        let before = self.records.len();
        self.records.retain(|_, record| record.last_seen >= cutoff);
        before - self.records.len()
    }

    /// Free space for a new source: stale records first, then the least
    /// recently seen tenth of the table.
    fn make_room(&mut self, now: DateTime<Utc>) {
        let mut evicted = self.evict_stale(now);
        if self.records.len() >= self.config.max_tracked_sources {
            let mut by_age: Vec<(DateTime<Utc>, IpAddr)> = self
                .records
                .values()
                .map(|record| (record.last_seen, record.source))
                .collect();
            let batch = (by_age.len() / 10).max(1);
            by_age.select_nth_unstable(batch - 1);
            for (_, source) in by_age.into_iter().take(batch) {
                self.records.remove(&source);
                evicted += 1;
            }
        }
        debug!("Connection table full, evicted {} records", evicted);
    }

    /// Sources with the most requests, optionally only those seen since `since`
    pub fn top_sources(&self, limit: usize, since: Option<DateTime<Utc>>) -> Vec<SourceSummary> {
        let mut sources: Vec<SourceSummary> = self
            .records
            .values()
            .filter(|record| since.map_or(true, |since| record.last_seen >= since))
            .map(ConnectionRecord::summary)
            .collect();
        sources.sort_by(|a, b| b.requests.cmp(&a.requests).then(a.source.cmp(&b.source)));
        sources.truncate(limit);
        sources
    }

    pub fn active_sources(&self, since: DateTime<Utc>) -> usize {
        self.records.values().filter(|record| record.last_seen >= since).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn push_bounded(times: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, cutoff: DateTime<Utc>, cap: usize) {
    trim_before(times, cutoff);
    if times.len() >= cap {
        times.pop_front();
    }
    times.push_back(now);
}

fn trim_before(times: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while times.front().map_or(false, |t| *t <= cutoff) {
        times.pop_front();
    }
}
