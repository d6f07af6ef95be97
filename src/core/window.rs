//! Sliding traffic window.
//!
//! Holds the most recent events (bounded by count and by a trailing time
//! interval) so that global rates and SYN counts can be read without
//! rescanning history.

use std::collections::VecDeque;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};

use crate::core::event::Event;
use crate::utils::saturating_sub;

#[derive(Debug, Clone)]
struct WindowEntry {
    timestamp: DateTime<Utc>,
    source: IpAddr,
    size: u64,
    half_open_syn: bool,
}

/// Bounded ordered sequence of recent events
#[derive(Debug)]
pub struct TrafficWindow {
    entries: VecDeque<WindowEntry>,
    capacity: usize,
    duration: Duration,
    duration_secs: f64,
    half_open_syns: usize,
    bytes: u64,
}

impl TrafficWindow {
    pub fn new(capacity: usize, duration_seconds: u64) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            duration: Duration::seconds(duration_seconds as i64),
            duration_secs: duration_seconds as f64,
            half_open_syns: 0,
            bytes: 0,
        }
    }

    /// Append an event, evicting the oldest entries that overflow the
    /// capacity or fall out of the trailing interval ending at the event.
    ///
    /// Returns the number of entries evicted because of capacity.
    pub fn push(&mut self, event: &Event) -> usize {
        let mut overflowed = 0;
        while self.entries.len() >= self.capacity {
            self.pop_front();
            overflowed += 1;
        }

        let entry = WindowEntry {
            timestamp: event.timestamp,
            source: event.source,
            size: event.size,
            half_open_syn: event.is_half_open_syn(),
        };
        if entry.half_open_syn {
            self.half_open_syns += 1;
        }
        self.bytes = self.bytes.saturating_add(entry.size);
        self.entries.push_back(entry);

        self.prune(event.timestamp);
        overflowed
    }

    /// Drop entries at or before `now - duration`
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = saturating_sub(now, self.duration);
        while self
            .entries
            .front()
            .map_or(false, |entry| entry.timestamp <= cutoff)
        {
            self.pop_front();
        }
    }

    fn pop_front(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            if entry.half_open_syn {
                self.half_open_syns -= 1;
            }
            self.bytes = self.bytes.saturating_sub(entry.size);
        }
    }

    /// Rate over the live window, as maintained by the last push
    pub fn current_rate(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.len() as f64 / self.duration_secs
    }

    /// Rate over the trailing interval ending at `now`, without mutating
    pub fn rate_at(&self, now: DateTime<Utc>) -> f64 {
        let cutoff = saturating_sub(now, self.duration);
        let count = self
            .entries
            .iter()
            .rev()
            .take_while(|entry| entry.timestamp > cutoff)
            .count();
        count as f64 / self.duration_secs
    }

    /// TCP SYN-without-ACK events currently in the window
    pub fn half_open_syn_count(&self) -> usize {
        self.half_open_syns
    }

    /// Distinct sources in the window
    pub fn unique_sources(&self) -> usize {
        let mut sources: Vec<IpAddr> = self.entries.iter().map(|e| e.source).collect();
        sources.sort_unstable();
        sources.dedup();
        sources.len()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{Protocol, TcpFlags};

    fn event_at(base: DateTime<Utc>, offset_ms: i64, syn: bool) -> Event {
        let event = Event::new(
            "10.0.0.1".parse().unwrap(),
            Protocol::Tcp,
            100,
            base + Duration::milliseconds(offset_ms),
        );
        if syn {
            event.with_flags(TcpFlags::syn())
        } else {
            event
        }
    }

    #[test]
    fn test_empty_window_has_zero_rate() {
        let window = TrafficWindow::new(10, 5);
        assert_eq!(window.current_rate(), 0.0);
        assert_eq!(window.rate_at(Utc::now()), 0.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let base = Utc::now();
        let mut window = TrafficWindow::new(3, 5);
        for i in 0..5 {
            window.push(&event_at(base, i, i == 0));
        }
        assert_eq!(window.len(), 3);
        // the only SYN was evicted with the oldest entry
        assert_eq!(window.half_open_syn_count(), 0);
        assert_eq!(window.bytes(), 300);
    }

    #[test]
    fn test_time_based_pruning() {
        let base = Utc::now();
        let mut window = TrafficWindow::new(100, 5);
        for i in 0..10 {
            window.push(&event_at(base, i * 1000, true));
        }
        // events at 5s..9s remain after the push at 9s
        assert_eq!(window.len(), 5);
        assert_eq!(window.half_open_syn_count(), 5);
        assert!((window.current_rate() - 1.0).abs() < f64::EPSILON);
        assert!((window.rate_at(base + Duration::seconds(11)) - 0.6).abs() < 1e-9);
    }
}
