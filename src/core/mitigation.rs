//! Mitigation controller.
//!
//! Blocked-set membership is keyed by source with the expiry of the rule
//! that put it there; the rule list itself is only a bounded history for
//! status and reports.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::core::fusion::Action;
use crate::utils::saturating_add;

/// A timed directive applied against a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationRule {
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub target: IpAddr,
    pub reason: String,
    pub duration_seconds: u64,
}

impl MitigationRule {
    pub fn expires_at(&self) -> DateTime<Utc> {
        saturating_add(self.timestamp, Duration::seconds(self.duration_seconds as i64))
    }
}

#[derive(Debug)]
pub struct MitigationController {
    blocked: HashMap<IpAddr, DateTime<Utc>>,
    history: VecDeque<MitigationRule>,
    history_capacity: usize,
    ttl_seconds: u64,
}

impl MitigationController {
    pub fn new(ttl_seconds: u64, history_capacity: usize) -> Self {
        Self {
            blocked: HashMap::new(),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
            ttl_seconds,
        }
    }

    /// Block `source` for the configured TTL.
    ///
    /// Reapplying to a source that is still blocked is a no-op; returns
    /// whether a new rule was recorded.
    pub fn apply(&mut self, source: IpAddr, reason: &str, now: DateTime<Utc>) -> bool {
        if self.is_blocked(&source, now) {
            return false;
        }

        let rule = MitigationRule {
            timestamp: now,
            action: Action::Block,
            target: source,
            reason: reason.to_string(),
            duration_seconds: self.ttl_seconds,
        };
        self.blocked.insert(source, rule.expires_at());
        if self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(rule);

        info!("Mitigation applied: blocked {} for {}", source, reason);
        true
    }

    pub fn is_blocked(&self, source: &IpAddr, now: DateTime<Utc>) -> bool {
        self.blocked.get(source).map_or(false, |expires| *expires > now)
    }

    /// Remove a block before it expires; returns whether one was active
    pub fn lift(&mut self, source: &IpAddr) -> bool {
        self.blocked.remove(source).is_some()
    }

    /// Drop expired blocks and return the sources they covered
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> Vec<IpAddr> {
        let expired: Vec<IpAddr> = self
            .blocked
            .iter()
            .filter(|(_, expires)| **expires <= now)
            .map(|(source, _)| *source)
            .collect();
        for source in &expired {
            self.blocked.remove(source);
        }
        expired
    }

    pub fn blocked_sources(&self, now: DateTime<Utc>) -> Vec<IpAddr> {
        let mut sources: Vec<IpAddr> = self
            .blocked
            .iter()
            .filter(|(_, expires)| **expires > now)
            .map(|(source, _)| *source)
            .collect();
        sources.sort_unstable();
        sources
    }

    /// The most recent `limit` rules, oldest first
    pub fn recent_rules(&self, limit: usize) -> Vec<MitigationRule> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn rules_since(&self, since: DateTime<Utc>) -> Vec<MitigationRule> {
        self.history.iter().filter(|rule| rule.timestamp >= since).cloned().collect()
    }

    pub fn rule_count(&self) -> usize {
        self.history.len()
    }

    pub fn reset(&mut self) {
        self.blocked.clear();
        self.history.clear();
    }
}
