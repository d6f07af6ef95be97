//! Report storage for the DDoS mitigation service.
//!
//! Reports are written off the hot path by the monitoring loop and the HTTP
//! adapter. Redis is the production backend; the in-memory store serves tests
//! and storage-less deployments.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::report::AttackReport;
use crate::models::StorageConfig;
use crate::utils::format_storage_key;

const REPORT_KEY_PREFIX: &str = "reports";
const REPORT_INDEX_KEY: &str = "reports:index";

/// Errors that can occur during report storage operations
#[derive(Error, Debug)]
pub enum ReportStoreError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Aggregate figures over the stored reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub total_reports: usize,
    pub reports_last_24h: usize,
    pub most_common_type: Option<String>,
    pub average_duration_seconds: f64,
    pub total_blocked_requests: u64,
}

impl ReportStatistics {
    pub fn from_reports(reports: &[AttackReport]) -> Self {
        if reports.is_empty() {
            return Self::default();
        }

        let since = Utc::now() - Duration::hours(24);
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut total_duration = 0.0;
        let mut total_blocked = 0;
        for report in reports {
            let tag = report
                .attack_summary
                .attack_type
                .as_ref()
                .map_or_else(|| "none".to_string(), |t| t.to_string());
            *by_type.entry(tag).or_insert(0) += 1;
            total_duration += report.attack_summary.duration_seconds;
            total_blocked += report.traffic_statistics.blocked_requests;
        }

        // ties resolve to the alphabetically first tag
        let most_common_type = by_type
            .into_iter()
            .fold(None, |best: Option<(String, usize)>, (tag, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((tag, count)),
            })
            .map(|(tag, _)| tag);

        Self {
            total_reports: reports.len(),
            reports_last_24h: reports.iter().filter(|r| r.created_at >= since).count(),
            most_common_type,
            average_duration_seconds: total_duration / reports.len() as f64,
            total_blocked_requests: total_blocked,
        }
    }
}

/// Persistence for generated attack reports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a report and return its id
    async fn save_report(&self, report: &AttackReport) -> Result<String, ReportStoreError>;

    async fn get_report(&self, id: &str) -> Result<Option<AttackReport>, ReportStoreError>;

    /// Most recent reports, newest first
    async fn recent_reports(&self, limit: usize) -> Result<Vec<AttackReport>, ReportStoreError>;

    async fn statistics(&self) -> Result<ReportStatistics, ReportStoreError>;
}

/// Redis-backed report store
pub struct RedisReportStore {
    client: redis::Client,
    index_capacity: usize,
    retention_seconds: usize,
}

impl RedisReportStore {
    pub fn new(client: redis::Client, config: &StorageConfig) -> Self {
        Self {
            client,
            index_capacity: config.report_capacity,
            retention_seconds: (config.retention_days * 24 * 60 * 60) as usize,
        }
    }

    fn report_key(id: &str) -> String {
        format_storage_key(REPORT_KEY_PREFIX, id)
    }
}

#[async_trait]
impl ReportStore for RedisReportStore {
    async fn save_report(&self, report: &AttackReport) -> Result<String, ReportStoreError> {
        let mut conn = self.client.get_async_connection().await?;
        let report_json = serde_json::to_string(report)?;

        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(Self::report_key(&report.id))
            .arg(report_json)
            .arg("EX")
            .arg(self.retention_seconds)
            .ignore()
            .cmd("LPUSH")
            .arg(REPORT_INDEX_KEY)
            .arg(&report.id)
            .ignore()
            .cmd("LTRIM")
            .arg(REPORT_INDEX_KEY)
            .arg(0)
            .arg(self.index_capacity.saturating_sub(1))
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!("Saved report {}", report.id);
        Ok(report.id.clone())
    }

    async fn get_report(&self, id: &str) -> Result<Option<AttackReport>, ReportStoreError> {
        let mut conn = self.client.get_async_connection().await?;
        let report_json: Option<String> = redis::cmd("GET")
            .arg(Self::report_key(id))
            .query_async(&mut conn)
            .await?;

        match report_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn recent_reports(&self, limit: usize) -> Result<Vec<AttackReport>, ReportStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.client.get_async_connection().await?;
        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(REPORT_INDEX_KEY)
            .arg(0)
            .arg(limit - 1)
            .query_async(&mut conn)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| Self::report_key(id)).collect();
        let reports_json: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;

        Ok(reports_json
            .into_iter()
            .flatten()
            .filter_map(|json| match serde_json::from_str(&json) {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Skipping unreadable stored report: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn statistics(&self) -> Result<ReportStatistics, ReportStoreError> {
        let reports = self.recent_reports(self.index_capacity).await?;
        Ok(ReportStatistics::from_reports(&reports))
    }
}

/// Bounded in-process report store
pub struct MemoryReportStore {
    reports: RwLock<VecDeque<AttackReport>>,
    capacity: usize,
}

impl MemoryReportStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            reports: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn save_report(&self, report: &AttackReport) -> Result<String, ReportStoreError> {
        let mut reports = self.reports.write().await;
        if reports.len() >= self.capacity {
            reports.pop_front();
        }
        reports.push_back(report.clone());
        Ok(report.id.clone())
    }

    async fn get_report(&self, id: &str) -> Result<Option<AttackReport>, ReportStoreError> {
        Ok(self.reports.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn recent_reports(&self, limit: usize) -> Result<Vec<AttackReport>, ReportStoreError> {
        Ok(self.reports.read().await.iter().rev().take(limit).cloned().collect())
    }

    async fn statistics(&self) -> Result<ReportStatistics, ReportStoreError> {
        let reports: Vec<AttackReport> = self.reports.read().await.iter().cloned().collect();
        Ok(ReportStatistics::from_reports(&reports))
    }
}
