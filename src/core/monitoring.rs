//! Monitoring for the DDoS mitigation service.
//!
//! A periodic loop that keeps the engine's bounded state fresh, publishes
//! gauges, raises global-rate alerts and, while an attack is active, writes a
//! report snapshot to the store off the hot path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use metrics::gauge;
use tokio::sync::broadcast::Receiver;
use tokio::time;

use crate::core::engine::ProtectionEngine;
use crate::core::report_store::ReportStore;
use crate::models::MonitoringConfig;
use crate::utils::seconds_duration;

/// Outcome of one monitoring cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSummary {
    pub evicted_sources: usize,
    pub rate_alert: bool,
    pub saved_report: Option<String>,
}

/// Monitoring service
pub struct Monitoring {
    engine: Arc<ProtectionEngine>,
    store: Arc<dyn ReportStore>,
    config: MonitoringConfig,
}

impl Monitoring {
    /// Create a new monitoring service
    pub fn new(engine: Arc<ProtectionEngine>, store: Arc<dyn ReportStore>, config: MonitoringConfig) -> Self {
        Self { engine, store, config }
    }

    /// Run cycles every `interval_seconds` until shutdown is signalled
    pub async fn start_monitoring(&self, mut shutdown: Receiver<()>) -> Result<()> {
        info!("Starting monitoring service...");
        let mut interval = time::interval(Duration::from_secs(self.config.interval_seconds.max(1) as u64));

        loop {
            tokio::select! {
                _ = interval.tick() => match self.run_cycle().await {
                    Ok(summary) => debug!("Monitoring cycle completed: {:?}", summary),
                    Err(e) => error!("Monitoring cycle failed: {}", e),
                },
                _ = shutdown.recv() => {
                    info!("Monitoring service stopped");
                    return Ok(());
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let evicted_sources = self.engine.evict_stale();
        let status = self.engine.status();

        gauge!("ddos_current_rps", status.current_rps);
        gauge!("ddos_baseline_rps", status.baseline_rps);
        gauge!("ddos_tracked_sources", status.tracked_sources as f64);
        gauge!("ddos_blocked_sources", status.blocked_count as f64);

        let limit = self.engine.config().global_rps_limit;
        let rate_alert = status.current_rps > limit;
        if rate_alert {
            warn!(
                "Request rate exceeds threshold: {:.1} rps (threshold: {:.1})",
                status.current_rps, limit
            );
        }

        let saved_report = if status.attack_detected {
            let window = seconds_duration(self.config.report_window_seconds)
                .ok_or_else(|| anyhow!("report window out of range: {}s", self.config.report_window_seconds))?;
            let report = self.engine.report(window);
            let id = self.store.save_report(&report).await?;
            info!(
                "Saved attack snapshot {} ({} blocked sources)",
                id, status.blocked_count
            );
            Some(id)
        } else {
            None
        };

        Ok(CycleSummary {
            evicted_sources,
            rate_alert,
            saved_report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::detectors::{DetectionContext, DetectionDetails, DetectionResult, DetectorError, SignalDetector, ThreatType};
    use crate::core::event::{Event, Protocol};
    use crate::core::report_store::{MockReportStore, ReportStoreError};
    use crate::core::DetectionConfig;
    use chrono::Utc;

    struct AlwaysBlock;

    impl SignalDetector for AlwaysBlock {
        fn name(&self) -> &str {
            "always_block"
        }

        fn evaluate(&self, _event: &Event, _ctx: &DetectionContext<'_>) -> Result<DetectionResult, DetectorError> {
            Ok(DetectionResult::detected(ThreatType::Volumetric, 0.95, DetectionDetails::default()))
        }
    }

    fn config() -> MonitoringConfig {
        MonitoringConfig {
            enabled: true,
            interval_seconds: 1,
            report_window_seconds: 600,
        }
    }

    fn event() -> Event {
        Event::new("10.0.0.1".parse().unwrap(), Protocol::Http, 500, Utc::now())
    }

    #[tokio::test]
    async fn test_idle_cycle_saves_nothing() {
        let engine = Arc::new(ProtectionEngine::new(DetectionConfig::default()).unwrap());
        engine.evaluate(event());

        let mut store = MockReportStore::new();
        store.expect_save_report().times(0);
        let monitoring = Monitoring::new(engine, Arc::new(store), config());

        let summary = monitoring.run_cycle().await.unwrap();
        assert_eq!(summary.saved_report, None);
        assert!(!summary.rate_alert);
    }

    #[tokio::test]
    async fn test_active_attack_snapshot_saved() {
        let engine = Arc::new(
            ProtectionEngine::new(DetectionConfig::default())
                .unwrap()
                .with_detector(Box::new(AlwaysBlock)),
        );
        engine.evaluate(event());

        let mut store = MockReportStore::new();
        store
            .expect_save_report()
            .times(1)
            .returning(|report| Ok(report.id.clone()));
        let monitoring = Monitoring::new(engine, Arc::new(store), config());

        let summary = monitoring.run_cycle().await.unwrap();
        assert!(summary.saved_report.unwrap().starts_with("REPORT-"));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let engine = Arc::new(
            ProtectionEngine::new(DetectionConfig::default())
                .unwrap()
                .with_detector(Box::new(AlwaysBlock)),
        );
        engine.evaluate(event());

        let mut store = MockReportStore::new();
        store.expect_save_report().returning(|_| {
            Err(ReportStoreError::SerializationError(
                serde_json::from_str::<u8>("x").unwrap_err(),
            ))
        });
        let monitoring = Monitoring::new(engine, Arc::new(store), config());

        assert!(monitoring.run_cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let engine = Arc::new(ProtectionEngine::new(DetectionConfig::default()).unwrap());
        let monitoring = Monitoring::new(engine, Arc::new(MockReportStore::new()), config());
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        tx.send(()).unwrap();
        let result = time::timeout(Duration::from_secs(5), monitoring.start_monitoring(rx)).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
