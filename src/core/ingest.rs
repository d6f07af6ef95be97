//! Multi-producer ingestion into a shared engine.
//!
//! Capture sessions and HTTP handlers push events into an mpsc channel; one
//! worker drains it into [`ProtectionEngine::evaluate`], which preserves
//! per-source arrival order for each producer.

use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::core::engine::ProtectionEngine;
use crate::core::event::Event;
use crate::core::fusion::Action;

/// Counts of what a worker processed before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub processed: u64,
    pub blocked: u64,
    pub throttled: u64,
}

/// Drain `events` into the engine until every sender is dropped or
/// shutdown is signalled.
pub fn spawn_ingest_worker(
    engine: Arc<ProtectionEngine>,
    mut events: mpsc::Receiver<Event>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<IngestSummary> {
    tokio::spawn(async move {
        let mut summary = IngestSummary::default();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Ingest worker stopping on shutdown");
                    break;
                }
                next = events.recv() => match next {
                    Some(event) => {
                        let decision = engine.evaluate(event);
                        summary.processed += 1;
                        match decision.action {
                            Action::Block => summary.blocked += 1,
                            Action::Throttle => summary.throttled += 1,
                            Action::Monitor | Action::Allow => {}
                        }
                    }
                    None => {
                        debug!("Ingest channel closed");
                        break;
                    }
                },
            }
        }
        info!(
            "Ingest worker processed {} events ({} blocked, {} throttled)",
            summary.processed, summary.blocked, summary.throttled
        );
        summary
    })
}
