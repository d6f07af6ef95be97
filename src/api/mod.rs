//! API endpoints for the DDoS mitigation service.
//!
//! A thin HTTP adapter over the engine: event submission, status, reset,
//! reports, manual blocks, false-positive feedback and attack simulation.

use std::net::IpAddr;
use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use log::{debug, error, info, warn};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

use crate::core::engine::{DecisionResult, ProtectionEngine};
use crate::core::event::{Event, RawEvent};
use crate::core::report_store::ReportStore;
use crate::core::simulator::{spawn_simulation, SimulationHandle, SimulationPlan};
use crate::utils::seconds_duration;

const DEFAULT_REPORT_WINDOW_SECS: u64 = 3600;
const DEFAULT_REPORT_LIMIT: usize = 20;

pub struct ApiState {
    pub engine: Arc<ProtectionEngine>,
    pub store: Arc<dyn ReportStore>,
    pub simulation: Mutex<Option<SimulationHandle>>,
    pub metrics: Option<PrometheusHandle>,
    pub ingest: Option<mpsc::Sender<Event>>,
}

impl ApiState {
    pub fn new(engine: Arc<ProtectionEngine>, store: Arc<dyn ReportStore>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            engine,
            store,
            simulation: Mutex::new(None),
            metrics,
            ingest: None,
        }
    }

    /// Route `/events/ingest` into a background worker
    pub fn with_ingest(mut self, sender: mpsc::Sender<Event>) -> Self {
        self.ingest = Some(sender);
        self
    }
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/events").route(web::post().to(submit_event)))
            .service(web::resource("/events/batch").route(web::post().to(submit_batch)))
            .service(web::resource("/events/ingest").route(web::post().to(enqueue_events)))
            .service(web::resource("/status").route(web::get().to(get_status)))
            .service(web::resource("/reset").route(web::post().to(reset)))
            .service(web::resource("/report").route(web::get().to(generate_report)))
            .service(web::resource("/reports").route(web::get().to(list_reports)))
            .service(web::resource("/reports/statistics").route(web::get().to(report_statistics)))
            .service(web::resource("/reports/{id}").route(web::get().to(get_report)))
            .service(web::resource("/block").route(web::post().to(block_source)))
            .service(web::resource("/false-positive").route(web::post().to(false_positive)))
            .service(
                web::resource("/simulate")
                    .route(web::post().to(start_simulation))
                    .route(web::delete().to(stop_simulation)),
            ),
    )
    .service(web::resource("/metrics").route(web::get().to(render_metrics)));
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    fn new(error: impl ToString) -> Self {
        Self { error: error.to_string() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub accepted: usize,
    pub rejected: usize,
    pub decisions: Vec<DecisionResult>,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub queued: usize,
    pub rejected: usize,
    pub dropped: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReportQuery {
    pub window_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

/// Manual block or false-positive request
#[derive(Debug, Serialize, Deserialize)]
pub struct SourceRequest {
    pub source: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourceResponse {
    pub source: IpAddr,
    pub changed: bool,
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Evaluate one event
pub async fn submit_event(state: web::Data<ApiState>, req: web::Json<RawEvent>) -> impl Responder {
    match state.engine.evaluate_raw(req.into_inner()) {
        Ok(decision) => HttpResponse::Ok().json(decision),
        Err(e) => HttpResponse::BadRequest().json(ErrorResponse::new(e)),
    }
}

/// Evaluate a batch of events in order
pub async fn submit_batch(state: web::Data<ApiState>, req: web::Json<Vec<RawEvent>>) -> impl Responder {
    let mut response = BatchResponse {
        accepted: 0,
        rejected: 0,
        decisions: Vec::new(),
        errors: Vec::new(),
    };
    for raw in req.into_inner() {
        match state.engine.evaluate_raw(raw) {
            Ok(decision) => {
                response.accepted += 1;
                response.decisions.push(decision);
            }
            Err(e) => {
                response.rejected += 1;
                response.errors.push(e.to_string());
            }
        }
    }
    HttpResponse::Ok().json(response)
}

/// Hand events to the ingest worker without waiting for decisions
pub async fn enqueue_events(state: web::Data<ApiState>, req: web::Json<Vec<RawEvent>>) -> impl Responder {
    let sender = match &state.ingest {
        Some(sender) => sender,
        None => return HttpResponse::ServiceUnavailable().json(ErrorResponse::new("ingest worker not running")),
    };

    let mut response = IngestResponse {
        queued: 0,
        rejected: 0,
        dropped: 0,
    };
    for raw in req.into_inner() {
        let event = match Event::try_from(raw) {
            Ok(event) => event,
            Err(e) => {
                debug!("Rejected queued event: {}", e);
                response.rejected += 1;
                continue;
            }
        };
        match sender.try_send(event) {
            Ok(()) => response.queued += 1,
            Err(TrySendError::Full(_)) => response.dropped += 1,
            Err(TrySendError::Closed(_)) => {
                error!("Ingest channel closed");
                return HttpResponse::ServiceUnavailable().json(ErrorResponse::new("ingest worker stopped"));
            }
        }
    }
    if response.dropped > 0 {
        warn!("Ingest queue full, dropped {} events", response.dropped);
    }
    HttpResponse::Accepted().json(response)
}

pub async fn get_status(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.engine.status())
}

pub async fn reset(state: web::Data<ApiState>) -> impl Responder {
    state.engine.reset();
    HttpResponse::Ok().json(state.engine.status())
}

/// Build a report over the trailing window without persisting it
pub async fn generate_report(state: web::Data<ApiState>, query: web::Query<ReportQuery>) -> impl Responder {
    let window_secs = query.window_secs.unwrap_or(DEFAULT_REPORT_WINDOW_SECS);
    match seconds_duration(window_secs) {
        Some(window) => HttpResponse::Ok().json(state.engine.report(window)),
        None => HttpResponse::BadRequest().json(ErrorResponse::new(format!(
            "window_secs out of range: {}",
            window_secs
        ))),
    }
}

pub async fn list_reports(state: web::Data<ApiState>, query: web::Query<ListQuery>) -> impl Responder {
    match state.store.recent_reports(query.limit.unwrap_or(DEFAULT_REPORT_LIMIT)).await {
        Ok(reports) => HttpResponse::Ok().json(reports),
        Err(e) => {
            error!("Failed to list reports: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new(e))
        }
    }
}

pub async fn report_statistics(state: web::Data<ApiState>) -> impl Responder {
    match state.store.statistics().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Failed to compute report statistics: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse::new(e))
        }
    }
}

pub async fn get_report(state: web::Data<ApiState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match state.store.get_report(&id).await {
        Ok(Some(report)) => HttpResponse::Ok().json(report),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse::new(format!("report {} not found", id))),
        Err(e) => {
            error!("Failed to load report {}: {}", id, e);
            HttpResponse::InternalServerError().json(ErrorResponse::new(e))
        }
    }
}

fn parse_source(raw: &str) -> Result<IpAddr, HttpResponse> {
    raw.trim()
        .parse()
        .map_err(|_| HttpResponse::BadRequest().json(ErrorResponse::new(format!("invalid source address: {}", raw))))
}

pub async fn block_source(state: web::Data<ApiState>, req: web::Json<SourceRequest>) -> impl Responder {
    let source = match parse_source(&req.source) {
        Ok(source) => source,
        Err(resp) => return resp,
    };
    let reason = req.reason.as_deref().unwrap_or("manual");
    let changed = state.engine.apply(source, reason);
    HttpResponse::Ok().json(SourceResponse { source, changed })
}

pub async fn false_positive(state: web::Data<ApiState>, req: web::Json<SourceRequest>) -> impl Responder {
    let source = match parse_source(&req.source) {
        Ok(source) => source,
        Err(resp) => return resp,
    };
    let changed = state.engine.record_false_positive(&source);
    HttpResponse::Ok().json(SourceResponse { source, changed })
}

pub async fn start_simulation(state: web::Data<ApiState>, req: web::Json<SimulationPlan>) -> impl Responder {
    let mut running = state.simulation.lock().await;
    if running.as_ref().map_or(false, |handle| !handle.is_finished()) {
        return HttpResponse::Conflict().json(ErrorResponse::new("a simulation is already running"));
    }

    let plan = req.into_inner();
    if let Err(reason) = plan.check_bounds() {
        return HttpResponse::BadRequest().json(ErrorResponse::new(reason));
    }
    info!("Simulation requested: {:?}", plan);
    *running = Some(spawn_simulation(state.engine.clone(), plan.clone()));
    HttpResponse::Accepted().json(plan)
}

pub async fn stop_simulation(state: web::Data<ApiState>) -> impl Responder {
    let handle = state.simulation.lock().await.take();
    match handle {
        Some(handle) => HttpResponse::Ok().json(handle.stop().await),
        None => HttpResponse::NotFound().json(ErrorResponse::new("no simulation has been started")),
    }
}

pub async fn render_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().json(ErrorResponse::new("metrics recorder not installed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{AttackPhase, StatusSnapshot};
    use crate::core::fusion::Action;
    use crate::core::report::AttackReport;
    use crate::core::report_store::MemoryReportStore;
    use crate::core::simulator::{AttackProfile, SimulationStats};
    use crate::core::DetectionConfig;
    use actix_web::{test, App};
    use serde_json::json;

    fn state() -> web::Data<ApiState> {
        let engine = Arc::new(ProtectionEngine::new(DetectionConfig::default()).unwrap());
        web::Data::new(ApiState::new(engine, Arc::new(MemoryReportStore::new(10)), None))
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_submit_event() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/events")
            .set_json(json!({"src_ip": "10.0.0.1", "protocol": "TCP", "size": 512, "dst_port": 80, "flags": "SYN,ACK"}))
            .to_request();
        let decision: DecisionResult = test::call_and_read_body_json(&app, req).await;
        assert_eq!(decision.action, Action::Allow);
        assert_eq!(decision.source, "10.0.0.1".parse::<IpAddr>().unwrap());

        let req = test::TestRequest::post()
            .uri("/api/v1/events")
            .set_json(json!({"protocol": "TCP", "size": 512}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_batch_counts_rejections() {
        let data = state();
        let app = test::init_service(App::new().app_data(data.clone()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/events/batch")
            .set_json(json!([
                {"src_ip": "10.0.0.1", "size": 100, "protocol": "udp"},
                {"src_ip": "bogus", "size": 100},
                {"src_ip": "10.0.0.2", "size": 200, "protocol": "http"}
            ]))
            .to_request();
        let batch: BatchResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(batch.accepted, 2);
        assert_eq!(batch.rejected, 1);
        assert_eq!(data.engine.status().metrics.invalid_events, 1);
    }

    #[actix_web::test]
    async fn test_block_status_and_reset() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/block")
            .set_json(json!({"source": "203.0.113.9", "reason": "manual"}))
            .to_request();
        let blocked: SourceResponse = test::call_and_read_body_json(&app, req).await;
        assert!(blocked.changed);

        let req = test::TestRequest::post()
            .uri("/api/v1/events")
            .set_json(json!({"src_ip": "203.0.113.9", "size": 100}))
            .to_request();
        let decision: DecisionResult = test::call_and_read_body_json(&app, req).await;
        assert_eq!(decision.action, Action::Block);

        let req = test::TestRequest::get().uri("/api/v1/status").to_request();
        let status: StatusSnapshot = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.blocked_count, 1);
        assert_eq!(status.metrics.blocked_requests, 1);

        let req = test::TestRequest::post().uri("/api/v1/reset").to_request();
        let status: StatusSnapshot = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.blocked_count, 0);
        assert_eq!(status.attack_phase, AttackPhase::Idle);
    }

    #[actix_web::test]
    async fn test_invalid_block_source() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/block")
            .set_json(json!({"source": "999.1.1.1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_report_window_out_of_range() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        for uri in [
            "/api/v1/report?window_secs=10000000000000000",
            "/api/v1/report?window_secs=18446744073709551615",
        ] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST, "{}", uri);
        }

        let req = test::TestRequest::get().uri("/api/v1/report?window_secs=100000000000000").to_request();
        let report: AttackReport = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report.window_seconds, 100_000_000_000_000);
    }

    #[actix_web::test]
    async fn test_reports_round_trip_through_store() {
        let data = state();
        let app = test::init_service(App::new().app_data(data.clone()).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/v1/report?window_secs=60").to_request();
        let report: AttackReport = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report.window_seconds, 60);

        let req = test::TestRequest::get().uri(&format!("/api/v1/reports/{}", report.id)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);

        data.store.save_report(&report).await.unwrap();
        let req = test::TestRequest::get().uri(&format!("/api/v1/reports/{}", report.id)).to_request();
        let stored: AttackReport = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stored.id, report.id);

        let req = test::TestRequest::get().uri("/api/v1/reports?limit=5").to_request();
        let listed: Vec<AttackReport> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed.len(), 1);
    }

    #[actix_web::test]
    async fn test_simulation_start_and_stop() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        let req = test::TestRequest::delete().uri("/api/v1/simulate").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/v1/simulate")
            .set_json(json!({"profile": "slowloris", "waves": 100, "wave_size": 2, "wave_interval_ms": 60000, "seed": 3}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::ACCEPTED);

        let req = test::TestRequest::post()
            .uri("/api/v1/simulate")
            .set_json(json!({"profile": AttackProfile::Volumetric}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::CONFLICT);

        let req = test::TestRequest::delete().uri("/api/v1/simulate").to_request();
        let stats: SimulationStats = test::call_and_read_body_json(&app, req).await;
        assert!(stats.waves_completed < 100);
    }

    #[actix_web::test]
    async fn test_ingest_queue() {
        let data = state();
        let app = test::init_service(App::new().app_data(data.clone()).configure(config)).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/events/ingest")
            .set_json(json!([{"src_ip": "10.0.0.1", "size": 100}]))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);

        let (tx, mut rx) = mpsc::channel(1);
        let engine = data.engine.clone();
        let data = web::Data::new(ApiState::new(engine, Arc::new(MemoryReportStore::new(10)), None).with_ingest(tx));
        let app = test::init_service(App::new().app_data(data).configure(config)).await;
        let req = test::TestRequest::post()
            .uri("/api/v1/events/ingest")
            .set_json(json!([
                {"src_ip": "10.0.0.1", "size": 100},
                {"src_ip": "10.0.0.2", "size": 100},
                {"size": 100}
            ]))
            .to_request();
        let queued: IngestResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(queued.queued, 1);
        assert_eq!(queued.dropped, 1);
        assert_eq!(queued.rejected, 1);
        assert_eq!(rx.recv().await.unwrap().source, "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[actix_web::test]
    async fn test_oversized_simulation_rejected() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;

        for plan in [
            json!({"profile": "volumetric", "wave_size": 10_000_000}),
            json!({"profile": "volumetric", "waves": 4_000_000_000u32}),
            json!({"profile": "volumetric", "waves": 0}),
        ] {
            let req = test::TestRequest::post().uri("/api/v1/simulate").set_json(plan).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        }

        let req = test::TestRequest::delete().uri("/api/v1/simulate").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_metrics_without_recorder() {
        let app = test::init_service(App::new().app_data(state()).configure(config)).await;
        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
