// src/routes/health.rs
use actix_web::{get, web, HttpResponse, Scope};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Liveness means the orchestrator produced a cycle within this window.
pub const LIVENESS_WINDOW_SECS: i64 = 20 * 60;

/// Shared stamp of the last completed cycle. Cheap to clone; zero means the
/// first cycle has not finished yet.
#[derive(Clone, Default)]
pub struct CycleHealth {
    last_cycle_epoch: Arc<AtomicI64>,
}

impl CycleHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stamp(&self, at: DateTime<Utc>) {
        self.last_cycle_epoch.store(at.timestamp(), Ordering::Relaxed);
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        let last = self.last_cycle_epoch.load(Ordering::Relaxed);
        last != 0 && now.timestamp() - last <= LIVENESS_WINDOW_SECS
    }
}

#[get("")]
async fn health_check(health: web::Data<CycleHealth>) -> HttpResponse {
    if health.is_live(Utc::now()) {
        HttpResponse::Ok().body("OK")
    } else {
        HttpResponse::ServiceUnavailable().body("no recent cycle")
    }
}

pub fn health_scope() -> Scope {
    web::scope("/health").service(health_check)
}

#[get("/metrics")]
pub async fn metrics_dump(handle: web::Data<PrometheusHandle>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}
