// tests/health_routes.rs
use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;

use promowatch_backend::routes::health::{health_scope, metrics_dump, CycleHealth};

#[actix_rt::test]
async fn health_reports_live_after_a_recent_cycle() {
    let health = CycleHealth::new();
    health.stamp(Utc::now());

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(health))
            .service(health_scope()),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_rt::test]
async fn health_reports_unavailable_when_cycles_stall() {
    let health = CycleHealth::new();
    health.stamp(Utc::now() - Duration::minutes(30));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(health))
            .service(health_scope()),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
}

#[actix_rt::test]
async fn health_reports_unavailable_before_first_cycle() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(CycleHealth::new()))
            .service(health_scope()),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
}

#[actix_rt::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let handle = PrometheusBuilder::new()
        .build_recorder()
        .handle();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(handle))
            .service(metrics_dump),
    )
    .await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}
