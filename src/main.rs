use actix_web::{web, App, HttpServer};
use metrics_exporter_prometheus::PrometheusBuilder;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use promowatch_backend::{
    config::settings::Settings,
    db::{config_store::ConfigStore, store::Store},
    routes::health::{health_scope, metrics_dump, CycleHealth},
    services::{
        autotuner::AutoTuner,
        notifier::{PgSubscriberRegistry, TelegramNotifier},
        orchestrator::{CycleOptions, Orchestrator},
        scraper::HttpScraper,
    },
    utils::clock::SystemClock,
};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    info!("starting promowatch backend…");

    let settings = Settings::new().unwrap_or_else(|e| {
        eprintln!("Failed to load settings: {e}");
        std::process::exit(1);
    });

    let outbound_timeout = Duration::from_secs(settings.outbound_timeout_secs);
    let pg_pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(outbound_timeout)
        .connect(&settings.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pg_pool).await?;

    let store = Store::new(pg_pool.clone(), outbound_timeout);
    let config = ConfigStore::new(pg_pool.clone(), outbound_timeout);
    config.seed_defaults().await?;

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    let scraper = Arc::new(HttpScraper::new(settings.feed_url.clone(), outbound_timeout)?);
    let notifier = Arc::new(TelegramNotifier::new(
        &settings.telegram_bot_token,
        outbound_timeout,
    )?);
    let subscribers = Arc::new(PgSubscriberRegistry::new(pg_pool.clone(), outbound_timeout));
    let health = CycleHealth::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- autotuner: startup pass, then the slow interval ---------------------
    {
        let tuner = AutoTuner::new(store.clone(), config.clone());
        let interval = Duration::from_secs(settings.autotune_interval_hours * 3600);
        tokio::spawn(tuner.run_forever(interval));
    }

    // --- orchestrator loop ---------------------------------------------------
    let orchestrator = Orchestrator::new(
        store,
        config,
        scraper,
        notifier,
        subscribers,
        Arc::new(SystemClock),
        health.clone(),
        CycleOptions::from_settings(&settings),
    );
    let orchestrator_task = tokio::spawn(orchestrator.run(shutdown_rx));

    // --- health + metrics server --------------------------------------------
    let port = settings.server_port;
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(health.clone()))
            .app_data(web::Data::new(prometheus.clone()))
            .service(health_scope())
            .service(metrics_dump)
    })
    .bind(("0.0.0.0", port))?
    .disable_signals()
    .run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Shutdown flows top-down: drain the orchestrator, then stop the server.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining current cycle");
    let _ = shutdown_tx.send(true);
    if let Err(e) = orchestrator_task.await {
        error!(error = %e, "orchestrator task panicked");
    }
    server_handle.stop(true).await;
    let _ = server_task.await;
    Ok(())
}
