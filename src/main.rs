//! Repricer backend binary: wires the store, traffic controller, pricing
//! pipeline and scheduler together and serves the admin API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repricer_backend::api::{routes, AppState};
use repricer_backend::buyback::BuybackEngine;
use repricer_backend::clock::{Clock, SystemClock};
use repricer_backend::marketplace::MarketClient;
use repricer_backend::models::{Config, RateLimitConfig};
use repricer_backend::pricing::{ProbeProtocol, RepricingOrchestrator};
use repricer_backend::scheduler::{
    Scheduler, TASK_RECOMPUTE_BUYBACK, TASK_REPRICE_FLEET, TASK_SYNC_LISTINGS, TASK_SYNC_ORDERS,
};
use repricer_backend::store::{Store, RATE_LIMIT_CONFIG_KEY};
use repricer_backend::sync::{SyncDriver, SyncScope};
use repricer_backend::traffic::{DispatchLog, ReqwestTransport, TrafficController};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing();

    info!("Repricer backend starting");

    let store = Arc::new(Store::new(&config.database_path)?);
    info!("Mirrored listings in store: {}", store.listings_count());

    // A previously persisted rate-limit blob wins over environment defaults.
    let rate_limits = match store
        .get_metadata(RATE_LIMIT_CONFIG_KEY)
        .ok()
        .flatten()
        .map(|raw| serde_json::from_str::<RateLimitConfig>(&raw))
    {
        Some(Ok(persisted)) => {
            info!("Using persisted rate-limit configuration");
            persisted
        }
        Some(Err(e)) => {
            warn!(error = %e, "persisted rate-limit blob unparseable, using environment");
            config.rate_limits
        }
        None => {
            let _ = store.set_metadata(
                RATE_LIMIT_CONFIG_KEY,
                &serde_json::to_string(&config.rate_limits)?,
            );
            config.rate_limits
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let transport = Arc::new(ReqwestTransport::new(&config.api_token)?);

    let log_store = store.clone();
    let log_sink: repricer_backend::traffic::LogSink = Arc::new(move |log: DispatchLog| {
        tracing::debug!(
            url = %log.url,
            priority = log.priority.as_str(),
            outcome = log.outcome.as_str(),
            status = ?log.response_status,
            duration_ms = log.duration_ms,
            "dispatch"
        );
        if let Err(e) = log_store.record_dispatch(&log) {
            warn!(error = %e, "failed to persist dispatch log");
        }
    });

    let controller =
        TrafficController::new(&rate_limits, transport, clock.clone(), Some(log_sink));
    let client = Arc::new(MarketClient::new(
        controller.clone(),
        config.api_base_url.clone(),
        clock.clone(),
    ));

    let sync = Arc::new(SyncDriver::new(client.clone(), store.clone(), clock.clone()));
    let orchestrator = Arc::new(RepricingOrchestrator::new(
        client.clone(),
        store.clone(),
        clock.clone(),
        config.default_country.clone(),
        config.velocity_window_days,
    ));
    let probe = Arc::new(ProbeProtocol::new(
        client.clone(),
        store.clone(),
        clock.clone(),
        config.default_country.clone(),
        config.probe_settle_ms,
        config.probe_dip_cents,
    ));
    let buyback = Arc::new(BuybackEngine::new(
        store.clone(),
        clock.clone(),
        config.buyback_margin_rate,
    ));

    let mut scheduler = Scheduler::new(clock.clone());

    {
        let sync = sync.clone();
        scheduler.register(
            TASK_SYNC_ORDERS,
            Duration::from_secs(config.sync_orders_interval_secs),
            Arc::new(move || {
                let sync = sync.clone();
                Box::pin(async move {
                    sync.sync_orders(SyncScope::Incremental).await?;
                    Ok(())
                })
            }),
        );
    }
    {
        let sync = sync.clone();
        scheduler.register(
            TASK_SYNC_LISTINGS,
            Duration::from_secs(config.sync_listings_interval_secs),
            Arc::new(move || {
                let sync = sync.clone();
                Box::pin(async move {
                    sync.sync_listings().await?;
                    Ok(())
                })
            }),
        );
    }
    {
        let orchestrator = orchestrator.clone();
        let store = store.clone();
        scheduler.register(
            TASK_REPRICE_FLEET,
            Duration::from_secs(config.reprice_interval_secs),
            Arc::new(move || {
                let orchestrator = orchestrator.clone();
                let store = store.clone();
                Box::pin(async move {
                    // Sequential on purpose: the traffic controller already
                    // paces the remote; a second layer of parallelism would
                    // only add contention.
                    let listings = store.active_listing_ids()?;
                    let total = listings.len();
                    let mut failed = 0usize;
                    for listing_id in listings {
                        if let Err(e) = orchestrator.reprice(&listing_id).await {
                            warn!(listing_id = %listing_id, error = %e, "fleet reprice: listing failed");
                            failed += 1;
                        }
                    }
                    info!(total, failed, "fleet reprice pass finished");
                    Ok(())
                })
            }),
        );
    }
    {
        let buyback = buyback.clone();
        scheduler.register(
            TASK_RECOMPUTE_BUYBACK,
            Duration::from_secs(config.buyback_interval_secs),
            Arc::new(move || {
                let buyback = buyback.clone();
                Box::pin(async move {
                    buyback.recompute_all()?;
                    Ok(())
                })
            }),
        );
    }

    let scheduler = Arc::new(scheduler);
    scheduler.start();
    info!("Scheduler started with 4 standing tasks");

    let state = AppState {
        config: config.clone(),
        store,
        controller: controller.clone(),
        client,
        sync,
        orchestrator,
        probe,
        scheduler: scheduler.clone(),
    };

    let app = Router::new()
        .route("/health", get(routes::health_check))
        .route("/webhook", post(routes::post_webhook))
        .route("/api/probe/:listing_id", post(routes::post_probe))
        .route("/api/recover/:listing_id", post(routes::post_recover))
        .route("/api/reprice/:listing_id", post(routes::post_reprice))
        .route("/api/sync/orders", post(routes::post_sync_orders))
        .route("/api/sync/listings", post(routes::post_sync_listings))
        .route("/api/orders", get(routes::get_orders))
        .route("/api/orders/:order_id/messages", post(routes::post_order_message))
        .route("/api/orders/:order_id/suspend", post(routes::post_order_suspend))
        .route("/api/listings", get(routes::get_listings))
        .route("/api/listings/bulk", post(routes::post_bulk_upload))
        .route("/api/listings/:listing_id/history", get(routes::get_price_history))
        .route("/api/buyback", get(routes::get_buyback_prices))
        .route(
            "/api/parameters/:sku",
            get(routes::get_parameters).post(routes::post_parameters),
        )
        .route("/api/scheduler/status", get(routes::get_scheduler_status))
        .route("/api/scheduler/trigger/:task", post(routes::post_scheduler_trigger))
        .route("/api/scheduler/trigger-all", post(routes::post_scheduler_trigger_all))
        .route(
            "/api/rate-limits",
            get(routes::get_rate_limits).put(routes::put_rate_limits),
        )
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Admin API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop ticking, reject queued traffic, give in-flight requests a
    // bounded window to resolve.
    scheduler.stop();
    controller.shutdown();
    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("Repricer backend stopped");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repricer_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
