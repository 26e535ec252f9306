use std::sync::Arc;

use anyhow::Context;
use tokio::{signal, sync::watch};
use tracing::{error, info};

use food_order_api as api;
use food_order_api::{
    cache::{CartCache, InMemoryCartCache, RedisCartCache},
    message_queue::{DelayedQueue, InMemoryDelayedQueue, RedisDelayedQueue},
    repositories::{SqlCartRepository, SqlCatalogRepository, SqlOrderRepository},
    services::cart::CartStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Redis is only opened when a backend asks for it
    let redis_client = if cfg.uses_redis() {
        let client = redis::Client::open(cfg.redis_url.clone())
            .context("invalid redis url")?;
        Some(Arc::new(client))
    } else {
        None
    };

    let cart_cache: Arc<dyn CartCache> = match &redis_client {
        Some(client) if cfg.cart.backend.eq_ignore_ascii_case("redis") => Arc::new(
            RedisCartCache::new(client.clone(), cfg.cart.key_prefix.clone(), cfg.cart.ttl()),
        ),
        _ => Arc::new(InMemoryCartCache::new(cfg.cart.ttl())),
    };

    let refund_queue: Arc<dyn DelayedQueue> = match &redis_client {
        Some(client) if cfg.refund_window.backend.eq_ignore_ascii_case("redis") => Arc::new(
            RedisDelayedQueue::new(client.clone(), cfg.refund_window.queue_name.clone()),
        ),
        _ => Arc::new(InMemoryDelayedQueue::new()),
    };
    info!(
        cart_backend = %cfg.cart.backend,
        refund_backend = %cfg.refund_window.backend,
        "Backends selected"
    );

    // Init events
    let (event_sender, event_rx) = api::events::EventSender::channel(cfg.event_channel_capacity);
    tokio::spawn(api::events::process_events(event_rx));

    let carts = Arc::new(CartStore::new(
        cart_cache,
        Arc::new(SqlCartRepository::new(db_arc.clone())),
    ));

    // Aggregate app services used by HTTP handlers
    let services = api::handlers::AppServices::new(
        Arc::new(SqlOrderRepository::new(db_arc.clone())),
        Arc::new(SqlCatalogRepository::new(db_arc.clone())),
        carts,
        refund_queue,
        Some(Arc::new(event_sender)),
        &cfg.refund_window,
    );

    // Refund window worker
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(services.refund_window.clone().run_worker(shutdown_rx));

    let addr = cfg.bind_address();
    let app_state = api::AppState::new(cfg, services, Some(db_arc));
    let app = api::app_router(app_state);

    // Bind and serve
    info!("food-order-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        error!("Refund window worker panicked: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
