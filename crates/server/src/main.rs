//! Herald server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use fred::prelude::*;
use herald_api::{AppState, WhatsAppWebhookSettings, router as api_router};
use herald_common::Config;
use herald_core::services::providers::SenderFactoryService;
use herald_core::store::DatabaseStore;
use herald_core::{
    CampaignStoreService, Dispatcher, EventPublisherService, MessageStoreService, Providers,
    StatusIngestion,
};
use herald_queue::{CampaignQueue, CampaignScheduler, CampaignWorker, RedisBackend, RedisPubSub};
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting herald server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = herald_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    herald_db::migrate(&db).await?;
    info!("Migrations completed");

    // Connect to Redis for the job queue and event channel
    info!("Connecting to Redis...");
    let redis_config = fred::types::config::Config::from_url(&config.redis.url)?;
    let redis_client = fred::clients::Client::new(redis_config, None, None, None);
    redis_client.connect();
    redis_client.wait_for_connect().await?;
    let redis_client = Arc::new(redis_client);
    info!(prefix = %config.redis.prefix, "Connected to Redis");

    // Providers
    let providers = Providers::from_config(&config.providers)?;
    if !config.providers.whatsapp_available() && !config.providers.twilio_available() {
        warn!("No messaging provider configured; campaigns will fail at dispatch");
    }
    let senders: SenderFactoryService = Arc::new(providers);

    // Stores and events
    let store = Arc::new(DatabaseStore::new(Arc::new(db)));
    let campaigns: CampaignStoreService = store.clone();
    let messages: MessageStoreService = store.clone();
    let events: EventPublisherService =
        Arc::new(RedisPubSub::new(redis_client.clone(), &config.redis.prefix));

    // Queue and worker
    let dispatcher = Dispatcher::new(campaigns.clone(), messages.clone(), events.clone())
        .with_default_rate(config.dispatch.default_rate_limit_per_minute);
    let worker = Arc::new(CampaignWorker::new(
        campaigns.clone(),
        dispatcher,
        senders,
        events.clone(),
    ));
    let backend = Arc::new(RedisBackend::new(redis_client.clone(), &config.redis.prefix));
    let queue = Arc::new(CampaignQueue::new(backend, &config.queue));

    queue.recover(store.as_ref()).await?;

    let runner = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.run(worker).await })
    };

    // HTTP surface
    let scheduler = CampaignScheduler::new(campaigns.clone(), queue.clone(), events);
    let ingestion = StatusIngestion::new(campaigns, messages);
    let state = AppState::new(
        scheduler,
        ingestion,
        WhatsAppWebhookSettings::from_config(&config.providers),
    );

    let app = api_router()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining campaign queue...");
    queue.shutdown();
    if let Err(e) = runner.await {
        error!(error = %e, "Campaign queue task failed");
    }

    if let Err(e) = redis_client.quit().await {
        warn!(error = %e, "Failed to close Redis connection");
    }

    info!("Server shutdown complete");
    Ok(())
}
