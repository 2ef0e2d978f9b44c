use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use grist_bus::kafka::{KafkaConsumer, KafkaProducer, OffsetReset};
use grist_core::health::{Health, HealthIndicator, HealthStatus};
use grist_core::registry::ChannelRegistry;
use grist_core::server;
use grist_extract::Extractor;
use grist_outbox::pg::PgOutboxStore;
use grist_outbox::{Outbox, OutboxProcessor};
use grist_resource::config::ResourceServiceConfig;
use grist_resource::controllers;
use grist_resource::services::{CompletionConsumer, ResourceService};
use grist_resource::store::pg::PgResourceStore;
use grist_resource::AppState;
use grist_security::TokenValidator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio_util::sync::CancellationToken;

const OUTBOX_SWEEP_BATCH: i64 = 100;

struct DbHealth {
    pool: PgPool,
}

impl HealthIndicator for DbHealth {
    fn name(&self) -> &str {
        "db"
    }

    async fn check(&self) -> HealthStatus {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => HealthStatus::Up,
            Err(e) => HealthStatus::Down(e.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    grist_core::init_tracing("grist-resource");

    let config = ResourceServiceConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    grist_resource::store::pg::ensure_schema(&pool).await?;
    grist_outbox::pg::ensure_schema(&pool).await?;

    let store = Arc::new(PgResourceStore::new(pool.clone()));
    let outbox_store = Arc::new(PgOutboxStore::new(pool.clone()));
    let producer = Arc::new(KafkaProducer::new(&config.kafka_brokers)?);
    let outbox = Outbox::new(outbox_store, producer);
    let status_channels = Arc::new(ChannelRegistry::new());
    let validator = Arc::new(TokenValidator::new(config.security.clone()));

    let resources = ResourceService::new(
        store.clone(),
        outbox.clone(),
        Arc::new(Extractor::new()),
        status_channels.clone(),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(server::watch_signals(shutdown.clone()));

    tokio::spawn(
        OutboxProcessor::new(
            outbox,
            Duration::from_secs(config.outbox_sweep_secs),
            OUTBOX_SWEEP_BATCH,
        )
        .run(shutdown.clone()),
    );

    // New groups start from the earliest offset: a completion published
    // while this service was down must still land.
    let consumer = KafkaConsumer::new(
        &config.kafka_brokers,
        &config.consumer_group,
        OffsetReset::Earliest,
    )?;
    CompletionConsumer::new(store, status_channels)
        .install(&consumer, shutdown.clone())
        .await?;

    let state = AppState {
        resources,
        validator,
    };
    let app = grist_core::apply_http_layers(
        Router::new()
            .nest("/api/v1", controllers::resources::router())
            .with_state(state)
            .merge(Health::new().register(DbHealth { pool }).into_router()),
    );

    server::serve(
        &config.server.bind_addr,
        app,
        shutdown.clone(),
        config.server.shutdown_timeout,
    )
    .await?;
    shutdown.cancel();
    Ok(())
}
