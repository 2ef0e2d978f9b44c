use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use grist_bus::kafka::{KafkaConsumer, KafkaProducer, OffsetReset};
use grist_core::health::{Health, HealthIndicator, HealthStatus};
use grist_core::registry::CancelRegistry;
use grist_core::server;
use grist_model::openai::{OpenAiEmbedder, OpenAiGenerator};
use grist_outbox::pg::PgOutboxStore;
use grist_outbox::{Outbox, OutboxProcessor};
use grist_search::config::SearchServiceConfig;
use grist_search::controllers;
use grist_search::services::{AnswerService, IndexerService};
use grist_search::AppState;
use grist_security::TokenValidator;
use grist_vector::qdrant::QdrantStore;
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
    grist_core::init_tracing("grist-search");

    let config = SearchServiceConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    grist_outbox::pg::ensure_schema(&pool).await?;

    let vector = Arc::new(QdrantStore::new(
        config.qdrant_url.clone(),
        config.qdrant_collection.clone(),
    ));
    vector.ensure_collection(config.embedding_dim).await?;

    let embedder = Arc::new(OpenAiEmbedder::new(
        config.model_base_url.clone(),
        config.model_api_key.clone(),
        config.embedding_model.clone(),
    ));
    let generator = Arc::new(OpenAiGenerator::new(
        config.model_base_url.clone(),
        config.model_api_key.clone(),
        config.chat_model.clone(),
    ));

    let outbox_store = Arc::new(PgOutboxStore::new(pool.clone()));
    let producer = Arc::new(KafkaProducer::new(&config.kafka_brokers)?);
    let outbox = Outbox::new(outbox_store, producer);
    let validator = Arc::new(TokenValidator::new(config.security.clone()));

    let shutdown = CancellationToken::new();
    tokio::spawn(server::watch_signals(shutdown.clone()));

    tokio::spawn(
        OutboxProcessor::new(
            outbox.clone(),
            Duration::from_secs(config.outbox_sweep_secs),
            OUTBOX_SWEEP_BATCH,
        )
        .run(shutdown.clone()),
    );

    // New groups start from the latest offset: on first deploy the service
    // should not replay the whole resource history.
    let consumer = KafkaConsumer::new(
        &config.kafka_brokers,
        &config.consumer_group,
        OffsetReset::Latest,
    )?;
    IndexerService::new(
        vector.clone(),
        embedder.clone(),
        outbox,
        config.chunk_capacity,
    )
    .install(&consumer, shutdown.clone())
    .await?;

    let answers = AnswerService::new(
        vector,
        embedder,
        generator,
        Arc::new(CancelRegistry::new()),
    );

    let state = AppState { answers, validator };
    let app = grist_core::apply_http_layers(
        Router::new()
            .nest("/api/v1", controllers::ask::router())
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
