//! HTTP surface of the resource service.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use grist_bus::EventProducer;
use grist_core::sse::json_event;
use grist_core::AppError;
use grist_outbox::OutboxStore;
use grist_security::Owner;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::models::Resource;
use crate::services::{IngestFrame, SaveResourceRequest, UpdateResourceRequest};
use crate::state::AppState;
use crate::store::ResourceStore;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub fn router<S, O, P>() -> Router<AppState<S, O, P>>
where
    S: ResourceStore,
    O: OutboxStore,
    P: EventProducer,
{
    Router::new()
        .route(
            "/resources",
            get(list_resources::<S, O, P>).post(save_resource::<S, O, P>),
        )
        .route(
            "/resources/{id}",
            get(get_resource::<S, O, P>)
                .put(update_resource::<S, O, P>)
                .delete(delete_resource::<S, O, P>),
        )
}

async fn list_resources<S, O, P>(
    State(state): State<AppState<S, O, P>>,
    owner: Owner,
    Query(page): Query<PageParams>,
) -> Result<Json<Vec<Resource>>, AppError>
where
    S: ResourceStore,
    O: OutboxStore,
    P: EventProducer,
{
    let limit = page.limit.unwrap_or(20).clamp(1, 100);
    let offset = page.offset.unwrap_or(0).max(0);
    Ok(Json(state.resources.list(&owner.id, limit, offset).await?))
}

/// `POST /resources`: the response is the live ingestion stream.
async fn save_resource<S, O, P>(
    State(state): State<AppState<S, O, P>>,
    owner: Owner,
    Json(request): Json<SaveResourceRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError>
where
    S: ResourceStore,
    O: OutboxStore,
    P: EventProducer,
{
    let frames = state.resources.save(owner.id, request)?;
    let stream = ReceiverStream::new(frames).map(|frame| Ok(ingest_frame_event(frame)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn ingest_frame_event(frame: IngestFrame) -> Event {
    match frame {
        IngestFrame::Resource(resource) => {
            json_event("resource", &serde_json::json!({ "resource": resource }))
        }
        IngestFrame::Status(update) => json_event("status_update", &update),
        IngestFrame::Completed { resource_id } => {
            json_event("completed", &serde_json::json!({ "resource_id": resource_id }))
        }
        IngestFrame::Error { error } => {
            json_event("error", &serde_json::json!({ "error": error }))
        }
    }
}

async fn get_resource<S, O, P>(
    State(state): State<AppState<S, O, P>>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<Json<Resource>, AppError>
where
    S: ResourceStore,
    O: OutboxStore,
    P: EventProducer,
{
    Ok(Json(state.resources.get(&owner.id, id).await?))
}

async fn update_resource<S, O, P>(
    State(state): State<AppState<S, O, P>>,
    owner: Owner,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateResourceRequest>,
) -> Result<Json<Resource>, AppError>
where
    S: ResourceStore,
    O: OutboxStore,
    P: EventProducer,
{
    Ok(Json(state.resources.update(&owner.id, id, patch).await?))
}

async fn delete_resource<S, O, P>(
    State(state): State<AppState<S, O, P>>,
    owner: Owner,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError>
where
    S: ResourceStore,
    O: OutboxStore,
    P: EventProducer,
{
    state.resources.delete(&owner.id, id).await?;
    Ok(StatusCode::OK)
}
