//! HTTP surface of the search service.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use grist_core::sse::json_event;
use grist_core::AppError;
use grist_model::{Embedder, Generator};
use grist_security::Owner;
use grist_vector::VectorStore;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::services::AnswerEvent;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub question: String,
    pub num_references: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub question: String,
    pub max_results: Option<usize>,
}

pub fn router<V, E, G>() -> Router<AppState<V, E, G>>
where
    V: VectorStore,
    E: Embedder,
    G: Generator,
{
    Router::new()
        .route("/ask", post(ask::<V, E, G>))
        .route("/ask/stream", get(ask_stream::<V, E, G>))
        .route(
            "/ask/stream/cancel/{process_id}",
            delete(cancel_stream::<V, E, G>),
        )
        .route("/search", get(search::<V, E, G>))
}

async fn ask<V, E, G>(
    State(state): State<AppState<V, E, G>>,
    owner: Owner,
    Json(request): Json<AskRequest>,
) -> Result<Json<serde_json::Value>, AppError>
where
    V: VectorStore,
    E: Embedder,
    G: Generator,
{
    let (answer, references) = state.answers.ask(&owner.id, &request.question).await?;
    Ok(Json(serde_json::json!({
        "answer": answer,
        "references": references,
    })))
}

async fn search<V, E, G>(
    State(state): State<AppState<V, E, G>>,
    owner: Owner,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, AppError>
where
    V: VectorStore,
    E: Embedder,
    G: Generator,
{
    let max_results = params.max_results.unwrap_or(10).clamp(1, 50);
    let references = state
        .answers
        .search(&owner.id, &params.question, max_results)
        .await?;
    Ok(Json(serde_json::json!({ "references": references })))
}

/// `GET /ask/stream`: the answer as a live SSE stream.
async fn ask_stream<V, E, G>(
    State(state): State<AppState<V, E, G>>,
    owner: Owner,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError>
where
    V: VectorStore,
    E: Embedder,
    G: Generator,
{
    if params.question.trim().is_empty() {
        return Err(AppError::BadRequest("question must not be empty".into()));
    }
    let (_process_id, events) =
        state
            .answers
            .answer_stream(owner.id, params.question, params.num_references);
    let stream = ReceiverStream::new(events).map(|event| Ok(answer_event_frame(event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn answer_event_frame(event: AnswerEvent) -> Event {
    match event {
        AnswerEvent::References {
            process_id,
            references,
        } => json_event(
            "references",
            &serde_json::json!({ "process_id": process_id, "references": references }),
        ),
        AnswerEvent::Chunk {
            process_id,
            content,
        } => json_event(
            "chunk",
            &serde_json::json!({
                "process_id": process_id,
                "content": content,
                "complete": false,
            }),
        ),
        AnswerEvent::Complete {
            process_id,
            answer,
            references,
        } => json_event(
            "complete",
            &serde_json::json!({
                "process_id": process_id,
                "result": { "answer": answer, "references": references },
                "complete": true,
            }),
        ),
        AnswerEvent::Error { process_id, error } => json_event(
            "error",
            &serde_json::json!({ "process_id": process_id, "error": error }),
        ),
        AnswerEvent::Cancelled { process_id } => json_event(
            "cancelled",
            &serde_json::json!({
                "process_id": process_id,
                "message": "process cancelled",
            }),
        ),
    }
}

/// `DELETE /ask/stream/cancel/{process_id}`: idempotent for live ids,
/// 404 for unknown ones.
async fn cancel_stream<V, E, G>(
    State(state): State<AppState<V, E, G>>,
    _owner: Owner,
    Path(process_id): Path<Uuid>,
) -> Result<StatusCode, AppError>
where
    V: VectorStore,
    E: Embedder,
    G: Generator,
{
    if state.answers.cancel(&process_id) {
        Ok(StatusCode::OK)
    } else {
        Err(AppError::NotFound(format!(
            "no running process {process_id}"
        )))
    }
}
