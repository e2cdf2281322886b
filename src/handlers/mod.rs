// HTTP surface: inbound event ingestion plus read-only operational
// endpoints. Rule and campaign administration lives outside this service.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::engine::AutomationEngine;
use crate::error::{EngineError, EngineResult};
use crate::models::{MessageStatus, NewEvent};
use crate::store::EngineStore;

pub struct AppState {
    pub engine: Arc<AutomationEngine>,
    pub store: Arc<dyn EngineStore>,
}

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(ingest_event))
        .route("/enrollments", get(list_enrollments))
        .route("/messages", get(list_messages))
        .route("/alerts", get(list_alerts))
        .route("/subjects/:subject_id", get(get_subject))
        .route("/tasks", get(list_tasks))
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Inbound event ingestion, used by the UI, scrapers, and transport
/// delivery callbacks. 202 on success; a storage failure surfaces as 503
/// and the caller owns the retry.
async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(new_event): Json<NewEvent>,
) -> EngineResult<impl IntoResponse> {
    let outcome = state.engine.ingest(new_event).await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct SubjectQuery {
    subject_id: String,
}

async fn list_enrollments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubjectQuery>,
) -> EngineResult<impl IntoResponse> {
    let enrollments = state.store.enrollments_for_subject(&query.subject_id).await?;
    Ok(Json(enrollments))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    status: Option<String>,
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessagesQuery>,
) -> EngineResult<impl IntoResponse> {
    let status = match query.status.as_deref() {
        Some(raw) => raw
            .parse::<MessageStatus>()
            .map_err(EngineError::BadRequest)?,
        None => MessageStatus::Pending,
    };
    let messages = state.store.messages_with_status(status).await?;
    Ok(Json(messages))
}

async fn list_alerts(State(state): State<Arc<AppState>>) -> EngineResult<impl IntoResponse> {
    let alerts = state.store.open_alerts().await?;
    Ok(Json(alerts))
}

async fn get_subject(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> EngineResult<impl IntoResponse> {
    let profile = state
        .store
        .subject_profile(&subject_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("subject '{}'", subject_id)))?;
    Ok(Json(profile))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubjectQuery>,
) -> EngineResult<impl IntoResponse> {
    let tasks = state.store.tasks_for_subject(&query.subject_id).await?;
    Ok(Json(tasks))
}
