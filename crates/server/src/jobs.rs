//! Enrichment job endpoints.

use api_types::job::{JobCreated, JobState, JobStatusResponse};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{ServerError, server::ServerState};
use engine::EngineError;

fn map_state(state: engine::JobState) -> JobState {
    match state {
        engine::JobState::Queued => JobState::Queued,
        engine::JobState::Running => JobState::Running,
        engine::JobState::Complete => JobState::Complete,
        engine::JobState::Error => JobState::Error,
    }
}

pub async fn create(
    State(state): State<ServerState>,
) -> Result<(StatusCode, Json<JobCreated>), ServerError> {
    let id = state.jobs.start(state.runner.clone());
    Ok((StatusCode::CREATED, Json(JobCreated { id })))
}

pub async fn status(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ServerError> {
    // A malformed id is indistinguishable from an unknown one to the caller.
    let id = Uuid::parse_str(&id).map_err(|_| EngineError::KeyNotFound(id.clone()))?;
    let snapshot = state.jobs.status(id)?;

    Ok(Json(JobStatusResponse {
        status: map_state(snapshot.status),
        progress: snapshot.progress,
        total: snapshot.total,
        error: snapshot.error,
    }))
}
