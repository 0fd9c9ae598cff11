use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use super::{
    error::ApiError,
    models::{HealthResponse, JobAcceptedResponse, JobEventsResponse, JobView},
    state::AppState,
};
use crate::queue::SubmitRequest;

/// Enqueue a transcode job (POST /jobs)
///
/// Submitting a video that already has a job in flight returns that job
/// instead of creating a second one.
pub async fn submit_job(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: SubmitRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    let record = state.queue.submit(request).await?;
    info!(job_id = %record.job_id, video_id = %record.video_id, "Job accepted");

    let response = JobAcceptedResponse {
        job_id: record.job_id,
        video_id: record.video_id,
        status: record.status,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Latest job for a video (GET /videos/{video_id})
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let record = state
        .queue
        .reporter()
        .get_by_video(&video_id)?
        .ok_or_else(|| ApiError::NotFound(format!("video {video_id}")))?;
    Ok(Json(record.into()))
}

/// Status history of a job (GET /jobs/{job_id}/events)
pub async fn get_job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobEventsResponse>, ApiError> {
    let reporter = state.queue.reporter();
    if reporter.get(&job_id)?.is_none() {
        return Err(ApiError::NotFound(format!("job {job_id}")));
    }
    let events = reporter.events(&job_id)?;
    Ok(Json(JobEventsResponse { job_id, events }))
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let jobs = state.queue.reporter().store().stats()?;
    let queue_ready = state.queue.ready_len().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        queue_ready,
        jobs,
        metrics: state.metrics.snapshot(),
    }))
}
