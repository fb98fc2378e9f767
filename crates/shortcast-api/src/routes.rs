//! Job and library HTTP routes

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as PathParam, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use tracing::warn;

use shortcast_core::config::Settings;
use shortcast_core::stage::ReviewDecision;
use shortcast_core::store::JobStore;
use shortcast_stages::REVIEW_OPTIONS;

use crate::error::ApiError;
use crate::media::media_url;
use crate::models::{
    CreateJobRequest, HealthResponse, JobDetail, JobSummary, LibraryItem, ReviewRequest,
};

const LIBRARY_LIMIT: usize = 100;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub settings: Arc<Settings>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(create_job).get(list_jobs))
        .route("/api/jobs/:job_id", get(get_job))
        .route("/api/jobs/:job_id/review", post(review_job))
        .route("/api/library", get(list_library))
        .with_state(state)
}

/// GET /health - Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "system"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        time: Utc::now(),
    })
}

/// POST /api/jobs - Create a job and start it immediately
#[utoipa::path(
    post,
    path = "/api/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job created and started", body = JobSummary),
        (status = 400, description = "Topic missing or out of bounds")
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobSummary>), ApiError> {
    let topic = req.topic.trim();
    let length = topic.chars().count();
    if !(2..=200).contains(&length) {
        return Err(ApiError::BadRequest(
            "topic must be between 2 and 200 characters".to_string(),
        ));
    }

    let record = state.store.create_job(topic)?;
    state.store.start_job(&record.job_id)?;

    // Re-read so the summary reflects the running status.
    let record = state
        .store
        .get_job(&record.job_id)
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {}", record.job_id)))?;
    Ok((StatusCode::CREATED, Json(JobSummary::from(&record))))
}

/// GET /api/jobs - List jobs, newest first
#[utoipa::path(
    get,
    path = "/api/jobs",
    responses((status = 200, description = "All jobs", body = [JobSummary])),
    tag = "jobs"
)]
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    let rows = state.store.list_jobs();
    Json(rows.iter().map(JobSummary::from).collect())
}

/// GET /api/jobs/{job_id} - Full job detail
#[utoipa::path(
    get,
    path = "/api/jobs/{job_id}",
    params(("job_id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job detail", body = JobDetail),
        (status = 404, description = "Unknown job id")
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    PathParam(job_id): PathParam<String>,
) -> Result<Json<JobDetail>, ApiError> {
    let record = state
        .store
        .get_job(&job_id)
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {job_id}")))?;
    let detail = JobDetail::from_record(&record, &state.settings.data_root)
        .map_err(anyhow::Error::from)?;
    Ok(Json(detail))
}

/// POST /api/jobs/{job_id}/review - Resolve a job parked in waiting_review
#[utoipa::path(
    post,
    path = "/api/jobs/{job_id}/review",
    params(("job_id" = String, Path, description = "Job ID")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Decision accepted, job resumed", body = JobSummary),
        (status = 400, description = "Decision outside the vocabulary"),
        (status = 404, description = "Unknown job id"),
        (status = 409, description = "Job is not waiting for review")
    ),
    tag = "jobs"
)]
pub async fn review_job(
    State(state): State<AppState>,
    PathParam(job_id): PathParam<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<JobSummary>, ApiError> {
    let decision = req.human_decision.trim();
    if !REVIEW_OPTIONS.contains(&decision) {
        return Err(ApiError::BadRequest(format!(
            "human_decision must be one of: {}",
            REVIEW_OPTIONS.join(", ")
        )));
    }

    state.store.resume_job(
        &job_id,
        ReviewDecision {
            human_decision: decision.to_string(),
            review_notes: req.review_notes.trim().to_string(),
        },
    )?;

    let record = state
        .store
        .get_job(&job_id)
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {job_id}")))?;
    Ok(Json(JobSummary::from(&record)))
}

/// GET /api/library - Finished shorts, newest manifest first
#[utoipa::path(
    get,
    path = "/api/library",
    responses((status = 200, description = "Finished shorts", body = [LibraryItem])),
    tag = "library"
)]
pub async fn list_library(State(state): State<AppState>) -> Json<Vec<LibraryItem>> {
    Json(read_library(
        &state.settings.output_root,
        &state.settings.data_root,
    ))
}

fn read_library(output_dir: &Path, data_root: &Path) -> Vec<LibraryItem> {
    let Ok(entries) = std::fs::read_dir(output_dir) else {
        return Vec::new();
    };

    let mut manifests: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("short_metadata_") && name.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect();
    manifests.sort();
    manifests.reverse();

    let mut rows = Vec::new();
    for path in manifests.into_iter().take(LIBRARY_LIMIT) {
        let payload: serde_json::Value = match std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(anyhow::Error::from))
        {
            Ok(payload) => payload,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to parse metadata file");
                continue;
            }
        };

        let created_at: Option<DateTime<Utc>> = std::fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        let text = |key: &str| payload[key].as_str().map(|s| s.to_string());
        let final_video = text("final_video");
        rows.push(LibraryItem {
            job_id: text("job_id"),
            topic: text("topic"),
            script: text("script"),
            final_video_url: final_video
                .as_deref()
                .and_then(|local| media_url(data_root, local)),
            final_video,
            metadata_path: Some(path.display().to_string()),
            created_at,
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_read_library_skips_garbage_and_caps() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("output");
        std::fs::create_dir_all(&out).unwrap();

        std::fs::write(
            out.join("short_metadata_20250101_000000.json"),
            r#"{"job_id": "job-1", "topic": "Black holes", "final_video": "x.mp4"}"#,
        )
        .unwrap();
        std::fs::write(out.join("short_metadata_20250101_000001.json"), "nope").unwrap();
        std::fs::write(out.join("unrelated.json"), "{}").unwrap();

        let rows = read_library(&out, dir.path());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_id.as_deref(), Some("job-1"));
        assert_eq!(rows[0].final_video_url, None);
        assert!(rows[0].created_at.is_some());
    }

    #[test]
    fn test_read_library_with_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_library(&dir.path().join("nope"), dir.path()).is_empty());
    }
}
