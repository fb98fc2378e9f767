//! Public API DTOs

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use shortcast_core::job::{JobRecord, JobStatus};

use crate::media::media_url;

/// Request to create (and start) a job
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateJobRequest {
    /// Topic the short should cover
    #[schema(example = "Black holes")]
    pub topic: String,
}

/// Request to resolve a job parked in `waiting_review`
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReviewRequest {
    /// One of: approved, needs_script_revision, find_more_assets, reassemble
    #[schema(example = "approved")]
    pub human_decision: String,
    #[serde(default)]
    pub review_notes: String,
}

/// Compact job row for list views
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobSummary {
    pub job_id: String,
    pub topic: String,
    #[schema(value_type = String, example = "running")]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            topic: record.topic.clone(),
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Browser-reachable URLs for the artifacts of one job
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct MediaLinks {
    pub final_video_url: Option<String>,
    pub audio_narration_url: Option<String>,
    pub bg_music_url: Option<String>,
    pub metadata_url: Option<String>,
    pub clips_urls: Vec<Option<String>>,
    pub images_urls: Vec<Option<String>>,
}

/// Full job detail, including the checkpointed pipeline state
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobDetail {
    pub job_id: String,
    pub thread_id: String,
    pub topic: String,
    #[schema(value_type = String, example = "waiting_review")]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub state: serde_json::Value,
    #[schema(value_type = Object)]
    pub review_payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub media: MediaLinks,
}

impl JobDetail {
    pub fn from_record(record: &JobRecord, data_root: &Path) -> Result<Self, serde_json::Error> {
        let url = |path: &Option<String>| {
            path.as_deref()
                .and_then(|local| media_url(data_root, local))
        };
        let media = MediaLinks {
            final_video_url: url(&record.state.final_video),
            audio_narration_url: url(&record.state.audio_narration),
            bg_music_url: url(&record.state.bg_music),
            metadata_url: url(&record.state.metadata_path),
            clips_urls: record
                .state
                .clips
                .iter()
                .map(|p| media_url(data_root, p))
                .collect(),
            images_urls: record
                .state
                .images
                .iter()
                .map(|p| media_url(data_root, p))
                .collect(),
        };

        Ok(Self {
            job_id: record.job_id.clone(),
            thread_id: record.thread_id.clone(),
            topic: record.topic.clone(),
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            state: serde_json::to_value(&record.state)?,
            review_payload: record
                .review_payload
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            error: record.error.clone(),
            media,
        })
    }
}

/// One finished short in the library
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LibraryItem {
    pub job_id: Option<String>,
    pub topic: Option<String>,
    pub script: Option<String>,
    pub final_video: Option<String>,
    pub final_video_url: Option<String>,
    pub metadata_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Liveness probe payload
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub time: DateTime<Utc>,
}
