//! Registry-owned job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::ReviewPrompt;
use crate::state::PipelineState;

/// Registry-level lifecycle label.
///
/// Stage-scoped labels such as `failed:<stage>` live in
/// [`PipelineState::status`]; this enum is the closed vocabulary the
/// registry itself moves a job through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no worker yet
    Queued,
    /// A worker is driving the state machine
    Running,
    /// Parked until a human decision arrives
    WaitingReview,
    /// Terminal: pipeline finished
    Completed,
    /// Terminal: pipeline or worker failed
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::WaitingReview => "waiting_review",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable summary of one job: identity, progress, and the pipeline
/// state checkpointed at the last transition.
///
/// Serialization of this struct IS the on-disk snapshot schema; see
/// [`crate::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    /// Correlates all checkpoints of this job's run; stable for the job's
    /// lifetime
    pub thread_id: String,
    pub topic: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present only while `status == waiting_review`
    #[serde(default)]
    pub review_payload: Option<ReviewPrompt>,
    /// Last fatal error, if any
    #[serde(default)]
    pub error: Option<String>,
    pub state: PipelineState,
}

impl JobRecord {
    /// Bump `updated_at`; call on every mutation
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
