//! Pipeline working memory
//!
//! [`PipelineState`] is the mutable mapping threaded through the stages of
//! one job. Only the stage currently holding control mutates it, and the
//! registry checkpoints it after every transition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The closed vocabulary of outgoing edges a stage may choose.
///
/// The transition table in [`crate::machine`] decides which members are
/// legal from which stage; the execution loop fails the job on any other
/// combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    FindAssets,
    RefineQuery,
    GenerateAudio,
    SelectMusic,
    AssembleVideo,
    HumanReview,
    Approved,
    NeedsScriptRevision,
    FindMoreAssets,
    Reassemble,
    Complete,
    Failed,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FindAssets => "find_assets",
            Self::RefineQuery => "refine_query",
            Self::GenerateAudio => "generate_audio",
            Self::SelectMusic => "select_music",
            Self::AssembleVideo => "assemble_video",
            Self::HumanReview => "human_review",
            Self::Approved => "approved",
            Self::NeedsScriptRevision => "needs_script_revision",
            Self::FindMoreAssets => "find_more_assets",
            Self::Reassemble => "reassemble",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for NextAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance for one downloaded or generated visual asset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionItem {
    pub provider: String,
    pub source_url: String,
    pub license: String,
    pub local_path: String,
}

/// Working memory for one job.
///
/// Control fields (`status`, `next_action`, `attempts`, `errors`) steer the
/// execution loop; content fields carry stage outputs; the `*_dir` and
/// `max_asset_attempts` fields are configuration threaded through from the
/// registry. `errors` is append-only — it is never truncated, so the full
/// audit trail survives every retry and resume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineState {
    pub job_id: String,
    pub topic: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_action: Option<NextAction>,
    pub errors: Vec<String>,
    pub attempts: BTreeMap<String, u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    pub clips: Vec<String>,
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub asset_queries: Vec<String>,
    pub attribution: Vec<AttributionItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_narration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_music: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_decision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,

    pub output_dir: String,
    pub assets_dir: String,
    pub max_asset_attempts: u32,
}

impl PipelineState {
    /// Append a non-fatal problem to the audit trail
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Increment and return the attempt counter for a stage
    pub fn bump_attempt(&mut self, stage: &str) -> u32 {
        let count = self.attempts.entry(stage.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Current attempt count for a stage (0 if it never ran)
    pub fn attempt(&self, stage: &str) -> u32 {
        self.attempts.get(stage).copied().unwrap_or(0)
    }
}
