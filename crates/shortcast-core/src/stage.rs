//! The contract every pipeline stage satisfies

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::state::PipelineState;

/// Payload shown to a human while a job is parked in `waiting_review`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewPrompt {
    pub message: String,
    pub script: String,
    pub clips: Vec<String>,
    pub images: Vec<String>,
    pub final_video: String,
    /// Decisions the reviewer may answer with, sorted
    pub options: Vec<String>,
}

/// Decision injected when a parked job is resumed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub human_decision: String,
    #[serde(default)]
    pub review_notes: String,
}

/// What one stage invocation produced.
///
/// Suspension is a data-carried signal, not control-flow unwinding: the
/// registry persists the prompt and later re-invokes the review stage with
/// the injected decision.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    /// The stage finished; the loop reads `next_action` to pick the edge
    Advance(PipelineState),
    /// The stage needs external input; the loop parks the job with this payload
    Suspend {
        state: PipelineState,
        prompt: ReviewPrompt,
    },
}

/// One named step of the fixed pipeline.
///
/// A stage is a transformation from pipeline state to pipeline state plus a
/// chosen edge. Side effects (network calls, file writes) belong to the
/// stage and must tolerate re-execution — the loop does not deduplicate them
/// across retries. Give-up policy belongs to the stage too: the machine
/// never breaks a self-loop on its own, it only follows the edges stages
/// pick.
#[async_trait]
pub trait Stage: Send + Sync {
    /// `decision` is present only when re-entering the review stage after a
    /// resume; every other stage ignores it.
    async fn run(
        &self,
        state: PipelineState,
        decision: Option<&ReviewDecision>,
    ) -> Result<StageOutcome, StageError>;
}
