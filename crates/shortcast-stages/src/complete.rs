//! Completion stage
//!
//! Writes the metadata manifest next to the final render: everything a
//! publisher needs to upload the short and honor asset licenses.

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use shortcast_core::error::StageError;
use shortcast_core::stage::{ReviewDecision, Stage, StageOutcome};
use shortcast_core::state::{NextAction, PipelineState};

use crate::util::{ensure_runtime_dirs, timestamp_name, write_json};

const STAGE: &str = "complete";
const COMPLIANCE_NOTE: &str = "Use royalty-free or licensed assets only, add attribution when \
                               required, and verify YouTube policy compliance before publishing.";

#[derive(Default)]
pub struct CompleteStage;

impl CompleteStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for CompleteStage {
    async fn run(
        &self,
        mut state: PipelineState,
        _decision: Option<&ReviewDecision>,
    ) -> Result<StageOutcome, StageError> {
        ensure_runtime_dirs(&state)?;
        state.bump_attempt(STAGE);

        let metadata_path =
            Path::new(&state.output_dir).join(timestamp_name("short_metadata", ".json"));
        let payload = json!({
            "job_id": state.job_id,
            "topic": state.topic,
            "script": state.script.clone().unwrap_or_default(),
            "final_video": state.final_video.clone().unwrap_or_default(),
            "audio_narration": state.audio_narration.clone().unwrap_or_default(),
            "bg_music": state.bg_music.clone().unwrap_or_default(),
            "clips": state.clips.clone(),
            "images": state.images.clone(),
            "attribution": state.attribution.clone(),
            "review_notes": state.review_notes.clone().unwrap_or_default(),
            "compliance_note": COMPLIANCE_NOTE,
        });

        match write_json(&metadata_path, &payload) {
            Ok(()) => {
                state.metadata_path = Some(metadata_path.display().to_string());
                state.status = "completed".to_string();
                state.next_action = Some(NextAction::Complete);
            }
            Err(err) => {
                state.add_error(format!("completion error: {err}"));
                state.status = "failed:complete".to_string();
                state.next_action = Some(NextAction::Failed);
            }
        }
        Ok(StageOutcome::Advance(state))
    }
}
