//! Human review gate
//!
//! With no injected decision the stage suspends, handing the registry a
//! prompt with everything a reviewer needs. On resume the injected decision
//! picks the outgoing edge; a decision outside the vocabulary is logged and
//! defaulted to `needs_script_revision`. The stage never trusts a decision
//! left in state from an earlier pass — each visit to review asks again.

use async_trait::async_trait;

use shortcast_core::error::StageError;
use shortcast_core::stage::{ReviewDecision, ReviewPrompt, Stage, StageOutcome};
use shortcast_core::state::{NextAction, PipelineState};

use crate::util::ensure_runtime_dirs;

const STAGE: &str = "review";

/// Decisions a reviewer may answer with, sorted
pub const REVIEW_OPTIONS: [&str; 4] = [
    "approved",
    "find_more_assets",
    "needs_script_revision",
    "reassemble",
];

#[derive(Default)]
pub struct ReviewStage;

impl ReviewStage {
    pub fn new() -> Self {
        Self
    }

    fn prompt_for(state: &PipelineState) -> ReviewPrompt {
        ReviewPrompt {
            message: "Review required".to_string(),
            script: state.script.clone().unwrap_or_default(),
            clips: state.clips.clone(),
            images: state.images.clone(),
            final_video: state.final_video.clone().unwrap_or_default(),
            options: REVIEW_OPTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn action_for(decision: &str) -> Option<NextAction> {
        match decision {
            "approved" => Some(NextAction::Approved),
            "needs_script_revision" => Some(NextAction::NeedsScriptRevision),
            "find_more_assets" => Some(NextAction::FindMoreAssets),
            "reassemble" => Some(NextAction::Reassemble),
            _ => None,
        }
    }
}

#[async_trait]
impl Stage for ReviewStage {
    async fn run(
        &self,
        mut state: PipelineState,
        decision: Option<&ReviewDecision>,
    ) -> Result<StageOutcome, StageError> {
        ensure_runtime_dirs(&state)?;
        state.bump_attempt(STAGE);

        let Some(decision) = decision else {
            let prompt = Self::prompt_for(&state);
            return Ok(StageOutcome::Suspend { state, prompt });
        };

        let mut choice = decision.human_decision.trim().to_string();
        let notes = decision.review_notes.trim().to_string();
        let action = match Self::action_for(&choice) {
            Some(action) => action,
            None => {
                state.add_error("Invalid review decision. Defaulted to needs_script_revision.");
                choice = "needs_script_revision".to_string();
                NextAction::NeedsScriptRevision
            }
        };

        state.human_decision = Some(choice.clone());
        state.review_notes = Some(notes);
        state.status = format!("reviewed:{choice}");
        state.next_action = Some(action);
        Ok(StageOutcome::Advance(state))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn state_in(dir: &TempDir) -> PipelineState {
        PipelineState {
            topic: "Black holes".into(),
            script: Some("The script.".into()),
            final_video: Some("/tmp/final.mp4".into()),
            images: vec!["a.jpg".into()],
            assets_dir: dir.path().join("assets").display().to_string(),
            output_dir: dir.path().join("output").display().to_string(),
            ..Default::default()
        }
    }

    fn decision(choice: &str, notes: &str) -> ReviewDecision {
        ReviewDecision {
            human_decision: choice.to_string(),
            review_notes: notes.to_string(),
        }
    }

    #[tokio::test]
    async fn test_no_decision_suspends_with_prompt() {
        let dir = TempDir::new().unwrap();
        let outcome = ReviewStage::new().run(state_in(&dir), None).await.unwrap();

        let StageOutcome::Suspend { state, prompt } = outcome else {
            panic!("expected suspension");
        };
        assert_eq!(prompt.message, "Review required");
        assert_eq!(prompt.script, "The script.");
        assert_eq!(prompt.final_video, "/tmp/final.mp4");
        assert_eq!(
            prompt.options,
            vec![
                "approved",
                "find_more_assets",
                "needs_script_revision",
                "reassemble"
            ]
        );
        assert_eq!(state.attempt(STAGE), 1);
    }

    #[tokio::test]
    async fn test_each_decision_picks_its_edge() {
        let dir = TempDir::new().unwrap();
        let cases = [
            ("approved", NextAction::Approved),
            ("needs_script_revision", NextAction::NeedsScriptRevision),
            ("find_more_assets", NextAction::FindMoreAssets),
            ("reassemble", NextAction::Reassemble),
        ];

        for (choice, expected) in cases {
            let outcome = ReviewStage::new()
                .run(state_in(&dir), Some(&decision(choice, "note")))
                .await
                .unwrap();
            let StageOutcome::Advance(state) = outcome else {
                panic!("expected advance for {choice}");
            };
            assert_eq!(state.next_action, Some(expected));
            assert_eq!(state.status, format!("reviewed:{choice}"));
            assert_eq!(state.human_decision.as_deref(), Some(choice));
            assert_eq!(state.review_notes.as_deref(), Some("note"));
        }
    }

    #[tokio::test]
    async fn test_invalid_decision_defaults_to_revision() {
        let dir = TempDir::new().unwrap();
        let outcome = ReviewStage::new()
            .run(state_in(&dir), Some(&decision("ship it!!", "")))
            .await
            .unwrap();

        let StageOutcome::Advance(state) = outcome else {
            panic!("expected advance");
        };
        assert_eq!(state.next_action, Some(NextAction::NeedsScriptRevision));
        assert_eq!(
            state.human_decision.as_deref(),
            Some("needs_script_revision")
        );
        assert!(state
            .errors
            .iter()
            .any(|e| e.contains("Invalid review decision")));
    }

    #[tokio::test]
    async fn test_stale_state_decision_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);
        // A decision recorded on an earlier pass must not short-circuit the
        // next review visit.
        state.human_decision = Some("reassemble".into());

        let outcome = ReviewStage::new().run(state, None).await.unwrap();
        assert!(matches!(outcome, StageOutcome::Suspend { .. }));
    }
}
