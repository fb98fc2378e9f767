//! The workflow state machine
//!
//! A fixed-topology graph: seven named stages, a static transition table
//! over the closed [`NextAction`] vocabulary, and an execution loop that
//! advances a job one stage at a time. Self-loops (`script → script`,
//! `assets → assets`, `assemble → assemble`) are legal in-place retries;
//! the loop is attempt-agnostic and leaves give-up policy to the stages.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StageError;
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::stage::{ReviewDecision, ReviewPrompt, Stage, StageOutcome};
use crate::state::{NextAction, PipelineState};

/// Named steps of the fixed pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Script,
    Assets,
    Narration,
    Music,
    Assemble,
    Review,
    Complete,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Assets => "assets",
            Self::Narration => "narration",
            Self::Music => "music",
            Self::Assemble => "assemble",
            Self::Review => "review",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an edge leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stage(StageId),
    End,
}

/// The static transition table.
///
/// Returns `None` for pairs that have no edge; the execution loop fails the
/// job in that case rather than guessing.
pub fn transition(from: StageId, action: NextAction) -> Option<Target> {
    use NextAction::*;
    use StageId::*;

    let target = match (from, action) {
        (Script, FindAssets) => Target::Stage(Assets),
        (Script, NeedsScriptRevision) => Target::Stage(Script),
        (Script, Failed) => Target::End,

        (Assets, GenerateAudio) => Target::Stage(Narration),
        (Assets, RefineQuery) => Target::Stage(Assets),
        (Assets, NeedsScriptRevision) => Target::Stage(Script),
        (Assets, Failed) => Target::End,

        (Narration, SelectMusic) => Target::Stage(Music),
        (Narration, NeedsScriptRevision) => Target::Stage(Script),
        (Narration, Failed) => Target::End,

        (Music, AssembleVideo) => Target::Stage(Assemble),
        (Music, Failed) => Target::End,

        (Assemble, HumanReview) => Target::Stage(Review),
        (Assemble, Reassemble) => Target::Stage(Assemble),
        (Assemble, Failed) => Target::End,

        (Review, Approved) => Target::Stage(StageId::Complete),
        (Review, NeedsScriptRevision) => Target::Stage(Script),
        (Review, FindMoreAssets) => Target::Stage(Assets),
        (Review, Reassemble) => Target::Stage(Assemble),
        (Review, Failed) => Target::End,

        // Terminal stage: unconditional edge out
        (StageId::Complete, _) => Target::End,

        _ => return None,
    };
    Some(target)
}

/// The fixed binding of stage ids to implementations
#[derive(Clone)]
pub struct StageSet {
    script: Arc<dyn Stage>,
    assets: Arc<dyn Stage>,
    narration: Arc<dyn Stage>,
    music: Arc<dyn Stage>,
    assemble: Arc<dyn Stage>,
    review: Arc<dyn Stage>,
    complete: Arc<dyn Stage>,
}

impl StageSet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        script: Arc<dyn Stage>,
        assets: Arc<dyn Stage>,
        narration: Arc<dyn Stage>,
        music: Arc<dyn Stage>,
        assemble: Arc<dyn Stage>,
        review: Arc<dyn Stage>,
        complete: Arc<dyn Stage>,
    ) -> Self {
        Self {
            script,
            assets,
            narration,
            music,
            assemble,
            review,
            complete,
        }
    }

    pub fn stage(&self, id: StageId) -> &dyn Stage {
        match id {
            StageId::Script => self.script.as_ref(),
            StageId::Assets => self.assets.as_ref(),
            StageId::Narration => self.narration.as_ref(),
            StageId::Music => self.music.as_ref(),
            StageId::Assemble => self.assemble.as_ref(),
            StageId::Review => self.review.as_ref(),
            StageId::Complete => self.complete.as_ref(),
        }
    }
}

/// How one worker pass over the machine ended
#[derive(Debug)]
pub enum RunOutcome {
    /// The loop reached the end of the graph; the registry derives the
    /// final status from the terminal pipeline state
    Finished(PipelineState),
    /// A stage asked for human input; the registry parks the job
    Suspended {
        state: PipelineState,
        prompt: ReviewPrompt,
    },
}

/// Drives a job one stage at a time per the transition table
pub struct PipelineMachine {
    stages: StageSet,
    stage_retry: RetryPolicy,
}

impl PipelineMachine {
    /// Entry stage for a fresh job
    pub const ENTRY: StageId = StageId::Script;

    /// Entry stage when resuming a parked job
    pub const RESUME_ENTRY: StageId = StageId::Review;

    /// Each whole-stage invocation gets two attempts; stages wrap their own
    /// network calls at finer grain.
    pub fn new(stages: StageSet) -> Self {
        Self {
            stages,
            stage_retry: RetryPolicy::default().with_max_attempts(2),
        }
    }

    pub fn with_stage_retry(mut self, policy: RetryPolicy) -> Self {
        self.stage_retry = policy;
        self
    }

    /// Run from `entry` until the graph ends or a stage suspends.
    ///
    /// `decision` is delivered to exactly one stage invocation (the review
    /// stage on resume) and never replayed after that.
    pub async fn run(
        &self,
        state: PipelineState,
        entry: StageId,
        decision: Option<ReviewDecision>,
    ) -> Result<RunOutcome, StageError> {
        let mut current = entry;
        let mut state = state;
        let mut decision = decision;

        loop {
            debug!(stage = %current, "invoking stage");
            let stage = self.stages.stage(current);
            let injected = decision.take();

            let outcome = retry_with_policy(
                &format!("stage:{current}"),
                &self.stage_retry,
                || stage.run(state.clone(), injected.as_ref()),
            )
            .await?;

            match outcome {
                StageOutcome::Suspend { state, prompt } => {
                    info!(stage = %current, "stage suspended for review");
                    return Ok(RunOutcome::Suspended { state, prompt });
                }
                StageOutcome::Advance(next_state) => {
                    state = next_state;
                    // A stage that sets no action takes the failed edge.
                    let action = state.next_action.unwrap_or(NextAction::Failed);
                    match transition(current, action) {
                        Some(Target::Stage(next)) => {
                            debug!(from = %current, action = %action, to = %next, "advancing");
                            current = next;
                        }
                        Some(Target::End) => return Ok(RunOutcome::Finished(state)),
                        None => {
                            return Err(StageError::InvalidTransition {
                                stage: current.to_string(),
                                action: action.to_string(),
                            })
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    #[test]
    fn test_transition_table_edges() {
        use NextAction::*;
        use StageId::*;

        assert_eq!(transition(Script, FindAssets), Some(Target::Stage(Assets)));
        assert_eq!(
            transition(Script, NeedsScriptRevision),
            Some(Target::Stage(Script))
        );
        assert_eq!(transition(Script, Failed), Some(Target::End));

        assert_eq!(
            transition(Assets, GenerateAudio),
            Some(Target::Stage(Narration))
        );
        assert_eq!(transition(Assets, RefineQuery), Some(Target::Stage(Assets)));
        assert_eq!(
            transition(Assets, NeedsScriptRevision),
            Some(Target::Stage(Script))
        );
        assert_eq!(transition(Assets, Failed), Some(Target::End));

        assert_eq!(
            transition(Narration, SelectMusic),
            Some(Target::Stage(Music))
        );
        assert_eq!(
            transition(Narration, NeedsScriptRevision),
            Some(Target::Stage(Script))
        );
        assert_eq!(transition(Narration, Failed), Some(Target::End));

        assert_eq!(
            transition(Music, AssembleVideo),
            Some(Target::Stage(Assemble))
        );
        assert_eq!(transition(Music, Failed), Some(Target::End));

        assert_eq!(
            transition(Assemble, HumanReview),
            Some(Target::Stage(Review))
        );
        assert_eq!(
            transition(Assemble, Reassemble),
            Some(Target::Stage(Assemble))
        );
        assert_eq!(transition(Assemble, Failed), Some(Target::End));

        assert_eq!(transition(Review, Approved), Some(Target::Stage(StageId::Complete)));
        assert_eq!(
            transition(Review, NeedsScriptRevision),
            Some(Target::Stage(Script))
        );
        assert_eq!(
            transition(Review, FindMoreAssets),
            Some(Target::Stage(Assets))
        );
        assert_eq!(transition(Review, Reassemble), Some(Target::Stage(Assemble)));
        assert_eq!(transition(Review, Failed), Some(Target::End));

        assert_eq!(transition(StageId::Complete, NextAction::Complete), Some(Target::End));
        assert_eq!(transition(StageId::Complete, Failed), Some(Target::End));
    }

    #[test]
    fn test_transition_table_rejects_illegal_pairs() {
        use NextAction::*;
        use StageId::*;

        assert_eq!(transition(Script, SelectMusic), None);
        assert_eq!(transition(Music, RefineQuery), None);
        assert_eq!(transition(Narration, Approved), None);
        assert_eq!(transition(Review, HumanReview), None);
    }

    /// Stamps a status and picks a fixed edge
    struct FixedStage {
        status: &'static str,
        action: NextAction,
    }

    #[async_trait]
    impl Stage for FixedStage {
        async fn run(
            &self,
            mut state: PipelineState,
            _decision: Option<&ReviewDecision>,
        ) -> Result<StageOutcome, StageError> {
            state.status = self.status.to_string();
            state.next_action = Some(self.action);
            Ok(StageOutcome::Advance(state))
        }
    }

    /// Suspends without a decision, follows the decision otherwise
    struct GateStage;

    #[async_trait]
    impl Stage for GateStage {
        async fn run(
            &self,
            mut state: PipelineState,
            decision: Option<&ReviewDecision>,
        ) -> Result<StageOutcome, StageError> {
            let Some(decision) = decision else {
                let prompt = ReviewPrompt {
                    message: "Review required".into(),
                    ..Default::default()
                };
                return Ok(StageOutcome::Suspend { state, prompt });
            };
            state.next_action = Some(match decision.human_decision.as_str() {
                "approved" => NextAction::Approved,
                _ => NextAction::Failed,
            });
            Ok(StageOutcome::Advance(state))
        }
    }

    fn stages_through_review() -> StageSet {
        StageSet::new(
            Arc::new(FixedStage {
                status: "script_ready",
                action: NextAction::FindAssets,
            }),
            Arc::new(FixedStage {
                status: "assets_ready",
                action: NextAction::GenerateAudio,
            }),
            Arc::new(FixedStage {
                status: "audio_ready",
                action: NextAction::SelectMusic,
            }),
            Arc::new(FixedStage {
                status: "music_ready",
                action: NextAction::AssembleVideo,
            }),
            Arc::new(FixedStage {
                status: "video_ready",
                action: NextAction::HumanReview,
            }),
            Arc::new(GateStage),
            Arc::new(FixedStage {
                status: "completed",
                action: NextAction::Complete,
            }),
        )
    }

    #[tokio::test]
    async fn test_fresh_run_suspends_at_review() {
        let machine = PipelineMachine::new(stages_through_review());
        let outcome = machine
            .run(PipelineState::default(), PipelineMachine::ENTRY, None)
            .await
            .unwrap();

        match outcome {
            RunOutcome::Suspended { state, prompt } => {
                assert_eq!(state.status, "video_ready");
                assert_eq!(prompt.message, "Review required");
            }
            other => panic!("expected suspension, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resume_with_approval_finishes() {
        let machine = PipelineMachine::new(stages_through_review());
        let decision = ReviewDecision {
            human_decision: "approved".into(),
            review_notes: String::new(),
        };
        let outcome = machine
            .run(
                PipelineState::default(),
                PipelineMachine::RESUME_ENTRY,
                Some(decision),
            )
            .await
            .unwrap();

        match outcome {
            RunOutcome::Finished(state) => {
                assert_eq!(state.status, "completed");
                assert_eq!(state.next_action, Some(NextAction::Complete));
            }
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsupported_action_fails_the_run() {
        // A script stage that picks an edge the table has no entry for.
        let mut stages = stages_through_review();
        stages.script = Arc::new(FixedStage {
            status: "script_ready",
            action: NextAction::SelectMusic,
        });

        let machine = PipelineMachine::new(stages);
        let err = machine
            .run(PipelineState::default(), PipelineMachine::ENTRY, None)
            .await
            .unwrap_err();

        match err {
            StageError::InvalidTransition { stage, action } => {
                assert_eq!(stage, "script");
                assert_eq!(action, "select_music");
            }
            other => panic!("expected invalid transition, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_action_takes_failed_edge() {
        /// Never sets `next_action`
        struct SilentStage;

        #[async_trait]
        impl Stage for SilentStage {
            async fn run(
                &self,
                mut state: PipelineState,
                _decision: Option<&ReviewDecision>,
            ) -> Result<StageOutcome, StageError> {
                state.status = "confused".into();
                state.next_action = None;
                Ok(StageOutcome::Advance(state))
            }
        }

        let mut stages = stages_through_review();
        stages.script = Arc::new(SilentStage);

        let machine = PipelineMachine::new(stages);
        let outcome = machine
            .run(PipelineState::default(), PipelineMachine::ENTRY, None)
            .await
            .unwrap();

        match outcome {
            RunOutcome::Finished(state) => assert_eq!(state.status, "confused"),
            other => panic!("expected finish via failed edge, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_stage_error_is_retried_once() {
        use std::sync::atomic::{AtomicU32, Ordering};

        /// Fails with a transient error on the first call only
        struct FlakyStage {
            calls: AtomicU32,
        }

        #[async_trait]
        impl Stage for FlakyStage {
            async fn run(
                &self,
                mut state: PipelineState,
                _decision: Option<&ReviewDecision>,
            ) -> Result<StageOutcome, StageError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(StageError::Timeout("llm".into()));
                }
                state.status = "failed:script".into();
                state.next_action = Some(NextAction::Failed);
                Ok(StageOutcome::Advance(state))
            }
        }

        let mut stages = stages_through_review();
        stages.script = Arc::new(FlakyStage {
            calls: AtomicU32::new(0),
        });

        let machine = PipelineMachine::new(stages);
        let outcome = machine
            .run(PipelineState::default(), PipelineMachine::ENTRY, None)
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Finished(_)));
    }
}
