//! Script drafting stage
//!
//! Produces the voiceover script for the topic: via the OpenAI chat API when
//! a key is configured, via a deterministic template otherwise. Reviewer
//! notes from an earlier pass are folded into the next draft.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use shortcast_core::config::Settings;
use shortcast_core::error::StageError;
use shortcast_core::retry::retry_call;
use shortcast_core::stage::{ReviewDecision, Stage, StageOutcome};
use shortcast_core::state::{NextAction, PipelineState};

use crate::util::{ensure_runtime_dirs, split_sentences};

const STAGE: &str = "script";
const MAX_DRAFT_ATTEMPTS: u32 = 3;
const MAX_SENTENCES: usize = 10;
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct ScriptStage {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
}

impl ScriptStage {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            api_key: settings.openai_api_key.clone(),
            model: settings.openai_model.clone(),
        }
    }

    fn template_script(topic: &str, notes: &str) -> String {
        let note_line = if notes.is_empty() {
            String::new()
        } else {
            format!(" Keep this review note in mind: {notes}")
        };
        format!(
            "Let us break down {topic}. \
             Here is the one reason people are paying attention now. \
             Now we simplify the core idea in plain language. \
             Next comes a surprising detail that most people miss. \
             Then we connect it to a practical everyday example. \
             Here is the key takeaway in one sentence. \
             Before we end, try this quick action right away. \
             Follow for the next short deep dive.{note_line}"
        )
    }

    async fn draft(&self, topic: &str, notes: &str) -> String {
        let Some(api_key) = &self.api_key else {
            return Self::template_script(topic, notes);
        };

        let mut prompt = format!(
            "Write a YouTube Shorts voiceover script in 8-10 sentences.\n\
             Rules:\n\
             - Must fit under 60 seconds.\n\
             - Sentence 1 should be a strong hook.\n\
             - Keep wording concise and high energy.\n\
             - No markdown and no bullet points.\n\
             Topic: {topic}\n"
        );
        if !notes.is_empty() {
            prompt.push_str(&format!("Reviewer feedback to include: {notes}\n"));
        }

        let body = json!({
            "model": self.model,
            "temperature": 0.7,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let result = retry_call("openai_chat", 3, || {
            let request = self
                .client
                .post(OPENAI_CHAT_URL)
                .bearer_auth(api_key)
                .json(&body);
            async move {
                let response = request.send().await?.error_for_status()?;
                let payload: serde_json::Value = response.json().await?;
                let text = payload["choices"][0]["message"]["content"]
                    .as_str()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                Ok(text)
            }
        })
        .await;

        match result {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => Self::template_script(topic, notes),
            Err(err) => {
                warn!(error = %err, "script generation fell back to the template");
                Self::template_script(topic, notes)
            }
        }
    }
}

#[async_trait]
impl Stage for ScriptStage {
    async fn run(
        &self,
        mut state: PipelineState,
        _decision: Option<&ReviewDecision>,
    ) -> Result<StageOutcome, StageError> {
        ensure_runtime_dirs(&state)?;
        let attempt = state.bump_attempt(STAGE);

        let topic = state.topic.trim().to_string();
        if topic.is_empty() {
            state.add_error("topic is required.");
            state.status = "failed:missing_topic".to_string();
            state.next_action = Some(NextAction::Failed);
            return Ok(StageOutcome::Advance(state));
        }

        info!(topic = %topic, attempt, "drafting script");
        let notes = state.review_notes.clone().unwrap_or_default();
        let draft = self.draft(&topic, &notes).await;
        let sentences = split_sentences(&draft, MAX_SENTENCES);

        if sentences.is_empty() {
            state.add_error("script draft came back empty.");
            state.status = "failed:script".to_string();
            state.next_action = Some(if attempt < MAX_DRAFT_ATTEMPTS {
                NextAction::NeedsScriptRevision
            } else {
                NextAction::Failed
            });
            return Ok(StageOutcome::Advance(state));
        }

        state.script = Some(sentences.join(" "));
        state.status = "script_ready".to_string();
        state.next_action = Some(NextAction::FindAssets);
        Ok(StageOutcome::Advance(state))
    }
}
