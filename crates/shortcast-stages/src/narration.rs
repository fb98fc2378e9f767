//! Narration synthesis stage
//!
//! ElevenLabs text-to-speech when a key is configured; otherwise a sine-tone
//! placeholder sized to the estimated narration length, with the fallback
//! noted in the error log. A dead narration stage still routes forward to
//! music — a short with placeholder audio beats no short at all.

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use shortcast_core::config::Settings;
use shortcast_core::error::StageError;
use shortcast_core::retry::retry_call;
use shortcast_core::stage::{ReviewDecision, Stage, StageOutcome};
use shortcast_core::state::{NextAction, PipelineState};

use crate::util::{ensure_runtime_dirs, estimate_narration_seconds, make_tone_wav, timestamp_name};

const STAGE: &str = "narration";

pub struct NarrationStage {
    client: reqwest::Client,
    api_key: Option<String>,
    voice_id: String,
    model_id: String,
}

impl NarrationStage {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            api_key: settings.elevenlabs_api_key.clone(),
            voice_id: settings.elevenlabs_voice_id.clone(),
            model_id: settings.elevenlabs_model_id.clone(),
        }
    }

    /// Returns false when synthesis is unavailable or failed; the caller
    /// falls back to a generated tone.
    async fn synthesize(&self, script: &str, dest: &Path) -> bool {
        let Some(api_key) = &self.api_key else {
            return false;
        };

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice_id
        );
        let body = json!({
            "text": script,
            "model_id": self.model_id,
            "voice_settings": { "stability": 0.4, "similarity_boost": 0.75 },
        });

        let result = retry_call("tts_elevenlabs", 3, || {
            let request = self
                .client
                .post(url.as_str())
                .header("xi-api-key", api_key.as_str())
                .header("Accept", "audio/mpeg")
                .json(&body);
            let dest = dest.to_path_buf();
            async move {
                let response = request.send().await?.error_for_status()?;
                let bytes = response.bytes().await?;
                tokio::fs::write(&dest, &bytes).await?;
                Ok(())
            }
        })
        .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "narration synthesis failed");
                false
            }
        }
    }
}

#[async_trait]
impl Stage for NarrationStage {
    async fn run(
        &self,
        mut state: PipelineState,
        _decision: Option<&ReviewDecision>,
    ) -> Result<StageOutcome, StageError> {
        ensure_runtime_dirs(&state)?;
        state.bump_attempt(STAGE);

        let script = state.script.clone().unwrap_or_default();
        let script = script.trim();
        if script.is_empty() {
            state.add_error("narration requires a script.");
            state.status = "failed:missing_script".to_string();
            state.next_action = Some(NextAction::NeedsScriptRevision);
            return Ok(StageOutcome::Advance(state));
        }

        let audio_dir = Path::new(&state.assets_dir).join("audio");
        let mp3_path = audio_dir.join(timestamp_name("narration", ".mp3"));

        if self.synthesize(script, &mp3_path).await {
            info!(path = %mp3_path.display(), "narration generated");
            state.audio_narration = Some(mp3_path.display().to_string());
        } else {
            let wav_path = audio_dir.join(timestamp_name("narration_fallback", ".wav"));
            let duration = estimate_narration_seconds(script);
            if let Err(err) = make_tone_wav(&wav_path, duration, 250.0, 0.1) {
                state.add_error(format!("narration error: {err}"));
                state.status = "failed:narration".to_string();
                state.next_action = Some(NextAction::SelectMusic);
                return Ok(StageOutcome::Advance(state));
            }
            state.audio_narration = Some(wav_path.display().to_string());
            state.add_error("TTS unavailable. Fallback tone narration was generated.");
        }

        state.status = "audio_ready".to_string();
        state.next_action = Some(NextAction::SelectMusic);
        Ok(StageOutcome::Advance(state))
    }
}
