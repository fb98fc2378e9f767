//! Music selection stage
//!
//! Picks a random track from the local music library; synthesizes a quiet
//! background tone when the library is empty.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::seq::SliceRandom;

use shortcast_core::error::StageError;
use shortcast_core::stage::{ReviewDecision, Stage, StageOutcome};
use shortcast_core::state::{NextAction, PipelineState};

use crate::util::{ensure_runtime_dirs, estimate_narration_seconds, make_tone_wav, timestamp_name};

const STAGE: &str = "music";
const PLAYABLE_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "ogg"];

#[derive(Default)]
pub struct MusicStage;

impl MusicStage {
    pub fn new() -> Self {
        Self
    }

    fn library_tracks(music_dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(music_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| PLAYABLE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[async_trait]
impl Stage for MusicStage {
    async fn run(
        &self,
        mut state: PipelineState,
        _decision: Option<&ReviewDecision>,
    ) -> Result<StageOutcome, StageError> {
        ensure_runtime_dirs(&state)?;
        state.bump_attempt(STAGE);

        let music_dir = Path::new(&state.assets_dir).join("music");
        let tracks = Self::library_tracks(&music_dir);

        if let Some(track) = tracks.choose(&mut rand::thread_rng()) {
            state.bg_music = Some(track.display().to_string());
        } else {
            let fallback = music_dir.join(timestamp_name("bg_music", ".wav"));
            let script = state.script.clone().unwrap_or_default();
            let duration = estimate_narration_seconds(&script).max(12.0);
            if let Err(err) = make_tone_wav(&fallback, duration, 112.0, 0.05) {
                state.add_error(format!("music error: {err}"));
                state.status = "failed:music".to_string();
                state.next_action = Some(NextAction::AssembleVideo);
                return Ok(StageOutcome::Advance(state));
            }
            state.bg_music = Some(fallback.display().to_string());
            state.add_error("No local royalty-free music found. Generated fallback tone music.");
        }

        state.status = "music_ready".to_string();
        state.next_action = Some(NextAction::AssembleVideo);
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
            script: Some("A script.".into()),
            assets_dir: dir.path().join("assets").display().to_string(),
            output_dir: dir.path().join("output").display().to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_empty_library_generates_fallback() {
        let dir = TempDir::new().unwrap();
        let outcome = MusicStage::new().run(state_in(&dir), None).await.unwrap();
        let StageOutcome::Advance(state) = outcome else {
            panic!("music stage never suspends");
        };

        assert_eq!(state.status, "music_ready");
        assert_eq!(state.next_action, Some(NextAction::AssembleVideo));
        let track = state.bg_music.unwrap();
        assert!(track.ends_with(".wav"));
        assert!(Path::new(&track).exists());
        assert!(state
            .errors
            .iter()
            .any(|e| e.contains("Generated fallback tone music")));
    }

    #[tokio::test]
    async fn test_library_track_is_preferred() {
        let dir = TempDir::new().unwrap();
        let state = state_in(&dir);
        let music_dir = dir.path().join("assets").join("music");
        fs::create_dir_all(&music_dir).unwrap();
        fs::write(music_dir.join("groove.mp3"), b"not really audio").unwrap();
        fs::write(music_dir.join("notes.txt"), b"ignored").unwrap();

        let outcome = MusicStage::new().run(state, None).await.unwrap();
        let StageOutcome::Advance(state) = outcome else {
            panic!("music stage never suspends");
        };

        assert!(state.bg_music.unwrap().ends_with("groove.mp3"));
        assert!(state.errors.is_empty());
    }
}
