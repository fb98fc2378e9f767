//! Video assembly stage
//!
//! Composes the final 1080x1920 vertical MP4 with ffmpeg: images looped,
//! clips trimmed, every visual scaled and center-cropped to fill the frame,
//! narration mixed with background music. Failures route to an in-place
//! `reassemble` retry up to three attempts, then fail the job.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use shortcast_core::error::StageError;
use shortcast_core::stage::{ReviewDecision, Stage, StageOutcome};
use shortcast_core::state::{NextAction, PipelineState};

use crate::util::{ensure_runtime_dirs, estimate_narration_seconds, timestamp_name};

const STAGE: &str = "assemble";
const MAX_RENDER_ATTEMPTS: u32 = 3;
const TARGET_WIDTH: u32 = 1080;
const TARGET_HEIGHT: u32 = 1920;
const MAX_DURATION_S: f64 = 59.0;
const MUSIC_GAIN: f64 = 0.18;
const CLIP_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv"];

#[derive(Default)]
pub struct AssembleStage;

impl AssembleStage {
    pub fn new() -> Self {
        Self
    }

    /// Media duration via ffprobe; `None` when ffprobe is unavailable or
    /// the file is unreadable
    async fn probe_duration(path: &str) -> Option<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                path,
            ])
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }

    fn is_clip(path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| CLIP_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    async fn render(&self, state: &PipelineState, dest: &Path) -> Result<(), StageError> {
        let script = state.script.clone().unwrap_or_default();
        let narration = state
            .audio_narration
            .clone()
            .filter(|p| Path::new(p).exists());
        let music = state.bg_music.clone().filter(|p| Path::new(p).exists());

        let mut target = estimate_narration_seconds(&script);
        if let Some(path) = &narration {
            if let Some(probed) = Self::probe_duration(path).await {
                target = probed;
            }
        }
        let target = target.min(MAX_DURATION_S).max(1.0);

        let media: Vec<String> = state
            .clips
            .iter()
            .chain(state.images.iter())
            .filter(|p| Path::new(p).exists())
            .cloned()
            .collect();
        let each = (target / media.len().max(1) as f64).max(2.0);

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y");
        let mut filters: Vec<String> = Vec::new();

        if media.is_empty() {
            cmd.args([
                "-f",
                "lavfi",
                "-t",
                &format!("{target:.3}"),
                "-i",
                &format!("color=c=0x141823:s={TARGET_WIDTH}x{TARGET_HEIGHT}:r=30"),
            ]);
            filters.push("[0:v]format=yuv420p[v0]".to_string());
        } else {
            for (idx, path) in media.iter().enumerate() {
                if Self::is_clip(path) {
                    cmd.args(["-t", &format!("{each:.3}"), "-i", path]);
                } else {
                    cmd.args(["-loop", "1", "-t", &format!("{each:.3}"), "-i", path]);
                }
                filters.push(format!(
                    "[{idx}:v]scale={TARGET_WIDTH}:{TARGET_HEIGHT}:force_original_aspect_ratio=increase,\
                     crop={TARGET_WIDTH}:{TARGET_HEIGHT},setsar=1,fps=30,format=yuv420p[v{idx}]"
                ));
            }
        }

        let visual_count = media.len().max(1);
        let mut audio_labels: Vec<String> = Vec::new();
        let mut input_idx = visual_count;
        if let Some(path) = &narration {
            cmd.args(["-i", path]);
            filters.push(format!("[{input_idx}:a]volume=1.0[a{}]", audio_labels.len()));
            audio_labels.push(format!("[a{}]", audio_labels.len()));
            input_idx += 1;
        }
        if let Some(path) = &music {
            cmd.args(["-stream_loop", "-1", "-i", path]);
            filters.push(format!(
                "[{input_idx}:a]volume={MUSIC_GAIN}[a{}]",
                audio_labels.len()
            ));
            audio_labels.push(format!("[a{}]", audio_labels.len()));
        }

        let concat_inputs: String = (0..visual_count).map(|i| format!("[v{i}]")).collect();
        filters.push(format!(
            "{concat_inputs}concat=n={visual_count}:v=1:a=0[vout]"
        ));
        if !audio_labels.is_empty() {
            filters.push(format!(
                "{}amix=inputs={}:duration=longest[aout]",
                audio_labels.join(""),
                audio_labels.len()
            ));
        }

        cmd.args(["-filter_complex", &filters.join(";")]);
        cmd.args(["-map", "[vout]"]);
        if !audio_labels.is_empty() {
            cmd.args(["-map", "[aout]"]);
        }
        cmd.args([
            "-t",
            &format!("{target:.3}"),
            "-r",
            "30",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-c:a",
            "aac",
        ]);
        cmd.arg(dest);
        cmd.stdin(Stdio::null());

        debug!(media = media.len(), target, "launching ffmpeg");
        let output = cmd
            .output()
            .await
            .map_err(|err| StageError::fatal(format!("failed to launch ffmpeg: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(4).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(StageError::fatal(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                tail.join(" | ")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for AssembleStage {
    async fn run(
        &self,
        mut state: PipelineState,
        _decision: Option<&ReviewDecision>,
    ) -> Result<StageOutcome, StageError> {
        ensure_runtime_dirs(&state)?;
        let attempt = state.bump_attempt(STAGE);

        let dest = Path::new(&state.output_dir).join(timestamp_name("short_final", ".mp4"));
        match self.render(&state, &dest).await {
            Ok(()) => {
                info!(path = %dest.display(), "final video rendered");
                state.final_video = Some(dest.display().to_string());
                state.status = "video_ready".to_string();
                state.next_action = Some(NextAction::HumanReview);
            }
            Err(err) => {
                state.add_error(format!("assemble error: {err}"));
                state.status = "failed:assemble".to_string();
                state.next_action = Some(if attempt < MAX_RENDER_ATTEMPTS {
                    NextAction::Reassemble
                } else {
                    NextAction::Failed
                });
            }
        }
        Ok(StageOutcome::Advance(state))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_clip_extension_detection() {
        assert!(AssembleStage::is_clip("a/b/clip.mp4"));
        assert!(AssembleStage::is_clip("a/b/CLIP.MOV"));
        assert!(!AssembleStage::is_clip("a/b/photo.jpg"));
        assert!(!AssembleStage::is_clip("a/b/noext"));
    }

    /// A clip file holding garbage makes the render fail whether or not
    /// ffmpeg is installed: present, ffmpeg rejects the input; absent, the
    /// launch itself errors. Either way the failure must stay contained.
    fn state_with_garbage_clip(dir: &TempDir) -> PipelineState {
        let clip = dir.path().join("broken.mp4");
        std::fs::write(&clip, b"definitely not an mp4").unwrap();
        PipelineState {
            topic: "Black holes".into(),
            assets_dir: dir.path().join("assets").display().to_string(),
            output_dir: dir.path().join("output").display().to_string(),
            clips: vec![clip.display().to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_render_failure_routes_to_reassemble() {
        let dir = TempDir::new().unwrap();
        let outcome = AssembleStage::new()
            .run(state_with_garbage_clip(&dir), None)
            .await
            .unwrap();
        let StageOutcome::Advance(state) = outcome else {
            panic!("assemble stage never suspends");
        };

        assert_eq!(state.status, "failed:assemble");
        assert_eq!(state.next_action, Some(NextAction::Reassemble));
        assert!(state.errors.iter().any(|e| e.contains("assemble error")));
        assert!(state.final_video.is_none());
    }

    #[tokio::test]
    async fn test_exhausted_attempts_take_failed_edge() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with_garbage_clip(&dir);
        state.attempts.insert(STAGE.into(), MAX_RENDER_ATTEMPTS - 1);

        let outcome = AssembleStage::new().run(state, None).await.unwrap();
        let StageOutcome::Advance(state) = outcome else {
            panic!("assemble stage never suspends");
        };

        assert_eq!(state.attempt(STAGE), MAX_RENDER_ATTEMPTS);
        assert_eq!(state.status, "failed:assemble");
        assert_eq!(state.next_action, Some(NextAction::Failed));
    }
}
