//! Asset acquisition stage
//!
//! Searches Pexels for images and clips matching terms derived from the
//! topic and script, downloads the winners with bounded concurrency, and
//! pads with generated placeholders when the haul is thin. Routing: enough
//! assets → narration; short but attempts remain → refine the query and try
//! again; attempts exhausted → send the script back for revision.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use shortcast_core::config::Settings;
use shortcast_core::error::StageError;
use shortcast_core::retry::retry_call;
use shortcast_core::stage::{ReviewDecision, Stage, StageOutcome};
use shortcast_core::state::{AttributionItem, NextAction, PipelineState};

use crate::util::{
    ensure_runtime_dirs, make_placeholder_image, sanitize_filename, script_to_search_terms,
    timestamp_name,
};

const STAGE: &str = "assets";
const PEXELS_IMAGE_URL: &str = "https://api.pexels.com/v1/search";
const PEXELS_VIDEO_URL: &str = "https://api.pexels.com/videos/search";
const QUERY_LIMIT: usize = 3;
const IMAGE_PLAN_LIMIT: usize = 6;
const VIDEO_PLAN_LIMIT: usize = 4;
const DOWNLOAD_CONCURRENCY: usize = 6;
const MIN_TOTAL_ASSETS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetKind {
    Image,
    Video,
}

impl AssetKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// One search hit before download
#[derive(Debug, Clone)]
struct AssetCandidate {
    url: String,
    provider: String,
    source_url: String,
    license: String,
    kind: AssetKind,
}

pub struct AssetsStage {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl AssetsStage {
    pub fn new(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            api_key: settings.pexels_api_key.clone(),
        }
    }

    async fn search_images(
        &self,
        query: &str,
        per_page: u32,
    ) -> Result<Vec<AssetCandidate>, StageError> {
        let Some(api_key) = &self.api_key else {
            return Ok(Vec::new());
        };

        retry_call(&format!("pexels_images:{query}"), 3, || {
            let request = self
                .client
                .get(PEXELS_IMAGE_URL)
                .header("Authorization", api_key.as_str())
                .query(&[
                    ("query", query.to_string()),
                    ("per_page", per_page.to_string()),
                ]);
            async move {
                let payload: serde_json::Value =
                    request.send().await?.error_for_status()?.json().await?;
                let photos = payload["photos"].as_array().cloned().unwrap_or_default();

                let mut out = Vec::new();
                for photo in photos {
                    let src = &photo["src"];
                    let url = ["large2x", "large", "original"]
                        .iter()
                        .find_map(|key| src[*key].as_str())
                        .unwrap_or_default();
                    if url.is_empty() {
                        continue;
                    }
                    out.push(AssetCandidate {
                        url: url.to_string(),
                        provider: "pexels".to_string(),
                        source_url: photo["url"].as_str().unwrap_or_default().to_string(),
                        license: "Pexels License".to_string(),
                        kind: AssetKind::Image,
                    });
                }
                Ok(out)
            }
        })
        .await
    }

    async fn search_videos(
        &self,
        query: &str,
        per_page: u32,
    ) -> Result<Vec<AssetCandidate>, StageError> {
        let Some(api_key) = &self.api_key else {
            return Ok(Vec::new());
        };

        retry_call(&format!("pexels_videos:{query}"), 3, || {
            let request = self
                .client
                .get(PEXELS_VIDEO_URL)
                .header("Authorization", api_key.as_str())
                .query(&[
                    ("query", query.to_string()),
                    ("per_page", per_page.to_string()),
                ]);
            async move {
                let payload: serde_json::Value =
                    request.send().await?.error_for_status()?.json().await?;
                let videos = payload["videos"].as_array().cloned().unwrap_or_default();

                let mut out = Vec::new();
                for item in videos {
                    let mut files = item["video_files"].as_array().cloned().unwrap_or_default();
                    files.sort_by_key(|f| f["width"].as_u64().unwrap_or(0));
                    // Smallest HD rendition, or the largest file as a fallback
                    let candidate = files
                        .iter()
                        .find(|f| f["quality"].as_str() == Some("hd"))
                        .or_else(|| files.last());
                    let Some(link) = candidate.and_then(|f| f["link"].as_str()) else {
                        continue;
                    };
                    out.push(AssetCandidate {
                        url: link.to_string(),
                        provider: "pexels".to_string(),
                        source_url: item["url"].as_str().unwrap_or_default().to_string(),
                        license: "Pexels License".to_string(),
                        kind: AssetKind::Video,
                    });
                }
                Ok(out)
            }
        })
        .await
    }

    async fn download(&self, url: &str, dest: &Path) -> bool {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let result = retry_call(&format!("download:{name}"), 3, || {
            let request = self.client.get(url);
            let dest = dest.to_path_buf();
            async move {
                let response = request.send().await?.error_for_status()?;
                let mut file = tokio::fs::File::create(&dest).await?;
                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    file.write_all(&chunk?).await?;
                }
                file.flush().await?;
                Ok(())
            }
        })
        .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(url, error = %err, "asset download failed");
                false
            }
        }
    }
}

#[async_trait]
impl Stage for AssetsStage {
    async fn run(
        &self,
        mut state: PipelineState,
        _decision: Option<&ReviewDecision>,
    ) -> Result<StageOutcome, StageError> {
        ensure_runtime_dirs(&state)?;
        let attempt = state.bump_attempt(STAGE);
        let max_attempts = state.max_asset_attempts.max(1);

        let topic = state.topic.clone();
        let script = state.script.clone().unwrap_or_default();
        let terms = script_to_search_terms(&topic, &script, 6);
        state.asset_queries = terms.clone();

        let images_dir = Path::new(&state.assets_dir).join("images");
        let clips_dir = Path::new(&state.assets_dir).join("clips");
        let queries: Vec<String> = terms.into_iter().take(QUERY_LIMIT).collect();
        info!(queries = queries.len(), attempt, "asset search started");

        // Fan out image and video searches for every query at once.
        let image_searches =
            futures::future::join_all(queries.iter().map(|q| self.search_images(q, 6)));
        let video_searches =
            futures::future::join_all(queries.iter().map(|q| self.search_videos(q, 5)));
        let (image_results, video_results) = futures::join!(image_searches, video_searches);

        let mut image_candidates = Vec::new();
        for (query, result) in queries.iter().zip(image_results) {
            match result {
                Ok(hits) => {
                    debug!(query = %query, hits = hits.len(), "image search");
                    image_candidates.extend(hits);
                }
                Err(err) => state.add_error(format!("asset search error (image:{query}): {err}")),
            }
        }
        let mut video_candidates = Vec::new();
        for (query, result) in queries.iter().zip(video_results) {
            match result {
                Ok(hits) => {
                    debug!(query = %query, hits = hits.len(), "video search");
                    video_candidates.extend(hits);
                }
                Err(err) => state.add_error(format!("asset search error (video:{query}): {err}")),
            }
        }

        let plan: Vec<AssetCandidate> = image_candidates
            .into_iter()
            .take(IMAGE_PLAN_LIMIT)
            .chain(video_candidates.into_iter().take(VIDEO_PLAN_LIMIT))
            .collect();

        let downloads: Vec<(AssetCandidate, PathBuf, bool)> =
            stream::iter(plan.into_iter().enumerate().map(|(idx, item)| {
                let query_hint = queries
                    .get(idx % queries.len().max(1))
                    .cloned()
                    .unwrap_or_else(|| topic.clone());
                let (folder, suffix) = match item.kind {
                    AssetKind::Image => (&images_dir, ".jpg"),
                    AssetKind::Video => (&clips_dir, ".mp4"),
                };
                let stem = sanitize_filename(
                    &format!("{query_hint}_{}_{attempt}_{idx}", item.kind.as_str()),
                    60,
                );
                let dest = folder.join(format!("{stem}{suffix}"));
                async move {
                    let ok = self.download(&item.url, &dest).await;
                    (item, dest, ok)
                }
            }))
            .buffer_unordered(DOWNLOAD_CONCURRENCY)
            .collect()
            .await;

        let mut images = state.images.clone();
        let mut clips = state.clips.clone();
        let mut attribution = state.attribution.clone();

        for (item, dest, ok) in downloads {
            if !ok {
                continue;
            }
            let local_path = dest.display().to_string();
            match item.kind {
                AssetKind::Image => images.push(local_path.clone()),
                AssetKind::Video => clips.push(local_path.clone()),
            }
            attribution.push(AttributionItem {
                provider: item.provider,
                source_url: item.source_url,
                license: item.license,
                local_path,
            });
        }

        // Pad to the minimum with generated placeholders.
        let mut placeholder_idx = 0;
        while images.len() + clips.len() < MIN_TOTAL_ASSETS {
            placeholder_idx += 1;
            let name = format!(
                "{}_{attempt}_{placeholder_idx}.bmp",
                timestamp_name("placeholder", "")
            );
            let placeholder = images_dir.join(name);
            if let Err(err) = make_placeholder_image(&placeholder, 540, 960) {
                state.add_error(format!("placeholder generation error: {err}"));
                break;
            }
            let local_path = placeholder.display().to_string();
            images.push(local_path.clone());
            attribution.push(AttributionItem {
                provider: "local-placeholder".to_string(),
                source_url: String::new(),
                license: "generated".to_string(),
                local_path,
            });
        }

        images.sort();
        images.dedup();
        clips.sort();
        clips.dedup();
        state.images = images;
        state.clips = clips;
        state.attribution = attribution;

        let enough = state.images.len() + state.clips.len() >= MIN_TOTAL_ASSETS;
        if enough {
            state.status = "assets_ready".to_string();
            state.next_action = Some(NextAction::GenerateAudio);
        } else if attempt < max_attempts {
            state.status = "assets_insufficient_retrying".to_string();
            state.next_action = Some(NextAction::RefineQuery);
        } else {
            state.status = "assets_insufficient_script_revision".to_string();
            state.next_action = Some(NextAction::NeedsScriptRevision);
        }
        Ok(StageOutcome::Advance(state))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn offline_stage() -> AssetsStage {
        let mut settings = Settings::from_env();
        settings.pexels_api_key = None;
        AssetsStage::new(reqwest::Client::new(), &settings)
    }

    fn state_in(dir: &TempDir) -> PipelineState {
        PipelineState {
            topic: "Black holes".into(),
            script: Some("Black holes bend light around them.".into()),
            max_asset_attempts: 3,
            assets_dir: dir.path().join("assets").display().to_string(),
            output_dir: dir.path().join("output").display().to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_offline_run_pads_with_placeholders() {
        let dir = TempDir::new().unwrap();
        let stage = offline_stage();

        let outcome = stage.run(state_in(&dir), None).await.unwrap();
        let StageOutcome::Advance(state) = outcome else {
            panic!("assets stage never suspends");
        };

        assert_eq!(state.status, "assets_ready");
        assert_eq!(state.next_action, Some(NextAction::GenerateAudio));
        assert_eq!(state.images.len(), MIN_TOTAL_ASSETS);
        assert!(state.clips.is_empty());
        assert_eq!(state.attribution.len(), MIN_TOTAL_ASSETS);
        assert!(state
            .attribution
            .iter()
            .all(|a| a.provider == "local-placeholder"));
        for image in &state.images {
            assert!(Path::new(image).exists());
        }
        assert_eq!(state.asset_queries[0], "Black holes");
    }

    #[tokio::test]
    async fn test_assets_accumulate_across_attempts() {
        let dir = TempDir::new().unwrap();
        let stage = offline_stage();

        let first = match stage.run(state_in(&dir), None).await.unwrap() {
            StageOutcome::Advance(state) => state,
            _ => unreachable!(),
        };
        let second = match stage.run(first.clone(), None).await.unwrap() {
            StageOutcome::Advance(state) => state,
            _ => unreachable!(),
        };

        assert_eq!(second.attempt(STAGE), 2);
        // Earlier downloads are kept; dedup means no double counting.
        assert!(second.images.len() >= first.images.len());
    }
}
