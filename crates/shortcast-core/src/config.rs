//! Environment-driven configuration

use std::env;
use std::path::PathBuf;

use crate::store::JobStoreConfig;

/// Runtime settings, loaded once at startup.
///
/// Provider keys are optional; every stage that uses one has a local
/// fallback so the pipeline works offline.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_root: PathBuf,
    pub assets_root: PathBuf,
    pub output_root: PathBuf,
    pub jobs_root: PathBuf,

    pub bind_addr: String,
    pub cors_origins: Vec<String>,

    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub pexels_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_voice_id: String,
    pub elevenlabs_model_id: String,

    pub max_asset_attempts: u32,
    pub max_concurrent_jobs: usize,
}

impl Settings {
    /// Read settings from the environment, loading `.env` first when present
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let data_root =
            PathBuf::from(env::var("SHORTCAST_DATA_ROOT").unwrap_or_else(|_| "data".into()));

        Self {
            assets_root: data_root.join("assets"),
            output_root: data_root.join("output"),
            jobs_root: data_root.join("jobs"),
            bind_addr: env::var("SHORTCAST_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into()),
            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".into())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            openai_api_key: non_empty(env::var("OPENAI_API_KEY").ok()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            pexels_api_key: non_empty(env::var("PEXELS_API_KEY").ok()),
            elevenlabs_api_key: non_empty(env::var("ELEVENLABS_API_KEY").ok()),
            elevenlabs_voice_id: env::var("ELEVENLABS_VOICE_ID")
                .unwrap_or_else(|_| "EXAVITQu4vr4xnSDxMaL".into()),
            elevenlabs_model_id: env::var("ELEVENLABS_MODEL_ID")
                .unwrap_or_else(|_| "eleven_multilingual_v2".into()),
            max_asset_attempts: parse_env("SHORTCAST_MAX_ASSET_ATTEMPTS", 3),
            max_concurrent_jobs: parse_env("SHORTCAST_MAX_CONCURRENT_JOBS", 4),
            data_root,
        }
    }

    /// Registry configuration derived from these settings
    pub fn job_store_config(&self) -> JobStoreConfig {
        JobStoreConfig {
            jobs_dir: self.jobs_root.clone(),
            assets_dir: self.assets_root.clone(),
            output_dir: self.output_root.clone(),
            max_asset_attempts: self.max_asset_attempts,
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
