//! Stage implementations for the shortcast pipeline
//!
//! Each module implements one step of the fixed pipeline against the
//! [`Stage`](shortcast_core::stage::Stage) contract. Network-backed stages
//! (script, assets, narration) degrade to deterministic local fallbacks when
//! their provider keys are missing, so a fresh checkout runs without any
//! credentials; rendering still needs ffmpeg on PATH.

pub mod assemble;
pub mod assets;
pub mod complete;
pub mod music;
pub mod narration;
pub mod review;
pub mod script;
pub mod util;

use std::sync::Arc;
use std::time::Duration;

use shortcast_core::config::Settings;
use shortcast_core::error::StageError;
use shortcast_core::machine::StageSet;

pub use assemble::AssembleStage;
pub use assets::AssetsStage;
pub use complete::CompleteStage;
pub use music::MusicStage;
pub use narration::NarrationStage;
pub use review::{ReviewStage, REVIEW_OPTIONS};
pub use script::ScriptStage;

/// Build the production stage set. All network stages share one client.
pub fn default_stages(settings: &Settings) -> Result<StageSet, StageError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(20))
        .build()
        .map_err(|err| StageError::fatal(format!("failed to build http client: {err}")))?;

    Ok(StageSet::new(
        Arc::new(ScriptStage::new(client.clone(), settings)),
        Arc::new(AssetsStage::new(client.clone(), settings)),
        Arc::new(NarrationStage::new(client, settings)),
        Arc::new(MusicStage::new()),
        Arc::new(AssembleStage::new()),
        Arc::new(ReviewStage::new()),
        Arc::new(CompleteStage::new()),
    ))
}
