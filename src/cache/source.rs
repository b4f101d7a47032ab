//! Remote sources of model artifacts.

use hf_hub::api::sync::{Api, ApiBuilder};
use std::path::PathBuf;
use tracing::debug;

use crate::config::Settings;
use crate::error::{PipelineError, Result};

/// Something that can fetch a single artifact of a model repository.
///
/// Returns a readable local path to the fetched file. A missing file is an
/// error; callers decide whether that is fatal.
pub trait ComponentSource: Send + Sync {
    fn fetch(&self, model_id: &str, filename: &str) -> Result<PathBuf>;
}

/// Hugging Face Hub backed source.
pub struct HubSource {
    api: Api,
}

impl HubSource {
    pub fn new(settings: &Settings) -> Result<Self> {
        let mut builder = ApiBuilder::new()
            .with_progress(settings.hub.progress)
            .with_token(settings.hub.token.clone());
        if let Some(dir) = &settings.cache.hub_cache {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder
            .build()
            .map_err(|e| PipelineError::execution(format!("Failed to create hub client: {}", e)))?;
        Ok(Self { api })
    }
}

impl ComponentSource for HubSource {
    fn fetch(&self, model_id: &str, filename: &str) -> Result<PathBuf> {
        debug!("Fetching {} from {}", filename, model_id);
        self.api
            .model(model_id.to_string())
            .get(filename)
            .map_err(|e| PipelineError::execution(format!("{}/{}: {}", model_id, filename, e)))
    }
}
