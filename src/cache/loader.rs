use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::tasks::{ComponentManifest, ComponentRole};
use super::source::ComponentSource;

/// A component persisted under the task directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentHandle {
    pub role: ComponentRole,
    pub directory: PathBuf,
    /// Artifact files present in `directory`, by file name.
    pub files: BTreeMap<String, PathBuf>,
}

impl ComponentHandle {
    pub fn file(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    /// Like `file`, but missing files are an execution error.
    pub fn require(&self, name: &str) -> Result<&Path> {
        self.file(name).ok_or_else(|| {
            PipelineError::execution(format!("{} component has no '{}'", self.role, name))
        })
    }
}

/// Ready-to-use components of one (task, model) pair.
#[derive(Debug, Clone)]
pub struct CachedModelBundle {
    pub task_name: String,
    pub model_id: String,
    pub components: BTreeMap<ComponentRole, ComponentHandle>,
}

impl CachedModelBundle {
    pub fn component(&self, role: ComponentRole) -> Option<&ComponentHandle> {
        self.components.get(&role)
    }

    pub fn roles(&self) -> Vec<ComponentRole> {
        self.components.keys().copied().collect()
    }
}

/// Cache-or-download loader rooted at a local directory.
///
/// Concurrent first loads of the same task are not coordinated. They share
/// one staging directory, and a load that finds the task already moved into
/// place fails with an I/O error.
#[derive(Clone)]
pub struct ModelCacheLoader {
    root: PathBuf,
    source: Arc<dyn ComponentSource>,
}

impl ModelCacheLoader {
    pub fn new(root: PathBuf, source: Arc<dyn ComponentSource>) -> Self {
        Self { root, source }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_name: &str) -> PathBuf {
        self.root.join(task_name)
    }

    pub fn component_dir(&self, task_name: &str, role: ComponentRole) -> PathBuf {
        self.task_dir(task_name).join(role.as_str())
    }

    /// Returns the components of `model_id` for `task_name`.
    ///
    /// The first call downloads every role of the manifest and persists it;
    /// later calls read the task directory without touching the network.
    /// A missing required role (the model always is) fails the load.
    pub fn load(&self, model_id: &str, task_name: &str, manifest: &ComponentManifest) -> Result<CachedModelBundle> {
        let task_dir = self.task_dir(task_name);
        info!("--- Loading components for task: {} ---", task_name);

        let components = if task_dir.exists() {
            info!("Loading components from local path: '{}'", task_dir.display());
            self.load_local(model_id, task_name, manifest)?
        } else {
            info!("Local components not found. Downloading '{}' from the hub", model_id);
            let components = self.download(model_id, task_name, manifest)?;
            info!("Components saved to '{}'", task_dir.display());
            components
        };

        Ok(CachedModelBundle {
            task_name: task_name.to_string(),
            model_id: model_id.to_string(),
            components,
        })
    }

    fn load_local(
        &self,
        model_id: &str,
        task_name: &str,
        manifest: &ComponentManifest,
    ) -> Result<BTreeMap<ComponentRole, ComponentHandle>> {
        let mut components = BTreeMap::new();

        for (role, required) in manifest.roles() {
            let dir = self.component_dir(task_name, role);
            let artifacts = role.artifacts();
            let files: BTreeMap<String, PathBuf> = artifacts
                .files()
                .map(|name| (name.to_string(), dir.join(name)))
                .filter(|(_, path)| path.is_file())
                .collect();

            if artifacts.is_satisfied_by(|name| files.contains_key(name)) {
                components.insert(role, ComponentHandle { role, directory: dir, files });
            } else if required || role == ComponentRole::Model {
                return Err(PipelineError::MissingComponent {
                    role,
                    model_id: model_id.to_string(),
                    reason: format!("not found in {}", dir.display()),
                });
            } else {
                debug!("Optional component '{}' not present for {}", role, task_name);
            }
        }

        Ok(components)
    }

    /// Directory a download is assembled in before it is moved into place.
    fn staging_dir(&self, task_name: &str) -> PathBuf {
        self.root.join(format!(".{}.partial", task_name))
    }

    /// Fetches every role of the manifest, then persists them in one step.
    ///
    /// Nothing is written under the task directory unless every required
    /// role was fetched, so a failed download is retried by the next load.
    fn download(
        &self,
        model_id: &str,
        task_name: &str,
        manifest: &ComponentManifest,
    ) -> Result<BTreeMap<ComponentRole, ComponentHandle>> {
        let mut complete = Vec::new();

        for (role, required) in manifest.roles() {
            let artifacts = role.artifacts();
            let mut fetched = BTreeMap::new();
            let mut errors = BTreeMap::new();

            for name in artifacts.files() {
                match self.source.fetch(model_id, name) {
                    Ok(path) => {
                        fetched.insert(name, path);
                    }
                    Err(e) => {
                        debug!("{} has no {}: {}", model_id, name, e);
                        errors.insert(name, e.to_string());
                    }
                }
            }

            let open = artifacts.unsatisfied(|name| fetched.contains_key(name));
            if open.is_empty() {
                complete.push((role, fetched));
            } else if required || role == ComponentRole::Model {
                let mut reason = format!("could not fetch {}", open.join(", "));
                let cause = artifacts
                    .all_of
                    .iter()
                    .chain(artifacts.any_of)
                    .find_map(|name| errors.get(name));
                if let Some(cause) = cause {
                    reason = format!("{} ({})", reason, cause);
                }
                return Err(PipelineError::MissingComponent {
                    role,
                    model_id: model_id.to_string(),
                    reason,
                });
            } else {
                warn!("Skipping optional component '{}' of {}", role, model_id);
            }
        }

        let staging = self.staging_dir(task_name);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        for (role, fetched) in &complete {
            let dir = staging.join(role.as_str());
            fs::create_dir_all(&dir)?;
            for (name, src) in fetched {
                fs::copy(src, dir.join(name))?;
            }
        }
        fs::create_dir_all(&staging)?;
        fs::rename(&staging, self.task_dir(task_name))?;

        let components = complete
            .into_iter()
            .map(|(role, fetched)| {
                let directory = self.component_dir(task_name, role);
                let files = fetched
                    .into_keys()
                    .map(|name| (name.to_string(), directory.join(name)))
                    .collect();
                (role, ComponentHandle { role, directory, files })
            })
            .collect();
        Ok(components)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// In-memory repository of artifact files that counts fetches.
    pub(crate) struct FakeSource {
        staging: TempDir,
        files: HashMap<(String, String), String>,
        pub fetches: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn new() -> Self {
            Self { staging: TempDir::new().unwrap(), files: HashMap::new(), fetches: AtomicUsize::new(0) }
        }

        pub(crate) fn with_file(mut self, model_id: &str, name: &str, content: &str) -> Self {
            self.files.insert((model_id.to_string(), name.to_string()), content.to_string());
            self
        }
    }

    impl ComponentSource for FakeSource {
        fn fetch(&self, model_id: &str, filename: &str) -> Result<PathBuf> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let content = self
                .files
                .get(&(model_id.to_string(), filename.to_string()))
                .ok_or_else(|| PipelineError::execution(format!("404 {}/{}", model_id, filename)))?;
            let path = self.staging.path().join(model_id.replace('/', "--")).join(filename);
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(&path, content)?;
            Ok(path)
        }
    }

    const MODEL: &str = "acme/tiny";

    fn complete_source() -> FakeSource {
        FakeSource::new()
            .with_file(MODEL, "config.json", "{}")
            .with_file(MODEL, "model.safetensors", "weights")
            .with_file(MODEL, "tokenizer.json", "{}")
    }

    const WITH_IMAGE: ComponentManifest = ComponentManifest {
        required: &[ComponentRole::Model, ComponentRole::Tokenizer],
        optional: &[ComponentRole::ImageProcessor],
    };

    #[test]
    fn test_first_load_downloads_and_persists() {
        let root = TempDir::new().unwrap();
        let loader = ModelCacheLoader::new(root.path().to_path_buf(), Arc::new(complete_source()));

        let bundle = loader.load(MODEL, "text-classification", &ComponentManifest::TEXT).unwrap();
        assert_eq!(bundle.roles(), vec![ComponentRole::Model, ComponentRole::Tokenizer]);

        let model_dir = root.path().join("text-classification").join("model");
        assert!(model_dir.join("config.json").is_file());
        assert!(model_dir.join("model.safetensors").is_file());
        assert!(root.path().join("text-classification/tokenizer/tokenizer.json").is_file());
        assert_eq!(
            bundle.component(ComponentRole::Model).unwrap().file("config.json"),
            Some(model_dir.join("config.json").as_path())
        );
    }

    #[test]
    fn test_second_load_is_local_and_identical() {
        let root = TempDir::new().unwrap();
        let source = Arc::new(complete_source());
        let loader = ModelCacheLoader::new(root.path().to_path_buf(), source.clone());

        let first = loader.load(MODEL, "fill-mask", &WITH_IMAGE).unwrap();
        let fetches_after_first = source.fetches.load(Ordering::SeqCst);
        assert!(fetches_after_first > 0);

        let second = loader.load(MODEL, "fill-mask", &WITH_IMAGE).unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), fetches_after_first);
        assert_eq!(first.roles(), second.roles());
        assert_eq!(first.components, second.components);
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let root = TempDir::new().unwrap();
        let source = FakeSource::new().with_file(MODEL, "tokenizer.json", "{}");
        let loader = ModelCacheLoader::new(root.path().to_path_buf(), Arc::new(source));

        let err = loader.load(MODEL, "fill-mask", &ComponentManifest::TEXT).unwrap_err();
        assert!(matches!(err, PipelineError::MissingComponent { role: ComponentRole::Model, .. }));
    }

    #[test]
    fn test_model_is_required_even_if_listed_optional() {
        let root = TempDir::new().unwrap();
        let loader = ModelCacheLoader::new(root.path().to_path_buf(), Arc::new(FakeSource::new()));
        let manifest = ComponentManifest { required: &[], optional: &[ComponentRole::Model] };

        assert!(loader.load(MODEL, "feature-extraction", &manifest).is_err());
    }

    #[test]
    fn test_optional_component_is_omitted() {
        let root = TempDir::new().unwrap();
        let loader = ModelCacheLoader::new(root.path().to_path_buf(), Arc::new(complete_source()));

        let bundle = loader.load(MODEL, "fill-mask", &WITH_IMAGE).unwrap();
        assert!(bundle.component(ComponentRole::ImageProcessor).is_none());
        assert!(!root.path().join("fill-mask/image_processor").exists());
    }

    #[test]
    fn test_tokenizer_falls_back_to_vocab() {
        let root = TempDir::new().unwrap();
        let source = FakeSource::new()
            .with_file(MODEL, "config.json", "{}")
            .with_file(MODEL, "model.safetensors", "weights")
            .with_file(MODEL, "vocab.txt", "[PAD]\n[UNK]\n")
            .with_file(MODEL, "tokenizer_config.json", "{\"do_lower_case\": true}");
        let loader = ModelCacheLoader::new(root.path().to_path_buf(), Arc::new(source));

        let bundle = loader.load(MODEL, "zero-shot-classification", &ComponentManifest::TEXT).unwrap();
        let tokenizer = bundle.component(ComponentRole::Tokenizer).unwrap();
        assert!(tokenizer.file("tokenizer.json").is_none());
        assert!(tokenizer.file("vocab.txt").is_some());
        assert!(tokenizer.file("tokenizer_config.json").is_some());
    }

    #[test]
    fn test_failed_download_leaves_nothing_and_is_retried() {
        let root = TempDir::new().unwrap();
        let without_tokenizer = FakeSource::new()
            .with_file(MODEL, "config.json", "{}")
            .with_file(MODEL, "model.safetensors", "weights");
        let first = ModelCacheLoader::new(root.path().to_path_buf(), Arc::new(without_tokenizer));

        let err = first.load(MODEL, "text-classification", &ComponentManifest::TEXT).unwrap_err();
        assert!(matches!(err, PipelineError::MissingComponent { role: ComponentRole::Tokenizer, .. }));
        assert!(!root.path().join("text-classification").exists());
        assert!(!root.path().join(".text-classification.partial").exists());

        let second = ModelCacheLoader::new(root.path().to_path_buf(), Arc::new(complete_source()));
        let bundle = second.load(MODEL, "text-classification", &ComponentManifest::TEXT).unwrap();
        assert_eq!(bundle.roles(), vec![ComponentRole::Model, ComponentRole::Tokenizer]);
        assert!(root.path().join("text-classification/tokenizer/tokenizer.json").is_file());
    }

    #[test]
    fn test_missing_component_reason_names_required_files() {
        let root = TempDir::new().unwrap();
        let source = FakeSource::new()
            .with_file(MODEL, "config.json", "{}")
            .with_file(MODEL, "model.safetensors", "weights")
            .with_file(MODEL, "tokenizer_config.json", "{}");
        let loader = ModelCacheLoader::new(root.path().to_path_buf(), Arc::new(source));

        match loader.load(MODEL, "fill-mask", &ComponentManifest::TEXT).unwrap_err() {
            PipelineError::MissingComponent { role, reason, .. } => {
                assert_eq!(role, ComponentRole::Tokenizer);
                assert!(reason.starts_with("could not fetch tokenizer.json or vocab.txt"), "{}", reason);
                assert!(reason.contains("404 acme/tiny/tokenizer.json"), "{}", reason);
                assert!(!reason.contains("special_tokens_map.json"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_stale_staging_dir_is_replaced() {
        let root = TempDir::new().unwrap();
        let stale = root.path().join(".summarization.partial/model");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("leftover.bin"), "x").unwrap();
        let loader = ModelCacheLoader::new(root.path().to_path_buf(), Arc::new(complete_source()));

        loader.load(MODEL, "summarization", &ComponentManifest::TEXT).unwrap();
        assert!(!root.path().join("summarization/model/leftover.bin").exists());
        assert!(!root.path().join(".summarization.partial").exists());
    }

    #[test]
    fn test_existing_task_dir_without_model_fails_without_network() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("question-answering")).unwrap();
        let source = Arc::new(complete_source());
        let loader = ModelCacheLoader::new(root.path().to_path_buf(), source.clone());

        let err = loader.load(MODEL, "question-answering", &ComponentManifest::TEXT).unwrap_err();
        assert!(matches!(err, PipelineError::MissingComponent { .. }));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }
}
