use serde::{Deserialize, Serialize};
use std::fmt;

/// One constituent of a pipeline's input-processing stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentRole {
    Model,
    Tokenizer,
    ImageProcessor,
    FeatureExtractor,
}

/// Files making up one component on the hub and on disk.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactSet {
    /// Every one of these must be present.
    pub all_of: &'static [&'static str],
    /// At least one of these must be present (ignored when empty).
    pub any_of: &'static [&'static str],
    /// Fetched when available, never required.
    pub optional: &'static [&'static str],
}

impl ArtifactSet {
    /// Iterates every file name the component may consist of.
    pub fn files(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.all_of
            .iter()
            .chain(self.any_of.iter())
            .chain(self.optional.iter())
            .copied()
    }

    /// Checks whether the given set of present files forms a complete component.
    pub fn is_satisfied_by<F: Fn(&str) -> bool>(&self, present: F) -> bool {
        self.all_of.iter().all(|f| present(f))
            && (self.any_of.is_empty() || self.any_of.iter().any(|f| present(f)))
    }

    /// Names the requirements `present` leaves open: each absent `all_of`
    /// file, and the `any_of` group as `a or b` when none of it is present.
    pub fn unsatisfied<F: Fn(&str) -> bool>(&self, present: F) -> Vec<String> {
        let mut open: Vec<String> = self
            .all_of
            .iter()
            .filter(|f| !present(f))
            .map(|f| f.to_string())
            .collect();
        if !self.any_of.is_empty() && !self.any_of.iter().any(|f| present(f)) {
            open.push(self.any_of.join(" or "));
        }
        open
    }
}

impl ComponentRole {
    pub const ALL: [ComponentRole; 4] = [
        ComponentRole::Model,
        ComponentRole::Tokenizer,
        ComponentRole::ImageProcessor,
        ComponentRole::FeatureExtractor,
    ];

    /// Name of the role, also used as its sub-directory in the task cache.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentRole::Model => "model",
            ComponentRole::Tokenizer => "tokenizer",
            ComponentRole::ImageProcessor => "image_processor",
            ComponentRole::FeatureExtractor => "feature_extractor",
        }
    }

    pub fn artifacts(&self) -> ArtifactSet {
        match self {
            ComponentRole::Model => ArtifactSet {
                all_of: &["config.json", "model.safetensors"],
                any_of: &[],
                optional: &["generation_config.json"],
            },
            ComponentRole::Tokenizer => ArtifactSet {
                all_of: &[],
                any_of: &["tokenizer.json", "vocab.txt"],
                optional: &["tokenizer_config.json", "special_tokens_map.json"],
            },
            ComponentRole::ImageProcessor | ComponentRole::FeatureExtractor => ArtifactSet {
                all_of: &["preprocessor_config.json"],
                any_of: &[],
                optional: &[],
            },
        }
    }
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which component roles a task needs, and which it can live without.
#[derive(Debug, Clone, Copy)]
pub struct ComponentManifest {
    pub required: &'static [ComponentRole],
    pub optional: &'static [ComponentRole],
}

impl ComponentManifest {
    pub const TEXT: ComponentManifest = ComponentManifest {
        required: &[ComponentRole::Model, ComponentRole::Tokenizer],
        optional: &[],
    };

    /// All roles of the manifest, required first.
    pub fn roles(&self) -> impl Iterator<Item = (ComponentRole, bool)> + '_ {
        self.required
            .iter()
            .map(|r| (*r, true))
            .chain(self.optional.iter().map(|r| (*r, false)))
    }
}
