use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::schema::{resolve_parameters, OverrideTable, ParameterSpec};
use super::{CallConvention, ComponentManifest, TaskDefinition, TaskKind, SUPPORTED_TASKS};

/// Everything the dispatcher needs to know about one registered task.
///
/// Only `default_model` and `parameters` are part of the public `/tasks` listing.
#[derive(Debug, Clone, Serialize)]
pub struct TaskDescriptor {
    #[serde(skip)]
    pub task_name: String,
    #[serde(rename = "default_model")]
    pub default_model_id: String,
    pub parameters: Vec<ParameterSpec>,
    #[serde(skip)]
    pub kind: TaskKind,
    #[serde(skip)]
    pub convention: CallConvention,
    #[serde(skip)]
    pub manifest: ComponentManifest,
}

/// Immutable table of runnable tasks, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskDescriptor>,
}

impl TaskRegistry {
    /// Builds the registry from the shipped catalog and override table.
    pub fn builtin() -> Self {
        Self::from_catalog(SUPPORTED_TASKS, OverrideTable::builtin())
    }

    /// Builds a registry from a catalog.
    ///
    /// Entries without a default model are skipped. An entry whose parameters
    /// cannot be resolved is logged and left out; the others are unaffected.
    pub fn from_catalog(catalog: &[TaskDefinition], overrides: &OverrideTable) -> Self {
        let mut tasks = BTreeMap::new();

        for definition in catalog {
            let Some(model_id) = definition.default_model else {
                continue;
            };

            match resolve_parameters(definition, overrides) {
                Ok(parameters) => {
                    tasks.insert(
                        definition.name.to_string(),
                        TaskDescriptor {
                            task_name: definition.name.to_string(),
                            default_model_id: model_id.to_string(),
                            parameters,
                            kind: definition.kind,
                            convention: definition.convention,
                            manifest: definition.manifest,
                        },
                    );
                }
                Err(e) => {
                    warn!("--> Could not inspect task '{}'. Error: {}", definition.name, e);
                }
            }
        }

        info!("Task registry initialised with {} tasks", tasks.len());
        Self { tasks }
    }

    pub fn list_tasks(&self) -> &BTreeMap<String, TaskDescriptor> {
        &self.tasks
    }

    pub fn get(&self, task_name: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(task_name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
