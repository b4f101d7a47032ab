//! Request dispatch: task lookup, argument binding, component loading and
//! pipeline invocation, in that order.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::ModelCacheLoader;
use crate::error::{PipelineError, Result};
use crate::pipelines::PipelineFactory;
use crate::tasks::{bind_inputs_as, CallConvention, TaskDescriptor, TaskInput, TaskRegistry};

/// Runs registered tasks against their cached default models.
///
/// Cheap to clone; blocking work (downloads, inference) happens in
/// [`Dispatcher::run`], which callers on an async runtime should move onto a
/// blocking thread.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    loader: ModelCacheLoader,
    factory: Arc<dyn PipelineFactory>,
}

impl Dispatcher {
    pub fn new(registry: Arc<TaskRegistry>, loader: ModelCacheLoader, factory: Arc<dyn PipelineFactory>) -> Self {
        Self { registry, loader, factory }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &ModelCacheLoader {
        &self.loader
    }

    /// Looks up `task_name` and binds `inputs` using `convention`, without
    /// loading anything.
    pub fn bind(
        &self,
        task_name: &str,
        inputs: Map<String, Value>,
        convention: CallConvention,
    ) -> Result<(&TaskDescriptor, TaskInput)> {
        let task = self
            .registry
            .get(task_name)
            .ok_or_else(|| PipelineError::UnknownTask(task_name.to_string()))?;
        let input = bind_inputs_as(task, inputs, convention)?;
        Ok((task, input))
    }

    /// Runs `task_name` on `inputs` with the task's own calling convention.
    pub fn run(&self, task_name: &str, inputs: Map<String, Value>) -> Result<Value> {
        let convention = self
            .registry
            .get(task_name)
            .map(|t| t.convention)
            .ok_or_else(|| PipelineError::UnknownTask(task_name.to_string()))?;
        self.run_as(task_name, inputs, convention)
    }

    /// Runs `task_name`, binding `inputs` with an explicit convention.
    pub fn run_as(&self, task_name: &str, inputs: Map<String, Value>, convention: CallConvention) -> Result<Value> {
        let (task, input) = self.bind(task_name, inputs, convention)?;
        debug!("Bound {} arguments: {:?}", task_name, input);

        let bundle = self.loader.load(&task.default_model_id, task_name, &task.manifest)?;
        let mut pipeline = self.factory.build(task, &bundle)?;
        info!("Running {} with {}", task_name, task.default_model_id);
        pipeline.run(input)
    }
}
