//! Error taxonomy shared by the registry, the cache loader and the dispatcher.

use thiserror::Error;

use crate::tasks::ComponentRole;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The requested task is not in the registry.
    #[error("Task '{0}' not found.")]
    UnknownTask(String),

    /// A task's parameter signature could not be resolved at startup.
    #[error("could not resolve parameters for task '{task}': {reason}")]
    Introspection { task: String, reason: String },

    /// A component the task cannot run without is unavailable.
    #[error("required component '{role}' of model '{model_id}' could not be loaded: {reason}")]
    MissingComponent {
        role: ComponentRole,
        model_id: String,
        reason: String,
    },

    /// Anything raised while binding, constructing or invoking a pipeline.
    #[error("{0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn execution(msg: impl Into<String>) -> Self {
        PipelineError::Execution(msg.into())
    }
}

impl From<candle_core::Error> for PipelineError {
    fn from(err: candle_core::Error) -> Self {
        PipelineError::Execution(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Execution(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Execution(err.to_string())
    }
}
