use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use std::collections::BTreeMap;
use tracing::{error, info, info_span};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::tasks::TaskDescriptor;
use super::types::{ApiError, PipelineRequest, PipelineResponse, WelcomeResponse};

/// Returns the welcome message
pub async fn root() -> Json<WelcomeResponse> {
    info!("Root endpoint called");
    Json(WelcomeResponse {
        message: "Welcome to the Hugging Face Pipeline Toolkit!".to_string(),
    })
}

/// Returns every registered task with its default model and parameters.
pub async fn list_tasks(State(dispatcher): State<Dispatcher>) -> Json<BTreeMap<String, TaskDescriptor>> {
    info!("List tasks endpoint called");
    Json(dispatcher.registry().list_tasks().clone())
}

/// Runs a task on the caller's inputs.
///
/// Loading and inference are blocking, so the dispatch happens on the
/// blocking thread pool inside a span tagged with a request id.
pub async fn run_pipeline(
    State(dispatcher): State<Dispatcher>,
    body: Result<Json<PipelineRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;

    let request_id = Uuid::new_v4();
    let span = info_span!("run_pipeline", uuid = %request_id, task = %request.task_name);
    let task_name = request.task_name.clone();

    let result = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        info!("Run pipeline endpoint called");
        dispatcher.run(&request.task_name, request.inputs)
    })
    .await
    .map_err(|e| ApiError::internal(format!("pipeline task panicked: {}", e)))?;

    match result {
        Ok(result) => {
            info!(uuid = %request_id, "Pipeline {} finished", task_name);
            Ok(Json(PipelineResponse { task: task_name, result }))
        }
        Err(e) => {
            error!(uuid = %request_id, "Pipeline {} failed: {}", task_name, e);
            Err(e.into())
        }
    }
}
