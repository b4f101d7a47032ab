use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

/// Request body of `POST /run-pipeline/`
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineRequest {
    pub task_name: String,
    pub inputs: Map<String, Value>,
}

/// Successful pipeline run
#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub task: String,
    pub result: Value,
}

/// One entry of the `GET /tasks` listing, as seen by clients
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TaskSummary {
    pub default_model: String,
    pub parameters: Vec<ParameterSummary>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParameterSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub type_hint: String,
    /// The string `"REQUIRED"` for parameters without a default
    pub default_value: Value,
}

impl ParameterSummary {
    pub fn is_required(&self) -> bool {
        self.default_value.as_str() == Some("REQUIRED")
    }
}

/// Body of `GET /`
#[derive(Debug, Serialize, Deserialize)]
pub struct WelcomeResponse {
    pub message: String,
}

/// Generic API response wrapper, used for error bodies
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: Option<T>,
    pub message: Option<String>,
}

/// An error ready to be sent back to the client.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            status: "error".to_string(),
            data: None,
            message: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match &err {
            PipelineError::UnknownTask(_) => ApiError::not_found(err.to_string()),
            _ => ApiError::internal(err.to_string()),
        }
    }
}
