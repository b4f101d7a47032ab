//! Command line client talking to a running server.

mod display;

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::server::types::{ApiResponse, PipelineResponse, TaskSummary};
pub use display::{display_result, display_tasks_table};

/// Thin wrapper over the HTTP API.
pub struct PipelineClient {
    client: Client,
    server_url: String,
}

impl PipelineClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self { client: Client::new(), server_url: server_url.into() }
    }

    /// Fetches the task listing.
    pub async fn tasks(&self) -> Result<BTreeMap<String, TaskSummary>> {
        let response = self
            .client
            .get(format!("{}/tasks", self.server_url))
            .send()
            .await
            .with_context(|| format!("Error requesting tasks from {}", self.server_url))?;
        Ok(response.error_for_status()?.json().await?)
    }

    /// Runs `task_name` remotely and returns the result value.
    pub async fn run(&self, task_name: &str, inputs: Map<String, Value>) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/run-pipeline/", self.server_url))
            .json(&json!({ "task_name": task_name, "inputs": inputs }))
            .send()
            .await
            .with_context(|| format!("Error sending run request to {}", self.server_url))?;

        let status = response.status();
        if status == StatusCode::OK {
            let body: PipelineResponse = response.json().await?;
            return Ok(body.result);
        }

        let body: ApiResponse<Value> = response
            .json()
            .await
            .with_context(|| format!("Server returned {} with an unreadable body", status))?;
        bail!("{} ({})", body.message.unwrap_or_default(), status)
    }
}

/// `hfpipe tasks`
pub async fn print_tasks(server_url: &str) -> Result<()> {
    let tasks = PipelineClient::new(server_url).tasks().await?;
    display_tasks_table(&tasks);
    Ok(())
}

/// `hfpipe run`
pub async fn print_run(server_url: &str, task_name: &str, inputs: &str) -> Result<()> {
    let inputs: Map<String, Value> =
        serde_json::from_str(inputs).context("--inputs must be a JSON object")?;
    let result = PipelineClient::new(server_url).run(task_name, inputs).await?;
    display_result(task_name, &result);
    Ok(())
}
