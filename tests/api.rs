use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

use hfpipe::cache::{CachedModelBundle, ComponentSource, ModelCacheLoader};
use hfpipe::dispatch::Dispatcher;
use hfpipe::pipelines::{Pipeline, PipelineFactory};
use hfpipe::server::ApiServer;
use hfpipe::tasks::{TaskDescriptor, TaskInput, TaskRegistry};
use hfpipe::{PipelineError, Result};

/// Serves every requested artifact with placeholder content.
struct StubSource {
    staging: TempDir,
    fetches: AtomicUsize,
}

impl ComponentSource for StubSource {
    fn fetch(&self, model_id: &str, filename: &str) -> Result<PathBuf> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !matches!(filename, "config.json" | "model.safetensors" | "tokenizer.json") {
            return Err(PipelineError::execution(format!("404 {}/{}", model_id, filename)));
        }
        let dir = self.staging.path().join(model_id.replace('/', "--"));
        fs::create_dir_all(&dir)?;
        let path = dir.join(filename);
        fs::write(&path, "{}")?;
        Ok(path)
    }
}

/// Canned results shaped like the real pipelines; feature extraction fails.
struct CannedPipeline;

impl Pipeline for CannedPipeline {
    fn run(&mut self, input: TaskInput) -> Result<Value> {
        match input {
            TaskInput::TextClassification(_) => Ok(json!([{ "label": "POSITIVE", "score": 0.99 }])),
            TaskInput::ZeroShotClassification(args) => {
                let n = args.candidate_labels.len();
                Ok(json!({
                    "sequence": args.sequences,
                    "labels": args.candidate_labels,
                    "scores": vec![1.0 / n as f32; n],
                }))
            }
            TaskInput::QuestionAnswering(args) => {
                let end = args.context.find(' ').unwrap_or(args.context.len());
                Ok(json!({ "score": 0.5, "start": 0, "end": end, "answer": &args.context[..end] }))
            }
            TaskInput::FeatureExtraction(_) => Err(PipelineError::execution("model exploded")),
            other => Ok(json!({ "kind": other.kind().to_string() })),
        }
    }
}

struct CannedFactory;

impl PipelineFactory for CannedFactory {
    fn build(&self, _task: &TaskDescriptor, _bundle: &CachedModelBundle) -> Result<Box<dyn Pipeline>> {
        Ok(Box::new(CannedPipeline))
    }
}

struct TestServer {
    base_url: String,
    source: Arc<StubSource>,
    _cache: TempDir,
}

async fn start_server() -> TestServer {
    let cache = TempDir::new().unwrap();
    let source = Arc::new(StubSource { staging: TempDir::new().unwrap(), fetches: AtomicUsize::new(0) });
    let dispatcher = Dispatcher::new(
        Arc::new(TaskRegistry::builtin()),
        ModelCacheLoader::new(cache.path().to_path_buf(), source.clone()),
        Arc::new(CannedFactory),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ApiServer::new(dispatcher, addr.ip().to_string(), addr.port());
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    TestServer { base_url: format!("http://{}", addr), source, _cache: cache }
}

async fn run(server: &TestServer, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{}/run-pipeline/", server.base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_root_welcomes() {
    let server = start_server().await;
    let body: Value = reqwest::get(&server.base_url).await.unwrap().json().await.unwrap();
    assert_eq!(body["message"], "Welcome to the Hugging Face Pipeline Toolkit!");
}

#[tokio::test]
async fn test_tasks_lists_corrected_parameters() {
    let server = start_server().await;
    let body: Value = reqwest::get(format!("{}/tasks", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let zero_shot = &body["zero-shot-classification"];
    assert_eq!(zero_shot["default_model"], "typeform/distilbert-base-uncased-mnli");
    let params = zero_shot["parameters"].as_array().unwrap();
    assert_eq!(params[0]["name"], "sequences");
    assert_eq!(params[0]["default_value"], "REQUIRED");
    assert_eq!(params[2]["name"], "hypothesis_template");
    assert_eq!(params[2]["default_value"], "This example is {}.");

    assert_eq!(body["token-classification"]["parameters"][0]["name"], "inputs");
    assert!(body.get("task_name").is_none());
}

#[tokio::test]
async fn test_unknown_task_is_404_without_download() {
    let server = start_server().await;
    let (status, body) = run(&server, json!({"task_name": "not-a-task", "inputs": {}})).await;

    assert_eq!(status, 404);
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Task 'not-a-task' not found.");
    assert_eq!(server.source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_text_classification_runs() {
    let server = start_server().await;
    let (status, body) = run(
        &server,
        json!({"task_name": "text-classification", "inputs": {"inputs": "I love this!"}}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["task"], "text-classification");
    assert_eq!(body["result"][0]["label"], "POSITIVE");
}

#[tokio::test]
async fn test_zero_shot_runs_with_corrected_name() {
    let server = start_server().await;
    let (status, body) = run(
        &server,
        json!({
            "task_name": "zero-shot-classification",
            "inputs": {"sequences": "The budget passed.", "candidate_labels": ["politics", "sports"]}
        }),
    )
    .await;

    assert_eq!(status, 200);
    let result = &body["result"];
    assert_eq!(result["sequence"], "The budget passed.");
    assert_eq!(
        result["labels"].as_array().unwrap().len(),
        result["scores"].as_array().unwrap().len()
    );
}

#[tokio::test]
async fn test_question_answering_runs() {
    let server = start_server().await;
    let (status, body) = run(
        &server,
        json!({
            "task_name": "question-answering",
            "inputs": {"question": "Who?", "context": "Alice did it."}
        }),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["task"], "question-answering");
    assert_eq!(body["result"]["answer"], "Alice");
}

#[tokio::test]
async fn test_binding_failure_is_500() {
    let server = start_server().await;
    let (status, body) = run(
        &server,
        json!({"task_name": "zero-shot-classification", "inputs": {"inputs": "x", "candidate_labels": ["a"]}}),
    )
    .await;

    assert_eq!(status, 500);
    assert_eq!(
        body["message"],
        "zero-shot-classification() missing 1 required positional argument: 'sequences'"
    );
}

#[tokio::test]
async fn test_pipeline_failure_is_500_with_message() {
    let server = start_server().await;
    let (status, body) = run(
        &server,
        json!({"task_name": "feature-extraction", "inputs": {"inputs": "hello"}}),
    )
    .await;

    assert_eq!(status, 500);
    assert_eq!(body["status"], "error");
    assert!(body["data"].is_null());
    assert_eq!(body["message"], "model exploded");
}

#[tokio::test]
async fn test_route_without_trailing_slash() {
    let server = start_server().await;
    let response = reqwest::Client::new()
        .post(format!("{}/run-pipeline", server.base_url))
        .json(&json!({"task_name": "fill-mask", "inputs": {"inputs": "a [MASK]"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
}
