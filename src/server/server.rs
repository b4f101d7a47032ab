use axum::{
    routing::{get, post},
    Router,
};
use std::error::Error;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::dispatch::Dispatcher;
use super::routes;

/// API server exposing the task registry and the dispatcher over HTTP
pub struct ApiServer {
    dispatcher: Dispatcher,
    host: String,
    port: u16,
}

impl ApiServer {
    pub fn new(dispatcher: Dispatcher, host: String, port: u16) -> Self {
        info!(
            "Creating new API server on {}:{} with {} tasks",
            host,
            port,
            dispatcher.registry().len()
        );
        Self { dispatcher, host, port }
    }

    /// The application router, without a listener attached.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(routes::root))
            .route("/tasks", get(routes::list_tasks))
            .route("/run-pipeline", post(routes::run_pipeline))
            .route("/run-pipeline/", post(routes::run_pipeline))
            .with_state(self.dispatcher.clone())
    }

    /// Binds the configured address and serves until the process stops.
    pub async fn start(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        info!("Starting server on {}:{}", self.host, self.port);
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr: SocketAddr = listener.local_addr()?;
        info!("Server started successfully on {}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}
