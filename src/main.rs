use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use hfpipe::cache::{HubSource, ModelCacheLoader};
use hfpipe::config::Settings;
use hfpipe::dispatch::Dispatcher;
use hfpipe::pipelines::{BackendContext, CandleFactory};
use hfpipe::server::ApiServer;
use hfpipe::tasks::{TaskRegistry, SUPPORTED_TASKS};
use hfpipe::{client, discover};

#[derive(Parser)]
#[command(name = "hfpipe", version, about = "Run inference pipelines over HTTP")]
struct Cli {
    /// Directory holding default.toml and an optional local.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,
    /// List the tasks of a running server
    Tasks,
    /// Run a task on a running server
    Run {
        /// Task name, e.g. text-classification
        #[arg(long)]
        task: String,
        /// Inputs as a JSON object
        #[arg(long)]
        inputs: String,
    },
    /// Re-derive the parameter override table
    Discover {
        /// Only check argument binding; nothing is downloaded or run
        #[arg(long)]
        bind_only: bool,
    },
}

/// Sets up tracing from the logging settings.
///
/// `RUST_LOG` wins over the configured level. With `logging.file` set, logs go
/// to a daily rolling file in that directory; the returned guard must be kept
/// alive for the writer to flush.
fn init_logging(settings: &Settings) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match &settings.logging.file {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "hfpipe");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_line_number(true)
                .with_file(true)
                .with_thread_ids(true)
                .with_target(false)
                .with_env_filter(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_env_filter(filter)
                .init();
            None
        }
    }
}

/// Builds the registry, cache loader and candle backend from the settings.
fn build_dispatcher(settings: &Settings) -> Result<Dispatcher> {
    let registry = Arc::new(TaskRegistry::builtin());
    let source = HubSource::new(settings).context("Failed to set up the model hub client")?;
    let cache_dir = std::fs::canonicalize(&settings.cache.directory)?;
    info!("Model cache directory: {}", cache_dir.display());

    let loader = ModelCacheLoader::new(cache_dir, Arc::new(source));
    let factory = CandleFactory::new(BackendContext::from_config(&settings.inference));
    Ok(Dispatcher::new(registry, loader, Arc::new(factory)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(dir) => Settings::load(dir),
        None => Settings::new(),
    }
    .context("Failed to load configuration")?;

    let _guard = init_logging(&settings);
    info!("hfpipe starting up...");

    match cli.command {
        Command::Serve => {
            let dispatcher = build_dispatcher(&settings)?;
            let server = ApiServer::new(dispatcher, settings.server.host.clone(), settings.server.port);
            server.start().await.map_err(|e| anyhow::anyhow!("Server error: {}", e))?;
        }
        Command::Tasks => client::print_tasks(&settings.server_url()).await?,
        Command::Run { task, inputs } => client::print_run(&settings.server_url(), &task, &inputs).await?,
        Command::Discover { bind_only } => {
            let dispatcher = build_dispatcher(&settings)?;
            let report = tokio::task::spawn_blocking(move || {
                discover::discover(&dispatcher, SUPPORTED_TASKS, bind_only)
            })
            .await?;
            discover::print_report(&report);
        }
    }

    Ok(())
}
