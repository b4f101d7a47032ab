//! # hfpipe
//!
//! HTTP toolkit that lists the inference tasks it can run, with their
//! parameters and default models, and runs them on JSON inputs.
//!
//! - [`tasks`]: the task catalog, parameter resolution and argument binding
//! - [`cache`]: the per-task local model cache
//! - [`pipelines`]: candle implementations of the tasks
//! - [`dispatch`]: request dispatch over the three above
//! - [`server`] and [`client`]: the HTTP API and its command line client
//! - [`discover`]: the offline override discovery tool

pub mod cache;
pub mod client;
pub mod config;
pub mod discover;
pub mod dispatch;
pub mod error;
pub mod pipelines;
pub mod server;
pub mod tasks;

pub use error::{PipelineError, Result};
