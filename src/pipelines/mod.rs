//! # Pipelines
//!
//! Native implementations of the supported tasks, built from a
//! [`CachedModelBundle`] and driven by a typed [`TaskInput`].
//!
//! ## Key Components
//!
//! - `Pipeline`: a constructed, callable task implementation
//! - `PipelineFactory`: the seam between the dispatcher and the inference backend
//! - `CandleFactory`: the shipped backend, running safetensors checkpoints with candle
//!
//! Encoder-only tasks share [`encoder::EncoderModel`] (DistilBERT and BERT
//! checkpoints with task heads loaded from the same weights). Summarization and
//! text2text run T5; text generation runs Qwen2.

mod encoder;
mod feature_extraction;
mod fill_mask;
mod question_answering;
mod seq2seq;
mod text_classification;
mod text_generation;
#[cfg(test)]
mod tiny_checkpoints;
mod token_classification;
mod tokenizer;
mod zero_shot;

use candle_core::{Device, Tensor, D};
use candle_transformers::generation::LogitsProcessor;
use serde_json::Value;
use tracing::info;

use crate::cache::CachedModelBundle;
use crate::config::InferenceConfig;
use crate::error::{PipelineError, Result};
use crate::tasks::{TaskDescriptor, TaskInput, TaskKind};

/// A constructed pipeline, ready to be called.
pub trait Pipeline: Send {
    /// Runs the pipeline and returns a plain JSON result.
    fn run(&mut self, input: TaskInput) -> Result<Value>;
}

/// Builds pipelines from cached components.
pub trait PipelineFactory: Send + Sync {
    fn build(&self, task: &TaskDescriptor, bundle: &CachedModelBundle) -> Result<Box<dyn Pipeline>>;
}

/// Sampling settings shared by the generation pipelines.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// `None` means greedy decoding.
    pub temperature: Option<f64>,
    pub seed: u64,
    /// Upper bound on requested `max_new_tokens`.
    pub max_tokens: usize,
}

impl GenerationSettings {
    /// A fresh sampler; greedy when no temperature is set.
    fn sampler(&self) -> LogitsProcessor {
        LogitsProcessor::new(self.seed, self.temperature, None)
    }

    /// Number of tokens to generate for a request asking for `requested`.
    fn budget(&self, requested: usize) -> usize {
        requested.min(self.max_tokens)
    }
}

/// Everything a pipeline needs besides its components.
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub device: Device,
    pub max_input_tokens: usize,
    pub generation: GenerationSettings,
}

impl BackendContext {
    pub fn from_config(config: &InferenceConfig) -> Self {
        let device = select_device(config.use_gpu);
        info!("Using device: {:?}", device);
        Self {
            device,
            max_input_tokens: config.context_size,
            generation: GenerationSettings {
                temperature: if config.temperature > 0.0 { Some(config.temperature) } else { None },
                seed: config.seed.unwrap_or_else(rand::random),
                max_tokens: config.max_tokens,
            },
        }
    }
}

/// Picks the first accelerator compiled into the build, falling back to the CPU.
fn select_device(use_gpu: bool) -> Device {
    if use_gpu {
        if candle_core::utils::cuda_is_available() {
            if let Ok(device) = Device::new_cuda(0) {
                return device;
            }
        } else if candle_core::utils::metal_is_available() {
            if let Ok(device) = Device::new_metal(0) {
                return device;
            }
        }
    }
    Device::Cpu
}

/// The candle-backed inference backend.
pub struct CandleFactory {
    context: BackendContext,
}

impl CandleFactory {
    pub fn new(context: BackendContext) -> Self {
        Self { context }
    }
}

impl PipelineFactory for CandleFactory {
    fn build(&self, task: &TaskDescriptor, bundle: &CachedModelBundle) -> Result<Box<dyn Pipeline>> {
        let ctx = &self.context;
        let pipeline: Box<dyn Pipeline> = match task.kind {
            TaskKind::TextClassification => Box::new(text_classification::TextClassificationPipeline::load(bundle, ctx)?),
            TaskKind::TokenClassification => Box::new(token_classification::TokenClassificationPipeline::load(bundle, ctx)?),
            TaskKind::QuestionAnswering => Box::new(question_answering::QuestionAnsweringPipeline::load(bundle, ctx)?),
            TaskKind::ZeroShotClassification => Box::new(zero_shot::ZeroShotPipeline::load(bundle, ctx)?),
            TaskKind::FillMask => Box::new(fill_mask::FillMaskPipeline::load(bundle, ctx)?),
            TaskKind::FeatureExtraction => Box::new(feature_extraction::FeatureExtractionPipeline::load(bundle, ctx)?),
            TaskKind::Summarization | TaskKind::Text2TextGeneration => {
                Box::new(seq2seq::Seq2SeqPipeline::load(bundle, ctx)?)
            }
            TaskKind::TextGeneration => Box::new(text_generation::TextGenerationPipeline::load(bundle, ctx)?),
        };
        Ok(pipeline)
    }
}

/// Error for a pipeline handed the arguments of another task.
fn wrong_input(expected: TaskKind, input: &TaskInput) -> PipelineError {
    PipelineError::execution(format!(
        "{} pipeline cannot run {} arguments",
        expected,
        input.kind()
    ))
}

/// Softmax over the last dimension of a 1-D tensor, as plain floats.
fn softmax_vec(logits: &Tensor) -> Result<Vec<f32>> {
    let probs = candle_nn::ops::softmax(logits, D::Minus1)?;
    Ok(probs.to_vec1::<f32>()?)
}

/// Softmax of a plain float slice.
fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Indices of `scores` sorted by descending score.
fn ranked(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));
    order
}
