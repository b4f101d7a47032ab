use candle_core::{DType, Device, IndexOp, Tensor};
use candle_transformers::models::qwen2;
use serde_json::{json, Value};
use tokenizers::Tokenizer;
use tracing::debug;

use crate::cache::CachedModelBundle;
use crate::error::{PipelineError, Result};
use crate::tasks::{TaskInput, TaskKind};
use super::encoder::open_weights;
use super::tokenizer::{self, tokenizer_error};
use super::{wrong_input, BackendContext, GenerationSettings, Pipeline};

const END_OF_TEXT: &str = "<|endoftext|>";

/// Logits of the last position, whatever the rank the model returns.
fn last_logits(logits: &Tensor) -> Result<Tensor> {
    let last = match logits.rank() {
        1 => logits.clone(),
        2 => logits.i(logits.dim(0)?.saturating_sub(1))?,
        3 => logits.i((0, logits.dim(1)?.saturating_sub(1)))?,
        rank => {
            return Err(PipelineError::execution(format!(
                "unexpected logits rank {} with dims {:?}",
                rank,
                logits.dims()
            )))
        }
    };
    Ok(last.to_dtype(DType::F32)?)
}

/// Token ids of a prompt that fits the context window.
///
/// The prompt is echoed back in front of the continuation, so one the
/// tokenizer would have to cut is rejected instead of truncated.
fn prompt_ids(tokenizer: &Tokenizer, prompt: &str, context_size: usize) -> Result<Vec<u32>> {
    let encoding = tokenizer.encode(prompt, false).map_err(tokenizer_error)?;
    if !encoding.get_overflowing().is_empty() {
        return Err(PipelineError::execution(format!(
            "prompt is longer than the context size of {} tokens",
            context_size
        )));
    }
    if encoding.get_ids().is_empty() {
        return Err(PipelineError::execution("prompt produced no tokens"));
    }
    Ok(encoding.get_ids().to_vec())
}

/// Causal language model continuation with a Qwen2 checkpoint.
pub(crate) struct TextGenerationPipeline {
    tokenizer: Tokenizer,
    model: qwen2::ModelForCausalLM,
    device: Device,
    settings: GenerationSettings,
    context_size: usize,
    eos: Option<u32>,
}

impl TextGenerationPipeline {
    pub fn load(bundle: &CachedModelBundle, ctx: &BackendContext) -> Result<Self> {
        let (vb, config) = open_weights(bundle, &ctx.device)?;
        let cfg: qwen2::Config = serde_json::from_value(config.clone())?;
        let model = qwen2::ModelForCausalLM::new(&cfg, vb)?;
        let tokenizer = tokenizer::load(bundle, ctx.max_input_tokens)?;
        let eos = tokenizer.token_to_id(END_OF_TEXT).or_else(|| {
            config.get("eos_token_id").and_then(Value::as_u64).map(|v| v as u32)
        });
        Ok(Self {
            tokenizer,
            model,
            device: ctx.device.clone(),
            settings: ctx.generation.clone(),
            context_size: ctx.max_input_tokens,
            eos,
        })
    }

    fn generate(&mut self, prompt: &str, max_new_tokens: usize) -> Result<String> {
        let prompt_ids = prompt_ids(&self.tokenizer, prompt, self.context_size)?;

        self.model.clear_kv_cache();
        let mut sampler = self.settings.sampler();
        let mut input = Tensor::new(prompt_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let mut offset = 0;
        let mut generated = Vec::new();

        for _ in 0..self.settings.budget(max_new_tokens) {
            let logits = self.model.forward(&input, offset)?;
            offset += input.dim(1)?;
            let next = sampler.sample(&last_logits(&logits)?)?;
            if Some(next) == self.eos {
                break;
            }
            generated.push(next);
            input = Tensor::new(&[next], &self.device)?.unsqueeze(0)?;
        }
        debug!("Generated {} tokens", generated.len());

        self.tokenizer.decode(&generated, true).map_err(tokenizer_error)
    }
}

impl Pipeline for TextGenerationPipeline {
    fn run(&mut self, input: TaskInput) -> Result<Value> {
        let args = match input {
            TaskInput::TextGeneration(args) => args,
            other => return Err(wrong_input(TaskKind::TextGeneration, &other)),
        };
        let continuation = self.generate(&args.text_inputs, args.max_new_tokens)?;
        Ok(json!([{ "generated_text": format!("{}{}", args.text_inputs, continuation) }]))
    }
}
