use candle_core::{Device, Tensor};
use candle_transformers::models::t5;
use serde_json::{json, Value};
use tokenizers::Tokenizer;
use tracing::debug;

use crate::cache::CachedModelBundle;
use crate::error::Result;
use crate::tasks::{TaskInput, TaskKind};
use super::encoder::open_weights;
use super::tokenizer::{self, tokenizer_error};
use super::{wrong_input, BackendContext, GenerationSettings, Pipeline};

const SUMMARIZE_PREFIX: &str = "summarize: ";

fn config_id(config: &Value, key: &str, default: u32) -> u32 {
    config.get(key).and_then(Value::as_u64).map(|v| v as u32).unwrap_or(default)
}

/// T5 encoder-decoder serving both summarization and text2text generation.
pub(crate) struct Seq2SeqPipeline {
    tokenizer: Tokenizer,
    model: t5::T5ForConditionalGeneration,
    device: Device,
    settings: GenerationSettings,
    decoder_start: u32,
    eos: u32,
    use_cache: bool,
}

impl Seq2SeqPipeline {
    pub fn load(bundle: &CachedModelBundle, ctx: &BackendContext) -> Result<Self> {
        let (vb, config) = open_weights(bundle, &ctx.device)?;
        let cfg: t5::Config = serde_json::from_value(config.clone())?;
        let model = t5::T5ForConditionalGeneration::load(vb, &cfg)?;
        let pad = config_id(&config, "pad_token_id", 0);
        Ok(Self {
            tokenizer: tokenizer::load(bundle, ctx.max_input_tokens)?,
            model,
            device: ctx.device.clone(),
            settings: ctx.generation.clone(),
            decoder_start: config_id(&config, "decoder_start_token_id", pad),
            eos: config_id(&config, "eos_token_id", 1),
            use_cache: config.get("use_cache").and_then(Value::as_bool).unwrap_or(true),
        })
    }

    fn generate(&mut self, text: &str, max_new_tokens: usize) -> Result<String> {
        let encoding = self.tokenizer.encode(text, true).map_err(tokenizer_error)?;
        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;

        self.model.clear_kv_cache();
        let encoder_output = self.model.encode(&input_ids)?;
        let mut sampler = self.settings.sampler();
        let mut output = vec![self.decoder_start];

        for step in 0..self.settings.budget(max_new_tokens) {
            let decoder_ids = if step == 0 || !self.use_cache {
                Tensor::new(output.as_slice(), &self.device)?.unsqueeze(0)?
            } else {
                let last = output[output.len() - 1];
                Tensor::new(&[last], &self.device)?.unsqueeze(0)?
            };
            let logits = self.model.decode(&decoder_ids, &encoder_output)?.squeeze(0)?;
            let next = sampler.sample(&logits)?;
            if next == self.eos {
                break;
            }
            output.push(next);
        }
        debug!("Generated {} tokens", output.len() - 1);

        self.tokenizer.decode(&output[1..], true).map_err(tokenizer_error)
    }
}

impl Pipeline for Seq2SeqPipeline {
    fn run(&mut self, input: TaskInput) -> Result<Value> {
        let value = match input {
            TaskInput::Summarization(args) => {
                let text = self.generate(&format!("{}{}", SUMMARIZE_PREFIX, args.inputs), args.max_new_tokens)?;
                json!([{ "summary_text": text }])
            }
            TaskInput::Text2TextGeneration(args) => {
                let text = self.generate(&args.inputs, args.max_new_tokens)?;
                json!([{ "generated_text": text }])
            }
            other => return Err(wrong_input(TaskKind::Text2TextGeneration, &other)),
        };
        Ok(value)
    }
}
