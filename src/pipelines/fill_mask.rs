use candle_core::{Module, Tensor};
use candle_nn::{LayerNorm, Linear};
use serde::Serialize;
use serde_json::Value;
use tokenizers::Tokenizer;

use crate::cache::CachedModelBundle;
use crate::error::{PipelineError, Result};
use crate::tasks::{TaskInput, TaskKind};
use super::encoder::EncoderModel;
use super::tokenizer::{self, token_id, tokenizer_error};
use super::{ranked, softmax_vec, wrong_input, BackendContext, Pipeline};

const MASK_TOKEN: &str = "[MASK]";

#[derive(Debug, Serialize)]
struct Prediction {
    score: f32,
    token: u32,
    token_str: String,
    sequence: String,
}

/// Masked language model head: transform, activation, norm, then a
/// projection onto the vocabulary tied to the word embeddings.
struct MlmHead {
    transform: Linear,
    norm: LayerNorm,
    projector: Linear,
}

impl MlmHead {
    fn load(encoder: &EncoderModel) -> Result<Self> {
        let h = encoder.hidden_size;
        let vb = &encoder.heads;
        let vocab_size = encoder
            .config
            .get("vocab_size")
            .and_then(Value::as_u64)
            .ok_or_else(|| PipelineError::execution("model config has no 'vocab_size'"))? as usize;

        let (transform, norm, bias_name, embeddings) = if encoder.is_bert() {
            (
                "cls.predictions.transform.dense",
                "cls.predictions.transform.LayerNorm",
                "cls.predictions.bias",
                "bert.embeddings.word_embeddings.weight",
            )
        } else {
            ("vocab_transform", "vocab_layer_norm", "vocab_projector.bias", "distilbert.embeddings.word_embeddings.weight")
        };

        let weight_name = if vb.contains_tensor(embeddings) {
            embeddings
        } else {
            embeddings.split_once('.').map(|(_, rest)| rest).unwrap_or(embeddings)
        };
        let weight = vb.get((vocab_size, h), weight_name)?;
        let bias = vb.get(vocab_size, bias_name)?;

        Ok(Self {
            transform: encoder.linear(h, h, transform)?,
            norm: candle_nn::layer_norm(h, 1e-12, vb.pp(norm))?,
            projector: Linear::new(weight, Some(bias)),
        })
    }

    /// Vocabulary logits for one hidden vector of shape `(hidden,)`.
    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let x = self.transform.forward(&hidden.unsqueeze(0)?)?.gelu_erf()?;
        let x = self.norm.forward(&x)?;
        Ok(self.projector.forward(&x)?.squeeze(0)?)
    }
}

pub(crate) struct FillMaskPipeline {
    tokenizer: Tokenizer,
    encoder: EncoderModel,
    head: MlmHead,
    mask_id: u32,
}

impl FillMaskPipeline {
    pub fn load(bundle: &CachedModelBundle, ctx: &BackendContext) -> Result<Self> {
        let tokenizer = tokenizer::load(bundle, ctx.max_input_tokens)?;
        let mask_id = token_id(&tokenizer, MASK_TOKEN)?;
        let encoder = EncoderModel::load(bundle, &ctx.device)?;
        let head = MlmHead::load(&encoder)?;
        Ok(Self { tokenizer, encoder, head, mask_id })
    }
}

impl Pipeline for FillMaskPipeline {
    fn run(&mut self, input: TaskInput) -> Result<Value> {
        let args = match input {
            TaskInput::FillMask(args) => args,
            other => return Err(wrong_input(TaskKind::FillMask, &other)),
        };

        let encoding = self.tokenizer.encode(args.inputs.as_str(), true).map_err(tokenizer_error)?;
        let ids = encoding.get_ids();
        let masked: Vec<usize> = ids
            .iter()
            .enumerate()
            .filter(|(_, id)| **id == self.mask_id)
            .map(|(i, _)| i)
            .collect();
        let position = match masked.as_slice() {
            [one] => *one,
            [] => return Err(PipelineError::execution(format!("No mask_token ({}) found on the input", MASK_TOKEN))),
            _ => {
                return Err(PipelineError::execution(format!(
                    "expected exactly one {} in the input, found {}",
                    MASK_TOKEN,
                    masked.len()
                )))
            }
        };

        let hidden = self.encoder.forward(ids, encoding.get_type_ids())?;
        let logits = self.head.forward(&hidden.squeeze(0)?.get(position)?)?;
        let probs = softmax_vec(&logits)?;

        let mut predictions = Vec::with_capacity(args.top_k);
        for index in ranked(&probs).into_iter().take(args.top_k.max(1)) {
            let token = index as u32;
            let mut filled = ids.to_vec();
            filled[position] = token;
            predictions.push(Prediction {
                score: probs[index],
                token,
                token_str: self.tokenizer.decode(&[token], false).map_err(tokenizer_error)?,
                sequence: self.tokenizer.decode(&filled, true).map_err(tokenizer_error)?,
            });
        }
        Ok(serde_json::to_value(predictions)?)
    }
}
