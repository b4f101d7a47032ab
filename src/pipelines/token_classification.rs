use candle_core::{Module, D};
use candle_nn::Linear;
use serde::Serialize;
use serde_json::Value;
use tokenizers::Tokenizer;

use crate::cache::CachedModelBundle;
use crate::error::Result;
use crate::tasks::{TaskInput, TaskKind};
use super::encoder::{labels, EncoderModel};
use super::tokenizer::{self, tokenizer_error};
use super::{wrong_input, BackendContext, Pipeline};

#[derive(Debug, Serialize)]
struct Entity {
    entity: String,
    score: f32,
    index: usize,
    word: String,
    start: usize,
    end: usize,
}

/// Per-token labelling without aggregation.
pub(crate) struct TokenClassificationPipeline {
    tokenizer: Tokenizer,
    encoder: EncoderModel,
    classifier: Linear,
    labels: Vec<String>,
}

impl TokenClassificationPipeline {
    pub fn load(bundle: &CachedModelBundle, ctx: &BackendContext) -> Result<Self> {
        let encoder = EncoderModel::load(bundle, &ctx.device)?;
        let labels = labels(&encoder.config)?;
        let classifier = encoder.linear(encoder.hidden_size, labels.len(), "classifier")?;
        Ok(Self {
            tokenizer: tokenizer::load(bundle, ctx.max_input_tokens)?,
            encoder,
            classifier,
            labels,
        })
    }
}

impl Pipeline for TokenClassificationPipeline {
    fn run(&mut self, input: TaskInput) -> Result<Value> {
        let args = match input {
            TaskInput::TokenClassification(args) => args,
            other => return Err(wrong_input(TaskKind::TokenClassification, &other)),
        };

        let encoding = self.tokenizer.encode(args.inputs.as_str(), true).map_err(tokenizer_error)?;
        let hidden = self.encoder.forward(encoding.get_ids(), encoding.get_type_ids())?;
        let logits = self.classifier.forward(&hidden.squeeze(0)?)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;

        let special = encoding.get_special_tokens_mask();
        let offsets = encoding.get_offsets();
        let tokens = encoding.get_tokens();

        let mut entities = Vec::new();
        for (index, row) in probs.iter().enumerate() {
            if special[index] == 1 {
                continue;
            }
            let (best, score) = row
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::MIN), |acc, (i, p)| if p > acc.1 { (i, p) } else { acc });
            let label = &self.labels[best];
            if args.ignore_labels.iter().any(|l| l == label) {
                continue;
            }
            let (start, end) = offsets[index];
            entities.push(Entity {
                entity: label.clone(),
                score,
                index,
                word: tokens[index].clone(),
                start,
                end,
            });
        }

        Ok(serde_json::to_value(entities)?)
    }
}
