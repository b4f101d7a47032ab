use serde::Serialize;
use serde_json::Value;
use tokenizers::Tokenizer;

use crate::cache::CachedModelBundle;
use crate::error::Result;
use crate::tasks::{TaskInput, TaskKind, TextBatch};
use super::encoder::SequenceClassifier;
use super::tokenizer::{self, tokenizer_error};
use super::{ranked, softmax_vec, wrong_input, BackendContext, Pipeline};

#[derive(Debug, Serialize)]
pub(crate) struct LabelScore {
    pub label: String,
    pub score: f32,
}

pub(crate) struct TextClassificationPipeline {
    tokenizer: Tokenizer,
    model: SequenceClassifier,
}

impl TextClassificationPipeline {
    pub fn load(bundle: &CachedModelBundle, ctx: &BackendContext) -> Result<Self> {
        Ok(Self {
            tokenizer: tokenizer::load(bundle, ctx.max_input_tokens)?,
            model: SequenceClassifier::load(bundle, &ctx.device)?,
        })
    }

    fn classify(&self, text: &str, top_k: usize) -> Result<Vec<LabelScore>> {
        let encoding = self.tokenizer.encode(text, true).map_err(tokenizer_error)?;
        let logits = self.model.logits(encoding.get_ids(), encoding.get_type_ids())?;
        let scores = softmax_vec(&logits)?;
        Ok(ranked(&scores)
            .into_iter()
            .take(top_k.max(1))
            .map(|i| LabelScore { label: self.model.labels[i].clone(), score: scores[i] })
            .collect())
    }
}

impl Pipeline for TextClassificationPipeline {
    fn run(&mut self, input: TaskInput) -> Result<Value> {
        let args = match input {
            TaskInput::TextClassification(args) => args,
            other => return Err(wrong_input(TaskKind::TextClassification, &other)),
        };

        let value = match args.inputs {
            TextBatch::One(text) => serde_json::to_value(self.classify(&text, args.top_k)?)?,
            TextBatch::Many(texts) => {
                let mut results = Vec::with_capacity(texts.len());
                for text in &texts {
                    let top = self.classify(text, args.top_k)?;
                    if args.top_k <= 1 {
                        results.push(serde_json::to_value(top.into_iter().next())?);
                    } else {
                        results.push(serde_json::to_value(top)?);
                    }
                }
                Value::Array(results)
            }
        };
        Ok(value)
    }
}
