use serde_json::Value;
use tokenizers::Tokenizer;

use crate::cache::CachedModelBundle;
use crate::error::Result;
use crate::tasks::{TaskInput, TaskKind};
use super::encoder::EncoderModel;
use super::tokenizer::{self, tokenizer_error};
use super::{wrong_input, BackendContext, Pipeline};

/// Returns the encoder's last hidden states, shaped `[1][tokens][hidden]`.
pub(crate) struct FeatureExtractionPipeline {
    tokenizer: Tokenizer,
    encoder: EncoderModel,
}

impl FeatureExtractionPipeline {
    pub fn load(bundle: &CachedModelBundle, ctx: &BackendContext) -> Result<Self> {
        Ok(Self {
            tokenizer: tokenizer::load(bundle, ctx.max_input_tokens)?,
            encoder: EncoderModel::load(bundle, &ctx.device)?,
        })
    }
}

impl Pipeline for FeatureExtractionPipeline {
    fn run(&mut self, input: TaskInput) -> Result<Value> {
        let args = match input {
            TaskInput::FeatureExtraction(args) => args,
            other => return Err(wrong_input(TaskKind::FeatureExtraction, &other)),
        };

        let encoding = self.tokenizer.encode(args.inputs.as_str(), true).map_err(tokenizer_error)?;
        let hidden = self.encoder.forward(encoding.get_ids(), encoding.get_type_ids())?;
        let features = hidden.to_vec3::<f32>()?;
        Ok(serde_json::to_value(features)?)
    }
}
