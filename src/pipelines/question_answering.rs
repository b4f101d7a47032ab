use candle_core::{Module, D};
use candle_nn::Linear;
use serde::Serialize;
use serde_json::Value;
use tokenizers::Tokenizer;

use crate::cache::CachedModelBundle;
use crate::error::{PipelineError, Result};
use crate::tasks::{TaskInput, TaskKind};
use super::encoder::EncoderModel;
use super::tokenizer::{self, tokenizer_error};
use super::{softmax, wrong_input, BackendContext, Pipeline};

#[derive(Debug, Serialize)]
struct Answer {
    score: f32,
    start: usize,
    end: usize,
    answer: String,
}

/// Extractive QA: picks the best start/end token span inside the context.
pub(crate) struct QuestionAnsweringPipeline {
    tokenizer: Tokenizer,
    encoder: EncoderModel,
    qa_outputs: Linear,
}

impl QuestionAnsweringPipeline {
    pub fn load(bundle: &CachedModelBundle, ctx: &BackendContext) -> Result<Self> {
        let encoder = EncoderModel::load(bundle, &ctx.device)?;
        let qa_outputs = encoder.linear(encoder.hidden_size, 2, "qa_outputs")?;
        Ok(Self {
            tokenizer: tokenizer::load(bundle, ctx.max_input_tokens)?,
            encoder,
            qa_outputs,
        })
    }
}

/// Best `(start, end, score)` over the allowed token positions.
///
/// Score is `p_start * p_end` with both distributions softmaxed over the
/// allowed positions only; spans are limited to `max_len` tokens.
fn best_span(start_logits: &[f32], end_logits: &[f32], allowed: &[bool], max_len: usize) -> Option<(usize, usize, f32)> {
    let positions: Vec<usize> = (0..allowed.len()).filter(|i| allowed[*i]).collect();
    if positions.is_empty() {
        return None;
    }
    let starts = softmax(&positions.iter().map(|i| start_logits[*i]).collect::<Vec<_>>());
    let ends = softmax(&positions.iter().map(|i| end_logits[*i]).collect::<Vec<_>>());

    let mut best: Option<(usize, usize, f32)> = None;
    for (si, s) in positions.iter().enumerate() {
        for (ei, e) in positions.iter().enumerate().skip(si) {
            if e - s + 1 > max_len.max(1) {
                break;
            }
            let score = starts[si] * ends[ei];
            if best.map_or(true, |(_, _, b)| score > b) {
                best = Some((*s, *e, score));
            }
        }
    }
    best
}

impl Pipeline for QuestionAnsweringPipeline {
    fn run(&mut self, input: TaskInput) -> Result<Value> {
        let args = match input {
            TaskInput::QuestionAnswering(args) => args,
            other => return Err(wrong_input(TaskKind::QuestionAnswering, &other)),
        };

        let encoding = self
            .tokenizer
            .encode((args.question.as_str(), args.context.as_str()), true)
            .map_err(tokenizer_error)?;
        let hidden = self.encoder.forward(encoding.get_ids(), encoding.get_type_ids())?;
        let logits = self.qa_outputs.forward(&hidden.squeeze(0)?)?;
        let start_logits = logits.narrow(D::Minus1, 0, 1)?.squeeze(D::Minus1)?.to_vec1::<f32>()?;
        let end_logits = logits.narrow(D::Minus1, 1, 1)?.squeeze(D::Minus1)?.to_vec1::<f32>()?;

        // Only tokens of the second sequence (the context) can be part of an answer.
        let allowed: Vec<bool> = encoding
            .get_sequence_ids()
            .iter()
            .zip(encoding.get_special_tokens_mask())
            .map(|(seq, special)| *seq == Some(1) && *special == 0)
            .collect();

        let (s, e, score) = best_span(&start_logits, &end_logits, &allowed, args.max_answer_len)
            .ok_or_else(|| PipelineError::execution("context is empty after tokenization"))?;
        let offsets = encoding.get_offsets();
        let (start, end) = (offsets[s].0, offsets[e].1);
        let answer = args.context.get(start..end).unwrap_or_default().to_string();

        Ok(serde_json::to_value(Answer { score, start, end, answer })?)
    }
}
