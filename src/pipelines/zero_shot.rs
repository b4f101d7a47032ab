use serde::Serialize;
use serde_json::Value;
use tokenizers::Tokenizer;

use crate::cache::CachedModelBundle;
use crate::error::{PipelineError, Result};
use crate::tasks::{TaskInput, TaskKind};
use super::encoder::SequenceClassifier;
use super::tokenizer::{self, tokenizer_error};
use super::{ranked, softmax, wrong_input, BackendContext, Pipeline};

#[derive(Debug, Serialize)]
struct ZeroShotResult {
    sequence: String,
    labels: Vec<String>,
    scores: Vec<f32>,
}

/// NLI-based zero-shot classification: each candidate label becomes a
/// hypothesis scored against the input as premise.
pub(crate) struct ZeroShotPipeline {
    tokenizer: Tokenizer,
    model: SequenceClassifier,
    entailment: usize,
    contradiction: usize,
}

/// Finds the entailment and contradiction classes of an NLI head.
fn nli_indices(labels: &[String]) -> Result<(usize, usize)> {
    let find = |prefix: &str| {
        labels
            .iter()
            .position(|l| l.to_lowercase().starts_with(prefix))
            .ok_or_else(|| {
                PipelineError::execution(format!(
                    "model labels {:?} have no '{}' class; not an NLI model",
                    labels, prefix
                ))
            })
    };
    Ok((find("entail")?, find("contra")?))
}

/// Scores candidate labels from their per-hypothesis NLI logits.
///
/// With `multi_label` every label is scored independently (entailment vs
/// contradiction); otherwise entailment logits are softmaxed across labels.
fn label_scores(logits: &[Vec<f32>], entailment: usize, contradiction: usize, multi_label: bool) -> Vec<f32> {
    if multi_label {
        logits
            .iter()
            .map(|row| softmax(&[row[contradiction], row[entailment]])[1])
            .collect()
    } else {
        softmax(&logits.iter().map(|row| row[entailment]).collect::<Vec<_>>())
    }
}

impl ZeroShotPipeline {
    pub fn load(bundle: &CachedModelBundle, ctx: &BackendContext) -> Result<Self> {
        let model = SequenceClassifier::load(bundle, &ctx.device)?;
        let (entailment, contradiction) = nli_indices(&model.labels)?;
        Ok(Self {
            tokenizer: tokenizer::load(bundle, ctx.max_input_tokens)?,
            model,
            entailment,
            contradiction,
        })
    }
}

impl Pipeline for ZeroShotPipeline {
    fn run(&mut self, input: TaskInput) -> Result<Value> {
        let args = match input {
            TaskInput::ZeroShotClassification(args) => args,
            other => return Err(wrong_input(TaskKind::ZeroShotClassification, &other)),
        };
        if args.candidate_labels.is_empty() {
            return Err(PipelineError::execution("candidate_labels must not be empty"));
        }
        if !args.hypothesis_template.contains("{}") {
            return Err(PipelineError::execution(format!(
                "hypothesis_template '{}' has no '{{}}' placeholder",
                args.hypothesis_template
            )));
        }

        let mut logits = Vec::with_capacity(args.candidate_labels.len());
        for label in &args.candidate_labels {
            let hypothesis = args.hypothesis_template.replace("{}", label);
            let encoding = self
                .tokenizer
                .encode((args.sequences.as_str(), hypothesis.as_str()), true)
                .map_err(tokenizer_error)?;
            let row = self.model.logits(encoding.get_ids(), encoding.get_type_ids())?;
            logits.push(row.to_vec1::<f32>()?);
        }

        let scores = label_scores(&logits, self.entailment, self.contradiction, args.multi_label);
        let order = ranked(&scores);
        let result = ZeroShotResult {
            sequence: args.sequences,
            labels: order.iter().map(|i| args.candidate_labels[*i].clone()).collect(),
            scores: order.iter().map(|i| scores[*i]).collect(),
        };
        Ok(serde_json::to_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_nli_indices_ignore_case() {
        let (e, c) = nli_indices(&labels(&["CONTRADICTION", "NEUTRAL", "ENTAILMENT"])).unwrap();
        assert_eq!((e, c), (2, 0));
    }

    #[test]
    fn test_non_nli_labels_are_rejected() {
        assert!(nli_indices(&labels(&["NEGATIVE", "POSITIVE"])).is_err());
    }

    #[test]
    fn test_single_label_scores_sum_to_one() {
        let logits = vec![vec![0.0, 0.0, 3.0], vec![0.0, 0.0, 1.0]];
        let scores = label_scores(&logits, 2, 0, false);
        assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_multi_label_scores_are_independent() {
        let logits = vec![vec![-4.0, 0.0, 4.0], vec![-4.0, 0.0, 4.0]];
        let scores = label_scores(&logits, 2, 0, true);
        assert!(scores.iter().all(|s| *s > 0.99));
    }
}
