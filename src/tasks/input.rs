//! Typed task arguments and binding of the caller's JSON mapping onto them.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};
use super::registry::TaskDescriptor;
use super::schema::ParamDefault;
use super::{CallConvention, TaskKind};

/// One text or a batch of texts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TextBatch {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextClassificationArgs {
    pub inputs: TextBatch,
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenClassificationArgs {
    pub inputs: String,
    pub ignore_labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionAnsweringArgs {
    pub question: String,
    pub context: String,
    pub max_answer_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZeroShotArgs {
    pub sequences: String,
    pub candidate_labels: Vec<String>,
    pub hypothesis_template: String,
    pub multi_label: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FillMaskArgs {
    pub inputs: String,
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureExtractionArgs {
    pub inputs: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Seq2SeqArgs {
    pub inputs: String,
    pub max_new_tokens: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextGenerationArgs {
    pub text_inputs: String,
    pub max_new_tokens: usize,
}

/// Validated arguments of one pipeline call, one variant per task.
#[derive(Debug, Clone)]
pub enum TaskInput {
    TextClassification(TextClassificationArgs),
    TokenClassification(TokenClassificationArgs),
    QuestionAnswering(QuestionAnsweringArgs),
    ZeroShotClassification(ZeroShotArgs),
    FillMask(FillMaskArgs),
    FeatureExtraction(FeatureExtractionArgs),
    Summarization(Seq2SeqArgs),
    Text2TextGeneration(Seq2SeqArgs),
    TextGeneration(TextGenerationArgs),
}

impl TaskInput {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskInput::TextClassification(_) => TaskKind::TextClassification,
            TaskInput::TokenClassification(_) => TaskKind::TokenClassification,
            TaskInput::QuestionAnswering(_) => TaskKind::QuestionAnswering,
            TaskInput::ZeroShotClassification(_) => TaskKind::ZeroShotClassification,
            TaskInput::FillMask(_) => TaskKind::FillMask,
            TaskInput::FeatureExtraction(_) => TaskKind::FeatureExtraction,
            TaskInput::Summarization(_) => TaskKind::Summarization,
            TaskInput::Text2TextGeneration(_) => TaskKind::Text2TextGeneration,
            TaskInput::TextGeneration(_) => TaskKind::TextGeneration,
        }
    }
}

impl TaskKind {
    /// Field names of the task's typed arguments, in declaration order.
    pub fn argument_names(self) -> &'static [&'static str] {
        match self {
            TaskKind::TextClassification => &["inputs", "top_k"],
            TaskKind::TokenClassification => &["inputs", "ignore_labels"],
            TaskKind::QuestionAnswering => &["question", "context", "max_answer_len"],
            TaskKind::ZeroShotClassification => {
                &["sequences", "candidate_labels", "hypothesis_template", "multi_label"]
            }
            TaskKind::FillMask => &["inputs", "top_k"],
            TaskKind::FeatureExtraction => &["inputs"],
            TaskKind::Summarization | TaskKind::Text2TextGeneration => &["inputs", "max_new_tokens"],
            TaskKind::TextGeneration => &["text_inputs", "max_new_tokens"],
        }
    }
}

/// Python-style wording, so `hfpipe discover` can parse the missing name back out.
fn missing_message(task: &str, missing: &[&str]) -> String {
    let quoted: Vec<String> = missing.iter().map(|m| format!("'{}'", m)).collect();
    let list = match quoted.as_slice() {
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
        [] => String::new(),
    };
    let noun = if missing.len() == 1 { "argument" } else { "arguments" };
    format!("{}() missing {} required positional {}: {}", task, missing.len(), noun, list)
}

/// Binds a caller's mapping to the task's corrected parameter list.
///
/// Keyword tasks match keys to parameter names; positional tasks take values
/// in insertion order. Missing required parameters are reported before
/// unexpected ones, then defaults are filled. Arguments the typed variant
/// still lacks are reported in the same wording as missing parameters, so a
/// stale parameter name surfaces as the name the pipeline expects.
pub fn bind_inputs(task: &TaskDescriptor, inputs: Map<String, Value>) -> Result<TaskInput> {
    bind_inputs_as(task, inputs, task.convention)
}

/// Like [`bind_inputs`], with the calling convention chosen by the caller.
pub fn bind_inputs_as(task: &TaskDescriptor, inputs: Map<String, Value>, convention: CallConvention) -> Result<TaskInput> {
    let name = task.task_name.as_str();

    let mut bound = match convention {
        CallConvention::Keyword => inputs,
        CallConvention::Positional => {
            if inputs.len() > task.parameters.len() {
                return Err(PipelineError::execution(format!(
                    "{}() takes {} positional arguments but {} were given",
                    name,
                    task.parameters.len(),
                    inputs.len()
                )));
            }
            task.parameters
                .iter()
                .map(|p| p.name.clone())
                .zip(inputs.into_iter().map(|(_, v)| v))
                .collect()
        }
    };

    let missing: Vec<&str> = task
        .parameters
        .iter()
        .filter(|p| p.is_required() && !bound.contains_key(&p.name))
        .map(|p| p.name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::execution(missing_message(name, &missing)));
    }

    if let Some(extra) = bound.keys().find(|k| !task.parameters.iter().any(|p| &p.name == *k)) {
        return Err(PipelineError::execution(format!(
            "{}() got an unexpected keyword argument '{}'",
            name, extra
        )));
    }

    for param in &task.parameters {
        if let ParamDefault::Value(default) = &param.default {
            bound.entry(param.name.clone()).or_insert_with(|| default.clone());
        }
    }

    let unbound: Vec<&str> = task
        .kind
        .argument_names()
        .iter()
        .copied()
        .filter(|field| !bound.contains_key(*field))
        .collect();
    if !unbound.is_empty() {
        return Err(PipelineError::execution(missing_message(name, &unbound)));
    }

    fn decode<T: DeserializeOwned>(task: &str, bound: Map<String, Value>) -> Result<T> {
        serde_json::from_value(Value::Object(bound))
            .map_err(|e| PipelineError::execution(format!("invalid arguments for {}: {}", task, e)))
    }

    Ok(match task.kind {
        TaskKind::TextClassification => TaskInput::TextClassification(decode(name, bound)?),
        TaskKind::TokenClassification => TaskInput::TokenClassification(decode(name, bound)?),
        TaskKind::QuestionAnswering => TaskInput::QuestionAnswering(decode(name, bound)?),
        TaskKind::ZeroShotClassification => TaskInput::ZeroShotClassification(decode(name, bound)?),
        TaskKind::FillMask => TaskInput::FillMask(decode(name, bound)?),
        TaskKind::FeatureExtraction => TaskInput::FeatureExtraction(decode(name, bound)?),
        TaskKind::Summarization => TaskInput::Summarization(decode(name, bound)?),
        TaskKind::Text2TextGeneration => TaskInput::Text2TextGeneration(decode(name, bound)?),
        TaskKind::TextGeneration => TaskInput::TextGeneration(decode(name, bound)?),
    })
}
