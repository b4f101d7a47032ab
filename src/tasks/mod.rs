//! Task catalog: every inference task the native backend can run, the
//! preprocessing signature of its implementation, and its default model.

mod input;
mod manifest;
mod registry;
mod schema;

pub use input::{
    bind_inputs, bind_inputs_as, FeatureExtractionArgs, FillMaskArgs, QuestionAnsweringArgs, Seq2SeqArgs,
    TaskInput, TextBatch, TextClassificationArgs, TextGenerationArgs, TokenClassificationArgs,
    ZeroShotArgs,
};
pub use manifest::{ArtifactSet, ComponentManifest, ComponentRole};
pub use registry::{TaskDescriptor, TaskRegistry};
pub use schema::{
    resolve_parameters, OverrideTable, ParamDefault, ParameterSpec, RawKind, RawParameter,
    StaticDefault,
};

use serde::Serialize;
use std::fmt;

/// Strongly typed identity of a task implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    TextClassification,
    TokenClassification,
    QuestionAnswering,
    ZeroShotClassification,
    FillMask,
    FeatureExtraction,
    Summarization,
    #[serde(rename = "text2text-generation")]
    Text2TextGeneration,
    TextGeneration,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = SUPPORTED_TASKS
            .iter()
            .find(|d| d.kind == *self)
            .map(|d| d.name)
            .unwrap_or("unknown");
        f.write_str(name)
    }
}

/// How caller values are handed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallConvention {
    /// Mapping keys are argument names.
    Keyword,
    /// Mapping values are taken in order; keys are ignored.
    Positional,
}

/// Static description of one supported task.
#[derive(Debug, Clone, Copy)]
pub struct TaskDefinition {
    pub name: &'static str,
    pub kind: TaskKind,
    pub default_model: Option<&'static str>,
    pub convention: CallConvention,
    pub manifest: ComponentManifest,
    /// Signature of the implementation's preprocessing step.
    pub signature: &'static [RawParameter],
}

use schema::StaticDefault as D;

pub static SUPPORTED_TASKS: &[TaskDefinition] = &[
    TaskDefinition {
        name: "text-classification",
        kind: TaskKind::TextClassification,
        default_model: Some("distilbert/distilbert-base-uncased-finetuned-sst-2-english"),
        convention: CallConvention::Keyword,
        manifest: ComponentManifest::TEXT,
        signature: &[
            RawParameter::receiver(),
            RawParameter::required("inputs", "string | string[]"),
            RawParameter::optional("top_k", "integer", D::Int(1)),
            RawParameter::variadic("tokenizer_kwargs"),
        ],
    },
    TaskDefinition {
        name: "token-classification",
        kind: TaskKind::TokenClassification,
        default_model: Some("dslim/bert-base-NER"),
        convention: CallConvention::Keyword,
        manifest: ComponentManifest::TEXT,
        signature: &[
            RawParameter::receiver(),
            RawParameter::required("sentence", "string"),
            RawParameter::optional("ignore_labels", "string[]", D::StrList(&["O"])),
            RawParameter::variadic("preprocess_params"),
        ],
    },
    TaskDefinition {
        name: "question-answering",
        kind: TaskKind::QuestionAnswering,
        default_model: Some("distilbert/distilbert-base-cased-distilled-squad"),
        convention: CallConvention::Keyword,
        manifest: ComponentManifest::TEXT,
        signature: &[
            RawParameter::receiver(),
            RawParameter::required("question", "string"),
            RawParameter::required("context", "string"),
            RawParameter::optional("max_answer_len", "integer", D::Int(15)),
        ],
    },
    TaskDefinition {
        name: "zero-shot-classification",
        kind: TaskKind::ZeroShotClassification,
        default_model: Some("typeform/distilbert-base-uncased-mnli"),
        convention: CallConvention::Keyword,
        manifest: ComponentManifest::TEXT,
        signature: &[
            RawParameter::receiver(),
            RawParameter::required("inputs", "string"),
            RawParameter::required("candidate_labels", "string[]"),
            RawParameter::optional("hypothesis_template", "string", D::Str("This example is {}.")),
            RawParameter::optional("multi_label", "bool", D::Bool(false)),
        ],
    },
    TaskDefinition {
        name: "fill-mask",
        kind: TaskKind::FillMask,
        default_model: Some("distilbert/distilbert-base-uncased"),
        convention: CallConvention::Keyword,
        manifest: ComponentManifest::TEXT,
        signature: &[
            RawParameter::receiver(),
            RawParameter::required("inputs", "string"),
            RawParameter::optional("top_k", "integer", D::Int(5)),
        ],
    },
    TaskDefinition {
        name: "feature-extraction",
        kind: TaskKind::FeatureExtraction,
        default_model: Some("distilbert/distilbert-base-cased"),
        convention: CallConvention::Keyword,
        manifest: ComponentManifest::TEXT,
        signature: &[
            RawParameter::receiver(),
            RawParameter::required("inputs", "string"),
            RawParameter::variadic("tokenize_kwargs"),
        ],
    },
    TaskDefinition {
        name: "summarization",
        kind: TaskKind::Summarization,
        default_model: Some("google-t5/t5-small"),
        convention: CallConvention::Positional,
        manifest: ComponentManifest::TEXT,
        signature: &[
            RawParameter::receiver(),
            RawParameter::required("inputs", "string"),
            RawParameter::optional("max_new_tokens", "integer", D::Int(64)),
            RawParameter::variadic("args"),
        ],
    },
    TaskDefinition {
        name: "text2text-generation",
        kind: TaskKind::Text2TextGeneration,
        default_model: Some("google-t5/t5-small"),
        convention: CallConvention::Positional,
        manifest: ComponentManifest::TEXT,
        signature: &[
            RawParameter::receiver(),
            RawParameter::required("inputs", "string"),
            RawParameter::optional("max_new_tokens", "integer", D::Int(64)),
            RawParameter::variadic("args"),
        ],
    },
    TaskDefinition {
        name: "text-generation",
        kind: TaskKind::TextGeneration,
        default_model: Some("Qwen/Qwen2.5-0.5B"),
        convention: CallConvention::Positional,
        manifest: ComponentManifest::TEXT,
        signature: &[
            RawParameter::receiver(),
            RawParameter::required("prompt_text", "string"),
            RawParameter::optional("max_new_tokens", "integer", D::Int(32)),
            RawParameter::variadic("generate_kwargs"),
        ],
    },
];

/// Looks up a catalog entry by task name.
pub fn find_definition(name: &str) -> Option<&'static TaskDefinition> {
    SUPPORTED_TASKS.iter().find(|d| d.name == name)
}
