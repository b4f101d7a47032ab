//! End-to-end runs of the candle pipelines on tiny randomly initialised
//! checkpoints written to a temporary cache directory. Scores are noise; the
//! tests check weight names, head shapes and the JSON layout of results.

use candle_core::{DType, Device};
use candle_nn::{Init, VarBuilder, VarMap};
use candle_transformers::models::{distilbert, qwen2, t5};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use crate::cache::{CachedModelBundle, ComponentHandle};
use crate::tasks::{bind_inputs, ComponentRole, TaskRegistry};
use super::{BackendContext, CandleFactory, GenerationSettings, PipelineFactory};

const HIDDEN: usize = 8;

const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "the", "cat", "sat", "on", "mat", "who", "alice",
    "was", "good", "bad", "this", "example", "is", "a", "once", "upon", "time", ".", "?",
];

const SENTIMENT: &[&str] = &["NEGATIVE", "POSITIVE"];
const NLI: &[&str] = &["CONTRADICTION", "NEUTRAL", "ENTAILMENT"];

fn component(dir: &Path, role: ComponentRole, files: &[&str]) -> ComponentHandle {
    let directory = dir.join(role.as_str());
    let files = files.iter().map(|f| (f.to_string(), directory.join(f))).collect();
    ComponentHandle { role, directory, files }
}

/// Writes `config`, the variables of `varmap` and a WordPiece vocabulary
/// under `dir`, laid out like a cached task directory.
fn write_bundle(dir: &Path, config: &Value, varmap: &VarMap) -> CachedModelBundle {
    let model = component(dir, ComponentRole::Model, &["config.json", "model.safetensors"]);
    let tokenizer = component(dir, ComponentRole::Tokenizer, &["vocab.txt"]);
    fs::create_dir_all(&model.directory).unwrap();
    fs::create_dir_all(&tokenizer.directory).unwrap();
    fs::write(model.directory.join("config.json"), config.to_string()).unwrap();
    varmap.save(model.directory.join("model.safetensors")).unwrap();
    fs::write(tokenizer.directory.join("vocab.txt"), VOCAB.join("\n")).unwrap();

    CachedModelBundle {
        task_name: "tiny".to_string(),
        model_id: "tiny/random".to_string(),
        components: BTreeMap::from([(ComponentRole::Model, model), (ComponentRole::Tokenizer, tokenizer)]),
    }
}

/// One-layer DistilBERT with every head the encoder pipelines look for.
fn tiny_distilbert(dir: &Path, labels: &[&str]) -> CachedModelBundle {
    let id2label: Map<String, Value> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| (i.to_string(), json!(label)))
        .collect();
    let config = json!({
        "model_type": "distilbert",
        "vocab_size": VOCAB.len(),
        "dim": HIDDEN,
        "n_layers": 1,
        "n_heads": 2,
        "hidden_dim": 16,
        "activation": "gelu",
        "max_position_embeddings": 32,
        "initializer_range": 0.02,
        "pad_token_id": 0,
        "id2label": id2label,
    });

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let cfg: distilbert::Config = serde_json::from_value(config.clone()).unwrap();
    distilbert::DistilBertModel::load(vb.pp("distilbert"), &cfg).unwrap();
    candle_nn::linear(HIDDEN, HIDDEN, vb.pp("pre_classifier")).unwrap();
    candle_nn::linear(HIDDEN, labels.len(), vb.pp("classifier")).unwrap();
    candle_nn::linear(HIDDEN, 2, vb.pp("qa_outputs")).unwrap();
    candle_nn::linear(HIDDEN, HIDDEN, vb.pp("vocab_transform")).unwrap();
    candle_nn::layer_norm(HIDDEN, 1e-12, vb.pp("vocab_layer_norm")).unwrap();
    vb.get_with_hints(VOCAB.len(), "vocab_projector.bias", Init::Const(0.)).unwrap();

    write_bundle(dir, &config, &varmap)
}

fn tiny_qwen2(dir: &Path) -> CachedModelBundle {
    let config = json!({
        "vocab_size": VOCAB.len(),
        "hidden_size": HIDDEN,
        "intermediate_size": 16,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "num_key_value_heads": 1,
        "max_position_embeddings": 32,
        "sliding_window": 32,
        "max_window_layers": 1,
        "tie_word_embeddings": true,
        "rope_theta": 10000.0,
        "rms_norm_eps": 1e-6,
        "use_sliding_window": false,
        "hidden_act": "silu",
        "eos_token_id": 3,
    });

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let cfg: qwen2::Config = serde_json::from_value(config.clone()).unwrap();
    qwen2::ModelForCausalLM::new(&cfg, vb).unwrap();

    write_bundle(dir, &config, &varmap)
}

fn tiny_t5(dir: &Path) -> CachedModelBundle {
    let config = json!({
        "vocab_size": VOCAB.len(),
        "d_model": HIDDEN,
        "d_kv": 4,
        "d_ff": 16,
        "num_layers": 1,
        "num_decoder_layers": 1,
        "num_heads": 2,
        "relative_attention_num_buckets": 8,
        "relative_attention_max_distance": 16,
        "dropout_rate": 0.0,
        "layer_norm_epsilon": 1e-6,
        "initializer_factor": 1.0,
        "feed_forward_proj": "relu",
        "tie_word_embeddings": true,
        "is_decoder": false,
        "is_encoder_decoder": true,
        "use_cache": true,
        "pad_token_id": 0,
        "eos_token_id": 3,
        "decoder_start_token_id": 0,
    });

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let cfg: t5::Config = serde_json::from_value(config.clone()).unwrap();
    t5::T5ForConditionalGeneration::load(vb, &cfg).unwrap();

    write_bundle(dir, &config, &varmap)
}

/// Binds `inputs` for `task_name` and runs it through the candle backend.
fn run(task_name: &str, bundle: &CachedModelBundle, inputs: Value) -> Value {
    let registry = TaskRegistry::builtin();
    let task = registry.get(task_name).unwrap();
    let inputs = match inputs {
        Value::Object(map) => map,
        other => panic!("inputs must be an object, got {}", other),
    };
    let input = bind_inputs(task, inputs).unwrap();

    let context = BackendContext {
        device: Device::Cpu,
        max_input_tokens: 32,
        generation: GenerationSettings { temperature: None, seed: 7, max_tokens: 4 },
    };
    let mut pipeline = CandleFactory::new(context).build(task, bundle).unwrap();
    pipeline.run(input).unwrap()
}

fn score(value: &Value) -> f64 {
    value.as_f64().unwrap()
}

#[test]
fn test_text_classification_returns_label_scores() {
    let dir = TempDir::new().unwrap();
    let bundle = tiny_distilbert(dir.path(), SENTIMENT);

    let result = run("text-classification", &bundle, json!({"inputs": "the cat was good"}));
    let top = result.as_array().unwrap();
    assert_eq!(top.len(), 1);
    assert!(SENTIMENT.contains(&top[0]["label"].as_str().unwrap()));
    assert!((0.0..=1.0).contains(&score(&top[0]["score"])));

    let both = run("text-classification", &bundle, json!({"inputs": "the cat was bad", "top_k": 2}));
    let both = both.as_array().unwrap();
    assert_eq!(both.len(), 2);
    assert!((score(&both[0]["score"]) + score(&both[1]["score"]) - 1.0).abs() < 1e-4);
    assert!(score(&both[0]["score"]) >= score(&both[1]["score"]));
}

#[test]
fn test_question_answer_is_a_span_of_the_context() {
    let dir = TempDir::new().unwrap();
    let bundle = tiny_distilbert(dir.path(), SENTIMENT);
    let context = "alice sat on the mat .";

    let result = run("question-answering", &bundle, json!({"question": "who sat ?", "context": context}));
    let answer = result["answer"].as_str().unwrap();
    let (start, end) = (result["start"].as_u64().unwrap() as usize, result["end"].as_u64().unwrap() as usize);
    assert!(context.contains(answer));
    assert_eq!(&context[start..end], answer);
    assert!((0.0..=1.0).contains(&score(&result["score"])));
}

#[test]
fn test_fill_mask_returns_top_k_predictions() {
    let dir = TempDir::new().unwrap();
    let bundle = tiny_distilbert(dir.path(), SENTIMENT);

    let result = run("fill-mask", &bundle, json!({"inputs": "the cat sat on the [MASK] .", "top_k": 3}));
    let predictions = result.as_array().unwrap();
    assert_eq!(predictions.len(), 3);
    for prediction in predictions {
        let token = prediction["token"].as_u64().unwrap() as usize;
        assert!(token < VOCAB.len());
        assert!(prediction["token_str"].is_string());
        assert!(prediction["sequence"].as_str().unwrap().starts_with("the cat sat on the"));
    }
    assert!(score(&predictions[0]["score"]) >= score(&predictions[2]["score"]));
}

#[test]
fn test_token_classification_labels_every_word() {
    let dir = TempDir::new().unwrap();
    let bundle = tiny_distilbert(dir.path(), SENTIMENT);

    let result = run("token-classification", &bundle, json!({"inputs": "the cat sat", "ignore_labels": []}));
    let entities = result.as_array().unwrap();
    let words: Vec<&str> = entities.iter().map(|e| e["word"].as_str().unwrap()).collect();
    assert_eq!(words, vec!["the", "cat", "sat"]);
    assert_eq!(entities[1]["start"], 4);
    assert_eq!(entities[1]["end"], 7);
}

#[test]
fn test_feature_extraction_shape() {
    let dir = TempDir::new().unwrap();
    let bundle = tiny_distilbert(dir.path(), SENTIMENT);

    let result = run("feature-extraction", &bundle, json!({"inputs": "the cat sat"}));
    let batch = result.as_array().unwrap();
    assert_eq!(batch.len(), 1);
    let tokens = batch[0].as_array().unwrap();
    // [CLS] the cat sat [SEP]
    assert_eq!(tokens.len(), 5);
    assert!(tokens.iter().all(|t| t.as_array().unwrap().len() == HIDDEN));
}

#[test]
fn test_zero_shot_scores_every_candidate() {
    let dir = TempDir::new().unwrap();
    let bundle = tiny_distilbert(dir.path(), NLI);

    let result = run(
        "zero-shot-classification",
        &bundle,
        json!({"sequences": "the cat sat", "candidate_labels": ["good", "bad"]}),
    );
    assert_eq!(result["sequence"], "the cat sat");
    let mut labels: Vec<&str> = result["labels"].as_array().unwrap().iter().map(|l| l.as_str().unwrap()).collect();
    labels.sort_unstable();
    assert_eq!(labels, vec!["bad", "good"]);
    let total: f64 = result["scores"].as_array().unwrap().iter().map(score).sum();
    assert!((total - 1.0).abs() < 1e-4);
}

#[test]
fn test_text_generation_continues_the_prompt() {
    let dir = TempDir::new().unwrap();
    let bundle = tiny_qwen2(dir.path());

    let result = run("text-generation", &bundle, json!({"text_inputs": "once upon a time", "max_new_tokens": 3}));
    let text = result[0]["generated_text"].as_str().unwrap();
    assert!(text.starts_with("once upon a time"), "{}", text);
}

#[test]
fn test_summarization_returns_summary_text() {
    let dir = TempDir::new().unwrap();
    let bundle = tiny_t5(dir.path());

    let result = run("summarization", &bundle, json!({"inputs": "the cat sat on the mat .", "max_new_tokens": 3}));
    assert_eq!(result.as_array().unwrap().len(), 1);
    assert!(result[0]["summary_text"].is_string());
}
