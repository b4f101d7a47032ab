use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use candle_transformers::models::{bert, distilbert};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use tracing::debug;

use crate::cache::CachedModelBundle;
use crate::error::{PipelineError, Result};
use crate::tasks::ComponentRole;

/// Opens the bundle's safetensors weights and parses its `config.json`.
pub(crate) fn open_weights(bundle: &CachedModelBundle, device: &Device) -> Result<(VarBuilder<'static>, Value)> {
    let model = bundle.component(ComponentRole::Model).ok_or_else(|| PipelineError::MissingComponent {
        role: ComponentRole::Model,
        model_id: bundle.model_id.clone(),
        reason: "not part of the bundle".to_string(),
    })?;

    let config: Value = serde_json::from_str(&fs::read_to_string(model.require("config.json")?)?)?;
    let weights = model.require("model.safetensors")?.to_path_buf();
    // Safety: the file is owned by the cache and not modified while mapped.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };
    Ok((vb, config))
}

fn usize_field(config: &Value, key: &str) -> Result<usize> {
    config
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .ok_or_else(|| PipelineError::execution(format!("model config has no '{}'", key)))
}

/// Labels from `id2label`, ordered by class index.
pub(crate) fn labels(config: &Value) -> Result<Vec<String>> {
    let map = config
        .get("id2label")
        .and_then(Value::as_object)
        .ok_or_else(|| PipelineError::execution("model config has no id2label"))?;

    let mut indexed = BTreeMap::new();
    for (id, label) in map {
        let id: usize = id
            .parse()
            .map_err(|_| PipelineError::execution(format!("invalid label id '{}'", id)))?;
        indexed.insert(id, label.as_str().unwrap_or_default().to_string());
    }
    Ok(indexed.into_values().collect())
}

/// Returns `vb.pp(prefix)` when the checkpoint stores the base model under
/// `prefix`, otherwise the root builder.
fn base_builder(vb: &VarBuilder<'static>, prefix: &str) -> VarBuilder<'static> {
    if vb.contains_tensor(&format!("{}.embeddings.word_embeddings.weight", prefix)) {
        vb.pp(prefix)
    } else {
        vb.clone()
    }
}

enum Backbone {
    DistilBert(distilbert::DistilBertModel),
    Bert(bert::BertModel),
}

/// A bidirectional encoder checkpoint with access to its head weights.
pub(crate) struct EncoderModel {
    backbone: Backbone,
    /// Root of the checkpoint, for loading task heads.
    pub heads: VarBuilder<'static>,
    pub config: Value,
    pub hidden_size: usize,
    pub device: Device,
}

impl EncoderModel {
    pub fn load(bundle: &CachedModelBundle, device: &Device) -> Result<Self> {
        let (vb, config) = open_weights(bundle, device)?;
        let model_type = config.get("model_type").and_then(Value::as_str).unwrap_or_default();
        debug!("Loading {} encoder for {}", model_type, bundle.model_id);

        let (backbone, hidden_size) = match model_type {
            "distilbert" => {
                let cfg: distilbert::Config = serde_json::from_value(config.clone())?;
                let model = distilbert::DistilBertModel::load(base_builder(&vb, "distilbert"), &cfg)?;
                (Backbone::DistilBert(model), usize_field(&config, "dim")?)
            }
            "bert" => {
                let cfg: bert::Config = serde_json::from_value(config.clone())?;
                let model = bert::BertModel::load(base_builder(&vb, "bert"), &cfg)?;
                (Backbone::Bert(model), usize_field(&config, "hidden_size")?)
            }
            other => {
                return Err(PipelineError::execution(format!(
                    "unsupported encoder architecture '{}'",
                    other
                )))
            }
        };

        Ok(Self { backbone, heads: vb, config, hidden_size, device: device.clone() })
    }

    pub fn is_bert(&self) -> bool {
        matches!(self.backbone, Backbone::Bert(_))
    }

    /// Hidden states of one sequence, shape `(1, seq_len, hidden_size)`.
    pub fn forward(&self, ids: &[u32], type_ids: &[u32]) -> Result<Tensor> {
        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let hidden = match &self.backbone {
            Backbone::DistilBert(model) => {
                // Nothing is masked for a single unpadded sequence.
                let mask = Tensor::zeros((1, ids.len()), DType::U8, &self.device)?;
                model.forward(&input_ids, &mask)?
            }
            Backbone::Bert(model) => {
                let token_type_ids = Tensor::new(type_ids, &self.device)?.unsqueeze(0)?;
                model.forward(&input_ids, &token_type_ids, None)?
            }
        };
        Ok(hidden)
    }

    /// Loads a dense layer stored at `name` in the checkpoint.
    pub fn linear(&self, in_dim: usize, out_dim: usize, name: &str) -> Result<Linear> {
        Ok(candle_nn::linear(in_dim, out_dim, self.heads.pp(name))?)
    }
}

/// Sequence classification head of DistilBERT or BERT checkpoints.
pub(crate) struct SequenceClassifier {
    pub encoder: EncoderModel,
    pre: Linear,
    classifier: Linear,
    pub labels: Vec<String>,
}

impl SequenceClassifier {
    pub fn load(bundle: &CachedModelBundle, device: &Device) -> Result<Self> {
        let encoder = EncoderModel::load(bundle, device)?;
        let labels = labels(&encoder.config)?;
        let h = encoder.hidden_size;
        let pre = if encoder.is_bert() {
            encoder.linear(h, h, "bert.pooler.dense")?
        } else {
            encoder.linear(h, h, "pre_classifier")?
        };
        let classifier = encoder.linear(h, labels.len(), "classifier")?;
        Ok(Self { encoder, pre, classifier, labels })
    }

    /// Class logits of one encoded sequence.
    pub fn logits(&self, ids: &[u32], type_ids: &[u32]) -> Result<Tensor> {
        let hidden = self.encoder.forward(ids, type_ids)?;
        let cls = hidden.squeeze(0)?.get(0)?.unsqueeze(0)?;
        let pooled = self.pre.forward(&cls)?;
        let pooled = if self.encoder.is_bert() { pooled.tanh()? } else { pooled.relu()? };
        Ok(self.classifier.forward(&pooled)?.squeeze(0)?)
    }
}
