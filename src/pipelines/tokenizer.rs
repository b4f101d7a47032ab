use serde::Deserialize;
use std::fs;
use std::path::Path;
use tokenizers::decoders::wordpiece::WordPiece as WordPieceDecoder;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::bert::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{AddedToken, Model, Tokenizer, TruncationParams};
use tracing::debug;

use crate::cache::CachedModelBundle;
use crate::error::{PipelineError, Result};
use crate::tasks::ComponentRole;

pub(crate) fn tokenizer_error(e: tokenizers::Error) -> PipelineError {
    PipelineError::execution(format!("tokenizer error: {}", e))
}

#[derive(Debug, Default, Deserialize)]
struct TokenizerConfig {
    #[serde(default)]
    do_lower_case: Option<bool>,
}

/// Loads the bundle's tokenizer, truncating inputs to `max_len` tokens.
///
/// Repositories that only ship a WordPiece `vocab.txt` get a BERT-style
/// tokenizer assembled around it.
pub(crate) fn load(bundle: &CachedModelBundle, max_len: usize) -> Result<Tokenizer> {
    let component = bundle.component(ComponentRole::Tokenizer).ok_or_else(|| {
        PipelineError::execution(format!("{} has no tokenizer component", bundle.model_id))
    })?;

    let mut tokenizer = match component.file("tokenizer.json") {
        Some(path) => Tokenizer::from_file(path).map_err(tokenizer_error)?,
        None => {
            let lowercase = component
                .file("tokenizer_config.json")
                .and_then(|p| read_config(p).ok())
                .and_then(|c| c.do_lower_case)
                .unwrap_or(true);
            from_vocab(component.require("vocab.txt")?, lowercase)?
        }
    };

    tokenizer
        .with_truncation(Some(TruncationParams { max_length: max_len, ..Default::default() }))
        .map_err(tokenizer_error)?;
    Ok(tokenizer)
}

fn read_config(path: &Path) -> Result<TokenizerConfig> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// BERT-style tokenizer around a WordPiece vocabulary. The bracketed special
/// tokens are registered as added tokens so normalization leaves them intact.
pub(crate) fn from_vocab(vocab: &Path, lowercase: bool) -> Result<Tokenizer> {
    debug!("Building WordPiece tokenizer from {}", vocab.display());
    let model = WordPiece::from_file(&vocab.to_string_lossy())
        .unk_token("[UNK]".to_string())
        .build()
        .map_err(tokenizer_error)?;

    let special = |token: &str| {
        model
            .token_to_id(token)
            .ok_or_else(|| PipelineError::execution(format!("vocabulary has no {} token", token)))
    };
    let cls = special("[CLS]")?;
    let sep = special("[SEP]")?;
    let added: Vec<AddedToken> = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]"]
        .into_iter()
        .filter(|token| model.token_to_id(token).is_some())
        .map(|token| AddedToken::from(token, true))
        .collect();

    let mut tokenizer = Tokenizer::new(model);
    tokenizer
        .with_normalizer(Some(BertNormalizer::new(true, true, None, lowercase)))
        .with_pre_tokenizer(Some(BertPreTokenizer))
        .with_post_processor(Some(BertProcessing::new(
            ("[SEP]".to_string(), sep),
            ("[CLS]".to_string(), cls),
        )))
        .with_decoder(Some(WordPieceDecoder::default()));
    tokenizer.add_special_tokens(&added);
    Ok(tokenizer)
}

/// Id of a special token, or an execution error naming it.
pub(crate) fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| PipelineError::execution(format!("tokenizer has no '{}' token", token)))
}
