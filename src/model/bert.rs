//! BERT sequence classifier on candle.
//!
//! Weights follow the `BertForSequenceClassification` layout: the encoder
//! under `bert.`, an optional `bert.pooler.dense`, and a `classifier` linear
//! head producing one logit per class.

use anyhow::{Context, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokenizers::models::wordpiece::WordPiece;
use tokenizers::normalizers::BertNormalizer;
use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
use tokenizers::processors::bert::BertProcessing;
use tokenizers::{Model, Tokenizer, TruncationParams};
use tokio::time::Instant;
use tracing::{debug, info};

use super::artifact::{
    device_name, ArtifactSettings, CONFIG_FILE, LABEL_MAP_FILE, TOKENIZER_CONFIG_FILE,
    TOKENIZER_FILE, VOCAB_FILE, WEIGHTS_FILE,
};
use super::labels::LabelMap;
use super::{ArtifactInfo, LoadedModel, SequenceClassifier, TaskVariant};
use crate::error::CoreError;
use crate::TARGET_MODEL;

pub struct BertSequenceClassifier {
    model: BertModel,
    pooler: Option<Linear>,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
}

impl SequenceClassifier for BertSequenceClassifier {
    fn logits(&mut self, text: &str) -> Result<Vec<f32>> {
        let started = Instant::now();
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(encoding.get_type_ids(), &self.device)?.unsqueeze(0)?;
        let attention_mask =
            Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // [CLS] embedding, [1, hidden]
        let mut pooled = hidden.i((.., 0, ..))?;
        if let Some(pooler) = &self.pooler {
            pooled = pooler.forward(&pooled)?.tanh()?;
        }
        let logits = self
            .classifier
            .forward(&pooled)?
            .squeeze(0)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;

        debug!(
            target: TARGET_MODEL,
            "Forward pass over {} tokens took {:?}",
            encoding.get_ids().len(),
            started.elapsed()
        );
        Ok(logits)
    }
}

/// Output dimension declared by `config.json`: the size of `id2label`, or
/// `num_labels` when there is no mapping.
pub fn declared_class_count(config: &serde_json::Value) -> Option<usize> {
    config
        .get("id2label")
        .and_then(|v| v.as_object())
        .map(|labels| labels.len())
        .or_else(|| {
            config
                .get("num_labels")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
        })
}

fn default_true() -> bool {
    true
}

/// Special tokens may be plain strings or added-token objects with `content`.
fn token_content<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(token) => Ok(token),
        serde_json::Value::Object(fields) => fields
            .get("content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| serde::de::Error::custom("special token object without content")),
        other => Err(serde::de::Error::custom(format!("invalid special token {}", other))),
    }
}

/// The parts of `tokenizer_config.json` that shape a tokenizer built from
/// `vocab.txt`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct WordPieceConfig {
    #[serde(default = "default_true")]
    do_lower_case: bool,
    /// Unset means "strip when lowercasing"
    #[serde(default)]
    strip_accents: Option<bool>,
    #[serde(default = "WordPieceConfig::default_unk", deserialize_with = "token_content")]
    unk_token: String,
    #[serde(default = "WordPieceConfig::default_cls", deserialize_with = "token_content")]
    cls_token: String,
    #[serde(default = "WordPieceConfig::default_sep", deserialize_with = "token_content")]
    sep_token: String,
}

impl WordPieceConfig {
    fn default_unk() -> String {
        "[UNK]".to_string()
    }

    fn default_cls() -> String {
        "[CLS]".to_string()
    }

    fn default_sep() -> String {
        "[SEP]".to_string()
    }

    fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(TOKENIZER_CONFIG_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                debug!(target: TARGET_MODEL, "No {}, using BERT defaults", path.display());
                "{}".to_string()
            }
        };
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

fn load_tokenizer(dir: &Path, max_length: usize) -> Result<Tokenizer> {
    let tokenizer_path = dir.join(TOKENIZER_FILE);
    let mut tokenizer = if tokenizer_path.is_file() {
        Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", tokenizer_path.display(), e))?
    } else {
        let config = WordPieceConfig::read(dir)?;
        let vocab_path = dir.join(VOCAB_FILE);
        debug!(
            target: TARGET_MODEL,
            "Building WordPiece tokenizer from {} (lowercase {}, strip accents {:?})",
            vocab_path.display(),
            config.do_lower_case,
            config.strip_accents
        );
        let wordpiece = WordPiece::from_file(&vocab_path.to_string_lossy())
            .unk_token(config.unk_token.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build WordPiece model: {}", e))?;
        let special = |token: &str| {
            wordpiece
                .token_to_id(token)
                .ok_or_else(|| anyhow::anyhow!("{} is missing from {}", token, VOCAB_FILE))
        };
        let cls = special(&config.cls_token)?;
        let sep = special(&config.sep_token)?;

        let mut tokenizer = Tokenizer::new(wordpiece);
        tokenizer.with_normalizer(Some(BertNormalizer::new(
            true,
            true,
            config.strip_accents,
            config.do_lower_case,
        )));
        tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
        tokenizer.with_post_processor(Some(BertProcessing::new(
            (config.sep_token, sep),
            (config.cls_token, cls),
        )));
        tokenizer
    };

    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;
    tokenizer.with_padding(None);
    Ok(tokenizer)
}

fn read_tensors(dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let weights_path = dir.join(WEIGHTS_FILE);
    candle_core::safetensors::load_buffer(
        &std::fs::read(&weights_path)
            .with_context(|| format!("Failed to read {}", weights_path.display()))?,
        device,
    )
    .context("Failed to load model tensors")
}

/// Output width of the `classifier` head, if the weights carry one.
fn head_width(tensors: &HashMap<String, Tensor>) -> Option<usize> {
    tensors
        .get("classifier.weight")
        .and_then(|weight| weight.dims2().ok())
        .map(|(rows, _)| rows)
}

fn load_weights(
    tensors: HashMap<String, Tensor>,
    config: &BertConfig,
    num_labels: usize,
    device: &Device,
) -> Result<(BertModel, Option<Linear>, Linear)> {
    let prefixed = tensors.keys().any(|name| name.starts_with("bert."));
    let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
    let encoder_vb = if prefixed { vb.pp("bert") } else { vb.clone() };

    let model = BertModel::load(encoder_vb.clone(), config).context("Failed to load BERT encoder")?;
    let pooler = candle_nn::linear(
        config.hidden_size,
        config.hidden_size,
        encoder_vb.pp("pooler").pp("dense"),
    )
    .ok();
    let classifier = candle_nn::linear(config.hidden_size, num_labels, vb.pp("classifier"))
        .context("Failed to load classification head")?;
    Ok((model, pooler, classifier))
}

/// Build a ready classifier from a complete artifact directory.
pub fn load_artifact(
    dir: &Path,
    settings: &ArtifactSettings,
    task: TaskVariant,
) -> Result<LoadedModel, CoreError> {
    let unavailable = |e: anyhow::Error| CoreError::ArtifactUnavailable {
        task,
        reason: format!("{:#}", e),
    };
    let started = Instant::now();

    let raw_config = std::fs::read_to_string(dir.join(CONFIG_FILE))
        .with_context(|| format!("Failed to read {}", CONFIG_FILE))
        .map_err(unavailable)?;
    let config_value: serde_json::Value = serde_json::from_str(&raw_config)
        .with_context(|| format!("Failed to parse {}", CONFIG_FILE))
        .map_err(unavailable)?;

    let expected = task.class_count();
    if let Some(declared) = declared_class_count(&config_value) {
        if declared != expected {
            return Err(CoreError::ArtifactMismatch {
                task,
                expected,
                actual: declared,
            });
        }
    }

    let labels = match std::fs::read_to_string(dir.join(LABEL_MAP_FILE)) {
        Ok(raw) => {
            let labels = LabelMap::from_json(&raw)
                .with_context(|| format!("Failed to parse {}", LABEL_MAP_FILE))
                .map_err(unavailable)?;
            if labels.len() != expected {
                return Err(CoreError::ArtifactMismatch {
                    task,
                    expected,
                    actual: labels.len(),
                });
            }
            Some(labels)
        }
        Err(_) => None,
    };

    let device = settings.device.select().map_err(unavailable)?;
    let tensors = read_tensors(dir, &device).map_err(unavailable)?;
    // The head is authoritative when config.json is silent or wrong
    if let Some(actual) = head_width(&tensors) {
        if actual != expected {
            return Err(CoreError::ArtifactMismatch {
                task,
                expected,
                actual,
            });
        }
    }

    let bert_config: BertConfig = serde_json::from_value(config_value)
        .with_context(|| format!("{} is not a BERT configuration", CONFIG_FILE))
        .map_err(unavailable)?;
    let max_length = settings
        .max_length
        .min(bert_config.max_position_embeddings);

    let tokenizer = load_tokenizer(dir, max_length).map_err(unavailable)?;
    let vocab_size = tokenizer.get_vocab_size(true);
    let (model, pooler, classifier) =
        load_weights(tensors, &bert_config, expected, &device).map_err(unavailable)?;

    let info = ArtifactInfo {
        directory: Some(dir.to_path_buf()),
        device: device_name(&device).to_string(),
        max_length,
        num_labels: expected,
        vocab_size,
    };
    info!(
        target: TARGET_MODEL,
        "Loaded {} from {} on {} in {:?} (vocab {}, max length {})",
        task,
        dir.display(),
        info.device,
        started.elapsed(),
        vocab_size,
        max_length
    );

    Ok(LoadedModel {
        classifier: Box::new(BertSequenceClassifier {
            model,
            pooler,
            classifier,
            tokenizer,
            device,
        }),
        info,
        labels,
    })
}
