// ============================================================
// Layer 2 — EncodeUseCase
// ============================================================
//   Step 1: Read the config and the id rows     (Layer 6 - infra)
//   Step 2: Load the embedding with weights     (Layer 5 - ml)
//   Step 3: Pad the rows into one batch         (Layer 4 - data)
//   Step 4: Encode and copy the result to host  (Layer 5 - ml)
//
// Id files hold one sequence per line, ids separated by
// whitespace. Blank lines are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::{data::dataloader::batcher::Batcher, prelude::*};
use serde::Serialize;

use crate::application::{build_embedding, read_config};
use crate::data::batcher::{TokenBatch, TokenBatcher};
use crate::domain::config::EmbeddingConfig;
use crate::domain::input::InputKind;
use crate::infra::weights::WeightSet;
use crate::ml::embeddings::{EmbedInput, Embeddings, Encoded};
use crate::ml::params::float_values;
use crate::ml::tlm::{TransformerLMEmbeddingsModel, TransformerLMPooledEmbeddingsModel};

#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub config_path:  PathBuf,
    pub tag:          String,
    pub weights_path: PathBuf,
    pub ids_path:     PathBuf,
    pub max_len:      Option<usize>,
}

/// Host copy of an encoder output.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedOutput {
    pub shape:   Vec<usize>,
    pub pooled:  bool,
    /// Unpadded length of every input row
    pub lengths: Vec<usize>,
    pub values:  Vec<f32>,
}

pub fn read_id_rows(path: &Path) -> Result<Vec<Vec<u32>>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read ids '{}'", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            line.split_whitespace()
                .map(|tok| {
                    tok.parse::<u32>()
                        .with_context(|| format!("{}:{}: bad id '{tok}'", path.display(), n + 1))
                })
                .collect()
        })
        .collect()
}

pub struct EncodeUseCase<B: Backend> {
    device: B::Device,
}

impl<B: Backend> EncodeUseCase<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    fn load(&self, tag: &str, config: EmbeddingConfig, weights: &WeightSet) -> Result<Box<dyn Embeddings<B>>> {
        let embedding: Box<dyn Embeddings<B>> = match tag {
            "tlm-words-embed" => Box::new(TransformerLMEmbeddingsModel::<B>::load(config, weights, &self.device)?),
            "tlm-words-embed-pooled" => {
                Box::new(TransformerLMPooledEmbeddingsModel::<B>::load(config, weights, &self.device)?)
            }
            other => {
                let mut embedding = build_embedding::<B>(Some(other), other, config, &self.device)?;
                embedding.load_weights(weights)?;
                embedding
            }
        };
        Ok(embedding)
    }

    pub fn execute(&self, req: &EncodeRequest) -> Result<EncodedOutput> {
        let config = read_config(&req.config_path)?;
        let rows = read_id_rows(&req.ids_path)?;
        if rows.is_empty() {
            bail!("No id rows in '{}'", req.ids_path.display());
        }

        let weights = WeightSet::load_safetensors(&req.weights_path)
            .with_context(|| format!("Failed to read weights '{}'", req.weights_path.display()))?;
        let embedding = self.load(&req.tag, config, &weights)?;
        if embedding.input_kind() != InputKind::Words {
            bail!("'{}' reads {}; encode takes word id rows", req.tag, embedding.input_kind());
        }

        let count = rows.len();
        let TokenBatch { input_ids, lengths } = TokenBatcher::new(req.max_len).batch(rows, &self.device);
        tracing::info!("Encoding {} rows (padded to {:?})", count, input_ids.dims());

        let (shape, pooled, values) = match embedding.encode(EmbedInput::Words(input_ids))? {
            Encoded::Tokens(t) => (t.dims().to_vec(), false, float_values(t)?),
            Encoded::Pooled(t) => (t.dims().to_vec(), true, float_values(t)?),
        };
        Ok(EncodedOutput { shape, pooled, lengths, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::init_weights_use_case::{InitWeightsRequest, InitWeightsUseCase, WEIGHTS_FILE};
    use burn::backend::NdArray;

    const SMALL_TLM: &str = r#"{
        "vsz": 20, "d_model": 8, "layers": 1, "num_heads": 2, "d_ff": 16,
        "dropout": 0.0, "embeddings_dropout": 0.0, "pooling": "mean"
    }"#;

    fn init_then_encode(tag: &str) -> EncodedOutput {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        let ids_path = dir.path().join("ids.txt");
        fs::write(&config_path, SMALL_TLM).unwrap();
        fs::write(&ids_path, "3 4 5\n6 7\n").unwrap();

        let out_dir = dir.path().join("ckpt");
        InitWeightsUseCase::<NdArray>::new(Default::default())
            .execute(&InitWeightsRequest {
                config_path: config_path.clone(),
                tag: Some(tag.to_string()),
                name: tag.to_string(),
                out_dir: out_dir.clone(),
            })
            .unwrap();

        EncodeUseCase::<NdArray>::new(Default::default())
            .execute(&EncodeRequest {
                config_path,
                tag: tag.to_string(),
                weights_path: out_dir.join(WEIGHTS_FILE),
                ids_path,
                max_len: None,
            })
            .unwrap()
    }

    #[test]
    fn test_init_weights_then_encode_tokens() {
        let output = init_then_encode("tlm-words-embed");
        assert_eq!(output.shape, vec![2, 3, 8]);
        assert!(!output.pooled);
        assert_eq!(output.lengths, vec![3, 2]);
        assert_eq!(output.values.len(), 2 * 3 * 8);
    }

    #[test]
    fn test_init_weights_then_encode_pooled() {
        let output = init_then_encode("tlm-words-embed-pooled");
        assert_eq!(output.shape, vec![2, 8]);
        assert!(output.pooled);
        assert!(output.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_read_id_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        fs::write(&path, "5 6 7\n\n8\n").unwrap();
        assert_eq!(read_id_rows(&path).unwrap(), vec![vec![5, 6, 7], vec![8]]);

        fs::write(&path, "5 x\n").unwrap();
        assert!(read_id_rows(&path).is_err());
    }
}
