// ============================================================
// Layer 2 — DescribeUseCase
// ============================================================
//   Step 1: Read the config record          (Layer 6 - infra)
//   Step 2: Build the embedding             (Layer 5 - ml)
//   Step 3: Count its parameters            (Layer 5 - ml)
//   Step 4: Optionally save its metadata    (Layer 6 - infra)

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::prelude::*;

use crate::application::{build_embedding, read_config};
use crate::domain::config::EmbeddingConfig;

#[derive(Debug, Clone)]
pub struct DescribeRequest {
    pub config_path: PathBuf,
    pub tag:         Option<String>,
    pub name:        String,
    pub md_out:      Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Description {
    pub class:       String,
    pub input:       String,
    pub vsz:         usize,
    pub dsz:         usize,
    pub num_tensors: usize,
    pub num_params:  usize,
    pub config:      EmbeddingConfig,
}

pub struct DescribeUseCase<B: Backend> {
    device: B::Device,
}

impl<B: Backend> DescribeUseCase<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn execute(&self, req: &DescribeRequest) -> Result<Description> {
        let config = read_config(&req.config_path)?;
        let embedding = build_embedding::<B>(req.tag.as_deref(), &req.name, config, &self.device)?;
        let weights = embedding.export_weights()?;

        if let Some(path) = &req.md_out {
            embedding
                .save_md(path)
                .with_context(|| format!("Failed to write metadata '{}'", path.display()))?;
            tracing::info!("Saved metadata to '{}'", path.display());
        }

        Ok(Description {
            class:       embedding.class_name(),
            input:       embedding.input_kind().to_string(),
            vsz:         embedding.get_vsz(),
            dsz:         embedding.get_dsz(),
            num_tensors: weights.len(),
            num_params:  embedding.num_params(),
            config:      embedding.get_config(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_describe_and_save_md() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"vsz": 10, "dsz": "4"}"#).unwrap();

        let req = DescribeRequest {
            config_path,
            tag: Some("default".to_string()),
            name: "word".to_string(),
            md_out: Some(dir.path().join("out/word.json")),
        };
        let d = DescribeUseCase::<NdArray>::new(Default::default()).execute(&req).unwrap();
        assert_eq!(d.class, "LookupTableEmbeddings");
        assert_eq!(d.num_params, 40);

        let saved = crate::infra::metadata::read_md(dir.path().join("out/word.json")).unwrap();
        assert_eq!(saved, d.config);
    }
}
