// ============================================================
// Layer 2 — InitWeightsUseCase
// ============================================================
// Produces a loadable weight source from a freshly built graph:
//
//   <out_dir>/weights.safetensors   every parameter, by name
//   <out_dir>/embeddings.json       metadata record
//
//   Step 1: Read the config record          (Layer 6 - infra)
//   Step 2: Build the embedding             (Layer 5 - ml)
//   Step 3: Export and write the weights    (Layer 5 → 6)
//   Step 4: Write the metadata record       (Layer 6 - infra)

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::prelude::*;

use crate::application::{build_embedding, read_config};

pub const WEIGHTS_FILE: &str = "weights.safetensors";
pub const METADATA_FILE: &str = "embeddings.json";

#[derive(Debug, Clone)]
pub struct InitWeightsRequest {
    pub config_path: PathBuf,
    pub tag:         Option<String>,
    pub name:        String,
    pub out_dir:     PathBuf,
}

#[derive(Debug, Clone)]
pub struct InitWeightsOutcome {
    pub weights_path:  PathBuf,
    pub metadata_path: PathBuf,
    pub num_tensors:   usize,
    pub num_params:    usize,
}

pub struct InitWeightsUseCase<B: Backend> {
    device: B::Device,
}

impl<B: Backend> InitWeightsUseCase<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn execute(&self, req: &InitWeightsRequest) -> Result<InitWeightsOutcome> {
        let config = read_config(&req.config_path)?;
        let embedding = build_embedding::<B>(req.tag.as_deref(), &req.name, config, &self.device)?;

        fs::create_dir_all(&req.out_dir)
            .with_context(|| format!("Failed to create '{}'", req.out_dir.display()))?;

        let weights = embedding.export_weights()?;
        let weights_path = req.out_dir.join(WEIGHTS_FILE);
        weights
            .save_safetensors(&weights_path)
            .with_context(|| format!("Failed to write weights '{}'", weights_path.display()))?;

        let metadata_path = req.out_dir.join(METADATA_FILE);
        embedding
            .save_md(&metadata_path)
            .with_context(|| format!("Failed to write metadata '{}'", metadata_path.display()))?;

        tracing::info!(
            "Initialised {} ({} tensors, {} params) in '{}'",
            embedding.class_name(),
            weights.len(),
            weights.num_params(),
            req.out_dir.display()
        );
        Ok(InitWeightsOutcome {
            weights_path,
            metadata_path,
            num_tensors: weights.len(),
            num_params: weights.num_params(),
        })
    }
}
