// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for one command each:
//
//   describe      — build an embedding from a config, report it
//   init-weights  — build an embedding, write its weights and
//                   metadata so it can be loaded elsewhere
//   encode        — load a pretrained embedding and run id
//                   batches through it
//
// Rules for this layer:
//   - No tensor math here (that's Layer 5)
//   - No printing here (that's Layer 1)
//   - Errors are anyhow, with the file path as context
//
// Reference: Clean Architecture pattern

use std::path::Path;

use anyhow::{Context, Result};
use burn::prelude::*;

use crate::domain::config::EmbeddingConfig;
use crate::infra::metadata;
use crate::ml::embeddings::Embeddings;
use crate::ml::registry::EmbeddingsRegistry;

pub mod describe_use_case;

pub mod init_weights_use_case;

pub mod encode_use_case;

/// Read a JSON embedding config (or a saved metadata record).
pub fn read_config(path: &Path) -> Result<EmbeddingConfig> {
    metadata::read_md(path).with_context(|| format!("Failed to read config '{}'", path.display()))
}

/// Build by tag when one is given, otherwise from the record's `class`.
pub fn build_embedding<B: Backend>(
    tag:    Option<&str>,
    name:   &str,
    config: EmbeddingConfig,
    device: &B::Device,
) -> Result<Box<dyn Embeddings<B>>> {
    let registry = EmbeddingsRegistry::<B>::with_defaults();
    let embedding = match tag {
        Some(tag) => registry
            .create(tag, name, config, device)
            .with_context(|| format!("Failed to build '{tag}' embedding"))?,
        None => registry
            .create_from_record(&config, name, device)
            .context("Failed to rebuild embedding from record")?,
    };
    Ok(embedding)
}
