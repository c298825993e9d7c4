// ============================================================
// Layer 6 — Embedding Metadata Files
// ============================================================
// Saves and restores the non-weight description of an embedding:
//
//   {
//     "dsz": 768, "vsz": 30522,
//     "module": "tlm_embeddings::ml::tlm",
//     "class": "TransformerLMEmbeddings",
//     "layers": 12, "num_heads": 12, ...
//   }
//
// This is enough to rebuild the architecture (not the weights)
// in another process; see EmbeddingsRegistry::create_from_record.

use std::{fs, path::Path};

use crate::domain::config::EmbeddingConfig;
use crate::domain::error::Result;

/// Write a metadata record as pretty-printed JSON.
pub fn write_md(record: &EmbeddingConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(record)?;
    fs::write(path, json)?;
    tracing::debug!("Saved embedding metadata to '{}'", path.display());
    Ok(())
}

/// Read a metadata record written by `write_md`.
pub fn read_md(path: impl AsRef<Path>) -> Result<EmbeddingConfig> {
    let json = fs::read_to_string(path.as_ref())?;
    let value: serde_json::Value = serde_json::from_str(&json)?;
    EmbeddingConfig::from_value(value)
}
