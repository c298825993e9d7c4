#![recursion_limit = "256"]

//! Embedding sub-graphs for sequence models on Burn: lookup tables,
//! character composers, positional encodings and a transformer LM
//! embedding that loads pretrained weights and can pool its output.
//!
//! ```no_run
//! use burn::backend::NdArray;
//! use tlm_embeddings::{EmbeddingConfig, EmbeddingsRegistry};
//!
//! let registry = EmbeddingsRegistry::<NdArray>::with_defaults();
//! let config = EmbeddingConfig::new().with("vsz", 100).with("d_model", 32).with("num_heads", 4);
//! let tlm = registry.create("tlm-words-embed", "x", config, &Default::default())?;
//! # Ok::<(), tlm_embeddings::EmbeddingError>(())
//! ```

pub mod application;
pub mod data;
pub mod domain;
pub mod infra;
pub mod ml;

pub use domain::config::EmbeddingConfig;
pub use domain::error::{EmbeddingError, Result};
pub use domain::input::InputKind;
pub use domain::pretrained::PretrainedVectors;
pub use domain::vocab::Vocabulary;
pub use infra::weights::{WeightSet, WeightTensor};
pub use ml::embeddings::{EmbedInput, Embeddings, EmbeddingsModel, Encoded};
pub use ml::registry::EmbeddingsRegistry;
pub use ml::tlm::{
    Pooling, TransformerLMEmbeddings, TransformerLMEmbeddingsModel, TransformerLMPooledEmbeddings,
    TransformerLMPooledEmbeddingsModel,
};
