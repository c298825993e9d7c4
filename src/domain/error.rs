// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure in this crate is a construction-time or
// load-time misconfiguration. None of them are retried and none
// degrade to a default model; callers get the error immediately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Factory lookup for a tag (or saved class) nobody registered.
    #[error("no embeddings registered under '{0}'")]
    UnregisteredVariant(String),

    /// `detached_ref` called on embeddings that never received weights.
    #[error("embeddings '{name}' have no weights; initialize `weights` before calling detached_ref")]
    UninitializedWeights { name: String },

    /// A weight source disagrees with the constructed graph.
    #[error("weight mismatch for parameter '{name}': {reason}")]
    WeightMismatch { name: String, reason: String },

    /// The resolved vocabulary lacks a required token.
    #[error("vocabulary has no '{token}' entry")]
    MissingVocabEntry { token: String },

    /// CLS pooling saw a sequence without exactly one [CLS] id.
    #[error("cls pooling needs exactly one [CLS] per sequence, row {row} has {count}")]
    ClsCount { row: usize, count: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot read vocabulary: {0}")]
    Vocab(String),

    #[error("tensor data error: {0}")]
    Tensor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    SafeTensors(#[from] safetensors::SafeTensorError),
}

impl EmbeddingError {
    pub fn mismatch(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WeightMismatch { name: name.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_names_parameter() {
        let err = EmbeddingError::mismatch("transformer.ln.gamma", "missing from weight source");
        let msg = err.to_string();
        assert!(msg.contains("transformer.ln.gamma"));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn test_cls_count_message() {
        let err = EmbeddingError::ClsCount { row: 1, count: 0 };
        assert!(err.to_string().contains("row 1 has 0"));
    }
}
