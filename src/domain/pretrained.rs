// ============================================================
// Layer 3 — Pretrained Vector Table
// ============================================================
// The in-memory form of a word-vector model (word2vec, GloVe,
// ...) once it has been read: a vsz × dsz row-major matrix.
// Reading the vector files themselves is not this crate's job.

use crate::domain::error::{EmbeddingError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct PretrainedVectors {
    pub vsz:     usize,
    pub dsz:     usize,
    pub weights: Vec<f32>,
}

impl PretrainedVectors {
    /// Fails if `weights` does not hold exactly `vsz * dsz` values.
    pub fn new(vsz: usize, dsz: usize, weights: Vec<f32>) -> Result<Self> {
        if weights.len() != vsz * dsz {
            return Err(EmbeddingError::mismatch(
                "weights",
                format!("expected {vsz} x {dsz} = {} values, got {}", vsz * dsz, weights.len()),
            ));
        }
        Ok(Self { vsz, dsz, weights })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_size() {
        assert!(PretrainedVectors::new(2, 3, vec![0.0; 6]).is_ok());
        assert!(matches!(
            PretrainedVectors::new(2, 3, vec![0.0; 5]),
            Err(EmbeddingError::WeightMismatch { .. })
        ));
    }
}
