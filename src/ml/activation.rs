use burn::{prelude::*, tensor::activation};
use serde::{Deserialize, Serialize};

use crate::domain::error::{EmbeddingError, Result};

/// Element-wise non-linearity selected by name in configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Gelu,
    Relu,
    Tanh,
}

impl Activation {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gelu" => Ok(Activation::Gelu),
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            other => Err(EmbeddingError::InvalidConfig(format!("unknown activation '{other}'"))),
        }
    }

    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Gelu => activation::gelu(x),
            Activation::Relu => activation::relu(x),
            Activation::Tanh => activation::tanh(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Activation::parse("GELU").unwrap(), Activation::Gelu);
        assert!(Activation::parse("swish").is_err());
    }
}
