// ============================================================
// Layer 5 — Lookup Table Embeddings
// ============================================================
// The plainest embedding: a vsz × dsz table indexed by token id.
//
//   input_ids [batch, seq] → table rows [batch, seq, dsz]
//
// The table starts either from pretrained vectors or from Burn's
// default initialiser.

use burn::{
    module::Param,
    nn::{Embedding, EmbeddingConfig as TableConfig},
    prelude::*,
};

use crate::domain::config::EmbeddingConfig;
use crate::domain::error::{EmbeddingError, Result};
use crate::domain::pretrained::PretrainedVectors;
use crate::infra::weights::WeightSet;
use crate::ml::embeddings::{Compose, EmbedInput, Encoded};
use crate::ml::params::{export_embedding, import_embedding, scoped, tensor_from_values};

/// Resolve `(vsz, dsz)`: pretrained vectors win, otherwise both
/// keys are required in the config.
pub fn table_dims(config: &EmbeddingConfig, pretrained: Option<&PretrainedVectors>) -> Result<(usize, usize)> {
    if let Some(pv) = pretrained {
        return Ok((pv.vsz, pv.dsz));
    }
    let vsz = config
        .usize("vsz")?
        .ok_or_else(|| EmbeddingError::InvalidConfig("`vsz` is required".to_string()))?;
    let dsz = config
        .usize("dsz")?
        .ok_or_else(|| EmbeddingError::InvalidConfig("`dsz` is required".to_string()))?;
    Ok((vsz, dsz))
}

/// A vsz × dsz table, seeded from `pretrained` when given.
pub fn build_table<B: Backend>(
    vsz:        usize,
    dsz:        usize,
    pretrained: Option<&PretrainedVectors>,
    device:     &B::Device,
) -> Result<Embedding<B>> {
    let mut table = TableConfig::new(vsz, dsz).init(device);
    if let Some(pv) = pretrained {
        if pv.vsz != vsz || pv.dsz != dsz {
            return Err(EmbeddingError::mismatch(
                "weights",
                format!("table is {vsz} x {dsz}, pretrained vectors are {} x {}", pv.vsz, pv.dsz),
            ));
        }
        table.weight = Param::from_tensor(tensor_from_values(pv.weights.clone(), [vsz, dsz], device));
    }
    Ok(table)
}

#[derive(Module, Debug)]
pub struct LookupTableEmbeddings<B: Backend> {
    pub embeddings: Embedding<B>,
    pub vsz:        usize,
    pub dsz:        usize,
}

impl<B: Backend> LookupTableEmbeddings<B> {
    /// input_ids: [batch, seq] → [batch, seq, dsz]
    pub fn lookup(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.embeddings.forward(input_ids)
    }
}

impl<B: Backend> Compose<B> for LookupTableEmbeddings<B> {
    const MODULE: &'static str = module_path!();

    fn class_name() -> String {
        "LookupTableEmbeddings".to_string()
    }

    fn build(
        config:     &EmbeddingConfig,
        pretrained: Option<&PretrainedVectors>,
        device:     &B::Device,
    ) -> Result<Self> {
        let (vsz, dsz) = table_dims(config, pretrained)?;
        let embeddings = build_table(vsz, dsz, pretrained, device)?;
        Ok(Self { embeddings, vsz, dsz })
    }

    fn forward(&self, input: EmbedInput<B>) -> Result<Encoded<B>> {
        Ok(Encoded::Tokens(self.lookup(input.words()?)))
    }

    fn vsz(&self) -> usize {
        self.vsz
    }

    fn dsz(&self) -> usize {
        self.dsz
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        export_embedding(out, &scoped(prefix, "embeddings"), &self.embeddings)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        import_embedding(&mut self.embeddings, &scoped(prefix, "embeddings"), weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn test_pretrained_rows_are_looked_up() {
        let device = Default::default();
        let pv = PretrainedVectors::new(3, 2, vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
        let table = LookupTableEmbeddings::<TB>::build(&EmbeddingConfig::new(), Some(&pv), &device).unwrap();

        let ids = Tensor::<TB, 2, Int>::from_ints([[2, 1]], &device);
        let out = table.lookup(ids);
        assert_eq!(out.dims(), [1, 2, 2]);
        let values = crate::ml::params::float_values(out).unwrap();
        assert_eq!(values, vec![3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_missing_vsz_is_invalid_config() {
        let device = Default::default();
        let cfg = EmbeddingConfig::new().with("dsz", 4);
        let err = LookupTableEmbeddings::<TB>::build(&cfg, None, &device).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_char_input() {
        let device = Default::default();
        let cfg = EmbeddingConfig::new().with("vsz", 5).with("dsz", 4);
        let table = LookupTableEmbeddings::<TB>::build(&cfg, None, &device).unwrap();
        let chars = Tensor::<TB, 3, Int>::ones([1, 2, 3], &device);
        assert!(matches!(
            table.forward(EmbedInput::Chars(chars)),
            Err(EmbeddingError::InvalidInput(_))
        ));
    }
}
