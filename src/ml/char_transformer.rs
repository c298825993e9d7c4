// ============================================================
// Layer 5 — Character Transformer Embeddings
// ============================================================
//   chars [batch, seq, W]
//     → char table + learned char positions   [batch*seq, W, dsz]
//     → encoder stack over the character axis (padding masked)
//     → mean over the real characters          [batch*seq, dsz]
//     → [batch, seq, dsz]

use burn::{
    nn::{Embedding, EmbeddingConfig as TableConfig},
    prelude::*,
};

use crate::domain::config::EmbeddingConfig;
use crate::domain::error::{EmbeddingError, Result};
use crate::domain::pretrained::PretrainedVectors;
use crate::infra::weights::WeightSet;
use crate::ml::activation::Activation;
use crate::ml::embeddings::{Compose, EmbedInput, Encoded};
use crate::ml::lookup::{build_table, table_dims};
use crate::ml::params::{export_embedding, import_embedding, scoped};
use crate::ml::transformer::{TransformerEncoderStack, TransformerEncoderStackConfig};

pub const DEFAULT_MXWLEN: usize = 64;

#[derive(Module, Debug)]
pub struct CharTransformerEmbeddings<B: Backend> {
    pub embeddings:     Embedding<B>,
    pub pos_embeddings: Embedding<B>,
    pub transformer:    TransformerEncoderStack<B>,
    pub vsz:            usize,
    pub dsz:            usize,
    pub mxwlen:         usize,
}

impl<B: Backend> CharTransformerEmbeddings<B> {
    /// chars: [batch, seq, W] → [batch, seq, dsz]
    pub fn compose(&self, chars: Tensor<B, 3, Int>) -> Result<Tensor<B, 3>> {
        let [batch, seq, width] = chars.dims();
        if width > self.mxwlen {
            return Err(EmbeddingError::InvalidInput(format!(
                "word length {width} exceeds `mxwlen` ({})",
                self.mxwlen
            )));
        }
        let n = batch * seq;
        let device = chars.device();
        let flat = chars.reshape([n, width]);
        let real = flat.clone().not_equal_elem(0).float();

        let positions = Tensor::<B, 1, Int>::arange(0..width as i64, &device).reshape([1, width]);
        let x = self.embeddings.forward(flat)
            + self.pos_embeddings.forward(positions).expand([n, width, self.dsz]);

        let mask = real.clone().reshape([n, 1, 1, width]).expand([n, 1, width, width]);
        let h = self.transformer.forward(x, mask);

        let weights = real.reshape([n, width, 1]);
        let total = (h * weights.clone().expand([n, width, self.dsz])).sum_dim(1).reshape([n, self.dsz]);
        let count = weights.sum_dim(1).reshape([n, 1]).clamp_min(1.0);
        Ok((total / count.expand([n, self.dsz])).reshape([batch, seq, self.dsz]))
    }
}

impl<B: Backend> Compose<B> for CharTransformerEmbeddings<B> {
    const MODULE: &'static str = module_path!();

    fn class_name() -> String {
        "CharTransformerEmbeddings".to_string()
    }

    fn build(
        config:     &EmbeddingConfig,
        pretrained: Option<&PretrainedVectors>,
        device:     &B::Device,
    ) -> Result<Self> {
        let (vsz, dsz) = table_dims(config, pretrained)?;
        let mxwlen = config.usize_or("mxwlen", DEFAULT_MXWLEN)?;
        let transformer = TransformerEncoderStackConfig::new(
            config.usize_or("num_heads", 4)?,
            dsz,
            config.usize_or("d_ff", 2 * dsz)?,
            config.usize_or("layers", 1)?,
        )
        .with_dropout(config.f64_or("dropout", 0.1)?)
        .with_activation(Activation::parse(config.str_or("activation", "gelu")?)?)
        .init(device)?;

        Ok(Self {
            embeddings: build_table(vsz, dsz, pretrained, device)?,
            pos_embeddings: TableConfig::new(mxwlen, dsz).init(device),
            transformer,
            vsz,
            dsz,
            mxwlen,
        })
    }

    fn forward(&self, input: EmbedInput<B>) -> Result<Encoded<B>> {
        Ok(Encoded::Tokens(self.compose(input.chars()?)?))
    }

    fn vsz(&self) -> usize {
        self.vsz
    }

    fn dsz(&self) -> usize {
        self.dsz
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        export_embedding(out, &scoped(prefix, "embeddings"), &self.embeddings)?;
        export_embedding(out, &scoped(prefix, "pos_embeddings"), &self.pos_embeddings)?;
        self.transformer.export_weights(&scoped(prefix, "transformer"), out)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        import_embedding(&mut self.embeddings, &scoped(prefix, "embeddings"), weights)?;
        import_embedding(&mut self.pos_embeddings, &scoped(prefix, "pos_embeddings"), weights)?;
        self.transformer.import_weights(&scoped(prefix, "transformer"), weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::params::float_values;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn model(device: &<TB as Backend>::Device) -> CharTransformerEmbeddings<TB> {
        let cfg = EmbeddingConfig::new()
            .with("vsz", 12)
            .with("dsz", 8)
            .with("mxwlen", 6)
            .with("dropout", 0.0);
        <CharTransformerEmbeddings<TB> as Compose<TB>>::build(&cfg, None, device).unwrap()
    }

    #[test]
    fn test_shape_and_defaults() {
        let device = Default::default();
        let m = model(&device);
        assert_eq!(m.transformer.num_layers(), 1);
        let out = m.compose(Tensor::ones([2, 3, 5], &device)).unwrap();
        assert_eq!(out.dims(), [2, 3, 8]);
    }

    #[test]
    fn test_padding_word_is_zero() {
        let device = Default::default();
        let out = model(&device).compose(Tensor::zeros([1, 1, 4], &device)).unwrap();
        assert!(float_values(out).unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_long_words_are_rejected() {
        let device = Default::default();
        let err = model(&device).compose(Tensor::ones([1, 1, 7], &device)).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidInput(_)));
    }
}
