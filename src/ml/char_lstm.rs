// ============================================================
// Layer 5 — Character BiLSTM Embeddings
// ============================================================
// Reads each word's characters with a bidirectional LSTM and
// keeps the final state of each direction:
//
//   chars [batch, seq, W] → char table [batch*seq, W, dsz]
//     forward  pass t = 0 .. W-1    → h_fwd at the last real char
//     backward pass t = W-1 .. 0    → h_bwd at the first char
//     concat [h_fwd, h_bwd]         → [batch, seq, lstmsz]
//
// Padding characters (id 0) leave the state unchanged, so each
// word's output reflects only its true length.
//
// Cell (per step):
//   i, f, g, o = split(W_ih x + W_hh h)
//   c' = σ(f) ⊙ c + σ(i) ⊙ tanh(g)
//   h' = σ(o) ⊙ tanh(c')

use burn::{
    nn::{Embedding, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{sigmoid, tanh},
};

use crate::domain::config::EmbeddingConfig;
use crate::domain::error::{EmbeddingError, Result};
use crate::domain::pretrained::PretrainedVectors;
use crate::infra::weights::WeightSet;
use crate::ml::embeddings::{Compose, EmbedInput, Encoded};
use crate::ml::lookup::{build_table, table_dims};
use crate::ml::params::{export_embedding, export_linear, import_embedding, import_linear, scoped};

pub const DEFAULT_LSTMSZ: usize = 50;

// ─── Cell ─────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct LstmCell<B: Backend> {
    pub ih:     Linear<B>,
    pub hh:     Linear<B>,
    pub hidden: usize,
}

impl<B: Backend> LstmCell<B> {
    pub fn new(input: usize, hidden: usize, device: &B::Device) -> Self {
        Self {
            ih: LinearConfig::new(input, 4 * hidden).init(device),
            hh: LinearConfig::new(hidden, 4 * hidden).with_bias(false).init(device),
            hidden,
        }
    }

    /// One step. x: [n, input], h/c: [n, hidden] → (h', c')
    pub fn step(&self, x: Tensor<B, 2>, h: Tensor<B, 2>, c: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [n, _] = x.dims();
        let hs = self.hidden;
        let z = self.ih.forward(x) + self.hh.forward(h);
        let gate = |k: usize| z.clone().slice([0..n, k * hs..(k + 1) * hs]);

        let i = sigmoid(gate(0));
        let f = sigmoid(gate(1));
        let g = tanh(gate(2));
        let o = sigmoid(gate(3));

        let c = f * c + i * g;
        let h = o * tanh(c.clone());
        (h, c)
    }

    /// Run over `x: [n, W, input]` in the given step order, holding the
    /// state wherever `mask: [n, W]` is 0. Returns the last state.
    fn run(&self, x: &Tensor<B, 3>, mask: &Tensor<B, 2>, steps: impl Iterator<Item = usize>) -> Tensor<B, 2> {
        let [n, _, d] = x.dims();
        let device = x.device();
        let mut h = Tensor::zeros([n, self.hidden], &device);
        let mut c = Tensor::zeros([n, self.hidden], &device);

        for t in steps {
            let x_t = x.clone().slice([0..n, t..t + 1, 0..d]).reshape([n, d]);
            let keep = mask.clone().slice([0..n, t..t + 1]).expand([n, self.hidden]);
            let hold = keep.clone().neg().add_scalar(1.0);

            let (h_new, c_new) = self.step(x_t, h.clone(), c.clone());
            h = keep.clone() * h_new + hold.clone() * h;
            c = keep * c_new + hold * c;
        }
        h
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        export_linear(out, &scoped(prefix, "ih"), &self.ih)?;
        export_linear(out, &scoped(prefix, "hh"), &self.hh)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        import_linear(&mut self.ih, &scoped(prefix, "ih"), weights)?;
        import_linear(&mut self.hh, &scoped(prefix, "hh"), weights)
    }
}

// ─── CharLSTMEmbeddings ───────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct CharLSTMEmbeddings<B: Backend> {
    pub embeddings: Embedding<B>,
    pub fwd:        LstmCell<B>,
    pub bwd:        LstmCell<B>,
    pub vsz:        usize,
    pub lstmsz:     usize,
}

impl<B: Backend> CharLSTMEmbeddings<B> {
    /// chars: [batch, seq, W] → [batch, seq, lstmsz]
    pub fn compose(&self, chars: Tensor<B, 3, Int>) -> Tensor<B, 3> {
        let [batch, seq, width] = chars.dims();
        let flat = chars.reshape([batch * seq, width]);
        let mask = flat.clone().not_equal_elem(0).float();
        let embedded = self.embeddings.forward(flat);

        let h_fwd = self.fwd.run(&embedded, &mask, 0..width);
        let h_bwd = self.bwd.run(&embedded, &mask, (0..width).rev());
        Tensor::cat(vec![h_fwd, h_bwd], 1).reshape([batch, seq, self.lstmsz])
    }
}

impl<B: Backend> Compose<B> for CharLSTMEmbeddings<B> {
    const MODULE: &'static str = module_path!();

    fn class_name() -> String {
        "CharLSTMEmbeddings".to_string()
    }

    fn build(
        config:     &EmbeddingConfig,
        pretrained: Option<&PretrainedVectors>,
        device:     &B::Device,
    ) -> Result<Self> {
        let (vsz, dsz) = table_dims(config, pretrained)?;
        let lstmsz = config.usize_or("lstmsz", DEFAULT_LSTMSZ)?;
        if lstmsz == 0 || lstmsz % 2 != 0 {
            return Err(EmbeddingError::InvalidConfig(format!(
                "`lstmsz` must be a positive even number, got {lstmsz}"
            )));
        }
        Ok(Self {
            embeddings: build_table(vsz, dsz, pretrained, device)?,
            fwd: LstmCell::new(dsz, lstmsz / 2, device),
            bwd: LstmCell::new(dsz, lstmsz / 2, device),
            vsz,
            lstmsz,
        })
    }

    fn forward(&self, input: EmbedInput<B>) -> Result<Encoded<B>> {
        Ok(Encoded::Tokens(self.compose(input.chars()?)))
    }

    fn vsz(&self) -> usize {
        self.vsz
    }

    fn dsz(&self) -> usize {
        self.lstmsz
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        export_embedding(out, &scoped(prefix, "embeddings"), &self.embeddings)?;
        self.fwd.export_weights(&scoped(prefix, "lstm.fwd"), out)?;
        self.bwd.export_weights(&scoped(prefix, "lstm.bwd"), out)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        import_embedding(&mut self.embeddings, &scoped(prefix, "embeddings"), weights)?;
        self.fwd.import_weights(&scoped(prefix, "lstm.fwd"), weights)?;
        self.bwd.import_weights(&scoped(prefix, "lstm.bwd"), weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::params::float_values;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn model(device: &<TB as Backend>::Device) -> CharLSTMEmbeddings<TB> {
        let cfg = EmbeddingConfig::new().with("vsz", 10).with("dsz", 3).with("lstmsz", 4);
        <CharLSTMEmbeddings<TB> as Compose<TB>>::build(&cfg, None, device).unwrap()
    }

    #[test]
    fn test_output_shape() {
        let device = Default::default();
        let out = model(&device).compose(Tensor::ones([2, 5, 7], &device));
        assert_eq!(out.dims(), [2, 5, 4]);
    }

    #[test]
    fn test_trailing_padding_is_ignored() {
        let device = Default::default();
        let m = model(&device);
        let short = Tensor::<TB, 3, Int>::from_ints([[[3, 4]]], &device);
        let padded = Tensor::<TB, 3, Int>::from_ints([[[3, 4, 0, 0]]], &device);
        let a = float_values(m.compose(short)).unwrap();
        let b = float_values(m.compose(padded)).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_all_padding_word_is_zero() {
        let device = Default::default();
        let out = model(&device).compose(Tensor::zeros([1, 1, 3], &device));
        assert!(float_values(out).unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_odd_lstmsz_is_invalid() {
        let device = Default::default();
        let cfg = EmbeddingConfig::new().with("vsz", 10).with("dsz", 3).with("lstmsz", 5);
        let err = <CharLSTMEmbeddings<TB> as Compose<TB>>::build(&cfg, None, &device).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidConfig(_)));
    }
}
