// ============================================================
// Layer 5 — Positional Embeddings
// ============================================================
// Self-attention is permutation-invariant, so position has to
// be added to the token vectors explicitly. A positional variant
// wraps any per-token composer (lookup table, char-conv,
// char-lstm) and adds a signal keyed by sequence position:
//
//   sinusoidal:        x * sqrt(dsz) + PE[0..T]        (fixed)
//   learned:           x + P[0..T]                     (P: [mxlen, dsz])
//   learned + bias:    x + P[0..T] + b                 (b: [dsz])
//
//   PE[p, 2i]   = sin(p / ts^(2i / dsz))
//   PE[p, 2i+1] = cos(p / ts^(2i / dsz))
//
// followed by dropout.
//
// Reference: Vaswani et al. (2017) §3.5
//            Devlin et al. (2019) BERT

use std::marker::PhantomData;

use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig as TableConfig},
    prelude::*,
};

use crate::domain::config::EmbeddingConfig;
use crate::domain::error::{EmbeddingError, Result};
use crate::domain::pretrained::PretrainedVectors;
use crate::infra::weights::WeightSet;
use crate::ml::char_conv::CharConvEmbeddings;
use crate::ml::char_lstm::CharLSTMEmbeddings;
use crate::ml::embeddings::{Compose, EmbedInput, Encoded};
use crate::ml::lookup::LookupTableEmbeddings;
use crate::ml::params::{
    export_embedding, export_param, import_embedding, import_param, scoped, tensor_from_values,
};

pub const DEFAULT_MAX_TIMESCALE: f64 = 1.0e4;
pub const DEFAULT_LEARNED_MXLEN: usize = 512;

/// A signal added to `[batch, seq, dsz]` token vectors.
pub trait PositionSource<B: Backend>: Module<B> + 'static {
    const PREFIX: &'static str;
    const SUFFIX: &'static str = "";
    const DEFAULT_DROPOUT: f64;

    fn build(config: &EmbeddingConfig, dsz: usize, device: &B::Device) -> Result<Self>;

    fn apply(&self, x: Tensor<B, 3>) -> Result<Tensor<B, 3>>;

    fn export_weights(&self, _prefix: &str, _out: &mut WeightSet) -> Result<()> {
        Ok(())
    }

    fn import_weights(&mut self, _prefix: &str, _weights: &WeightSet) -> Result<()> {
        Ok(())
    }
}

// ─── Sinusoidal ───────────────────────────────────────────────────────────────

/// Row-major `[seq, dsz]` sinusoidal table.
pub fn sinusoidal_table(seq: usize, dsz: usize, max_timescale: f64) -> Vec<f32> {
    let log_ts = max_timescale.ln();
    let mut table = Vec::with_capacity(seq * dsz);
    for pos in 0..seq {
        for i in 0..dsz {
            let pair = (i / 2 * 2) as f64;
            let angle = pos as f64 * (-log_ts * pair / dsz as f64).exp();
            let value = if i % 2 == 0 { angle.sin() } else { angle.cos() };
            table.push(value as f32);
        }
    }
    table
}

#[derive(Module, Clone, Debug)]
pub struct SinusoidalPositions {
    max_timescale: f64,
}

impl<B: Backend> PositionSource<B> for SinusoidalPositions {
    const PREFIX: &'static str = "Positional";
    const DEFAULT_DROPOUT: f64 = 0.1;

    fn build(config: &EmbeddingConfig, _dsz: usize, _device: &B::Device) -> Result<Self> {
        let max_timescale = config.f64_or("max_timescale", DEFAULT_MAX_TIMESCALE)?;
        Ok(Self { max_timescale })
    }

    fn apply(&self, x: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let [batch, seq, dsz] = x.dims();
        let table = sinusoidal_table(seq, dsz, self.max_timescale);
        let pe = tensor_from_values::<B, 2>(table, [seq, dsz], &x.device())
            .unsqueeze::<3>()
            .expand([batch, seq, dsz]);
        Ok(x.mul_scalar((dsz as f64).sqrt()) + pe)
    }
}

// ─── Learned ──────────────────────────────────────────────────────────────────

fn learned_rows<B: Backend>(table: &Embedding<B>, mxlen: usize, x: &Tensor<B, 3>) -> Result<Tensor<B, 3>> {
    let [batch, seq, dsz] = x.dims();
    if seq > mxlen {
        return Err(EmbeddingError::InvalidInput(format!(
            "sequence length {seq} exceeds learned positions ({mxlen})"
        )));
    }
    let positions = Tensor::<B, 1, Int>::arange(0..seq as i64, &x.device()).reshape([1, seq]);
    Ok(table.forward(positions).expand([batch, seq, dsz]))
}

#[derive(Module, Debug)]
pub struct LearnedPositions<B: Backend> {
    pub pos_embeddings: Embedding<B>,
    pub mxlen:          usize,
}

impl<B: Backend> PositionSource<B> for LearnedPositions<B> {
    const PREFIX: &'static str = "LearnedPositional";
    const DEFAULT_DROPOUT: f64 = 0.1;

    fn build(config: &EmbeddingConfig, dsz: usize, device: &B::Device) -> Result<Self> {
        let mxlen = config.usize_or("mxlen", DEFAULT_LEARNED_MXLEN)?;
        Ok(Self { pos_embeddings: TableConfig::new(mxlen, dsz).init(device), mxlen })
    }

    fn apply(&self, x: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let pos = learned_rows(&self.pos_embeddings, self.mxlen, &x)?;
        Ok(x + pos)
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        export_embedding(out, &scoped(prefix, "pos_embeddings"), &self.pos_embeddings)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        import_embedding(&mut self.pos_embeddings, &scoped(prefix, "pos_embeddings"), weights)
    }
}

/// Learned positions plus a learned bias, the BERT layout when
/// there is no token-type feature.
#[derive(Module, Debug)]
pub struct LearnedPositionsWithBias<B: Backend> {
    pub pos_embeddings: Embedding<B>,
    pub bias:           Param<Tensor<B, 1>>,
    pub mxlen:          usize,
}

impl<B: Backend> PositionSource<B> for LearnedPositionsWithBias<B> {
    const PREFIX: &'static str = "LearnedPositional";
    const SUFFIX: &'static str = "WithBias";
    const DEFAULT_DROPOUT: f64 = 0.0;

    fn build(config: &EmbeddingConfig, dsz: usize, device: &B::Device) -> Result<Self> {
        let mxlen = config.usize_or("mxlen", DEFAULT_LEARNED_MXLEN)?;
        Ok(Self {
            pos_embeddings: TableConfig::new(mxlen, dsz).init(device),
            bias: Param::from_tensor(Tensor::zeros([dsz], device)),
            mxlen,
        })
    }

    fn apply(&self, x: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let [batch, seq, dsz] = x.dims();
        let pos = learned_rows(&self.pos_embeddings, self.mxlen, &x)?;
        let bias = self.bias.val().reshape([1, 1, dsz]).expand([batch, seq, dsz]);
        Ok(x + pos + bias)
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        export_embedding(out, &scoped(prefix, "pos_embeddings"), &self.pos_embeddings)?;
        export_param(out, scoped(prefix, "bias"), &self.bias)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        import_embedding(&mut self.pos_embeddings, &scoped(prefix, "pos_embeddings"), weights)?;
        self.bias = import_param(&self.bias, &scoped(prefix, "bias"), weights)?;
        Ok(())
    }
}

// ─── Positional wrapper ───────────────────────────────────────────────────────

/// Any per-token composer `C` plus a position source `P`.
#[derive(Module, Debug)]
pub struct PositionalEmbeddings<B: Backend, C, P> {
    pub base:      C,
    pub positions: P,
    pub dropout:   Dropout,
    _backend:      PhantomData<B>,
}

impl<B, C, P> Compose<B> for PositionalEmbeddings<B, C, P>
where
    B: Backend,
    C: Compose<B> + burn::module::ModuleDisplay,
    P: PositionSource<B> + burn::module::ModuleDisplay,
{
    const MODULE: &'static str = module_path!();

    fn class_name() -> String {
        format!("{}{}{}", P::PREFIX, C::class_name(), P::SUFFIX)
    }

    fn build(
        config:     &EmbeddingConfig,
        pretrained: Option<&PretrainedVectors>,
        device:     &B::Device,
    ) -> Result<Self> {
        let base = C::build(config, pretrained, device)?;
        let positions = P::build(config, base.dsz(), device)?;
        let dropout = DropoutConfig::new(config.f64_or("dropout", P::DEFAULT_DROPOUT)?).init();
        Ok(Self { base, positions, dropout, _backend: PhantomData })
    }

    fn forward(&self, input: EmbedInput<B>) -> Result<Encoded<B>> {
        let x = self.base.forward(input)?.tokens()?;
        let x = self.positions.apply(x)?;
        Ok(Encoded::Tokens(self.dropout.forward(x)))
    }

    fn vsz(&self) -> usize {
        self.base.vsz()
    }

    fn dsz(&self) -> usize {
        self.base.dsz()
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        self.base.export_weights(prefix, out)?;
        self.positions.export_weights(prefix, out)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        self.base.import_weights(prefix, weights)?;
        self.positions.import_weights(prefix, weights)
    }
}

// ─── Registered combinations ──────────────────────────────────────────────────

pub type PositionalLookupTableEmbeddings<B> =
    PositionalEmbeddings<B, LookupTableEmbeddings<B>, SinusoidalPositions>;
pub type LearnedPositionalLookupTableEmbeddings<B> =
    PositionalEmbeddings<B, LookupTableEmbeddings<B>, LearnedPositions<B>>;
pub type LearnedPositionalLookupTableEmbeddingsWithBias<B> =
    PositionalEmbeddings<B, LookupTableEmbeddings<B>, LearnedPositionsWithBias<B>>;
pub type PositionalCharConvEmbeddings<B> = PositionalEmbeddings<B, CharConvEmbeddings<B>, SinusoidalPositions>;
pub type LearnedPositionalCharConvEmbeddings<B> =
    PositionalEmbeddings<B, CharConvEmbeddings<B>, LearnedPositions<B>>;
pub type PositionalCharLSTMEmbeddings<B> = PositionalEmbeddings<B, CharLSTMEmbeddings<B>, SinusoidalPositions>;
pub type LearnedPositionalCharLSTMEmbeddings<B> =
    PositionalEmbeddings<B, CharLSTMEmbeddings<B>, LearnedPositions<B>>;
