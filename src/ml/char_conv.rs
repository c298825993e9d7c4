// ============================================================
// Layer 5 — Character Convolution Embeddings
// ============================================================
// Builds one vector per word from its characters:
//
//   chars [batch, seq, W]
//     → char table          [batch*seq, W, dsz]
//     → per filter width k: zero-pad to W windows of k chars,
//                           Linear(k*dsz → wsz), max over windows
//     → concat filters      [batch*seq, wsz * |filtsz|]
//     → activation
//     → num_gates × gate    (skip or highway)
//     → optional projection [batch*seq, projsz]
//     → [batch, seq, out]
//
// A width-k convolution is a Linear layer over the flattened
// k-character window.
//
// Reference: Kim et al. (2016) Character-Aware Neural Language Models

use burn::{
    module::Ignored,
    nn::{Embedding, Linear, LinearConfig},
    prelude::*,
    tensor::activation::{relu, sigmoid},
};

use crate::domain::config::EmbeddingConfig;
use crate::domain::error::{EmbeddingError, Result};
use crate::domain::pretrained::PretrainedVectors;
use crate::infra::weights::WeightSet;
use crate::ml::activation::Activation;
use crate::ml::embeddings::{Compose, EmbedInput, Encoded};
use crate::ml::lookup::{build_table, table_dims};
use crate::ml::params::{export_embedding, export_linear, import_embedding, import_linear, scoped};

pub const DEFAULT_WSZ: usize = 30;
pub const DEFAULT_FILTSZ: [usize; 1] = [3];

// ─── Gating ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gating {
    /// `x + relu(W x)`
    Skip,
    /// `t * relu(H x) + (1 - t) * x`, `t = sigmoid(T x)`
    Highway,
}

impl Gating {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "skip" => Ok(Gating::Skip),
            "highway" => Ok(Gating::Highway),
            other => Err(EmbeddingError::InvalidConfig(format!("unknown gating '{other}'"))),
        }
    }
}

/// One gating layer; `transform` is present only for highway gates.
#[derive(Module, Debug)]
pub struct GateLayer<B: Backend> {
    pub proj:      Linear<B>,
    pub transform: Option<Linear<B>>,
}

impl<B: Backend> GateLayer<B> {
    fn new(gating: Gating, width: usize, device: &B::Device) -> Self {
        let transform = match gating {
            Gating::Skip => None,
            Gating::Highway => Some(LinearConfig::new(width, width).init(device)),
        };
        Self { proj: LinearConfig::new(width, width).init(device), transform }
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = relu(self.proj.forward(x.clone()));
        match &self.transform {
            None => x + h,
            Some(transform) => {
                let t = sigmoid(transform.forward(x.clone()));
                t.clone() * h + t.neg().add_scalar(1.0) * x
            }
        }
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        export_linear(out, &scoped(prefix, "proj"), &self.proj)?;
        if let Some(transform) = &self.transform {
            export_linear(out, &scoped(prefix, "transform"), transform)?;
        }
        Ok(())
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        import_linear(&mut self.proj, &scoped(prefix, "proj"), weights)?;
        if let Some(transform) = &mut self.transform {
            import_linear(transform, &scoped(prefix, "transform"), weights)?;
        }
        Ok(())
    }
}

// ─── Windowed convolution ─────────────────────────────────────────────────────

/// Every length-`k` window of `x: [n, W, d]` after zero padding,
/// one window per character position → `[n, W, k*d]`.
pub fn char_windows<B: Backend>(x: Tensor<B, 3>, k: usize) -> Tensor<B, 3> {
    let [n, width, d] = x.dims();
    let device = x.device();
    let left = (k - 1) / 2;
    let right = k - 1 - left;

    let mut parts = Vec::with_capacity(3);
    if left > 0 {
        parts.push(Tensor::zeros([n, left, d], &device));
    }
    parts.push(x);
    if right > 0 {
        parts.push(Tensor::zeros([n, right, d], &device));
    }
    let padded = Tensor::cat(parts, 1);

    let windows = (0..width)
        .map(|s| padded.clone().slice([0..n, s..s + k, 0..d]).reshape([n, 1, k * d]))
        .collect();
    Tensor::cat(windows, 1)
}

// ─── CharConvEmbeddings ───────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct CharConvEmbeddings<B: Backend> {
    pub embeddings: Embedding<B>,
    pub convs:      Vec<Linear<B>>,
    pub filtsz:     Ignored<Vec<usize>>,
    pub gates:      Vec<GateLayer<B>>,
    pub proj:       Option<Linear<B>>,
    pub activation: Ignored<Activation>,
    pub vsz:        usize,
    pub dsz:        usize,
    pub outsz:      usize,
}

impl<B: Backend> CharConvEmbeddings<B> {
    /// chars: [batch, seq, W] → [batch, seq, outsz]
    pub fn compose(&self, chars: Tensor<B, 3, Int>) -> Tensor<B, 3> {
        let [batch, seq, width] = chars.dims();
        let flat = chars.reshape([batch * seq, width]);
        let embedded = self.embeddings.forward(flat);

        let pooled = self
            .convs
            .iter()
            .zip(self.filtsz.iter())
            .map(|(conv, &k)| {
                let scores = conv.forward(char_windows(embedded.clone(), k));
                let [n, _, c] = scores.dims();
                scores.max_dim(1).reshape([n, c])
            })
            .collect();
        let mut words = self.activation.apply(Tensor::cat(pooled, 1));

        for gate in &self.gates {
            words = gate.forward(words);
        }
        if let Some(proj) = &self.proj {
            words = proj.forward(words);
        }
        words.reshape([batch, seq, self.outsz])
    }
}

impl<B: Backend> Compose<B> for CharConvEmbeddings<B> {
    const MODULE: &'static str = module_path!();

    fn class_name() -> String {
        "CharConvEmbeddings".to_string()
    }

    fn build(
        config:     &EmbeddingConfig,
        pretrained: Option<&PretrainedVectors>,
        device:     &B::Device,
    ) -> Result<Self> {
        let (vsz, dsz) = table_dims(config, pretrained)?;
        let embeddings = build_table(vsz, dsz, pretrained, device)?;

        let wsz = config.usize_or("wsz", DEFAULT_WSZ)?;
        let filtsz = config.usize_list_or("filtsz", &DEFAULT_FILTSZ)?;
        if filtsz.is_empty() || filtsz.contains(&0) {
            return Err(EmbeddingError::InvalidConfig(format!(
                "`filtsz` must list positive widths, got {filtsz:?}"
            )));
        }
        let convs = filtsz
            .iter()
            .map(|&k| LinearConfig::new(k * dsz, wsz).init(device))
            .collect();

        let conv_out = wsz * filtsz.len();
        let gating = Gating::parse(config.str_or("gating", "skip")?)?;
        let num_gates = config.usize_or("num_gates", 1)?;
        let gates = (0..num_gates)
            .map(|_| GateLayer::new(gating, conv_out, device))
            .collect();

        let projsz = config.usize("projsz")?;
        let proj = projsz.map(|p| LinearConfig::new(conv_out, p).init(device));
        let activation = Activation::parse(config.str_or("activation", "tanh")?)?;

        Ok(Self {
            embeddings,
            convs,
            filtsz: Ignored(filtsz),
            gates,
            proj,
            activation: Ignored(activation),
            vsz,
            dsz,
            outsz: projsz.unwrap_or(conv_out),
        })
    }

    fn forward(&self, input: EmbedInput<B>) -> Result<Encoded<B>> {
        Ok(Encoded::Tokens(self.compose(input.chars()?)))
    }

    fn vsz(&self) -> usize {
        self.vsz
    }

    fn dsz(&self) -> usize {
        self.outsz
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        export_embedding(out, &scoped(prefix, "embeddings"), &self.embeddings)?;
        for (i, conv) in self.convs.iter().enumerate() {
            export_linear(out, &scoped(prefix, &format!("convs.{i}")), conv)?;
        }
        for (i, gate) in self.gates.iter().enumerate() {
            gate.export_weights(&scoped(prefix, &format!("gates.{i}")), out)?;
        }
        if let Some(proj) = &self.proj {
            export_linear(out, &scoped(prefix, "proj"), proj)?;
        }
        Ok(())
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        import_embedding(&mut self.embeddings, &scoped(prefix, "embeddings"), weights)?;
        for (i, conv) in self.convs.iter_mut().enumerate() {
            import_linear(conv, &scoped(prefix, &format!("convs.{i}")), weights)?;
        }
        for (i, gate) in self.gates.iter_mut().enumerate() {
            gate.import_weights(&scoped(prefix, &format!("gates.{i}")), weights)?;
        }
        if let Some(proj) = &mut self.proj {
            import_linear(proj, &scoped(prefix, "proj"), weights)?;
        }
        Ok(())
    }
}
