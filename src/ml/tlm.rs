// ============================================================
// Layer 5 — Transformer LM Embeddings
// ============================================================
// A pretrained transformer language model used as an embedding:
//
//   input_ids [batch, seq]
//     → EmbeddingsStack {"x": word_embed_type}   [batch, seq, dsz]
//     → projection (identity when dsz == d_model)
//     → TransformerEncoderStack(mask)            [batch, seq, d_model]
//     → output policy
//          TransformerLMEmbeddings:        detached per-token output
//          TransformerLMPooledEmbeddings:  cls | mean | max → [batch, d_model]
//
// Attention mask, [batch, 1, seq, seq]:
//   padding[b, j] = ids[b, j] != 0
//   mlm:     mask[b, i, j] = padding[b, j]
//   causal:  mask[b, i, j] = padding[b, j] * (j <= i)
//
// Reference: Radford et al. (2018) GPT
//            Devlin et al. (2019) BERT

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use burn::{
    module::Ignored,
    nn::{Linear, LinearConfig},
    prelude::*,
};

use crate::domain::config::EmbeddingConfig;
use crate::domain::error::{EmbeddingError, Result};
use crate::domain::input::InputKind;
use crate::domain::pretrained::PretrainedVectors;
use crate::domain::vocab::{Vocabulary, CLS_TOKEN};
use crate::infra::vocab_store;
use crate::infra::weights::WeightSet;
use crate::ml::activation::Activation;
use crate::ml::embeddings::{Compose, EmbedInput, EmbeddingsModel, Encoded};
use crate::ml::params::{export_linear, import_linear, int_values, scoped};
use crate::ml::registry::EmbeddingsRegistry;
use crate::ml::stack::{EmbeddingsStack, Reduction};
use crate::ml::transformer::{TransformerEncoderStack, TransformerEncoderStackConfig};

/// Name given to instances built by `load`.
pub const TLM_NAME: &str = "tlm-words-embed";

/// Key of the single word feature in the inner embeddings stack.
pub const WORD_FEATURE: &str = "x";

pub const DEFAULT_D_MODEL: usize = 768;

// ─── Masks ────────────────────────────────────────────────────────────────────

/// [batch, seq] ids → [batch, 1, 1, seq], 1.0 on non-padding tokens.
pub fn padding_mask<B: Backend>(ids: &Tensor<B, 2, Int>) -> Tensor<B, 4> {
    let [batch, seq] = ids.dims();
    ids.clone().not_equal_elem(0).float().reshape([batch, 1, 1, seq])
}

/// [1, 1, seq, seq] lower-triangular mask: position i sees j <= i.
pub fn subsequent_mask<B: Backend>(seq: usize, device: &B::Device) -> Tensor<B, 4> {
    let values = (0..seq)
        .flat_map(|i| (0..seq).map(move |j| if j <= i { 1.0f32 } else { 0.0 }))
        .collect::<Vec<_>>();
    Tensor::<B, 4>::from_data(TensorData::new(values, [1, 1, seq, seq]), device)
}

// ─── TransformerLMEmbeddings ──────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct TransformerLMEmbeddings<B: Backend> {
    pub embeddings:  EmbeddingsStack<B>,
    pub proj:        Option<Linear<B>>,
    pub transformer: TransformerEncoderStack<B>,
    vocab:           Ignored<Option<Arc<Vocabulary>>>,
    cls_index:       Ignored<Option<u32>>,
    vsz:             usize,
    d_model:         usize,
    mlm:             bool,
    finetune:        bool,
}

impl<B: Backend> TransformerLMEmbeddings<B> {
    /// `vsz` and optional `[CLS]` id from the resolved vocabulary,
    /// falling back to the config's `vsz` when there is none.
    fn resolve_vocab(config: &EmbeddingConfig) -> Result<(Option<Arc<Vocabulary>>, usize, Option<u32>)> {
        match vocab_store::resolve_vocab(config.str("vocab_file")?)? {
            Some(vocab) => {
                let vsz = vocab.vsz();
                let cls = vocab.get(CLS_TOKEN);
                Ok((Some(vocab), vsz, cls))
            }
            None => {
                let vsz = config.usize("vsz")?.ok_or_else(|| {
                    EmbeddingError::InvalidConfig("no vocabulary available and no `vsz` given".to_string())
                })?;
                Ok((None, vsz, None))
            }
        }
    }

    fn build_embeddings(
        config:  &EmbeddingConfig,
        vsz:     usize,
        d_model: usize,
        device:  &B::Device,
    ) -> Result<EmbeddingsStack<B>> {
        let registry = EmbeddingsRegistry::<B>::simple();
        let embed_type = config.str_or("word_embed_type", "learned-positional")?;
        if registry.input_of(embed_type) != Some(InputKind::Words) {
            return Err(match registry.input_of(embed_type) {
                None => EmbeddingError::UnregisteredVariant(embed_type.to_string()),
                Some(kind) => EmbeddingError::InvalidConfig(format!(
                    "word_embed_type '{embed_type}' takes {kind}, not word ids"
                )),
            });
        }

        let mut x_config = EmbeddingConfig::new().with("vsz", vsz).with("dsz", d_model);
        if let Some(mxlen) = config.usize("mxlen")? {
            x_config.set("mxlen", mxlen);
        }
        let x = registry.create_member(embed_type, &x_config, device)?;

        let reduction = match config.str("embeddings_reduction")? {
            Some(name) => name,
            None => config.str_or("reduction", "concat")?,
        };
        EmbeddingsStack::new(
            vec![(WORD_FEATURE.to_string(), x)],
            Reduction::parse(reduction)?,
            config.f64_or("embeddings_dropout", 0.1)?,
            device,
        )
    }

    fn build_transformer(config: &EmbeddingConfig, d_model: usize, device: &B::Device) -> Result<TransformerEncoderStack<B>> {
        TransformerEncoderStackConfig::new(
            config.usize_or("num_heads", 12)?,
            d_model,
            config.usize_or("d_ff", 3072)?,
            config.usize_or("layers", 12)?,
        )
        .with_dropout(config.f64_or("dropout", 0.1)?)
        .with_d_k(config.usize("d_k")?)
        .with_rpr_k(config.usize("rpr_k")?)
        .with_layer_norms_after(config.bool_or("layer_norms_after", false)?)
        .with_layer_norm_eps(config.f64_or("layer_norm_eps", 1e-12)?)
        .with_activation(Activation::parse(config.str_or("activation", "gelu")?)?)
        .init(device)
    }

    /// Mask where every position sees every other (mlm) or only
    /// itself and earlier positions (causal). [1, 1, seq, seq]
    pub fn model_mask(&self, seq: usize, device: &B::Device) -> Tensor<B, 4> {
        if self.mlm {
            Tensor::ones([1, 1, seq, seq], device)
        } else {
            subsequent_mask(seq, device)
        }
    }

    /// Padding mask combined with the model mask. [batch, 1, seq, seq]
    pub fn attention_mask(&self, ids: &Tensor<B, 2, Int>) -> Tensor<B, 4> {
        let [batch, seq] = ids.dims();
        let padding = padding_mask(ids).expand([batch, 1, seq, seq]);
        let model = self.model_mask(seq, &ids.device()).expand([batch, 1, seq, seq]);
        padding * model
    }

    /// Per-token transformer output, still attached to the graph.
    /// ids: [batch, seq] → [batch, seq, d_model]
    pub fn transform(&self, ids: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>> {
        let mask = self.attention_mask(&ids);
        let inputs = BTreeMap::from([(WORD_FEATURE.to_string(), EmbedInput::Words(ids))]);
        let embedded = self.embeddings.forward(inputs)?;
        let embedded = match &self.proj {
            Some(proj) => proj.forward(embedded),
            None => embedded,
        };
        Ok(self.transformer.forward(embedded, mask))
    }

    pub fn get_vocab(&self) -> Option<&Vocabulary> {
        self.vocab.as_deref()
    }

    pub fn cls_index(&self) -> Option<u32> {
        *self.cls_index
    }

    pub fn is_mlm(&self) -> bool {
        self.mlm
    }

    pub fn finetune(&self) -> bool {
        self.finetune
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }
}

impl<B: Backend> Compose<B> for TransformerLMEmbeddings<B> {
    const MODULE: &'static str = module_path!();

    fn class_name() -> String {
        "TransformerLMEmbeddings".to_string()
    }

    /// Weights come from a saved LM (`load`), never from word
    /// vectors, so `pretrained` is rejected.
    fn build(
        config:     &EmbeddingConfig,
        pretrained: Option<&PretrainedVectors>,
        device:     &B::Device,
    ) -> Result<Self> {
        if pretrained.is_some() {
            return Err(EmbeddingError::InvalidConfig(
                "transformer LM embeddings cannot be seeded from pretrained word vectors".to_string(),
            ));
        }
        let (vocab, vsz, cls_index) = Self::resolve_vocab(config)?;
        let d_model = match config.usize("dsz")? {
            Some(d) => d,
            None => config.usize_or("d_model", DEFAULT_D_MODEL)?,
        };

        let embeddings = Self::build_embeddings(config, vsz, d_model, device)?;
        let proj = (embeddings.dsz() != d_model)
            .then(|| LinearConfig::new(embeddings.dsz(), d_model).init(device));
        let transformer = Self::build_transformer(config, d_model, device)?;
        let mlm = config.bool_or("mlm", false)?;
        let finetune = config.bool_or("finetune", true)?;

        tracing::info!(
            "Built transformer LM embedding: vsz={}, d_model={}, layers={}, {}",
            vsz,
            d_model,
            transformer.num_layers(),
            if mlm { "masked" } else { "causal" }
        );
        Ok(Self {
            embeddings,
            proj,
            transformer,
            vocab: Ignored(vocab),
            cls_index: Ignored(cls_index),
            vsz,
            d_model,
            mlm,
            finetune,
        })
    }

    fn forward(&self, input: EmbedInput<B>) -> Result<Encoded<B>> {
        let z = self.transform(input.words()?)?;
        Ok(Encoded::Tokens(z.detach()))
    }

    fn vsz(&self) -> usize {
        self.vsz
    }

    fn dsz(&self) -> usize {
        self.d_model
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        self.embeddings.export_weights(&scoped(prefix, "embeddings"), out)?;
        if let Some(proj) = &self.proj {
            export_linear(out, &scoped(prefix, "proj"), proj)?;
        }
        self.transformer.export_weights(&scoped(prefix, "transformer"), out)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        self.embeddings.import_weights(&scoped(prefix, "embeddings"), weights)?;
        if let Some(proj) = &mut self.proj {
            import_linear(proj, &scoped(prefix, "proj"), weights)?;
        }
        self.transformer.import_weights(&scoped(prefix, "transformer"), weights)
    }
}

// ─── Pooling ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    /// The single time step whose id is the `[CLS]` id.
    Cls(u32),
    Mean,
    Max,
}

impl Pooling {
    pub fn resolve(name: &str, cls_index: Option<u32>) -> Result<Self> {
        match name {
            "cls" => cls_index
                .map(Pooling::Cls)
                .ok_or_else(|| EmbeddingError::MissingVocabEntry { token: CLS_TOKEN.to_string() }),
            "mean" => Ok(Pooling::Mean),
            "max" => Ok(Pooling::Max),
            other => Err(EmbeddingError::InvalidConfig(format!("unknown pooling '{other}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pooling::Cls(_) => "cls",
            Pooling::Mean => "mean",
            Pooling::Max => "max",
        }
    }

    /// ids: [batch, seq], z: [batch, seq, d] → [batch, d]
    pub fn pool<B: Backend>(&self, ids: &Tensor<B, 2, Int>, z: Tensor<B, 3>) -> Result<Tensor<B, 2>> {
        let [batch, seq, d] = z.dims();
        if seq == 0 {
            return match self {
                Pooling::Cls(_) => Err(EmbeddingError::ClsCount { row: 0, count: 0 }),
                _ => Err(EmbeddingError::InvalidInput("cannot pool an empty sequence".to_string())),
            };
        }
        match self {
            Pooling::Mean => Ok(z.mean_dim(1).reshape([batch, d])),
            Pooling::Max => Ok(z.max_dim(1).reshape([batch, d])),
            Pooling::Cls(cls) => {
                let host = int_values(ids.clone())?;
                for (row, chunk) in host.chunks(seq).enumerate() {
                    let count = chunk.iter().filter(|id| **id == i64::from(*cls)).count();
                    if count != 1 {
                        return Err(EmbeddingError::ClsCount { row, count });
                    }
                }
                let select = ids
                    .clone()
                    .equal_elem(*cls as i64)
                    .float()
                    .reshape([batch, seq, 1])
                    .expand([batch, seq, d]);
                Ok((z * select).sum_dim(1).reshape([batch, d]))
            }
        }
    }
}

// ─── TransformerLMPooledEmbeddings ────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct TransformerLMPooledEmbeddings<B: Backend> {
    pub base:    TransformerLMEmbeddings<B>,
    pub pooling: Ignored<Pooling>,
}

impl<B: Backend> Compose<B> for TransformerLMPooledEmbeddings<B> {
    const MODULE: &'static str = module_path!();

    fn class_name() -> String {
        "TransformerLMPooledEmbeddings".to_string()
    }

    fn build(
        config:     &EmbeddingConfig,
        pretrained: Option<&PretrainedVectors>,
        device:     &B::Device,
    ) -> Result<Self> {
        let base = TransformerLMEmbeddings::build(config, pretrained, device)?;
        let pooling = Pooling::resolve(config.str_or("pooling", "cls")?, base.cls_index())?;
        tracing::debug!("Pooling transformer output with '{}'", pooling.as_str());
        Ok(Self { base, pooling: Ignored(pooling) })
    }

    fn forward(&self, input: EmbedInput<B>) -> Result<Encoded<B>> {
        let ids = input.words()?;
        let z = self.base.transform(ids.clone())?;
        Ok(Encoded::Pooled(self.pooling.pool(&ids, z)?))
    }

    /// The all-ones warm-up batch may be all `[CLS]`, so only the
    /// unpooled encoder runs.
    fn warm_up(&self, input: InputKind, device: &B::Device) -> Result<Vec<usize>> {
        self.base.warm_up(input, device)
    }

    fn vsz(&self) -> usize {
        self.base.vsz
    }

    fn dsz(&self) -> usize {
        self.base.d_model
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        self.base.export_weights(prefix, out)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        self.base.import_weights(prefix, weights)
    }
}

// ─── Loading ──────────────────────────────────────────────────────────────────

/// Compute types built around a transformer LM.
pub trait TransformerLM<B: Backend>: Compose<B> {
    fn lm(&self) -> &TransformerLMEmbeddings<B>;
}

impl<B: Backend> TransformerLM<B> for TransformerLMEmbeddings<B> {
    fn lm(&self) -> &TransformerLMEmbeddings<B> {
        self
    }
}

impl<B: Backend> TransformerLM<B> for TransformerLMPooledEmbeddings<B> {
    fn lm(&self) -> &TransformerLMEmbeddings<B> {
        &self.base
    }
}

pub type TransformerLMEmbeddingsModel<B> = EmbeddingsModel<B, TransformerLMEmbeddings<B>>;
pub type TransformerLMPooledEmbeddingsModel<B> = EmbeddingsModel<B, TransformerLMPooledEmbeddings<B>>;

impl<B: Backend, C: TransformerLM<B>> EmbeddingsModel<B, C> {
    /// Build as `"tlm-words-embed"`, run a warm-up batch, then
    /// restore every parameter from `weights`.
    pub fn load(config: EmbeddingConfig, weights: &WeightSet, device: &B::Device) -> Result<Self> {
        Self::restore(TLM_NAME, InputKind::Words, config, weights, device)
    }

    /// `load` from a safetensors archive on disk.
    pub fn load_file(config: EmbeddingConfig, path: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let weights = WeightSet::load_safetensors(path)?;
        Self::load(config, &weights, device)
    }

    pub fn get_vocab(&self) -> Option<&Vocabulary> {
        self.compute().lm().get_vocab()
    }

    pub fn cls_index(&self) -> Option<u32> {
        self.compute().lm().cls_index()
    }

    pub fn is_mlm(&self) -> bool {
        self.compute().lm().is_mlm()
    }

    pub fn finetune(&self) -> bool {
        self.compute().lm().finetune()
    }
}
