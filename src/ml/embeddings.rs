// ============================================================
// Layer 5 — Embeddings Contract
// ============================================================
// Every embedding variant is an EmbeddingsModel: an input
// declaration (InputKind) composed with a compute object that
// implements `Compose`. The registry hands them out as
// `Box<dyn Embeddings<B>>`.
//
//   EmbeddingsModel<B, C>
//     ├── name, recorded state, pretrained vectors
//     ├── input:   InputKind       (words vs chars)
//     └── compute: C: Compose<B>   (lookup, char-conv, TLM, ...)

use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use burn::prelude::*;

use crate::domain::config::EmbeddingConfig;
use crate::domain::error::{EmbeddingError, Result};
use crate::domain::input::InputKind;
use crate::domain::pretrained::PretrainedVectors;
use crate::infra::metadata;
use crate::infra::weights::WeightSet;
use crate::ml::params::int_values;

/// Warm-up batch used to materialise a graph before loading weights.
pub const WARMUP_BATCH: usize = 1;
pub const WARMUP_SEQ: usize = 8;

// ─── Inputs and outputs ───────────────────────────────────────────────────────

/// A batch of ids: `(batch, seq)` words or `(batch, seq, chars)`.
#[derive(Debug, Clone)]
pub enum EmbedInput<B: Backend> {
    Words(Tensor<B, 2, Int>),
    Chars(Tensor<B, 3, Int>),
}

impl<B: Backend> EmbedInput<B> {
    pub fn kind(&self) -> InputKind {
        match self {
            EmbedInput::Words(_) => InputKind::Words,
            EmbedInput::Chars(_) => InputKind::Chars,
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match self {
            EmbedInput::Words(t) => t.dims().to_vec(),
            EmbedInput::Chars(t) => t.dims().to_vec(),
        }
    }

    /// A non-padding batch of ones with the shape `kind` declares.
    pub fn warmup(kind: InputKind, device: &B::Device) -> Self {
        match kind {
            InputKind::Words => {
                EmbedInput::Words(Tensor::ones([WARMUP_BATCH, WARMUP_SEQ], device))
            }
            InputKind::Chars => {
                EmbedInput::Chars(Tensor::ones([WARMUP_BATCH, WARMUP_SEQ, WARMUP_SEQ], device))
            }
        }
    }

    /// Fails unless every id indexes a row of a `vsz`-row table.
    pub fn check_ids(&self, vsz: usize) -> Result<()> {
        let ids = match self {
            EmbedInput::Words(t) => int_values(t.clone())?,
            EmbedInput::Chars(t) => int_values(t.clone())?,
        };
        match ids.into_iter().find(|&id| id < 0 || id as usize >= vsz) {
            Some(id) => Err(EmbeddingError::InvalidInput(format!(
                "id {id} is outside the vocabulary (vsz={vsz})"
            ))),
            None => Ok(()),
        }
    }

    pub fn words(self) -> Result<Tensor<B, 2, Int>> {
        match self {
            EmbedInput::Words(t) => Ok(t),
            other => Err(rank_error(InputKind::Words, &other)),
        }
    }

    pub fn chars(self) -> Result<Tensor<B, 3, Int>> {
        match self {
            EmbedInput::Chars(t) => Ok(t),
            other => Err(rank_error(InputKind::Chars, &other)),
        }
    }
}

fn rank_error<B: Backend>(expected: InputKind, found: &EmbedInput<B>) -> EmbeddingError {
    EmbeddingError::InvalidInput(format!("expected {expected}, got ids of shape {:?}", found.dims()))
}

/// Per-token `(batch, seq, dsz)` or pooled `(batch, dsz)` output.
#[derive(Debug, Clone)]
pub enum Encoded<B: Backend> {
    Tokens(Tensor<B, 3>),
    Pooled(Tensor<B, 2>),
}

impl<B: Backend> Encoded<B> {
    pub fn dims(&self) -> Vec<usize> {
        match self {
            Encoded::Tokens(t) => t.dims().to_vec(),
            Encoded::Pooled(t) => t.dims().to_vec(),
        }
    }

    pub fn tokens(self) -> Result<Tensor<B, 3>> {
        match self {
            Encoded::Tokens(t) => Ok(t),
            Encoded::Pooled(t) => Err(EmbeddingError::InvalidInput(format!(
                "expected per-token output, got pooled {:?}",
                t.dims()
            ))),
        }
    }

    pub fn pooled(self) -> Result<Tensor<B, 2>> {
        match self {
            Encoded::Pooled(t) => Ok(t),
            Encoded::Tokens(t) => Err(EmbeddingError::InvalidInput(format!(
                "expected pooled output, got per-token {:?}",
                t.dims()
            ))),
        }
    }
}

// ─── Compute capability ───────────────────────────────────────────────────────

/// The numeric part of an embedding variant. Every compute type
/// is a Burn module, so it can sit inside a caller's own model.
pub trait Compose<B: Backend>: Module<B> + 'static {
    /// Module path reported in saved metadata.
    const MODULE: &'static str;

    /// Class name reported in saved metadata.
    fn class_name() -> String;

    fn build(
        config:     &EmbeddingConfig,
        pretrained: Option<&PretrainedVectors>,
        device:     &B::Device,
    ) -> Result<Self>;

    fn forward(&self, input: EmbedInput<B>) -> Result<Encoded<B>>;

    /// Run a synthetic all-ones batch through the graph and report
    /// the output dims.
    fn warm_up(&self, input: InputKind, device: &B::Device) -> Result<Vec<usize>> {
        Ok(self.forward(EmbedInput::warmup(input, device))?.dims())
    }

    fn vsz(&self) -> usize;

    fn dsz(&self) -> usize;

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()>;

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()>;
}

// ─── Object-safe embedding interface ──────────────────────────────────────────

pub trait Embeddings<B: Backend>: fmt::Debug + Send {
    fn name(&self) -> &str;

    fn class_name(&self) -> String;

    fn module_name(&self) -> &'static str;

    fn input_kind(&self) -> InputKind;

    fn encode(&self, input: EmbedInput<B>) -> Result<Encoded<B>>;

    fn get_vsz(&self) -> usize;

    fn get_dsz(&self) -> usize;

    /// Number of trainable scalars in the graph.
    fn num_params(&self) -> usize;

    /// Constructor kwargs as recorded (weights excluded).
    fn state(&self) -> &EmbeddingConfig;

    /// A new instance on the same pretrained weights, with no
    /// ties to anything this one was wired into.
    fn detached_ref(&self) -> Result<Box<dyn Embeddings<B>>>;

    fn export_weights(&self) -> Result<WeightSet>;

    /// Strict, all-or-nothing restore of every parameter by name.
    fn load_weights(&mut self, weights: &WeightSet) -> Result<()>;

    fn clone_boxed(&self) -> Box<dyn Embeddings<B>>;

    /// `{dsz, vsz, module, class}` overlaid by the recorded state.
    fn get_config(&self) -> EmbeddingConfig {
        let base = EmbeddingConfig::new()
            .with("dsz", self.get_dsz())
            .with("vsz", self.get_vsz())
            .with("module", self.module_name())
            .with("class", self.class_name());
        base.merged(self.state())
    }

    fn save_md(&self, path: &Path) -> Result<()> {
        metadata::write_md(&self.get_config(), path)
    }
}

// ─── EmbeddingsModel ──────────────────────────────────────────────────────────

pub struct EmbeddingsModel<B: Backend, C: Compose<B>> {
    name:       String,
    input:      InputKind,
    compute:    C,
    pretrained: Option<Arc<PretrainedVectors>>,
    state:      EmbeddingConfig,
    device:     B::Device,
    _backend:   PhantomData<B>,
}

impl<B: Backend, C: Compose<B>> EmbeddingsModel<B, C> {
    pub fn new(
        name:       impl Into<String>,
        input:      InputKind,
        config:     EmbeddingConfig,
        pretrained: Option<Arc<PretrainedVectors>>,
        device:     &B::Device,
    ) -> Result<Self> {
        let name = name.into();
        let compute = C::build(&config, pretrained.as_deref(), device)?;
        tracing::debug!(
            "Built {} '{}' (vsz={}, dsz={}, input={})",
            C::class_name(),
            name,
            compute.vsz(),
            compute.dsz(),
            input
        );
        Ok(Self {
            name,
            input,
            compute,
            pretrained,
            state: config.recorded(),
            device: device.clone(),
            _backend: PhantomData,
        })
    }

    /// Build, force one forward pass, then restore every
    /// parameter from `weights`.
    pub fn restore(
        name:    impl Into<String>,
        input:   InputKind,
        config:  EmbeddingConfig,
        weights: &WeightSet,
        device:  &B::Device,
    ) -> Result<Self> {
        let mut model = Self::new(name, input, config, None, device)?;
        let dims = model.compute.warm_up(input, device)?;
        tracing::debug!("Warm-up pass for '{}' produced {:?}", model.name, dims);
        model.load_weights(weights)?;
        tracing::info!("Restored {} tensors into '{}'", weights.len(), model.name);
        Ok(model)
    }

    pub fn compute(&self) -> &C {
        &self.compute
    }

    pub fn pretrained(&self) -> Option<&PretrainedVectors> {
        self.pretrained.as_deref()
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

impl<B: Backend, C: Compose<B>> Clone for EmbeddingsModel<B, C> {
    fn clone(&self) -> Self {
        Self {
            name:       self.name.clone(),
            input:      self.input,
            compute:    self.compute.clone(),
            pretrained: self.pretrained.clone(),
            state:      self.state.clone(),
            device:     self.device.clone(),
            _backend:   PhantomData,
        }
    }
}

impl<B: Backend, C: Compose<B>> fmt::Debug for EmbeddingsModel<B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingsModel")
            .field("name", &self.name)
            .field("class", &C::class_name())
            .field("input", &self.input)
            .field("compute", &self.compute)
            .finish()
    }
}

impl<B: Backend, C: Compose<B>> Embeddings<B> for EmbeddingsModel<B, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn class_name(&self) -> String {
        C::class_name()
    }

    fn module_name(&self) -> &'static str {
        C::MODULE
    }

    fn input_kind(&self) -> InputKind {
        self.input
    }

    fn encode(&self, input: EmbedInput<B>) -> Result<Encoded<B>> {
        if input.kind() != self.input {
            return Err(rank_error(self.input, &input));
        }
        input.check_ids(self.compute.vsz())?;
        self.compute.forward(input)
    }

    fn get_vsz(&self) -> usize {
        self.compute.vsz()
    }

    fn get_dsz(&self) -> usize {
        self.compute.dsz()
    }

    fn num_params(&self) -> usize {
        self.compute.num_params()
    }

    fn state(&self) -> &EmbeddingConfig {
        &self.state
    }

    fn detached_ref(&self) -> Result<Box<dyn Embeddings<B>>> {
        let Some(pretrained) = self.pretrained.clone() else {
            return Err(EmbeddingError::UninitializedWeights { name: self.name.clone() });
        };
        let model = Self::new(
            self.name.clone(),
            self.input,
            self.state.clone(),
            Some(pretrained),
            &self.device,
        )?;
        Ok(Box::new(model))
    }

    fn export_weights(&self) -> Result<WeightSet> {
        let mut out = WeightSet::new();
        self.compute.export_weights("", &mut out)?;
        Ok(out)
    }

    fn load_weights(&mut self, weights: &WeightSet) -> Result<()> {
        let live = self.export_weights()?;
        if let Some(extra) = weights.names().find(|n| !live.contains(n)) {
            return Err(EmbeddingError::mismatch(extra, "not a parameter of this graph"));
        }
        let mut staged = self.compute.clone();
        staged.import_weights("", weights)?;
        self.compute = staged;
        Ok(())
    }

    fn clone_boxed(&self) -> Box<dyn Embeddings<B>> {
        Box::new(self.clone())
    }
}
