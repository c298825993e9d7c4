// ============================================================
// Layer 5 — Transformer Encoder Stack
// ============================================================
// N identical encoder layers, each:
//
//   layer_norms_after = false (pre-norm):
//     h   = x + Dropout(SelfAttn(LN1(x), mask))
//     out = h + Dropout(FFN(LN2(h)))
//
//   layer_norms_after = true (post-norm, BERT):
//     h   = LN1(x + Dropout(SelfAttn(x, mask)))
//     out = LN2(h + Dropout(FFN(h)))
//
// Pre-norm stacks finish with one more LayerNorm; post-norm
// stacks do not.
//
// Attention is scaled dot-product over `num_heads` heads of
// width d_k (default d_model / num_heads). With `rpr_k` set,
// relative position representations are added to keys and
// values for offsets clipped to [-rpr_k, rpr_k].
//
// mask: [batch, 1, seq, seq], 1.0 = may attend, 0.0 = blocked.
//
// Reference: Vaswani et al. (2017) Attention Is All You Need
//            Shaw et al. (2018) Self-Attention with Relative
//            Position Representations

use burn::{
    module::Ignored,
    nn::{
        Dropout, DropoutConfig, Embedding, EmbeddingConfig as TableConfig, LayerNorm,
        LayerNormConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::softmax,
};

use crate::domain::error::{self, EmbeddingError};
use crate::infra::weights::WeightSet;
use crate::ml::activation::Activation;
use crate::ml::params::{
    export_embedding, export_layer_norm, export_linear, import_embedding, import_layer_norm,
    import_linear, scoped,
};

const MASKED_SCORE: f32 = -1.0e9;

/// Hyper-parameters of a `TransformerEncoderStack`.
#[derive(Config, Debug)]
pub struct TransformerEncoderStackConfig {
    pub num_heads: usize,
    pub d_model:   usize,
    pub d_ff:      usize,
    pub layers:    usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    pub d_k:     Option<usize>,
    pub rpr_k:   Option<usize>,
    #[config(default = false)]
    pub layer_norms_after: bool,
    #[config(default = 1e-12)]
    pub layer_norm_eps: f64,
    #[config(default = "Activation::Gelu")]
    pub activation: Activation,
}

impl TransformerEncoderStackConfig {
    /// Build `layers` encoder layers. `d_k` defaults to
    /// `d_model / num_heads` and must be given when that division
    /// is not exact.
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<TransformerEncoderStack<B>> {
        if self.num_heads == 0 {
            return Err(EmbeddingError::InvalidConfig("`num_heads` must be positive".to_string()));
        }
        let d_k = match self.d_k {
            Some(d_k) => d_k,
            None if self.d_model % self.num_heads == 0 => self.d_model / self.num_heads,
            None => {
                return Err(EmbeddingError::InvalidConfig(format!(
                    "d_model {} is not divisible by num_heads {}; set `d_k`",
                    self.d_model, self.num_heads
                )))
            }
        };
        let encoders = (0..self.layers)
            .map(|_| self.build_encoder_layer(d_k, device))
            .collect();
        let ln = (!self.layer_norms_after).then(|| self.layer_norm(device));
        Ok(TransformerEncoderStack { encoders, ln })
    }

    fn layer_norm<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        LayerNormConfig::new(self.d_model)
            .with_epsilon(self.layer_norm_eps)
            .init(device)
    }

    fn build_encoder_layer<B: Backend>(&self, d_k: usize, device: &B::Device) -> EncoderLayer<B> {
        let inner = self.num_heads * d_k;
        let rpr_table = |k: usize| TableConfig::new(2 * k + 1, d_k).init(device);
        let self_attn = MultiHeadedAttention {
            w_q:       LinearConfig::new(self.d_model, inner).init(device),
            w_k:       LinearConfig::new(self.d_model, inner).init(device),
            w_v:       LinearConfig::new(self.d_model, inner).init(device),
            w_o:       LinearConfig::new(inner, self.d_model).init(device),
            rpr_key:   self.rpr_k.map(rpr_table),
            rpr_value: self.rpr_k.map(rpr_table),
            dropout:   DropoutConfig::new(self.dropout).init(),
            num_heads: self.num_heads,
            d_k,
            rpr_k:     self.rpr_k.unwrap_or(0),
        };
        EncoderLayer {
            self_attn,
            ffn_linear1:       LinearConfig::new(self.d_model, self.d_ff).init(device),
            ffn_linear2:       LinearConfig::new(self.d_ff, self.d_model).init(device),
            norm1:             self.layer_norm(device),
            norm2:             self.layer_norm(device),
            dropout:           DropoutConfig::new(self.dropout).init(),
            activation:        Ignored(self.activation),
            layer_norms_after: self.layer_norms_after,
        }
    }
}

// ─── Multi-headed attention ───────────────────────────────────────────────────

/// `rel[i][j] = clamp(j - i, -k, k) + k`, row-major `[seq, seq]`.
pub fn relative_positions(seq: usize, k: usize) -> Vec<i64> {
    let k = k as i64;
    (0..seq as i64)
        .flat_map(|i| (0..seq as i64).map(move |j| (j - i).clamp(-k, k) + k))
        .collect()
}

/// Scaled dot-product attention over `num_heads` heads, with
/// optional relative position tables for keys and values.
#[derive(Module, Debug)]
pub struct MultiHeadedAttention<B: Backend> {
    pub w_q:       Linear<B>,
    pub w_k:       Linear<B>,
    pub w_v:       Linear<B>,
    pub w_o:       Linear<B>,
    pub rpr_key:   Option<Embedding<B>>,
    pub rpr_value: Option<Embedding<B>>,
    pub dropout:   Dropout,
    pub num_heads: usize,
    pub d_k:       usize,
    pub rpr_k:     usize,
}

impl<B: Backend> MultiHeadedAttention<B> {
    /// x: [batch, seq, d_model], mask: [batch, 1, seq, seq] → [batch, seq, d_model]
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, seq, _] = x.dims();
        let (h, d_k) = (self.num_heads, self.d_k);

        let q = self.split_heads(self.w_q.forward(x.clone()));
        let k = self.split_heads(self.w_k.forward(x.clone()));
        let v = self.split_heads(self.w_v.forward(x));

        let mut scores = q.clone().matmul(k.swap_dims(2, 3));
        let rel = self.relative_tables(seq, &scores.device());
        if let Some((rel_k, _)) = &rel {
            // q·a_ij: [seq, batch*h, d_k] x [seq, d_k, seq]
            let q_t = q.permute([2, 0, 1, 3]).reshape([seq, batch * h, d_k]);
            let rel_scores = q_t
                .matmul(rel_k.clone().swap_dims(1, 2))
                .reshape([seq, batch, h, seq])
                .permute([1, 2, 0, 3]);
            scores = scores + rel_scores;
        }
        let scores = scores.div_scalar((d_k as f64).sqrt());

        let blocked = mask.expand([batch, h, seq, seq]).equal_elem(0.0);
        let scores = scores.mask_fill(blocked, MASKED_SCORE);
        let weights = self.dropout.forward(softmax(scores, 3));

        let mut context = weights.clone().matmul(v);
        if let Some((_, rel_v)) = rel {
            let w_t = weights.permute([2, 0, 1, 3]).reshape([seq, batch * h, seq]);
            let rel_context = w_t
                .matmul(rel_v)
                .reshape([seq, batch, h, d_k])
                .permute([1, 2, 0, 3]);
            context = context + rel_context;
        }

        let merged = context.swap_dims(1, 2).reshape([batch, seq, h * d_k]);
        self.w_o.forward(merged)
    }

    /// [batch, seq, h*d_k] → [batch, h, seq, d_k]
    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, seq, _] = x.dims();
        x.reshape([batch, seq, self.num_heads, self.d_k]).swap_dims(1, 2)
    }

    /// Key and value relative tables, each [seq, seq, d_k].
    fn relative_tables(&self, seq: usize, device: &B::Device) -> Option<(Tensor<B, 3>, Tensor<B, 3>)> {
        let (rpr_key, rpr_value) = (self.rpr_key.as_ref()?, self.rpr_value.as_ref()?);
        let ids = TensorData::new(relative_positions(seq, self.rpr_k), [seq, seq]);
        let ids = Tensor::<B, 2, Int>::from_data(ids, device);
        Some((rpr_key.forward(ids.clone()), rpr_value.forward(ids)))
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> error::Result<()> {
        export_linear(out, &scoped(prefix, "w_q"), &self.w_q)?;
        export_linear(out, &scoped(prefix, "w_k"), &self.w_k)?;
        export_linear(out, &scoped(prefix, "w_v"), &self.w_v)?;
        export_linear(out, &scoped(prefix, "w_o"), &self.w_o)?;
        if let Some(table) = &self.rpr_key {
            export_embedding(out, &scoped(prefix, "rpr_key"), table)?;
        }
        if let Some(table) = &self.rpr_value {
            export_embedding(out, &scoped(prefix, "rpr_value"), table)?;
        }
        Ok(())
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> error::Result<()> {
        import_linear(&mut self.w_q, &scoped(prefix, "w_q"), weights)?;
        import_linear(&mut self.w_k, &scoped(prefix, "w_k"), weights)?;
        import_linear(&mut self.w_v, &scoped(prefix, "w_v"), weights)?;
        import_linear(&mut self.w_o, &scoped(prefix, "w_o"), weights)?;
        if let Some(table) = &mut self.rpr_key {
            import_embedding(table, &scoped(prefix, "rpr_key"), weights)?;
        }
        if let Some(table) = &mut self.rpr_value {
            import_embedding(table, &scoped(prefix, "rpr_value"), weights)?;
        }
        Ok(())
    }
}

// ─── Encoder layer ────────────────────────────────────────────────────────────

/// Self-attention and a two-layer feed-forward block, each with a
/// residual connection and a LayerNorm.
#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    pub self_attn:         MultiHeadedAttention<B>,
    pub ffn_linear1:       Linear<B>,
    pub ffn_linear2:       Linear<B>,
    pub norm1:             LayerNorm<B>,
    pub norm2:             LayerNorm<B>,
    pub dropout:           Dropout,
    pub activation:        Ignored<Activation>,
    pub layer_norms_after: bool,
}

impl<B: Backend> EncoderLayer<B> {
    /// x: [batch, seq, d_model], mask: [batch, 1, seq, seq] → [batch, seq, d_model]
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 4>) -> Tensor<B, 3> {
        if self.layer_norms_after {
            let attn = self.self_attn.forward(x.clone(), mask);
            let h = self.norm1.forward(x + self.dropout.forward(attn));
            let ffn = self.ffn(h.clone());
            self.norm2.forward(h + self.dropout.forward(ffn))
        } else {
            let attn = self.self_attn.forward(self.norm1.forward(x.clone()), mask);
            let h = x + self.dropout.forward(attn);
            let ffn = self.ffn(self.norm2.forward(h.clone()));
            h + self.dropout.forward(ffn)
        }
    }

    fn ffn(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = self.activation.apply(self.ffn_linear1.forward(x));
        self.ffn_linear2.forward(self.dropout.forward(hidden))
    }

    fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> error::Result<()> {
        self.self_attn.export_weights(&scoped(prefix, "self_attn"), out)?;
        export_linear(out, &scoped(prefix, "ffn_linear1"), &self.ffn_linear1)?;
        export_linear(out, &scoped(prefix, "ffn_linear2"), &self.ffn_linear2)?;
        export_layer_norm(out, &scoped(prefix, "norm1"), &self.norm1)?;
        export_layer_norm(out, &scoped(prefix, "norm2"), &self.norm2)
    }

    fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> error::Result<()> {
        self.self_attn.import_weights(&scoped(prefix, "self_attn"), weights)?;
        import_linear(&mut self.ffn_linear1, &scoped(prefix, "ffn_linear1"), weights)?;
        import_linear(&mut self.ffn_linear2, &scoped(prefix, "ffn_linear2"), weights)?;
        import_layer_norm(&mut self.norm1, &scoped(prefix, "norm1"), weights)?;
        import_layer_norm(&mut self.norm2, &scoped(prefix, "norm2"), weights)
    }
}

// ─── Stack ────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct TransformerEncoderStack<B: Backend> {
    pub encoders: Vec<EncoderLayer<B>>,
    pub ln:       Option<LayerNorm<B>>,
}

impl<B: Backend> TransformerEncoderStack<B> {
    /// x: [batch, seq, d_model], mask: [batch, 1, seq, seq] → [batch, seq, d_model]
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 4>) -> Tensor<B, 3> {
        let mut x = x;
        for layer in &self.encoders {
            x = layer.forward(x, mask.clone());
        }
        match &self.ln {
            Some(ln) => ln.forward(x),
            None => x,
        }
    }

    pub fn num_layers(&self) -> usize {
        self.encoders.len()
    }

    /// `{prefix}.encoders.{i}.*` for every layer, then `{prefix}.ln.*`
    /// on pre-norm stacks.
    pub fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> error::Result<()> {
        for (i, layer) in self.encoders.iter().enumerate() {
            layer.export_weights(&scoped(prefix, &format!("encoders.{i}")), out)?;
        }
        if let Some(ln) = &self.ln {
            export_layer_norm(out, &scoped(prefix, "ln"), ln)?;
        }
        Ok(())
    }

    /// Restore every name `export_weights` writes.
    pub fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> error::Result<()> {
        for (i, layer) in self.encoders.iter_mut().enumerate() {
            layer.import_weights(&scoped(prefix, &format!("encoders.{i}")), weights)?;
        }
        if let Some(ln) = &mut self.ln {
            import_layer_norm(ln, &scoped(prefix, "ln"), weights)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::params::float_values;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn ones_mask(batch: usize, seq: usize) -> Tensor<TB, 4> {
        Tensor::ones([batch, 1, seq, seq], &Default::default())
    }

    #[test]
    fn test_relative_positions_clip() {
        assert_eq!(relative_positions(3, 1), vec![1, 2, 2, 0, 1, 2, 0, 0, 1]);
    }

    #[test]
    fn test_stack_preserves_shape() {
        let device = Default::default();
        let stack = TransformerEncoderStackConfig::new(4, 32, 64, 2)
            .init::<TB>(&device)
            .unwrap();
        assert_eq!(stack.num_layers(), 2);
        let x = Tensor::<TB, 3>::ones([2, 5, 32], &device);
        let out = stack.forward(x, ones_mask(2, 5));
        assert_eq!(out.dims(), [2, 5, 32]);
    }

    #[test]
    fn test_custom_d_k_and_rpr() {
        let device = Default::default();
        let stack = TransformerEncoderStackConfig::new(3, 16, 32, 1)
            .with_d_k(Some(8))
            .with_rpr_k(Some(2))
            .with_layer_norms_after(true)
            .init::<TB>(&device)
            .unwrap();
        assert!(stack.ln.is_none());

        let mut weights = WeightSet::new();
        stack.export_weights("transformer", &mut weights).unwrap();
        assert_eq!(weights.get("transformer.encoders.0.self_attn.w_q.weight").unwrap().shape, vec![16, 24]);
        assert_eq!(weights.get("transformer.encoders.0.self_attn.rpr_key.weight").unwrap().shape, vec![5, 8]);

        let x = Tensor::<TB, 3>::ones([1, 6, 16], &device);
        let out = stack.forward(x, ones_mask(1, 6));
        assert_eq!(out.dims(), [1, 6, 16]);
        assert!(float_values(out).unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_module_counts_every_exported_parameter() {
        let device = Default::default();
        let stack = TransformerEncoderStackConfig::new(2, 8, 16, 2)
            .with_rpr_k(Some(3))
            .init::<TB>(&device)
            .unwrap();
        let mut weights = WeightSet::new();
        stack.export_weights("", &mut weights).unwrap();
        assert_eq!(stack.num_params(), weights.num_params());
    }

    #[test]
    fn test_indivisible_heads_need_d_k() {
        let device = Default::default();
        let err = TransformerEncoderStackConfig::new(3, 16, 32, 1)
            .init::<TB>(&device)
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidConfig(_)));
    }

    #[test]
    fn test_blocked_keys_do_not_leak() {
        // With key 1 blocked for every query, changing token 1 must
        // not change the output at token 0.
        let device = Default::default();
        let stack = TransformerEncoderStackConfig::new(2, 8, 16, 1)
            .with_dropout(0.0)
            .init::<TB>(&device)
            .unwrap();
        let mask = Tensor::<TB, 1>::from_floats([1.0, 0.0, 1.0, 0.0], &device).reshape([1, 1, 2, 2]);

        let a = Tensor::<TB, 3>::from_floats([[[0.1; 8], [0.5; 8]]], &device);
        let b = Tensor::<TB, 3>::from_floats([[[0.1; 8], [-3.0; 8]]], &device);
        let out_a = stack.forward(a, mask.clone()).slice([0..1, 0..1, 0..8]);
        let out_b = stack.forward(b, mask).slice([0..1, 0..1, 0..8]);

        let va = float_values(out_a).unwrap();
        let vb = float_values(out_b).unwrap();
        for (x, y) in va.iter().zip(&vb) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}
