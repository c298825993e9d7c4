// ============================================================
// Layer 5 — Embeddings Stack
// ============================================================
// Several named sub-embeddings, each fed its own input, combined
// into one [batch, seq, d] tensor:
//
//   concat          → d = Σ dsz_i
//   sum             → d = dsz (all members must agree)
//   sum-layer-norm  → LayerNorm(Σ x_i)
//
// then dropout.
//
// Members are held as `StackMember`, a Burn module enum over the
// table, char and positional variants, so a stack (and anything
// built on one) is itself a module.

use std::collections::BTreeMap;

use burn::{
    module::Ignored,
    nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig},
    prelude::*,
};

use crate::domain::error::{EmbeddingError, Result};
use crate::domain::input::InputKind;
use crate::infra::weights::WeightSet;
use crate::ml::char_conv::CharConvEmbeddings;
use crate::ml::char_lstm::CharLSTMEmbeddings;
use crate::ml::char_transformer::CharTransformerEmbeddings;
use crate::ml::embeddings::{Compose, EmbedInput};
use crate::ml::lookup::LookupTableEmbeddings;
use crate::ml::params::{export_layer_norm, import_layer_norm, scoped};
use crate::ml::positional::{
    LearnedPositionalCharConvEmbeddings, LearnedPositionalCharLSTMEmbeddings,
    LearnedPositionalLookupTableEmbeddings, LearnedPositionalLookupTableEmbeddingsWithBias,
    PositionalCharConvEmbeddings, PositionalCharLSTMEmbeddings, PositionalLookupTableEmbeddings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Concat,
    Sum,
    SumLayerNorm,
}

impl Reduction {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "concat" => Ok(Reduction::Concat),
            "sum" => Ok(Reduction::Sum),
            "sum-layer-norm" => Ok(Reduction::SumLayerNorm),
            other => Err(EmbeddingError::InvalidConfig(format!("unknown reduction '{other}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reduction::Concat => "concat",
            Reduction::Sum => "sum",
            Reduction::SumLayerNorm => "sum-layer-norm",
        }
    }
}

// ─── Members ──────────────────────────────────────────────────────────────────

macro_rules! stack_members {
    ($($variant:ident($ty:ty) => $kind:ident),* $(,)?) => {
        /// Any table, char or positional embedding that can feed a stack.
        #[derive(Module, Debug)]
        pub enum StackMember<B: Backend> {
            $($variant($ty),)*
        }

        $(
            impl<B: Backend> From<$ty> for StackMember<B> {
                fn from(member: $ty) -> Self {
                    StackMember::$variant(member)
                }
            }
        )*

        impl<B: Backend> StackMember<B> {
            pub fn input_kind(&self) -> InputKind {
                match self {
                    $(StackMember::$variant(_) => InputKind::$kind,)*
                }
            }

            pub fn class_name(&self) -> String {
                match self {
                    $(StackMember::$variant(_) => <$ty as Compose<B>>::class_name(),)*
                }
            }

            pub fn vsz(&self) -> usize {
                match self {
                    $(StackMember::$variant(m) => Compose::<B>::vsz(m),)*
                }
            }

            pub fn dsz(&self) -> usize {
                match self {
                    $(StackMember::$variant(m) => Compose::<B>::dsz(m),)*
                }
            }

            /// Per-token output of the member → [batch, seq, dsz]
            pub fn forward(&self, input: EmbedInput<B>) -> Result<Tensor<B, 3>> {
                match self {
                    $(StackMember::$variant(m) => Compose::<B>::forward(m, input)?.tokens(),)*
                }
            }

            pub fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
                match self {
                    $(StackMember::$variant(m) => Compose::<B>::export_weights(m, prefix, out),)*
                }
            }

            pub fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
                match self {
                    $(StackMember::$variant(m) => Compose::<B>::import_weights(m, prefix, weights),)*
                }
            }
        }
    };
}

stack_members! {
    Lookup(LookupTableEmbeddings<B>) => Words,
    Positional(PositionalLookupTableEmbeddings<B>) => Words,
    LearnedPositional(LearnedPositionalLookupTableEmbeddings<B>) => Words,
    LearnedPositionalWithBias(LearnedPositionalLookupTableEmbeddingsWithBias<B>) => Words,
    CharConv(CharConvEmbeddings<B>) => Chars,
    CharLstm(CharLSTMEmbeddings<B>) => Chars,
    CharTransformer(CharTransformerEmbeddings<B>) => Chars,
    PositionalCharConv(PositionalCharConvEmbeddings<B>) => Chars,
    LearnedPositionalCharConv(LearnedPositionalCharConvEmbeddings<B>) => Chars,
    PositionalCharLstm(PositionalCharLSTMEmbeddings<B>) => Chars,
    LearnedPositionalCharLstm(LearnedPositionalCharLSTMEmbeddings<B>) => Chars,
}

// ─── EmbeddingsStack ──────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct EmbeddingsStack<B: Backend> {
    members:   Vec<StackMember<B>>,
    names:     Ignored<Vec<String>>,
    reduction: Ignored<Reduction>,
    ln:        Option<LayerNorm<B>>,
    dropout:   Dropout,
    dsz:       usize,
}

impl<B: Backend> EmbeddingsStack<B> {
    /// Fails on an empty member list, and on unequal member widths
    /// for the summing reductions.
    pub fn new(
        members:   Vec<(String, StackMember<B>)>,
        reduction: Reduction,
        dropout:   f64,
        device:    &B::Device,
    ) -> Result<Self> {
        if members.is_empty() {
            return Err(EmbeddingError::InvalidConfig("embeddings stack needs at least one member".to_string()));
        }
        let widths: Vec<usize> = members.iter().map(|(_, m)| m.dsz()).collect();
        let dsz = match reduction {
            Reduction::Concat => widths.iter().sum(),
            Reduction::Sum | Reduction::SumLayerNorm => {
                if widths.iter().any(|w| *w != widths[0]) {
                    return Err(EmbeddingError::InvalidConfig(format!(
                        "'{}' needs equal member widths, got {widths:?}",
                        reduction.as_str()
                    )));
                }
                widths[0]
            }
        };
        let ln = (reduction == Reduction::SumLayerNorm).then(|| LayerNormConfig::new(dsz).init(device));
        let (names, members): (Vec<String>, Vec<StackMember<B>>) = members.into_iter().unzip();
        Ok(Self {
            members,
            names: Ignored(names),
            reduction: Ignored(reduction),
            ln,
            dropout: DropoutConfig::new(dropout).init(),
            dsz,
        })
    }

    /// Output width after reduction.
    pub fn dsz(&self) -> usize {
        self.dsz
    }

    pub fn reduction(&self) -> Reduction {
        *self.reduction
    }

    /// `(name, member)` pairs in construction order.
    pub fn members(&self) -> impl Iterator<Item = (&str, &StackMember<B>)> {
        self.names.iter().map(String::as_str).zip(self.members.iter())
    }

    pub fn get(&self, name: &str) -> Option<&StackMember<B>> {
        self.members().find(|(n, _)| *n == name).map(|(_, m)| m)
    }

    /// Each member consumes the input stored under its name.
    /// → [batch, seq, dsz]
    pub fn forward(&self, mut inputs: BTreeMap<String, EmbedInput<B>>) -> Result<Tensor<B, 3>> {
        let mut outputs = Vec::with_capacity(self.members.len());
        for (name, member) in self.names.iter().zip(&self.members) {
            let input = inputs
                .remove(name)
                .ok_or_else(|| EmbeddingError::InvalidInput(format!("no input for embedding '{name}'")))?;
            outputs.push(member.forward(input)?);
        }

        let combined = match *self.reduction {
            Reduction::Concat => Tensor::cat(outputs, 2),
            Reduction::Sum | Reduction::SumLayerNorm => {
                let mut total = outputs.remove(0);
                for x in outputs {
                    total = total + x;
                }
                match &self.ln {
                    Some(ln) => ln.forward(total),
                    None => total,
                }
            }
        };
        Ok(self.dropout.forward(combined))
    }

    /// `{prefix}.{member}.*` for every member, then
    /// `{prefix}.reduction_ln.*` for `sum-layer-norm`.
    pub fn export_weights(&self, prefix: &str, out: &mut WeightSet) -> Result<()> {
        for (name, member) in self.names.iter().zip(&self.members) {
            member.export_weights(&scoped(prefix, name), out)?;
        }
        if let Some(ln) = &self.ln {
            export_layer_norm(out, &scoped(prefix, "reduction_ln"), ln)?;
        }
        Ok(())
    }

    /// Restore every name `export_weights` writes.
    pub fn import_weights(&mut self, prefix: &str, weights: &WeightSet) -> Result<()> {
        for (name, member) in self.names.iter().zip(self.members.iter_mut()) {
            member.import_weights(&scoped(prefix, name), weights)?;
        }
        if let Some(ln) = &mut self.ln {
            import_layer_norm(ln, &scoped(prefix, "reduction_ln"), weights)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::EmbeddingConfig;
    use burn::backend::NdArray;

    type TB = NdArray;

    fn table(dsz: usize) -> StackMember<TB> {
        let cfg = EmbeddingConfig::new().with("vsz", 6).with("dsz", dsz);
        <LookupTableEmbeddings<TB> as Compose<TB>>::build(&cfg, None, &Default::default())
            .unwrap()
            .into()
    }

    fn inputs(names: &[&str]) -> BTreeMap<String, EmbedInput<TB>> {
        let device = Default::default();
        names
            .iter()
            .map(|n| (n.to_string(), EmbedInput::Words(Tensor::ones([2, 3], &device))))
            .collect()
    }

    #[test]
    fn test_concat_widths_add_up() {
        let stack = EmbeddingsStack::new(
            vec![("a".into(), table(4)), ("b".into(), table(2))],
            Reduction::Concat,
            0.0,
            &Default::default(),
        )
        .unwrap();
        assert_eq!(stack.dsz(), 6);
        assert_eq!(stack.forward(inputs(&["a", "b"])).unwrap().dims(), [2, 3, 6]);
        assert_eq!(stack.get("b").map(StackMember::dsz), Some(2));
    }

    #[test]
    fn test_sum_needs_equal_widths() {
        let err = EmbeddingsStack::new(
            vec![("a".into(), table(4)), ("b".into(), table(2))],
            Reduction::Sum,
            0.0,
            &Default::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_input_is_reported() {
        let stack =
            EmbeddingsStack::new(vec![("x".into(), table(4))], Reduction::Concat, 0.0, &Default::default())
                .unwrap();
        assert!(matches!(stack.forward(inputs(&["y"])), Err(EmbeddingError::InvalidInput(_))));
    }

    #[test]
    fn test_char_member_rejects_word_ids() {
        let cfg = EmbeddingConfig::new().with("vsz", 6).with("dsz", 4).with("wsz", 4);
        let chars: StackMember<TB> = <CharConvEmbeddings<TB> as Compose<TB>>::build(&cfg, None, &Default::default())
            .unwrap()
            .into();
        assert_eq!(chars.input_kind(), InputKind::Chars);
        assert_eq!(chars.class_name(), "CharConvEmbeddings");

        let stack = EmbeddingsStack::new(vec![("c".into(), chars)], Reduction::Concat, 0.0, &Default::default())
            .unwrap();
        assert!(matches!(stack.forward(inputs(&["c"])), Err(EmbeddingError::InvalidInput(_))));
    }

    #[test]
    fn test_weights_are_scoped_by_member() {
        let stack = EmbeddingsStack::new(
            vec![("a".into(), table(4)), ("b".into(), table(4))],
            Reduction::SumLayerNorm,
            0.0,
            &Default::default(),
        )
        .unwrap();
        let mut weights = WeightSet::new();
        stack.export_weights("embeddings", &mut weights).unwrap();
        let names: Vec<_> = weights.names().collect();
        assert_eq!(
            names,
            vec![
                "embeddings.a.embeddings.weight",
                "embeddings.b.embeddings.weight",
                "embeddings.reduction_ln.beta",
                "embeddings.reduction_ln.gamma"
            ]
        );
        assert_eq!(stack.num_params(), weights.num_params());

        let mut copy = stack.clone();
        copy.import_weights("embeddings", &weights).unwrap();
    }

    #[test]
    fn test_parse_reduction() {
        assert_eq!(Reduction::parse("sum-layer-norm").unwrap(), Reduction::SumLayerNorm);
        assert!(Reduction::parse("mean").is_err());
    }
}
