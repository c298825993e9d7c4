// ============================================================
// Layer 5 — Embeddings Registry
// ============================================================
// Maps a type tag ("default", "char-conv", "tlm-words-embed", ...)
// to a constructor. Variants are registered explicitly:
//
//   let registry = EmbeddingsRegistry::<B>::with_defaults();
//   let embed = registry.create("learned-positional", "x", config, &device)?;
//
// `simple()` holds every variant except the transformer LM ones.
// Those are also registered as stack members, which is how a TLM
// builds its own word embedding (`create_member`).

use std::collections::BTreeMap;
use std::sync::Arc;

use burn::prelude::*;

use crate::domain::config::EmbeddingConfig;
use crate::domain::error::{EmbeddingError, Result};
use crate::domain::input::InputKind;
use crate::domain::pretrained::PretrainedVectors;
use crate::ml::char_conv::CharConvEmbeddings;
use crate::ml::char_lstm::CharLSTMEmbeddings;
use crate::ml::char_transformer::CharTransformerEmbeddings;
use crate::ml::embeddings::{Compose, Embeddings, EmbeddingsModel};
use crate::ml::lookup::LookupTableEmbeddings;
use crate::ml::positional::{
    LearnedPositionalCharConvEmbeddings, LearnedPositionalCharLSTMEmbeddings,
    LearnedPositionalLookupTableEmbeddings, LearnedPositionalLookupTableEmbeddingsWithBias,
    PositionalCharConvEmbeddings, PositionalCharLSTMEmbeddings, PositionalLookupTableEmbeddings,
};
use crate::ml::stack::StackMember;
use crate::ml::tlm::{TransformerLMEmbeddings, TransformerLMPooledEmbeddings};

type CreateFn<B> = fn(
    &str,
    InputKind,
    EmbeddingConfig,
    Option<Arc<PretrainedVectors>>,
    &<B as Backend>::Device,
) -> Result<Box<dyn Embeddings<B>>>;

fn create_model<B: Backend, C: Compose<B>>(
    name:       &str,
    input:      InputKind,
    config:     EmbeddingConfig,
    pretrained: Option<Arc<PretrainedVectors>>,
    device:     &B::Device,
) -> Result<Box<dyn Embeddings<B>>> {
    Ok(Box::new(EmbeddingsModel::<B, C>::new(name, input, config, pretrained, device)?))
}

type MemberFn<B> = fn(&EmbeddingConfig, &<B as Backend>::Device) -> Result<StackMember<B>>;

fn build_member<B: Backend, C: Compose<B> + Into<StackMember<B>>>(
    config: &EmbeddingConfig,
    device: &B::Device,
) -> Result<StackMember<B>> {
    Ok(C::build(config, None, device)?.into())
}

struct Entry<B: Backend> {
    class:  String,
    input:  InputKind,
    create: CreateFn<B>,
    member: Option<MemberFn<B>>,
}

pub struct EmbeddingsRegistry<B: Backend> {
    entries: BTreeMap<String, Entry<B>>,
}

impl<B: Backend> Default for EmbeddingsRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> EmbeddingsRegistry<B> {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    /// Table, char and positional variants.
    pub fn simple() -> Self {
        use InputKind::{Chars, Words};

        let mut registry = Self::new();
        registry
            .register_member::<LookupTableEmbeddings<B>>("default", Words)
            .register_member::<CharConvEmbeddings<B>>("char-conv", Chars)
            .register_member::<CharLSTMEmbeddings<B>>("char-lstm", Chars)
            .register_member::<CharTransformerEmbeddings<B>>("char-transformer", Chars)
            .register_member::<PositionalLookupTableEmbeddings<B>>("positional", Words)
            .register_member::<LearnedPositionalLookupTableEmbeddings<B>>("learned-positional", Words)
            .register_member::<LearnedPositionalLookupTableEmbeddingsWithBias<B>>("learned-positional-w-bias", Words)
            .register_member::<PositionalCharConvEmbeddings<B>>("positional-char-conv", Chars)
            .register_member::<LearnedPositionalCharConvEmbeddings<B>>("learned-positional-char-conv", Chars)
            .register_member::<PositionalCharLSTMEmbeddings<B>>("positional-char-lstm", Chars)
            .register_member::<LearnedPositionalCharLSTMEmbeddings<B>>("learned-positional-char-lstm", Chars);
        registry
    }

    /// Every built-in variant.
    pub fn with_defaults() -> Self {
        let mut registry = Self::simple();
        registry.register::<TransformerLMEmbeddings<B>>("tlm-words-embed", InputKind::Words);
        registry.register::<TransformerLMPooledEmbeddings<B>>("tlm-words-embed-pooled", InputKind::Words);
        registry
    }

    /// Associate `tag` with compute type `C`. A later registration
    /// under the same tag replaces the earlier one.
    pub fn register<C: Compose<B>>(&mut self, tag: &str, input: InputKind) -> &mut Self {
        self.insert(tag, Entry { class: C::class_name(), input, create: create_model::<B, C>, member: None })
    }

    /// `register`, and also allow `tag` inside an embeddings stack.
    pub fn register_member<C>(&mut self, tag: &str, input: InputKind) -> &mut Self
    where
        C: Compose<B> + Into<StackMember<B>>,
    {
        self.insert(
            tag,
            Entry {
                class: C::class_name(),
                input,
                create: create_model::<B, C>,
                member: Some(build_member::<B, C>),
            },
        )
    }

    fn insert(&mut self, tag: &str, entry: Entry<B>) -> &mut Self {
        if let Some(old) = self.entries.insert(tag.to_string(), entry) {
            tracing::warn!("Embedding tag '{}' re-registered (was {})", tag, old.class);
        }
        self
    }

    fn entry(&self, tag: &str) -> Result<&Entry<B>> {
        self.entries
            .get(tag)
            .ok_or_else(|| EmbeddingError::UnregisteredVariant(tag.to_string()))
    }

    pub fn create(
        &self,
        tag:    &str,
        name:   &str,
        config: EmbeddingConfig,
        device: &B::Device,
    ) -> Result<Box<dyn Embeddings<B>>> {
        let entry = self.entry(tag)?;
        (entry.create)(name, entry.input, config, None, device)
    }

    /// Build the bare compute for a stack member. Fails for tags
    /// that were registered without member support.
    pub fn create_member(&self, tag: &str, config: &EmbeddingConfig, device: &B::Device) -> Result<StackMember<B>> {
        let entry = self.entry(tag)?;
        let member = entry.member.ok_or_else(|| {
            EmbeddingError::InvalidConfig(format!("'{tag}' cannot be used inside an embeddings stack"))
        })?;
        member(config, device)
    }

    /// Build from in-memory pretrained vectors. `vsz`/`dsz` come
    /// from the vectors; any other keys in `overrides` apply.
    pub fn create_from_pretrained(
        &self,
        tag:        &str,
        pretrained: Arc<PretrainedVectors>,
        name:       &str,
        overrides:  EmbeddingConfig,
        device:     &B::Device,
    ) -> Result<Box<dyn Embeddings<B>>> {
        let entry = self.entry(tag)?;
        let mut config = overrides;
        config.set("vsz", pretrained.vsz);
        config.set("dsz", pretrained.dsz);
        (entry.create)(name, entry.input, config, Some(pretrained), device)
    }

    /// Rebuild an architecture from a `get_config()` / `save_md` record.
    pub fn create_from_record(
        &self,
        record: &EmbeddingConfig,
        name:   &str,
        device: &B::Device,
    ) -> Result<Box<dyn Embeddings<B>>> {
        let class = record
            .str("class")?
            .ok_or_else(|| EmbeddingError::InvalidConfig("record has no `class`".to_string()))?;
        let tag = self
            .entries
            .iter()
            .find(|(_, e)| e.class == class)
            .map(|(tag, _)| tag.clone())
            .ok_or_else(|| EmbeddingError::UnregisteredVariant(class.to_string()))?;

        let mut config = record.clone();
        config.remove("module");
        config.remove("class");
        tracing::debug!("Rebuilding '{}' as {} from record", name, tag);
        self.create(&tag, name, config, device)
    }

    pub fn class_of(&self, tag: &str) -> Option<&str> {
        self.entries.get(tag).map(|e| e.class.as_str())
    }

    pub fn input_of(&self, tag: &str) -> Option<InputKind> {
        self.entries.get(tag).map(|e| e.input)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray;

    #[test]
    fn test_default_tags_and_classes() {
        let registry = EmbeddingsRegistry::<TB>::with_defaults();
        assert_eq!(registry.tags().count(), 13);
        assert_eq!(registry.class_of("default"), Some("LookupTableEmbeddings"));
        assert_eq!(
            registry.class_of("learned-positional-char-lstm"),
            Some("LearnedPositionalCharLSTMEmbeddings")
        );
        assert_eq!(registry.class_of("tlm-words-embed"), Some("TransformerLMEmbeddings"));
        assert_eq!(registry.input_of("positional-char-conv"), Some(InputKind::Chars));
    }

    #[test]
    fn test_members_exclude_transformer_lm() {
        let registry = EmbeddingsRegistry::<TB>::with_defaults();
        let device = Default::default();
        let cfg = EmbeddingConfig::new().with("vsz", 10).with("dsz", 4);

        let member = registry.create_member("learned-positional", &cfg, &device).unwrap();
        assert_eq!(member.class_name(), "LearnedPositionalLookupTableEmbeddings");
        assert_eq!(member.input_kind(), InputKind::Words);
        assert_eq!((member.vsz(), member.dsz()), (10, 4));

        let err = registry.create_member("tlm-words-embed", &cfg, &device).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_tag() {
        let registry = EmbeddingsRegistry::<TB>::simple();
        let err = registry
            .create("elmo", "x", EmbeddingConfig::new(), &Default::default())
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::UnregisteredVariant(tag) if tag == "elmo"));
    }

    #[test]
    fn test_pretrained_dims_win() {
        let registry = EmbeddingsRegistry::<TB>::simple();
        let pv = Arc::new(PretrainedVectors::new(3, 2, vec![0.0; 6]).unwrap());
        let overrides = EmbeddingConfig::new().with("dsz", 99).with("dropout", 0.0);
        let embed = registry
            .create_from_pretrained("positional", pv, "word", overrides, &Default::default())
            .unwrap();
        assert_eq!(embed.get_vsz(), 3);
        assert_eq!(embed.get_dsz(), 2);
        assert_eq!(embed.state().f64("dropout").unwrap(), Some(0.0));
    }

    #[test]
    fn test_record_rebuilds_same_class() {
        let registry = EmbeddingsRegistry::<TB>::simple();
        let device = Default::default();
        let cfg = EmbeddingConfig::new().with("vsz", 10).with("dsz", 4).with("mxlen", 16);
        let original = registry.create("learned-positional", "x", cfg, &device).unwrap();

        let rebuilt = registry
            .create_from_record(&original.get_config(), "x", &device)
            .unwrap();
        assert_eq!(rebuilt.get_config(), original.get_config());
    }
}
