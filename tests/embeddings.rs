use std::sync::Arc;

use burn::backend::NdArray;
use burn::prelude::*;
use serde_json::{json, Map, Value};

use tlm_embeddings::infra::metadata::read_md;
use tlm_embeddings::ml::params::float_values;
use tlm_embeddings::{
    EmbedInput, EmbeddingConfig, EmbeddingError, Embeddings, EmbeddingsModel, EmbeddingsRegistry, InputKind,
    PretrainedVectors, TransformerLMEmbeddings, TransformerLMEmbeddingsModel, TransformerLMPooledEmbeddingsModel,
    WeightSet,
};

type TB = NdArray;

fn device() -> <TB as Backend>::Device {
    Default::default()
}

fn tlm_config(vsz: usize, d_model: usize) -> EmbeddingConfig {
    EmbeddingConfig::new()
        .with("vsz", vsz)
        .with("d_model", d_model)
        .with("layers", 2)
        .with("num_heads", 4)
        .with("d_ff", 64)
}

fn config_for(tag: &str) -> EmbeddingConfig {
    match tag {
        "tlm-words-embed" => tlm_config(20, 8).with("layers", 1),
        "tlm-words-embed-pooled" => tlm_config(20, 8).with("layers", 1).with("pooling", "mean"),
        "char-lstm" | "positional-char-lstm" | "learned-positional-char-lstm" => {
            EmbeddingConfig::new().with("vsz", 20).with("dsz", 8).with("lstmsz", 8)
        }
        _ => EmbeddingConfig::new().with("vsz", 20).with("dsz", 8),
    }
}

fn sample_input(kind: InputKind) -> EmbedInput<TB> {
    match kind {
        InputKind::Words => EmbedInput::Words(Tensor::from_ints([[3, 4, 5, 6], [7, 8, 0, 0]], &device())),
        InputKind::Chars => EmbedInput::Chars(Tensor::ones([2, 4, 5], &device())),
    }
}

/// JSON vocabulary with `[PAD]` = 0, `[CLS]` = 1 and fillers up to `vsz - 1`.
fn write_vocab(dir: &std::path::Path, vsz: u32) -> String {
    let mut map = Map::new();
    map.insert("[PAD]".to_string(), json!(0));
    map.insert("[CLS]".to_string(), json!(1));
    for id in 2..vsz {
        map.insert(format!("tok{id}"), json!(id));
    }
    let path = dir.join("vocab.json");
    std::fs::write(&path, Value::Object(map).to_string()).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn every_registered_tag_reports_its_class() {
    let registry = EmbeddingsRegistry::<TB>::with_defaults();
    let tags: Vec<String> = registry.tags().map(str::to_string).collect();
    assert_eq!(tags.len(), 13);

    for tag in &tags {
        let embedding = registry.create(tag, "x", config_for(tag), &device()).unwrap();
        let config = embedding.get_config();
        assert_eq!(
            config.str("class").unwrap(),
            registry.class_of(tag),
            "class mismatch for '{tag}'"
        );

        let out = embedding.encode(sample_input(embedding.input_kind())).unwrap();
        let dims = out.dims();
        assert_eq!(dims[0], 2, "batch axis for '{tag}'");
        assert_eq!(*dims.last().unwrap(), embedding.get_dsz(), "width for '{tag}'");
    }
}

#[test]
fn detached_ref_reproduces_config_and_dims() {
    let registry = EmbeddingsRegistry::<TB>::simple();
    let pv = Arc::new(PretrainedVectors::new(4, 3, (0..12).map(|v| v as f32).collect()).unwrap());
    let original = registry
        .create_from_pretrained("learned-positional", pv, "word", EmbeddingConfig::new().with("mxlen", 10), &device())
        .unwrap();

    let copy = original.detached_ref().unwrap();
    assert_eq!(copy.get_config(), original.get_config());
    assert_eq!(copy.get_vsz(), 4);
    assert_eq!(copy.get_dsz(), 3);

    let a = original.export_weights().unwrap();
    let b = copy.export_weights().unwrap();
    assert_eq!(a.get("embeddings.weight"), b.get("embeddings.weight"));
}

#[test]
fn detached_ref_without_weights_fails() {
    let registry = EmbeddingsRegistry::<TB>::simple();
    let embedding = registry.create("default", "word", config_for("default"), &device()).unwrap();
    assert!(matches!(
        embedding.detached_ref(),
        Err(EmbeddingError::UninitializedWeights { name }) if name == "word"
    ));
}

#[test]
fn save_md_round_trips_get_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("md/tlm.json");
    let registry = EmbeddingsRegistry::<TB>::with_defaults();
    let config = config_for("tlm-words-embed").with("custom_key", "kept");
    let tlm = registry.create("tlm-words-embed", "tlm", config, &device()).unwrap();

    tlm.save_md(&path).unwrap();
    let record = read_md(&path).unwrap();
    assert_eq!(record, tlm.get_config());
    assert_eq!(record.str("custom_key").unwrap(), Some("kept"));
    assert_eq!(record.usize("dsz").unwrap(), Some(8));
    assert!(!record.contains("weights"));

    let rebuilt = registry.create_from_record(&record, "tlm", &device()).unwrap();
    assert_eq!(rebuilt.class_name(), "TransformerLMEmbeddings");
    assert_eq!(rebuilt.get_dsz(), 8);
}

#[test]
fn end_to_end_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let vocab_file = write_vocab(dir.path(), 100);

    let ids: Vec<i64> = (2..18).collect();
    let batch = Tensor::<TB, 1, Int>::from_ints(ids.as_slice(), &device()).reshape([2, 8]);

    let tlm = EmbeddingsModel::<TB, TransformerLMEmbeddings<TB>>::new(
        "tlm",
        InputKind::Words,
        tlm_config(100, 32),
        None,
        &device(),
    )
    .unwrap();
    let out = tlm.encode(EmbedInput::Words(batch.clone())).unwrap().tokens().unwrap();
    assert_eq!(out.dims(), [2, 8, 32]);
    assert_eq!(tlm.get_dsz(), 32);

    let registry = EmbeddingsRegistry::<TB>::with_defaults();
    let pooled = registry
        .create("tlm-words-embed-pooled", "pooled", tlm_config(100, 32).with("vocab_file", vocab_file), &device())
        .unwrap();
    assert_eq!(pooled.get_vsz(), 100);

    let with_cls = Tensor::<TB, 2, Int>::from_ints([[1, 5, 6, 7, 8, 9, 10, 11], [12, 13, 1, 14, 15, 16, 0, 0]], &device());
    let out = pooled.encode(EmbedInput::Words(with_cls)).unwrap().pooled().unwrap();
    assert_eq!(out.dims(), [2, 32]);
}

#[test]
fn cls_pooling_requires_cls_in_vocab() {
    let registry = EmbeddingsRegistry::<TB>::with_defaults();
    let err = registry
        .create("tlm-words-embed-pooled", "pooled", tlm_config(100, 32), &device())
        .unwrap_err();
    assert!(matches!(err, EmbeddingError::MissingVocabEntry { .. }));
}

#[test]
fn load_restores_exported_weights() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("weights.safetensors");
    let config = tlm_config(50, 16).with("dropout", 0.0).with("embeddings_dropout", 0.0);

    let source = TransformerLMEmbeddingsModel::<TB>::new("src", InputKind::Words, config.clone(), None, &device())
        .unwrap();
    let weights = source.export_weights().unwrap();
    weights.save_safetensors(&path).unwrap();

    let loaded = TransformerLMEmbeddingsModel::<TB>::load_file(config, &path, &device()).unwrap();
    assert_eq!(loaded.name(), "tlm-words-embed");
    assert!(!loaded.is_mlm());
    assert!(loaded.finetune());
    assert!(loaded.get_vocab().is_none());

    let ids = Tensor::<TB, 2, Int>::from_ints([[3, 9, 27, 4, 0]], &device());
    let a = float_values(source.encode(EmbedInput::Words(ids.clone())).unwrap().tokens().unwrap()).unwrap();
    let b = float_values(loaded.encode(EmbedInput::Words(ids)).unwrap().tokens().unwrap()).unwrap();
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-5);
    }
}

#[test]
fn load_fails_on_missing_or_unexpected_weights() {
    let config = tlm_config(30, 16).with("pooling", "max");
    let source =
        TransformerLMPooledEmbeddingsModel::<TB>::new("src", InputKind::Words, config.clone(), None, &device())
            .unwrap();
    let full = source.export_weights().unwrap();

    let mut missing = full.clone();
    missing.remove("transformer.encoders.1.ffn_linear2.bias").unwrap();
    let err = TransformerLMPooledEmbeddingsModel::<TB>::load(config.clone(), &missing, &device()).unwrap_err();
    assert!(matches!(
        err,
        EmbeddingError::WeightMismatch { ref name, .. } if name == "transformer.encoders.1.ffn_linear2.bias"
    ));

    let mut extra = full.clone();
    extra.insert("token_type.weight", full.get("transformer.ln.gamma").unwrap().clone());
    let err = TransformerLMPooledEmbeddingsModel::<TB>::load(config, &extra, &device()).unwrap_err();
    assert!(matches!(err, EmbeddingError::WeightMismatch { ref name, .. } if name == "token_type.weight"));
}

#[test]
fn load_fails_on_shape_mismatch() {
    let small = TransformerLMEmbeddingsModel::<TB>::new("a", InputKind::Words, tlm_config(30, 16), None, &device())
        .unwrap();
    let weights: WeightSet = small.export_weights().unwrap();
    let err = TransformerLMEmbeddingsModel::<TB>::load(tlm_config(31, 16), &weights, &device()).unwrap_err();
    assert!(matches!(err, EmbeddingError::WeightMismatch { .. }));
}

#[test]
fn transformer_lm_cannot_be_built_from_word_vectors() {
    let registry = EmbeddingsRegistry::<TB>::with_defaults();
    let pv = Arc::new(PretrainedVectors::new(20, 8, vec![0.25; 160]).unwrap());
    for tag in ["tlm-words-embed", "tlm-words-embed-pooled"] {
        let err = registry
            .create_from_pretrained(tag, pv.clone(), "tlm", config_for(tag), &device())
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidConfig(_)), "'{tag}' accepted word vectors");
    }

    let tlm = registry.create("tlm-words-embed", "tlm", config_for("tlm-words-embed"), &device()).unwrap();
    assert!(matches!(tlm.detached_ref(), Err(EmbeddingError::UninitializedWeights { .. })));
}

#[test]
fn out_of_vocabulary_ids_are_rejected() {
    let registry = EmbeddingsRegistry::<TB>::with_defaults();

    let tlm = registry.create("tlm-words-embed", "tlm", tlm_config(100, 8).with("layers", 1), &device()).unwrap();
    let ids = Tensor::<TB, 2, Int>::from_ints([[5, 150, 7]], &device());
    assert!(matches!(tlm.encode(EmbedInput::Words(ids)), Err(EmbeddingError::InvalidInput(_))));

    let table = registry.create("default", "word", config_for("default"), &device()).unwrap();
    let ids = Tensor::<TB, 2, Int>::from_ints([[-1, 2]], &device());
    assert!(matches!(table.encode(EmbedInput::Words(ids)), Err(EmbeddingError::InvalidInput(_))));

    let chars = registry.create("char-conv", "chars", config_for("char-conv"), &device()).unwrap();
    let ids = Tensor::<TB, 3, Int>::full([1, 2, 3], 20, &device());
    assert!(matches!(chars.encode(EmbedInput::Chars(ids)), Err(EmbeddingError::InvalidInput(_))));
}
