// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types describing what an embedding IS, with no
// Burn tensors in sight:
//
//   config.rs     — EmbeddingConfig, the key/value record every
//                   variant is built from and re-emits on save
//   vocab.rs      — Vocabulary (token → id) and the [CLS] lookup
//   pretrained.rs — PretrainedVectors, an in-memory vector table
//   input.rs      — InputKind, the rank/dtype an embedding consumes
//   error.rs      — EmbeddingError, the crate-wide error taxonomy
//
// Reference: Rust Book §5 (Structs), §9 (Error Handling)

/// Key/value configuration record
pub mod config;

/// Token → id vocabulary
pub mod vocab;

/// Pretrained vector tables
pub mod pretrained;

/// Input declarations (word-level vs char-level ids)
pub mod input;

/// Error taxonomy
pub mod error;
