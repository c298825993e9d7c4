// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// File formats and process-wide state shared by the other
// layers:
//
//   weights.rs     — WeightSet: name → tensor archives, read
//                    from and written to safetensors files
//
//   metadata.rs    — JSON metadata records (dsz, vsz, class,
//                    constructor kwargs) for rebuilding an
//                    embedding's architecture elsewhere
//
//   vocab_store.rs — Vocabulary files (JSON or wordpiece) and
//                    the write-once BERT vocabulary cache
//
// Reference: safetensors format, Rust Book §9 (Error Handling)

/// Pretrained weight archives
pub mod weights;

/// Metadata save/restore
pub mod metadata;

/// Vocabulary loading and caching
pub mod vocab_store;
