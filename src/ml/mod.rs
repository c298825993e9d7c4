// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains ALL Burn framework specific code.
// Domain types (configs, vocabularies, errors) stay free of
// tensors; everything that builds or runs a graph lives here.
//
// What's in this layer:
//
//   embeddings.rs  — The Embeddings contract and EmbeddingsModel
//   registry.rs    — Tag → variant constructor table
//   lookup.rs      — Plain lookup-table embeddings
//   positional.rs  — Sinusoidal / learned positional wrappers
//   char_conv.rs   — Character convolution word composer
//   char_lstm.rs   — Character BiLSTM word composer
//   char_transformer.rs — Character transformer word composer
//   stack.rs       — Named sub-embeddings + reduction
//   transformer.rs — Multi-head attention encoder stack
//   tlm.rs         — Transformer LM embeddings (+ pooled)
//   params.rs      — Name-based parameter import / export
//
// Reference: Burn Book §3 (Building Blocks)
//            Vaswani et al. (2017) Attention Is All You Need
//            Devlin et al. (2019) BERT

pub mod activation;

pub mod embeddings;

pub mod registry;

pub mod lookup;

pub mod positional;

pub mod char_conv;

pub mod char_lstm;

pub mod char_transformer;

pub mod stack;

pub mod transformer;

/// Transformer LM embedding, pooling and weight loading
pub mod tlm;

pub mod params;
