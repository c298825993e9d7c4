// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Host-side preparation of embedding inputs. Id sequences come
// in already tokenized; this layer only shapes them:
//
//   Vec<Vec<u32>>            (ragged word ids)
//       │
//       ▼
//   TokenBatcher             → [batch, seq] Int tensor, 0-padded
//                              plus the kept length of each row
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Pads ragged id sequences into Burn Int tensors
pub mod batcher;
