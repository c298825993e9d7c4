// ============================================================
// Layer 4 — Token Batcher
// ============================================================
// Implements Burn's Batcher trait to turn ragged id sequences
// into one padded Int tensor.
//
//   Input:  N sequences of different lengths
//   Output: [N, S] with S = longest sequence (capped at max_len),
//           short rows right-padded with 0
//
//   [[5, 6, 7], [8]]  →  [[5, 6, 7],
//                         [8, 0, 0]]
//
// Id 0 is padding everywhere in the embeddings layer: masks
// and char composers treat it as "no token".
//
// Reference: Burn Book §4 (Batcher)

use burn::{data::dataloader::batcher::Batcher, prelude::*};

pub const PAD_ID: u32 = 0;

// ─── TokenBatch ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TokenBatch<B: Backend> {
    /// Padded ids — shape: [batch_size, seq_len]
    pub input_ids: Tensor<B, 2, Int>,

    /// Unpadded length of each row after truncation
    pub lengths: Vec<usize>,
}

// ─── TokenBatcher ─────────────────────────────────────────────────────────────
#[derive(Clone, Debug, Default)]
pub struct TokenBatcher {
    /// Rows longer than this are truncated
    pub max_len: Option<usize>,
}

impl TokenBatcher {
    pub fn new(max_len: Option<usize>) -> Self {
        Self { max_len }
    }

    fn cap(&self, len: usize) -> usize {
        self.max_len.map_or(len, |m| len.min(m))
    }

    /// Row-major padded ids, the `[rows, cols]` shape and the kept
    /// length of every row. `cols` is at least 1.
    pub fn pad(&self, items: &[Vec<u32>]) -> (Vec<i64>, [usize; 2], Vec<usize>) {
        let lengths: Vec<usize> = items.iter().map(|s| self.cap(s.len())).collect();
        let cols = lengths.iter().copied().max().unwrap_or(0).max(1);

        let mut flat = Vec::with_capacity(items.len() * cols);
        for (seq, &len) in items.iter().zip(&lengths) {
            flat.extend(seq[..len].iter().map(|&id| i64::from(id)));
            flat.extend(std::iter::repeat(i64::from(PAD_ID)).take(cols - len));
        }
        (flat, [items.len(), cols], lengths)
    }

    pub fn words<B: Backend>(&self, items: &[Vec<u32>], device: &B::Device) -> TokenBatch<B> {
        let (flat, shape, lengths) = self.pad(items);
        let input_ids = Tensor::<B, 2, Int>::from_data(TensorData::new(flat, shape), device);
        TokenBatch { input_ids, lengths }
    }
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
impl<B: Backend> Batcher<B, Vec<u32>, TokenBatch<B>> for TokenBatcher {
    fn batch(&self, items: Vec<Vec<u32>>, device: &B::Device) -> TokenBatch<B> {
        self.words(&items, device)
    }
}
