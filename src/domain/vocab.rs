// ============================================================
// Layer 3 — Vocabulary
// ============================================================
// token → id mapping. Ids are expected to be dense enough that
// `max(id) + 1` is a safe table size.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::{EmbeddingError, Result};

pub const CLS_TOKEN: &str = "[CLS]";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocabulary {
    ids: HashMap<String, u32>,
}

impl Vocabulary {
    pub fn new(ids: HashMap<String, u32>) -> Self {
        Self { ids }
    }

    pub fn get(&self, token: &str) -> Option<u32> {
        self.ids.get(token).copied()
    }

    /// Id of `[CLS]`, required by CLS pooling.
    pub fn cls_index(&self) -> Result<u32> {
        self.get(CLS_TOKEN)
            .ok_or_else(|| EmbeddingError::MissingVocabEntry { token: CLS_TOKEN.to_string() })
    }

    /// Table size derived from the largest id.
    pub fn vsz(&self) -> usize {
        self.ids.values().max().map_or(0, |&max| max as usize + 1)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.ids.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, u32)> for Vocabulary {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        Self { ids: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vsz_uses_max_id_not_len() {
        let vocab: Vocabulary =
            [("[PAD]".to_string(), 0), ("[CLS]".to_string(), 101)].into_iter().collect();
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.vsz(), 102);
        assert_eq!(vocab.cls_index().unwrap(), 101);
    }

    #[test]
    fn test_missing_cls_is_reported() {
        let vocab: Vocabulary = [("hello".to_string(), 4)].into_iter().collect();
        assert!(matches!(
            vocab.cls_index(),
            Err(EmbeddingError::MissingVocabEntry { token }) if token == CLS_TOKEN
        ));
    }

    #[test]
    fn test_empty_vocab_has_zero_vsz() {
        assert_eq!(Vocabulary::default().vsz(), 0);
    }
}
