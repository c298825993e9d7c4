// ============================================================
// Layer 6 — Vocabulary Store
// ============================================================
// Resolves the vocabulary a transformer LM embedding is built on.
//
//   vocab_file = "*.json"  → JSON token → id map, read directly
//   vocab_file = other     → BERT wordpiece file (one token per
//                            line, id = line number), cached
//   no vocab_file          → whatever is already cached
//
// The BERT vocabulary cache is process-wide and write-once: the
// first vocabulary installed stays for the life of the process
// and later requests (even for a different file) get it back.
// There is no invalidation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use tokenizers::models::wordpiece::WordPiece;

use crate::domain::error::{EmbeddingError, Result};
use crate::domain::vocab::Vocabulary;

static BERT_VOCAB: OnceLock<Arc<Vocabulary>> = OnceLock::new();

/// The cached vocabulary, if one has been installed.
pub fn cached_vocab() -> Option<Arc<Vocabulary>> {
    BERT_VOCAB.get().cloned()
}

/// Install `vocab` into the cache. First writer wins; the
/// returned Arc is whatever the cache holds afterwards.
pub fn install_vocab(vocab: Vocabulary) -> Arc<Vocabulary> {
    BERT_VOCAB.get_or_init(|| Arc::new(vocab)).clone()
}

/// Read a JSON `{ token: id }` vocabulary.
pub fn read_json_vocab(path: impl AsRef<Path>) -> Result<Vocabulary> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)?;
    let ids: HashMap<String, u32> = serde_json::from_str(&json)?;
    tracing::debug!("Read {} JSON vocab entries from '{}'", ids.len(), path.display());
    Ok(Vocabulary::new(ids))
}

/// Read a BERT wordpiece vocabulary (one token per line).
pub fn read_wordpiece_vocab(path: impl AsRef<Path>) -> Result<Vocabulary> {
    let path = path.as_ref();
    let path_str = path
        .to_str()
        .ok_or_else(|| EmbeddingError::Vocab(format!("non UTF-8 path '{}'", path.display())))?;
    let ids = WordPiece::read_file(path_str)
        .map_err(|e| EmbeddingError::Vocab(format!("'{}': {e}", path.display())))?;
    tracing::debug!("Read {} wordpiece entries from '{}'", ids.len(), path.display());
    Ok(Vocabulary::new(ids))
}

/// Return the cached BERT vocabulary, loading `path` into the
/// cache on first use.
pub fn load_bert_vocab(path: Option<&Path>) -> Result<Arc<Vocabulary>> {
    if let Some(vocab) = cached_vocab() {
        if let Some(path) = path {
            tracing::warn!("Using cached vocabulary; '{}' not re-read", path.display());
        }
        return Ok(vocab);
    }
    let path = path.ok_or_else(|| {
        EmbeddingError::InvalidConfig("no vocab_file given and no vocabulary cached".to_string())
    })?;
    let vocab = read_wordpiece_vocab(path)?;
    tracing::info!("Cached BERT vocabulary from '{}' ({} tokens)", path.display(), vocab.len());
    Ok(install_vocab(vocab))
}

/// Resolve the vocabulary named by a `vocab_file` config value.
/// Returns `None` only when no file is given and nothing is cached.
pub fn resolve_vocab(vocab_file: Option<&str>) -> Result<Option<Arc<Vocabulary>>> {
    match vocab_file {
        Some(file) if file.ends_with(".json") => Ok(Some(Arc::new(read_json_vocab(file)?))),
        Some(file) => load_bert_vocab(Some(Path::new(file))).map(Some),
        None => Ok(cached_vocab()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_json_vocab_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        std::fs::write(&path, r#"{"[PAD]": 0, "[CLS]": 1, "hello": 7}"#).unwrap();

        let vocab = resolve_vocab(path.to_str()).unwrap().unwrap();
        assert_eq!(vocab.vsz(), 8);
        assert_eq!(vocab.cls_index().unwrap(), 1);
    }

    #[test]
    fn test_wordpiece_ids_follow_line_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[PAD]\n[UNK]\n[CLS]\n[SEP]\nhello").unwrap();
        drop(f);

        let vocab = read_wordpiece_vocab(&path).unwrap();
        assert_eq!(vocab.get("[CLS]"), Some(2));
        assert_eq!(vocab.get("hello"), Some(4));
        assert_eq!(vocab.vsz(), 5);
    }

    #[test]
    fn test_malformed_json_vocab_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        std::fs::write(&path, r#"["not", "a", "map"]"#).unwrap();
        assert!(matches!(read_json_vocab(&path), Err(EmbeddingError::Json(_))));
    }
}
