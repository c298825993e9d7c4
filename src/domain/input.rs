// ============================================================
// Layer 3 — Input Declarations
// ============================================================
// What an embedding consumes. Word-level embeddings read a 2-D
// int batch (batch, seq); char-level embeddings read a 3-D int
// batch (batch, seq, chars).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Words,
    Chars,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputKind::Words => write!(f, "words[batch, seq]"),
            InputKind::Chars => write!(f, "chars[batch, seq, chars]"),
        }
    }
}
