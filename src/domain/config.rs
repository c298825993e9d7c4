// ============================================================
// Layer 3 — Embedding Configuration Record
// ============================================================
// A variant is described by a flat JSON object:
//
//   { "vsz": 30522, "dsz": 768, "layers": 12, "mlm": true, ... }
//
// The record is kept verbatim (minus `weights`) as the variant's
// recorded state, so keys this crate does not understand survive
// a save/restore cycle untouched.
//
// Integers are accepted as JSON numbers or numeric strings
// ("12"), floats likewise.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::{EmbeddingError, Result};

/// Keys stripped from the recorded state.
const UNRECORDED_KEYS: &[&str] = &["weights"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingConfig(Map<String, Value>);

impl EmbeddingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter:
    ///   EmbeddingConfig::new().with("vsz", 100).with("dsz", 32)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Parse a JSON object. Anything else is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(EmbeddingError::InvalidConfig(format!(
                "expected a JSON object, found {other}"
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// The record a variant keeps: everything except weight payloads.
    pub fn recorded(&self) -> Self {
        let mut state = self.clone();
        for key in UNRECORDED_KEYS {
            state.0.remove(*key);
        }
        state
    }

    /// Overlay `other` on top of `self`; `other` wins on conflicts.
    pub fn merged(mut self, other: &EmbeddingConfig) -> Self {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }

    // ─── Typed getters ───────────────────────────────────────────────────────

    pub fn usize(&self, key: &str) -> Result<Option<usize>> {
        let Some(value) = self.get(key) else { return Ok(None) };
        let parsed = match value {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::String(s) => s.trim().parse::<usize>().ok(),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| invalid(key, "a non-negative integer", value))
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        Ok(self.usize(key)?.unwrap_or(default))
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>> {
        let Some(value) = self.get(key) else { return Ok(None) };
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.map(Some).ok_or_else(|| invalid(key, "a number", value))
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        Ok(self.f64(key)?.unwrap_or(default))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
            Some(other) => Err(invalid(key, "a boolean", other)),
        }
    }

    pub fn str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(invalid(key, "a string", other)),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        Ok(self.str(key)?.unwrap_or(default))
    }

    /// A list of integers; a bare integer is read as a one-element list.
    pub fn usize_list_or(&self, key: &str, default: &[usize]) -> Result<Vec<usize>> {
        match self.get(key) {
            None => Ok(default.to_vec()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| v.as_u64().map(|n| n as usize).ok_or_else(|| invalid(key, "integers", v)))
                .collect(),
            Some(_) => Ok(vec![self.usize_or(key, 0)?]),
        }
    }
}

impl From<Map<String, Value>> for EmbeddingConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn invalid(key: &str, expected: &str, found: &Value) -> EmbeddingError {
    EmbeddingError::InvalidConfig(format!("`{key}` must be {expected}, found {found}"))
}
