// ============================================================
// Layer 6 — Weight Sources
// ============================================================
// A WeightSet is a flat name → tensor archive of pretrained
// parameters. Names are dotted paths into the embedding graph:
//
//   embeddings.x.embeddings.weight        [vsz, d_model]
//   embeddings.x.pos_embeddings.weight    [mxlen, d_model]
//   transformer.encoders.0.self_attn.w_q.weight
//   ...
//   transformer.ln.gamma                  [d_model]
//
// On disk the archive is a safetensors file holding F32 tensors.
// Reading is strict: any non-F32 tensor is rejected.

use std::collections::{BTreeMap, HashMap};
use std::{fs, path::Path};

use safetensors::{tensor::TensorView, Dtype, SafeTensors};

use crate::domain::error::{EmbeddingError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct WeightTensor {
    pub shape: Vec<usize>,
    pub data:  Vec<f32>,
}

impl WeightTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(EmbeddingError::Tensor(format!(
                "shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightSet {
    tensors: BTreeMap<String, WeightTensor>,
}

impl WeightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: WeightTensor) -> Option<WeightTensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&WeightTensor> {
        self.tensors.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<WeightTensor> {
        self.tensors.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Parameter names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WeightTensor)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.tensors.values().map(WeightTensor::numel).sum()
    }

    // ─── safetensors I/O ─────────────────────────────────────────────────────

    pub fn from_safetensors_bytes(bytes: &[u8]) -> Result<Self> {
        let archive = SafeTensors::deserialize(bytes)?;
        let mut set = WeightSet::new();
        for (name, view) in archive.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(EmbeddingError::mismatch(
                    name,
                    format!("expected F32 tensor, found {:?}", view.dtype()),
                ));
            }
            let data: Vec<f32> = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            set.insert(name, WeightTensor::new(view.shape().to_vec(), data)?);
        }
        Ok(set)
    }

    pub fn to_safetensors_bytes(&self) -> Result<Vec<u8>> {
        let buffers: Vec<(&str, &[usize], Vec<u8>)> = self
            .iter()
            .map(|(name, t)| {
                let bytes = t.data.iter().flat_map(|f| f.to_le_bytes()).collect();
                (name, t.shape.as_slice(), bytes)
            })
            .collect();

        let mut views: HashMap<String, TensorView<'_>> = HashMap::new();
        for (name, shape, bytes) in &buffers {
            views.insert(name.to_string(), TensorView::new(Dtype::F32, shape.to_vec(), bytes)?);
        }
        Ok(safetensors::serialize(&views, &None)?)
    }

    pub fn load_safetensors(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let set = Self::from_safetensors_bytes(&bytes)?;
        tracing::info!(
            "Read {} tensors ({} params) from '{}'",
            set.len(),
            set.num_params(),
            path.display()
        );
        Ok(set)
    }

    pub fn save_safetensors(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_safetensors_bytes()?)?;
        tracing::debug!("Wrote {} tensors to '{}'", self.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WeightSet {
        let mut set = WeightSet::new();
        set.insert("proj.weight", WeightTensor::new(vec![2, 3], vec![0.5; 6]).unwrap());
        set.insert("ln.gamma", WeightTensor::new(vec![3], vec![1.0, 2.0, 3.0]).unwrap());
        set
    }

    #[test]
    fn test_weight_tensor_checks_shape() {
        assert!(WeightTensor::new(vec![2, 2], vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_safetensors_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");
        let set = sample();
        set.save_safetensors(&path).unwrap();

        let back = WeightSet::load_safetensors(&path).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.num_params(), 9);
        assert_eq!(back.names().collect::<Vec<_>>(), vec!["ln.gamma", "proj.weight"]);
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        assert!(matches!(
            WeightSet::from_safetensors_bytes(b"not a safetensors file"),
            Err(EmbeddingError::SafeTensors(_))
        ));
    }
}
