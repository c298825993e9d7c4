// ============================================================
// Layer 5 — Parameter Transfer
// ============================================================
// Moves parameter values between Burn modules and WeightSets by
// dotted name. Every import checks the name exists and the
// shape matches the live parameter exactly.

use burn::{
    module::Param,
    nn::{Embedding, LayerNorm, Linear},
    prelude::*,
};

use crate::domain::error::{EmbeddingError, Result};
use crate::infra::weights::{WeightSet, WeightTensor};

/// Join a prefix and a local parameter name with a dot.
pub fn scoped(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Copy a float tensor to the host.
pub fn float_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| EmbeddingError::Tensor(format!("{e:?}")))
}

/// Copy an int tensor to the host.
pub fn int_values<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| EmbeddingError::Tensor(format!("{e:?}")))
}

// ─── Raw parameters ───────────────────────────────────────────────────────────

/// Copy one parameter to the host under `name`.
pub fn export_param<B: Backend, const D: usize>(
    out:   &mut WeightSet,
    name:  String,
    param: &Param<Tensor<B, D>>,
) -> Result<()> {
    let tensor = param.val();
    let shape = tensor.dims().to_vec();
    let data = float_values(tensor)?;
    out.insert(name, WeightTensor::new(shape, data)?);
    Ok(())
}

/// A new parameter holding the values stored under `name`.
/// Fails when the name is absent or its shape differs from the
/// live parameter.
pub fn import_param<B: Backend, const D: usize>(
    param:   &Param<Tensor<B, D>>,
    name:    &str,
    weights: &WeightSet,
) -> Result<Param<Tensor<B, D>>> {
    let live = param.val();
    let expected = live.dims().to_vec();
    let source = weights
        .get(name)
        .ok_or_else(|| EmbeddingError::mismatch(name, "missing from weight source"))?;
    if source.shape != expected {
        return Err(EmbeddingError::mismatch(
            name,
            format!("expected shape {expected:?}, found {:?}", source.shape),
        ));
    }
    let data = TensorData::new(source.data.clone(), source.shape.clone());
    let tensor = Tensor::<B, D>::from_data(data, &live.device());
    Ok(Param::from_tensor(tensor))
}

/// Build a float tensor from row-major host values.
pub fn tensor_from_values<B: Backend, const D: usize>(
    values: Vec<f32>,
    shape:  [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::<B, D>::from_data(TensorData::new(values, shape), device)
}

// ─── nn building blocks ───────────────────────────────────────────────────────

/// `{prefix}.weight` ([d_input, d_output]) and the optional `{prefix}.bias`.
pub fn export_linear<B: Backend>(out: &mut WeightSet, prefix: &str, linear: &Linear<B>) -> Result<()> {
    export_param(out, scoped(prefix, "weight"), &linear.weight)?;
    if let Some(bias) = &linear.bias {
        export_param(out, scoped(prefix, "bias"), bias)?;
    }
    Ok(())
}

/// Restore what `export_linear` wrote. A bias is only read when
/// the live layer has one.
pub fn import_linear<B: Backend>(linear: &mut Linear<B>, prefix: &str, weights: &WeightSet) -> Result<()> {
    linear.weight = import_param(&linear.weight, &scoped(prefix, "weight"), weights)?;
    if let Some(bias) = &linear.bias {
        linear.bias = Some(import_param(bias, &scoped(prefix, "bias"), weights)?);
    }
    Ok(())
}

/// `{prefix}.weight`, the [vsz, dsz] table.
pub fn export_embedding<B: Backend>(out: &mut WeightSet, prefix: &str, embed: &Embedding<B>) -> Result<()> {
    export_param(out, scoped(prefix, "weight"), &embed.weight)
}

pub fn import_embedding<B: Backend>(embed: &mut Embedding<B>, prefix: &str, weights: &WeightSet) -> Result<()> {
    embed.weight = import_param(&embed.weight, &scoped(prefix, "weight"), weights)?;
    Ok(())
}

/// `{prefix}.gamma` and, when the norm has one, `{prefix}.beta`.
pub fn export_layer_norm<B: Backend>(out: &mut WeightSet, prefix: &str, norm: &LayerNorm<B>) -> Result<()> {
    export_param(out, scoped(prefix, "gamma"), &norm.gamma)?;
    if let Some(beta) = &norm.beta {
        export_param(out, scoped(prefix, "beta"), beta)?;
    }
    Ok(())
}

pub fn import_layer_norm<B: Backend>(norm: &mut LayerNorm<B>, prefix: &str, weights: &WeightSet) -> Result<()> {
    norm.gamma = import_param(&norm.gamma, &scoped(prefix, "gamma"), weights)?;
    if let Some(beta) = &norm.beta {
        norm.beta = Some(import_param(beta, &scoped(prefix, "beta"), weights)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{LayerNormConfig, LinearConfig};

    type TB = NdArray;

    #[test]
    fn test_scoped_names() {
        assert_eq!(scoped("", "weight"), "weight");
        assert_eq!(scoped("transformer.ln", "gamma"), "transformer.ln.gamma");
    }

    #[test]
    fn test_linear_export_import_roundtrip() {
        let device = Default::default();
        let source = LinearConfig::new(3, 2).init::<TB>(&device);
        let mut out = WeightSet::new();
        export_linear(&mut out, "proj", &source).unwrap();
        assert_eq!(out.get("proj.weight").unwrap().shape, vec![3, 2]);
        assert_eq!(out.get("proj.bias").unwrap().shape, vec![2]);

        let mut target = LinearConfig::new(3, 2).init::<TB>(&device);
        import_linear(&mut target, "proj", &out).unwrap();
        let a = float_values(source.weight.val()).unwrap();
        let b = float_values(target.weight.val()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_import_rejects_wrong_shape() {
        let device = Default::default();
        let mut target = LinearConfig::new(3, 2).init::<TB>(&device);
        let mut weights = WeightSet::new();
        weights.insert("proj.weight", WeightTensor::new(vec![2, 3], vec![0.0; 6]).unwrap());
        weights.insert("proj.bias", WeightTensor::new(vec![2], vec![0.0; 2]).unwrap());
        let err = import_linear(&mut target, "proj", &weights).unwrap_err();
        assert!(matches!(err, EmbeddingError::WeightMismatch { name, .. } if name == "proj.weight"));
    }

    #[test]
    fn test_import_rejects_missing_name() {
        let device = Default::default();
        let mut target = LinearConfig::new(3, 2).init::<TB>(&device);
        let err = import_linear(&mut target, "proj", &WeightSet::new()).unwrap_err();
        assert!(matches!(err, EmbeddingError::WeightMismatch { .. }));
    }

    #[test]
    fn test_layer_norm_carries_gamma_and_beta() {
        let device = Default::default();
        let source = LayerNormConfig::new(4).init::<TB>(&device);
        let mut out = WeightSet::new();
        export_layer_norm(&mut out, "ln", &source).unwrap();
        assert_eq!(out.get("ln.gamma").unwrap().shape, vec![4]);
        assert_eq!(out.get("ln.beta").unwrap().shape, vec![4]);

        let mut target = LayerNormConfig::new(4).init::<TB>(&device);
        import_layer_norm(&mut target, "ln", &out).unwrap();

        out.remove("ln.beta").unwrap();
        let err = import_layer_norm(&mut target, "ln", &out).unwrap_err();
        assert!(matches!(err, EmbeddingError::WeightMismatch { name, .. } if name == "ln.beta"));
    }
}
