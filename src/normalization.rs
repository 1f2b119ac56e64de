use crate::error::{GenerationError, LoadError};
use crate::tensor_io;
use ndarray::{Array1, Array2};
use std::path::Path;

pub const MEAN_TENSOR: &str = "mean";
pub const STD_TENSOR: &str = "std";

/// Per-channel standardization statistics of the motion model's output space.
///
/// Loaded once at startup and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct NormalizationParams {
    mean: Array1<f32>,
    std: Array1<f32>,
}

impl NormalizationParams {
    pub fn new(mean: Array1<f32>, std: Array1<f32>) -> Result<Self, LoadError> {
        if mean.len() != std.len() {
            return Err(LoadError::Normalization(format!(
                "mean has {} channels but std has {}",
                mean.len(),
                std.len()
            )));
        }
        if mean.is_empty() {
            return Err(LoadError::Normalization("statistics are empty".to_string()));
        }
        if let Some(channel) = std.iter().position(|s| *s == 0.0 || !s.is_finite()) {
            return Err(LoadError::Normalization(format!(
                "std[{}] = {} cannot be inverted",
                channel, std[channel]
            )));
        }
        if mean.iter().any(|m| !m.is_finite()) {
            return Err(LoadError::Normalization("mean contains non-finite values".to_string()));
        }
        Ok(Self { mean, std })
    }

    /// Mean 0 / std 1, i.e. the model already emits raw pose features.
    pub fn identity(dim: usize) -> Self {
        Self {
            mean: Array1::zeros(dim),
            std: Array1::ones(dim),
        }
    }

    /// Loads `mean` and `std` tensors from a .safetensors file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let bytes = tensor_io::read_file(path)?;
        let tensors = tensor_io::parse(path, &bytes)?;
        let mean = tensor_io::f32_vector(MEAN_TENSOR, &tensor_io::tensor(path, &tensors, MEAN_TENSOR)?)?;
        let std = tensor_io::f32_vector(STD_TENSOR, &tensor_io::tensor(path, &tensors, STD_TENSOR)?)?;
        log::info!("Loaded normalization statistics ({} channels) from {}", mean.len(), path.display());
        Self::new(mean, std)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Maps model output back to raw feature space: `x * std + mean`, broadcast over frames.
    pub fn denormalize(&self, features: &Array2<f32>) -> Result<Array2<f32>, GenerationError> {
        self.check_channels(features)?;
        Ok(features * &self.std + &self.mean)
    }

    pub fn normalize(&self, features: &Array2<f32>) -> Result<Array2<f32>, GenerationError> {
        self.check_channels(features)?;
        Ok((features - &self.mean) / &self.std)
    }

    fn check_channels(&self, features: &Array2<f32>) -> Result<(), GenerationError> {
        if features.ncols() != self.dim() {
            return Err(GenerationError::Configuration(format!(
                "feature tensor has {} channels, normalization expects {}",
                features.ncols(),
                self.dim()
            )));
        }
        Ok(())
    }
}
