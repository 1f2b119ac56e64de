// src/model.rs
//
// Boundary to the text-to-motion model. The model itself is opaque: it takes
// text plus a language/domain token and may or may not produce a normalized
// (T, D) feature tensor.

use crate::error::LoadError;
use crate::tensor_io;
use ndarray::Array2;
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct ModelInput<'a> {
    pub text: &'a str,
    pub lang_token: &'a str,
}

/// `feats` is `None` when the model ran but had nothing to say. That is a
/// normal outcome, not an error.
#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    pub feats: Option<Array2<f32>>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model inference failed: {0}")]
    Inference(String),
}

pub trait MotionModel: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn feature_dim(&self) -> usize;
    fn forward(&self, input: &ModelInput) -> Result<ModelOutput, ModelError>;
}

/// Deterministic synthetic motion for demos and tests.
///
/// Each channel follows a slow sine wave whose phase depends on the text, so
/// different prompts give different (but repeatable) animations.
#[derive(Debug, Clone)]
pub struct MockMotionModel {
    frames: usize,
    dim: usize,
}

impl MockMotionModel {
    pub fn new(frames: usize, dim: usize) -> Self {
        Self { frames, dim }
    }
}

impl MotionModel for MockMotionModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn feature_dim(&self) -> usize {
        self.dim
    }

    fn forward(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        if self.frames == 0 {
            return Ok(ModelOutput { feats: None });
        }
        let seed = input
            .text
            .bytes()
            .chain(input.lang_token.bytes())
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let phase = (seed % 997) as f32 / 997.0 * TAU;
        let frames = self.frames as f32;

        let feats = Array2::from_shape_fn((self.frames, self.dim), |(t, c)| {
            0.5 * (TAU * t as f32 / frames + phase + 0.37 * c as f32).sin()
        });
        Ok(ModelOutput { feats: Some(feats) })
    }
}

/// Pre-generated motion clips keyed by language token.
///
/// The .safetensors file holds one (T, D) F32 tensor per token, already in
/// the model's normalized space. Unknown tokens produce no features.
#[derive(Debug, Clone)]
pub struct ClipLibraryModel {
    name: String,
    dim: usize,
    clips: HashMap<String, Array2<f32>>,
}

impl ClipLibraryModel {
    pub fn new(name: &str, dim: usize, clips: HashMap<String, Array2<f32>>) -> Result<Self, LoadError> {
        for (token, clip) in &clips {
            if clip.ncols() != dim {
                return Err(LoadError::Shape {
                    name: token.clone(),
                    reason: format!("clip has {} channels, expected {}", clip.ncols(), dim),
                });
            }
        }
        Ok(Self {
            name: name.to_string(),
            dim,
            clips,
        })
    }

    pub fn load(path: &Path, dim: usize) -> Result<Self, LoadError> {
        let bytes = tensor_io::read_file(path)?;
        let tensors = tensor_io::parse(path, &bytes)?;
        let mut clips = HashMap::new();
        for (token, view) in tensors.tensors() {
            let clip = tensor_io::f32_matrix(&token, &view)?;
            clips.insert(token, clip);
        }
        log::info!("Loaded {} motion clips from {}", clips.len(), path.display());
        Self::new(&path.display().to_string(), dim, clips)
    }

    pub fn tokens(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = self.clips.keys().map(String::as_str).collect();
        tokens.sort_unstable();
        tokens
    }
}

impl MotionModel for ClipLibraryModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_dim(&self) -> usize {
        self.dim
    }

    fn forward(&self, input: &ModelInput) -> Result<ModelOutput, ModelError> {
        let feats = self.clips.get(input.lang_token).cloned();
        if feats.is_none() {
            log::warn!("No clip for lang_token '{}'", input.lang_token);
        }
        Ok(ModelOutput { feats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::tensor::TensorView;
    use safetensors::{serialize, Dtype};
    use std::io::Write;

    #[test]
    fn test_mock_is_deterministic_and_text_dependent() {
        let model = MockMotionModel::new(8, 5);
        let hello = ModelInput { text: "hello", lang_token: "how2sign" };
        let a = model.forward(&hello).unwrap().feats.unwrap();
        let b = model.forward(&hello).unwrap().feats.unwrap();
        assert_eq!(a.dim(), (8, 5));
        assert_eq!(a, b);

        let other = model
            .forward(&ModelInput { text: "goodbye", lang_token: "how2sign" })
            .unwrap()
            .feats
            .unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_mock_with_zero_frames_produces_nothing() {
        let model = MockMotionModel::new(0, 5);
        let out = model.forward(&ModelInput { text: "hello", lang_token: "how2sign" }).unwrap();
        assert!(out.feats.is_none());
    }

    #[test]
    fn test_clip_library_load_and_lookup() -> Result<(), Box<dyn std::error::Error>> {
        let clip: Vec<u8> = (0..6).flat_map(|v| (v as f32).to_le_bytes()).collect();
        let mut tensors = std::collections::HashMap::new();
        tensors.insert("how2sign".to_string(), TensorView::new(Dtype::F32, vec![3, 2], &clip)?);
        let bytes = serialize(&tensors, &None)?;
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&bytes)?;

        let model = ClipLibraryModel::load(file.path(), 2)?;
        assert_eq!(model.tokens(), vec!["how2sign"]);

        let hit = model.forward(&ModelInput { text: "hi", lang_token: "how2sign" })?;
        assert_eq!(hit.feats.unwrap().dim(), (3, 2));
        let miss = model.forward(&ModelInput { text: "hi", lang_token: "csl" })?;
        assert!(miss.feats.is_none());

        assert!(ClipLibraryModel::load(file.path(), 3).is_err());
        Ok(())
    }
}
