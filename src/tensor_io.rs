// src/tensor_io.rs
//
// Helpers for pulling f32 and index tensors out of .safetensors files.
// Normalization statistics, the body template and the clip library all use them.

use crate::error::LoadError;
use ndarray::{Array1, Array2};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::fs;
use std::path::Path;

/// Reads a whole file into memory. The returned bytes back a `SafeTensors` view.
pub fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse<'a>(path: &Path, bytes: &'a [u8]) -> Result<SafeTensors<'a>, LoadError> {
    SafeTensors::deserialize(bytes).map_err(|e| LoadError::SafeTensors {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

pub fn tensor<'a>(path: &Path, tensors: &'a SafeTensors<'a>, name: &str) -> Result<TensorView<'a>, LoadError> {
    tensors.tensor(name).map_err(|_| LoadError::MissingTensor {
        path: path.to_path_buf(),
        name: name.to_string(),
    })
}

/// Decodes a little-endian F32 tensor into a flat vector.
pub fn f32_values(name: &str, view: &TensorView) -> Result<Vec<f32>, LoadError> {
    if view.dtype() != Dtype::F32 {
        return Err(LoadError::UnsupportedDtype {
            name: name.to_string(),
            dtype: format!("{:?}", view.dtype()),
        });
    }
    Ok(view
        .data()
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn f32_vector(name: &str, view: &TensorView) -> Result<Array1<f32>, LoadError> {
    let values = f32_values(name, view)?;
    // A [1, D] tensor is accepted as a vector too, statistics are often saved with a batch axis.
    match view.shape() {
        [_] | [1, _] => Ok(Array1::from(values)),
        other => Err(LoadError::Shape {
            name: name.to_string(),
            reason: format!("expected a vector, got shape {:?}", other),
        }),
    }
}

pub fn f32_matrix(name: &str, view: &TensorView) -> Result<Array2<f32>, LoadError> {
    let values = f32_values(name, view)?;
    match view.shape() {
        [rows, cols] => Array2::from_shape_vec((*rows, *cols), values).map_err(|e| LoadError::Shape {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        other => Err(LoadError::Shape {
            name: name.to_string(),
            reason: format!("expected a 2-D tensor, got shape {:?}", other),
        }),
    }
}

/// Reads an (F, 3) triangle index tensor. I32, I64 and U32 are accepted since
/// exporters disagree on the integer type used for faces.
pub fn triangle_indices(name: &str, view: &TensorView) -> Result<Vec<[u32; 3]>, LoadError> {
    if view.shape().len() != 2 || view.shape()[1] != 3 {
        return Err(LoadError::Shape {
            name: name.to_string(),
            reason: format!("expected (F, 3), got shape {:?}", view.shape()),
        });
    }

    let data = view.data();
    let flat: Vec<i64> = match view.dtype() {
        Dtype::I32 => data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
            .collect(),
        Dtype::U32 => data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
            .collect(),
        Dtype::I64 => data
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
        other => {
            return Err(LoadError::UnsupportedDtype {
                name: name.to_string(),
                dtype: format!("{:?}", other),
            })
        }
    };

    flat.chunks_exact(3)
        .map(|tri| {
            let mut face = [0u32; 3];
            for (slot, &index) in face.iter_mut().zip(tri) {
                *slot = u32::try_from(index).map_err(|_| LoadError::Shape {
                    name: name.to_string(),
                    reason: format!("face index {} is out of range", index),
                })?;
            }
            Ok(face)
        })
        .collect()
}
