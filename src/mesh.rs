use crate::body_model::{GeometrySolver, MeshTopology, ShapeParams};
use crate::error::GenerationError;
use crate::layout::DecodedFrame;
use ndarray::Array2;
use std::sync::Arc;

/// Every vertex is painted opaque white; the client renderer does the shading.
pub const VERTEX_COLOR: [u8; 4] = [255, 255, 255, 255];

/// Posed geometry of one frame.
#[derive(Debug, Clone)]
pub struct MeshFrame {
    pub vertices: Array2<f32>,
    pub topology: Arc<MeshTopology>,
    pub color: [u8; 4],
}

impl MeshFrame {
    pub fn vertex_count(&self) -> usize {
        self.vertices.nrows()
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        self.topology.faces()
    }
}

/// Runs the solver for one frame and wraps the result as a white mesh.
///
/// The returned vertices must be N × 3 with N equal to the topology's vertex
/// count and all finite. Anything else is reported as a solver failure; no
/// mesh is produced for the frame.
pub fn build_mesh(
    frame: &DecodedFrame,
    shape: &ShapeParams,
    topology: &Arc<MeshTopology>,
    solver: &dyn GeometrySolver,
) -> Result<MeshFrame, GenerationError> {
    let vertices = solver
        .solve(frame, shape)
        .map_err(|e| GenerationError::Solver(format!("{} solver: {}", solver.name(), e)))?;

    if vertices.nrows() == 0 {
        return Err(GenerationError::Solver("solver returned no vertices".to_string()));
    }
    if vertices.ncols() != 3 {
        return Err(GenerationError::Solver(format!(
            "solver returned vertices of shape {:?}, expected (N, 3)",
            vertices.dim()
        )));
    }
    if vertices.nrows() != topology.vertex_count() {
        return Err(GenerationError::Solver(format!(
            "solver returned {} vertices, topology expects {}",
            vertices.nrows(),
            topology.vertex_count()
        )));
    }
    if vertices.iter().any(|v| !v.is_finite()) {
        return Err(GenerationError::Solver("solver returned non-finite vertices".to_string()));
    }

    Ok(MeshFrame {
        vertices,
        topology: Arc::clone(topology),
        color: VERTEX_COLOR,
    })
}
