// src/body_model.rs
//
// Boundary to the parametric body model: shape parameters, the shared mesh
// topology, and the `GeometrySolver` trait that turns pose segments into
// vertex positions.

use crate::error::LoadError;
use crate::layout::{DecodedFrame, Segment, SMPLX_SEGMENTS};
use crate::tensor_io;
use ndarray::{arr2, Array1, Array2, ArrayView1, Axis};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const SHAPE_DIM: usize = 10;

/// Canonical body shape used for every generated frame.
pub const CANONICAL_SHAPE: [f32; SHAPE_DIM] = [
    -0.07284723, 0.1795129, -0.27608207, 0.135155, 0.10748172,
    0.16037364, -0.01616933, -0.03450319, 0.01369138, 0.01108842,
];

pub const TEMPLATE_TENSOR: &str = "v_template";
pub const FACES_TENSOR: &str = "faces";

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeParams(Array1<f32>);

impl Default for ShapeParams {
    fn default() -> Self {
        Self::canonical()
    }
}

impl ShapeParams {
    pub fn canonical() -> Self {
        Self(Array1::from(CANONICAL_SHAPE.to_vec()))
    }

    pub fn from_slice(values: &[f32]) -> Result<Self, LoadError> {
        if values.len() != SHAPE_DIM {
            return Err(LoadError::BodyModel(format!(
                "shape needs {} coefficients, got {}",
                SHAPE_DIM,
                values.len()
            )));
        }
        Ok(Self(Array1::from(values.to_vec())))
    }

    pub fn view(&self) -> ArrayView1<'_, f32> {
        self.0.view()
    }
}

/// Triangle list shared by every mesh the server produces.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshTopology {
    faces: Vec<[u32; 3]>,
    vertex_count: usize,
}

impl MeshTopology {
    pub fn new(faces: Vec<[u32; 3]>, vertex_count: usize) -> Result<Self, LoadError> {
        if vertex_count == 0 || faces.is_empty() {
            return Err(LoadError::BodyModel("topology has no vertices or faces".to_string()));
        }
        if let Some(index) = faces.iter().flatten().find(|&&i| i as usize >= vertex_count) {
            return Err(LoadError::BodyModel(format!(
                "face index {} out of range for {} vertices",
                index, vertex_count
            )));
        }
        Ok(Self { faces, vertex_count })
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("{segment} has {actual} values, expected {expected}")]
    SegmentWidth {
        segment: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("shape has {actual} coefficients, expected {expected}")]
    ShapeWidth { expected: usize, actual: usize },

    #[error("{0}")]
    Failed(String),
}

/// Pose + shape → vertex positions (N × 3) for the solver's topology.
///
/// Implementations are not assumed to be reentrant; callers go through the
/// context's device lock.
pub trait GeometrySolver: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    /// Number of vertices every `solve` returns.
    fn vertex_count(&self) -> usize;
    fn solve(&self, pose: &DecodedFrame, shape: &ShapeParams) -> Result<Array2<f32>, SolverError>;
}

/// Checks every segment of `pose` against the SMPL-X widths.
pub fn check_pose_widths(pose: &DecodedFrame, shape: &ShapeParams) -> Result<(), SolverError> {
    for spec in SMPLX_SEGMENTS.iter() {
        let actual = pose.segment(spec.segment).len();
        if actual != spec.width {
            return Err(SolverError::SegmentWidth {
                segment: spec.segment.name(),
                expected: spec.width,
                actual,
            });
        }
    }
    if shape.view().len() != SHAPE_DIM {
        return Err(SolverError::ShapeWidth {
            expected: SHAPE_DIM,
            actual: shape.view().len(),
        });
    }
    Ok(())
}

/// Axis-angle vector to rotation matrix (Rodrigues).
pub fn axis_angle_to_matrix(axis_angle: ArrayView1<f32>) -> Array2<f32> {
    let (x, y, z) = (axis_angle[0], axis_angle[1], axis_angle[2]);
    let theta = (x * x + y * y + z * z).sqrt();
    if theta < 1e-8 {
        return Array2::eye(3);
    }
    let (kx, ky, kz) = (x / theta, y / theta, z / theta);
    let k = arr2(&[[0.0, -kz, ky], [kz, 0.0, -kx], [-ky, kx, 0.0]]);
    let k2 = k.dot(&k);
    Array2::<f32>::eye(3) + k * theta.sin() + k2 * (1.0 - theta.cos())
}

/// Body region a template vertex follows when posed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPart {
    Torso,
    LeftHand,
    RightHand,
    Head,
}

impl BodyPart {
    /// Assigns a vertex by its dominant direction from the template centroid:
    /// up is the head, -x/+x are the left/right hands, anything else is torso.
    fn classify(offset: [f32; 3]) -> Self {
        let [x, y, z] = offset;
        if z > 0.0 && z >= x.abs() && z >= y.abs() {
            BodyPart::Head
        } else if x.abs() > 0.0 && x.abs() >= y.abs() {
            if x < 0.0 {
                BodyPart::LeftHand
            } else {
                BodyPart::RightHand
            }
        } else {
            BodyPart::Torso
        }
    }
}

/// Head vertices move radially by this much per unit of mean expression.
const EXPRESSION_GAIN: f32 = 0.05;

/// Mean axis-angle over the joint triples of a pose segment.
fn mean_joint_rotation(segment: ArrayView1<f32>) -> Array1<f32> {
    let values = segment.to_vec();
    let joints = values.len() / 3;
    let mut mean = Array1::<f32>::zeros(3);
    if joints == 0 {
        return mean;
    }
    for joint in values.chunks_exact(3) {
        for axis in 0..3 {
            mean[axis] += joint[axis];
        }
    }
    mean / joints as f32
}

/// Part-wise rigid stand-in for the articulated body model.
///
/// Every template vertex belongs to one `BodyPart`. The torso turns by the
/// mean body joint rotation, each hand by the mean of its finger joints and
/// the head by the jaw; head vertices also swell or shrink with the mean
/// expression. Parts rotate about the template centroid, then the whole mesh
/// turns by the root orientation. Shape coefficients are width-checked only.
#[derive(Debug, Clone)]
pub struct TemplateSolver {
    template: Array2<f32>,
    centroid: Array1<f32>,
    parts: Vec<BodyPart>,
    topology: Arc<MeshTopology>,
}

impl TemplateSolver {
    pub fn new(template: Array2<f32>, faces: Vec<[u32; 3]>) -> Result<Self, LoadError> {
        if template.ncols() != 3 {
            return Err(LoadError::BodyModel(format!(
                "template must be (N, 3), got {:?}",
                template.dim()
            )));
        }
        let topology = MeshTopology::new(faces, template.nrows())?;
        let centroid = template
            .mean_axis(Axis(0))
            .ok_or_else(|| LoadError::BodyModel("template has no vertices".to_string()))?;
        let parts = template
            .rows()
            .into_iter()
            .map(|v| BodyPart::classify([v[0] - centroid[0], v[1] - centroid[1], v[2] - centroid[2]]))
            .collect();
        Ok(Self {
            template,
            centroid,
            parts,
            topology: Arc::new(topology),
        })
    }

    /// Reads `v_template` (N × 3, F32) and `faces` (F × 3, integer) from a .safetensors file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let bytes = tensor_io::read_file(path)?;
        let tensors = tensor_io::parse(path, &bytes)?;
        let template = tensor_io::f32_matrix(TEMPLATE_TENSOR, &tensor_io::tensor(path, &tensors, TEMPLATE_TENSOR)?)?;
        let faces = tensor_io::triangle_indices(FACES_TENSOR, &tensor_io::tensor(path, &tensors, FACES_TENSOR)?)?;
        log::info!(
            "Loaded body template from {}: {} vertices, {} faces",
            path.display(),
            template.nrows(),
            faces.len()
        );
        Self::new(template, faces)
    }

    pub fn topology(&self) -> Arc<MeshTopology> {
        Arc::clone(&self.topology)
    }

    pub fn parts(&self) -> &[BodyPart] {
        &self.parts
    }
}

impl GeometrySolver for TemplateSolver {
    fn name(&self) -> &str {
        "template"
    }

    fn vertex_count(&self) -> usize {
        self.template.nrows()
    }

    fn solve(&self, pose: &DecodedFrame, shape: &ShapeParams) -> Result<Array2<f32>, SolverError> {
        check_pose_widths(pose, shape)?;
        let finite = Segment::ALL
            .iter()
            .all(|segment| pose.segment(*segment).iter().all(|v| v.is_finite()));
        if !finite {
            return Err(SolverError::Failed("pose contains non-finite values".to_string()));
        }

        let torso = axis_angle_to_matrix(mean_joint_rotation(pose.body_pose()).view());
        let left = axis_angle_to_matrix(mean_joint_rotation(pose.lhand_pose()).view());
        let right = axis_angle_to_matrix(mean_joint_rotation(pose.rhand_pose()).view());
        let head = axis_angle_to_matrix(pose.jaw_pose());
        let head_scale = 1.0 + EXPRESSION_GAIN * pose.expression().mean().unwrap_or(0.0);
        let root = axis_angle_to_matrix(pose.root_pose());

        let mut vertices = Array2::<f32>::zeros(self.template.raw_dim());
        for ((vertex, part), mut out) in self
            .template
            .rows()
            .into_iter()
            .zip(&self.parts)
            .zip(vertices.rows_mut())
        {
            let offset = &vertex - &self.centroid;
            let posed = match part {
                BodyPart::Torso => torso.dot(&offset),
                BodyPart::LeftHand => left.dot(&offset),
                BodyPart::RightHand => right.dot(&offset),
                BodyPart::Head => head.dot(&offset) * head_scale,
            };
            out.assign(&root.dot(&(posed + &self.centroid)));
        }
        Ok(vertices)
    }
}
