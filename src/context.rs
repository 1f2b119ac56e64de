//! # Model Context
//!
//! Everything a request needs that outlives the request: the motion model,
//! normalization statistics, the feature layout, the body shape, the mesh
//! topology, the geometry solver, and the lock that serializes access to
//! them. Built once at startup, then shared behind an `Arc`.

use crate::body_model::{GeometrySolver, MeshTopology, ShapeParams, TemplateSolver};
use crate::config::ServerConfig;
use crate::error::LoadError;
use crate::layout::FeatureLayout;
use crate::model::{ClipLibraryModel, MockMotionModel, MotionModel};
use crate::normalization::NormalizationParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// How calls into the model and the geometry solver are scheduled.
///
/// Neither collaborator is known to be reentrant, so `Serialized` is the
/// default: one external call at a time across the whole process.
/// `Reentrant` is only safe once the concrete libraries are confirmed
/// thread-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessPolicy {
    #[default]
    Serialized,
    Reentrant,
}

#[derive(Debug, Default)]
pub struct DeviceLock {
    policy: AccessPolicy,
    lock: Mutex<()>,
}

impl DeviceLock {
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy,
            lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    /// Runs `f` under the policy. The guarded state is `()`, so a poisoned
    /// lock carries nothing worth refusing over.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        match self.policy {
            AccessPolicy::Serialized => {
                let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                f()
            }
            AccessPolicy::Reentrant => f(),
        }
    }
}

#[derive(Debug)]
pub struct ModelContext {
    model: Arc<dyn MotionModel>,
    normalization: NormalizationParams,
    layout: FeatureLayout,
    shape: ShapeParams,
    solver: Arc<dyn GeometrySolver>,
    topology: Arc<MeshTopology>,
    device: DeviceLock,
}

impl ModelContext {
    /// Assembles a context and checks the pieces agree with each other.
    /// A mismatch here fails startup instead of corrupting poses later.
    pub fn new(
        model: Arc<dyn MotionModel>,
        normalization: NormalizationParams,
        layout: FeatureLayout,
        shape: ShapeParams,
        solver: Arc<dyn GeometrySolver>,
        topology: Arc<MeshTopology>,
        policy: AccessPolicy,
    ) -> Result<Self, LoadError> {
        if model.feature_dim() != normalization.dim() {
            return Err(LoadError::Layout(format!(
                "model '{}' emits {} channels but normalization has {}",
                model.name(),
                model.feature_dim(),
                normalization.dim()
            )));
        }
        layout.validate(normalization.dim())?;
        if solver.vertex_count() != topology.vertex_count() {
            return Err(LoadError::BodyModel(format!(
                "{} solver produces {} vertices but the topology has {}",
                solver.name(),
                solver.vertex_count(),
                topology.vertex_count()
            )));
        }

        Ok(Self {
            model,
            normalization,
            layout,
            shape,
            solver,
            topology,
            device: DeviceLock::new(policy),
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, LoadError> {
        let normalization = match &config.normalization_path {
            Some(path) => NormalizationParams::load(path)?,
            None => {
                log::warn!("No normalization_path configured; treating model output as raw features");
                NormalizationParams::identity(config.feature_dim)
            }
        };

        let model = load_model(&config.model, normalization.dim(), config.mock_frames)?;

        let shape = match &config.shape {
            Some(values) => ShapeParams::from_slice(values)?,
            None => ShapeParams::canonical(),
        };

        let template = TemplateSolver::load(&config.body_model_path)?;
        let topology = template.topology();

        log::info!(
            "Model context ready: model={}, solver={}, policy={:?}",
            model.name(),
            template.name(),
            config.access_policy
        );

        Self::new(
            model,
            normalization,
            FeatureLayout::smplx(),
            shape,
            Arc::new(template),
            topology,
            config.access_policy,
        )
    }

    pub fn model(&self) -> &dyn MotionModel {
        self.model.as_ref()
    }

    pub fn normalization(&self) -> &NormalizationParams {
        &self.normalization
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn shape(&self) -> &ShapeParams {
        &self.shape
    }

    pub fn solver(&self) -> &dyn GeometrySolver {
        self.solver.as_ref()
    }

    pub fn topology(&self) -> &Arc<MeshTopology> {
        &self.topology
    }

    pub fn device(&self) -> &DeviceLock {
        &self.device
    }
}

// "mock" selects the synthetic model, anything else is a clip-library path.
fn load_model(selector: &str, dim: usize, mock_frames: usize) -> Result<Arc<dyn MotionModel>, LoadError> {
    if selector == "mock" {
        log::info!("Using mock motion model ({} frames per request)", mock_frames);
        return Ok(Arc::new(MockMotionModel::new(mock_frames, dim)));
    }
    Ok(Arc::new(ClipLibraryModel::load(Path::new(selector), dim)?))
}
