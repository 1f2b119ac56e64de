use crate::context::ModelContext;
use crate::error::{GenerationError, EMPTY_TEXT_MESSAGE, NO_FEATURES_MESSAGE};
use crate::mesh::build_mesh;
use crate::model::ModelInput;
use crate::scene::{encode_base64, export_glb};
use ndarray::Array2;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResponse {
    pub success: bool,
    pub glb_frames: Vec<String>,
    pub num_frames: usize,
    pub text: String,
    pub lang_token: String,
}

impl GenerationResponse {
    pub fn new(glb_frames: Vec<String>, text: String, lang_token: String) -> Self {
        Self {
            success: true,
            num_frames: glb_frames.len(),
            glb_frames,
            text,
            lang_token,
        }
    }
}

/// Drives one generation request from text to encoded GLB frames.
///
/// The steps are exposed separately so the HTTP layer can put a deadline on
/// the model call alone; `handle` runs them back to back.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    ctx: Arc<ModelContext>,
    default_lang_token: String,
}

impl Orchestrator {
    pub fn new(ctx: Arc<ModelContext>, default_lang_token: &str) -> Self {
        Self {
            ctx,
            default_lang_token: default_lang_token.to_string(),
        }
    }

    pub fn context(&self) -> &ModelContext {
        &self.ctx
    }

    pub fn default_lang_token(&self) -> &str {
        &self.default_lang_token
    }

    /// Returns the trimmed text, or a validation failure when nothing is left.
    pub fn validate(text: &str) -> Result<String, GenerationError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(GenerationError::Validation(EMPTY_TEXT_MESSAGE.to_string()));
        }
        Ok(trimmed.to_string())
    }

    /// Calls the model. A missing or empty feature tensor is a generation failure.
    pub fn generate_features(&self, text: &str, lang_token: &str) -> Result<Array2<f32>, GenerationError> {
        let input = ModelInput { text, lang_token };
        let output = self
            .ctx
            .device()
            .run(|| self.ctx.model().forward(&input))
            .map_err(|e| GenerationError::Internal(e.to_string()))?;

        match output.feats {
            Some(feats) if feats.nrows() > 0 => {
                log::debug!("Model produced {} frames x {} channels", feats.nrows(), feats.ncols());
                Ok(feats)
            }
            _ => Err(GenerationError::Generation(NO_FEATURES_MESSAGE.to_string())),
        }
    }

    /// Normalized features → one GLB blob per frame, in temporal order.
    ///
    /// Denormalization and layout decoding run once over the whole tensor.
    /// The solver then runs frame by frame; the first failing frame aborts
    /// the request and the frames built so far are dropped.
    pub fn render_scenes(&self, features: &Array2<f32>) -> Result<Vec<Vec<u8>>, GenerationError> {
        let raw = self.ctx.normalization().denormalize(features)?;
        let frames = self.ctx.layout().decode(&raw)?;

        let mut scenes = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            let mesh = self
                .ctx
                .device()
                .run(|| build_mesh(frame, self.ctx.shape(), self.ctx.topology(), self.ctx.solver()))
                .map_err(|e| e.at_frame(index))?;
            let glb = export_glb(&mesh).map_err(|e| GenerationError::from(e).at_frame(index))?;
            scenes.push(glb);
        }
        Ok(scenes)
    }

    pub fn render_frames(&self, features: &Array2<f32>) -> Result<Vec<String>, GenerationError> {
        Ok(self
            .render_scenes(features)?
            .iter()
            .map(|glb| encode_base64(glb))
            .collect())
    }

    /// Validates the text and resolves the language token.
    pub fn prepare(&self, text: &str, lang_token: Option<&str>) -> Result<(String, String), GenerationError> {
        let text = Self::validate(text)?;
        let lang_token = lang_token.unwrap_or(&self.default_lang_token).to_string();
        Ok((text, lang_token))
    }

    /// Renders the features and wraps the frames with the request metadata.
    pub fn respond(
        &self,
        features: &Array2<f32>,
        text: String,
        lang_token: String,
    ) -> Result<GenerationResponse, GenerationError> {
        let glb_frames = self.render_frames(features)?;
        log::info!("Generated {} frames for lang_token '{}'", glb_frames.len(), lang_token);
        Ok(GenerationResponse::new(glb_frames, text, lang_token))
    }

    /// `prepare`, `generate_features` and `respond` back to back. The HTTP
    /// handler calls the same three steps so it can bound the model call with
    /// its deadline.
    pub fn handle(&self, text: &str, lang_token: Option<&str>) -> Result<GenerationResponse, GenerationError> {
        let (text, lang_token) = self.prepare(text, lang_token)?;
        let features = self.generate_features(&text, &lang_token)?;
        self.respond(&features, text, lang_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body_model::{GeometrySolver, MeshTopology, ShapeParams, SolverError, TemplateSolver};
    use crate::context::AccessPolicy;
    use crate::layout::{DecodedFrame, FeatureLayout, MODEL_FEATURE_DIM};
    use crate::model::{MockMotionModel, ModelError, ModelOutput, MotionModel};
    use crate::normalization::NormalizationParams;
    use crate::scene::{decode_base64, parse_glb};
    use ndarray::arr2;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingModel {
        calls: AtomicUsize,
        frames: usize,
    }

    impl MotionModel for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn feature_dim(&self) -> usize {
            MODEL_FEATURE_DIM
        }

        fn forward(&self, _input: &ModelInput) -> Result<ModelOutput, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.frames == 0 {
                return Ok(ModelOutput { feats: None });
            }
            Ok(ModelOutput {
                feats: Some(Array2::zeros((self.frames, MODEL_FEATURE_DIM))),
            })
        }
    }

    /// Fails on the n-th call.
    #[derive(Debug)]
    struct FlakySolver {
        inner: TemplateSolver,
        fail_on: usize,
        calls: AtomicUsize,
    }

    impl GeometrySolver for FlakySolver {
        fn name(&self) -> &str {
            "flaky"
        }

        fn vertex_count(&self) -> usize {
            self.inner.vertex_count()
        }

        fn solve(&self, pose: &DecodedFrame, shape: &ShapeParams) -> Result<Array2<f32>, SolverError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                return Err(SolverError::Failed("injected failure".to_string()));
            }
            self.inner.solve(pose, shape)
        }
    }

    fn template() -> TemplateSolver {
        let vertices = arr2(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        TemplateSolver::new(vertices, vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]]).unwrap()
    }

    fn orchestrator_with(model: Arc<dyn MotionModel>, solver: Arc<dyn GeometrySolver>, topology: Arc<MeshTopology>) -> Orchestrator {
        let ctx = ModelContext::new(
            model,
            NormalizationParams::identity(MODEL_FEATURE_DIM),
            FeatureLayout::smplx(),
            ShapeParams::canonical(),
            solver,
            topology,
            AccessPolicy::Serialized,
        )
        .unwrap();
        Orchestrator::new(Arc::new(ctx), "how2sign")
    }

    fn mock_orchestrator(frames: usize) -> Orchestrator {
        let solver = template();
        let topology = solver.topology();
        orchestrator_with(Arc::new(MockMotionModel::new(frames, MODEL_FEATURE_DIM)), Arc::new(solver), topology)
    }

    #[test]
    fn test_handle_hello() {
        let response = mock_orchestrator(6).handle("  hello ", None).unwrap();
        assert!(response.success);
        assert_eq!(response.num_frames, 6);
        assert_eq!(response.glb_frames.len(), response.num_frames);
        assert_eq!(response.text, "hello");
        assert_eq!(response.lang_token, "how2sign");

        let first = parse_glb(&decode_base64(&response.glb_frames[0]).unwrap()).unwrap();
        assert!(first.colors.iter().all(|c| *c == [255, 255, 255, 255]));
        assert_eq!(first.faces.len(), 4);
    }

    #[test]
    fn test_empty_text_does_not_call_model() {
        let model = Arc::new(CountingModel { calls: AtomicUsize::new(0), frames: 3 });
        let solver = template();
        let topology = solver.topology();
        let orchestrator = orchestrator_with(model.clone(), Arc::new(solver), topology);

        let err = orchestrator.handle(" \t\n", Some("how2sign")).unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_features_is_generation_failure() {
        let model = Arc::new(CountingModel { calls: AtomicUsize::new(0), frames: 0 });
        let solver = template();
        let topology = solver.topology();
        let orchestrator = orchestrator_with(model.clone(), Arc::new(solver), topology);

        let err = orchestrator.handle("hello", None).unwrap_err();
        assert!(err.to_string().contains("no features produced"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_solver_failure_discards_all_frames() {
        let inner = template();
        let topology = inner.topology();
        let solver = FlakySolver { inner, fail_on: 2, calls: AtomicUsize::new(0) };
        let orchestrator = orchestrator_with(Arc::new(MockMotionModel::new(5, MODEL_FEATURE_DIM)), Arc::new(solver), topology);

        let err = orchestrator.handle("hello", None).unwrap_err();
        assert!(matches!(err, GenerationError::Solver(ref msg) if msg.contains("frame 2")));
    }

    #[test]
    fn test_frames_follow_temporal_order() {
        let orchestrator = mock_orchestrator(6);
        let features = orchestrator.generate_features("order", "how2sign").unwrap();
        let all = orchestrator.render_frames(&features).unwrap();
        assert_eq!(all.len(), 6);

        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i], all[j], "frames {} and {} should differ", i, j);
            }
            let alone = orchestrator
                .render_frames(&features.slice(ndarray::s![i..i + 1, ..]).to_owned())
                .unwrap();
            assert_eq!(alone, vec![all[i].clone()], "frame {} out of place", i);
        }
    }

    #[test]
    fn test_text_changes_the_motion() {
        let orchestrator = mock_orchestrator(3);
        let hello = orchestrator.handle("hello", None).unwrap();
        let other = orchestrator.handle("a completely different sentence", Some("csl")).unwrap();
        assert_ne!(hello.glb_frames[0], other.glb_frames[0]);

        let first = parse_glb(&decode_base64(&hello.glb_frames[0]).unwrap()).unwrap();
        let second = parse_glb(&decode_base64(&hello.glb_frames[1]).unwrap()).unwrap();
        assert_ne!(first.positions, second.positions);
    }
}
