use actix_web::{test, web, App};
use motion_mesh_server::api::routes::{configure, cors, AppState};
use motion_mesh_server::body_model::{ShapeParams, TemplateSolver};
use motion_mesh_server::context::{AccessPolicy, ModelContext};
use motion_mesh_server::layout::{FeatureLayout, MODEL_FEATURE_DIM};
use motion_mesh_server::model::{MockMotionModel, ModelError, ModelInput, ModelOutput, MotionModel};
use motion_mesh_server::normalization::NormalizationParams;
use motion_mesh_server::orchestrator::Orchestrator;
use motion_mesh_server::scene::{decode_base64, parse_glb};
use ndarray::{arr2, Array2};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Counts calls and can be told to return nothing or to stall.
#[derive(Debug)]
struct ScriptedModel {
    calls: AtomicUsize,
    frames: usize,
    delay: Duration,
}

impl ScriptedModel {
    fn new(frames: usize) -> Self {
        Self { calls: AtomicUsize::new(0), frames, delay: Duration::ZERO }
    }
}

impl MotionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn feature_dim(&self) -> usize {
        MODEL_FEATURE_DIM
    }

    fn forward(&self, _input: &ModelInput) -> Result<ModelOutput, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if self.frames == 0 {
            return Ok(ModelOutput::default());
        }
        Ok(ModelOutput { feats: Some(Array2::zeros((self.frames, MODEL_FEATURE_DIM))) })
    }
}

fn state_with(model: Arc<dyn MotionModel>, timeout: Duration) -> AppState {
    let solver = TemplateSolver::new(
        arr2(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]),
        vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
    )
    .expect("valid tetrahedron");
    let topology = solver.topology();
    let ctx = ModelContext::new(
        model,
        NormalizationParams::identity(MODEL_FEATURE_DIM),
        FeatureLayout::smplx(),
        ShapeParams::canonical(),
        Arc::new(solver),
        topology,
        AccessPolicy::Serialized,
    )
    .expect("context should build");
    AppState::new(Orchestrator::new(Arc::new(ctx), "how2sign"), timeout)
}

fn mock_state() -> AppState {
    state_with(Arc::new(MockMotionModel::new(5, MODEL_FEATURE_DIM)), Duration::from_secs(30))
}

#[actix_rt::test]
async fn test_generate_hello_returns_ordered_white_frames() {
    let app = test::init_service(App::new().app_data(web::Data::new(mock_state())).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/generate")
        .set_json(json!({"text": "hello", "lang_token": "how2sign"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["text"], "hello");
    assert_eq!(body["lang_token"], "how2sign");

    let frames = body["glb_frames"].as_array().expect("glb_frames is an array");
    assert!(!frames.is_empty());
    assert_eq!(body["num_frames"].as_u64().unwrap() as usize, frames.len());

    let scenes: Vec<_> = frames
        .iter()
        .map(|f| parse_glb(&decode_base64(f.as_str().unwrap()).unwrap()).unwrap())
        .collect();
    assert_eq!(scenes[0].positions.nrows(), 4);
    assert!(scenes[0].colors.iter().all(|c| *c == [255, 255, 255, 255]));
    for pair in scenes.windows(2) {
        assert_ne!(pair[0].positions, pair[1].positions);
    }
}

#[actix_rt::test]
async fn test_generate_depends_on_text() {
    let app = test::init_service(App::new().app_data(web::Data::new(mock_state())).configure(configure)).await;

    let mut first_frames = Vec::new();
    for text in ["hello", "a completely different sentence"] {
        let req = test::TestRequest::post()
            .uri("/api/generate")
            .set_json(json!({"text": text}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        first_frames.push(body["glb_frames"][0].as_str().unwrap().to_string());
    }
    assert_ne!(first_frames[0], first_frames[1]);
}

#[actix_rt::test]
async fn test_generate_defaults_lang_token() {
    let app = test::init_service(App::new().app_data(web::Data::new(mock_state())).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/generate")
        .set_json(json!({"text": "thank you"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["lang_token"], "how2sign");
}

#[actix_rt::test]
async fn test_empty_text_is_400_without_model_call() {
    let model = Arc::new(ScriptedModel::new(3));
    let state = state_with(model.clone(), Duration::from_secs(30));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

    for payload in [json!({"text": "   "}), json!({"lang_token": "how2sign"})] {
        let req = test::TestRequest::post().uri("/api/generate").set_json(payload).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Text is required");
    }
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn test_missing_features_is_500() {
    let state = state_with(Arc::new(ScriptedModel::new(0)), Duration::from_secs(30));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/generate")
        .set_json(json!({"text": "hello"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 500);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("no features produced"));
}

#[actix_rt::test]
async fn test_model_deadline_is_504() {
    let model = ScriptedModel { calls: AtomicUsize::new(0), frames: 2, delay: Duration::from_millis(500) };
    let state = state_with(Arc::new(model), Duration::from_millis(50));
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/generate")
        .set_json(json!({"text": "slow"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 504);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Generation timed out after 50ms");
}

#[actix_rt::test]
async fn test_cors_headers_follow_config() {
    for enabled in [true, false] {
        let app = test::init_service(
            App::new()
                .wrap(cors(enabled))
                .app_data(web::Data::new(mock_state()))
                .configure(configure),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/api/health")
            .insert_header(("origin", "http://localhost:3000"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 200);
        let allowed = resp
            .headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap().to_string());
        match allowed.as_deref() {
            Some(origin) => {
                assert!(enabled);
                assert!(origin == "http://localhost:3000" || origin == "*");
            }
            None => assert!(!enabled),
        }
    }
}

#[actix_rt::test]
async fn test_malformed_body_is_400_json_error() {
    let app = test::init_service(App::new().app_data(web::Data::new(mock_state())).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/api/generate")
        .insert_header(("content-type", "application/json"))
        .set_payload("{ not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
}

#[actix_rt::test]
async fn test_health_and_ready() {
    let app = test::init_service(App::new().app_data(web::Data::new(mock_state())).configure(configure)).await;

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"status": "ok", "message": "API is running"}));

    let req = test::TestRequest::get().uri("/api/ready").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["ready"], true);
    assert_eq!(body["model"], "mock");
    assert_eq!(body["feature_dim"], 133);
    assert_eq!(body["vertex_count"], 4);
    assert_eq!(body["access_policy"], "serialized");
}

#[actix_rt::test]
async fn test_default_config_loads_bundled_template() {
    use motion_mesh_server::config::ServerConfig;

    let ctx = ModelContext::from_config(&ServerConfig::default()).expect("bundled template should load");
    assert_eq!(ctx.topology().vertex_count(), 6);
    assert_eq!(ctx.topology().face_count(), 8);
    assert_eq!(ctx.model().name(), "mock");
}
