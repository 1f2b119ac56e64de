//! # Web Server Routes for the Motion Generation API
//!
//! This module defines the Actix web server routes and handlers. It exposes
//! text-to-motion generation, a liveness probe and a readiness report.

use crate::config::ServerConfig;
use crate::context::AccessPolicy;
use crate::error::{ErrorBody, GenerationError};
use crate::orchestrator::Orchestrator;
use actix_cors::Cors;
use actix_web::middleware::{Condition, Logger};
use actix_web::rt::time::timeout;
use actix_web::{error, web, App, HttpRequest, HttpResponse, HttpServer};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Shared state handed to every handler through `web::Data`.
#[derive(Debug, Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, request_timeout: Duration) -> Self {
        Self {
            orchestrator,
            request_timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub lang_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub model: String,
    pub solver: String,
    pub feature_dim: usize,
    pub vertex_count: usize,
    pub face_count: usize,
    pub access_policy: AccessPolicy,
}

/// Handles `POST /api/generate`.
///
/// Steps:
/// 1. Validate the text (trimmed, non-empty). The model is never invoked for empty text.
/// 2. Run the model on the blocking pool under the configured deadline.
/// 3. Decode, mesh, export and encode every frame on the blocking pool.
///
/// # Returns
/// - **200 OK** with `{success, glb_frames, num_frames, text, lang_token}`.
/// - **400 Bad Request** with `{error}` when the text is empty.
/// - **500 Internal Server Error** with `{error}` on generation, solver or internal failures.
/// - **504 Gateway Timeout** with `{error}` when the model call exceeds the deadline.
///   The model call itself keeps running on its thread; there is no cancellation.
pub async fn generate(
    state: web::Data<AppState>,
    body: web::Json<GenerateRequest>,
) -> Result<HttpResponse, GenerationError> {
    let request_id = Uuid::new_v4();
    let GenerateRequest { text, lang_token } = body.into_inner();

    let (text, lang_token) = state
        .orchestrator
        .prepare(&text, lang_token.as_deref())
        .map_err(|e| {
            log::warn!("[{}] rejected request: {}", request_id, e);
            e
        })?;
    log::info!("[{}] generating for lang_token '{}' ({} chars)", request_id, lang_token, text.chars().count());

    let deadline = state.request_timeout;
    let features = {
        let model_state = state.clone();
        let (text, lang_token) = (text.clone(), lang_token.clone());
        let call = web::block(move || model_state.orchestrator.generate_features(&text, &lang_token));
        match timeout(deadline, call).await {
            Err(_) => return Err(report(request_id, GenerationError::Timeout(deadline))),
            Ok(Err(blocking)) => return Err(report(request_id, GenerationError::Internal(blocking.to_string()))),
            Ok(Ok(result)) => result.map_err(|e| report(request_id, e))?,
        }
    };

    let render_state = state.clone();
    let response = web::block(move || render_state.orchestrator.respond(&features, text, lang_token))
        .await
        .map_err(|blocking| report(request_id, GenerationError::Internal(blocking.to_string())))?
        .map_err(|e| report(request_id, e))?;

    log::info!("[{}] returning {} frames", request_id, response.num_frames);
    Ok(HttpResponse::Ok().json(response))
}

// Failures are logged in full here; the client only sees the short message.
fn report(request_id: Uuid, err: GenerationError) -> GenerationError {
    log::error!("[{}] generation failed: {:?}", request_id, err);
    err
}

/// Handles `GET /api/health`. Always 200; it does not look at the model.
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        message: "API is running",
    })
}

/// Handles `GET /api/ready`.
///
/// The context is fully loaded before the server binds, so reaching this
/// handler means the model is ready. The body reports what was loaded.
pub async fn ready(state: web::Data<AppState>) -> HttpResponse {
    let ctx = state.orchestrator.context();
    HttpResponse::Ok().json(ReadyResponse {
        ready: true,
        model: ctx.model().name().to_string(),
        solver: ctx.solver().name().to_string(),
        feature_dim: ctx.normalization().dim(),
        vertex_count: ctx.topology().vertex_count(),
        face_count: ctx.topology().face_count(),
        access_policy: ctx.device().policy(),
    })
}

// Malformed JSON bodies get the same `{error}` shape as every other failure.
fn json_error_handler(err: error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = format!("Invalid request body: {}", err);
    log::warn!("{}", message);
    error::InternalError::from_response(err, HttpResponse::BadRequest().json(ErrorBody { error: message })).into()
}

/// Cross-origin access for browser front-ends. Any origin is allowed when enabled.
pub fn cors(enabled: bool) -> Condition<Cors> {
    Condition::new(enabled, Cors::permissive())
}

/// Registers the API routes. Shared by `run_server` and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .route("/api/generate", web::post().to(generate))
        .route("/api/health", web::get().to(health))
        .route("/api/ready", web::get().to(ready));
}

/// Initializes and runs the Actix web server.
///
/// Binds to `config.host:config.port`. Port 0 asks the OS for a free port;
/// the bound addresses are logged either way.
///
/// # Returns
/// A `std::io::Result<()>` which is `Ok(())` once the server shuts down,
/// or an `Err` if binding fails.
pub async fn run_server(config: &ServerConfig, state: AppState) -> std::io::Result<()> {
    let data = web::Data::new(state);
    let cors_enabled = config.cors;
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(cors(cors_enabled))
            .wrap(Logger::default())
            .app_data(data.clone())
            .configure(configure)
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }
    let server = server.bind((config.host.as_str(), config.port))?;

    for addr in server.addrs() {
        log::info!("API URL: http://{}/api/generate", addr);
        log::info!("Health check: http://{}/api/health", addr);
    }
    server.run().await
}
