//! Error types shared across the pipeline.
//!
//! `LoadError` covers everything that can go wrong while the process is
//! starting (config, tensor files, layout validation). `GenerationError`
//! is the request-scoped taxonomy and knows how to render itself as an
//! HTTP response.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const NO_FEATURES_MESSAGE: &str = "Generation failed - no features produced";
pub const EMPTY_TEXT_MESSAGE: &str = "Text is required";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid safetensors file {path}: {reason}")]
    SafeTensors { path: PathBuf, reason: String },

    #[error("tensor '{name}' not found in {path}")]
    MissingTensor { path: PathBuf, name: String },

    #[error("tensor '{name}' has unsupported dtype {dtype}")]
    UnsupportedDtype { name: String, dtype: String },

    #[error("tensor '{name}' has invalid shape: {reason}")]
    Shape { name: String, reason: String },

    #[error("feature layout mismatch: {0}")]
    Layout(String),

    #[error("invalid normalization statistics: {0}")]
    Normalization(String),

    #[error("invalid body model: {0}")]
    BodyModel(String),
}

/// Failures that can end a single generation request.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Generation(String),

    #[error("Mesh generation failed: {0}")]
    Solver(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Error: {0}")]
    Internal(String),
}

impl GenerationError {
    /// Tags a solver failure with the frame it happened on.
    pub fn at_frame(self, index: usize) -> Self {
        match self {
            GenerationError::Solver(msg) => GenerationError::Solver(format!("frame {}: {}", index, msg)),
            other => other,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ResponseError for GenerationError {
    fn status_code(&self) -> StatusCode {
        match self {
            GenerationError::Validation(_) => StatusCode::BAD_REQUEST,
            GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GenerationError::Generation(_)
            | GenerationError::Solver(_)
            | GenerationError::Configuration(_)
            | GenerationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(GenerationError::Validation(EMPTY_TEXT_MESSAGE.into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(GenerationError::Generation(NO_FEATURES_MESSAGE.into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(GenerationError::Solver("bad pose".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(GenerationError::Internal("boom".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(GenerationError::Timeout(Duration::from_secs(5)).status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_at_frame_only_tags_solver_errors() {
        let tagged = GenerationError::Solver("empty mesh".into()).at_frame(7);
        assert_eq!(tagged.to_string(), "Mesh generation failed: frame 7: empty mesh");

        let untouched = GenerationError::Internal("boom".into()).at_frame(7);
        assert_eq!(untouched.to_string(), "Error: boom");
    }

    #[test]
    fn test_timeout_message_keeps_sub_second_precision() {
        assert_eq!(
            GenerationError::Timeout(Duration::from_millis(50)).to_string(),
            "Generation timed out after 50ms"
        );
        assert_eq!(
            GenerationError::Timeout(Duration::from_secs(120)).to_string(),
            "Generation timed out after 120s"
        );
    }
}
