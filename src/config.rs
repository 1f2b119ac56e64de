use crate::context::AccessPolicy;
use crate::error::LoadError;
use crate::layout::MODEL_FEATURE_DIM;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16, // 0 lets the OS pick a free port
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub normalization_path: Option<PathBuf>, // mean/std safetensors; None means identity
    #[serde(default = "default_feature_dim")]
    pub feature_dim: usize, // only used when normalization_path is None
    #[serde(default = "default_body_model_path")]
    pub body_model_path: PathBuf,
    #[serde(default = "default_model")]
    pub model: String, // "mock" or a clip-library .safetensors path
    #[serde(default = "default_mock_frames")]
    pub mock_frames: usize,
    #[serde(default = "default_lang_token")]
    pub default_lang_token: String,
    #[serde(default)]
    pub shape: Option<Vec<f32>>,
    #[serde(default)]
    pub access_policy: AccessPolicy,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_cors")]
    pub cors: bool, // permissive CORS for browser clients
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_feature_dim() -> usize { MODEL_FEATURE_DIM }
fn default_body_model_path() -> PathBuf { PathBuf::from("resources/body_model/template.safetensors") }
fn default_model() -> String { "mock".to_string() }
fn default_mock_frames() -> usize { 24 }
fn default_lang_token() -> String { "how2sign".to_string() }
fn default_request_timeout_secs() -> u64 { 120 }
fn default_cors() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            normalization_path: None,
            feature_dim: default_feature_dim(),
            body_model_path: default_body_model_path(),
            model: default_model(),
            mock_frames: default_mock_frames(),
            default_lang_token: default_lang_token(),
            shape: None,
            access_policy: AccessPolicy::default(),
            request_timeout_secs: default_request_timeout_secs(),
            cors: default_cors(),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path) -> Result<Self, LoadError> {
        let mut file = File::open(config_path).map_err(|source| LoadError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|source| LoadError::Io {
            path: config_path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&contents).map_err(|source| LoadError::Config {
            path: config_path.to_path_buf(),
            source,
        })
    }
}
