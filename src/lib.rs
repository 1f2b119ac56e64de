// Text-to-motion mesh server.
//
// Pipeline: text → motion model → normalized features → denormalize →
// layout decode → per-frame mesh → GLB → base64.

pub mod api;
pub mod body_model;
pub mod config;
pub mod context;
pub mod error;
pub mod layout;
pub mod mesh;
pub mod model;
pub mod normalization;
pub mod orchestrator;
pub mod scene;
pub mod tensor_io;
