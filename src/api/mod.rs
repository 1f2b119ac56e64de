//! # HTTP API Module
//!
//! This module holds the web-facing side of the server. The `routes`
//! submodule defines the endpoints, their handlers and the server bootstrap.

pub mod routes;
