//! HTTP API layer.
//!
//! - [`handlers`]: Axum route handlers for health, uploads, image and job deletion
//! - [`models`]: Request and response bodies, annotated for OpenAPI generation
//! - [`extractors`]: Request origin and JSON extractors shared by the handlers
//!
//! Stored images themselves are served by `tower_http::services::ServeDir` under `/uploads`,
//! wired up in [`crate::build_router`].

pub mod extractors;
pub mod handlers;
pub mod models;
