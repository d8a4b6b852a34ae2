//! HTTP request handlers for all API endpoints.
//!
//! # Handler Modules
//!
//! - [`health`]: Liveness check
//! - [`uploads`]: Multipart image upload into a job folder
//! - [`images`]: Deletion of a single image by its public URL
//! - [`jobs`]: Deletion of a whole job folder
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which renders as a status code and an
//! `{"error": "..."}` JSON body.

pub mod health;
pub mod images;
pub mod jobs;
pub mod uploads;
