//! API request and response data models.
//!
//! Field names follow the wire format (`imageUrl`, `jobId`); every model derives `ToSchema` so
//! it shows up in the generated OpenAPI document.

pub mod health;
pub mod images;
