use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Liveness response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always `ok`
    #[schema(example = "ok")]
    pub status: String,
    /// Current server time, ISO-8601 UTC with millisecond precision
    #[schema(example = "2024-01-01T00:00:00.000Z")]
    pub timestamp: String,
}
