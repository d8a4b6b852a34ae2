use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Multipart body of `POST /upload-image`. Documentation only; the handler reads the stream
/// field by field.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(unused)]
pub struct UploadImageForm {
    /// The image file. Its part must carry an `image/*` content type.
    #[schema(value_type = String, format = Binary)]
    pub image: Vec<u8>,
    /// Job to store the image under (defaults to `test`)
    pub job_id: Option<String>,
}

/// Response for a stored image
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageResponse {
    /// Absolute URL the image is served from
    #[schema(example = "http://localhost:3000/uploads/job1/1700000000000.png")]
    pub image_url: String,
}

/// Request to delete one stored image
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteImageRequest {
    /// URL previously returned by `POST /upload-image`
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Acknowledgement for delete operations
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
