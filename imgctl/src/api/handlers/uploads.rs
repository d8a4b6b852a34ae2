use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use bytes::{Bytes, BytesMut};
use metrics::counter;
use tracing::{debug, info};

use crate::AppState;
use crate::api::extractors::RequestOrigin;
use crate::api::models::images::{UploadImageForm, UploadImageResponse};
use crate::errors::{Error, Result};
use crate::storage::{self, StorageError};

/// Multipart field carrying the image file.
pub const IMAGE_FIELD: &str = "image";
/// Multipart text field naming the target job.
pub const JOB_ID_FIELD: &str = "jobId";

/// File part accepted from the multipart stream, held until the whole form has been read.
struct ReceivedImage {
    file_name: String,
    data: Bytes,
}

#[utoipa::path(
    post,
    path = "/upload-image",
    tag = "images",
    summary = "Upload image",
    description = "Store one image under a job folder and return the absolute URL it is served from. \
                   Any `image/*` content type is accepted; other files are rejected without being stored.",
    request_body(
        content = UploadImageForm,
        content_type = "multipart/form-data",
        description = "An `image` file part and an optional `jobId` text field"
    ),
    responses(
        (status = 200, description = "Image stored", body = UploadImageResponse),
        (status = 400, description = "Invalid file type, file too large, unexpected field, missing image or invalid jobId", body = crate::errors::ErrorBody),
        (status = 500, description = "Upload failed", body = crate::errors::ErrorBody)
    )
)]
pub async fn upload_image(
    State(state): State<AppState>,
    origin: RequestOrigin,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadImageResponse>> {
    // Anything that is not a multipart body cannot carry an image
    let Ok(mut multipart) = multipart else {
        return Err(reject("missing_image", "No image provided"));
    };

    // Validated at startup to fit in memory
    let max_file_size = usize::try_from(state.config.storage.max_file_size).unwrap_or(usize::MAX);

    let mut image: Option<ReceivedImage> = None;
    let mut job_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        if field.file_name().is_none() {
            // Plain text fields; only the job id means anything
            if field_name == JOB_ID_FIELD {
                job_id = Some(field.text().await.map_err(multipart_error)?);
            }
            continue;
        }

        if field_name != IMAGE_FIELD || image.is_some() {
            return Err(reject("unexpected_field", "Unexpected field"));
        }

        let content_type = field.content_type().unwrap_or("").to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            debug!(content_type = %content_type, "Rejecting non-image upload");
            return Err(reject("invalid_type", "Invalid file type"));
        }

        image = Some(read_image(field, max_file_size).await?);
    }

    let image = image.ok_or_else(|| reject("missing_image", "No image provided"))?;
    let job_id = job_id
        .filter(|job_id| !job_id.is_empty())
        .unwrap_or_else(|| state.config.storage.default_job_id.clone());

    let extension = storage::extension_of(&image.file_name);
    let stored = state
        .storage
        .store_image(&job_id, extension, &image.data)
        .await
        .map_err(|e| match e {
            StorageError::InvalidPath(_) => reject("invalid_job_id", "Invalid jobId"),
            StorageError::Io(source) => Error::Storage {
                message: "Upload failed".to_string(),
                source,
            },
            StorageError::NotFound(what) => Error::Storage {
                message: "Upload failed".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, what),
            },
        })?;

    counter!("imgctl_images_uploaded_total").increment(1);
    counter!("imgctl_upload_bytes_total").increment(image.data.len() as u64);
    info!(
        job_id = %stored.job_id,
        filename = %stored.filename,
        bytes = image.data.len(),
        "Image uploaded"
    );

    Ok(Json(UploadImageResponse {
        image_url: origin.image_url(&stored),
    }))
}

/// Buffer a file part, aborting as soon as it grows past `max_file_size`.
async fn read_image(mut field: Field<'_>, max_file_size: usize) -> Result<ReceivedImage> {
    let file_name = field.file_name().unwrap_or("").to_string();
    let mut data = BytesMut::new();

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if data.len() + chunk.len() > max_file_size {
            return Err(reject("too_large", "File too large"));
        }
        data.extend_from_slice(&chunk);
    }

    Ok(ReceivedImage {
        file_name,
        data: data.freeze(),
    })
}

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return reject("too_large", "File too large");
    }
    reject("malformed", e.body_text())
}

fn reject(reason: &'static str, message: impl Into<String>) -> Error {
    counter!("imgctl_upload_rejections_total", "reason" => reason).increment(1);
    Error::bad_request(message)
}
