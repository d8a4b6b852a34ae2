use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use metrics::counter;
use tracing::info;

use crate::AppState;
use crate::api::extractors::RequestOrigin;
use crate::api::models::images::{DeleteImageRequest, SuccessResponse};
use crate::errors::{Error, Result};
use crate::storage::StorageError;

#[utoipa::path(
    delete,
    path = "/delete-image",
    tag = "images",
    summary = "Delete image",
    description = "Delete one stored image, addressed by the URL returned when it was uploaded. \
                   The URL must point at this service under `/uploads/`.",
    request_body = DeleteImageRequest,
    responses(
        (status = 200, description = "Image deleted", body = SuccessResponse),
        (status = 400, description = "Missing imageUrl, malformed body, or a URL that does not name a stored image", body = crate::errors::ErrorBody),
        (status = 404, description = "File not found", body = crate::errors::ErrorBody),
        (status = 500, description = "Failed to delete image", body = crate::errors::ErrorBody)
    )
)]
pub async fn delete_image(
    State(state): State<AppState>,
    origin: RequestOrigin,
    body: std::result::Result<Json<DeleteImageRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>> {
    // A body that is not declared as JSON carries no imageUrl; malformed JSON is still an error
    let request = match body {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => DeleteImageRequest::default(),
        Err(rejection) => return Err(rejection.into()),
    };

    let image_url = request
        .image_url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| Error::bad_request("imageUrl required"))?;

    let relative = origin
        .upload_path(&image_url)
        .ok_or_else(|| Error::bad_request("Invalid image path"))?;

    state.storage.delete_image(&relative).await.map_err(|e| match e {
        StorageError::InvalidPath(_) => Error::bad_request("Invalid image path"),
        StorageError::NotFound(_) => Error::NotFound {
            message: "File not found".to_string(),
        },
        StorageError::Io(source) => Error::Storage {
            message: "Failed to delete image".to_string(),
            source,
        },
    })?;

    counter!("imgctl_images_deleted_total").increment(1);
    info!(path = %relative, "Image deleted");

    Ok(Json(SuccessResponse::ok()))
}
