//! OpenAPI documentation, served as JSON at `/api-docs/openapi.json` and rendered at `/docs`.

use utoipa::OpenApi;

use crate::api::handlers::{health, images, jobs, uploads};
use crate::api::models::{
    health::HealthResponse,
    images::{DeleteImageRequest, SuccessResponse, UploadImageForm, UploadImageResponse},
};
use crate::errors::ErrorBody;

// Stub handler for the static file route (documentation only); the route itself is a
// `ServeDir` nested under `/uploads`.

/// Fetch a stored image.
#[utoipa::path(
    get,
    path = "/uploads/{jobId}/{filename}",
    tag = "images",
    summary = "Get image",
    description = "Raw bytes of a stored image, with a content type guessed from its extension.",
    params(
        ("jobId" = String, Path, description = "Job the image was uploaded under"),
        ("filename" = String, Path, description = "File name from the upload response"),
    ),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 404, description = "No such image")
    )
)]
#[allow(unused)]
fn get_image() {}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "imgctl",
        description = "Job-scoped image storage: upload images into job folders, serve them back by URL, \
                       and delete single images or whole jobs."
    ),
    paths(
        health::health,
        uploads::upload_image,
        get_image,
        images::delete_image,
        jobs::delete_job,
    ),
    components(schemas(
        HealthResponse,
        UploadImageForm,
        UploadImageResponse,
        DeleteImageRequest,
        SuccessResponse,
        ErrorBody,
    )),
    tags(
        (name = "health", description = "Liveness"),
        (name = "images", description = "Upload, fetch and delete single images"),
        (name = "jobs", description = "Job folder management"),
    )
)]
pub struct ApiDoc;
