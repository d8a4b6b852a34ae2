use axum::{
    Json,
    extract::{Path, State},
};
use metrics::counter;
use tracing::info;

use crate::AppState;
use crate::api::models::images::SuccessResponse;
use crate::errors::{Error, Result};
use crate::storage::StorageError;

#[utoipa::path(
    delete,
    path = "/delete-job/{jobId}",
    tag = "jobs",
    summary = "Delete job",
    description = "Delete a job folder and every image in it. Deleting a job that does not exist succeeds.",
    params(
        ("jobId" = String, Path, description = "Job whose folder is removed"),
    ),
    responses(
        (status = 200, description = "Job folder removed, or there was none", body = SuccessResponse),
        (status = 400, description = "The job id resolves outside the storage root", body = crate::errors::ErrorBody),
        (status = 500, description = "Failed to delete job folder", body = crate::errors::ErrorBody)
    )
)]
pub async fn delete_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Json<SuccessResponse>> {
    let removed = match state.storage.delete_job(&job_id).await {
        Ok(removed) => removed,
        Err(StorageError::InvalidPath(_)) => return Err(Error::bad_request("Invalid path")),
        Err(StorageError::NotFound(_)) => false,
        Err(StorageError::Io(source)) => {
            return Err(Error::Storage {
                message: "Failed to delete job folder".to_string(),
                source,
            });
        }
    };

    if removed {
        counter!("imgctl_jobs_deleted_total").increment(1);
        info!(job_id = %job_id, "Job folder deleted");
    } else {
        info!(job_id = %job_id, "Job folder already absent");
    }

    Ok(Json(SuccessResponse::ok()))
}
