use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};

use batchforge_core::JobParameters;
use batchforge_infra::jobs::LaunchAcknowledgement;

use crate::app::dto::{JobSummary, LaunchQuery, LaunchRequest};
use crate::app::errors;
use crate::app::services::AppServices;

pub async fn list_jobs(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let jobs: Vec<JobSummary> = services
        .operator
        .registry()
        .jobs()
        .map(|job| JobSummary::from(job.as_ref()))
        .collect();
    Json(jobs)
}

/// Hand the job to a worker and answer 202 without waiting for it.
pub async fn launch_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_name): Path<String>,
    Query(query): Query<LaunchQuery>,
    body: Option<Json<LaunchRequest>>,
) -> axum::response::Response {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let force = request.force.or(query.force).unwrap_or(false);
    let parameters = JobParameters::from_json_map(&request.parameters);

    match services.operator.launch(&job_name, parameters, force) {
        // The worker is detached; its outcome is read back through /executions.
        Ok(handle) => {
            let ack: LaunchAcknowledgement = handle.acknowledgement;
            (StatusCode::ACCEPTED, Json(ack)).into_response()
        }
        Err(e) => errors::batch_error_to_response(e),
    }
}
