use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use batchforge_core::JobExecutionId;

use crate::app::errors;
use crate::app::services::AppServices;

fn parse_id(raw: &str) -> Result<JobExecutionId, axum::response::Response> {
    raw.parse()
        .map_err(|e: batchforge_core::IdParseError| {
            errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string())
        })
}

pub async fn list_executions(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.blocking(|operator| operator.executions()).await {
        Ok(executions) => Json(executions).into_response(),
        Err(resp) => resp,
    }
}

pub async fn get_execution(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.blocking(move |operator| operator.execution(id)).await {
        Ok(execution) => Json(execution).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_execution_steps(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .blocking(move |operator| operator.step_executions(id))
        .await
    {
        Ok(steps) => Json(steps).into_response(),
        Err(resp) => resp,
    }
}
