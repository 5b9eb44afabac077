use axum::{
    Router,
    routing::{get, post},
};

pub mod executions;
pub mod jobs;
pub mod system;

/// Router for job submission and execution queries.
pub fn router() -> Router {
    Router::new()
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:job_name/launch", post(jobs::launch_job))
        .route("/executions", get(executions::list_executions))
        .route("/executions/:id", get(executions::get_execution))
        .route("/executions/:id/steps", get(executions::list_execution_steps))
}
