use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use batchforge_core::{
    BatchError, JobExecution, JobExecutionId, JobInstance, JobInstanceId, JobParameter,
    JobParameters, StepExecution,
};

/// Repository operation error.
///
/// These are **infrastructure errors** (missing rows, constraint conflicts,
/// storage failures) as opposed to step faults.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for BatchError {
    fn from(err: RepositoryError) -> Self {
        BatchError::Repository(err.to_string())
    }
}

/// Store of job instances, parameters and execution records.
///
/// ## Unit of work
///
/// Every method is one independently committed unit of work. The launcher
/// relies on this: a step record written as `Completed` stays visible to a
/// later relaunch even if the process dies right after.
///
/// ## Concurrency
///
/// Implementations must be safe to share across worker threads. Nothing here
/// serializes two launches of the same `(job_name, job_key)`; adapters may
/// narrow the race on instance creation (see [`JobRepository::create_instance`]).
pub trait JobRepository: Send + Sync {
    /// Look up an instance by its identity.
    fn find_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> Result<Option<JobInstance>, RepositoryError>;

    /// Create an instance and its parameter rows in one unit of work.
    ///
    /// If an instance with the same identity already exists, it is returned
    /// unchanged and no parameter rows are written.
    fn create_instance(
        &self,
        job_name: &str,
        job_key: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError>;

    fn get_instance(&self, id: JobInstanceId) -> Result<Option<JobInstance>, RepositoryError>;

    fn instance_parameters(&self, id: JobInstanceId) -> Result<Vec<JobParameter>, RepositoryError>;

    /// Names of steps with at least one `Completed` record under the instance,
    /// across all of its executions.
    fn completed_step_names(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<HashSet<String>, RepositoryError>;

    fn create_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError>;

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError>;

    fn get_job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError>;

    /// All job executions, oldest first.
    fn list_job_executions(&self) -> Result<Vec<JobExecution>, RepositoryError>;

    fn create_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError>;

    fn update_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError>;

    /// Step records of one job execution, in the order they were started.
    fn list_step_executions(
        &self,
        job_execution_id: JobExecutionId,
    ) -> Result<Vec<StepExecution>, RepositoryError>;
}

impl<R> JobRepository for Arc<R>
where
    R: JobRepository + ?Sized,
{
    fn find_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        (**self).find_instance(job_name, job_key)
    }

    fn create_instance(
        &self,
        job_name: &str,
        job_key: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        (**self).create_instance(job_name, job_key, parameters)
    }

    fn get_instance(&self, id: JobInstanceId) -> Result<Option<JobInstance>, RepositoryError> {
        (**self).get_instance(id)
    }

    fn instance_parameters(&self, id: JobInstanceId) -> Result<Vec<JobParameter>, RepositoryError> {
        (**self).instance_parameters(id)
    }

    fn completed_step_names(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<HashSet<String>, RepositoryError> {
        (**self).completed_step_names(instance_id)
    }

    fn create_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        (**self).create_job_execution(execution)
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        (**self).update_job_execution(execution)
    }

    fn get_job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError> {
        (**self).get_job_execution(id)
    }

    fn list_job_executions(&self) -> Result<Vec<JobExecution>, RepositoryError> {
        (**self).list_job_executions()
    }

    fn create_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError> {
        (**self).create_step_execution(execution)
    }

    fn update_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError> {
        (**self).update_step_execution(execution)
    }

    fn list_step_executions(
        &self,
        job_execution_id: JobExecutionId,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        (**self).list_step_executions(job_execution_id)
    }
}
