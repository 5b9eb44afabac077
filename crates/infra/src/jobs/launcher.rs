//! Job launcher: instance resolution, resumability and the execution lifecycle.

use tracing::{error, info, instrument};

use batchforge_core::{BatchResult, JobExecution, JobInstance, JobParameters};

use super::definition::JobDefinition;
use super::executor::StepExecutor;
use crate::repository::JobRepository;

/// Runs jobs against a repository. Blocking; one call per worker.
///
/// Instances are keyed by `(job_name, job_key)`. A relaunch without `force`
/// skips every step that has a `Completed` record under the instance, in any
/// earlier execution. Nothing serializes two concurrent launches of the same
/// instance.
#[derive(Debug, Clone)]
pub struct JobLauncher<S: JobRepository> {
    repository: S,
}

impl<S: JobRepository> JobLauncher<S> {
    pub fn new(repository: S) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &S {
        &self.repository
    }

    /// Run `job` for `parameters` and return the terminal execution record.
    ///
    /// Config and repository faults raised before the execution record exists
    /// are returned as `Err`. Once the execution exists, a step failure is
    /// reported through the returned record's `Failed` status instead.
    #[instrument(skip_all, fields(job_name = %job.name(), force), err)]
    pub fn run(
        &self,
        job: &JobDefinition,
        parameters: &JobParameters,
        force: bool,
    ) -> BatchResult<JobExecution> {
        job.validate()?;

        let instance = self.resolve_instance(job.name(), parameters)?;
        let completed = if force {
            Default::default()
        } else {
            self.repository.completed_step_names(instance.id)?
        };

        let mut execution = JobExecution::start(instance.id);
        self.repository.create_job_execution(&execution)?;
        info!(
            job_execution_id = %execution.id,
            job_instance_id = %instance.id,
            "job execution started"
        );

        let executor = StepExecutor::new(&self.repository);
        let mut failure = None;
        for step in job.steps() {
            if completed.contains(step.name()) {
                info!(
                    job_execution_id = %execution.id,
                    step_name = %step.name(),
                    "step already completed for this instance; skipping"
                );
                continue;
            }
            if let Err(fault) = executor.execute(step, job.name(), execution.id, parameters) {
                failure = Some(fault);
                break;
            }
        }

        match failure {
            None => execution.mark_completed(),
            Some(fault) => execution.mark_failed(fault.to_string()),
        }
        if let Err(err) = self.repository.update_job_execution(&execution) {
            error!(job_execution_id = %execution.id, error = %err, "failed to persist job execution");
            return Err(err.into());
        }

        info!(
            job_execution_id = %execution.id,
            status = %execution.status,
            "job execution finished"
        );
        Ok(execution)
    }

    fn resolve_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> BatchResult<JobInstance> {
        let job_key = parameters.job_key();
        if let Some(instance) = self.repository.find_instance(job_name, &job_key)? {
            return Ok(instance);
        }
        let instance = self
            .repository
            .create_instance(job_name, &job_key, parameters)?;
        info!(job_instance_id = %instance.id, job_key = %job_key, "job instance created");
        Ok(instance)
    }
}
