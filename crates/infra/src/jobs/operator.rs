//! Submission and query façade over the registry, launcher and repository.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use batchforge_core::{
    BatchError, BatchResult, JobExecution, JobExecutionId, JobParameters, StepExecution,
};

use super::launcher::JobLauncher;
use super::registry::JobRegistry;
use crate::repository::JobRepository;

/// Returned by [`JobOperator::launch`] once the job has been handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchAcknowledgement {
    pub job_name: String,
    pub message: String,
}

/// A submitted launch: the acknowledgement plus the worker running it.
#[derive(Debug)]
pub struct LaunchHandle {
    pub acknowledgement: LaunchAcknowledgement,
    pub worker: JoinHandle<BatchResult<JobExecution>>,
}

impl LaunchHandle {
    /// Block until the worker finishes.
    pub fn wait(self) -> BatchResult<JobExecution> {
        self.worker
            .join()
            .map_err(|_| BatchError::action("launch worker panicked"))?
    }
}

pub struct JobOperator<S: JobRepository> {
    registry: Arc<JobRegistry>,
    launcher: Arc<JobLauncher<S>>,
}

impl<S: JobRepository> Clone for JobOperator<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            launcher: self.launcher.clone(),
        }
    }
}

impl<S: JobRepository + 'static> JobOperator<S> {
    pub fn new(registry: JobRegistry, repository: S) -> Self {
        Self {
            registry: Arc::new(registry),
            launcher: Arc::new(JobLauncher::new(repository)),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn registered_jobs(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Submit a launch and return without waiting for it.
    ///
    /// Unknown jobs and invalid definitions fail here, before any record is
    /// written. The outcome is observable through the query methods.
    pub fn launch(
        &self,
        job_name: &str,
        parameters: JobParameters,
        force: bool,
    ) -> BatchResult<LaunchHandle> {
        let job = self.registry.get(job_name)?;
        job.validate()?;

        let launcher = self.launcher.clone();
        let worker = thread::Builder::new()
            .name(format!("batch-{job_name}"))
            .spawn(move || {
                let result = launcher.run(&job, &parameters, force);
                if let Err(err) = &result {
                    error!(job_name = %job.name(), error = %err, "launch failed");
                }
                result
            })
            .map_err(|e| BatchError::action(format!("failed to spawn launch worker: {e}")))?;

        info!(job_name, force, "job submitted");
        Ok(LaunchHandle {
            acknowledgement: LaunchAcknowledgement {
                job_name: job_name.to_string(),
                message: "Job submitted".to_string(),
            },
            worker,
        })
    }

    /// Launch on the calling thread and wait for the terminal record.
    pub fn run(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        force: bool,
    ) -> BatchResult<JobExecution> {
        let job = self.registry.get(job_name)?;
        self.launcher.run(&job, parameters, force)
    }

    pub fn executions(&self) -> BatchResult<Vec<JobExecution>> {
        Ok(self.launcher.repository().list_job_executions()?)
    }

    pub fn execution(&self, id: JobExecutionId) -> BatchResult<JobExecution> {
        self.launcher
            .repository()
            .get_job_execution(id)?
            .ok_or_else(|| BatchError::not_found(format!("job execution {id}")))
    }

    pub fn step_executions(&self, id: JobExecutionId) -> BatchResult<Vec<StepExecution>> {
        self.execution(id)?;
        Ok(self.launcher.repository().list_step_executions(id)?)
    }
}
