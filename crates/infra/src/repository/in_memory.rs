use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use batchforge_core::{
    BatchStatus, JobExecution, JobExecutionId, JobInstance, JobInstanceId, JobParameter,
    JobParameters, StepExecution, StepExecutionId,
};

use super::r#trait::{JobRepository, RepositoryError};

#[derive(Debug, Default)]
struct Tables {
    instances: HashMap<JobInstanceId, JobInstance>,
    instance_keys: HashMap<(String, String), JobInstanceId>,
    parameters: HashMap<JobInstanceId, Vec<JobParameter>>,
    job_executions: HashMap<JobExecutionId, JobExecution>,
    step_executions: HashMap<StepExecutionId, StepExecution>,
}

/// In-memory execution repository.
///
/// Intended for tests/dev. All tables sit behind one lock, so each trait call
/// is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    tables: RwLock<Tables>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, RepositoryError> {
        self.tables
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, RepositoryError> {
        self.tables
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))
    }
}

impl JobRepository for InMemoryJobRepository {
    fn find_instance(
        &self,
        job_name: &str,
        job_key: &str,
    ) -> Result<Option<JobInstance>, RepositoryError> {
        let tables = self.read()?;
        Ok(tables
            .instance_keys
            .get(&(job_name.to_string(), job_key.to_string()))
            .and_then(|id| tables.instances.get(id))
            .cloned())
    }

    fn create_instance(
        &self,
        job_name: &str,
        job_key: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, RepositoryError> {
        let mut tables = self.write()?;
        let identity = (job_name.to_string(), job_key.to_string());

        if let Some(existing) = tables
            .instance_keys
            .get(&identity)
            .and_then(|id| tables.instances.get(id))
        {
            return Ok(existing.clone());
        }

        let instance = JobInstance::new(job_name, job_key);
        tables.instance_keys.insert(identity, instance.id);
        tables
            .parameters
            .insert(instance.id, parameters.to_records(instance.id));
        tables.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    fn get_instance(&self, id: JobInstanceId) -> Result<Option<JobInstance>, RepositoryError> {
        Ok(self.read()?.instances.get(&id).cloned())
    }

    fn instance_parameters(&self, id: JobInstanceId) -> Result<Vec<JobParameter>, RepositoryError> {
        Ok(self.read()?.parameters.get(&id).cloned().unwrap_or_default())
    }

    fn completed_step_names(
        &self,
        instance_id: JobInstanceId,
    ) -> Result<HashSet<String>, RepositoryError> {
        let tables = self.read()?;
        Ok(tables
            .step_executions
            .values()
            .filter(|step| step.status == BatchStatus::Completed)
            .filter(|step| {
                tables
                    .job_executions
                    .get(&step.job_execution_id)
                    .is_some_and(|job| job.job_instance_id == instance_id)
            })
            .map(|step| step.step_name.clone())
            .collect())
    }

    fn create_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        if !tables.instances.contains_key(&execution.job_instance_id) {
            return Err(RepositoryError::NotFound(format!(
                "job instance {}",
                execution.job_instance_id
            )));
        }
        if tables.job_executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "job execution {} already exists",
                execution.id
            )));
        }
        tables.job_executions.insert(execution.id, execution.clone());
        Ok(())
    }

    fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        match tables.job_executions.get_mut(&execution.id) {
            Some(row) => {
                *row = execution.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!(
                "job execution {}",
                execution.id
            ))),
        }
    }

    fn get_job_execution(&self, id: JobExecutionId) -> Result<Option<JobExecution>, RepositoryError> {
        Ok(self.read()?.job_executions.get(&id).cloned())
    }

    fn list_job_executions(&self) -> Result<Vec<JobExecution>, RepositoryError> {
        let tables = self.read()?;
        let mut result: Vec<_> = tables.job_executions.values().cloned().collect();
        result.sort_by_key(|e| (e.start_time, e.id));
        Ok(result)
    }

    fn create_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        if !tables.job_executions.contains_key(&execution.job_execution_id) {
            return Err(RepositoryError::NotFound(format!(
                "job execution {}",
                execution.job_execution_id
            )));
        }
        if tables.step_executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(format!(
                "step execution {} already exists",
                execution.id
            )));
        }
        tables.step_executions.insert(execution.id, execution.clone());
        Ok(())
    }

    fn update_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        match tables.step_executions.get_mut(&execution.id) {
            Some(row) => {
                *row = execution.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!(
                "step execution {}",
                execution.id
            ))),
        }
    }

    fn list_step_executions(
        &self,
        job_execution_id: JobExecutionId,
    ) -> Result<Vec<StepExecution>, RepositoryError> {
        let tables = self.read()?;
        let mut result: Vec<_> = tables
            .step_executions
            .values()
            .filter(|s| s.job_execution_id == job_execution_id)
            .cloned()
            .collect();
        result.sort_by_key(|s| (s.start_time, s.id));
        Ok(result)
    }
}
