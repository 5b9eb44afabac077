use std::collections::BTreeMap;
use std::sync::Arc;

use batchforge_core::{BatchError, BatchResult};

use super::definition::JobDefinition;

/// Read-only name → definition map, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<JobDefinition>>,
}

impl JobRegistry {
    pub fn builder() -> JobRegistryBuilder {
        JobRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> BatchResult<Arc<JobDefinition>> {
        self.jobs
            .get(name)
            .cloned()
            .ok_or_else(|| BatchError::not_found(format!("job '{name}'")))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Arc<JobDefinition>> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct JobRegistryBuilder {
    jobs: BTreeMap<String, Arc<JobDefinition>>,
}

impl JobRegistryBuilder {
    /// Add a job. Re-validates it; a second job with the same name is a
    /// config fault.
    pub fn register(mut self, job: JobDefinition) -> BatchResult<Self> {
        job.validate()?;
        if self.jobs.contains_key(job.name()) {
            return Err(BatchError::config(format!(
                "job '{}' is already registered",
                job.name()
            )));
        }
        self.jobs.insert(job.name().to_string(), Arc::new(job));
        Ok(self)
    }

    pub fn build(self) -> JobRegistry {
        JobRegistry { jobs: self.jobs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::definition::{StepContext, TaskStep};

    fn job(name: &str) -> JobDefinition {
        let step = TaskStep::builder("only", |_: &StepContext<'_>| Ok(()))
            .build()
            .unwrap();
        JobDefinition::new(name, vec![step]).unwrap()
    }

    #[test]
    fn lookup_by_name() {
        let registry = JobRegistry::builder()
            .register(job("b"))
            .unwrap()
            .register(job("a"))
            .unwrap()
            .build();

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().name(), "a");
        assert!(matches!(registry.get("zzz"), Err(BatchError::NotFound(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = JobRegistry::builder()
            .register(job("a"))
            .unwrap()
            .register(job("a"))
            .unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }
}
