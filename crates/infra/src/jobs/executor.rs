//! Step execution engine with bounded, fixed-delay retry.
//!
//! Every step gets exactly one [`StepExecution`] per job execution. Attempts
//! are folded into that record: a retry bumps `retry_count` and chunk
//! counters keep accumulating.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use tracing::{debug, error, info, instrument, warn};

use batchforge_core::{
    BatchError, BatchResult, ItemFault, JobExecutionId, JobParameters, StepExecution,
};

use super::chunk::ChunkProcessor;
use super::definition::{StepContext, StepDefinition, TaskAction};
use crate::repository::JobRepository;

/// Runs a single step to completion or exhaustion, persisting its record.
pub struct StepExecutor<'a> {
    repository: &'a dyn JobRepository,
}

impl<'a> StepExecutor<'a> {
    pub fn new(repository: &'a dyn JobRepository) -> Self {
        Self { repository }
    }

    /// Create the step record, run attempts `0..=max_retries`, persist the
    /// terminal record.
    ///
    /// Returns the `Completed` record, or the last fault once the record has
    /// been persisted as `Failed`. Only action and item faults are retried.
    #[instrument(
        skip_all,
        fields(job_name = %job_name, step_name = %step.name(), job_execution_id = %job_execution_id),
        err
    )]
    pub fn execute(
        &self,
        step: &StepDefinition,
        job_name: &str,
        job_execution_id: JobExecutionId,
        parameters: &JobParameters,
    ) -> BatchResult<StepExecution> {
        let mut record = StepExecution::start(job_execution_id, step.name());
        self.repository.create_step_execution(&record)?;

        let max_retries = step.max_retries();
        let mut attempt = 0u32;
        loop {
            debug!(attempt, kind = step.kind(), "step attempt started");
            match self.attempt(step, job_name, parameters, &mut record, attempt) {
                Ok(()) => {
                    record.mark_completed(attempt);
                    self.repository.update_step_execution(&record)?;
                    info!(
                        retry_count = record.retry_count,
                        read_count = record.read_count,
                        write_count = record.write_count,
                        filter_count = record.filter_count,
                        skip_count = record.skip_count,
                        commit_count = record.commit_count,
                        "step completed"
                    );
                    return Ok(record);
                }
                Err(fault) if fault.is_retryable() && attempt < max_retries => {
                    record.retry_count = attempt + 1;
                    if let Err(storage) = self.repository.update_step_execution(&record) {
                        error!(error = %storage, "failed to persist step retry; giving up");
                        return Err(self.fail(record, attempt + 1, fault));
                    }
                    attempt += 1;
                    warn!(attempt, max_retries, error = %fault, "step attempt failed; retrying");

                    let delay = step.retry_delay();
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                Err(fault) => return Err(self.fail(record, attempt + 1, fault)),
            }
        }
    }

    /// Persist `record` as `Failed` after `attempts` tries; a persist error is
    /// logged and the step fault is handed back.
    fn fail(&self, mut record: StepExecution, attempts: u32, fault: BatchError) -> BatchError {
        record.mark_failed(attempts, fault.to_string());
        if let Err(storage) = self.repository.update_step_execution(&record) {
            error!(error = %storage, "failed to persist failed step record");
        }
        error!(attempts, error = %fault, "step failed");
        fault
    }

    fn attempt(
        &self,
        step: &StepDefinition,
        job_name: &str,
        parameters: &JobParameters,
        record: &mut StepExecution,
        attempt: u32,
    ) -> BatchResult<()> {
        match step {
            StepDefinition::Task(task) => {
                let context = StepContext {
                    job_name,
                    step_name: &task.name,
                    job_execution_id: record.job_execution_id,
                    parameters,
                    attempt,
                };
                run_action(&task.action, &context)
            }
            StepDefinition::Chunk(chunk) => {
                let processor =
                    ChunkProcessor::new(chunk.chunk_size, &chunk.skip_policy, self.repository);
                chunk.pipeline.run(&processor, record, attempt)
            }
        }
    }
}

fn run_action(action: &TaskAction, context: &StepContext<'_>) -> BatchResult<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| action(context))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(action_fault(err)),
        Err(payload) => Err(BatchError::action(format!(
            "step panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Recover a typed fault from an action error; anything else is an action
/// fault carrying the full context chain.
pub(crate) fn action_fault(err: anyhow::Error) -> BatchError {
    let err = match err.downcast::<BatchError>() {
        Ok(fault) => return fault,
        Err(err) => err,
    };
    match err.downcast::<ItemFault>() {
        Ok(fault) => BatchError::Item(fault),
        Err(err) => BatchError::Action(format!("{err:#}")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use anyhow::{Context, anyhow};
    use batchforge_core::{
        BatchStatus, ExitCode, FaultCategory, JobExecution, JobInstance, JobInstanceId,
        JobParameter,
    };

    use crate::jobs::adapters::{CollectingSink, FnTransform, VecSource};
    use crate::jobs::definition::{ChunkStep, TaskStep};
    use crate::jobs::skip::SkipPolicy;
    use crate::repository::{InMemoryJobRepository, RepositoryError};

    fn execution(repo: &InMemoryJobRepository) -> JobExecutionId {
        let instance = repo
            .create_instance("job", "{}", &JobParameters::new())
            .unwrap();
        let execution = JobExecution::start(instance.id);
        repo.create_job_execution(&execution).unwrap();
        execution.id
    }

    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> impl Fn(&StepContext<'_>) -> anyhow::Result<()> {
        move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                Err(anyhow!("transient failure {n}"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn two_failures_then_success_with_two_retries() {
        let repo = InMemoryJobRepository::new();
        let job_execution_id = execution(&repo);
        let calls = Arc::new(AtomicU32::new(0));
        let step = TaskStep::builder("flaky", flaky(2, calls.clone()))
            .max_retries(2)
            .retry_delay(Duration::from_millis(1))
            .build()
            .unwrap();

        let record = StepExecutor::new(&repo)
            .execute(&step, "job", job_execution_id, &JobParameters::new())
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.retry_count, 2);

        let persisted = repo.list_step_executions(job_execution_id).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].retry_count, 2);
        assert_eq!(persisted[0].exit_code, ExitCode::Completed);
    }

    #[test]
    fn exhausted_retries_persist_a_failed_record() {
        let repo = InMemoryJobRepository::new();
        let job_execution_id = execution(&repo);
        let calls = Arc::new(AtomicU32::new(0));
        let step = TaskStep::builder("doomed", flaky(u32::MAX, calls.clone()))
            .max_retries(1)
            .build()
            .unwrap();

        let err = StepExecutor::new(&repo)
            .execute(&step, "job", job_execution_id, &JobParameters::new())
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.to_string(), "transient failure 1");

        let persisted = repo.list_step_executions(job_execution_id).unwrap();
        assert_eq!(persisted[0].status, BatchStatus::Failed);
        assert_eq!(persisted[0].retry_count, 2);
        assert_eq!(persisted[0].exit_message.as_deref(), Some("transient failure 1"));
        assert!(persisted[0].end_time.is_some());
    }

    #[test]
    fn config_faults_are_not_retried() {
        let repo = InMemoryJobRepository::new();
        let job_execution_id = execution(&repo);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let step = TaskStep::builder("misconfigured", move |_: &StepContext<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(BatchError::config("missing input path").into())
        })
        .max_retries(5)
        .build()
        .unwrap();

        let err = StepExecutor::new(&repo)
            .execute(&step, "job", job_execution_id, &JobParameters::new())
            .unwrap_err();

        assert!(matches!(err, BatchError::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn action_errors_keep_their_kind_and_context() {
        let item = action_fault(anyhow::Error::new(ItemFault::parse("bad header")));
        assert_eq!(item.category(), Some(FaultCategory::Parse));

        let chained = action_fault(anyhow!("connection refused").context("loading rates"));
        assert_eq!(chained, BatchError::Action("loading rates: connection refused".into()));

        let io: anyhow::Result<()> = Err(std::io::Error::other("eof")).context("reading input");
        assert_eq!(
            action_fault(io.unwrap_err()).to_string(),
            "reading input: eof"
        );
    }

    #[test]
    fn panicking_action_becomes_an_action_fault() {
        let repo = InMemoryJobRepository::new();
        let job_execution_id = execution(&repo);
        let step = TaskStep::builder("boom", |_: &StepContext<'_>| -> anyhow::Result<()> {
            panic!("kaboom")
        })
        .build()
        .unwrap();

        let err = StepExecutor::new(&repo)
            .execute(&step, "job", job_execution_id, &JobParameters::new())
            .unwrap_err();
        assert_eq!(err, BatchError::Action("step panicked: kaboom".into()));
    }

    #[test]
    fn action_sees_the_attempt_index() {
        let repo = InMemoryJobRepository::new();
        let job_execution_id = execution(&repo);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let step = TaskStep::builder("observe", move |ctx: &StepContext<'_>| {
            sink.lock().unwrap().push(ctx.attempt);
            if ctx.attempt == 0 {
                anyhow::bail!("first try fails");
            }
            Ok(())
        })
        .max_retries(3)
        .build()
        .unwrap();

        StepExecutor::new(&repo)
            .execute(&step, "job", job_execution_id, &JobParameters::new())
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn chunk_retry_rereads_from_the_start_and_accumulates_counters() {
        let repo = InMemoryJobRepository::new();
        let job_execution_id = execution(&repo);
        let failed_once = Arc::new(AtomicU32::new(0));
        let flag = failed_once.clone();
        let (sink, written) = CollectingSink::<i64>::new();
        let step = ChunkStep::builder("copy", VecSource::new((1..=10).collect::<Vec<i64>>()))
            .transform(FnTransform::new(move |x: i64| {
                if x == 7 && flag.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(ItemFault::other("flaky lookup"));
                }
                Ok(Some(x))
            }))
            .sink(sink)
            .chunk_size(5)
            .max_retries(1)
            .build()
            .unwrap();

        let record = StepExecutor::new(&repo)
            .execute(&step, "job", job_execution_id, &JobParameters::new())
            .unwrap();

        assert_eq!(record.retry_count, 1);
        assert_eq!(record.read_count, 20);
        assert_eq!(record.commit_count, 3);
        assert_eq!(record.write_count, 15);
        assert_eq!(written.lock().unwrap().len(), 15);
    }

    #[test]
    fn retried_chunk_attempt_gets_a_fresh_skip_allowance() {
        let repo = InMemoryJobRepository::new();
        let job_execution_id = execution(&repo);
        let first_pass = Arc::new(AtomicU32::new(0));
        let flag = first_pass.clone();
        let step = ChunkStep::builder("clean", VecSource::new((1..=10).collect::<Vec<i64>>()))
            .transform(FnTransform::new(move |x: i64| {
                if x <= 2 {
                    return Err(ItemFault::validation("bad"));
                }
                if x == 10 && flag.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(ItemFault::other("lookup timed out"));
                }
                Ok(Some(x))
            }))
            .sink(CollectingSink::<i64>::new().0)
            .chunk_size(5)
            .skip_policy(SkipPolicy::limited_to(3, [FaultCategory::Validation]))
            .max_retries(1)
            .build()
            .unwrap();

        let record = StepExecutor::new(&repo)
            .execute(&step, "job", job_execution_id, &JobParameters::new())
            .unwrap();

        assert_eq!(record.status, BatchStatus::Completed);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.read_count, 20);
        assert_eq!(record.skip_count, 4);
        assert_eq!(record.write_count, 11);

        let persisted = repo.list_step_executions(job_execution_id).unwrap();
        assert_eq!(persisted[0].status, BatchStatus::Completed);
    }

    /// Rejects the write that records a pending retry.
    struct RetryWritesFail(InMemoryJobRepository);

    impl JobRepository for RetryWritesFail {
        fn find_instance(
            &self,
            job_name: &str,
            job_key: &str,
        ) -> Result<Option<JobInstance>, RepositoryError> {
            self.0.find_instance(job_name, job_key)
        }

        fn create_instance(
            &self,
            job_name: &str,
            job_key: &str,
            parameters: &JobParameters,
        ) -> Result<JobInstance, RepositoryError> {
            self.0.create_instance(job_name, job_key, parameters)
        }

        fn get_instance(&self, id: JobInstanceId) -> Result<Option<JobInstance>, RepositoryError> {
            self.0.get_instance(id)
        }

        fn instance_parameters(
            &self,
            id: JobInstanceId,
        ) -> Result<Vec<JobParameter>, RepositoryError> {
            self.0.instance_parameters(id)
        }

        fn completed_step_names(
            &self,
            instance_id: JobInstanceId,
        ) -> Result<HashSet<String>, RepositoryError> {
            self.0.completed_step_names(instance_id)
        }

        fn create_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
            self.0.create_job_execution(execution)
        }

        fn update_job_execution(&self, execution: &JobExecution) -> Result<(), RepositoryError> {
            self.0.update_job_execution(execution)
        }

        fn get_job_execution(
            &self,
            id: JobExecutionId,
        ) -> Result<Option<JobExecution>, RepositoryError> {
            self.0.get_job_execution(id)
        }

        fn list_job_executions(&self) -> Result<Vec<JobExecution>, RepositoryError> {
            self.0.list_job_executions()
        }

        fn create_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError> {
            self.0.create_step_execution(execution)
        }

        fn update_step_execution(&self, execution: &StepExecution) -> Result<(), RepositoryError> {
            if execution.status == BatchStatus::Started && execution.retry_count > 0 {
                return Err(RepositoryError::Storage("connection reset".into()));
            }
            self.0.update_step_execution(execution)
        }

        fn list_step_executions(
            &self,
            job_execution_id: JobExecutionId,
        ) -> Result<Vec<StepExecution>, RepositoryError> {
            self.0.list_step_executions(job_execution_id)
        }
    }

    #[test]
    fn unrecorded_retry_fails_the_step_record() {
        let repo = RetryWritesFail(InMemoryJobRepository::new());
        let job_execution_id = execution(&repo.0);
        let calls = Arc::new(AtomicU32::new(0));
        let step = TaskStep::builder("flaky", flaky(1, calls.clone()))
            .max_retries(3)
            .build()
            .unwrap();

        let err = StepExecutor::new(&repo)
            .execute(&step, "job", job_execution_id, &JobParameters::new())
            .unwrap_err();

        assert_eq!(err.to_string(), "transient failure 0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let persisted = repo.list_step_executions(job_execution_id).unwrap();
        assert_eq!(persisted[0].status, BatchStatus::Failed);
        assert_eq!(persisted[0].retry_count, 1);
        assert_eq!(
            persisted[0].exit_message.as_deref(),
            Some("transient failure 0")
        );
    }
}
