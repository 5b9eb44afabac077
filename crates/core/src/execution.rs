//! Persisted execution records: instances, job executions, step executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{JobExecutionId, JobInstanceId, StepExecutionId};
use crate::status::{BatchStatus, ExitCode};

/// Identity of a job bound to one parameter set.
///
/// Unique on `(job_name, job_key)`; never mutated or deleted once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub job_name: String,
    pub job_key: String,
}

impl JobInstance {
    pub fn new(job_name: impl Into<String>, job_key: impl Into<String>) -> Self {
        Self {
            id: JobInstanceId::new(),
            job_name: job_name.into(),
            job_key: job_key.into(),
        }
    }
}

/// One end-to-end launch attempt of a job instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: JobExecutionId,
    pub job_instance_id: JobInstanceId,
    pub status: BatchStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: ExitCode,
    pub exit_message: Option<String>,
}

impl JobExecution {
    /// A fresh execution in `Started` state, stamped with the current time.
    pub fn start(job_instance_id: JobInstanceId) -> Self {
        Self {
            id: JobExecutionId::new(),
            job_instance_id,
            status: BatchStatus::Started,
            start_time: Some(Utc::now()),
            end_time: None,
            exit_code: ExitCode::Unknown,
            exit_message: None,
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = BatchStatus::Completed;
        self.exit_code = ExitCode::Completed;
        self.exit_message = None;
        self.end_time = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = BatchStatus::Failed;
        self.exit_code = ExitCode::Failed;
        self.exit_message = Some(message.into());
        self.end_time = Some(Utc::now());
    }

    pub fn is_running(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// The record of one step within one job execution.
///
/// All retries of the step inside that execution fold into this record: they
/// bump `retry_count` and keep accumulating counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: StepExecutionId,
    pub job_execution_id: JobExecutionId,
    pub step_name: String,
    pub status: BatchStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: ExitCode,
    pub exit_message: Option<String>,
    pub retry_count: u32,
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub skip_count: u64,
    pub commit_count: u64,
}

impl StepExecution {
    /// A fresh record in `Started` state with zeroed counters.
    pub fn start(job_execution_id: JobExecutionId, step_name: impl Into<String>) -> Self {
        Self {
            id: StepExecutionId::new(),
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Started,
            start_time: Some(Utc::now()),
            end_time: None,
            exit_code: ExitCode::Unknown,
            exit_message: None,
            retry_count: 0,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            skip_count: 0,
            commit_count: 0,
        }
    }

    /// Success after `failed_attempts` earlier failures.
    pub fn mark_completed(&mut self, failed_attempts: u32) {
        self.retry_count = failed_attempts;
        self.status = BatchStatus::Completed;
        self.exit_code = ExitCode::Completed;
        self.exit_message = None;
        self.end_time = Some(Utc::now());
    }

    /// Failure after consuming `attempts` attempts.
    pub fn mark_failed(&mut self, attempts: u32, message: impl Into<String>) {
        self.retry_count = attempts;
        self.status = BatchStatus::Failed;
        self.exit_code = ExitCode::Failed;
        self.exit_message = Some(message.into());
        self.end_time = Some(Utc::now());
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_execution_lifecycle() {
        let mut execution = JobExecution::start(JobInstanceId::new());
        assert_eq!(execution.status, BatchStatus::Started);
        assert!(execution.start_time.is_some());
        assert!(execution.end_time.is_none());
        assert_eq!(execution.exit_code, ExitCode::Unknown);
        assert!(execution.is_running());

        execution.mark_failed("Something went wrong!");
        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.exit_code, ExitCode::Failed);
        assert_eq!(execution.exit_message.as_deref(), Some("Something went wrong!"));
        assert!(execution.end_time.is_some());
        assert!(!execution.is_running());
    }

    #[test]
    fn step_execution_starts_with_zeroed_counters() {
        let step = StepExecution::start(JobExecutionId::new(), "load");
        assert_eq!(step.status, BatchStatus::Started);
        assert_eq!(
            (step.read_count, step.write_count, step.filter_count, step.skip_count, step.commit_count),
            (0, 0, 0, 0, 0)
        );
        assert_eq!(step.retry_count, 0);
    }

    #[test]
    fn step_completion_records_prior_failures() {
        let mut step = StepExecution::start(JobExecutionId::new(), "load");
        step.mark_completed(2);
        assert!(step.is_completed());
        assert_eq!(step.retry_count, 2);
        assert_eq!(step.exit_code, ExitCode::Completed);
    }

    #[test]
    fn records_serialize_with_literal_status() {
        let step = StepExecution::start(JobExecutionId::new(), "load");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["status"], "STARTED");
        assert_eq!(json["exit_code"], "UNKNOWN");
        assert_eq!(json["step_name"], "load");
    }
}
