//! `batchforge-core`: execution data model and fault taxonomy.
//!
//! This crate contains **pure** records and value types (no storage, no threads).

pub mod error;
pub mod execution;
pub mod id;
pub mod parameters;
pub mod status;

pub use error::{BatchError, BatchResult, FaultCategory, ItemFault};
pub use execution::{JobExecution, JobInstance, StepExecution};
pub use id::{IdParseError, JobExecutionId, JobInstanceId, StepExecutionId};
pub use parameters::{JobParameter, JobParameters, ParameterValue};
pub use status::{BatchStatus, ExitCode};
