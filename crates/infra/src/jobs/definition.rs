//! Static job and step definitions.
//!
//! A [`JobDefinition`] is an immutable, ordered list of [`StepDefinition`]s.
//! Steps are a closed set of two kinds: a [`TaskStep`] runs one action, a
//! [`ChunkStep`] streams items through a source/transform/sink pipeline.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use batchforge_core::{BatchError, BatchResult, JobExecutionId, JobParameters};

use super::chunk::{ChunkPipeline, ItemPipeline};
use super::item::{Identity, ItemSink, ItemSource, ItemTransform, NoSink};
use super::skip::SkipPolicy;

pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// What a task action sees while it runs.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub job_name: &'a str,
    pub step_name: &'a str,
    pub job_execution_id: JobExecutionId,
    pub parameters: &'a JobParameters,
    /// Zero-based attempt index within the current step execution.
    pub attempt: u32,
}

/// Body of a task step.
///
/// Returning an `ItemFault` or `BatchError` (wrapped in `anyhow`) keeps that
/// fault kind; any other error becomes an action fault.
pub type TaskAction = Arc<dyn Fn(&StepContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Step that runs a single action.
#[derive(Clone)]
pub struct TaskStep {
    pub(crate) name: String,
    pub(crate) action: TaskAction,
    pub(crate) max_retries: u32,
    pub(crate) retry_delay: Duration,
}

impl TaskStep {
    pub fn builder<F>(name: impl Into<String>, action: F) -> TaskStepBuilder
    where
        F: Fn(&StepContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        TaskStepBuilder {
            name: name.into(),
            action: Arc::new(action),
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

impl fmt::Debug for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStep")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

pub struct TaskStepBuilder {
    name: String,
    action: TaskAction,
    max_retries: u32,
    retry_delay: Duration,
}

impl TaskStepBuilder {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn build(self) -> BatchResult<StepDefinition> {
        let step = StepDefinition::Task(TaskStep {
            name: self.name,
            action: self.action,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
        });
        step.validate()?;
        Ok(step)
    }
}

/// Step that reads, transforms and writes items in chunks.
pub struct ChunkStep {
    pub(crate) name: String,
    pub(crate) chunk_size: usize,
    pub(crate) max_retries: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) skip_policy: SkipPolicy,
    pub(crate) pipeline: Box<dyn ChunkPipeline>,
}

impl ChunkStep {
    /// Start a chunk step over `source` with an identity transform and no sink.
    pub fn builder<R>(
        name: impl Into<String>,
        source: R,
    ) -> ChunkStepBuilder<R, Identity<R::Item>, NoSink>
    where
        R: ItemSource,
    {
        ChunkStepBuilder {
            name: name.into(),
            source,
            transform: Identity::new(),
            sink: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: 0,
            retry_delay: Duration::ZERO,
            skip_policy: SkipPolicy::NeverSkip,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn skip_policy(&self) -> &SkipPolicy {
        &self.skip_policy
    }
}

impl fmt::Debug for ChunkStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStep")
            .field("name", &self.name)
            .field("chunk_size", &self.chunk_size)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("skip_policy", &self.skip_policy)
            .finish_non_exhaustive()
    }
}

pub struct ChunkStepBuilder<R, P, W> {
    name: String,
    source: R,
    transform: P,
    sink: Option<W>,
    chunk_size: usize,
    max_retries: u32,
    retry_delay: Duration,
    skip_policy: SkipPolicy,
}

impl<R, P, W> ChunkStepBuilder<R, P, W>
where
    R: ItemSource,
{
    pub fn transform<P2>(self, transform: P2) -> ChunkStepBuilder<R, P2, W>
    where
        P2: ItemTransform<R::Item>,
    {
        ChunkStepBuilder {
            name: self.name,
            source: self.source,
            transform,
            sink: self.sink,
            chunk_size: self.chunk_size,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            skip_policy: self.skip_policy,
        }
    }

    pub fn sink<W2>(self, sink: W2) -> ChunkStepBuilder<R, P, W2> {
        ChunkStepBuilder {
            name: self.name,
            source: self.source,
            transform: self.transform,
            sink: Some(sink),
            chunk_size: self.chunk_size,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            skip_policy: self.skip_policy,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn skip_policy(mut self, policy: SkipPolicy) -> Self {
        self.skip_policy = policy;
        self
    }

    pub fn build(self) -> BatchResult<StepDefinition>
    where
        R: 'static,
        P: ItemTransform<R::Item> + 'static,
        W: ItemSink<P::Output> + 'static,
    {
        let step = StepDefinition::Chunk(ChunkStep {
            name: self.name,
            chunk_size: self.chunk_size,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            skip_policy: self.skip_policy,
            pipeline: Box::new(ItemPipeline::new(self.source, self.transform, self.sink)),
        });
        step.validate()?;
        Ok(step)
    }
}

/// One step of a job.
#[derive(Debug)]
pub enum StepDefinition {
    Task(TaskStep),
    Chunk(ChunkStep),
}

impl StepDefinition {
    pub fn name(&self) -> &str {
        match self {
            Self::Task(step) => &step.name,
            Self::Chunk(step) => &step.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Task(_) => "task",
            Self::Chunk(_) => "chunk",
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            Self::Task(step) => step.max_retries,
            Self::Chunk(step) => step.max_retries,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        match self {
            Self::Task(step) => step.retry_delay,
            Self::Chunk(step) => step.retry_delay,
        }
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.name().trim().is_empty() {
            return Err(BatchError::config("step name must not be empty"));
        }
        match self {
            Self::Chunk(step) if step.chunk_size == 0 => Err(BatchError::config(format!(
                "step '{}': chunk_size must be positive",
                step.name
            ))),
            _ => Ok(()),
        }
    }
}

/// A named, ordered list of steps. Immutable once built.
#[derive(Debug)]
pub struct JobDefinition {
    pub(crate) name: String,
    pub(crate) steps: Vec<StepDefinition>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> BatchResult<Self> {
        let job = Self {
            name: name.into(),
            steps,
        };
        job.validate()?;
        Ok(job)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(StepDefinition::name)
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.name.trim().is_empty() {
            return Err(BatchError::config("job name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(BatchError::config(format!(
                "job '{}' declares no steps",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            step.validate()?;
            if !seen.insert(step.name()) {
                return Err(BatchError::config(format!(
                    "job '{}' declares step '{}' twice",
                    self.name,
                    step.name()
                )));
            }
        }
        Ok(())
    }
}
