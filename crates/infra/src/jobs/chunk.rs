//! The chunk-processing loop.
//!
//! One call to [`ChunkProcessor::process`] is one attempt of a chunk step:
//! read up to `chunk_size` items, transform each, hand the survivors to the
//! sink as a single batch, bump `commit_count` and persist the counters.
//! Repeat until a chunk comes back empty.

use std::sync::Mutex;

use tracing::{debug, warn};

use batchforge_core::{BatchError, BatchResult, StepExecution};

use super::item::{ItemSink, ItemSource, ItemTransform};
use super::skip::SkipPolicy;
use crate::repository::JobRepository;

pub struct ChunkProcessor<'a> {
    chunk_size: usize,
    skip_policy: &'a SkipPolicy,
    repository: &'a dyn JobRepository,
}

impl<'a> ChunkProcessor<'a> {
    pub fn new(
        chunk_size: usize,
        skip_policy: &'a SkipPolicy,
        repository: &'a dyn JobRepository,
    ) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            skip_policy,
            repository,
        }
    }

    /// Run the loop to end of stream, folding counters into `step`.
    ///
    /// Source and sink faults abort the attempt. Transform faults are offered
    /// to the skip policy first, which sees only the skips of this call. An
    /// aborted chunk writes nothing.
    pub fn process<R, P, W>(
        &self,
        source: &mut R,
        transform: &P,
        mut sink: Option<&mut W>,
        step: &mut StepExecution,
    ) -> BatchResult<()>
    where
        R: ItemSource + ?Sized,
        P: ItemTransform<R::Item> + ?Sized,
        W: ItemSink<P::Output> + ?Sized,
    {
        // The skip limit counts this attempt only; counters stay cumulative.
        let skip_base = step.skip_count;
        loop {
            let mut chunk = Vec::with_capacity(self.chunk_size);
            while chunk.len() < self.chunk_size {
                match source.read()? {
                    Some(item) => {
                        step.read_count += 1;
                        chunk.push(item);
                    }
                    None => break,
                }
            }
            if chunk.is_empty() {
                return Ok(());
            }

            let mut batch = Vec::with_capacity(chunk.len());
            for item in chunk {
                match transform.transform(item) {
                    Ok(Some(output)) => batch.push(output),
                    Ok(None) => step.filter_count += 1,
                    Err(fault)
                        if self
                            .skip_policy
                            .should_skip(&fault, step.skip_count - skip_base) =>
                    {
                        step.skip_count += 1;
                        debug!(
                            step_name = %step.step_name,
                            skip_count = step.skip_count,
                            category = %fault.category,
                            "skipped item: {}",
                            fault.message
                        );
                    }
                    Err(fault) => return Err(BatchError::Item(fault)),
                }
            }

            if !batch.is_empty() {
                if let Some(sink) = sink.as_deref_mut() {
                    let written = batch.len() as u64;
                    sink.write(batch)?;
                    step.write_count += written;
                }
            }

            step.commit_count += 1;
            self.repository.update_step_execution(step)?;
            debug!(
                step_name = %step.step_name,
                read_count = step.read_count,
                write_count = step.write_count,
                filter_count = step.filter_count,
                skip_count = step.skip_count,
                commit_count = step.commit_count,
                "chunk committed"
            );
        }
    }
}

/// Type-erased source/transform/sink triple owned by a chunk step.
pub(crate) trait ChunkPipeline: Send + Sync {
    /// Rewind the source, then run one attempt of the loop.
    fn run(
        &self,
        processor: &ChunkProcessor<'_>,
        step: &mut StepExecution,
        attempt: u32,
    ) -> BatchResult<()>;
}

pub(crate) struct ItemPipeline<R, P, W> {
    source: Mutex<R>,
    transform: P,
    sink: Option<Mutex<W>>,
}

impl<R, P, W> ItemPipeline<R, P, W> {
    pub(crate) fn new(source: R, transform: P, sink: Option<W>) -> Self {
        Self {
            source: Mutex::new(source),
            transform,
            sink: sink.map(Mutex::new),
        }
    }
}

impl<R, P, W> ChunkPipeline for ItemPipeline<R, P, W>
where
    R: ItemSource,
    P: ItemTransform<R::Item>,
    W: ItemSink<P::Output>,
{
    fn run(
        &self,
        processor: &ChunkProcessor<'_>,
        step: &mut StepExecution,
        attempt: u32,
    ) -> BatchResult<()> {
        // Held for the whole attempt; concurrent runs of one definition serialize here.
        let mut source = self
            .source
            .lock()
            .map_err(|_| BatchError::action("chunk source lock poisoned"))?;
        let mut sink = match &self.sink {
            Some(sink) => Some(
                sink.lock()
                    .map_err(|_| BatchError::action("chunk sink lock poisoned"))?,
            ),
            None => None,
        };

        if !source.reset()? && attempt > 0 {
            warn!(
                step_name = %step.step_name,
                attempt,
                "source does not support reset; retry resumes from the current cursor"
            );
        }

        processor.process(&mut *source, &self.transform, sink.as_deref_mut(), step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::adapters::{CollectingSink, FnSink, FnTransform, VecSource};
    use crate::jobs::item::{Identity, NoSink};
    use crate::repository::InMemoryJobRepository;
    use batchforge_core::{
        FaultCategory, ItemFault, JobExecution, JobParameters, StepExecution,
    };

    fn started_step(repo: &InMemoryJobRepository) -> StepExecution {
        let instance = repo
            .create_instance("job", "{}", &JobParameters::new())
            .unwrap();
        let execution = JobExecution::start(instance.id);
        repo.create_job_execution(&execution).unwrap();
        let step = StepExecution::start(execution.id, "chunk");
        repo.create_step_execution(&step).unwrap();
        step
    }

    fn even_squares() -> FnTransform<impl Fn(i64) -> Result<Option<i64>, ItemFault>, i64> {
        FnTransform::new(|x: i64| {
            let square = x * x;
            Ok((square % 2 == 0).then_some(square))
        })
    }

    #[test]
    fn squares_over_fifty_items() {
        let repo = InMemoryJobRepository::new();
        let mut step = started_step(&repo);
        let policy = SkipPolicy::NeverSkip;
        let (mut sink, written) = CollectingSink::new();

        ChunkProcessor::new(10, &policy, &repo)
            .process(
                &mut VecSource::new((1..=50).collect::<Vec<i64>>()),
                &even_squares(),
                Some(&mut sink),
                &mut step,
            )
            .unwrap();

        assert_eq!(step.read_count, 50);
        assert_eq!(step.commit_count, 5);
        assert_eq!(step.filter_count, 25);
        assert_eq!(step.write_count, 50 - step.filter_count);
        assert_eq!(written.lock().unwrap().len(), 25);
        assert_eq!(written.lock().unwrap()[0], 4);

        let persisted = repo.list_step_executions(step.job_execution_id).unwrap();
        assert_eq!(persisted[0].commit_count, 5);
        assert_eq!(persisted[0].read_count, 50);
    }

    #[test]
    fn limited_skip_aborts_on_the_fault_past_the_limit() {
        let repo = InMemoryJobRepository::new();
        let mut step = started_step(&repo);
        let policy = SkipPolicy::limited(3);
        let always_bad = FnTransform::new(|x: i64| -> Result<Option<i64>, ItemFault> {
            Err(ItemFault::validation(format!("bad item {x}")))
        });

        let err = ChunkProcessor::new(10, &policy, &repo)
            .process(
                &mut VecSource::new((1..=10).collect::<Vec<i64>>()),
                &always_bad,
                None::<&mut NoSink>,
                &mut step,
            )
            .unwrap_err();

        assert_eq!(err.to_string(), "validation error: bad item 4");
        assert_eq!(step.skip_count, 3);
        assert_eq!(step.commit_count, 0);
    }

    #[test]
    fn sink_never_receives_an_empty_batch() {
        let repo = InMemoryJobRepository::new();
        let mut step = started_step(&repo);
        let policy = SkipPolicy::NeverSkip;
        let drop_middle_chunk =
            FnTransform::new(|x: i64| Ok((!(11..=20).contains(&x)).then_some(x)));
        let mut calls = 0usize;
        let mut sink = FnSink::new(|items: Vec<i64>| {
            assert!(!items.is_empty());
            calls += 1;
            Ok(())
        });

        ChunkProcessor::new(10, &policy, &repo)
            .process(
                &mut VecSource::new((1..=30).collect::<Vec<i64>>()),
                &drop_middle_chunk,
                Some(&mut sink),
                &mut step,
            )
            .unwrap();
        drop(sink);

        assert_eq!(calls, 2);
        assert_eq!(step.commit_count, 3);
        assert_eq!(step.write_count, 20);
    }

    #[test]
    fn sink_faults_are_never_skipped() {
        let repo = InMemoryJobRepository::new();
        let mut step = started_step(&repo);
        let policy = SkipPolicy::AlwaysSkip;
        let mut sink = FnSink::new(|_: Vec<i64>| Err(ItemFault::other("disk full")));

        let err = ChunkProcessor::new(5, &policy, &repo)
            .process(
                &mut VecSource::new((1..=5).collect::<Vec<i64>>()),
                &Identity::new(),
                Some(&mut sink),
                &mut step,
            )
            .unwrap_err();

        assert_eq!(err.category(), Some(FaultCategory::Other));
        assert_eq!(step.write_count, 0);
        assert_eq!(step.skip_count, 0);
    }

    #[test]
    fn read_faults_are_never_skipped() {
        struct Broken;
        impl ItemSource for Broken {
            type Item = i64;
            fn read(&mut self) -> Result<Option<i64>, ItemFault> {
                Err(ItemFault::parse("truncated record"))
            }
        }

        let repo = InMemoryJobRepository::new();
        let mut step = started_step(&repo);
        let policy = SkipPolicy::AlwaysSkip;

        let err = ChunkProcessor::new(5, &policy, &repo)
            .process(&mut Broken, &Identity::new(), None::<&mut NoSink>, &mut step)
            .unwrap_err();
        assert_eq!(err.category(), Some(FaultCategory::Parse));
        assert_eq!(step.skip_count, 0);
    }

    #[test]
    fn faulted_chunk_writes_nothing() {
        let repo = InMemoryJobRepository::new();
        let mut step = started_step(&repo);
        let policy = SkipPolicy::NeverSkip;
        let fail_on_seven = FnTransform::new(|x: i64| {
            if x == 7 {
                Err(ItemFault::transform("seven"))
            } else {
                Ok(Some(x))
            }
        });
        let (mut sink, written) = CollectingSink::new();

        ChunkProcessor::new(5, &policy, &repo)
            .process(
                &mut VecSource::new((1..=10).collect::<Vec<i64>>()),
                &fail_on_seven,
                Some(&mut sink),
                &mut step,
            )
            .unwrap_err();

        assert_eq!(*written.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(step.write_count, 5);
        assert_eq!(step.commit_count, 1);
        assert_eq!(step.read_count, 10);
    }

    #[test]
    fn step_without_sink_discards_output() {
        let repo = InMemoryJobRepository::new();
        let mut step = started_step(&repo);
        let policy = SkipPolicy::NeverSkip;

        ChunkProcessor::new(4, &policy, &repo)
            .process(
                &mut VecSource::new((1..=10).collect::<Vec<i64>>()),
                &Identity::new(),
                None::<&mut NoSink>,
                &mut step,
            )
            .unwrap();

        assert_eq!(step.read_count, 10);
        assert_eq!(step.write_count, 0);
        assert_eq!(step.commit_count, 3);
    }

    #[test]
    fn pipeline_rewinds_before_each_attempt() {
        let repo = InMemoryJobRepository::new();
        let mut step = started_step(&repo);
        let policy = SkipPolicy::NeverSkip;
        let (sink, written) = CollectingSink::<i32>::new();
        let pipeline = ItemPipeline::new(
            VecSource::new(vec![1, 2, 3]),
            Identity::<i32>::new(),
            Some(sink),
        );
        let processor = ChunkProcessor::new(2, &policy, &repo);

        pipeline.run(&processor, &mut step, 0).unwrap();
        pipeline.run(&processor, &mut step, 1).unwrap();

        assert_eq!(*written.lock().unwrap(), vec![1, 2, 3, 1, 2, 3]);
        assert_eq!(step.read_count, 6);
    }
}
