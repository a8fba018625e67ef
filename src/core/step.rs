use std::thread;

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::{
    repository::{JobRepository, Transition, TransitionKind},
    BatchError,
};

use super::{
    build_name,
    execution::{BatchStatus, ExitStatus, JobInstance, StepExecution},
    item::{ItemProcessor, ItemReader, ItemWriter},
    policy::{LimitCheckingItemSkipPolicy, NeverSkipItemSkipPolicy, RetryPolicy, SkipPolicy},
    transaction::{ResourcelessTransactionManager, TransactionManager},
};

static RESOURCELESS_TRANSACTION_MANAGER: ResourcelessTransactionManager =
    ResourcelessTransactionManager;

/// Whether a tasklet wants to be called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet can continue to execute.
    Continuable,
    /// The tasklet has finished executing.
    Finished,
}

/// A single action run as a step, e.g. cleaning a directory or printing a message.
///
/// The step calls [`execute`](Tasklet::execute) in a new transaction until it
/// returns [`RepeatStatus::Finished`].
pub trait Tasklet {
    fn execute(&self, step_execution: &StepExecution) -> Result<RepeatStatus, BatchError>;
}

/// What a step needs from the job that runs it.
pub struct StepContext<'r> {
    pub repository: &'r dyn JobRepository,
    pub instance: &'r JobInstance,
}

impl StepContext<'_> {
    fn record(&self, kind: TransitionKind, step_execution: &StepExecution) -> Result<(), BatchError> {
        self.repository
            .record_transition(&Transition::step(kind, self.instance, step_execution))
    }

    fn is_stop_requested(&self, step_execution: &StepExecution) -> Result<bool, BatchError> {
        self.repository
            .is_stop_requested(step_execution.job_execution_id)
    }
}

/// The chunk loop of a step, independent of the item types it reads and writes.
pub trait ChunkProvider {
    /// Drives reader, processor and writer chunk by chunk until the input is
    /// exhausted, a stop is requested, or a fatal error occurs.
    ///
    /// # Returns
    /// - `Ok(BatchStatus::Completed)` when the input was fully processed
    /// - `Ok(BatchStatus::Stopped)` when a stop was requested
    /// - `Err(BatchError)` on a fatal error; the last committed chunk stays committed
    fn run(
        &self,
        transaction_manager: &dyn TransactionManager,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<BatchStatus, BatchError>;
}

/// How a step does its work.
pub enum StepBehavior<'a> {
    /// Read, process and write items in fixed-size chunks.
    Chunked(Box<dyn ChunkProvider + 'a>),
    /// Run a single action.
    Action(&'a dyn Tasklet),
}

/// One stage of a job.
pub struct Step<'a> {
    name: String,
    behavior: StepBehavior<'a>,
    transaction_manager: &'a dyn TransactionManager,
    allow_start_if_complete: bool,
}

impl<'a> Step<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn behavior(&self) -> &StepBehavior<'a> {
        &self.behavior
    }

    /// Whether the step runs again on restart even though it already completed.
    pub fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    /// Executes the step, recording its start, every commit and its end.
    ///
    /// `step_execution` comes from the repository; on restart its execution
    /// context already holds the position of the last committed chunk.
    ///
    /// # Returns
    /// - `Ok(())` when the step completed or stopped on request
    /// - `Err(BatchError)` with the cause when the step failed
    pub fn execute(
        &self,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<(), BatchError> {
        info!(
            "Start of step: {}, id: {}",
            step_execution.step_name, step_execution.id
        );

        step_execution.status = BatchStatus::Started;
        step_execution.start_time = Some(Utc::now());
        context.record(TransitionKind::StepStarted, step_execution)?;

        let result = match &self.behavior {
            StepBehavior::Chunked(chunk) => {
                chunk.run(self.transaction_manager, step_execution, context)
            }
            StepBehavior::Action(tasklet) => self.run_tasklet(*tasklet, step_execution, context),
        };

        step_execution.end_time = Some(Utc::now());
        let outcome = match result {
            Ok(status) => {
                step_execution.status = status;
                step_execution.exit_status = ExitStatus::from_status(status);
                Ok(())
            }
            Err(error) => {
                error!("Step {} failed: {}", self.name, error);
                step_execution.status = BatchStatus::Failed;
                step_execution.exit_status =
                    ExitStatus::new(ExitStatus::FAILED).with_description(error.to_string());
                Err(error)
            }
        };

        context.record(TransitionKind::StepFinished, step_execution)?;

        info!(
            "End of step: {}, id: {}, status: {}",
            step_execution.step_name,
            step_execution.id,
            step_execution.status.as_str()
        );

        outcome
    }

    fn run_tasklet(
        &self,
        tasklet: &dyn Tasklet,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<BatchStatus, BatchError> {
        loop {
            if context.is_stop_requested(step_execution)? {
                info!("Stop requested, ending step {}", self.name);
                return Ok(BatchStatus::Stopped);
            }

            let transaction = self.transaction_manager.begin()?;
            match tasklet.execute(step_execution) {
                Ok(repeat_status) => {
                    transaction.commit()?;
                    step_execution.commit_count += 1;
                    context.record(TransitionKind::ChunkCommitted, step_execution)?;

                    if repeat_status == RepeatStatus::Finished {
                        return Ok(BatchStatus::Completed);
                    }
                }
                Err(error) => {
                    if let Err(rollback_error) = transaction.rollback() {
                        error!("Rollback failed: {}", rollback_error);
                    }
                    step_execution.rollback_count += 1;
                    return Err(error);
                }
            }
        }
    }
}

/// Items of one chunk and how much of the input they used up.
struct Chunk<I> {
    items: Vec<I>,
    /// Input records consumed, skipped ones included.
    consumed: usize,
    finished: bool,
}

/// Counts of the chunk in flight, added to the step execution once it commits.
#[derive(Debug, Default)]
struct ChunkCounts {
    read: usize,
    read_skip: usize,
    filter: usize,
    process_skip: usize,
    write: usize,
    write_skip: usize,
}

impl ChunkCounts {
    fn skip_count(&self) -> usize {
        self.read_skip + self.process_skip + self.write_skip
    }

    fn apply(&self, step_execution: &mut StepExecution) {
        step_execution.read_count += self.read;
        step_execution.read_skip_count += self.read_skip;
        step_execution.filter_count += self.filter;
        step_execution.process_skip_count += self.process_skip;
        step_execution.write_count += self.write;
        step_execution.write_skip_count += self.write_skip;
    }
}

/// Chunk-oriented processing of `I` items into `O` items.
pub struct ChunkOrientedTasklet<'a, I, O> {
    /// Component responsible for reading items from the source
    reader: &'a dyn ItemReader<I>,
    /// Component responsible for processing items
    processor: &'a dyn ItemProcessor<I, O>,
    /// Component responsible for writing items to the destination
    writer: &'a dyn ItemWriter<O>,
    /// Number of items to process in each chunk
    chunk_size: usize,
    skip_policy: Box<dyn SkipPolicy + 'a>,
    retry_policy: RetryPolicy,
}

impl<I, O> ChunkProvider for ChunkOrientedTasklet<'_, I, O> {
    fn run(
        &self,
        transaction_manager: &dyn TransactionManager,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<BatchStatus, BatchError> {
        self.reader.open(&step_execution.execution_context)?;
        if let Err(error) = self.writer.open() {
            Self::manage_error(self.reader.close());
            return Err(error);
        }

        let result = self.process_chunks(transaction_manager, step_execution, context);

        Self::manage_error(self.writer.close());
        Self::manage_error(self.reader.close());

        result
    }
}

impl<I, O> ChunkOrientedTasklet<'_, I, O> {
    fn process_chunks(
        &self,
        transaction_manager: &dyn TransactionManager,
        step_execution: &mut StepExecution,
        context: &StepContext<'_>,
    ) -> Result<BatchStatus, BatchError> {
        loop {
            if context.is_stop_requested(step_execution)? {
                info!("Stop requested, ending step {}", step_execution.step_name);
                return Ok(BatchStatus::Stopped);
            }

            let mut counts = ChunkCounts::default();
            let chunk = self.read_chunk(step_execution, &mut counts)?;

            if chunk.consumed == 0 {
                debug!("Nothing left to read");
                return Ok(BatchStatus::Completed);
            }

            let processed_items = self.process_chunk(step_execution, &mut counts, &chunk.items)?;

            self.write_chunk(transaction_manager, step_execution, &mut counts, &processed_items)?;

            counts.apply(step_execution);
            step_execution.commit_count += 1;
            self.reader.update(&mut step_execution.execution_context)?;
            context.record(TransitionKind::ChunkCommitted, step_execution)?;

            debug!(
                "Committed chunk {} ({} items consumed)",
                step_execution.commit_count, chunk.consumed
            );

            if chunk.finished {
                return Ok(BatchStatus::Completed);
            }
        }
    }

    /// Reads up to `chunk_size` items.
    ///
    /// Read errors are consulted against the skip policy; a skipped record
    /// still counts as consumed input.
    fn read_chunk(
        &self,
        step_execution: &StepExecution,
        counts: &mut ChunkCounts,
    ) -> Result<Chunk<I>, BatchError> {
        debug!("Start reading chunk");

        let mut chunk = Chunk {
            items: Vec::with_capacity(self.chunk_size),
            consumed: 0,
            finished: false,
        };

        loop {
            match self.reader.read() {
                Ok(Some(item)) => {
                    chunk.items.push(item);
                    chunk.consumed += 1;
                    counts.read += 1;

                    if chunk.items.len() >= self.chunk_size {
                        return Ok(chunk);
                    }
                }
                Ok(None) => {
                    chunk.finished = true;
                    return Ok(chunk);
                }
                Err(error) => {
                    if error.is_skippable_read()
                        && self
                            .skip_policy
                            .should_skip(&error, step_execution.skip_count() + counts.skip_count())
                    {
                        warn!("Skipping item on read: {}", error);
                        counts.read_skip += 1;
                        chunk.consumed += 1;
                    } else {
                        return Err(error);
                    }
                }
            }
        }
    }

    fn process_chunk(
        &self,
        step_execution: &StepExecution,
        counts: &mut ChunkCounts,
        read_items: &[I],
    ) -> Result<Vec<O>, BatchError> {
        debug!("Processing chunk of {} items", read_items.len());
        let mut result = Vec::with_capacity(read_items.len());

        for item in read_items {
            match self.processor.process(item) {
                Ok(Some(processed_item)) => result.push(processed_item),
                Ok(None) => counts.filter += 1,
                Err(error) => {
                    if self
                        .skip_policy
                        .should_skip(&error, step_execution.skip_count() + counts.skip_count())
                    {
                        warn!("Skipping item on process: {}", error);
                        counts.process_skip += 1;
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        Ok(result)
    }

    /// Writes the chunk in one transaction, retrying transient failures.
    ///
    /// When the whole chunk is rejected and the skip policy allows it, the
    /// items are written again one per transaction so that only the rejected
    /// ones are skipped.
    fn write_chunk(
        &self,
        transaction_manager: &dyn TransactionManager,
        step_execution: &mut StepExecution,
        counts: &mut ChunkCounts,
        items: &[O],
    ) -> Result<(), BatchError> {
        debug!("Writing chunk of {} items", items.len());

        match self.write_with_retry(transaction_manager, step_execution, items) {
            Ok(()) => {
                counts.write += items.len();
                Ok(())
            }
            Err(error)
                if items.len() > 1
                    && self
                        .skip_policy
                        .should_skip(&error, step_execution.skip_count() + counts.skip_count()) =>
            {
                warn!("Chunk rejected ({}), scanning items one by one", error);
                self.scan(transaction_manager, step_execution, counts, items)
            }
            Err(error) => {
                if self
                    .skip_policy
                    .should_skip(&error, step_execution.skip_count() + counts.skip_count())
                {
                    warn!("Skipping item on write: {}", error);
                    counts.write_skip += items.len();
                    Ok(())
                } else {
                    Err(error)
                }
            }
        }
    }

    fn scan(
        &self,
        transaction_manager: &dyn TransactionManager,
        step_execution: &mut StepExecution,
        counts: &mut ChunkCounts,
        items: &[O],
    ) -> Result<(), BatchError> {
        for item in items.chunks(1) {
            match self.write_with_retry(transaction_manager, step_execution, item) {
                Ok(()) => counts.write += 1,
                Err(error) => {
                    if self
                        .skip_policy
                        .should_skip(&error, step_execution.skip_count() + counts.skip_count())
                    {
                        warn!("Skipping item on write: {}", error);
                        counts.write_skip += 1;
                    } else {
                        return Err(error);
                    }
                }
            }
        }
        Ok(())
    }

    fn write_with_retry(
        &self,
        transaction_manager: &dyn TransactionManager,
        step_execution: &mut StepExecution,
        items: &[O],
    ) -> Result<(), BatchError> {
        let mut attempt = 1;
        loop {
            match self.write_in_transaction(transaction_manager, items) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    step_execution.rollback_count += 1;

                    if !self.retry_policy.can_retry(&error, attempt) {
                        return Err(error);
                    }

                    let backoff = self.retry_policy.backoff(attempt);
                    warn!(
                        "Write attempt {} failed ({}), retrying in {:?}",
                        attempt, error, backoff
                    );
                    thread::sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }

    /// One transaction around one writer call: commit on success, rollback otherwise.
    fn write_in_transaction(
        &self,
        transaction_manager: &dyn TransactionManager,
        items: &[O],
    ) -> Result<(), BatchError> {
        let transaction = transaction_manager.begin()?;

        let result = if items.is_empty() {
            debug!("No items to write, skipping write call");
            Ok(())
        } else {
            self.writer.write(items).and_then(|()| self.writer.flush())
        };

        match result {
            Ok(()) => transaction.commit(),
            Err(error) => {
                if let Err(rollback_error) = transaction.rollback() {
                    error!("Rollback failed: {}", rollback_error);
                }
                Err(error)
            }
        }
    }

    /// Helper method to handle errors gracefully.
    ///
    /// Used for close operations, where we want to log the error but not fail the step.
    fn manage_error(result: Result<(), BatchError>) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

/// Builder for a chunk-oriented step.
pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    transaction_manager: &'a dyn TransactionManager,
    chunk_size: usize,
    skip_policy: Box<dyn SkipPolicy + 'a>,
    retry_policy: RetryPolicy,
    allow_start_if_complete: bool,
}

impl<'a, I: 'a, O: 'a> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            transaction_manager: &RESOURCELESS_TRANSACTION_MANAGER,
            chunk_size: 10,
            skip_policy: Box::new(NeverSkipItemSkipPolicy),
            retry_policy: RetryPolicy::no_retry(),
            allow_start_if_complete: false,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Transaction manager of the writer's resource. Defaults to a resourceless one.
    pub fn transaction_manager(mut self, transaction_manager: &'a dyn TransactionManager) -> Self {
        self.transaction_manager = transaction_manager;
        self
    }

    /// Number of items per chunk, i.e. per transaction.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Skips up to `skip_limit` unreadable or invalid items before failing.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_policy = Box::new(LimitCheckingItemSkipPolicy::new(skip_limit));
        self
    }

    pub fn skip_policy(mut self, skip_policy: impl SkipPolicy + 'a) -> Self {
        self.skip_policy = Box::new(skip_policy);
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn allow_start_if_complete(mut self, yes: bool) -> Self {
        self.allow_start_if_complete = yes;
        self
    }

    /// Builds the step.
    ///
    /// # Errors
    /// [`BatchError::Configuration`] when the reader, processor or writer is
    /// missing, or the chunk size is zero.
    pub fn build(self) -> Result<Step<'a>, BatchError> {
        let missing = |component: &str| {
            BatchError::Configuration(format!(
                "{} is required for building step {}",
                component, self.name
            ))
        };

        let reader = self.reader.ok_or_else(|| missing("Reader"))?;
        let processor = self.processor.ok_or_else(|| missing("Processor"))?;
        let writer = self.writer.ok_or_else(|| missing("Writer"))?;

        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "Chunk size of step {} must be greater than zero",
                self.name
            )));
        }

        let chunk = ChunkOrientedTasklet {
            reader,
            processor,
            writer,
            chunk_size: self.chunk_size,
            skip_policy: self.skip_policy,
            retry_policy: self.retry_policy,
        };

        Ok(Step {
            name: self.name,
            behavior: StepBehavior::Chunked(Box::new(chunk)),
            transaction_manager: self.transaction_manager,
            allow_start_if_complete: self.allow_start_if_complete,
        })
    }
}

/// Builder for a tasklet step.
pub struct TaskletStepBuilder<'a> {
    name: String,
    tasklet: &'a dyn Tasklet,
    transaction_manager: &'a dyn TransactionManager,
    allow_start_if_complete: bool,
}

impl<'a> TaskletStepBuilder<'a> {
    pub fn new(name: &str, tasklet: &'a dyn Tasklet) -> Self {
        Self {
            name: name.to_string(),
            tasklet,
            transaction_manager: &RESOURCELESS_TRANSACTION_MANAGER,
            allow_start_if_complete: false,
        }
    }

    pub fn transaction_manager(mut self, transaction_manager: &'a dyn TransactionManager) -> Self {
        self.transaction_manager = transaction_manager;
        self
    }

    pub fn allow_start_if_complete(mut self, yes: bool) -> Self {
        self.allow_start_if_complete = yes;
        self
    }

    pub fn build(self) -> Step<'a> {
        Step {
            name: self.name,
            behavior: StepBehavior::Action(self.tasklet),
            transaction_manager: self.transaction_manager,
            allow_start_if_complete: self.allow_start_if_complete,
        }
    }
}

/// Entry point for building steps.
///
/// # Examples
///
/// ```
/// use chunked_batch::core::item::PassThroughProcessor;
/// use chunked_batch::core::step::{RepeatStatus, StepBuilder, Tasklet};
/// use chunked_batch::core::execution::StepExecution;
/// use chunked_batch::BatchError;
///
/// struct Hello;
///
/// impl Tasklet for Hello {
///     fn execute(&self, _step_execution: &StepExecution) -> Result<RepeatStatus, BatchError> {
///         println!("Hello world!");
///         Ok(RepeatStatus::Finished)
///     }
/// }
///
/// let tasklet = Hello;
/// let step = StepBuilder::new("hello").tasklet(&tasklet).build();
/// assert_eq!(step.name(), "hello");
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// A step named with a random identifier.
    pub fn unnamed() -> Self {
        Self { name: build_name() }
    }

    pub fn tasklet(self, tasklet: &dyn Tasklet) -> TaskletStepBuilder<'_> {
        TaskletStepBuilder::new(&self.name, tasklet)
    }

    pub fn chunk<'a, I: 'a, O: 'a>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}
