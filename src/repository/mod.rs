//! Execution tracking: the durable history of job and step executions.
//!
//! The [`JobRepository`] is an append-only log of [`Transition`]s keyed by job
//! name, instance identity and execution id. The launcher uses it to decide
//! whether a launch is a new instance, a restart or a duplicate; the step
//! orchestrator uses it to persist progress after every committed chunk and to
//! find the position a restarted step resumes from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    core::{
        execution::{BatchStatus, JobExecution, JobInstance, StepExecution},
        parameters::JobParameters,
    },
    BatchError,
};

/// In-memory repository for tests and single-process runs.
pub mod memory;

#[cfg(feature = "rdbc-sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "rdbc-sqlite")))]
/// Durable repository backed by SQLite.
pub mod sqlite;

pub use memory::InMemoryJobRepository;
#[cfg(feature = "rdbc-sqlite")]
pub use sqlite::SqliteJobRepository;

/// What happened to an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionKind {
    JobStarted,
    StepStarted,
    /// A chunk (or tasklet iteration) was committed; carries the new restart position.
    ChunkCommitted,
    StepFinished,
    JobFinished,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::JobStarted => "JOB_STARTED",
            TransitionKind::StepStarted => "STEP_STARTED",
            TransitionKind::ChunkCommitted => "CHUNK_COMMITTED",
            TransitionKind::StepFinished => "STEP_FINISHED",
            TransitionKind::JobFinished => "JOB_FINISHED",
        }
    }
}

/// State of the execution right after the transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionSnapshot {
    /// Job execution without its step executions.
    Job(JobExecution),
    Step(StepExecution),
}

/// One entry of the execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub instance: JobInstance,
    pub job_execution_id: i64,
    pub snapshot: ExecutionSnapshot,
    pub recorded_at: DateTime<Utc>,
}

impl Transition {
    pub fn job(kind: TransitionKind, execution: &JobExecution) -> Self {
        let mut snapshot = execution.clone();
        snapshot.step_executions.clear();
        Self {
            kind,
            instance: execution.instance.clone(),
            job_execution_id: execution.id,
            snapshot: ExecutionSnapshot::Job(snapshot),
            recorded_at: Utc::now(),
        }
    }

    pub fn step(kind: TransitionKind, instance: &JobInstance, step_execution: &StepExecution) -> Self {
        Self {
            kind,
            instance: instance.clone(),
            job_execution_id: step_execution.job_execution_id,
            snapshot: ExecutionSnapshot::Step(step_execution.clone()),
            recorded_at: Utc::now(),
        }
    }

    pub fn status(&self) -> BatchStatus {
        match &self.snapshot {
            ExecutionSnapshot::Job(execution) => execution.status,
            ExecutionSnapshot::Step(step_execution) => step_execution.status,
        }
    }

    pub fn step_name(&self) -> Option<&str> {
        match &self.snapshot {
            ExecutionSnapshot::Job(_) => None,
            ExecutionSnapshot::Step(step_execution) => Some(&step_execution.step_name),
        }
    }
}

/// Storage contract for execution history.
///
/// Implementations must be `Send + Sync`: independent job runs on different
/// threads share one repository. Creating an execution for a given identity is
/// mutually exclusive; work on distinct instances must not serialize on it.
pub trait JobRepository: Send + Sync {
    /// Looks up or creates the instance for `(job_name, parameters.job_key())`
    /// and creates a new execution for it, atomically.
    ///
    /// # Errors
    ///
    /// - [`BatchError::DuplicateCompletedRun`] if the instance already completed
    /// - [`BatchError::JobExecutionAlreadyRunning`] if an execution is still running
    /// - [`BatchError::JobRestartNotAllowed`] if the instance failed or stopped
    ///   before and `restartable` is false
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, BatchError>;

    /// Creates a step execution with a fresh id for `job_execution`.
    fn create_step_execution(
        &self,
        job_execution: &JobExecution,
        step_name: &str,
    ) -> Result<StepExecution, BatchError>;

    /// Appends a transition. The transition is durable when this returns.
    fn record_transition(&self, transition: &Transition) -> Result<(), BatchError>;

    /// The most recent execution of `instance`, with its step executions.
    fn latest_execution(&self, instance: &JobInstance) -> Result<Option<JobExecution>, BatchError>;

    /// Whether `instance` has a COMPLETED execution.
    fn is_completed(&self, instance: &JobInstance) -> Result<bool, BatchError> {
        Ok(self
            .latest_execution(instance)?
            .is_some_and(|execution| execution.status == BatchStatus::Completed))
    }

    /// The most recent execution of `step_name` across all executions of `instance`.
    fn last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError>;

    /// The instance of `job_name` created last, with the parameters it was created with.
    fn last_job_instance(
        &self,
        job_name: &str,
    ) -> Result<Option<(JobInstance, JobParameters)>, BatchError>;

    /// The instance of `job_name` identified by `parameters`, if it exists.
    fn job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError>;

    /// All transitions of one job execution, in the order they were recorded.
    fn transitions(&self, job_execution_id: i64) -> Result<Vec<Transition>, BatchError>;

    /// Asks a running execution to stop at its next chunk boundary.
    fn request_stop(&self, job_execution_id: i64) -> Result<(), BatchError>;

    fn is_stop_requested(&self, job_execution_id: i64) -> Result<bool, BatchError>;
}
