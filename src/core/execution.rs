//! Runtime records of a job: instances, executions and their status.
//!
//! These are the values the [`JobRepository`](crate::repository::JobRepository)
//! persists. They are created by the launcher and the step orchestrator only;
//! once an execution reaches a terminal [`BatchStatus`] it is never modified.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::parameters::JobParameters;

/// Status of a job or step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Created but not yet running.
    Starting,
    /// Running.
    Started,
    /// A stop was requested; it takes effect at the next chunk boundary.
    Stopping,
    /// Stopped by request. Restartable.
    Stopped,
    /// Ended with a fatal error. Restartable.
    Failed,
    /// Ended successfully.
    Completed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Stopped | BatchStatus::Failed | BatchStatus::Completed
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Completed => "COMPLETED",
        }
    }
}

/// Exit code and free-form description reported when an execution ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const NOOP: &'static str = "NOOP";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn new(exit_code: &str) -> Self {
        Self {
            exit_code: exit_code.to_string(),
            exit_description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.exit_description = description.into();
        self
    }

    /// Exit status matching a terminal batch status.
    pub fn from_status(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => Self::new(Self::COMPLETED),
            BatchStatus::Failed => Self::new(Self::FAILED),
            BatchStatus::Stopped => Self::new(Self::STOPPED),
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping => {
                Self::new(Self::EXECUTING)
            }
        }
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::new(Self::UNKNOWN)
    }
}

/// Key/value state saved with a step execution and handed back on restart.
///
/// Readers store their position here so a failed step can resume after the
/// last committed chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_usize(&mut self, key: &str, value: usize) {
        self.entries.insert(key.to_string(), Value::from(value as u64));
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.entries
            .get(key)
            .and_then(Value::as_u64)
            .map(|value| value as usize)
    }

    pub fn put_string(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(key.to_string(), Value::from(value.into()));
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A job identity: the job name plus the canonical key of its identifying parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: i64,
    pub job_name: String,
    pub job_key: String,
}

/// One attempt to run a [`JobInstance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub instance: JobInstance,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_status: ExitStatus,
    /// Messages of the errors that ended this execution, oldest first.
    pub failures: Vec<String>,
    /// Step executions of this run, in execution order.
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    pub fn new(id: i64, instance: JobInstance, parameters: JobParameters) -> Self {
        Self {
            id,
            instance,
            parameters,
            status: BatchStatus::Starting,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            exit_status: ExitStatus::new(ExitStatus::EXECUTING),
            failures: Vec::new(),
            step_executions: Vec::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.instance.job_name
    }

    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .find(|step_execution| step_execution.step_name == step_name)
    }
}

/// One attempt to run a step within a [`JobExecution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: i64,
    pub job_execution_id: i64,
    pub step_name: String,
    pub status: BatchStatus,
    /// Items returned by the reader.
    pub read_count: usize,
    /// Items committed by the writer.
    pub write_count: usize,
    /// Items the processor chose not to pass on.
    pub filter_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_status: ExitStatus,
    pub execution_context: ExecutionContext,
}

impl StepExecution {
    pub fn new(step_name: &str, job_execution_id: i64) -> Self {
        Self {
            id: 0,
            job_execution_id,
            step_name: step_name.to_string(),
            status: BatchStatus::Starting,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            start_time: None,
            end_time: None,
            exit_status: ExitStatus::new(ExitStatus::EXECUTING),
            execution_context: ExecutionContext::new(),
        }
    }

    /// Total of read, process and write skips.
    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(BatchStatus::Stopped.is_terminal());
        assert!(!BatchStatus::Started.is_terminal());
        assert!(BatchStatus::Stopping.is_running());
    }

    #[test]
    fn execution_context_keeps_positions() {
        let mut context = ExecutionContext::new();
        assert!(context.is_empty());

        context.put_usize("reader.read.count", 400);
        context.put_string("reader.file", "person.csv");

        assert_eq!(context.get_usize("reader.read.count"), Some(400));
        assert_eq!(context.get_string("reader.file"), Some("person.csv"));
        assert_eq!(context.get_usize("missing"), None);

        let json = serde_json::to_string(&context).unwrap();
        let restored: ExecutionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, context);
    }

    #[test]
    fn skip_count_sums_all_phases() {
        let mut step_execution = StepExecution::new("import", 1);
        step_execution.read_skip_count = 1;
        step_execution.process_skip_count = 2;
        step_execution.write_skip_count = 3;
        assert_eq!(step_execution.skip_count(), 6);
    }

    #[test]
    fn exit_status_follows_batch_status() {
        assert_eq!(
            ExitStatus::from_status(BatchStatus::Failed).exit_code,
            ExitStatus::FAILED
        );
        assert_eq!(
            ExitStatus::from_status(BatchStatus::Started).exit_code,
            ExitStatus::EXECUTING
        );
    }
}
