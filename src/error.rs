use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    #[error("ItemReader from: {0}")]
    ItemReader(String),

    /// The input resource could not be opened. Always fatal for the step.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single input record could not be parsed. Skippable under a skip policy.
    #[error("Malformed record at line {line}: {message}")]
    MalformedRecord { line: usize, message: String },

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    /// The target store refused the chunk (constraint violation).
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// The connection to the target store was lost. Retryable.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Step failed: {0}")]
    Step(String),

    #[error("A completed execution already exists for job {job_name} with key [{job_key}]")]
    DuplicateCompletedRun { job_name: String, job_key: String },

    #[error("An execution of job {job_name} with key [{job_key}] is already running")]
    JobExecutionAlreadyRunning { job_name: String, job_key: String },

    #[error("Job {0} is not restartable")]
    JobRestartNotAllowed(String),

    #[error("Invalid job parameters: {0}")]
    InvalidJobParameters(String),

    #[error("No job registered under the name {0}")]
    NoSuchJob(String),

    #[error("A job named {0} is already registered")]
    DuplicateJob(String),

    #[error("Job repository error: {0}")]
    Repository(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchError {
    /// Errors worth retrying: the same chunk may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, BatchError::ConnectionLost(_))
    }

    /// Errors raised for a single item while reading, which a skip policy may discard.
    pub fn is_skippable_read(&self) -> bool {
        matches!(
            self,
            BatchError::MalformedRecord { .. } | BatchError::ItemReader(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::BatchError;

    #[test]
    fn connection_lost_is_transient() {
        assert!(BatchError::ConnectionLost("reset".to_string()).is_transient());
        assert!(!BatchError::WriteRejected("unique".to_string()).is_transient());
    }

    #[test]
    fn source_unavailable_is_not_skippable() {
        let malformed = BatchError::MalformedRecord {
            line: 3,
            message: "bad age".to_string(),
        };
        assert!(malformed.is_skippable_read());
        assert!(!BatchError::SourceUnavailable("gone".to_string()).is_skippable_read());
    }

    #[test]
    fn duplicate_run_displays_identity() {
        let err = BatchError::DuplicateCompletedRun {
            job_name: "import".to_string(),
            job_key: "file=a.csv(STRING)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "A completed execution already exists for job import with key [file=a.csv(STRING)]"
        );
    }
}
