use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, info};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite, SqliteConnection,
};

use crate::{
    core::{
        execution::{BatchStatus, JobExecution, JobInstance, StepExecution},
        parameters::JobParameters,
    },
    item::rdbc::block_on,
    BatchError,
};

use super::{ExecutionSnapshot, JobRepository, Transition};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS batch_job_instance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_name TEXT NOT NULL,
        job_key TEXT NOT NULL,
        parameters TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (job_name, job_key)
    )",
    "CREATE TABLE IF NOT EXISTS batch_job_execution (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        instance_id INTEGER NOT NULL REFERENCES batch_job_instance (id),
        parameters TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS batch_step_execution (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_execution_id INTEGER NOT NULL REFERENCES batch_job_execution (id),
        step_name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS batch_transition (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        instance_id INTEGER NOT NULL REFERENCES batch_job_instance (id),
        job_execution_id INTEGER NOT NULL REFERENCES batch_job_execution (id),
        step_name TEXT,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        payload TEXT NOT NULL,
        recorded_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS batch_transition_execution
        ON batch_transition (job_execution_id, seq)",
    "CREATE TABLE IF NOT EXISTS batch_stop_request (
        job_execution_id INTEGER PRIMARY KEY,
        requested_at TEXT NOT NULL
    )",
];

fn repository_error(error: sqlx::Error) -> BatchError {
    BatchError::Repository(error.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, BatchError> {
    serde_json::to_string(value).map_err(|error| BatchError::Repository(error.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, BatchError> {
    serde_json::from_str(json).map_err(|error| BatchError::Repository(error.to_string()))
}

/// A durable [`JobRepository`] in a SQLite database.
///
/// Transitions are only ever inserted into `batch_transition`; the state of an
/// execution is the fold of its transitions. Each call commits before
/// returning, so a process crash loses at most the chunk being written.
///
/// Creating an execution runs in one database transaction, serialized within
/// the process by a mutex; the unique `(job_name, job_key)` constraint
/// guards instance creation across processes.
pub struct SqliteJobRepository {
    pool: Pool<Sqlite>,
    create_lock: Mutex<()>,
}

impl SqliteJobRepository {
    /// Opens (creating if needed) the database at `url` and its tables.
    pub async fn connect(url: &str) -> Result<Self, BatchError> {
        let options: SqliteConnectOptions = url
            .parse::<SqliteConnectOptions>()
            .map_err(repository_error)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(repository_error)?;
        Self::with_pool(pool).await
    }

    /// A repository in a private in-memory database.
    pub async fn in_memory() -> Result<Self, BatchError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(repository_error)?;
        Self::with_pool(pool).await
    }

    /// Uses an existing pool, creating the tables if they do not exist.
    pub async fn with_pool(pool: Pool<Sqlite>) -> Result<Self, BatchError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(repository_error)?;
        }
        info!("Job repository schema ready");

        Ok(Self {
            pool,
            create_lock: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, BatchError> {
        self.create_lock
            .lock()
            .map_err(|_| BatchError::Repository("job repository lock poisoned".to_string()))
    }

    async fn find_instance(
        connection: &mut SqliteConnection,
        job_name: &str,
        job_key: &str,
    ) -> Result<Option<JobInstance>, BatchError> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM batch_job_instance WHERE job_name = ? AND job_key = ?",
        )
        .bind(job_name)
        .bind(job_key)
        .fetch_optional(&mut *connection)
        .await
        .map_err(repository_error)?;

        Ok(id.map(|id| JobInstance {
            id,
            job_name: job_name.to_string(),
            job_key: job_key.to_string(),
        }))
    }

    /// Rebuilds the latest execution of `instance` from its transitions.
    async fn load_latest_execution(
        connection: &mut SqliteConnection,
        instance: &JobInstance,
    ) -> Result<Option<JobExecution>, BatchError> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT id, parameters FROM batch_job_execution
             WHERE instance_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(instance.id)
        .fetch_optional(&mut *connection)
        .await
        .map_err(repository_error)?;

        let Some((id, parameters)) = row else {
            return Ok(None);
        };

        let mut execution = JobExecution::new(id, instance.clone(), from_json(&parameters)?);
        for transition in Self::load_transitions(connection, id).await? {
            match transition.snapshot {
                ExecutionSnapshot::Job(snapshot) => {
                    let step_executions = std::mem::take(&mut execution.step_executions);
                    execution = snapshot;
                    execution.step_executions = step_executions;
                }
                ExecutionSnapshot::Step(step_execution) => {
                    match execution
                        .step_executions
                        .iter_mut()
                        .find(|current| current.id == step_execution.id)
                    {
                        Some(current) => *current = step_execution,
                        None => execution.step_executions.push(step_execution),
                    }
                }
            }
        }

        Ok(Some(execution))
    }

    async fn load_transitions(
        connection: &mut SqliteConnection,
        job_execution_id: i64,
    ) -> Result<Vec<Transition>, BatchError> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM batch_transition WHERE job_execution_id = ? ORDER BY seq",
        )
        .bind(job_execution_id)
        .fetch_all(&mut *connection)
        .await
        .map_err(repository_error)?;

        payloads.iter().map(|payload| from_json(payload)).collect()
    }

    async fn create_job_execution_async(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, BatchError> {
        let job_key = parameters.job_key();
        let mut transaction = self.pool.begin().await.map_err(repository_error)?;

        let instance = match Self::find_instance(&mut transaction, job_name, &job_key).await? {
            Some(instance) => {
                if let Some(last) = Self::load_latest_execution(&mut transaction, &instance).await? {
                    match last.status {
                        BatchStatus::Completed => {
                            return Err(BatchError::DuplicateCompletedRun {
                                job_name: job_name.to_string(),
                                job_key,
                            });
                        }
                        status if status.is_running() => {
                            return Err(BatchError::JobExecutionAlreadyRunning {
                                job_name: job_name.to_string(),
                                job_key,
                            });
                        }
                        _ if !restartable => {
                            return Err(BatchError::JobRestartNotAllowed(job_name.to_string()));
                        }
                        _ => {}
                    }
                }
                instance
            }
            None => {
                let id = sqlx::query(
                    "INSERT INTO batch_job_instance (job_name, job_key, parameters, created_at)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(job_name)
                .bind(&job_key)
                .bind(to_json(parameters)?)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut *transaction)
                .await
                .map_err(repository_error)?
                .last_insert_rowid();

                let instance = JobInstance {
                    id,
                    job_name: job_name.to_string(),
                    job_key,
                };
                debug!("Created job instance {:?}", instance);
                instance
            }
        };

        let execution_id = sqlx::query(
            "INSERT INTO batch_job_execution (instance_id, parameters, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(instance.id)
        .bind(to_json(parameters)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *transaction)
        .await
        .map_err(repository_error)?
        .last_insert_rowid();

        transaction.commit().await.map_err(repository_error)?;

        Ok(JobExecution::new(execution_id, instance, parameters.clone()))
    }
}

impl JobRepository for SqliteJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, BatchError> {
        let _guard = self.lock()?;
        block_on(self.create_job_execution_async(job_name, parameters, restartable))
    }

    fn create_step_execution(
        &self,
        job_execution: &JobExecution,
        step_name: &str,
    ) -> Result<StepExecution, BatchError> {
        let id = block_on(
            sqlx::query("INSERT INTO batch_step_execution (job_execution_id, step_name) VALUES (?, ?)")
                .bind(job_execution.id)
                .bind(step_name)
                .execute(&self.pool),
        )
        .map_err(repository_error)?
        .last_insert_rowid();

        let mut step_execution = StepExecution::new(step_name, job_execution.id);
        step_execution.id = id;
        Ok(step_execution)
    }

    fn record_transition(&self, transition: &Transition) -> Result<(), BatchError> {
        let payload = to_json(transition)?;
        block_on(
            sqlx::query(
                "INSERT INTO batch_transition
                 (instance_id, job_execution_id, step_name, kind, status, payload, recorded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(transition.instance.id)
            .bind(transition.job_execution_id)
            .bind(transition.step_name())
            .bind(transition.kind.as_str())
            .bind(transition.status().as_str())
            .bind(payload)
            .bind(transition.recorded_at.to_rfc3339())
            .execute(&self.pool),
        )
        .map_err(repository_error)?;

        debug!(
            "Recorded {} for job execution {}",
            transition.kind.as_str(),
            transition.job_execution_id
        );
        Ok(())
    }

    fn latest_execution(&self, instance: &JobInstance) -> Result<Option<JobExecution>, BatchError> {
        block_on(async {
            let mut connection = self.pool.acquire().await.map_err(repository_error)?;
            Self::load_latest_execution(&mut connection, instance).await
        })
    }

    fn last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        let payload: Option<String> = block_on(
            sqlx::query_scalar(
                "SELECT payload FROM batch_transition
                 WHERE instance_id = ? AND step_name = ?
                 ORDER BY seq DESC LIMIT 1",
            )
            .bind(instance.id)
            .bind(step_name)
            .fetch_optional(&self.pool),
        )
        .map_err(repository_error)?;

        match payload {
            Some(payload) => match from_json::<Transition>(&payload)?.snapshot {
                ExecutionSnapshot::Step(step_execution) => Ok(Some(step_execution)),
                ExecutionSnapshot::Job(_) => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn last_job_instance(
        &self,
        job_name: &str,
    ) -> Result<Option<(JobInstance, JobParameters)>, BatchError> {
        let row: Option<(i64, String, String)> = block_on(
            sqlx::query_as(
                "SELECT id, job_key, parameters FROM batch_job_instance
                 WHERE job_name = ? ORDER BY id DESC LIMIT 1",
            )
            .bind(job_name)
            .fetch_optional(&self.pool),
        )
        .map_err(repository_error)?;

        match row {
            Some((id, job_key, parameters)) => Ok(Some((
                JobInstance {
                    id,
                    job_name: job_name.to_string(),
                    job_key,
                },
                from_json(&parameters)?,
            ))),
            None => Ok(None),
        }
    }

    fn job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError> {
        block_on(async {
            let mut connection = self.pool.acquire().await.map_err(repository_error)?;
            Self::find_instance(&mut connection, job_name, &parameters.job_key()).await
        })
    }

    fn transitions(&self, job_execution_id: i64) -> Result<Vec<Transition>, BatchError> {
        block_on(async {
            let mut connection = self.pool.acquire().await.map_err(repository_error)?;
            Self::load_transitions(&mut connection, job_execution_id).await
        })
    }

    fn request_stop(&self, job_execution_id: i64) -> Result<(), BatchError> {
        block_on(
            sqlx::query(
                "INSERT OR IGNORE INTO batch_stop_request (job_execution_id, requested_at)
                 VALUES (?, ?)",
            )
            .bind(job_execution_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool),
        )
        .map_err(repository_error)?;
        Ok(())
    }

    fn is_stop_requested(&self, job_execution_id: i64) -> Result<bool, BatchError> {
        let found: Option<i64> = block_on(
            sqlx::query_scalar(
                "SELECT job_execution_id FROM batch_stop_request WHERE job_execution_id = ?",
            )
            .bind(job_execution_id)
            .fetch_optional(&self.pool),
        )
        .map_err(repository_error)?;
        Ok(found.is_some())
    }
}
