use std::env;

use anyhow::Result;
use chunked_batch::{
    config::BatchConfig,
    core::{
        execution::BatchStatus,
        job::{JobLauncher, JobRegistry},
        parameters::JobParametersBuilder,
    },
    item::rdbc::sqlite_transaction::SqliteTransactionManager,
    jobs::{person::PersonValidationProcessor, person_import},
    repository::{InMemoryJobRepository, JobRepository, SqliteJobRepository},
};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// Usage: `person_import [config.json]`
#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => BatchConfig::from_path(path)?,
        None => {
            let mut config = BatchConfig::default();
            config.input.path = "demos/data/person.csv".to_string();
            config.database.url = "sqlite://target/person.db".to_string();
            config.validate()?;
            config
        }
    };

    // Prepare target database
    let options: SqliteConnectOptions = config.database.url.parse()?;
    let pool = SqlitePoolOptions::new()
        .connect_with(options.create_if_missing(true))
        .await?;
    person_import::create_table(&pool, &config.database.table).await?;
    let transaction_manager = SqliteTransactionManager::new(pool);

    // Prepare execution history
    let repository: Box<dyn JobRepository> = match &config.repository.url {
        Some(url) => Box::new(SqliteJobRepository::connect(url).await?),
        None => Box::new(InMemoryJobRepository::new()),
    };

    // Assemble the job
    let reader = person_import::reader(&config);
    let processor = PersonValidationProcessor;
    let writer = person_import::writer(&config, &transaction_manager);
    let step = person_import::step(&config, &reader, &processor, &writer, &transaction_manager)?;
    let job = person_import::job(&step);

    let mut registry = JobRegistry::new();
    registry.register(&job)?;
    let launcher = JobLauncher::new(repository.as_ref(), registry);

    // Execute process
    let parameters = JobParametersBuilder::new()
        .add_string(person_import::INPUT_FILE_PARAMETER, &config.input.path)
        .build();
    let execution = launcher.run_job(person_import::JOB_NAME, &parameters)?;

    if let Some(step_execution) = execution.step_execution(person_import::STEP_NAME) {
        info!(
            "read: {}, written: {}, skipped: {}, commits: {}",
            step_execution.read_count,
            step_execution.write_count,
            step_execution.skip_count(),
            step_execution.commit_count
        );
    }

    if execution.status != BatchStatus::Completed {
        anyhow::bail!(
            "job {} ended {}: {}",
            person_import::JOB_NAME,
            execution.status.as_str(),
            execution.exit_status.exit_description
        );
    }

    Ok(())
}
