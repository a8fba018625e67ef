mod common;

use chunked_batch::{
    config::BatchConfig,
    core::{
        execution::{BatchStatus, JobExecution},
        job::{JobLauncher, JobRegistry},
        parameters::{JobParameters, JobParametersBuilder, RunIdIncrementer},
    },
    item::rdbc::sqlite_transaction::SqliteTransactionManager,
    jobs::{person::PersonValidationProcessor, person_import},
    repository::{InMemoryJobRepository, JobRepository, SqliteJobRepository, TransitionKind},
    BatchError,
};
use tempfile::TempDir;

use common::{config, count_rows, init_logger, person_file, sqlite_url, target_pool, write_person_file};

fn import(
    config: &BatchConfig,
    repository: &dyn JobRepository,
    transaction_manager: &SqliteTransactionManager,
    parameters: &JobParameters,
) -> Result<JobExecution, BatchError> {
    let reader = person_import::reader(config);
    let processor = PersonValidationProcessor;
    let writer = person_import::writer(config, transaction_manager);
    let step = person_import::step(config, &reader, &processor, &writer, transaction_manager)?;
    let job = person_import::job(&step);

    let mut registry = JobRegistry::new();
    registry.register(&job)?;
    JobLauncher::new(repository, registry).run_job(person_import::JOB_NAME, parameters)
}

fn input_parameters(config: &BatchConfig) -> JobParametersBuilder {
    JobParametersBuilder::new().add_string(person_import::INPUT_FILE_PARAMETER, &config.input.path)
}

#[tokio::test(flavor = "multi_thread")]
async fn imports_the_demo_file_in_three_chunks() {
    init_logger();
    let directory = TempDir::new().unwrap();
    let config = config(&person_file(), 200, 10);
    let pool = target_pool(&directory, &config).await;
    let transaction_manager = SqliteTransactionManager::new(pool.clone());
    let repository = InMemoryJobRepository::new();

    let execution = import(
        &config,
        &repository,
        &transaction_manager,
        &input_parameters(&config).build(),
    )
    .unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    let step_execution = execution.step_execution(person_import::STEP_NAME).unwrap();
    assert_eq!(step_execution.read_count, 450);
    assert_eq!(step_execution.write_count, 450);
    assert_eq!(step_execution.commit_count, 3);
    assert_eq!(step_execution.skip_count(), 0);
    assert_eq!(count_rows(&pool, &config.database.table).await, 450);

    let commits = repository
        .transitions(execution.id)
        .unwrap()
        .iter()
        .filter(|transition| transition.kind == TransitionKind::ChunkCommitted)
        .count();
    assert_eq!(commits, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_line_is_skipped() {
    init_logger();
    let directory = TempDir::new().unwrap();
    let input = write_person_file(&directory, 450, Some(301));
    let config = config(&input, 200, 10);
    let pool = target_pool(&directory, &config).await;
    let transaction_manager = SqliteTransactionManager::new(pool.clone());
    let repository = InMemoryJobRepository::new();

    let execution = import(
        &config,
        &repository,
        &transaction_manager,
        &input_parameters(&config).build(),
    )
    .unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    let step_execution = execution.step_execution(person_import::STEP_NAME).unwrap();
    assert_eq!(step_execution.read_skip_count, 1);
    assert_eq!(
        step_execution.read_count + step_execution.read_skip_count,
        step_execution.write_count + step_execution.skip_count()
    );
    assert_eq!(step_execution.write_count, 449);
    assert_eq!(step_execution.commit_count, 3);
    assert_eq!(count_rows(&pool, &config.database.table).await, 449);

    let missing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM person WHERE id = 301")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(missing, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_import_restarts_after_its_last_commit() {
    init_logger();
    let directory = TempDir::new().unwrap();
    let input = write_person_file(&directory, 450, Some(301));
    let config = config(&input, 200, 0);
    let pool = target_pool(&directory, &config).await;
    let transaction_manager = SqliteTransactionManager::new(pool.clone());
    let repository_url = sqlite_url(directory.path(), "batch.db");

    let first = {
        let repository = SqliteJobRepository::connect(&repository_url).await.unwrap();
        import(
            &config,
            &repository,
            &transaction_manager,
            &input_parameters(&config).build(),
        )
        .unwrap()
    };

    assert_eq!(first.status, BatchStatus::Failed);
    assert!(first.exit_status.exit_description.contains("line"));
    let step_execution = first.step_execution(person_import::STEP_NAME).unwrap();
    assert_eq!(step_execution.commit_count, 1);
    assert_eq!(step_execution.read_count, 200);
    assert_eq!(step_execution.write_count, 200);
    assert_eq!(count_rows(&pool, &config.database.table).await, 200);

    // fix the input, then launch the same instance from a fresh repository connection
    write_person_file(&directory, 450, None);
    let repository = SqliteJobRepository::connect(&repository_url).await.unwrap();
    let parameters = input_parameters(&config).build();

    let second = import(&config, &repository, &transaction_manager, &parameters).unwrap();

    assert_eq!(second.status, BatchStatus::Completed);
    assert_eq!(second.instance, first.instance);
    assert_ne!(second.id, first.id);
    let step_execution = second.step_execution(person_import::STEP_NAME).unwrap();
    assert_eq!(step_execution.read_count, 250);
    assert_eq!(step_execution.write_count, 250);
    assert_eq!(step_execution.commit_count, 2);
    assert_eq!(count_rows(&pool, &config.database.table).await, 450);

    assert_eq!(second.parameters.get_long(RunIdIncrementer::DEFAULT_KEY), Some(1));

    // the instance is now complete
    let same_run = input_parameters(&config)
        .add_long(RunIdIncrementer::DEFAULT_KEY, 1)
        .build();
    let third = import(&config, &repository, &transaction_manager, &same_run);
    assert!(matches!(
        third,
        Err(BatchError::DuplicateCompletedRun { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_chunk_is_rolled_back() {
    init_logger();
    let directory = TempDir::new().unwrap();
    let input = write_person_file(&directory, 20, None);
    let config = config(&input, 10, 0);
    let pool = target_pool(&directory, &config).await;
    sqlx::query("INSERT INTO person (id, name, email, age) VALUES (5, 'Existing', 'existing@example.com', 40)")
        .execute(&pool)
        .await
        .unwrap();
    let transaction_manager = SqliteTransactionManager::new(pool.clone());
    let repository = InMemoryJobRepository::new();

    let execution = import(
        &config,
        &repository,
        &transaction_manager,
        &input_parameters(&config).build(),
    )
    .unwrap();

    assert_eq!(execution.status, BatchStatus::Failed);
    assert!(execution.failures[0].contains("Write rejected"));
    let step_execution = execution.step_execution(person_import::STEP_NAME).unwrap();
    assert_eq!(step_execution.status, BatchStatus::Failed);
    assert_eq!(step_execution.commit_count, 0);
    assert_eq!(step_execution.rollback_count, 1);
    assert_eq!(step_execution.write_count, 0);
    assert_eq!(count_rows(&pool, &config.database.table).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_row_is_scanned_out_of_its_chunk() {
    init_logger();
    let directory = TempDir::new().unwrap();
    let input = write_person_file(&directory, 20, None);
    let config = config(&input, 10, 10);
    let pool = target_pool(&directory, &config).await;
    sqlx::query("INSERT INTO person (id, name, email, age) VALUES (5, 'Existing', 'existing@example.com', 40)")
        .execute(&pool)
        .await
        .unwrap();
    let transaction_manager = SqliteTransactionManager::new(pool.clone());
    let repository = InMemoryJobRepository::new();

    let execution = import(
        &config,
        &repository,
        &transaction_manager,
        &input_parameters(&config).build(),
    )
    .unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    let step_execution = execution.step_execution(person_import::STEP_NAME).unwrap();
    assert_eq!(step_execution.write_count, 19);
    assert_eq!(step_execution.write_skip_count, 1);
    assert_eq!(step_execution.commit_count, 2);
    assert_eq!(step_execution.rollback_count, 2);
    assert_eq!(count_rows(&pool, &config.database.table).await, 20);

    let name: String = sqlx::query_scalar("SELECT name FROM person WHERE id = 5")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(name, "Existing");
}

#[tokio::test(flavor = "multi_thread")]
async fn every_launch_is_a_new_instance() {
    init_logger();
    let directory = TempDir::new().unwrap();
    let input = write_person_file(&directory, 5, None);
    let mut config = config(&input, 10, 10);
    let pool = target_pool(&directory, &config).await;
    let transaction_manager = SqliteTransactionManager::new(pool.clone());
    let repository = InMemoryJobRepository::new();

    let first = import(
        &config,
        &repository,
        &transaction_manager,
        &input_parameters(&config).build(),
    )
    .unwrap();

    // the second run targets another table so that ids do not collide
    config.database.table = "person_copy".to_string();
    person_import::create_table(&pool, &config.database.table)
        .await
        .unwrap();
    let second = import(
        &config,
        &repository,
        &transaction_manager,
        &input_parameters(&config).build(),
    )
    .unwrap();

    assert_eq!(first.status, BatchStatus::Completed);
    assert_eq!(second.status, BatchStatus::Completed);
    assert_eq!(first.parameters.get_long(RunIdIncrementer::DEFAULT_KEY), Some(1));
    assert_eq!(second.parameters.get_long(RunIdIncrementer::DEFAULT_KEY), Some(2));
    assert_ne!(first.instance.id, second.instance.id);
    assert_eq!(count_rows(&pool, "person").await, 5);
    assert_eq!(count_rows(&pool, "person_copy").await, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_input_fails_the_step() {
    init_logger();
    let directory = TempDir::new().unwrap();
    let missing = directory.path().join("absent.csv").display().to_string();
    let config = config(&missing, 10, 10);
    let pool = target_pool(&directory, &config).await;
    let transaction_manager = SqliteTransactionManager::new(pool.clone());
    let repository = InMemoryJobRepository::new();

    let execution = import(
        &config,
        &repository,
        &transaction_manager,
        &input_parameters(&config).build(),
    )
    .unwrap();

    assert_eq!(execution.status, BatchStatus::Failed);
    assert!(execution.exit_status.exit_description.contains("Source unavailable"));
    assert_eq!(count_rows(&pool, &config.database.table).await, 0);
}
