use log::info;
use sqlx::{Pool, Sqlite};

use crate::{
    config::BatchConfig,
    core::{
        job::{Job, JobBuilder},
        parameters::{ParameterSchema, ParameterType, RunIdIncrementer},
        policy::LimitCheckingItemSkipPolicy,
        step::{Step, StepBuilder},
    },
    item::{
        flat_file::{FlatFileItemReader, FlatFileItemReaderBuilder},
        rdbc::{sqlite_transaction::SqliteTransactionManager, sqlite_writer::SqliteItemWriter},
    },
    BatchError,
};

use super::person::{Person, PersonBinder, PersonValidationProcessor};

pub const JOB_NAME: &str = "personImportJob";
pub const STEP_NAME: &str = "personImportStep";
pub const READER_NAME: &str = "personReader";

/// Optional parameter naming the input file, for the record.
pub const INPUT_FILE_PARAMETER: &str = "input.file";

static PERSON_BINDER: PersonBinder = PersonBinder;

/// Creates the target table if it does not exist. `id` is the primary key.
pub async fn create_table(pool: &Pool<Sqlite>, table: &str) -> Result<(), BatchError> {
    let statement = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            age INTEGER NOT NULL
        )",
        table
    );
    sqlx::query(&statement)
        .execute(pool)
        .await
        .map_err(|error| BatchError::Configuration(error.to_string()))?;
    info!("Table {} ready", table);
    Ok(())
}

pub fn reader(config: &BatchConfig) -> FlatFileItemReader {
    let names: Vec<&str> = config.input.names.iter().map(String::as_str).collect();

    FlatFileItemReaderBuilder::new()
        .name(READER_NAME)
        .delimiter(config.delimiter())
        .names(&names)
        .comments(&[config.input.comment_prefix.as_str()])
        .lines_to_skip(config.input.lines_to_skip)
        .from_path(&config.input.path)
}

pub fn writer<'a>(
    config: &'a BatchConfig,
    transaction_manager: &'a SqliteTransactionManager,
) -> SqliteItemWriter<'a, Person> {
    PersonBinder::COLUMNS.into_iter().fold(
        SqliteItemWriter::new()
            .transaction_manager(transaction_manager)
            .table(&config.database.table)
            .item_binder(&PERSON_BINDER),
        |writer, column| writer.add_column(column),
    )
}

/// The import step: chunks of `config.chunk.size` persons, one transaction
/// each, skipping malformed lines, invalid persons and rejected rows up to
/// `config.chunk.skip_limit`, retrying lost connections.
pub fn step<'a>(
    config: &BatchConfig,
    reader: &'a FlatFileItemReader,
    processor: &'a PersonValidationProcessor,
    writer: &'a SqliteItemWriter<'a, Person>,
    transaction_manager: &'a SqliteTransactionManager,
) -> Result<Step<'a>, BatchError> {
    StepBuilder::new(STEP_NAME)
        .chunk::<Person, Person>(config.chunk.size)
        .reader(reader)
        .processor(processor)
        .writer(writer)
        .transaction_manager(transaction_manager)
        .skip_policy(
            LimitCheckingItemSkipPolicy::new(config.chunk.skip_limit).skip_write_rejections(true),
        )
        .retry_policy(config.chunk.retry_policy())
        .build()
}

/// The import job. A run id incrementer makes every launch a new instance.
pub fn job<'a>(step: &'a Step<'a>) -> Job<'a> {
    JobBuilder::new()
        .name(JOB_NAME)
        .start(step)
        .validator(ParameterSchema::new().optional(INPUT_FILE_PARAMETER, ParameterType::String))
        .incrementer(RunIdIncrementer::new())
        .build()
}
