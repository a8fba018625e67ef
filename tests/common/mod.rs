#![allow(dead_code)]

pub mod mocks;

pub use mocks::MockPersonWriter;

use std::{fmt::Write as _, fs, path::Path};

use chunked_batch::{config::BatchConfig, jobs::person_import};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};
use tempfile::TempDir;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The demo input: 450 persons and three comment lines.
pub fn person_file() -> String {
    format!("{}/demos/data/person.csv", env!("CARGO_MANIFEST_DIR"))
}

/// `count` persons, ids starting at 1. The record at `malformed` (1-based)
/// gets a non numeric age.
pub fn person_lines(count: usize, malformed: Option<usize>) -> String {
    let mut content = String::from("-- generated persons\n");
    for id in 1..=count {
        let age = if Some(id) == malformed {
            "unknown".to_string()
        } else {
            (20 + id % 50).to_string()
        };
        let _ = writeln!(content, "Person {id},person{id}@example.com,{age},{id}");
    }
    content
}

pub fn write_person_file(directory: &TempDir, count: usize, malformed: Option<usize>) -> String {
    let path = directory.path().join("person.csv");
    fs::write(&path, person_lines(count, malformed)).unwrap();
    path.display().to_string()
}

pub fn sqlite_url(directory: &Path, file: &str) -> String {
    format!("sqlite://{}", directory.join(file).display())
}

/// A pool on a fresh database file with the person table created.
pub async fn target_pool(directory: &TempDir, config: &BatchConfig) -> Pool<Sqlite> {
    let options: SqliteConnectOptions = sqlite_url(directory.path(), "target.db").parse().unwrap();
    let pool = SqlitePoolOptions::new()
        .connect_with(options.create_if_missing(true))
        .await
        .unwrap();
    person_import::create_table(&pool, &config.database.table)
        .await
        .unwrap();
    pool
}

pub async fn count_rows(pool: &Pool<Sqlite>, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// The demo configuration pointed at `input`, with a fast retry backoff.
pub fn config(input: &str, chunk_size: usize, skip_limit: usize) -> BatchConfig {
    let mut config = BatchConfig::default();
    config.input.path = input.to_string();
    config.chunk.size = chunk_size;
    config.chunk.skip_limit = skip_limit;
    config.chunk.retry_backoff_ms = 1;
    config.validate().unwrap();
    config
}
