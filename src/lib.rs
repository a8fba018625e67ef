#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 # Chunked Batch for Rust

 A chunk-oriented batch engine: jobs made of steps that read, process and
 write items in fixed-size chunks, each chunk in its own transaction, with
 every commit recorded so that a failed run restarts after its last committed
 chunk.

 ## Core Concepts

- **Job:** an ordered list of steps, with a parameter schema and an optional incrementer.
- **Step:** either a chunk loop over an `ItemReader`, an `ItemProcessor` and an `ItemWriter`, or a single `Tasklet`.
- **JobInstance:** a job name plus the key of its identifying parameters. An instance completes at most once.
- **JobExecution / StepExecution:** one attempt to run an instance or a step, with its counts and status.
- **JobRepository:** the append-only history of executions, used to refuse duplicate runs and to restart failed ones.
- **Skip and retry policies:** which item errors may be discarded, and which write errors may be retried.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| csv           | Enables the restartable flat file `ItemReader`                |
| rdbc-sqlite   | Enables the SQLite `ItemWriter`, transaction manager and durable `JobRepository` |
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available features                                |

 ## Getting Started

```rust
# use chunked_batch::{
#     core::{
#         execution::{BatchStatus, StepExecution},
#         job::{JobBuilder, JobLauncher, JobRegistry},
#         parameters::JobParametersBuilder,
#         step::{RepeatStatus, StepBuilder, Tasklet},
#     },
#     repository::InMemoryJobRepository,
#     BatchError,
# };
struct Greeting;

impl Tasklet for Greeting {
    fn execute(&self, _step_execution: &StepExecution) -> Result<RepeatStatus, BatchError> {
        println!("Hello world!");
        Ok(RepeatStatus::Finished)
    }
}

fn main() -> Result<(), BatchError> {
    let repository = InMemoryJobRepository::new();

    let tasklet = Greeting;
    let step = StepBuilder::new("greet").tasklet(&tasklet).build();
    let job = JobBuilder::new().name("greeting").start(&step).build();

    let mut registry = JobRegistry::new();
    registry.register(&job)?;
    let launcher = JobLauncher::new(&repository, registry);

    let parameters = JobParametersBuilder::new().add_string("who", "world").build();
    let execution = launcher.run_job("greeting", &parameters)?;
    assert_eq!(execution.status, BatchStatus::Completed);

    // the same identifying parameters cannot complete twice
    assert!(launcher.run_job("greeting", &parameters).is_err());

    Ok(())
}
```

## Demos
+ `cargo run --example person_import --features full`: imports `demos/data/person.csv` into SQLite, 200 persons per chunk
+ `cargo run --example hello_tasklet`: a single tasklet step printing `Hello world!`
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of items readers / writers (flat file reader, SQLite writer, logger)
pub mod item;

/// Execution history: the job repository and its implementations
pub mod repository;

/// Set of tasklets
pub mod tasklet;

/// Configuration of the sample jobs
pub mod config;

/// Assembly of the sample jobs
pub mod jobs;
