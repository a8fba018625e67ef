mod common;

use std::{thread, time::Duration};

use chunked_batch::{
    core::{
        execution::{BatchStatus, StepExecution},
        job::{JobBuilder, JobLauncher, JobRegistry},
        parameters::{JobParametersBuilder, ParameterSchema, ParameterType, RunIdIncrementer},
        policy::RetryPolicy,
        step::{RepeatStatus, StepBuilder, Tasklet},
    },
    item::flat_file::FlatFileItemReaderBuilder,
    jobs::{
        hello,
        person::{Person, PersonValidationProcessor},
    },
    repository::{InMemoryJobRepository, JobRepository, SqliteJobRepository},
    tasklet::print::PrintTasklet,
    BatchError,
};
use mockall::Sequence;
use tempfile::TempDir;

use common::{person_lines, sqlite_url, MockPersonWriter};

struct SlowTasklet;

impl Tasklet for SlowTasklet {
    fn execute(&self, _step_execution: &StepExecution) -> Result<RepeatStatus, BatchError> {
        thread::sleep(Duration::from_millis(100));
        Ok(RepeatStatus::Finished)
    }
}

fn connection_lost() -> BatchError {
    BatchError::ConnectionLost("connection reset by peer".to_string())
}

#[test]
fn lost_connection_is_retried_with_the_same_chunk() {
    let reader = FlatFileItemReaderBuilder::new()
        .names(&["name", "email", "age", "id"])
        .comments(&["--"])
        .from_text(&person_lines(3, None));
    let processor = PersonValidationProcessor;

    let mut writer = MockPersonWriter::lenient();
    let mut sequence = Sequence::new();
    writer
        .expect_write()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Err(connection_lost()));
    writer
        .expect_write()
        .withf(|items: &[Person]| items.len() == 3 && items[0].id == 1)
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(()));

    let step = StepBuilder::new("retryStep")
        .chunk::<Person, Person>(5)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
        .build()
        .unwrap();
    let job = JobBuilder::new().name("retryJob").start(&step).build();

    let repository = InMemoryJobRepository::new();
    let mut registry = JobRegistry::new();
    registry.register(&job).unwrap();
    let launcher = JobLauncher::new(&repository, registry);

    let execution = launcher
        .run_job("retryJob", &JobParametersBuilder::new().build())
        .unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    let step_execution = execution.step_execution("retryStep").unwrap();
    assert_eq!(step_execution.write_count, 3);
    assert_eq!(step_execution.commit_count, 1);
    assert_eq!(step_execution.rollback_count, 1);
}

#[test]
fn exhausted_retries_fail_the_job() {
    let reader = FlatFileItemReaderBuilder::new()
        .names(&["name", "email", "age", "id"])
        .comments(&["--"])
        .from_text(&person_lines(3, None));
    let processor = PersonValidationProcessor;

    let mut writer = MockPersonWriter::lenient();
    writer
        .expect_write()
        .times(3)
        .returning(|_| Err(connection_lost()));

    let step = StepBuilder::new("retryStep")
        .chunk::<Person, Person>(5)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
        .build()
        .unwrap();
    let job = JobBuilder::new().name("retryJob").start(&step).build();

    let repository = InMemoryJobRepository::new();
    let mut registry = JobRegistry::new();
    registry.register(&job).unwrap();
    let launcher = JobLauncher::new(&repository, registry);

    let execution = launcher
        .run_job("retryJob", &JobParametersBuilder::new().build())
        .unwrap();

    assert_eq!(execution.status, BatchStatus::Failed);
    assert!(execution.exit_status.exit_description.contains("Connection lost"));
    let step_execution = execution.step_execution("retryStep").unwrap();
    assert_eq!(step_execution.commit_count, 0);
    assert_eq!(step_execution.rollback_count, 3);
}

#[test]
fn concurrent_launches_of_one_instance_run_it_once() {
    let repository = InMemoryJobRepository::new();
    let parameters = JobParametersBuilder::new()
        .add_string("day", "2026-10-16")
        .build();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    let tasklet = SlowTasklet;
                    let step = StepBuilder::new("slowStep").tasklet(&tasklet).build();
                    let job = JobBuilder::new().name("dailyJob").start(&step).build();
                    let mut registry = JobRegistry::new();
                    registry.register(&job)?;
                    JobLauncher::new(&repository, registry)
                        .run_job("dailyJob", &parameters)
                        .map(|execution| execution.status)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let completed = results
        .iter()
        .filter(|result| matches!(result, Ok(BatchStatus::Completed)))
        .count();
    assert_eq!(completed, 1);
    assert!(results.iter().all(|result| matches!(
        result,
        Ok(BatchStatus::Completed)
            | Err(BatchError::JobExecutionAlreadyRunning { .. })
            | Err(BatchError::DuplicateCompletedRun { .. })
    )));
}

#[test]
fn incrementer_gives_every_launch_its_own_run_id() {
    let repository = InMemoryJobRepository::new();
    let tasklet = PrintTasklet::new("tick");
    let step = StepBuilder::new("tickStep").tasklet(&tasklet).build();
    let job = JobBuilder::new()
        .name("tickJob")
        .start(&step)
        .incrementer(RunIdIncrementer::new())
        .build();
    let mut registry = JobRegistry::new();
    registry.register(&job).unwrap();
    let launcher = JobLauncher::new(&repository, registry);

    let run_ids: Vec<_> = (0..3)
        .map(|_| {
            let execution = launcher
                .run_job("tickJob", &JobParametersBuilder::new().build())
                .unwrap();
            assert_eq!(execution.status, BatchStatus::Completed);
            execution.parameters.get_long(RunIdIncrementer::DEFAULT_KEY)
        })
        .collect();

    assert_eq!(run_ids, vec![Some(1), Some(2), Some(3)]);
}

#[test]
fn invalid_parameters_do_not_create_an_execution() {
    let repository = InMemoryJobRepository::new();
    let tasklet = PrintTasklet::default();
    let step = StepBuilder::new("reportStep").tasklet(&tasklet).build();
    let job = JobBuilder::new()
        .name("reportJob")
        .start(&step)
        .validator(ParameterSchema::new().required("report.date", ParameterType::Date))
        .build();
    let mut registry = JobRegistry::new();
    registry.register(&job).unwrap();
    let launcher = JobLauncher::new(&repository, registry);

    let parameters = JobParametersBuilder::new()
        .add_string("report.date", "yesterday")
        .build();
    let result = launcher.run_job("reportJob", &parameters);

    assert!(matches!(result, Err(BatchError::InvalidJobParameters(_))));
    assert!(repository.last_job_instance("reportJob").unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn completed_run_is_remembered_across_connections() {
    let directory = TempDir::new().unwrap();
    let url = sqlite_url(directory.path(), "batch.db");
    let parameters = JobParametersBuilder::new()
        .add_string("greeting", "hello")
        .build();
    let tasklet = PrintTasklet::default();
    let step = hello::step(&tasklet);
    let job = hello::job(&step);

    {
        let repository = SqliteJobRepository::connect(&url).await.unwrap();
        let mut registry = JobRegistry::new();
        registry.register(&job).unwrap();
        let execution = JobLauncher::new(&repository, registry)
            .run_job(hello::JOB_NAME, &parameters)
            .unwrap();
        assert_eq!(execution.status, BatchStatus::Completed);
    }

    let repository = SqliteJobRepository::connect(&url).await.unwrap();
    let mut registry = JobRegistry::new();
    registry.register(&job).unwrap();
    let result = JobLauncher::new(&repository, registry).run_job(hello::JOB_NAME, &parameters);

    assert!(matches!(
        result,
        Err(BatchError::DuplicateCompletedRun { .. })
    ));
}
