use crate::{
    core::{
        job::{Job, JobBuilder},
        step::{Step, StepBuilder},
    },
    tasklet::print::PrintTasklet,
};

pub const JOB_NAME: &str = "helloJob";
pub const STEP_NAME: &str = "helloStep";

pub fn step(tasklet: &PrintTasklet) -> Step<'_> {
    StepBuilder::new(STEP_NAME).tasklet(tasklet).build()
}

pub fn job<'a>(step: &'a Step<'a>) -> Job<'a> {
    JobBuilder::new().name(JOB_NAME).start(step).build()
}

#[cfg(test)]
mod tests {
    use crate::{
        core::{
            execution::BatchStatus,
            job::{JobLauncher, JobRegistry},
            parameters::JobParameters,
        },
        repository::InMemoryJobRepository,
    };

    use super::*;

    #[test]
    fn hello_job_completes_in_one_commit() {
        let repository = InMemoryJobRepository::new();
        let tasklet = PrintTasklet::default();
        let step = step(&tasklet);
        let job = job(&step);

        let mut registry = JobRegistry::new();
        registry.register(&job).unwrap();
        let launcher = JobLauncher::new(&repository, registry);

        let execution = launcher.run_job(JOB_NAME, &JobParameters::new()).unwrap();

        assert_eq!(execution.status, BatchStatus::Completed);
        let step_execution = execution.step_execution(STEP_NAME).unwrap();
        assert_eq!(step_execution.commit_count, 1);
        assert_eq!(step_execution.read_count, 0);
    }
}
