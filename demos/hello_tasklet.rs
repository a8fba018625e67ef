use anyhow::Result;
use chunked_batch::{
    core::{
        job::{JobLauncher, JobRegistry},
        parameters::JobParameters,
    },
    jobs::hello,
    repository::InMemoryJobRepository,
    tasklet::print::PrintTasklet,
};

fn main() -> Result<()> {
    env_logger::init();

    let repository = InMemoryJobRepository::new();

    let tasklet = PrintTasklet::default();
    let step = hello::step(&tasklet);
    let job = hello::job(&step);

    let mut registry = JobRegistry::new();
    registry.register(&job)?;
    let launcher = JobLauncher::new(&repository, registry);

    let execution = launcher.run_job(hello::JOB_NAME, &JobParameters::new())?;
    println!("{} ended {}", hello::JOB_NAME, execution.status.as_str());

    Ok(())
}
