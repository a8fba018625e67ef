use std::collections::BTreeMap;

use chrono::Utc;
use log::{error, info, warn};

use crate::{
    repository::{JobRepository, Transition, TransitionKind},
    BatchError,
};

use super::{
    build_name,
    execution::{BatchStatus, ExitStatus, JobExecution, StepExecution},
    parameters::{JobParameters, JobParametersIncrementer, ParameterSchema},
    step::{Step, StepContext},
};

/// Type alias for job execution results.
type JobResult<T> = Result<T, BatchError>;

/// An ordered sequence of steps with a name, an accepted parameter schema and
/// an optional incrementer.
///
/// A job is immutable once built. It is run by a [`JobLauncher`], which
/// decides from the execution history whether the launch starts a new
/// instance, restarts a failed one, or is refused.
pub struct Job<'a> {
    /// Unique name of the job within a registry
    name: String,
    /// Steps of the job, in execution order
    steps: Vec<&'a Step<'a>>,
    schema: ParameterSchema,
    incrementer: Option<Box<dyn JobParametersIncrementer + 'a>>,
    restartable: bool,
}

impl<'a> Job<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[&'a Step<'a>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    /// Whether a failed or stopped instance of this job may be run again.
    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    /// Parameters of the launch, overridden by the supplied parameters.
    ///
    /// With an incrementer, a restartable job whose last instance failed or
    /// stopped relaunches that instance; otherwise the incrementer derives a
    /// new instance from the last one.
    fn next_parameters(
        &self,
        repository: &dyn JobRepository,
        parameters: &JobParameters,
    ) -> JobResult<JobParameters> {
        let Some(incrementer) = &self.incrementer else {
            return Ok(parameters.clone());
        };

        match repository.last_job_instance(&self.name)? {
            Some((instance, previous)) if self.restartable => {
                let restart = repository.latest_execution(&instance)?.is_some_and(|execution| {
                    matches!(execution.status, BatchStatus::Failed | BatchStatus::Stopped)
                });
                if restart {
                    info!("Restarting last instance of job {}: {}", self.name, instance.job_key);
                    Ok(previous.merge(parameters))
                } else {
                    Ok(incrementer.next(Some(&previous)).merge(parameters))
                }
            }
            Some((_, previous)) => Ok(incrementer.next(Some(&previous)).merge(parameters)),
            None => Ok(incrementer.next(None).merge(parameters)),
        }
    }
}

/// Builder for creating a job.
///
/// # Example
///
/// ```
/// use chunked_batch::core::execution::StepExecution;
/// use chunked_batch::core::job::JobBuilder;
/// use chunked_batch::core::parameters::RunIdIncrementer;
/// use chunked_batch::core::step::{RepeatStatus, StepBuilder, Tasklet};
/// use chunked_batch::BatchError;
///
/// struct Noop;
///
/// impl Tasklet for Noop {
///     fn execute(&self, _step_execution: &StepExecution) -> Result<RepeatStatus, BatchError> {
///         Ok(RepeatStatus::Finished)
///     }
/// }
///
/// let tasklet = Noop;
/// let first = StepBuilder::new("first").tasklet(&tasklet).build();
/// let second = StepBuilder::new("second").tasklet(&tasklet).build();
///
/// let job = JobBuilder::new()
///     .name("cleanup")
///     .start(&first)
///     .next(&second)
///     .incrementer(RunIdIncrementer::new())
///     .build();
///
/// assert_eq!(job.step_names(), vec!["first", "second"]);
/// ```
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    steps: Vec<&'a Step<'a>>,
    schema: ParameterSchema,
    incrementer: Option<Box<dyn JobParametersIncrementer + 'a>>,
    restartable: bool,
}

impl Default for JobBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            steps: Vec::new(),
            schema: ParameterSchema::new(),
            incrementer: None,
            restartable: true,
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the first step of the job.
    pub fn start(mut self, step: &'a Step<'a>) -> Self {
        self.steps.push(step);
        self
    }

    /// Adds a step to run after the previous ones.
    pub fn next(mut self, step: &'a Step<'a>) -> Self {
        self.steps.push(step);
        self
    }

    /// Declares the parameters the job accepts.
    pub fn validator(mut self, schema: ParameterSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn incrementer(mut self, incrementer: impl JobParametersIncrementer + 'a) -> Self {
        self.incrementer = Some(Box::new(incrementer));
        self
    }

    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    pub fn build(self) -> Job<'a> {
        Job {
            name: self.name.unwrap_or_else(build_name),
            steps: self.steps,
            schema: self.schema,
            incrementer: self.incrementer,
            restartable: self.restartable,
        }
    }
}

/// Jobs available to a launcher, by name.
#[derive(Default)]
pub struct JobRegistry<'a> {
    jobs: BTreeMap<String, &'a Job<'a>>,
}

impl<'a> JobRegistry<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `job` under its name.
    ///
    /// # Errors
    /// [`BatchError::DuplicateJob`] if a job with the same name is already registered.
    pub fn register(&mut self, job: &'a Job<'a>) -> JobResult<()> {
        if self.jobs.contains_key(job.name()) {
            return Err(BatchError::DuplicateJob(job.name().to_string()));
        }
        self.jobs.insert(job.name().to_string(), job);
        Ok(())
    }

    pub fn get(&self, name: &str) -> JobResult<&'a Job<'a>> {
        self.jobs
            .get(name)
            .copied()
            .ok_or_else(|| BatchError::NoSuchJob(name.to_string()))
    }

    /// Names of the registered jobs, sorted.
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }
}

/// Runs jobs against a repository.
pub struct JobLauncher<'a> {
    repository: &'a dyn JobRepository,
    registry: JobRegistry<'a>,
}

impl<'a> JobLauncher<'a> {
    pub fn new(repository: &'a dyn JobRepository, registry: JobRegistry<'a>) -> Self {
        Self {
            repository,
            registry,
        }
    }

    pub fn registry(&self) -> &JobRegistry<'a> {
        &self.registry
    }

    /// Runs the registered job `name`.
    ///
    /// # Errors
    /// [`BatchError::NoSuchJob`] if no job is registered under `name`, plus the
    /// launch errors of [`run`](Self::run).
    pub fn run_job(&self, name: &str, parameters: &JobParameters) -> JobResult<JobExecution> {
        let job = self.registry.get(name)?;
        self.run(job, parameters)
    }

    /// Runs `job` with `parameters`.
    ///
    /// Steps whose last execution for the instance completed are skipped,
    /// unless they allow starting again. A restarted step resumes from the
    /// execution context of its previous execution. The job stops at the
    /// first step that does not complete.
    ///
    /// # Returns
    /// - `Ok(JobExecution)` once the job ran, whatever its final status
    /// - `Err(BatchError)` when the job could not be launched: invalid
    ///   parameters, a completed or running instance, a restart that is not
    ///   allowed, or a repository failure
    pub fn run(&self, job: &Job<'_>, parameters: &JobParameters) -> JobResult<JobExecution> {
        let parameters = job.next_parameters(self.repository, parameters)?;
        job.schema.validate(&parameters)?;

        let mut execution =
            self.repository
                .create_job_execution(&job.name, &parameters, job.restartable)?;

        info!(
            "Start of job: {}, id: {}, key: {}",
            job.name, execution.id, execution.instance.job_key
        );

        execution.status = BatchStatus::Started;
        execution.start_time = Some(Utc::now());
        self.repository
            .record_transition(&Transition::job(TransitionKind::JobStarted, &execution))?;

        let status = self.execute_steps(job, &mut execution);

        execution.status = status;
        execution.end_time = Some(Utc::now());
        execution.exit_status = match execution.failures.last() {
            Some(failure) if status == BatchStatus::Failed => {
                ExitStatus::from_status(status).with_description(failure.clone())
            }
            _ => ExitStatus::from_status(status),
        };
        self.repository
            .record_transition(&Transition::job(TransitionKind::JobFinished, &execution))?;

        info!(
            "End of job: {}, id: {}, status: {}",
            job.name,
            execution.id,
            execution.status.as_str()
        );

        Ok(execution)
    }

    /// Asks the running execution `execution_id` to stop at its next chunk boundary.
    pub fn stop(&self, execution_id: i64) -> JobResult<()> {
        info!("Stop requested for job execution {}", execution_id);
        self.repository.request_stop(execution_id)
    }

    /// Marks the running execution of the instance `job_name` + `parameters`
    /// as failed, together with its running steps, so that the instance can
    /// be restarted. For executions left running by a process that died.
    ///
    /// The caller must make sure no process is still running the execution.
    ///
    /// # Returns
    /// The failed execution, or `None` if the instance has no running execution.
    pub fn fail_stale_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> JobResult<Option<JobExecution>> {
        let Some(instance) = self.repository.job_instance(job_name, parameters)? else {
            return Ok(None);
        };
        let Some(mut execution) = self.repository.latest_execution(&instance)? else {
            return Ok(None);
        };
        if !execution.status.is_running() {
            return Ok(None);
        }

        warn!(
            "Failing stale execution {} of job {}, key: {}",
            execution.id, job_name, instance.job_key
        );
        let reason = "execution abandoned by its process".to_string();
        let now = Utc::now();

        for step_execution in execution
            .step_executions
            .iter_mut()
            .filter(|step_execution| step_execution.status.is_running())
        {
            step_execution.status = BatchStatus::Failed;
            step_execution.end_time = Some(now);
            step_execution.exit_status =
                ExitStatus::new(ExitStatus::FAILED).with_description(reason.clone());
            self.repository.record_transition(&Transition::step(
                TransitionKind::StepFinished,
                &instance,
                step_execution,
            ))?;
        }

        execution.status = BatchStatus::Failed;
        execution.end_time = Some(now);
        execution.failures.push(reason.clone());
        execution.exit_status = ExitStatus::new(ExitStatus::FAILED).with_description(reason);
        self.repository
            .record_transition(&Transition::job(TransitionKind::JobFinished, &execution))?;

        Ok(Some(execution))
    }

    fn execute_steps(&self, job: &Job<'_>, execution: &mut JobExecution) -> BatchStatus {
        let instance = execution.instance.clone();
        let context = StepContext {
            repository: self.repository,
            instance: &instance,
        };

        for step in &job.steps {
            let mut step_execution = match self.prepare_step(step, execution) {
                Ok(Some(step_execution)) => step_execution,
                Ok(None) => continue,
                Err(error) => return Self::fail(job, step, execution, error),
            };

            let result = step.execute(&mut step_execution, &context);
            let status = step_execution.status;
            execution.step_executions.push(step_execution);

            match result {
                Ok(()) if status == BatchStatus::Completed => {}
                Ok(()) => return status,
                Err(error) => return Self::fail(job, step, execution, error),
            }
        }

        BatchStatus::Completed
    }

    fn fail(
        job: &Job<'_>,
        step: &Step<'_>,
        execution: &mut JobExecution,
        error: BatchError,
    ) -> BatchStatus {
        error!("Job {} failed at step {}: {}", job.name, step.name(), error);
        execution.failures.push(error.to_string());
        BatchStatus::Failed
    }

    /// The step execution to run, or `None` if the step already completed for this instance.
    fn prepare_step(
        &self,
        step: &Step<'_>,
        execution: &JobExecution,
    ) -> JobResult<Option<StepExecution>> {
        let previous = self
            .repository
            .last_step_execution(&execution.instance, step.name())?;

        let mut step_execution = match previous {
            Some(previous)
                if previous.status == BatchStatus::Completed
                    && !step.allow_start_if_complete() =>
            {
                info!("Step already complete: {}", step.name());
                return Ok(None);
            }
            Some(previous) if previous.status != BatchStatus::Completed => {
                let mut step_execution = self
                    .repository
                    .create_step_execution(execution, step.name())?;
                step_execution.execution_context = previous.execution_context;
                step_execution
            }
            _ => self
                .repository
                .create_step_execution(execution, step.name())?,
        };

        step_execution.job_execution_id = execution.id;
        Ok(Some(step_execution))
    }
}
