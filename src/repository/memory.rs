use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use log::debug;

use crate::{
    core::{
        execution::{BatchStatus, JobExecution, JobInstance, StepExecution},
        parameters::JobParameters,
    },
    BatchError,
};

use super::{ExecutionSnapshot, JobRepository, Transition};

/// Executions of one instance, oldest first.
struct InstanceEntry {
    instance: JobInstance,
    parameters: JobParameters,
    executions: Vec<JobExecution>,
}

type InstanceKey = (String, String);

/// A [`JobRepository`] keeping everything in memory.
///
/// The instance map lock is held only to find or insert an instance entry;
/// creating executions locks that entry alone, so launches of distinct
/// instances do not wait on each other.
pub struct InMemoryJobRepository {
    instances: Mutex<HashMap<InstanceKey, Arc<Mutex<InstanceEntry>>>>,
    log: Mutex<Vec<Transition>>,
    stop_requests: Mutex<HashSet<i64>>,
    instance_ids: AtomicI64,
    job_execution_ids: AtomicI64,
    step_execution_ids: AtomicI64,
}

impl Default for InMemoryJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            stop_requests: Mutex::new(HashSet::new()),
            instance_ids: AtomicI64::new(1),
            job_execution_ids: AtomicI64::new(1),
            step_execution_ids: AtomicI64::new(1),
        }
    }

    fn lock<'m, T>(mutex: &'m Mutex<T>) -> Result<MutexGuard<'m, T>, BatchError> {
        mutex
            .lock()
            .map_err(|_| BatchError::Repository("job repository lock poisoned".to_string()))
    }

    fn entry(&self, job_name: &str, job_key: &str) -> Result<Option<Arc<Mutex<InstanceEntry>>>, BatchError> {
        let instances = Self::lock(&self.instances)?;
        Ok(instances
            .get(&(job_name.to_string(), job_key.to_string()))
            .cloned())
    }

    fn entry_or_insert(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Arc<Mutex<InstanceEntry>>, BatchError> {
        let job_key = parameters.job_key();
        let mut instances = Self::lock(&self.instances)?;
        let entry = instances
            .entry((job_name.to_string(), job_key.clone()))
            .or_insert_with(|| {
                let instance = JobInstance {
                    id: self.instance_ids.fetch_add(1, Ordering::SeqCst),
                    job_name: job_name.to_string(),
                    job_key,
                };
                debug!("Created job instance {:?}", instance);
                Arc::new(Mutex::new(InstanceEntry {
                    instance,
                    parameters: parameters.clone(),
                    executions: Vec::new(),
                }))
            });
        Ok(Arc::clone(entry))
    }

    fn apply(entry: &mut InstanceEntry, snapshot: &ExecutionSnapshot) {
        match snapshot {
            ExecutionSnapshot::Job(job_execution) => {
                if let Some(existing) = entry
                    .executions
                    .iter_mut()
                    .find(|execution| execution.id == job_execution.id)
                {
                    let step_executions = std::mem::take(&mut existing.step_executions);
                    *existing = job_execution.clone();
                    existing.step_executions = step_executions;
                }
            }
            ExecutionSnapshot::Step(step_execution) => {
                if let Some(existing) = entry
                    .executions
                    .iter_mut()
                    .find(|execution| execution.id == step_execution.job_execution_id)
                {
                    match existing
                        .step_executions
                        .iter_mut()
                        .find(|current| current.id == step_execution.id)
                    {
                        Some(current) => *current = step_execution.clone(),
                        None => existing.step_executions.push(step_execution.clone()),
                    }
                }
            }
        }
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution, BatchError> {
        let entry = self.entry_or_insert(job_name, parameters)?;
        let mut entry = Self::lock(&*entry)?;

        if let Some(last) = entry.executions.last() {
            match last.status {
                BatchStatus::Completed => {
                    return Err(BatchError::DuplicateCompletedRun {
                        job_name: job_name.to_string(),
                        job_key: entry.instance.job_key.clone(),
                    });
                }
                status if status.is_running() => {
                    return Err(BatchError::JobExecutionAlreadyRunning {
                        job_name: job_name.to_string(),
                        job_key: entry.instance.job_key.clone(),
                    });
                }
                _ if !restartable => {
                    return Err(BatchError::JobRestartNotAllowed(job_name.to_string()));
                }
                _ => {}
            }
        }

        let execution = JobExecution::new(
            self.job_execution_ids.fetch_add(1, Ordering::SeqCst),
            entry.instance.clone(),
            parameters.clone(),
        );
        entry.executions.push(execution.clone());
        Ok(execution)
    }

    fn create_step_execution(
        &self,
        job_execution: &JobExecution,
        step_name: &str,
    ) -> Result<StepExecution, BatchError> {
        let mut step_execution = StepExecution::new(step_name, job_execution.id);
        step_execution.id = self.step_execution_ids.fetch_add(1, Ordering::SeqCst);
        Ok(step_execution)
    }

    fn record_transition(&self, transition: &Transition) -> Result<(), BatchError> {
        if let Some(entry) = self.entry(&transition.instance.job_name, &transition.instance.job_key)? {
            let mut entry = Self::lock(&*entry)?;
            Self::apply(&mut entry, &transition.snapshot);
        }
        Self::lock(&self.log)?.push(transition.clone());
        Ok(())
    }

    fn latest_execution(&self, instance: &JobInstance) -> Result<Option<JobExecution>, BatchError> {
        match self.entry(&instance.job_name, &instance.job_key)? {
            Some(entry) => Ok(Self::lock(&*entry)?.executions.last().cloned()),
            None => Ok(None),
        }
    }

    fn last_step_execution(
        &self,
        instance: &JobInstance,
        step_name: &str,
    ) -> Result<Option<StepExecution>, BatchError> {
        let Some(entry) = self.entry(&instance.job_name, &instance.job_key)? else {
            return Ok(None);
        };
        let entry = Self::lock(&*entry)?;
        Ok(entry
            .executions
            .iter()
            .flat_map(|execution| execution.step_executions.iter())
            .filter(|step_execution| step_execution.step_name == step_name)
            .max_by_key(|step_execution| step_execution.id)
            .cloned())
    }

    fn last_job_instance(
        &self,
        job_name: &str,
    ) -> Result<Option<(JobInstance, JobParameters)>, BatchError> {
        let entries: Vec<Arc<Mutex<InstanceEntry>>> = Self::lock(&self.instances)?
            .iter()
            .filter(|((name, _), _)| name == job_name)
            .map(|(_, entry)| Arc::clone(entry))
            .collect();

        let mut last: Option<(JobInstance, JobParameters)> = None;
        for entry in entries {
            let entry = Self::lock(&*entry)?;
            if last
                .as_ref()
                .is_none_or(|(instance, _)| instance.id < entry.instance.id)
            {
                last = Some((entry.instance.clone(), entry.parameters.clone()));
            }
        }
        Ok(last)
    }

    fn job_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Option<JobInstance>, BatchError> {
        match self.entry(job_name, &parameters.job_key())? {
            Some(entry) => Ok(Some(Self::lock(&*entry)?.instance.clone())),
            None => Ok(None),
        }
    }

    fn transitions(&self, job_execution_id: i64) -> Result<Vec<Transition>, BatchError> {
        Ok(Self::lock(&self.log)?
            .iter()
            .filter(|transition| transition.job_execution_id == job_execution_id)
            .cloned()
            .collect())
    }

    fn request_stop(&self, job_execution_id: i64) -> Result<(), BatchError> {
        Self::lock(&self.stop_requests)?.insert(job_execution_id);
        Ok(())
    }

    fn is_stop_requested(&self, job_execution_id: i64) -> Result<bool, BatchError> {
        Ok(Self::lock(&self.stop_requests)?.contains(&job_execution_id))
    }
}
