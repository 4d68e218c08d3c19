//! Job: one concrete execution of a task's steps.
//!
//! Created on admission from a (task, resolved config, firing) triple. Steps
//! run strictly serially; the shared context map is mutated only by the
//! job's own step bodies, and `results[i]` always corresponds to step `i`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::attempt::RunAttempt;
use crate::config::ResolvedConfig;
use crate::error::JobError;
use crate::result::StepResult;
use crate::schedule::{RecoveryScheduler, ScheduleEvent};
use crate::task::Task;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// One scheduled execution of a task.
pub struct Job {
    id: u64,
    task: Arc<Task>,
    config: ResolvedConfig,
    firing: ScheduleEvent,
    recovery: Arc<dyn RecoveryScheduler>,
    context: Mutex<HashMap<String, Value>>,
    results: Mutex<Vec<StepResult>>,
    func_tasks_done: Mutex<Vec<String>>,
}

impl Job {
    /// Build a job for one firing.
    pub fn new(
        task: Arc<Task>,
        config: ResolvedConfig,
        firing: ScheduleEvent,
        recovery: Arc<dyn RecoveryScheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            task,
            config,
            firing,
            recovery,
            context: Mutex::new(HashMap::new()),
            results: Mutex::new(Vec::new()),
            func_tasks_done: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn task_name(&self) -> &str {
        self.task.name()
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn firing(&self) -> &ScheduleEvent {
        &self.firing
    }

    pub fn cost(&self) -> Option<f64> {
        self.config.cost
    }

    pub(crate) fn recovery(&self) -> &Arc<dyn RecoveryScheduler> {
        &self.recovery
    }

    /// Value from the pre-resolved bag.
    pub fn resolved(&self, key: &str) -> Option<Value> {
        self.config.resolved.get(key).cloned()
    }

    /// Read a shared-context value.
    pub fn context_get(&self, key: &str) -> Option<Value> {
        self.context.lock().expect("job context poisoned").get(key).cloned()
    }

    /// Write a shared-context value.
    pub fn context_set(&self, key: impl Into<String>, value: Value) {
        self.context
            .lock()
            .expect("job context poisoned")
            .insert(key.into(), value);
    }

    /// Snapshot of the shared context.
    pub fn context_snapshot(&self) -> HashMap<String, Value> {
        self.context.lock().expect("job context poisoned").clone()
    }

    /// Results collected so far, one per completed step, in step order.
    pub fn results(&self) -> Vec<StepResult> {
        self.results.lock().expect("job results poisoned").clone()
    }

    /// The most recent step result.
    pub fn result(&self) -> Option<StepResult> {
        self.results.lock().expect("job results poisoned").last().cloned()
    }

    /// Names of the steps that have finished, in execution order.
    pub fn func_tasks_done(&self) -> Vec<String> {
        self.func_tasks_done
            .lock()
            .expect("job step log poisoned")
            .clone()
    }

    /// Run the step pipeline to completion or first final failure.
    pub async fn run(self: &Arc<Self>) -> Result<(), JobError> {
        for (index, step) in self.config.steps.iter().enumerate() {
            let attempt = RunAttempt::new(Arc::clone(self), step.clone(), index);
            match attempt.run().await {
                Ok(result) => {
                    self.results
                        .lock()
                        .expect("job results poisoned")
                        .push(result);
                    self.func_tasks_done
                        .lock()
                        .expect("job step log poisoned")
                        .push(step.name.clone());
                }
                Err(cause) => {
                    tracing::warn!(
                        job_id = self.id,
                        task = %self.task_name(),
                        step = %step.name,
                        error = %cause,
                        "job failed at step"
                    );
                    return Err(JobError {
                        job_id: self.id,
                        task: self.task_name().to_string(),
                        step: step.name.clone(),
                        cause,
                    });
                }
            }
        }
        tracing::debug!(job_id = self.id, task = %self.task_name(), "job completed");
        Ok(())
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("task", &self.task_name())
            .finish()
    }
}
