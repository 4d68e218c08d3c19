//! The queue primitive.
//!
//! One implementation serves both admission models; the kind decides how the
//! head of the backlog is admitted. Jobs run on spawned tasks; the queue
//! tracks them, re-dispatches as slots free up, and fans out lifecycle
//! events on a broadcast stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};

use cameleer_core::{Job, JobError};

/// Capacity of a queue's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Admission model of a queue.
#[derive(Debug, Clone)]
pub enum QueueKind {
    Parallel {
        parallelism: usize,
    },
    Cost {
        capabilities: f64,
        allow_exclusive_jobs: bool,
    },
}

/// Lifecycle events of jobs on a queue. `Run`, `Done` and `Failed` are
/// mutually exclusive per job transition; `Idle` fires when the last running
/// job finishes and nothing is dispatched.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Run { job: Arc<Job> },
    Done { job: Arc<Job> },
    Failed { job: Arc<Job>, error: Arc<JobError> },
    Idle,
}

struct QueueState {
    paused: bool,
    backlog: VecDeque<Arc<Job>>,
    running: Vec<Arc<Job>>,
}

/// A job queue with one of the two admission models.
pub struct JobQueue {
    name: String,
    kind: QueueKind,
    state: Mutex<QueueState>,
    events: broadcast::Sender<QueueEvent>,
    running_count: watch::Sender<usize>,
}

impl JobQueue {
    /// Create a queue. `start_paused` holds the backlog until `resume`.
    pub fn new(name: impl Into<String>, kind: QueueKind, start_paused: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (running_count, _) = watch::channel(0);
        Arc::new(Self {
            name: name.into(),
            kind,
            state: Mutex::new(QueueState {
                paused: start_paused,
                backlog: VecDeque::new(),
                running: Vec::new(),
            }),
            events,
            running_count,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &QueueKind {
        &self.kind
    }

    /// Subscribe to this queue's lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Enqueue a job and dispatch if possible.
    pub fn add_job(self: &Arc<Self>, job: Arc<Job>) {
        {
            let mut state = self.state.lock().expect("queue state poisoned");
            state.backlog.push_back(job);
        }
        self.dispatch();
    }

    /// Resume dispatching. Idempotent.
    pub fn resume(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().expect("queue state poisoned");
            state.paused = false;
        }
        self.dispatch();
    }

    /// Stop dispatching; running jobs continue. Idempotent.
    pub fn pause(&self) {
        let mut state = self.state.lock().expect("queue state poisoned");
        state.paused = true;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().expect("queue state poisoned").paused
    }

    /// Drop every not-yet-started job. Returns how many were dropped.
    pub fn clear_backlog(&self) -> usize {
        let mut state = self.state.lock().expect("queue state poisoned");
        let dropped = state.backlog.len();
        state.backlog.clear();
        dropped
    }

    /// No job currently running.
    pub fn is_idle(&self) -> bool {
        self.state
            .lock()
            .expect("queue state poisoned")
            .running
            .is_empty()
    }

    pub fn is_working(&self) -> bool {
        !self.is_idle()
    }

    /// Snapshot of the currently running jobs.
    pub fn current_jobs(&self) -> Vec<Arc<Job>> {
        self.state
            .lock()
            .expect("queue state poisoned")
            .running
            .clone()
    }

    /// Snapshot of the backlog.
    pub fn backlog(&self) -> Vec<Arc<Job>> {
        self.state
            .lock()
            .expect("queue state poisoned")
            .backlog
            .iter()
            .cloned()
            .collect()
    }

    /// Current load: job count for parallel queues, summed cost for cost
    /// queues (backlog included in both).
    pub fn load(&self) -> f64 {
        let state = self.state.lock().expect("queue state poisoned");
        match &self.kind {
            QueueKind::Parallel { .. } => (state.running.len() + state.backlog.len()) as f64,
            QueueKind::Cost { .. } => state
                .running
                .iter()
                .chain(state.backlog.iter())
                .map(|job| job.cost().unwrap_or(0.0))
                .sum(),
        }
    }

    /// Resolve when no job is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.running_count.subscribe();
        loop {
            if *rx.borrow() == 0 {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn can_admit(&self, state: &QueueState, job: &Job) -> bool {
        match &self.kind {
            QueueKind::Parallel { parallelism } => state.running.len() < *parallelism,
            QueueKind::Cost {
                capabilities,
                allow_exclusive_jobs,
            } => {
                state.running.is_empty()
                    && (job.cost().unwrap_or(0.0) <= *capabilities || *allow_exclusive_jobs)
            }
        }
    }

    fn dispatch(self: &Arc<Self>) {
        loop {
            let job = {
                let mut state = self.state.lock().expect("queue state poisoned");
                if state.paused {
                    return;
                }
                let admissible = state
                    .backlog
                    .front()
                    .map(|job| self.can_admit(&state, job))
                    .unwrap_or(false);
                if !admissible {
                    return;
                }
                let job = state.backlog.pop_front().expect("head checked");
                state.running.push(Arc::clone(&job));
                let _ = self.running_count.send(state.running.len());
                job
            };
            self.spawn_job(job);
        }
    }

    fn spawn_job(self: &Arc<Self>, job: Arc<Job>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!(queue = %queue.name, job_id = job.id(), task = %job.task_name(), "job running");
            let _ = queue.events.send(QueueEvent::Run {
                job: Arc::clone(&job),
            });
            let outcome = job.run().await;
            queue.finish(job, outcome);
        });
    }

    fn finish(self: &Arc<Self>, job: Arc<Job>, outcome: Result<(), JobError>) {
        {
            let mut state = self.state.lock().expect("queue state poisoned");
            state.running.retain(|j| j.id() != job.id());
            let _ = self.running_count.send(state.running.len());
        }
        match outcome {
            Ok(()) => {
                tracing::debug!(queue = %self.name, job_id = job.id(), "job done");
                let _ = self.events.send(QueueEvent::Done { job });
            }
            Err(error) => {
                tracing::warn!(queue = %self.name, job_id = job.id(), error = %error, "job failed");
                let _ = self.events.send(QueueEvent::Failed {
                    job,
                    error: Arc::new(error),
                });
            }
        }
        self.dispatch();
        if self.is_idle() {
            let _ = self.events.send(QueueEvent::Idle);
        }
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}
