//! Engine-facing queue wrapper.
//!
//! Adapts a queue primitive to the engine: built from its declarative spec,
//! initially paused, carrying the name and default flag queue selection
//! works with.

use std::sync::Arc;

use tokio::sync::broadcast;

use cameleer_core::Job;

use crate::queue::{JobQueue, QueueEvent, QueueKind};
use crate::spec::QueueSpec;

/// One queue as the engine sees it.
pub struct CameleerQueue {
    spec: QueueSpec,
    queue: Arc<JobQueue>,
}

impl CameleerQueue {
    /// Build the primitive described by the spec; the queue starts paused.
    pub fn from_spec(spec: QueueSpec) -> Self {
        let kind = match &spec {
            QueueSpec::Parallel { parallelism, .. } => QueueKind::Parallel {
                parallelism: (*parallelism).max(1),
            },
            QueueSpec::Cost {
                capabilities,
                allow_exclusive_jobs,
                ..
            } => QueueKind::Cost {
                capabilities: *capabilities,
                allow_exclusive_jobs: *allow_exclusive_jobs,
            },
        };
        let queue = JobQueue::new(spec.name(), kind, true);
        Self { spec, queue }
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn is_default(&self) -> bool {
        self.spec.is_default()
    }

    pub fn is_cost(&self) -> bool {
        self.spec.is_cost()
    }

    /// The capabilities budget; `None` for parallel queues.
    pub fn capabilities(&self) -> Option<f64> {
        match &self.spec {
            QueueSpec::Cost { capabilities, .. } => Some(*capabilities),
            QueueSpec::Parallel { .. } => None,
        }
    }

    pub fn allow_exclusive_jobs(&self) -> bool {
        matches!(
            &self.spec,
            QueueSpec::Cost {
                allow_exclusive_jobs: true,
                ..
            }
        )
    }

    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.events()
    }

    pub fn add_job(&self, job: Arc<Job>) {
        self.queue.add_job(job);
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn is_paused(&self) -> bool {
        self.queue.is_paused()
    }

    pub fn clear_backlog(&self) -> usize {
        self.queue.clear_backlog()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    pub fn is_working(&self) -> bool {
        self.queue.is_working()
    }

    pub fn current_jobs(&self) -> Vec<Arc<Job>> {
        self.queue.current_jobs()
    }

    pub fn backlog(&self) -> Vec<Arc<Job>> {
        self.queue.backlog()
    }

    pub fn load(&self) -> f64 {
        self.queue.load()
    }

    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }
}

impl std::fmt::Debug for CameleerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameleerQueue")
            .field("spec", &self.spec)
            .finish()
    }
}
