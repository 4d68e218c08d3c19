//! Manager surface.
//!
//! Managers are user-facing observers constructed with an engine handle and
//! their configuration record, and torn down on shutdown. They are resolved
//! by name from a registry partition; the logging manager is the built-in
//! reference implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cameleer_config::ManagerSpec;
use cameleer_core::{ClassRegistry, Logger, RegistryError};

use crate::engine::Cameleer;

/// Registry root for manager kinds.
pub const MANAGER_ROOT: &str = "Manager";

/// A plugged-in observer of the engine.
#[async_trait]
pub trait Manager: Send + Sync {
    fn name(&self) -> &str;

    /// Stop observing and release resources.
    async fn teardown(&self);
}

/// Constructs a manager from `(engine, config)`.
pub type ManagerFactory =
    Arc<dyn Fn(&Arc<Cameleer>, &ManagerSpec) -> Result<Arc<dyn Manager>, RegistryError> + Send + Sync>;

/// The built-in manager kinds.
pub fn builtin_managers() -> ClassRegistry<ManagerFactory> {
    let mut registry = ClassRegistry::new();
    let factory: ManagerFactory = Arc::new(|engine, spec| Ok(LogManager::spawn(engine, spec)));
    registry
        .register(MANAGER_ROOT, "log", factory, false)
        .expect("fresh registry");
    registry
}

/// Logs every work event at info level.
pub struct LogManager {
    name: String,
    listener: JoinHandle<()>,
}

impl LogManager {
    pub fn spawn(engine: &Arc<Cameleer>, spec: &ManagerSpec) -> Arc<dyn Manager> {
        let logger = engine.get_logger("LogManager");
        let mut rx = engine.work_events();
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => log_event(&logger, &event),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
        Arc::new(Self {
            name: spec.name.clone(),
            listener,
        })
    }
}

fn log_event(logger: &Logger, event: &crate::events::WorkEvent) {
    match &event.error {
        Some(error) => logger.info(format!(
            "{} task={} job={:?}: {}",
            event.kind, event.task, event.job_id, error
        )),
        None => logger.info(format!(
            "{} task={} job={:?}",
            event.kind, event.task, event.job_id
        )),
    }
}

#[async_trait]
impl Manager for LogManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn teardown(&self) {
        self.listener.abort();
    }
}
