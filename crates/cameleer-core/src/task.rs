//! The task: a declarative unit of repeating work.
//!
//! Tasks are constructed by their registry entry with everything injected:
//! configuration, logger, static context. There are no late-bound setters.

use std::sync::Arc;

use crate::config::TaskConfig;
use crate::context::TaskContext;
use crate::logging::Logger;

/// A loaded task instance.
pub struct Task {
    config: TaskConfig,
    logger: Logger,
    static_context: Option<TaskContext>,
}

impl Task {
    /// Registry root for task kinds.
    pub const BASE_TYPE: &'static str = "Task";

    /// Construct a task with its collaborators injected.
    pub fn new(config: TaskConfig, logger: Logger, static_context: Option<TaskContext>) -> Arc<Self> {
        Arc::new(Self {
            config,
            logger,
            static_context,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn type_name(&self) -> &str {
        &self.config.type_name
    }

    /// The key this task persists static context under.
    pub fn context_key(&self) -> String {
        format!("{}_{}", self.type_name(), self.name())
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn static_context(&self) -> Option<&TaskContext> {
        self.static_context.as_ref()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("type_name", &self.type_name())
            .finish()
    }
}
