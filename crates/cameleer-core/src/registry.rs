//! Name→factory registries.
//!
//! The same pattern serves tasks and the other configurable classes
//! (controls, managers): each root kind owns its own name→factory partition,
//! duplicate registration fails unless forced, and unregistering a root
//! clears its partition. Qualified names join the root and the kind with a
//! dot.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{CameleerDefaults, TaskConfig};
use crate::context::TaskContext;
use crate::logging::Logger;
use crate::task::Task;

/// Separator for qualified type names.
pub const TYPE_SEPARATOR: &str = ".";

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("type '{name}' is already registered under root '{root}'")]
    Duplicate { root: String, name: String },

    #[error("unknown type '{name}' under root '{root}'")]
    UnknownType { root: String, name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A partitioned name→factory table.
pub struct ClassRegistry<F> {
    partitions: HashMap<String, HashMap<String, F>>,
}

impl<F> ClassRegistry<F> {
    pub fn new() -> Self {
        Self {
            partitions: HashMap::new(),
        }
    }

    /// Register a factory. Fails on duplicates unless `force_override`.
    pub fn register(
        &mut self,
        root: impl Into<String>,
        name: impl Into<String>,
        factory: F,
        force_override: bool,
    ) -> Result<(), RegistryError> {
        let root = root.into();
        let name = name.into();
        let partition = self.partitions.entry(root.clone()).or_default();
        if partition.contains_key(&name) && !force_override {
            return Err(RegistryError::Duplicate { root, name });
        }
        partition.insert(name, factory);
        Ok(())
    }

    /// Look up a factory by root and name.
    pub fn resolve(&self, root: &str, name: &str) -> Option<&F> {
        self.partitions.get(root).and_then(|p| p.get(name))
    }

    /// Remove a root and every factory registered under it.
    pub fn unregister_root(&mut self, root: &str) {
        self.partitions.remove(root);
    }

    /// The qualified name a (root, name) pair registers under.
    pub fn qualified_name(root: &str, name: &str) -> String {
        format!("{}{}{}", root, TYPE_SEPARATOR, name)
    }

    /// Names registered under a root, sorted.
    pub fn names(&self, root: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .partitions
            .get(root)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl<F> Default for ClassRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a task factory receives.
pub struct TaskBuildArgs {
    pub config: TaskConfig,
    pub defaults: CameleerDefaults,
    pub logger: Logger,
    pub static_context: Option<TaskContext>,
}

type ValidateFn = Arc<dyn Fn(&TaskConfig) -> Result<(), RegistryError> + Send + Sync>;
type BuildFn = Arc<dyn Fn(TaskBuildArgs) -> Result<Arc<Task>, RegistryError> + Send + Sync>;

/// One registered task kind: its extended validation plus its constructor.
#[derive(Clone)]
pub struct TaskDescriptor {
    validate: Option<ValidateFn>,
    build: BuildFn,
}

impl TaskDescriptor {
    pub fn new<B>(build: B) -> Self
    where
        B: Fn(TaskBuildArgs) -> Result<Arc<Task>, RegistryError> + Send + Sync + 'static,
    {
        Self {
            validate: None,
            build: Arc::new(build),
        }
    }

    /// Attach a kind-specific validation run after the base validation.
    pub fn with_validate<V>(mut self, validate: V) -> Self
    where
        V: Fn(&TaskConfig) -> Result<(), RegistryError> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }

    /// The base task kind.
    pub fn base() -> Self {
        Self::new(|args| Ok(Task::new(args.config, args.logger, args.static_context)))
    }
}

/// The registry for task kinds.
pub struct TaskRegistry {
    inner: ClassRegistry<TaskDescriptor>,
}

impl TaskRegistry {
    /// A registry with the base kind pre-registered.
    pub fn with_base() -> Self {
        let mut inner = ClassRegistry::new();
        inner
            .register(Task::BASE_TYPE, Task::BASE_TYPE, TaskDescriptor::base(), false)
            .expect("fresh registry");
        Self { inner }
    }

    /// Register a task kind under its name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        descriptor: TaskDescriptor,
        force_override: bool,
    ) -> Result<(), RegistryError> {
        self.inner
            .register(Task::BASE_TYPE, name, descriptor, force_override)
    }

    /// Registered kind names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.inner.names(Task::BASE_TYPE)
    }

    /// Validate a configuration and construct the task it describes.
    ///
    /// The base record is validated first, then the kind-specific record of
    /// the configured `type`.
    pub fn instantiate(
        &self,
        config: TaskConfig,
        defaults: CameleerDefaults,
        logger: Logger,
        static_context: Option<TaskContext>,
    ) -> Result<Arc<Task>, RegistryError> {
        validate_base(&config)?;

        let descriptor =
            self.inner
                .resolve(Task::BASE_TYPE, &config.type_name)
                .ok_or_else(|| RegistryError::UnknownType {
                    root: Task::BASE_TYPE.to_string(),
                    name: config.type_name.clone(),
                })?;
        if let Some(validate) = &descriptor.validate {
            validate(&config)?;
        }

        (descriptor.build)(TaskBuildArgs {
            config,
            defaults,
            logger,
            static_context,
        })
    }
}

fn validate_base(config: &TaskConfig) -> Result<(), RegistryError> {
    if config.name.trim().is_empty() {
        return Err(RegistryError::InvalidConfig(
            "task name must not be empty".to_string(),
        ));
    }
    if config.type_name.trim().is_empty() {
        return Err(RegistryError::InvalidConfig(
            "task type must not be empty".to_string(),
        ));
    }
    Ok(())
}
