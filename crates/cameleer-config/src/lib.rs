//! Engine configuration.
//!
//! The YAML file configures the engine half: queues, logging, static-context
//! persistence, defaults, control endpoints. Task configurations carry
//! closures and therefore come from code, via a [`ConfigProvider`]
//! implementation supplied by the host application.

pub mod loader;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use cameleer_core::{CameleerDefaults, ErrorConfigDefaults, TaskConfig};
use cameleer_queues::QueueSpec;

pub use loader::{load_config, validate_config, ConfigError};

/// Default path of the static task context file.
pub const DEFAULT_CONTEXT_PATH: &str = "cameleer.context.json";

/// Default quiet interval before the static context is written to disk.
pub const DEFAULT_SERIALIZE_INTERVAL_MILLIS: u64 = 1_000;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_context_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONTEXT_PATH)
}

fn default_serialize_interval() -> u64 {
    DEFAULT_SERIALIZE_INTERVAL_MILLIS
}

/// One control endpoint to attach at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlSpec {
    /// Newline-delimited commands on standard input.
    Stdin,
    /// GET command endpoint.
    Http {
        #[serde(default = "ControlSpec::default_http_port")]
        port: u16,
    },
}

impl ControlSpec {
    pub fn default_http_port() -> u16 {
        8080
    }
}

/// One manager to construct at startup, by registry name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSpec {
    pub name: String,
    #[serde(default)]
    pub options: serde_yaml::Value,
}

/// Defaults applied to per-step error policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefaultsSpec {
    #[serde(default = "TaskDefaultsSpec::default_period")]
    pub schedule_period_millis: u64,
    /// Negative means unbounded.
    #[serde(default = "TaskDefaultsSpec::default_max_triggers")]
    pub schedule_max_triggers: i64,
    #[serde(default = "TaskDefaultsSpec::default_max_num_fails")]
    pub max_num_fails: u32,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub continue_on_final_fail: bool,
}

impl TaskDefaultsSpec {
    fn default_period() -> u64 {
        ErrorConfigDefaults::default().schedule_period_millis
    }

    fn default_max_triggers() -> i64 {
        ErrorConfigDefaults::default().schedule_max_triggers
    }

    fn default_max_num_fails() -> u32 {
        ErrorConfigDefaults::default().max_num_fails
    }
}

impl Default for TaskDefaultsSpec {
    fn default() -> Self {
        let defaults = ErrorConfigDefaults::default();
        Self {
            schedule_period_millis: defaults.schedule_period_millis,
            schedule_max_triggers: defaults.schedule_max_triggers,
            max_num_fails: defaults.max_num_fails,
            skip: defaults.skip,
            continue_on_final_fail: defaults.continue_on_final_fail,
        }
    }
}

impl From<&TaskDefaultsSpec> for CameleerDefaults {
    fn from(spec: &TaskDefaultsSpec) -> Self {
        Self {
            error: ErrorConfigDefaults {
                schedule_period_millis: spec.schedule_period_millis,
                schedule_max_triggers: spec.schedule_max_triggers,
                max_num_fails: spec.max_num_fails,
                skip: spec.skip,
                continue_on_final_fail: spec.continue_on_final_fail,
            },
        }
    }
}

/// The engine's full configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameleerConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub queues: Vec<QueueSpec>,
    #[serde(default = "default_context_path")]
    pub static_task_context_path: PathBuf,
    #[serde(default = "default_serialize_interval")]
    pub static_task_context_serialize_interval_millis: u64,
    /// Install process-level failure handlers while the engine runs.
    #[serde(default)]
    pub install_host_handlers: bool,
    #[serde(default)]
    pub defaults: TaskDefaultsSpec,
    #[serde(default)]
    pub controls: Vec<ControlSpec>,
    #[serde(default)]
    pub managers: Vec<ManagerSpec>,
}

impl Default for CameleerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            queues: vec![QueueSpec::parallel("main", 4).as_default()],
            static_task_context_path: default_context_path(),
            static_task_context_serialize_interval_millis: default_serialize_interval(),
            install_host_handlers: false,
            defaults: TaskDefaultsSpec::default(),
            controls: Vec::new(),
            managers: Vec::new(),
        }
    }
}

impl CameleerConfig {
    pub fn defaults(&self) -> CameleerDefaults {
        (&self.defaults).into()
    }
}

/// Source of the engine's configuration and the tasks to load.
pub trait ConfigProvider: Send + Sync {
    fn cameleer_config(&self) -> CameleerConfig;

    fn all_task_configs(&self) -> Vec<TaskConfig>;

    fn task_config(&self, name: &str) -> Option<TaskConfig> {
        self.all_task_configs()
            .into_iter()
            .find(|config| config.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_one_default_queue() {
        let config = CameleerConfig::default();
        assert_eq!(config.queues.len(), 1);
        assert!(config.queues[0].is_default());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_defaults_spec_converts_to_core_defaults() {
        let spec = TaskDefaultsSpec {
            max_num_fails: 7,
            continue_on_final_fail: true,
            ..TaskDefaultsSpec::default()
        };
        let defaults: CameleerDefaults = (&spec).into();
        assert_eq!(defaults.error.max_num_fails, 7);
        assert!(defaults.error.continue_on_final_fail);
    }
}
