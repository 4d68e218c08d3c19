//! Configuration loading and validation.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

use cameleer_queues::QueueSpec;

use crate::CameleerConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load and validate the engine configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<CameleerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: CameleerConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate an engine configuration.
pub fn validate_config(config: &CameleerConfig) -> Result<(), ConfigError> {
    if config.log_level.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "log_level must not be empty".to_string(),
        ));
    }

    if config.static_task_context_serialize_interval_millis == 0 {
        return Err(ConfigError::Invalid(
            "static_task_context_serialize_interval_millis must be > 0".to_string(),
        ));
    }

    let mut names = HashSet::new();
    let mut default_parallel = 0usize;
    let mut default_cost = 0usize;
    for spec in &config.queues {
        if spec.name().trim().is_empty() {
            return Err(ConfigError::Invalid(
                "queues[].name must not be empty".to_string(),
            ));
        }
        if !names.insert(spec.name().to_string()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate queue name '{}'",
                spec.name()
            )));
        }
        match spec {
            QueueSpec::Parallel {
                parallelism,
                is_default,
                ..
            } => {
                if *parallelism == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "queue '{}' parallelism must be > 0",
                        spec.name()
                    )));
                }
                if *is_default {
                    default_parallel += 1;
                }
            }
            QueueSpec::Cost {
                capabilities,
                is_default,
                ..
            } => {
                if !capabilities.is_finite() || *capabilities < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "queue '{}' capabilities must be a nonnegative number",
                        spec.name()
                    )));
                }
                if *is_default {
                    default_cost += 1;
                }
            }
        }
    }
    if default_parallel > 1 {
        return Err(ConfigError::Invalid(
            "at most one default parallel queue is allowed".to_string(),
        ));
    }
    if default_cost > 1 {
        return Err(ConfigError::Invalid(
            "at most one default cost queue is allowed".to_string(),
        ));
    }

    for manager in &config.managers {
        if manager.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "managers[].name must not be empty".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&CameleerConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_queue_names() {
        let mut config = CameleerConfig::default();
        config.queues = vec![QueueSpec::parallel("q", 2), QueueSpec::parallel("q", 4)];
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_two_default_queues_of_same_kind() {
        let mut config = CameleerConfig::default();
        config.queues = vec![
            QueueSpec::parallel("a", 2).as_default(),
            QueueSpec::parallel("b", 2).as_default(),
        ];
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));

        // One default per kind is fine.
        config.queues = vec![
            QueueSpec::parallel("a", 2).as_default(),
            QueueSpec::cost("c", 1.5, false).as_default(),
        ];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut config = CameleerConfig::default();
        config.queues = vec![QueueSpec::parallel("p", 0)];
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_serialize_interval() {
        let mut config = CameleerConfig::default();
        config.static_task_context_serialize_interval_millis = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_config_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "log_level: debug\nqueues:\n  - kind: parallel\n    name: main\n    parallelism: 8\n    is_default: true\n  - kind: cost\n    name: heavy\n    capabilities: 2.5"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.queues.len(), 2);
        assert_eq!(config.queues[1].name(), "heavy");
    }

    #[test]
    fn test_load_config_missing_file_is_io_error() {
        let result = load_config(Path::new("/definitely/not/here.yaml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
