//! Queue configuration records.

use serde::{Deserialize, Serialize};

/// Declarative description of one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueSpec {
    /// Admits up to `parallelism` concurrent jobs regardless of cost.
    Parallel {
        name: String,
        parallelism: usize,
        #[serde(default)]
        is_default: bool,
    },
    /// Single active worker; admits a job iff its cost fits the capabilities
    /// budget, or unconditionally when exclusive jobs are allowed and the
    /// worker is free.
    Cost {
        name: String,
        capabilities: f64,
        #[serde(default)]
        allow_exclusive_jobs: bool,
        #[serde(default)]
        is_default: bool,
    },
}

impl QueueSpec {
    pub fn parallel(name: impl Into<String>, parallelism: usize) -> Self {
        Self::Parallel {
            name: name.into(),
            parallelism,
            is_default: false,
        }
    }

    pub fn cost(name: impl Into<String>, capabilities: f64, allow_exclusive_jobs: bool) -> Self {
        Self::Cost {
            name: name.into(),
            capabilities,
            allow_exclusive_jobs,
            is_default: false,
        }
    }

    pub fn as_default(mut self) -> Self {
        match &mut self {
            Self::Parallel { is_default, .. } | Self::Cost { is_default, .. } => *is_default = true,
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Parallel { name, .. } | Self::Cost { name, .. } => name,
        }
    }

    pub fn is_default(&self) -> bool {
        match self {
            Self::Parallel { is_default, .. } | Self::Cost { is_default, .. } => *is_default,
        }
    }

    pub fn is_cost(&self) -> bool {
        matches!(self, Self::Cost { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_accessors() {
        let spec = QueueSpec::cost("heavy", 2.5, true).as_default();
        assert_eq!(spec.name(), "heavy");
        assert!(spec.is_default());
        assert!(spec.is_cost());
        assert!(!QueueSpec::parallel("p", 4).is_default());
    }

    #[test]
    fn test_spec_roundtrips_through_yaml_shape() {
        let spec = QueueSpec::parallel("main", 8).as_default();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "parallel");
        assert_eq!(json["parallelism"], 8);
        let back: QueueSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back.name(), "main");
        assert!(back.is_default());
    }
}
