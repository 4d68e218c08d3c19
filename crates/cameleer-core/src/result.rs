//! Step result carrier.
//!
//! A step that finishes its pipeline position always produces exactly one
//! `StepResult`: a success value, or the raised payload when the step's error
//! policy let the job continue (skip / continue-on-final-fail).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Thrown;

/// Value-or-wrapped-error produced by one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    value: Value,
    error: bool,
}

impl StepResult {
    /// A successful step result.
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            error: false,
        }
    }

    /// A step result carrying the raised payload.
    pub fn err(cause: Thrown) -> Self {
        Self {
            value: cause.0,
            error: true,
        }
    }

    /// The carried value. For error results this is the raised payload.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether this result came from the skip or continue-on-final-fail path.
    pub fn is_error(&self) -> bool {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_result_carries_value() {
        let result = StepResult::ok(json!(42));
        assert_eq!(result.value(), &json!(42));
        assert!(!result.is_error());
    }

    #[test]
    fn test_err_result_preserves_raised_payload() {
        let result = StepResult::err(Thrown(json!("42")));
        assert_eq!(result.value(), &json!("42"));
        assert!(result.is_error());
    }
}
