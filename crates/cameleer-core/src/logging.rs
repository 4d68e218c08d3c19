//! Scoped logger facade.
//!
//! The engine hands every task (and itself) a logger carrying a scope tag;
//! the sink is `tracing`, so the host application controls subscribers and
//! filtering.

/// A named logging scope forwarding to `tracing` events.
#[derive(Debug, Clone)]
pub struct Logger {
    scope: String,
}

impl Logger {
    /// Create a logger for the given scope tag.
    pub fn scoped(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    /// The scope tag this logger was created with.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn trace(&self, message: impl AsRef<str>) {
        tracing::trace!(scope = %self.scope, "{}", message.as_ref());
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        tracing::debug!(scope = %self.scope, "{}", message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        tracing::info!(scope = %self.scope, "{}", message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        tracing::warn!(scope = %self.scope, "{}", message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        tracing::error!(scope = %self.scope, "{}", message.as_ref());
    }
}
