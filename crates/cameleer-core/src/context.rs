//! Per-task static context handle.
//!
//! The engine owns the backing store (one JSON file for all tasks); each task
//! gets a handle scoped to its own entry. Every `set` emits a mutation so the
//! store can debounce-serialize; step bodies never touch the underlying map
//! directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// The full persisted shape: entry key → field map.
pub type ContextMap = HashMap<String, HashMap<String, Value>>;

/// One observed write to a task's static context.
#[derive(Debug, Clone, Serialize)]
pub struct ContextMutation {
    /// The task's entry key (`ClassName_TaskName`).
    pub entry: String,
    pub field: String,
    pub value: Value,
}

/// Handle onto one task's slice of the static context store.
#[derive(Clone)]
pub struct TaskContext {
    key: String,
    entries: Arc<Mutex<ContextMap>>,
    notify: mpsc::UnboundedSender<ContextMutation>,
}

impl TaskContext {
    /// Create a handle bound to `key` within the shared map.
    pub fn new(
        key: impl Into<String>,
        entries: Arc<Mutex<ContextMap>>,
        notify: mpsc::UnboundedSender<ContextMutation>,
    ) -> Self {
        Self {
            key: key.into(),
            entries,
            notify,
        }
    }

    /// The entry key this handle is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read one field.
    pub fn get(&self, field: &str) -> Option<Value> {
        let entries = self.entries.lock().expect("context map poisoned");
        entries.get(&self.key).and_then(|m| m.get(field)).cloned()
    }

    /// Write one field and notify the store.
    pub fn set(&self, field: impl Into<String>, value: Value) {
        let field = field.into();
        {
            let mut entries = self.entries.lock().expect("context map poisoned");
            entries
                .entry(self.key.clone())
                .or_default()
                .insert(field.clone(), value.clone());
        }
        // A dropped receiver means the store is gone; the write itself stands.
        let _ = self.notify.send(ContextMutation {
            entry: self.key.clone(),
            field,
            value,
        });
    }

    /// Snapshot of this task's full entry.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let entries = self.entries.lock().expect("context map poisoned");
        entries.get(&self.key).cloned().unwrap_or_default()
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_updates_map_and_notifies() {
        let entries = Arc::new(Mutex::new(ContextMap::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::new("Task_alpha", entries.clone(), tx);

        ctx.set("count", json!(7));

        assert_eq!(ctx.get("count"), Some(json!(7)));
        let mutation = rx.try_recv().expect("mutation");
        assert_eq!(mutation.entry, "Task_alpha");
        assert_eq!(mutation.field, "count");
        assert_eq!(mutation.value, json!(7));
    }

    #[test]
    fn test_handles_share_backing_map_by_entry() {
        let entries = Arc::new(Mutex::new(ContextMap::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = TaskContext::new("Task_a", entries.clone(), tx.clone());
        let b = TaskContext::new("Task_b", entries.clone(), tx);

        a.set("x", json!(1));
        assert_eq!(b.get("x"), None);
        assert_eq!(a.snapshot().len(), 1);
    }
}
