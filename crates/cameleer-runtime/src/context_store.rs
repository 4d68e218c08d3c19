//! Static task context store.
//!
//! One JSON file for all tasks, keyed `ClassName_TaskName`. Loaded
//! best-effort at startup (a missing or unreadable file is an empty map, not
//! fatal). Every mutation re-arms a debounce timer; a burst of writes
//! collapses to at most one disk write after the quiet interval. On shutdown
//! the timer is cancelled and one final synchronous save is attempted.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use cameleer_core::context::{ContextMap, ContextMutation, TaskContext};

/// Capacity of the mutation fan-out channel.
const MUTATION_CHANNEL_CAPACITY: usize = 256;

pub struct StaticContextStore {
    path: PathBuf,
    entries: Arc<Mutex<ContextMap>>,
    notify: mpsc::UnboundedSender<ContextMutation>,
    mutations: broadcast::Sender<ContextMutation>,
    debouncer: Mutex<Option<JoinHandle<()>>>,
}

impl StaticContextStore {
    /// Open the store, reading the file best-effort.
    pub fn open(path: impl Into<PathBuf>, serialize_interval: Duration) -> Arc<Self> {
        let path = path.into();
        let entries = Arc::new(Mutex::new(read_entries(&path)));
        let (notify, notify_rx) = mpsc::unbounded_channel();
        let (mutations, _) = broadcast::channel(MUTATION_CHANNEL_CAPACITY);

        let store = Arc::new(Self {
            path: path.clone(),
            entries: Arc::clone(&entries),
            notify,
            mutations: mutations.clone(),
            debouncer: Mutex::new(None),
        });
        let debouncer = tokio::spawn(debounce_loop(
            notify_rx,
            entries,
            path,
            serialize_interval,
            mutations,
        ));
        *store.debouncer.lock().expect("debouncer slot poisoned") = Some(debouncer);
        store
    }

    /// The handle a task mutates its context through.
    pub fn handle_for(&self, type_name: &str, task_name: &str) -> TaskContext {
        TaskContext::new(
            format!("{}_{}", type_name, task_name),
            Arc::clone(&self.entries),
            self.notify.clone(),
        )
    }

    /// Observe every mutation going through the store.
    pub fn mutations(&self) -> broadcast::Receiver<ContextMutation> {
        self.mutations.subscribe()
    }

    /// Snapshot of the full map.
    pub fn snapshot(&self) -> ContextMap {
        self.entries.lock().expect("context map poisoned").clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cancel the debouncer and attempt one final synchronous save.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .debouncer
            .lock()
            .expect("debouncer slot poisoned")
            .take()
        {
            handle.abort();
        }
        save_entries(&self.entries, &self.path);
    }
}

impl std::fmt::Debug for StaticContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticContextStore")
            .field("path", &self.path)
            .finish()
    }
}

fn read_entries(path: &Path) -> ContextMap {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<ContextMap>(&content) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "static context unreadable, starting empty");
                ContextMap::new()
            }
        },
        Err(_) => ContextMap::new(),
    }
}

fn save_entries(entries: &Arc<Mutex<ContextMap>>, path: &Path) {
    let serialized = {
        let entries = entries.lock().expect("context map poisoned");
        serde_json::to_string_pretty(&*entries)
    };
    match serialized {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                tracing::warn!(path = %path.display(), error = %e, "static context save failed");
            } else {
                tracing::debug!(path = %path.display(), "static context saved");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "static context not serializable");
        }
    }
}

async fn debounce_loop(
    mut rx: mpsc::UnboundedReceiver<ContextMutation>,
    entries: Arc<Mutex<ContextMap>>,
    path: PathBuf,
    interval: Duration,
    mutations: broadcast::Sender<ContextMutation>,
) {
    while let Some(mutation) = rx.recv().await {
        let _ = mutations.send(mutation);
        // Each further write replaces the pending timer; the burst collapses
        // to one save after the quiet interval.
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(mutation) => {
                        let _ = mutations.send(mutation);
                    }
                    None => {
                        save_entries(&entries, &path);
                        return;
                    }
                },
                _ = tokio::time::sleep(interval) => {
                    save_entries(&entries, &path);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::sleep;

    fn temp_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("context.json")
    }

    #[tokio::test]
    async fn test_missing_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = StaticContextStore::open(temp_path(&dir), Duration::from_millis(20));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        std::fs::write(&path, "not json at all {{{").unwrap();
        let store = StaticContextStore::open(&path, Duration::from_millis(20));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_burst_of_writes_collapses_to_one_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        let store = StaticContextStore::open(&path, Duration::from_millis(80));
        let handle = store.handle_for("Task", "alpha");

        for i in 0..10 {
            handle.set("count", json!(i));
            sleep(Duration::from_millis(5)).await;
        }
        // Still inside the quiet interval: nothing on disk yet.
        assert!(!path.exists());

        sleep(Duration::from_millis(200)).await;
        let persisted: ContextMap =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(persisted["Task_alpha"]["count"], json!(9));
    }

    #[tokio::test]
    async fn test_mutations_are_observable() {
        let dir = tempfile::tempdir().unwrap();
        let store = StaticContextStore::open(temp_path(&dir), Duration::from_millis(20));
        let mut rx = store.mutations();
        let handle = store.handle_for("Task", "alpha");

        handle.set("flag", json!(true));

        let mutation = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("mutation in time")
            .unwrap();
        assert_eq!(mutation.entry, "Task_alpha");
        assert_eq!(mutation.field, "flag");
    }

    #[tokio::test]
    async fn test_shutdown_saves_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        let store = StaticContextStore::open(&path, Duration::from_secs(3600));
        let handle = store.handle_for("Task", "alpha");
        handle.set("value", json!(42));

        store.shutdown();

        let persisted: ContextMap =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(persisted["Task_alpha"]["value"], json!(42));
    }

    #[tokio::test]
    async fn test_existing_entries_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir);
        std::fs::write(
            &path,
            r#"{"Other_task": {"kept": 1}, "Task_alpha": {"old": true}}"#,
        )
        .unwrap();
        let store = StaticContextStore::open(&path, Duration::from_millis(20));
        let handle = store.handle_for("Task", "alpha");
        assert_eq!(handle.get("old"), Some(json!(true)));

        handle.set("new", json!(2));
        store.shutdown();

        let persisted: ContextMap =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(persisted["Other_task"]["kept"], json!(1));
        assert_eq!(persisted["Task_alpha"]["old"], json!(true));
        assert_eq!(persisted["Task_alpha"]["new"], json!(2));
    }
}
