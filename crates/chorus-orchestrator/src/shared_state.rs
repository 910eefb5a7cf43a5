//! Shared state store for coordinated agents
//!
//! A single re-entrant lock guards the key/value map, the subscriber table and
//! the event log, so `update` closures and subscribers may call back into the
//! store from the same thread. Every mutation bumps the key's version, appends to the event log and
//! rewrites the snapshot file (temp file, then rename). Subscribers run after
//! the lock is released; their failures are recorded but never propagated.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chorus_core::fail_open::{fail_open, fail_open_catching};
use chorus_core::{AgentId, Result, StateConfig};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::protocol::{CoordinationMessage, MessageType};

const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

/// Key prefix under which each sender's published messages are stored
pub const MESSAGES_PREFIX: &str = "messages.";

/// One value in the store with its bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedStateEntry {
    pub key: String,
    pub value: Value,
    #[serde(default)]
    pub owner_agent_id: Option<AgentId>,
    #[serde(default)]
    pub readers: Vec<AgentId>,
    #[serde(default)]
    pub writers: Vec<AgentId>,
    pub updated_at: DateTime<Utc>,
    /// Starts at 1, +1 per mutation of the key
    pub version: u64,
}

/// Debug log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl StateEvent {
    fn new(event_type: &str, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            data,
        }
    }
}

/// Full export of the store; also the on-disk snapshot format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub state: IndexMap<String, SharedStateEntry>,
    #[serde(default)]
    pub event_log: Vec<StateEvent>,
}

/// Handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&SharedStateEntry) -> Result<()> + Send + Sync>;

struct Inner {
    state: IndexMap<String, SharedStateEntry>,
    subscribers: HashMap<String, Vec<(SubscriptionId, Subscriber)>>,
    event_log: VecDeque<StateEvent>,
    event_log_capacity: usize,
    next_subscription: u64,
}

impl Inner {
    fn log_event(&mut self, event_type: &str, data: Value) {
        self.event_log.push_back(StateEvent::new(event_type, data));
        while self.event_log.len() > self.event_log_capacity {
            self.event_log.pop_front();
        }
    }

    /// Create or update `key`, returning the stored entry
    fn write(&mut self, key: &str, value: Value, owner: Option<AgentId>) -> SharedStateEntry {
        let now = Utc::now();
        let old_value = self.state.get(key).map(|e| e.value.clone());

        let entry = self
            .state
            .entry(key.to_string())
            .and_modify(|e| {
                e.value = value.clone();
                e.updated_at = now;
                e.version += 1;
                if e.owner_agent_id.is_none() {
                    e.owner_agent_id = owner;
                }
            })
            .or_insert_with(|| SharedStateEntry {
                key: key.to_string(),
                value: value.clone(),
                owner_agent_id: owner,
                readers: Vec::new(),
                writers: Vec::new(),
                updated_at: now,
                version: 1,
            });
        if let Some(writer) = owner {
            if !entry.writers.contains(&writer) {
                entry.writers.push(writer);
            }
        }
        let entry = entry.clone();

        self.log_event(
            "state_set",
            json!({
                "key": key,
                "old_value": old_value,
                "new_value": value,
                "owner_agent_id": owner.map(|o| o.to_string()),
                "version": entry.version,
            }),
        );
        entry
    }

    fn callbacks_for(&self, key: &str) -> Vec<Subscriber> {
        self.subscribers
            .get(key)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state.clone(),
            event_log: self.event_log.iter().cloned().collect(),
        }
    }

    fn restore(&mut self, snapshot: StateSnapshot) {
        self.state = snapshot
            .state
            .into_iter()
            .map(|(key, mut entry)| {
                entry.key = key.clone();
                (key, entry)
            })
            .collect();
        self.event_log = snapshot.event_log.into_iter().collect();
        while self.event_log.len() > self.event_log_capacity {
            self.event_log.pop_front();
        }
    }
}

/// Thread-safe key/value store with pub/sub and optional persistence
pub struct SharedStateManager {
    /// Borrows never outlive a single method body and never span caller code
    inner: ReentrantMutex<RefCell<Inner>>,
    snapshot_path: Option<PathBuf>,
}

impl SharedStateManager {
    fn with_parts(snapshot_path: Option<PathBuf>, event_log_capacity: usize) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                state: IndexMap::new(),
                subscribers: HashMap::new(),
                event_log: VecDeque::new(),
                event_log_capacity: event_log_capacity.max(1),
                next_subscription: 0,
            })),
            snapshot_path,
        }
    }

    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self::with_parts(None, DEFAULT_EVENT_LOG_CAPACITY)
    }

    /// Store persisted at `path`, reloading an existing snapshot
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::open_with_capacity(path.into(), DEFAULT_EVENT_LOG_CAPACITY)
    }

    pub fn from_config(config: &StateConfig) -> Self {
        Self::open_with_capacity(config.snapshot_path.clone(), config.event_log_capacity)
    }

    fn open_with_capacity(path: PathBuf, event_log_capacity: usize) -> Self {
        let manager = Self::with_parts(Some(path.clone()), event_log_capacity);
        if path.exists() {
            match read_snapshot(&path) {
                Ok(snapshot) => {
                    debug!(path = %path.display(), keys = snapshot.state.len(), "Loaded state snapshot");
                    manager.with_inner_mut(|inner| inner.restore(snapshot));
                }
                Err(e) => {
                    warn!(path = %path.display(), "Failed to load state snapshot: {}", e);
                    manager.with_inner_mut(|inner| {
                        inner.log_event("load_error", json!({ "error": e.to_string() }))
                    });
                }
            }
        }
        manager
    }

    fn with_inner<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        f(&*inner)
    }

    fn with_inner_mut<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        f(&mut *inner)
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.with_inner(|inner| inner.state.get(key).map(|e| e.value.clone()))
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Read a value on behalf of `reader`, recording it in the entry's readers
    pub fn get_as(&self, key: &str, reader: AgentId) -> Option<Value> {
        self.with_inner_mut(|inner| {
            let entry = inner.state.get_mut(key)?;
            if !entry.readers.contains(&reader) {
                entry.readers.push(reader);
            }
            Some(entry.value.clone())
        })
    }

    pub fn entry(&self, key: &str) -> Option<SharedStateEntry> {
        self.with_inner(|inner| inner.state.get(key).cloned())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.with_inner(|inner| inner.state.contains_key(key))
    }

    /// Create or update `key`; returns the new version
    #[instrument(skip(self, value))]
    pub fn set(&self, key: &str, value: Value, owner: Option<AgentId>) -> u64 {
        self.commit(key, owner, None, |_| value)
    }

    /// Read-transform-write under one lock acquisition; returns the new version
    ///
    /// `f` runs with the lock held but no borrow open, so it may read or write
    /// the store itself.
    pub fn update<F>(&self, key: &str, f: F) -> u64
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        self.commit(key, None, None, f)
    }

    /// Remove `key`; returns whether it existed
    pub fn delete(&self, key: &str) -> bool {
        self.with_inner_mut(|inner| {
            if inner.state.shift_remove(key).is_none() {
                return false;
            }
            inner.log_event("state_delete", json!({ "key": key }));
            self.persist(inner);
            true
        })
    }

    /// Remove every key starting with one of `prefixes`; returns how many went
    pub fn delete_prefixed(&self, prefixes: &[&str]) -> usize {
        self.with_inner_mut(|inner| {
            let before = inner.state.len();
            inner
                .state
                .retain(|key, _| !prefixes.iter().any(|prefix| key.starts_with(prefix)));
            let removed = before - inner.state.len();
            if removed > 0 {
                inner.log_event(
                    "state_delete_prefixed",
                    json!({ "prefixes": prefixes, "removed": removed }),
                );
                self.persist(inner);
            }
            removed
        })
    }

    pub fn get_all(&self) -> IndexMap<String, Value> {
        self.with_inner(|inner| {
            inner
                .state
                .iter()
                .map(|(k, e)| (k.clone(), e.value.clone()))
                .collect()
        })
    }

    pub fn keys(&self) -> Vec<String> {
        self.with_inner(|inner| inner.state.keys().cloned().collect())
    }

    pub fn clear(&self) {
        self.with_inner_mut(|inner| {
            inner.state.clear();
            inner.log_event("state_clear", json!({}));
            self.persist(inner);
        });
    }

    /// Call `callback` after every change to `key`
    pub fn subscribe<F>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&SharedStateEntry) -> Result<()> + Send + Sync + 'static,
    {
        let callback: Subscriber = Arc::new(callback);
        self.with_inner_mut(|inner| {
            let id = SubscriptionId(inner.next_subscription);
            inner.next_subscription += 1;
            inner
                .subscribers
                .entry(key.to_string())
                .or_default()
                .push((id, callback));
            id
        })
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.with_inner_mut(|inner| {
            let mut removed = false;
            inner.subscribers.retain(|_, subs| {
                let before = subs.len();
                subs.retain(|(sub_id, _)| *sub_id != id);
                removed |= subs.len() != before;
                !subs.is_empty()
            });
            removed
        })
    }

    /// Append a message to its sender's list under `messages.{from}`
    pub fn publish_message(&self, message: &CoordinationMessage) -> Result<()> {
        let wire = serde_json::to_value(message)?;
        let key = format!("{}{}", MESSAGES_PREFIX, message.from());
        let event = json!({
            "message_id": message.id().to_string(),
            "from_agent": message.from().to_string(),
            "to_agent": message
                .to()
                .map(|to| to.to_string())
                .unwrap_or_else(|| "broadcast".to_string()),
            "message_type": message.message_type(),
        });

        self.commit(&key, None, Some(("message_published", event)), |current| {
            let mut list = match current {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            list.push(wire);
            Value::Array(list)
        });
        Ok(())
    }

    /// Messages addressed to `agent` or broadcast, oldest first
    pub fn get_messages(
        &self,
        agent: &AgentId,
        message_type: Option<MessageType>,
    ) -> Vec<CoordinationMessage> {
        let mut messages: Vec<CoordinationMessage> = self.with_inner(|inner| {
            inner
                .state
                .iter()
                .filter(|(key, _)| key.starts_with(MESSAGES_PREFIX))
                .filter_map(|(_, entry)| entry.value.as_array())
                .flatten()
                .filter_map(|raw| match serde_json::from_value::<CoordinationMessage>(raw.clone()) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        debug!("Skipping malformed stored message: {}", e);
                        None
                    }
                })
                .filter(|msg| msg.is_for(agent))
                .filter(|msg| message_type.map_or(true, |t| msg.message_type() == t))
                .collect()
        });

        messages.sort_by_key(|m| m.timestamp());
        messages
    }

    /// Most recent events, oldest first
    pub fn event_log(&self, limit: Option<usize>) -> Vec<StateEvent> {
        self.with_inner(|inner| {
            let skip = limit.map_or(0, |n| inner.event_log.len().saturating_sub(n));
            inner.event_log.iter().skip(skip).cloned().collect()
        })
    }

    pub fn export_state(&self) -> StateSnapshot {
        self.with_inner(Inner::snapshot)
    }

    /// Replace the whole store with `snapshot` and persist it
    pub fn import_state(&self, snapshot: StateSnapshot) {
        self.with_inner_mut(|inner| {
            inner.restore(snapshot);
            self.persist(inner);
        });
    }

    fn commit<F>(&self, key: &str, owner: Option<AgentId>, event: Option<(&str, Value)>, f: F) -> u64
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let (entry, callbacks) = {
            let _guard = self.inner.lock();
            let current = self.get(key);
            let value = f(current.as_ref());
            self.with_inner_mut(|inner| {
                let entry = inner.write(key, value, owner);
                if let Some((event_type, data)) = event {
                    inner.log_event(event_type, data);
                }
                self.persist(inner);
                (entry, inner.callbacks_for(key))
            })
        };

        self.notify(&entry, callbacks);
        entry.version
    }

    fn notify(&self, entry: &SharedStateEntry, callbacks: Vec<Subscriber>) {
        let failures: Vec<String> = callbacks
            .iter()
            .filter_map(|cb| fail_open_catching("state subscriber", || cb(entry)).err())
            .collect();
        if failures.is_empty() {
            return;
        }

        self.with_inner_mut(|inner| {
            for error in failures {
                inner.log_event("subscriber_error", json!({ "key": entry.key, "error": error }));
            }
        });
    }

    fn persist(&self, inner: &mut Inner) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let snapshot = inner.snapshot();
        if let Err(error) = fail_open("persist state snapshot", || write_snapshot(path, &snapshot)) {
            inner.log_event("persist_error", json!({ "error": error }));
        }
    }
}

impl Default for SharedStateManager {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for SharedStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (keys, events) = self.with_inner(|inner| (inner.state.len(), inner.event_log.len()));
        f.debug_struct("SharedStateManager")
            .field("snapshot_path", &self.snapshot_path)
            .field("keys", &keys)
            .field("events", &events)
            .finish()
    }
}

fn read_snapshot(path: &Path) -> Result<StateSnapshot> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write the snapshot next to `path`, then rename it into place
fn write_snapshot(path: &Path, snapshot: &StateSnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CoordinationProtocol;
    use chorus_core::ChorusError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_set_and_get() {
        let store = SharedStateManager::in_memory();
        assert_eq!(store.get("config.timeout"), None);
        assert_eq!(store.get_or("config.timeout", json!(0)), json!(0));

        assert_eq!(store.set("config.timeout", json!(30), None), 1);
        assert_eq!(store.get("config.timeout"), Some(json!(30)));
    }

    #[test]
    fn test_version_increments_per_write() {
        let store = SharedStateManager::in_memory();
        let owner = Uuid::new_v4();
        for i in 1..=5u64 {
            assert_eq!(store.set("counter", json!(i), Some(owner)), i);
        }
        let entry = store.entry("counter").unwrap();
        assert_eq!(entry.version, 5);
        assert_eq!(entry.value, json!(5));
        assert_eq!(entry.owner_agent_id, Some(owner));
        assert_eq!(entry.writers, vec![owner]);
    }

    #[test]
    fn test_update_is_read_transform_write() {
        let store = SharedStateManager::in_memory();
        store.set("counter", json!(0), None);
        let version = store.update("counter", |v| json!(v.and_then(Value::as_i64).unwrap_or(0) + 1));
        assert_eq!(version, 2);
        assert_eq!(store.get("counter"), Some(json!(1)));

        store.update("fresh", |v| {
            assert!(v.is_none());
            json!("created")
        });
        assert_eq!(store.get("fresh"), Some(json!("created")));
    }

    #[test]
    fn test_update_closure_may_use_the_store() {
        let store = SharedStateManager::in_memory();
        store.set("a", json!(41), None);

        let version = store.update("b", |_| {
            let a = store.get_or("a", json!(0));
            json!(a.as_i64().unwrap_or(0) + 1)
        });
        assert_eq!(version, 1);
        assert_eq!(store.get("b"), Some(json!(42)));

        store.update("c", |_| {
            store.set("audit", json!("touched"), None);
            json!(store.contains("audit"))
        });
        assert_eq!(store.get("c"), Some(json!(true)));
        assert_eq!(store.get("audit"), Some(json!("touched")));
    }

    #[test]
    fn test_update_from_another_thread_with_reads() {
        let store = Arc::new(SharedStateManager::in_memory());
        store.set("a", json!(7), None);

        let worker = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            worker.update("b", |_| worker.get_or("a", json!(0)))
        });
        assert_eq!(handle.join().unwrap(), 1);
        assert_eq!(store.get("b"), Some(json!(7)));
    }

    #[test]
    fn test_subscriber_may_read_the_store() {
        let store = Arc::new(SharedStateManager::in_memory());
        let seen = Arc::new(Mutex::new(None));
        let (reader, sink) = (Arc::downgrade(&store), Arc::clone(&seen));
        store.subscribe("status", move |_| {
            if let Some(store) = reader.upgrade() {
                *sink.lock() = store.get("status");
            }
            Ok(())
        });

        store.set("status", json!("done"), None);
        assert_eq!(*seen.lock(), Some(json!("done")));
    }

    #[test]
    fn test_delete_prefixed() {
        let store = SharedStateManager::in_memory();
        store.set("phase.fetch.output", json!({}), None);
        store.set("agent.x.status", json!("completed"), None);
        store.set("messages.x", json!([]), None);
        store.set("config.timeout", json!(30), None);

        assert_eq!(store.delete_prefixed(&["phase.", "agent.", MESSAGES_PREFIX]), 3);
        assert_eq!(store.keys(), vec!["config.timeout".to_string()]);
        assert_eq!(store.delete_prefixed(&["phase."]), 0);
        assert_eq!(
            store.event_log(Some(1))[0].event_type,
            "state_delete_prefixed"
        );
    }

    #[test]
    fn test_get_as_records_reader() {
        let store = SharedStateManager::in_memory();
        let reader = Uuid::new_v4();
        store.set("phase.fetch.output", json!({"rows": 3}), None);
        assert_eq!(store.get_as("phase.fetch.output", reader), Some(json!({"rows": 3})));
        assert_eq!(store.get_as("phase.fetch.output", reader), Some(json!({"rows": 3})));
        assert_eq!(store.entry("phase.fetch.output").unwrap().readers, vec![reader]);
        assert_eq!(store.get_as("missing", reader), None);
    }

    #[test]
    fn test_delete_and_clear() {
        let store = SharedStateManager::in_memory();
        store.set("a", json!(1), None);
        store.set("b", json!(2), None);

        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert_eq!(store.get_all().len(), 1);

        store.clear();
        assert!(store.get_all().is_empty());

        let kinds: Vec<String> = store.event_log(None).into_iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec!["state_set", "state_set", "state_delete", "state_clear"]);
    }

    #[test]
    fn test_subscribers_notified() {
        let store = SharedStateManager::in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = store.subscribe("status", move |entry| {
            sink.lock().push(entry.value.clone());
            Ok(())
        });

        store.set("status", json!("running"), None);
        store.set("other", json!("ignored"), None);
        assert_eq!(*seen.lock(), vec![json!("running")]);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.set("status", json!("done"), None);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_subscriber_failures_are_contained() {
        let store = SharedStateManager::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        store.subscribe("k", |_| Err(ChorusError::Other("nope".to_string())));
        store.subscribe("k", |_| panic!("subscriber blew up"));
        store.subscribe("k", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(store.set("k", json!(1), None), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("k"), Some(json!(1)));

        let errors: Vec<StateEvent> = store
            .event_log(None)
            .into_iter()
            .filter(|e| e.event_type == "subscriber_error")
            .collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].data["error"], json!("subscriber blew up"));
    }

    #[test]
    fn test_event_log_capacity() {
        let temp = TempDir::new().unwrap();
        let config = StateConfig {
            snapshot_path: temp.path().join("state.json"),
            event_log_capacity: 3,
        };
        let store = SharedStateManager::from_config(&config);
        for i in 0..5 {
            store.set(&format!("k{}", i), json!(i), None);
        }
        let log = store.event_log(None);
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].data["key"], json!("k2"));
        assert_eq!(store.event_log(Some(1))[0].data["key"], json!("k4"));
    }

    #[test]
    fn test_export_import_round_trip() {
        let source = SharedStateManager::in_memory();
        let owner = Uuid::new_v4();
        source.set("a", json!({"nested": [1, 2]}), Some(owner));
        source.set("a", json!("second"), Some(owner));
        source.set("b", json!(true), None);

        let snapshot = source.export_state();
        let target = SharedStateManager::in_memory();
        target.import_state(snapshot.clone());

        assert_eq!(target.get_all(), source.get_all());
        assert_eq!(target.entry("a").unwrap().version, 2);
        assert_eq!(target.export_state(), snapshot);
    }

    #[test]
    fn test_snapshot_persists_and_reloads() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(".agent_state.json");

        {
            let store = SharedStateManager::open(&path);
            store.set("phase.fetch.status", json!("completed"), None);
            store.set("phase.fetch.status", json!("completed"), None);
        }
        assert!(path.exists());
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        assert!(!PathBuf::from(tmp).exists());

        let reopened = SharedStateManager::open(&path);
        assert_eq!(reopened.get("phase.fetch.status"), Some(json!("completed")));
        assert_eq!(reopened.entry("phase.fetch.status").unwrap().version, 2);
    }

    #[test]
    fn test_corrupt_snapshot_starts_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SharedStateManager::open(&path);
        assert!(store.get_all().is_empty());
        let log = store.event_log(None);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_type, "load_error");
    }

    #[test]
    fn test_persist_failure_is_fail_open() {
        let temp = TempDir::new().unwrap();
        // A directory where the snapshot file should be
        let path = temp.path().join("blocked");
        std::fs::create_dir_all(path.join("inner")).unwrap();

        let store = SharedStateManager::open(&path);
        assert_eq!(store.set("k", json!(1), None), 1);
        assert_eq!(store.get("k"), Some(json!(1)));
        assert!(store
            .event_log(None)
            .iter()
            .any(|e| e.event_type == "persist_error"));
    }

    #[test]
    fn test_publish_and_get_messages() {
        let store = SharedStateManager::in_memory();
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();

        let started = CoordinationProtocol::phase_started(sender, "fetch", Some(0), Some(1)).unwrap();
        let completed =
            CoordinationProtocol::phase_completed(sender, "fetch", true, None, Some(0.5)).unwrap();
        store.publish_message(&started).unwrap();
        store.publish_message(&completed).unwrap();

        let all = store.get_messages(&receiver, None);
        assert_eq!(all, vec![started.clone(), completed.clone()]);

        let only_completed = store.get_messages(&receiver, Some(MessageType::PhaseCompleted));
        assert_eq!(only_completed, vec![completed]);

        let key = format!("messages.{}", sender);
        assert_eq!(store.entry(&key).unwrap().version, 2);
        assert!(store
            .event_log(None)
            .iter()
            .any(|e| e.event_type == "message_published"));
    }

    #[test]
    fn test_directed_messages_filtered() {
        let store = SharedStateManager::in_memory();
        let sender = Uuid::new_v4();
        let target = Uuid::new_v4();
        let bystander = Uuid::new_v4();

        let payload = match json!({
            "agent_id": sender.to_string(),
            "data_key": "phase.fetch.output",
            "timestamp": Utc::now().to_rfc3339(),
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let direct = CoordinationProtocol::create_message(
            MessageType::DataAvailable,
            sender,
            payload,
            Some(target),
        )
        .unwrap();
        store.publish_message(&direct).unwrap();

        assert_eq!(store.get_messages(&target, None).len(), 1);
        assert!(store.get_messages(&bystander, None).is_empty());
    }
}
