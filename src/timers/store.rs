//! Persistent timer store.
//!
//! Holds every [`TimerRecord`] keyed by id, persists the whole map through a
//! [`StorageBackend`], and notifies registered listeners on each mutation.
//! Persisted state lives at `data_dir()/timers.json` by default.

use crate::error::{Result, TimerError};
use crate::timers::owner::OwnerResolver;
use crate::timers::types::TimerRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Schema version written by [`JsonFileBackend`].
const STORE_VERSION: u8 = 2;

/// All timers, keyed by id.
pub type TimerMap = BTreeMap<String, TimerRecord>;

/// Handle returned by [`TimerStore::add_listener`].
pub type ListenerId = u64;

/// Callback invoked with the full map after every mutation.
pub type StoreListener = Arc<dyn Fn(&TimerMap) + Send + Sync>;

/// A batch of listener calls taken out of a store running in deferred mode.
pub struct PendingNotification {
    timers: TimerMap,
    listeners: Vec<StoreListener>,
}

impl PendingNotification {
    /// Invoke every listener with the captured map.
    pub fn dispatch(self) {
        debug!("notifying {} timer listeners", self.listeners.len());
        for listener in &self.listeners {
            listener(&self.timers);
        }
    }
}

/// Where the serialised store lives.
pub trait StorageBackend: Send {
    /// Read the persisted document, `None` when nothing was ever saved.
    fn load(&self) -> Result<Option<Value>>;

    /// Replace the persisted document.
    fn persist(&self, document: &Value) -> Result<()>;
}

/// Persisted envelope.
#[derive(Debug, Serialize, Deserialize)]
struct StoreState {
    #[serde(default = "default_store_version")]
    version: u8,
    #[serde(default)]
    timers: Map<String, Value>,
}

fn default_store_version() -> u8 {
    STORE_VERSION
}

/// JSON file backend with atomic writes (temp file → fsync → rename).
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default store location: `data_dir()/timers.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        crate::fae_dirs::timers_file()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<Value>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TimerError::Storage(format!(
                    "cannot read '{}': {e}",
                    self.path.display()
                )));
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let document = serde_json::from_slice(&bytes).map_err(|e| {
            TimerError::Storage(format!("cannot parse '{}': {e}", self.path.display()))
        })?;
        Ok(Some(document))
    }

    fn persist(&self, document: &Value) -> Result<()> {
        let json = serde_json::to_string_pretty(document)?;
        write_atomic(&self.path, json.as_bytes())
    }
}

/// Write `contents` to `path` atomically (temp file → fsync → rename).
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            TimerError::Storage(format!(
                "cannot create directory '{}': {e}",
                parent.display()
            ))
        })?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = std::fs::File::create(&tmp_path).map_err(|e| {
        TimerError::Storage(format!(
            "cannot create temp file '{}': {e}",
            tmp_path.display()
        ))
    })?;
    file.write_all(contents)
        .map_err(|e| TimerError::Storage(format!("cannot write temp file: {e}")))?;
    file.sync_all()
        .map_err(|e| TimerError::Storage(format!("cannot sync temp file: {e}")))?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        TimerError::Storage(format!(
            "cannot rename '{}' to '{}': {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

/// In-memory backend; clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    document: Arc<Mutex<Option<Value>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-seeded with a persisted document.
    #[must_use]
    pub fn with_document(document: Value) -> Self {
        Self {
            document: Arc::new(Mutex::new(Some(document))),
        }
    }

    /// The last persisted document.
    #[must_use]
    pub fn document(&self) -> Option<Value> {
        self.document
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Value>> {
        Ok(self.document())
    }

    fn persist(&self, document: &Value) -> Result<()> {
        let mut guard = self
            .document
            .lock()
            .map_err(|_| TimerError::Storage("memory backend lock poisoned".to_owned()))?;
        *guard = Some(document.clone());
        Ok(())
    }
}

/// The authoritative collection of timers.
pub struct TimerStore {
    timers: TimerMap,
    backend: Box<dyn StorageBackend>,
    dirty: bool,
    listeners: Vec<(ListenerId, StoreListener)>,
    next_listener_id: ListenerId,
    next_revision: u64,
    deferred: bool,
    pending_notify: bool,
}

impl std::fmt::Debug for TimerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerStore")
            .field("timers", &self.timers.len())
            .field("dirty", &self.dirty)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl TimerStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            timers: TimerMap::new(),
            backend: Box::new(backend),
            dirty: false,
            listeners: Vec::new(),
            next_listener_id: 1,
            next_revision: 1,
            deferred: false,
            pending_notify: false,
        }
    }

    /// Store that never touches disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Read persisted timers, migrating legacy entries.
    ///
    /// A backend failure is logged and leaves the store empty. Migrated or
    /// dropped entries trigger an immediate re-save.
    pub fn load(&mut self, resolver: &dyn OwnerResolver) -> &TimerMap {
        let document = match self.backend.load() {
            Ok(Some(document)) => document,
            Ok(None) => {
                debug!("no persisted timers");
                return &self.timers;
            }
            Err(e) => {
                error!("cannot load timers: {e}");
                return &self.timers;
            }
        };

        let (entries, mut changed) = match split_envelope(document) {
            Some(split) => split,
            None => {
                warn!("persisted timers are not a JSON object; starting empty");
                (Map::new(), true)
            }
        };

        let now = chrono::Utc::now().timestamp();
        let mut timers = TimerMap::new();
        for (id, raw) in entries {
            let Value::Object(fields) = raw else {
                warn!(timer_id = %id, "dropping malformed timer entry");
                changed = true;
                continue;
            };
            let (fields, migrated) = migrate_entry(&id, fields, resolver, now);
            changed |= migrated;
            match serde_json::from_value::<TimerRecord>(Value::Object(fields)) {
                Ok(mut record) => {
                    record.id.clone_from(&id);
                    record.revision = self.bump_revision();
                    timers.insert(id, record);
                }
                Err(e) => {
                    warn!(timer_id = %id, "dropping unreadable timer entry: {e}");
                    changed = true;
                }
            }
        }

        info!("loaded {} persisted timers", timers.len());
        self.timers = timers;
        if changed {
            self.dirty = true;
            self.save();
        }
        &self.timers
    }

    /// Persist the full map if anything changed since the last save.
    ///
    /// Failures are logged; the store stays dirty so the next mutation
    /// retries.
    pub fn save(&mut self) {
        if !self.dirty {
            return;
        }
        let document = match self.to_document() {
            Ok(document) => document,
            Err(e) => {
                error!("cannot serialize timers: {e}");
                return;
            }
        };
        match self.backend.persist(&document) {
            Ok(()) => self.dirty = false,
            Err(e) => error!("cannot persist timers: {e}"),
        }
    }

    /// Record a mutation of `id`: stamp it, notify listeners, then save.
    ///
    /// Also used after a removal, in which case only the notification and
    /// save happen.
    pub fn mark_updated(&mut self, id: &str) {
        let revision = self.bump_revision();
        if let Some(record) = self.timers.get_mut(id) {
            record.updated_at = chrono::Utc::now().timestamp();
            record.revision = revision;
        }
        self.dirty = true;
        self.notify();
        self.save();
    }

    /// Insert or replace a record, then [`mark_updated`](Self::mark_updated).
    pub fn insert(&mut self, record: TimerRecord) {
        let id = record.id.clone();
        self.timers.insert(id.clone(), record);
        self.mark_updated(&id);
    }

    /// Remove `id` if present. Returns whether a record was removed.
    pub fn cancel(&mut self, id: &str) -> bool {
        let removed = self.timers.remove(id).is_some();
        if removed {
            self.mark_updated(id);
        }
        removed
    }

    /// Remove every id in `ids`, saving once. Returns the removed count.
    pub fn cancel_many<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let removed = ids
            .into_iter()
            .filter(|id| self.timers.remove(*id).is_some())
            .count();
        if removed > 0 {
            self.dirty = true;
            self.notify();
            self.save();
        }
        removed
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&TimerRecord> {
        self.timers.get(id)
    }

    /// Mutable access; callers must follow up with [`mark_updated`](Self::mark_updated).
    pub fn get_mut(&mut self, id: &str) -> Option<&mut TimerRecord> {
        self.timers.get_mut(id)
    }

    #[must_use]
    pub fn timers(&self) -> &TimerMap {
        &self.timers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Register a change listener.
    pub fn add_listener(&mut self, listener: impl Fn(&TimerMap) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Queue listener calls instead of running them inside mutations.
    ///
    /// The owner must drain them with [`take_notification`](Self::take_notification)
    /// once it no longer holds any lock around the store.
    pub fn defer_notifications(&mut self) {
        self.deferred = true;
    }

    /// Take the queued listener calls, if any mutation happened since the
    /// last call.
    pub fn take_notification(&mut self) -> Option<PendingNotification> {
        if !std::mem::take(&mut self.pending_notify) || self.listeners.is_empty() {
            return None;
        }
        Some(PendingNotification {
            timers: self.timers.clone(),
            listeners: self
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
        })
    }

    fn notify(&mut self) {
        if self.deferred {
            self.pending_notify = true;
            return;
        }
        debug!("notifying {} timer listeners", self.listeners.len());
        for (_, listener) in &self.listeners {
            listener(&self.timers);
        }
    }

    fn bump_revision(&mut self) -> u64 {
        let revision = self.next_revision;
        self.next_revision += 1;
        revision
    }

    fn to_document(&self) -> Result<Value> {
        let mut timers = Map::new();
        for (id, record) in &self.timers {
            timers.insert(id.clone(), serde_json::to_value(record)?);
        }
        Ok(serde_json::to_value(StoreState {
            version: STORE_VERSION,
            timers,
        })?)
    }
}

/// Accept the versioned envelope or a bare version-1 map.
fn split_envelope(document: Value) -> Option<(Map<String, Value>, bool)> {
    let Value::Object(object) = document else {
        return None;
    };
    if object.contains_key("version") && object.contains_key("timers") {
        let state: StoreState = serde_json::from_value(Value::Object(object)).ok()?;
        let upgraded = state.version < STORE_VERSION;
        return Some((state.timers, upgraded));
    }
    Some((object, true))
}

/// Rewrite legacy field names and owners. Returns the fields and whether
/// anything changed.
fn migrate_entry(
    id: &str,
    mut fields: Map<String, Value>,
    resolver: &dyn OwnerResolver,
    now: i64,
) -> (Map<String, Value>, bool) {
    let mut changed = false;

    for (legacy, current) in [("expires_at", "expiry"), ("extra_info", "extra")] {
        if let Some(value) = fields.remove(legacy) {
            changed = true;
            fields.entry(current).or_insert(value);
        }
    }

    if let Some(device) = fields.remove("device_id") {
        changed = true;
        if !fields.contains_key("owner") {
            let raw = match &device {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let owner = resolver.resolve_owner(&raw).unwrap_or_else(|| {
                warn!(timer_id = %id, device_id = %raw, "cannot resolve legacy device; keeping raw id");
                raw.clone()
            });
            fields.insert("owner".to_owned(), Value::String(owner));
        }
    }

    if !fields.contains_key("original_expiry")
        && let Some(expiry) = fields.get("expiry").cloned()
    {
        changed = true;
        fields.insert("original_expiry".to_owned(), expiry);
    }

    if !fields.contains_key("timer_kind") {
        changed = true;
        let kind = match fields.get("timer_type").and_then(Value::as_str) {
            Some("time" | "clock_time") => "clock_time",
            _ => "interval",
        };
        fields.remove("timer_type");
        fields.insert("timer_kind".to_owned(), Value::from(kind));
    }

    if !fields.contains_key("timer_class") {
        changed = true;
        fields.insert("timer_class".to_owned(), Value::from("timer"));
    }

    for stamp in ["created_at", "updated_at"] {
        if !fields.contains_key(stamp) {
            changed = true;
            fields.insert(stamp.to_owned(), Value::from(now));
        }
    }

    if changed {
        debug!(timer_id = %id, "migrated legacy timer entry");
    }
    (fields, changed)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::timers::owner::StaticOwnerResolver;
    use crate::timers::types::{TimerClass, TimerKind, TimerStatus};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: &str, owner: &str, expiry: i64) -> TimerRecord {
        TimerRecord {
            id: id.to_owned(),
            owner: owner.to_owned(),
            timer_class: TimerClass::Timer,
            timer_kind: TimerKind::Interval,
            name: Some("pasta".to_owned()),
            original_expiry: expiry,
            expiry,
            pre_expiry_warning: 10,
            created_at: 1_000,
            updated_at: 1_000,
            status: TimerStatus::Running,
            extra: Map::new(),
            revision: 0,
        }
    }

    fn resolver() -> StaticOwnerResolver {
        StaticOwnerResolver::new(HashMap::from([("dev-1".to_owned(), "kitchen".to_owned())]))
    }

    #[test]
    fn insert_persists_versioned_envelope() {
        let backend = MemoryBackend::new();
        let mut store = TimerStore::new(backend.clone());
        store.insert(record("a", "kitchen", 5_000));

        let document = backend.document().unwrap();
        assert_eq!(document["version"], 2);
        assert_eq!(document["timers"]["a"]["owner"], "kitchen");
        assert_eq!(document["timers"]["a"]["status"], "running");
        assert!(document["timers"]["a"].get("id").is_none());
        assert!(!store.is_dirty());
    }

    #[test]
    fn save_load_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("timers.json");

        let mut store = TimerStore::new(JsonFileBackend::new(&path));
        store.insert(record("a", "kitchen", 5_000));
        store.insert(record("b", "office", 6_000));

        let mut reloaded = TimerStore::new(JsonFileBackend::new(&path));
        let timers = reloaded.load(&resolver());
        assert_eq!(timers.len(), 2);
        assert_eq!(timers.get("a"), store.get("a"));
        assert_eq!(timers.get("b"), store.get("b"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn mark_updated_bumps_revision_and_notifies() {
        let mut store = TimerStore::in_memory();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let listener = store.add_listener(move |timers| {
            assert!(timers.contains_key("a"));
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.insert(record("a", "kitchen", 5_000));
        let first = store.get("a").unwrap().revision;
        store.mark_updated("a");
        let second = store.get("a").unwrap().revision;

        assert!(second > first);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(store.remove_listener(listener));
        assert!(!store.remove_listener(listener));
        store.mark_updated("a");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn deferred_store_queues_notifications() {
        let mut store = TimerStore::in_memory();
        store.defer_notifications();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        store.add_listener(move |timers| {
            seen.fetch_add(timers.len(), Ordering::SeqCst);
        });

        assert!(store.take_notification().is_none());
        store.insert(record("a", "kitchen", 5_000));
        store.insert(record("b", "kitchen", 6_000));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // One batch covers both mutations and sees the latest map.
        store.take_notification().unwrap().dispatch();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.take_notification().is_none());
    }

    #[test]
    fn cancel_reports_removal() {
        let backend = MemoryBackend::new();
        let mut store = TimerStore::new(backend.clone());
        store.insert(record("a", "kitchen", 5_000));

        assert!(store.cancel("a"));
        assert!(!store.cancel("a"));
        assert!(store.is_empty());
        assert_eq!(backend.document().unwrap()["timers"], json!({}));
    }

    #[test]
    fn legacy_entries_are_migrated_and_resaved() {
        let backend = MemoryBackend::with_document(json!({
            "t1": {
                "device_id": "dev-1",
                "timer_class": "alarm",
                "timer_type": "time",
                "expires_at": 7_000,
                "status": "running",
                "extra_info": {"sentence": "7 am"},
                "created_at": 1_000,
                "updated_at": 1_000
            },
            "t2": {
                "device_id": "unknown-device",
                "expires_at": 8_000
            },
            "t3": "garbage"
        }));
        let mut store = TimerStore::new(backend.clone());
        let timers = store.load(&resolver());

        assert_eq!(timers.len(), 2);
        let t1 = &timers["t1"];
        assert_eq!(t1.id, "t1");
        assert_eq!(t1.owner, "kitchen");
        assert_eq!(t1.timer_class, TimerClass::Alarm);
        assert_eq!(t1.timer_kind, TimerKind::ClockTime);
        assert_eq!(t1.expiry, 7_000);
        assert_eq!(t1.original_expiry, 7_000);
        assert_eq!(t1.extra["sentence"], "7 am");
        assert_eq!(timers["t2"].owner, "unknown-device");
        assert_eq!(timers["t2"].timer_class, TimerClass::Timer);

        let document = backend.document().unwrap();
        assert_eq!(document["version"], 2);
        assert_eq!(document["timers"]["t1"]["owner"], "kitchen");
        assert!(document["timers"]["t1"].get("device_id").is_none());
        assert!(document["timers"].get("t3").is_none());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TimerStore::new(JsonFileBackend::new(dir.path().join("absent.json")));
        assert!(store.load(&resolver()).is_empty());
        assert!(!store.is_dirty());
    }

    struct FailingBackend;

    impl StorageBackend for FailingBackend {
        fn load(&self) -> Result<Option<Value>> {
            Err(TimerError::Storage("disk on fire".to_owned()))
        }

        fn persist(&self, _document: &Value) -> Result<()> {
            Err(TimerError::Storage("disk on fire".to_owned()))
        }
    }

    #[test]
    fn storage_failures_keep_store_usable_and_dirty() {
        let mut store = TimerStore::new(FailingBackend);
        assert!(store.load(&resolver()).is_empty());

        store.insert(record("a", "kitchen", 5_000));
        assert!(store.is_dirty());
        assert_eq!(store.len(), 1);
    }
}
