//! Timer lifecycle scheduler.
//!
//! Owns the [`TimerStore`] and one Tokio task per active timer. Each task
//! sleeps until the warning point and then the expiry point, checking on
//! every wake that the record it was started for is still current.
//!
//! ```text
//! INACTIVE ──start──▶ RUNNING ──expire──▶ EXPIRED ──snooze──▶ SNOOZED
//!                        ▲                                        │
//!                        └────────────────start───────────────────┘
//! ```
//!
//! Cancel removes a timer from any state. Status changes are committed and
//! persisted before the matching event is emitted.

use crate::error::{Result, TimerError};
use crate::timers::owner::OwnerResolver;
use crate::timers::store::TimerStore;
use crate::timers::time_math;
use crate::timers::types::{
    TimeSpec, TimerClass, TimerEventKind, TimerRecord, TimerSnapshot, TimerStatus,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Default seconds between the warning event and expiry.
pub const DEFAULT_PRE_EXPIRY_WARNING_SECS: u64 = 10;

/// A named lifecycle event with its JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEvent {
    /// e.g. `va_timer_expired`.
    pub name: String,
    /// Serialised [`TimerSnapshot`].
    pub payload: Value,
}

/// Destination for timer lifecycle events.
pub trait TimerEventSink: Send + Sync {
    fn emit(&self, name: &str, payload: Value);
}

impl TimerEventSink for mpsc::UnboundedSender<TimerEvent> {
    fn emit(&self, name: &str, payload: Value) {
        let event = TimerEvent {
            name: name.to_owned(),
            payload,
        };
        if self.send(event).is_err() {
            debug!(event = name, "timer event receiver dropped");
        }
    }
}

impl TimerEventSink for broadcast::Sender<TimerEvent> {
    fn emit(&self, name: &str, payload: Value) {
        let event = TimerEvent {
            name: name.to_owned(),
            payload,
        };
        if self.send(event).is_err() {
            debug!(event = name, "no timer event subscribers");
        }
    }
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl TimerEventSink for NoopEventSink {
    fn emit(&self, _name: &str, _payload: Value) {}
}

/// Scheduler tunables.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Warning lead time for timers that do not set their own.
    pub pre_expiry_warning: u64,
    /// Render time labels on the 24-hour clock.
    pub use_24h: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pre_expiry_warning: DEFAULT_PRE_EXPIRY_WARNING_SECS,
            use_24h: false,
        }
    }
}

/// Request to create a timer.
#[derive(Debug, Clone)]
pub struct NewTimer {
    pub timer_class: TimerClass,
    pub spec: TimeSpec,
    /// Caller-supplied owner id, resolved through the [`OwnerResolver`].
    pub owner: String,
    pub name: Option<String>,
    /// Overrides the scheduler default when set.
    pub pre_expiry_warning: Option<u64>,
    pub extra: Map<String, Value>,
    pub autostart: bool,
}

impl NewTimer {
    pub fn new(timer_class: TimerClass, spec: TimeSpec, owner: impl Into<String>) -> Self {
        Self {
            timer_class,
            spec,
            owner: owner.into(),
            name: None,
            pre_expiry_warning: None,
            extra: Map::new(),
            autostart: true,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_pre_expiry_warning(mut self, secs: u64) -> Self {
        self.pre_expiry_warning = Some(secs);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    #[must_use]
    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }
}

/// Result of [`TimerScheduler::add_timer`].
#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Created {
        timer_id: String,
        timer: TimerSnapshot,
        /// Spoken-style expiry, e.g. `"5 minutes"` or `"Today at 3:15 PM"`.
        response: String,
    },
    /// A timer for the same owner already expires at that second.
    Duplicate { timer_id: String },
}

/// Result of [`TimerScheduler::snooze`].
#[derive(Debug, Clone, PartialEq)]
pub enum SnoozeOutcome {
    Snoozed {
        timer_id: String,
        timer: TimerSnapshot,
        /// Humanised snooze duration.
        response: String,
    },
    NotExpired,
    NotFound,
}

/// Which timers [`TimerScheduler::cancel`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelTarget {
    Id(String),
    Owner(String),
    All,
}

/// Selection for [`TimerScheduler::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerFilter {
    pub timer_id: Option<String>,
    pub owner: Option<String>,
    /// Case-insensitive name match.
    pub name: Option<String>,
    pub include_expired: bool,
    /// Order by remaining seconds, soonest first.
    pub sort: bool,
}

impl TimerFilter {
    fn matches(&self, record: &TimerRecord) -> bool {
        self.timer_id.as_deref().is_none_or(|id| record.id == id)
            && self.owner.as_deref().is_none_or(|owner| record.owner == owner)
            && self.name.as_deref().is_none_or(|name| record.name_matches(name))
            && (self.include_expired || record.status != TimerStatus::Expired)
    }
}

struct Inner {
    store: Mutex<TimerStore>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    resolver: Arc<dyn OwnerResolver>,
    sink: Arc<dyn TimerEventSink>,
    config: SchedulerConfig,
}

/// Cheaply cloneable handle to the timer engine.
#[derive(Clone)]
pub struct TimerScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerScheduler")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// What `start` decided while holding the store lock.
enum StartPlan {
    Missing,
    ExpireNow,
    Wait {
        remaining: u64,
        warning: u64,
        revision: u64,
        started: Option<TimerSnapshot>,
    },
}

impl TimerScheduler {
    pub fn new(
        store: TimerStore,
        resolver: Arc<dyn OwnerResolver>,
        sink: Arc<dyn TimerEventSink>,
    ) -> Self {
        Self::with_config(store, resolver, sink, SchedulerConfig::default())
    }

    pub fn with_config(
        store: TimerStore,
        resolver: Arc<dyn OwnerResolver>,
        sink: Arc<dyn TimerEventSink>,
        config: SchedulerConfig,
    ) -> Self {
        let mut store = store;
        store.defer_notifications();
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(store),
                tasks: Mutex::new(HashMap::new()),
                resolver,
                sink,
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Resolve an owner id through the configured resolver.
    #[must_use]
    pub fn resolve_owner(&self, id: &str) -> Option<String> {
        self.inner.resolver.resolve_owner(id)
    }

    fn store(&self) -> MutexGuard<'_, TimerStore> {
        self.inner
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run queued store listeners with the store lock released.
    fn notify_listeners(&self) {
        let pending = self.store().take_notification();
        if let Some(pending) = pending {
            pending.dispatch();
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot_of(&self, record: &TimerRecord, now: &DateTime<Local>) -> TimerSnapshot {
        time_math::snapshot(record, now, self.inner.config.use_24h)
    }

    fn emit(&self, kind: TimerEventKind, snapshot: &TimerSnapshot) {
        let name = kind.event_name(snapshot.timer_class);
        match serde_json::to_value(snapshot) {
            Ok(payload) => {
                debug!(timer_id = %snapshot.timer_id, event = %name, "emitting timer event");
                self.inner.sink.emit(&name, payload);
            }
            Err(e) => error!(timer_id = %snapshot.timer_id, "cannot serialize timer event: {e}"),
        }
    }

    /// Create a timer.
    ///
    /// # Errors
    ///
    /// [`TimerError::InvalidOwner`] when the owner does not resolve,
    /// [`TimerError::Parse`] when the spec has out-of-range fields.
    pub fn add_timer(&self, new: NewTimer) -> Result<AddOutcome> {
        let owner = self
            .inner
            .resolver
            .resolve_owner(&new.owner)
            .ok_or_else(|| TimerError::InvalidOwner(new.owner.clone()))?;

        let now = Local::now();
        let expiry = time_math::resolve_expiry(&new.spec, &now)
            .ok_or_else(|| TimerError::Parse(format!("time out of range: {:?}", new.spec)))?
            .timestamp();

        let mut extra = new.extra;
        extra.insert("spec".to_owned(), serde_json::to_value(new.spec)?);

        let timer_id = {
            let mut store = self.store();
            if let Some(existing) = store
                .timers()
                .values()
                .find(|record| record.owner == owner && record.expiry == expiry)
            {
                info!(timer_id = %existing.id, owner = %owner, "duplicate timer ignored");
                return Ok(AddOutcome::Duplicate {
                    timer_id: existing.id.clone(),
                });
            }

            let timer_id = ulid::Ulid::new().to_string();
            let now_ts = now.timestamp();
            store.insert(TimerRecord {
                id: timer_id.clone(),
                owner,
                timer_class: new.timer_class,
                timer_kind: new.spec.kind(),
                name: new.name,
                original_expiry: expiry,
                expiry,
                pre_expiry_warning: new
                    .pre_expiry_warning
                    .unwrap_or(self.inner.config.pre_expiry_warning),
                created_at: now_ts,
                updated_at: now_ts,
                status: TimerStatus::Inactive,
                extra,
                revision: 0,
            });
            timer_id
        };
        self.notify_listeners();
        info!(timer_id = %timer_id, class = %new.timer_class, "timer created");

        if new.autostart {
            self.start(&timer_id);
        }

        let timer = {
            let store = self.store();
            let record = store
                .get(&timer_id)
                .ok_or_else(|| TimerError::Storage(format!("timer {timer_id} vanished")))?;
            self.snapshot_of(record, &now)
        };
        let response = timer.expiry_breakdown.text.clone();
        Ok(AddOutcome::Created {
            timer_id,
            timer,
            response,
        })
    }

    /// Start (or restart) the wait task for `id`. Returns `false` when the
    /// timer does not exist or has already expired.
    pub fn start(&self, id: &str) -> bool {
        let now = Local::now();
        let plan = {
            let mut store = self.store();
            self.plan_start(&mut store, id, &now)
        };
        self.notify_listeners();

        match plan {
            StartPlan::Missing => false,
            StartPlan::ExpireNow => {
                self.expire(id, None);
                true
            }
            StartPlan::Wait {
                remaining,
                warning,
                revision,
                started,
            } => {
                if let Some(snapshot) = started {
                    self.emit(TimerEventKind::Started, &snapshot);
                }
                let handle = self.spawn_wait(id.to_owned(), revision, remaining, warning);
                if let Some(previous) = self.tasks().insert(id.to_owned(), handle) {
                    previous.abort();
                }
                true
            }
        }
    }

    fn plan_start(&self, store: &mut TimerStore, id: &str, now: &DateTime<Local>) -> StartPlan {
        let Some(record) = store.get(id) else {
            return StartPlan::Missing;
        };
        let remaining = record.remaining_secs(now.timestamp());
        if remaining <= 0 {
            // Already-expired records stay put until snoozed or cancelled.
            return if record.status == TimerStatus::Expired {
                StartPlan::Missing
            } else {
                StartPlan::ExpireNow
            };
        }

        let previous = record.status;
        let warning = record.pre_expiry_warning;
        if previous != TimerStatus::Running {
            if let Some(record) = store.get_mut(id) {
                record.status = TimerStatus::Running;
            }
            store.mark_updated(id);
        }

        let Some(record) = store.get(id) else {
            return StartPlan::Missing;
        };
        let started = match previous {
            TimerStatus::Running | TimerStatus::Snoozed => None,
            TimerStatus::Inactive | TimerStatus::Expired => Some(self.snapshot_of(record, now)),
        };
        if started.is_some() {
            info!(timer_id = %id, remaining, "timer started");
        }

        StartPlan::Wait {
            remaining: remaining.unsigned_abs(),
            warning,
            revision: record.revision,
            started,
        }
    }

    fn spawn_wait(&self, id: String, revision: u64, remaining: u64, warning: u64) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if warning > 0 && warning < remaining {
                tokio::time::sleep(Duration::from_secs(remaining - warning)).await;
                let Some(snapshot) = scheduler.fresh_snapshot(&id, revision) else {
                    debug!(timer_id = %id, "stale warning wake discarded");
                    return;
                };
                scheduler.emit(TimerEventKind::Warning, &snapshot);
                tokio::time::sleep(Duration::from_secs(warning)).await;
            } else {
                tokio::time::sleep(Duration::from_secs(remaining)).await;
            }
            scheduler.expire(&id, Some(revision));
        })
    }

    /// Snapshot of `id` if it still carries `revision`.
    fn fresh_snapshot(&self, id: &str, revision: u64) -> Option<TimerSnapshot> {
        let store = self.store();
        let record = store.get(id).filter(|record| record.revision == revision)?;
        Some(self.snapshot_of(record, &Local::now()))
    }

    /// Mark `id` expired and emit `expired`. With `expected_revision`, a
    /// record that changed since the wait began is left alone.
    fn expire(&self, id: &str, expected_revision: Option<u64>) -> bool {
        let snapshot = {
            let mut store = self.store();
            let fresh = store
                .get(id)
                .is_some_and(|record| expected_revision.is_none_or(|rev| record.revision == rev));
            if !fresh {
                debug!(timer_id = %id, "stale expiry wake discarded");
                return false;
            }
            if let Some(record) = store.get_mut(id) {
                record.status = TimerStatus::Expired;
            }
            store.mark_updated(id);
            match store.get(id) {
                Some(record) => self.snapshot_of(record, &Local::now()),
                None => return false,
            }
        };
        self.notify_listeners();

        // Dropping the handle detaches; the task is finishing anyway.
        self.tasks().remove(id);
        info!(timer_id = %id, "timer expired");
        self.emit(TimerEventKind::Expired, &snapshot);
        true
    }

    /// Re-arm an expired timer.
    ///
    /// # Errors
    ///
    /// [`TimerError::Parse`] when the spec has out-of-range fields.
    pub fn snooze(&self, id: &str, spec: &TimeSpec) -> Result<SnoozeOutcome> {
        let now = Local::now();
        let now_ts = now.timestamp();

        let (snapshot, expiry) = {
            let mut store = self.store();
            let Some(record) = store.get(id) else {
                return Ok(SnoozeOutcome::NotFound);
            };
            if record.status != TimerStatus::Expired {
                return Ok(SnoozeOutcome::NotExpired);
            }
            let expiry = time_math::resolve_expiry(spec, &now)
                .ok_or_else(|| TimerError::Parse(format!("time out of range: {spec:?}")))?
                .timestamp();
            let duration = serde_json::to_value(spec)?;

            if let Some(record) = store.get_mut(id) {
                record.expiry = expiry;
                record.status = TimerStatus::Snoozed;
                record.extra.insert("snooze_duration".to_owned(), duration);
                record
                    .extra
                    .insert("snoozed_at".to_owned(), Value::from(now_ts));
            }
            store.mark_updated(id);
            let Some(record) = store.get(id) else {
                return Ok(SnoozeOutcome::NotFound);
            };
            (self.snapshot_of(record, &now), expiry)
        };
        self.notify_listeners();

        info!(timer_id = %id, "timer snoozed");
        self.emit(TimerEventKind::Snoozed, &snapshot);
        self.start(id);

        let timer = {
            let store = self.store();
            store
                .get(id)
                .map_or(snapshot, |record| self.snapshot_of(record, &now))
        };
        Ok(SnoozeOutcome::Snoozed {
            timer_id: id.to_owned(),
            timer,
            response: time_math::humanize_duration(expiry - now_ts),
        })
    }

    /// Remove timers and abort their tasks. Returns whether anything was removed.
    pub fn cancel(&self, target: &CancelTarget) -> bool {
        let mut store = self.store();
        let ids: Vec<String> = store
            .timers()
            .values()
            .filter(|record| match target {
                CancelTarget::Id(id) => &record.id == id,
                CancelTarget::Owner(owner) => &record.owner == owner,
                CancelTarget::All => true,
            })
            .map(|record| record.id.clone())
            .collect();
        if ids.is_empty() {
            return false;
        }

        {
            let mut tasks = self.tasks();
            for id in &ids {
                if let Some(handle) = tasks.remove(id) {
                    handle.abort();
                }
            }
        }
        let removed = store.cancel_many(ids.iter().map(String::as_str));
        drop(store);
        self.notify_listeners();
        info!(removed, "timers cancelled");
        removed > 0
    }

    /// Snapshots of the timers selected by `filter`.
    #[must_use]
    pub fn list(&self, filter: &TimerFilter) -> Vec<TimerSnapshot> {
        let now = Local::now();
        let store = self.store();
        let mut timers: Vec<TimerSnapshot> = store
            .timers()
            .values()
            .filter(|record| filter.matches(record))
            .map(|record| self.snapshot_of(record, &now))
            .collect();
        if filter.sort {
            timers.sort_by_key(|timer| timer.expiry_breakdown.seconds_remaining);
        }
        timers
    }

    /// Snapshot of a single timer.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TimerSnapshot> {
        let store = self.store();
        store.get(id).map(|record| self.snapshot_of(record, &Local::now()))
    }

    /// Startup: load persisted timers, drop expired ones and restart the rest.
    ///
    /// Must run before any task is started; loading replaces every record.
    pub fn resume(&self) {
        let ids: Vec<String> = {
            let mut store = self.store();
            store.load(self.inner.resolver.as_ref());
            let expired: Vec<String> = store
                .timers()
                .values()
                .filter(|record| record.status == TimerStatus::Expired)
                .map(|record| record.id.clone())
                .collect();
            if !expired.is_empty() {
                let purged = store.cancel_many(expired.iter().map(String::as_str));
                info!(purged, "purged expired timers");
            }
            store.timers().keys().cloned().collect()
        };
        self.notify_listeners();

        info!("resuming {} timers", ids.len());
        for id in ids {
            self.start(&id);
        }
    }

    /// Abort every wait task, leaving records untouched.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    /// Number of live wait tasks.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tasks().len()
    }

    /// Register a store change listener.
    ///
    /// Listeners run after the store lock is released, so they may call back
    /// into the scheduler.
    pub fn add_listener(
        &self,
        listener: impl Fn(&crate::timers::store::TimerMap) + Send + Sync + 'static,
    ) -> crate::timers::store::ListenerId {
        self.store().add_listener(listener)
    }

    /// Unregister a store change listener.
    pub fn remove_listener(&self, id: crate::timers::store::ListenerId) -> bool {
        self.store().remove_listener(id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::timers::owner::StaticOwnerResolver;
    use crate::timers::store::MemoryBackend;
    use crate::timers::types::{ClockTime, Interval, Meridiem};
    use serde_json::json;
    use std::collections::HashMap;

    fn make_scheduler() -> (TimerScheduler, mpsc::UnboundedReceiver<TimerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let resolver = StaticOwnerResolver::new(HashMap::from([(
            "kitchen-satellite".to_owned(),
            "kitchen".to_owned(),
        )]));
        let scheduler = TimerScheduler::new(TimerStore::in_memory(), Arc::new(resolver), Arc::new(tx));
        (scheduler, rx)
    }

    fn created_id(outcome: AddOutcome) -> String {
        match outcome {
            AddOutcome::Created { timer_id, .. } => timer_id,
            AddOutcome::Duplicate { .. } => panic!("unexpected duplicate"),
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TimerEvent>) -> TimerEvent {
        rx.recv().await.expect("event channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn five_minute_timer_runs_full_lifecycle() {
        let (scheduler, mut rx) = make_scheduler();
        let outcome = scheduler
            .add_timer(
                NewTimer::new(TimerClass::Timer, TimeSpec::Interval(Interval::minutes(5)), "kitchen")
                    .with_name("pasta"),
            )
            .unwrap();
        let AddOutcome::Created {
            timer_id, response, ..
        } = outcome
        else {
            panic!("expected created");
        };
        assert_eq!(response, "5 minutes");

        let started = next_event(&mut rx).await;
        assert_eq!(started.name, "va_timer_started");
        assert_eq!(started.payload["timer_id"], timer_id.as_str());
        assert_eq!(started.payload["status"], "running");
        assert_eq!(started.payload["name"], "pasta");

        let warning = next_event(&mut rx).await;
        assert_eq!(warning.name, "va_timer_warning");

        let expired = next_event(&mut rx).await;
        assert_eq!(expired.name, "va_timer_expired");
        assert_eq!(expired.payload["status"], "expired");

        assert_eq!(scheduler.active_tasks(), 0);
        assert!(scheduler.list(&TimerFilter::default()).is_empty());
        let all = scheduler.list(&TimerFilter {
            include_expired: true,
            ..TimerFilter::default()
        });
        assert_eq!(all.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn command_timers_use_command_event_family() {
        let (scheduler, mut rx) = make_scheduler();
        scheduler
            .add_timer(NewTimer::new(
                TimerClass::Command,
                TimeSpec::Interval(Interval::seconds(30)),
                "kitchen",
            ))
            .unwrap();
        assert_eq!(next_event(&mut rx).await.name, "va_timer_command_started");
        assert_eq!(next_event(&mut rx).await.name, "va_timer_command_warning");
        assert_eq!(next_event(&mut rx).await.name, "va_timer_command_expired");
    }

    #[tokio::test(start_paused = true)]
    async fn short_timer_skips_warning_phase() {
        let (scheduler, mut rx) = make_scheduler();
        scheduler
            .add_timer(
                NewTimer::new(TimerClass::Timer, TimeSpec::Interval(Interval::seconds(30)), "kitchen")
                    .with_pre_expiry_warning(60),
            )
            .unwrap();
        assert_eq!(next_event(&mut rx).await.name, "va_timer_started");
        assert_eq!(next_event(&mut rx).await.name, "va_timer_expired");
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_add_yields_one_record() {
        let (scheduler, _rx) = make_scheduler();
        let spec = TimeSpec::ClockTime(ClockTime {
            hour: 11,
            minute: 30,
            meridiem: Meridiem::Pm,
            ..ClockTime::default()
        });
        let first = scheduler
            .add_timer(NewTimer::new(TimerClass::Alarm, spec, "kitchen"))
            .unwrap();
        let second = scheduler
            .add_timer(NewTimer::new(TimerClass::Alarm, spec, "kitchen-satellite"))
            .unwrap();

        let first_id = created_id(first);
        assert_eq!(second, AddOutcome::Duplicate { timer_id: first_id });
        assert_eq!(scheduler.list(&TimerFilter::default()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_owner_is_rejected() {
        let (scheduler, _rx) = make_scheduler();
        let result = scheduler.add_timer(NewTimer::new(
            TimerClass::Timer,
            TimeSpec::Interval(Interval::minutes(1)),
            "garage",
        ));
        assert!(matches!(result, Err(TimerError::InvalidOwner(owner)) if owner == "garage"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_removes_record_and_silences_task() {
        let (scheduler, mut rx) = make_scheduler();
        let id = created_id(
            scheduler
                .add_timer(NewTimer::new(
                    TimerClass::Timer,
                    TimeSpec::Interval(Interval::minutes(5)),
                    "kitchen",
                ))
                .unwrap(),
        );
        assert_eq!(next_event(&mut rx).await.name, "va_timer_started");

        assert!(scheduler.cancel(&CancelTarget::Id(id.clone())));
        assert!(!scheduler.cancel(&CancelTarget::Id(id.clone())));
        assert!(scheduler.get(&id).is_none());
        assert_eq!(scheduler.active_tasks(), 0);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_by_owner_and_all() {
        let resolver = StaticOwnerResolver::permissive();
        let scheduler =
            TimerScheduler::new(TimerStore::in_memory(), Arc::new(resolver), Arc::new(NoopEventSink));
        for (owner, minutes) in [("kitchen", 1), ("kitchen", 2), ("office", 3)] {
            scheduler
                .add_timer(NewTimer::new(
                    TimerClass::Timer,
                    TimeSpec::Interval(Interval::minutes(minutes)),
                    owner,
                ))
                .unwrap();
        }

        assert!(scheduler.cancel(&CancelTarget::Owner("kitchen".to_owned())));
        let remaining = scheduler.list(&TimerFilter::default());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].owner, "office");

        assert!(scheduler.cancel(&CancelTarget::All));
        assert!(scheduler.list(&TimerFilter::default()).is_empty());
        assert!(!scheduler.cancel(&CancelTarget::All));
    }

    #[tokio::test(start_paused = true)]
    async fn snooze_rearms_expired_timer() {
        let (scheduler, mut rx) = make_scheduler();
        let id = created_id(
            scheduler
                .add_timer(NewTimer::new(
                    TimerClass::Alarm,
                    TimeSpec::Interval(Interval::seconds(30)),
                    "kitchen",
                ))
                .unwrap(),
        );
        for expected in ["va_timer_started", "va_timer_warning", "va_timer_expired"] {
            assert_eq!(next_event(&mut rx).await.name, expected);
        }

        let before = Local::now().timestamp();
        let outcome = scheduler
            .snooze(&id, &TimeSpec::Interval(Interval::minutes(5)))
            .unwrap();
        let SnoozeOutcome::Snoozed { timer, response, .. } = outcome else {
            panic!("expected snoozed");
        };
        assert_eq!(response, "5 minutes");
        assert_eq!(timer.status, TimerStatus::Running);
        assert_eq!(timer.extra["snooze_duration"]["minutes"], 5);
        let snoozed_at = timer.extra["snoozed_at"].as_i64().unwrap();
        assert!((before..=before + 1).contains(&snoozed_at));

        let snoozed = next_event(&mut rx).await;
        assert_eq!(snoozed.name, "va_timer_snoozed");
        assert_eq!(snoozed.payload["status"], "snoozed");

        assert_eq!(next_event(&mut rx).await.name, "va_timer_warning");
        assert_eq!(next_event(&mut rx).await.name, "va_timer_expired");
    }

    #[tokio::test(start_paused = true)]
    async fn snooze_requires_expired_timer() {
        let (scheduler, _rx) = make_scheduler();
        let id = created_id(
            scheduler
                .add_timer(NewTimer::new(
                    TimerClass::Timer,
                    TimeSpec::Interval(Interval::minutes(5)),
                    "kitchen",
                ))
                .unwrap(),
        );
        let spec = TimeSpec::Interval(Interval::minutes(1));
        assert_eq!(scheduler.snooze(&id, &spec).unwrap(), SnoozeOutcome::NotExpired);
        assert_eq!(scheduler.snooze("missing", &spec).unwrap(), SnoozeOutcome::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_single_task_and_event_sequence() {
        let (scheduler, mut rx) = make_scheduler();
        let id = created_id(
            scheduler
                .add_timer(NewTimer::new(
                    TimerClass::Timer,
                    TimeSpec::Interval(Interval::minutes(5)),
                    "kitchen",
                ))
                .unwrap(),
        );
        assert_eq!(next_event(&mut rx).await.name, "va_timer_started");

        // Restarting a running timer emits nothing and keeps one task.
        assert!(scheduler.start(&id));
        assert!(scheduler.start(&id));
        assert_eq!(scheduler.active_tasks(), 1);

        assert_eq!(next_event(&mut rx).await.name, "va_timer_warning");
        assert_eq!(next_event(&mut rx).await.name, "va_timer_expired");
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_expires_overdue_timers_without_started() {
        let now = chrono::Utc::now().timestamp();
        let entry = |status: &str, expiry: i64| {
            json!({
                "owner": "kitchen",
                "timer_class": "timer",
                "timer_kind": "interval",
                "name": null,
                "original_expiry": expiry,
                "expiry": expiry,
                "pre_expiry_warning": 10,
                "created_at": now - 600,
                "updated_at": now - 600,
                "status": status,
                "extra": {}
            })
        };
        let backend = MemoryBackend::with_document(json!({
            "version": 2,
            "timers": {
                "overdue": entry("running", now - 60),
                "old": entry("expired", now - 3600),
                "future": entry("running", now + 3600)
            }
        }));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TimerScheduler::new(
            TimerStore::new(backend.clone()),
            Arc::new(StaticOwnerResolver::permissive()),
            Arc::new(tx),
        );
        scheduler.resume();

        let expired = rx.try_recv().unwrap();
        assert_eq!(expired.name, "va_timer_expired");
        assert_eq!(expired.payload["timer_id"], "overdue");
        assert!(rx.try_recv().is_err());

        let all = scheduler.list(&TimerFilter {
            include_expired: true,
            sort: true,
            ..TimerFilter::default()
        });
        let ids: Vec<&str> = all.iter().map(|t| t.timer_id.as_str()).collect();
        assert_eq!(ids, ["overdue", "future"]);
        assert_eq!(scheduler.active_tasks(), 1);

        let document = backend.document().unwrap();
        assert!(document["timers"].get("old").is_none());
        assert_eq!(document["timers"]["overdue"]["status"], "expired");
    }

    #[tokio::test(start_paused = true)]
    async fn list_filters_by_owner_and_name() {
        let scheduler = TimerScheduler::new(
            TimerStore::in_memory(),
            Arc::new(StaticOwnerResolver::permissive()),
            Arc::new(NoopEventSink),
        );
        for (owner, name, minutes) in [
            ("kitchen", "Pasta", 10),
            ("kitchen", "eggs", 3),
            ("office", "pasta", 7),
        ] {
            scheduler
                .add_timer(
                    NewTimer::new(TimerClass::Timer, TimeSpec::Interval(Interval::minutes(minutes)), owner)
                        .with_name(name),
                )
                .unwrap();
        }

        let kitchen = scheduler.list(&TimerFilter {
            owner: Some("kitchen".to_owned()),
            sort: true,
            ..TimerFilter::default()
        });
        let names: Vec<_> = kitchen.iter().filter_map(|t| t.name.as_deref()).collect();
        assert_eq!(names, ["eggs", "Pasta"]);

        let pasta = scheduler.list(&TimerFilter {
            name: Some("PASTA".to_owned()),
            ..TimerFilter::default()
        });
        assert_eq!(pasta.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn listeners_see_every_mutation() {
        let (scheduler, _rx) = make_scheduler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        scheduler.add_listener(move |timers| {
            sink.lock().unwrap().push(timers.len());
        });
        let id = created_id(
            scheduler
                .add_timer(NewTimer::new(
                    TimerClass::Timer,
                    TimeSpec::Interval(Interval::minutes(5)),
                    "kitchen",
                ))
                .unwrap(),
        );
        scheduler.cancel(&CancelTarget::Id(id));
        // insert, start, cancel
        assert_eq!(*seen.lock().unwrap(), vec![1, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_may_call_back_into_scheduler() {
        let (scheduler, mut rx) = make_scheduler();
        let listed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&listed);
        let handle = scheduler.clone();
        scheduler.add_listener(move |_| {
            let count = handle.list(&TimerFilter::default()).len();
            sink.lock().unwrap().push(count);
        });

        let id = created_id(
            scheduler
                .add_timer(NewTimer::new(
                    TimerClass::Timer,
                    TimeSpec::Interval(Interval::seconds(5)),
                    "kitchen",
                ))
                .unwrap(),
        );
        assert_eq!(next_event(&mut rx).await.name, "va_timer_started");
        assert_eq!(next_event(&mut rx).await.name, "va_timer_expired");
        assert!(scheduler.cancel(&CancelTarget::Id(id)));

        // insert, start, expire (hidden from the default listing), cancel
        assert_eq!(*listed.lock().unwrap(), vec![1, 1, 0, 0]);
    }
}
