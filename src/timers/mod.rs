//! Natural-language timers, alarms and reminders.
//!
//! - [`parser`] turns spoken phrases into a [`TimeSpec`].
//! - [`time_math`] resolves specs to instants and renders spoken-style text.
//! - [`store`] persists [`TimerRecord`]s and notifies listeners.
//! - [`scheduler`] drives each timer through its lifecycle and emits events.
//! - [`service`] exposes sentence-level operations for the host bridge.

pub mod owner;
pub mod parser;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod time_math;
pub mod types;

pub use owner::{OwnerResolver, StaticOwnerResolver};
pub use scheduler::{
    AddOutcome, CancelTarget, NewTimer, NoopEventSink, SchedulerConfig, SnoozeOutcome,
    TimerEvent, TimerEventSink, TimerFilter, TimerScheduler,
};
pub use service::{ServiceReply, TimerService};
pub use store::{JsonFileBackend, MemoryBackend, StorageBackend, TimerStore};
pub use types::{
    ClockTime, DayRef, ExpiryBreakdown, Interval, Meridiem, TimeSpec, TimerClass, TimerEventKind,
    TimerKind, TimerRecord, TimerSnapshot, TimerStatus,
};
