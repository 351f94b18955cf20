//! Fae timers: natural-language timers, alarms and reminders.
//!
//! Spoken phrases become structured time specs, specs become persisted timer
//! records, and a Tokio scheduler drives each record through its lifecycle:
//! Sentence → Parser → TimeSpec → Scheduler → Store → Events
//!
//! # Architecture
//!
//! - **Parser**: ordered regex grammar table over a normalised sentence
//! - **Time math**: resolves specs against the local clock, renders spoken text
//! - **Store**: versioned JSON persistence with legacy migration and listeners
//! - **Scheduler**: one task per timer with warning and expiry phases
//! - **Host bridge**: newline-delimited JSON commands and events over stdio

pub mod config;
pub mod error;
pub mod fae_dirs;
pub mod host;
pub mod timers;

pub use config::TimersConfig;
pub use error::{Result, TimerError};
