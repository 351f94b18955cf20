//! Sentence-level timer operations.
//!
//! Wraps [`TimerScheduler`] with the request/reply shapes used by the host
//! bridge: sentences are parsed here, owners fall back to a configured
//! default, and soft failures become replies with an `error` string rather
//! than errors.

use crate::error::{Result, TimerError};
use crate::timers::parser;
use crate::timers::scheduler::{
    AddOutcome, CancelTarget, NewTimer, SnoozeOutcome, TimerFilter, TimerScheduler,
};
use crate::timers::types::{TimeSpec, TimerClass, TimerSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

/// Reply text for a sentence no grammar understood.
pub const UNPARSEABLE_TIME: &str = "couldn't understand the time";
/// Reply text for an owner that does not resolve.
pub const INVALID_DEVICE: &str = "invalid device";
/// Reply text for a duplicate timer.
pub const ALREADY_EXISTS: &str = "already exists";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetTimerRequest {
    pub timer_class: TimerClass,
    /// Device or owner id; the configured default is used when absent.
    pub owner: Option<String>,
    pub name: Option<String>,
    pub sentence: String,
    pub pre_expiry_warning: Option<u64>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozeRequest {
    pub timer_id: String,
    pub sentence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CancelRequest {
    pub timer_id: Option<String>,
    pub owner: Option<String>,
    pub remove_all: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTimersRequest {
    pub timer_id: Option<String>,
    pub owner: Option<String>,
    pub name: Option<String>,
    pub include_expired: bool,
}

/// JSON reply for every service call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timers: Option<Vec<TimerSnapshot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceReply {
    fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    fn response(message: impl Into<String>) -> Self {
        Self {
            response: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Service facade over a [`TimerScheduler`].
#[derive(Debug, Clone)]
pub struct TimerService {
    scheduler: TimerScheduler,
    default_owner: Option<String>,
}

impl TimerService {
    pub fn new(scheduler: TimerScheduler, default_owner: Option<String>) -> Self {
        Self {
            scheduler,
            default_owner,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &TimerScheduler {
        &self.scheduler
    }

    fn owner_or_default<'a>(&'a self, owner: Option<&'a str>) -> Option<&'a str> {
        owner
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .or(self.default_owner.as_deref())
    }

    /// Resolve an optional owner filter. `Err` carries the rejection reply.
    fn resolve_filter_owner(&self, owner: Option<&str>) -> std::result::Result<Option<String>, ServiceReply> {
        match owner.map(str::trim).filter(|owner| !owner.is_empty()) {
            None => Ok(None),
            Some(raw) => self
                .scheduler
                .resolve_owner(raw)
                .map(Some)
                .ok_or_else(|| ServiceReply::error(INVALID_DEVICE)),
        }
    }

    /// Parse a sentence and create a timer.
    ///
    /// # Errors
    ///
    /// Only unexpected failures (serialisation) are errors; parse, owner and
    /// duplicate rejections are replies.
    pub fn set_timer(&self, request: SetTimerRequest) -> Result<ServiceReply> {
        let (normalized, spec) = parser::parse(&request.sentence);
        let Some(spec) = spec else {
            debug!(sentence = %normalized, "cannot set timer: unparseable time");
            return Ok(ServiceReply::error(UNPARSEABLE_TIME));
        };
        let Some(owner) = self.owner_or_default(request.owner.as_deref()) else {
            return Ok(ServiceReply::error(INVALID_DEVICE));
        };

        let mut extra = request.extra;
        extra.insert("sentence".to_owned(), Value::String(request.sentence.clone()));

        let mut new = NewTimer::new(request.timer_class, spec, owner).with_extra(extra);
        if let Some(name) = request.name.filter(|name| !name.trim().is_empty()) {
            new = new.with_name(name);
        }
        if let Some(secs) = request.pre_expiry_warning {
            new = new.with_pre_expiry_warning(secs);
        }

        match self.scheduler.add_timer(new) {
            Ok(AddOutcome::Created {
                timer_id,
                timer,
                response,
            }) => Ok(ServiceReply {
                timer_id: Some(timer_id),
                timer: Some(timer),
                response: Some(response),
                ..ServiceReply::default()
            }),
            Ok(AddOutcome::Duplicate { timer_id }) => Ok(ServiceReply {
                timer_id: Some(timer_id),
                ..ServiceReply::error(ALREADY_EXISTS)
            }),
            Err(TimerError::InvalidOwner(owner)) => {
                info!(owner = %owner, "cannot set timer: unknown owner");
                Ok(ServiceReply::error(INVALID_DEVICE))
            }
            Err(TimerError::Parse(reason)) => {
                debug!("cannot set timer: {reason}");
                Ok(ServiceReply::error(UNPARSEABLE_TIME))
            }
            Err(e) => Err(e),
        }
    }

    /// Snooze an expired timer by a spoken duration or time.
    ///
    /// # Errors
    ///
    /// Only unexpected failures (serialisation) are errors.
    pub fn snooze_timer(&self, request: &SnoozeRequest) -> Result<ServiceReply> {
        let spec: Option<TimeSpec> = parser::parse(&request.sentence).1;
        let Some(spec) = spec else {
            return Ok(ServiceReply::error(UNPARSEABLE_TIME));
        };

        match self.scheduler.snooze(&request.timer_id, &spec) {
            Ok(SnoozeOutcome::Snoozed {
                timer_id,
                timer,
                response,
            }) => Ok(ServiceReply {
                timer_id: Some(timer_id),
                timer: Some(timer),
                response: Some(response),
                ..ServiceReply::default()
            }),
            Ok(SnoozeOutcome::NotExpired) => Ok(ServiceReply::error("timer has not expired")),
            Ok(SnoozeOutcome::NotFound) => Ok(ServiceReply::error("timer not found")),
            Err(TimerError::Parse(_)) => Ok(ServiceReply::error(UNPARSEABLE_TIME)),
            Err(e) => Err(e),
        }
    }

    /// Cancel one timer, every timer of an owner, or everything.
    #[must_use]
    pub fn cancel_timer(&self, request: &CancelRequest) -> ServiceReply {
        let target = if request.remove_all {
            CancelTarget::All
        } else if let Some(id) = request.timer_id.as_deref().filter(|id| !id.is_empty()) {
            CancelTarget::Id(id.to_owned())
        } else {
            match self.resolve_filter_owner(request.owner.as_deref()) {
                Ok(Some(owner)) => CancelTarget::Owner(owner),
                Ok(None) => return ServiceReply::error("no timer specified"),
                Err(reply) => return reply,
            }
        };

        if self.scheduler.cancel(&target) {
            ServiceReply::response(match target {
                CancelTarget::Id(_) => "timer cancelled",
                CancelTarget::Owner(_) | CancelTarget::All => "timers cancelled",
            })
        } else {
            ServiceReply::error("no timers found")
        }
    }

    /// List timers, soonest first.
    #[must_use]
    pub fn get_timers(&self, request: &GetTimersRequest) -> ServiceReply {
        let owner = match self.resolve_filter_owner(request.owner.as_deref()) {
            Ok(owner) => owner,
            Err(reply) => return reply,
        };
        let timers = self.scheduler.list(&TimerFilter {
            timer_id: request.timer_id.clone(),
            owner,
            name: request.name.clone(),
            include_expired: request.include_expired,
            sort: true,
        });
        ServiceReply {
            timers: Some(timers),
            ..ServiceReply::default()
        }
    }
}
