//! Host command channel and router for the timer bridge.

use crate::error::{Result, TimerError};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};
use crate::timers::parser;
use crate::timers::scheduler::TimerEvent;
use crate::timers::service::{
    CancelRequest, GetTimersRequest, ServiceReply, SetTimerRequest, SnoozeRequest, TimerService,
};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            TimerError::Command(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| TimerError::Channel(format!("failed to send host command request: {e}")))?;

        response_rx
            .await
            .map_err(|e| TimerError::Channel(format!("host command response dropped: {e}")))?
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Re-publish timer lifecycle events as host event envelopes until the
    /// timer channel closes.
    pub fn forward_timer_events(&self, mut timer_rx: broadcast::Receiver<TimerEvent>) -> JoinHandle<()> {
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                match timer_rx.recv().await {
                    Ok(event) => {
                        let _ = event_tx.send(timer_event_envelope(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "timer event pump lagged; some events were dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Wrap a timer event in a host event envelope.
#[must_use]
pub fn timer_event_envelope(event: TimerEvent) -> EventEnvelope {
    EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.name, event.payload)
}

pub struct HostCommandServer {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    service: TimerService,
}

#[must_use]
pub fn command_channel(
    request_capacity: usize,
    event_capacity: usize,
    service: TimerService,
) -> (HostCommandClient, HostCommandServer) {
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            event_tx,
            service,
        },
    )
}

impl HostCommandServer {
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let response = self.route(&request.envelope);
            let _ = request.response_tx.send(response);
        }
    }

    /// Route a command envelope to the appropriate handler.
    pub fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({"pong": true}),
            )),
            CommandName::HostVersion => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({
                    "contract_version": crate::host::contract::EVENT_VERSION,
                    "channel": "timer_host_v1",
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )),
            CommandName::RuntimeStop => self.handle_runtime_stop(envelope),
            CommandName::TimerParse => self.handle_timer_parse(envelope),
            CommandName::TimerSet => self.handle_timer_set(envelope),
            CommandName::TimerSnooze => self.handle_timer_snooze(envelope),
            CommandName::TimerCancel => self.handle_timer_cancel(envelope),
            CommandName::TimerList => self.handle_timer_list(envelope),
        }
    }

    fn handle_runtime_stop(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        self.service.scheduler().shutdown();
        self.emit_event(
            "runtime.stopping",
            serde_json::json!({"request_id": envelope.request_id}),
        );
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"stopping": true}),
        ))
    }

    fn handle_timer_parse(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let sentence = parse_non_empty_field(&envelope.payload, "sentence", "timer.parse")?;
        let (normalized, spec) = parser::parse(&sentence);
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({
                "sentence": normalized,
                "spec": spec,
            }),
        ))
    }

    fn handle_timer_set(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let request: SetTimerRequest = parse_payload(&envelope.payload, "timer.set")?;
        if request.sentence.trim().is_empty() {
            return Err(TimerError::Command(
                "timer.set requires non-empty payload.sentence".to_owned(),
            ));
        }
        let reply = self.service.set_timer(request)?;
        reply_envelope(&envelope.request_id, &reply)
    }

    fn handle_timer_snooze(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let request = SnoozeRequest {
            timer_id: parse_non_empty_field(&envelope.payload, "timer_id", "timer.snooze")?,
            sentence: parse_non_empty_field(&envelope.payload, "sentence", "timer.snooze")?,
        };
        let reply = self.service.snooze_timer(&request)?;
        reply_envelope(&envelope.request_id, &reply)
    }

    fn handle_timer_cancel(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let request: CancelRequest = parse_payload(&envelope.payload, "timer.cancel")?;
        let reply = self.service.cancel_timer(&request);
        reply_envelope(&envelope.request_id, &reply)
    }

    fn handle_timer_list(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let request: GetTimersRequest = parse_payload(&envelope.payload, "timer.list")?;
        let reply = self.service.get_timers(&request);
        reply_envelope(&envelope.request_id, &reply)
    }

    fn emit_event(&self, event: &str, payload: serde_json::Value) {
        let envelope =
            EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.to_owned(), payload);
        let _ = self.event_tx.send(envelope);
    }
}

fn reply_envelope(request_id: &str, reply: &ServiceReply) -> Result<ResponseEnvelope> {
    let payload = serde_json::to_value(reply)?;
    Ok(match &reply.error {
        Some(message) => ResponseEnvelope::rejected(request_id, payload, message.clone()),
        None => ResponseEnvelope::ok(request_id, payload),
    })
}

fn parse_payload<T: DeserializeOwned>(payload: &serde_json::Value, command: &str) -> Result<T> {
    let payload = if payload.is_null() {
        serde_json::json!({})
    } else {
        payload.clone()
    };
    serde_json::from_value(payload)
        .map_err(|e| TimerError::Command(format!("invalid {command} payload: {e}")))
}

fn parse_non_empty_field(payload: &serde_json::Value, key: &str, command: &str) -> Result<String> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| TimerError::Command(format!("{command} requires payload.{key}")))
}
