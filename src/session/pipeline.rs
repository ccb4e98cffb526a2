use std::sync::Arc;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use crate::device::{AgentMessage, MessageReceiver, MessageSender};
use crate::event_log::{EventLog, EventRecord};

/// Why a `send` payload was dropped instead of logged.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MalformedPayload {
    #[error("payload is not an object")]
    NotAnObject,
    #[error("payload has no string \"event\" field")]
    MissingEvent,
    #[error("payload has no \"data\" field")]
    MissingData,
}

impl EventRecord {
    /// Build a record from a script's `send({event, data})` payload.
    pub fn from_payload(time: i64, payload: &serde_json::Value) -> Result<Self, MalformedPayload> {
        let obj = payload.as_object().ok_or(MalformedPayload::NotAnObject)?;
        let event = obj
            .get("event")
            .and_then(|v| v.as_str())
            .ok_or(MalformedPayload::MissingEvent)?;
        let data = obj.get("data").ok_or(MalformedPayload::MissingData)?;

        Ok(Self {
            time,
            event: event.to_string(),
            data: data.clone(),
        })
    }
}

/// Receipt clock: wall time in ms, never going backwards within a session.
#[derive(Default)]
struct ReceiptClock {
    last_ms: i64,
}

impl ReceiptClock {
    fn stamp(&mut self) -> i64 {
        self.last_ms = self.last_ms.max(Utc::now().timestamp_millis());
        self.last_ms
    }
}

/// Single consumer between the engine's delivery threads and the event log.
pub(crate) struct Pipeline {
    tx: MessageSender,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl Pipeline {
    pub(crate) fn spawn(log: Arc<EventLog>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(consume(rx, cancel_rx, log));
        Self { tx, cancel_tx, task }
    }

    pub(crate) fn sender(&self) -> MessageSender {
        self.tx.clone()
    }

    /// Drain everything already queued, then wait for the consumer to exit.
    pub(crate) async fn shutdown(self) {
        let _ = self.cancel_tx.send(true);
        match self.task.await {
            Ok(written) => tracing::info!("Message pipeline stopped ({} events logged)", written),
            Err(e) => tracing::error!("Message pipeline task failed: {}", e),
        }
    }
}

async fn consume(
    mut rx: MessageReceiver,
    mut cancel_rx: watch::Receiver<bool>,
    log: Arc<EventLog>,
) -> u64 {
    let mut clock = ReceiptClock::default();
    let mut written = 0u64;

    loop {
        tokio::select! {
            Some(message) = rx.recv() => {
                written += handle(message, &mut clock, &log);
            }
            _ = cancel_rx.changed() => {
                while let Ok(message) = rx.try_recv() {
                    written += handle(message, &mut clock, &log);
                }
                break;
            }
        }
    }

    written
}

/// Returns the number of records written (0 or 1).
fn handle(message: AgentMessage, clock: &mut ReceiptClock, log: &EventLog) -> u64 {
    match message {
        AgentMessage::Send(payload) => {
            let time = clock.stamp();
            match EventRecord::from_payload(time, &payload) {
                Ok(record) => match log.append(&record) {
                    Ok(()) => 1,
                    Err(e) => {
                        tracing::error!("Failed to append event '{}': {}", record.event, e);
                        0
                    }
                },
                Err(reason) => {
                    tracing::warn!("Dropping malformed message ({}): {}", reason, payload);
                    0
                }
            }
        }
        AgentMessage::Log { level, text } => {
            tracing::info!("Agent [{}]: {}", level, text);
            0
        }
        AgentMessage::Error { description, stack } => {
            tracing::warn!("Agent error: {}", description);
            if let Some(stack) = stack {
                tracing::debug!("{}", stack);
            }
            0
        }
        AgentMessage::Other(value) => {
            tracing::debug!("Unhandled agent message: {}", value);
            0
        }
    }
}
