use frida::{Message, ScriptHandler};
use serde_json::Value;
use crate::device::{AgentMessage, MessageSender};

/// Message handler that implements ScriptHandler trait
pub(super) struct ChannelHandler {
    sender: MessageSender,
}

impl ChannelHandler {
    pub(super) fn new(sender: MessageSender) -> Self {
        Self { sender }
    }
}

impl ScriptHandler for ChannelHandler {
    fn on_message(&mut self, message: Message, _data: Option<Vec<u8>>) {
        // Runs on Frida's thread; the receiving pipeline does all the I/O
        let _ = self.sender.send(translate(message));
    }
}

fn translate(message: Message) -> AgentMessage {
    match message {
        Message::Send(msg) => AgentMessage::Send(msg.payload.returns),
        Message::Log(log) => AgentMessage::Log {
            level: format!("{:?}", log.level).to_lowercase(),
            text: log.payload,
        },
        Message::Error(err) => AgentMessage::Error {
            description: format!("{} at {}:{}:{}",
                err.description, err.file_name, err.line_number, err.column_number),
            stack: Some(err.stack).filter(|s| !s.is_empty()),
        },
        Message::Other(value) => translate_raw(value),
    }
}

/// Translate a raw message envelope.
///
/// Arbitrary `send()` payloads don't fit frida's typed `Send` variant and
/// arrive here instead, either as `{"type":"send","payload":...}` or with
/// that envelope serialized as a string under `data`.
fn translate_raw(value: Value) -> AgentMessage {
    if let Some(data) = value.get("data").and_then(|v| v.as_str()) {
        if let Ok(inner) = serde_json::from_str::<Value>(data) {
            if inner.get("type").is_some() {
                return translate_raw(inner);
            }
        }
    }

    match value.get("type").and_then(|t| t.as_str()) {
        Some("send") => match value.get("payload") {
            Some(payload) => AgentMessage::Send(payload.clone()),
            None => AgentMessage::Other(value),
        },
        Some("log") => AgentMessage::Log {
            level: value.get("level").and_then(|v| v.as_str()).unwrap_or("info").to_string(),
            text: match value.get("payload") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
        },
        Some("error") => AgentMessage::Error {
            description: value
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown script error")
                .to_string(),
            stack: value.get("stack").and_then(|v| v.as_str()).map(|s| s.to_string()),
        },
        _ => AgentMessage::Other(value),
    }
}
