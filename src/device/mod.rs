//! Capability surface of the instrumentation engine.
//!
//! The session controller only ever talks to these traits. The Frida backend
//! lives in [`crate::frida_collector`]; tests drive the controller with an
//! in-memory device instead.

use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;
use crate::{Error, Result};

/// Identity of one created script object. A reload always yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(pub u64);

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script#{}", self.0)
    }
}

/// A message delivered by the engine on behalf of an injected script.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    /// `send(payload)` from the script.
    Send(serde_json::Value),
    /// `console.log` and friends.
    Log { level: String, text: String },
    /// Uncaught exception inside the script.
    Error { description: String, stack: Option<String> },
    /// Anything the engine delivered that none of the above cover.
    Other(serde_json::Value),
}

pub type MessageSender = mpsc::UnboundedSender<AgentMessage>;
pub type MessageReceiver = mpsc::UnboundedReceiver<AgentMessage>;

/// Result of asking the device to terminate a process.
#[derive(Debug)]
pub enum KillOutcome {
    Killed,
    /// The process no longer existed.
    AlreadyGone,
    Failed(Error),
}

/// Which device the engine should talk to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    #[default]
    Usb,
    Local,
    Remote(String),
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => write!(f, "usb"),
            Self::Local => write!(f, "local"),
            Self::Remote(host) => write!(f, "remote ({})", host),
        }
    }
}

#[async_trait]
pub trait Device: Send + Sync {
    /// Spawn `program` suspended and return its pid.
    async fn spawn(&self, program: &str) -> Result<u32>;

    async fn attach(&self, pid: u32) -> Result<Box<dyn AttachedSession>>;

    async fn resume(&self, pid: u32) -> Result<()>;

    async fn kill(&self, pid: u32) -> KillOutcome;
}

#[async_trait]
pub trait AttachedSession: Send + Sync {
    fn id(&self) -> u64;

    async fn create_script(&self, source: &str) -> Result<Box<dyn InjectedScript>>;

    async fn detach(&self) -> Result<()>;
}

#[async_trait]
pub trait InjectedScript: Send + Sync {
    fn id(&self) -> ScriptId;

    /// Route every message from this script into `sender`. Must be called before `load`.
    async fn on_message(&mut self, sender: MessageSender) -> Result<()>;

    async fn load(&mut self) -> Result<()>;

    /// Stop the script's execution context. The target process keeps running.
    async fn unload(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_selector_is_usb() {
        assert_eq!(DeviceSelector::default(), DeviceSelector::Usb);
    }

    #[test]
    fn test_selector_display() {
        assert_eq!(DeviceSelector::Local.to_string(), "local");
        assert_eq!(
            DeviceSelector::Remote("10.0.0.2:27042".to_string()).to_string(),
            "remote (10.0.0.2:27042)"
        );
    }
}
