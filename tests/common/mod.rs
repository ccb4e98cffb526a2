#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use hooklog::device::{
    AgentMessage, AttachedSession, Device, InjectedScript, KillOutcome, MessageSender, ScriptId,
};
use hooklog::event_log::EventRecord;
use hooklog::session::{Session, SessionOptions};
use hooklog::{Error, Result};

pub const FIRST_PID: u32 = 1000;

/// Everything the in-memory device has seen and holds.
#[derive(Default)]
pub struct MockState {
    pub calls: Vec<String>,
    pub sources: Vec<String>,
    pub alive: HashSet<u32>,
    /// Loaded scripts and where their messages go
    pub loaded: BTreeMap<u64, MessageSender>,
    pub fail_spawn: bool,
    pub fail_attach: bool,
    pub fail_load: bool,
    pub fail_unload: bool,
    next_pid: u32,
    next_id: u64,
}

/// In-memory stand-in for an instrumentation device.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        let device = Self::default();
        device.state().next_pid = FIRST_PID;
        device.state().next_id = 1;
        device
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn sources(&self) -> Vec<String> {
        self.state().sources.clone()
    }

    pub fn loaded_scripts(&self) -> Vec<u64> {
        self.state().loaded.keys().copied().collect()
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.state().alive.contains(&pid)
    }

    /// The target died on its own.
    pub fn kill_externally(&self, pid: u32) {
        self.state().alive.remove(&pid);
    }

    /// Deliver a message from every loaded script, as the engine would.
    pub fn deliver(&self, message: AgentMessage) -> usize {
        let state = self.state();
        for sender in state.loaded.values() {
            sender.send(message.clone()).unwrap();
        }
        state.loaded.len()
    }

    pub fn send_event(&self, payload: serde_json::Value) -> usize {
        self.deliver(AgentMessage::Send(payload))
    }
}

#[async_trait]
impl Device for MockDevice {
    async fn spawn(&self, program: &str) -> Result<u32> {
        let mut state = self.state();
        state.calls.push(format!("spawn {}", program));
        if state.fail_spawn {
            return Err(Error::SpawnFailed { package: program.to_string(), reason: "mock".to_string() });
        }
        let pid = state.next_pid;
        state.next_pid += 1;
        state.alive.insert(pid);
        Ok(pid)
    }

    async fn attach(&self, pid: u32) -> Result<Box<dyn AttachedSession>> {
        let mut state = self.state();
        state.calls.push(format!("attach {}", pid));
        if state.fail_attach || !state.alive.contains(&pid) {
            return Err(Error::AttachFailed { pid, reason: "mock".to_string() });
        }
        let id = state.next_id;
        state.next_id += 1;
        Ok(Box::new(MockSession { id, state: Arc::clone(&self.state) }))
    }

    async fn resume(&self, pid: u32) -> Result<()> {
        self.state().calls.push(format!("resume {}", pid));
        Ok(())
    }

    async fn kill(&self, pid: u32) -> KillOutcome {
        let mut state = self.state();
        state.calls.push(format!("kill {}", pid));
        if state.alive.remove(&pid) {
            state.loaded.clear();
            KillOutcome::Killed
        } else {
            KillOutcome::AlreadyGone
        }
    }
}

struct MockSession {
    id: u64,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl AttachedSession for MockSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn create_script(&self, source: &str) -> Result<Box<dyn InjectedScript>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_script session#{}", self.id));
        state.sources.push(source.to_string());
        let id = state.next_id;
        state.next_id += 1;
        Ok(Box::new(MockScript {
            id: ScriptId(id),
            sender: None,
            state: Arc::clone(&self.state),
        }))
    }

    async fn detach(&self) -> Result<()> {
        self.state.lock().unwrap().calls.push(format!("detach session#{}", self.id));
        Ok(())
    }
}

struct MockScript {
    id: ScriptId,
    sender: Option<MessageSender>,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl InjectedScript for MockScript {
    fn id(&self) -> ScriptId {
        self.id
    }

    async fn on_message(&mut self, sender: MessageSender) -> Result<()> {
        self.state.lock().unwrap().calls.push(format!("on_message {}", self.id));
        self.sender = Some(sender);
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("load {}", self.id));
        if state.fail_load {
            return Err(Error::ScriptFailed("mock load failure".to_string()));
        }
        let sender = self.sender.clone()
            .ok_or_else(|| Error::ScriptFailed("no message handler".to_string()))?;
        state.loaded.insert(self.id.0, sender);
        Ok(())
    }

    async fn unload(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("unload {}", self.id));
        if state.fail_unload {
            return Err(Error::ScriptFailed("mock unload failure".to_string()));
        }
        state.loaded.remove(&self.id.0);
        Ok(())
    }
}

/// Write an agent script into `dir` and return its path.
pub fn write_script(dir: &Path, source: &str) -> PathBuf {
    let path = dir.join("_agent.js");
    std::fs::write(&path, source).unwrap();
    path
}

/// A session for `com.example.app` on a fresh mock device, logging under `dir/logs`.
pub fn create_session(dir: &Path, script_path: &Path) -> (Arc<Session>, MockDevice) {
    let device = MockDevice::new();
    let session = Session::new(
        Arc::new(device.clone()),
        SessionOptions {
            package: "com.example.app".to_string(),
            script_path: script_path.to_path_buf(),
            log_folder: dir.join("logs"),
        },
    )
    .unwrap();
    (Arc::new(session), device)
}

pub fn read_records(path: &Path) -> Vec<EventRecord> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

/// Poll until predicate returns true or timeout.
pub async fn poll_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if predicate() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
