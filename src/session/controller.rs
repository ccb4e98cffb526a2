use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use chrono::Utc;
use tokio::sync::Mutex;
use crate::device::{AttachedSession, Device, InjectedScript, KillOutcome, MessageSender, ScriptId};
use crate::event_log::{self, EventLog};
use crate::watcher::ScriptWatcher;
use crate::{script, Error, Result};
use super::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Spawned,
    Attached,
    Running,
    Stopped,
}

/// What to run and where to log it.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub package: String,
    pub script_path: PathBuf,
    pub log_folder: PathBuf,
}

#[derive(Default)]
struct Inner {
    pid: Option<u32>,
    attached: Option<Box<dyn AttachedSession>>,
    script: Option<Box<dyn InjectedScript>>,
    pipeline: Option<Pipeline>,
    watcher: Option<ScriptWatcher>,
}

/// One instrumentation run against one target process.
pub struct Session {
    device: Arc<dyn Device>,
    package: String,
    script_path: PathBuf,
    log: Arc<EventLog>,
    state: std::sync::RwLock<SessionState>,
    inner: Mutex<Inner>,
}

impl Session {
    /// The log file name is fixed here, from the current time.
    pub fn new(device: Arc<dyn Device>, options: SessionOptions) -> Result<Self> {
        let path = event_log::log_path(&options.log_folder, &options.package, Utc::now().timestamp());
        let log = EventLog::create(path)?;

        Ok(Self {
            device,
            package: options.package,
            script_path: options.script_path,
            log: Arc::new(log),
            state: std::sync::RwLock::new(SessionState::Created),
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.pid
    }

    pub async fn session_id(&self) -> Option<u64> {
        self.inner.lock().await.attached.as_ref().map(|a| a.id())
    }

    pub async fn script_id(&self) -> Option<ScriptId> {
        self.inner.lock().await.script.as_ref().map(|s| s.id())
    }

    /// Spawn suspended, attach, inject the script, then resume.
    ///
    /// If anything fails after the spawn, the spawned process is killed
    /// before the error is returned.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.state() != SessionState::Created {
            return Err(Error::InvalidState(format!(
                "cannot start a session that is {:?}",
                self.state()
            )));
        }

        let pipeline = Pipeline::spawn(Arc::clone(&self.log));
        let sender = pipeline.sender();

        let pid = match self.device.spawn(&self.package).await {
            Ok(pid) => pid,
            Err(e) => {
                pipeline.shutdown().await;
                return Err(e);
            }
        };
        tracing::info!("Spawned {} with PID {}", self.package, pid);
        inner.pid = Some(pid);
        self.set_state(SessionState::Spawned);

        match self.inject_and_resume(&mut inner, pid, sender).await {
            Ok(()) => {
                inner.pipeline = Some(pipeline);
                self.set_state(SessionState::Running);
                tracing::info!("Session running, logging events to {}", self.log.path().display());
                Ok(())
            }
            Err(e) => {
                tracing::error!("Session start failed, killing PID {}: {}", pid, e);
                inner.script = None;
                self.report_kill(pid).await;
                if let Some(attached) = inner.attached.take() {
                    report_detach(attached.as_ref()).await;
                }
                pipeline.shutdown().await;
                self.set_state(SessionState::Stopped);
                Err(e)
            }
        }
    }

    async fn inject_and_resume(&self, inner: &mut Inner, pid: u32, sender: MessageSender) -> Result<()> {
        let attached = inner.attached.insert(self.device.attach(pid).await?);
        self.set_state(SessionState::Attached);

        let source = script::load(&self.script_path)?;
        let script = install_script(&**attached, &source, sender).await?;
        tracing::info!("Loaded {} ({}) into PID {}", self.script_path.display(), script.id(), pid);
        inner.script = Some(script);

        self.device.resume(pid).await?;
        Ok(())
    }

    /// Replace the injected script with the current on-disk source, leaving
    /// the target process running. Messages in flight during the swap may be lost.
    pub async fn reload(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if self.state() != SessionState::Running {
            return Err(Error::InvalidState(format!(
                "cannot reload a session that is {:?}",
                self.state()
            )));
        }

        let Inner { attached, script, pipeline, .. } = &mut *inner;
        let (Some(attached), Some(pipeline)) = (attached.as_ref(), pipeline.as_ref()) else {
            return Err(Error::InvalidState("running session has no attached session".to_string()));
        };

        // Read first: an unreadable file leaves the current script in place
        let source = script::load(&self.script_path)?;

        // The old script must be gone before another one is loaded
        if let Some(mut old) = script.take() {
            if let Err(e) = old.unload().await {
                tracing::error!("Unloading {} failed, keeping it: {}", old.id(), e);
                *script = Some(old);
                return Err(e);
            }
        }

        let new = install_script(attached.as_ref(), &source, pipeline.sender()).await?;
        tracing::info!("Reloaded {} as {}", self.script_path.display(), new.id());
        *script = Some(new);
        Ok(())
    }

    /// Reload on every modification of the script file until [`Session::stop`].
    pub async fn watch(self: &Arc<Self>) -> Result<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let watcher = ScriptWatcher::spawn(&self.script_path, move |_path| {
            let weak = weak.clone();
            async move {
                let Some(session) = weak.upgrade() else { return };
                match session.reload().await {
                    Ok(()) => {}
                    Err(Error::InvalidState(_)) if session.state() == SessionState::Stopped => {
                        tracing::debug!("Ignoring script change, session already stopped");
                    }
                    Err(e) => tracing::error!("Reload failed: {}", e),
                }
            }
        })?;

        let previous = self.inner.lock().await.watcher.replace(watcher);
        if let Some(previous) = previous {
            previous.stop().await;
        }
        Ok(())
    }

    /// Kill the target, then stop the watcher, then flush the event log.
    /// A target that already died is reported, not raised.
    pub async fn stop(&self) -> Result<()> {
        let (watcher, pipeline) = {
            let mut inner = self.inner.lock().await;
            if let Some(pid) = inner.pid {
                self.report_kill(pid).await;
            }
            self.set_state(SessionState::Stopped);
            inner.script = None;
            if let Some(attached) = inner.attached.take() {
                report_detach(attached.as_ref()).await;
            }
            (inner.watcher.take(), inner.pipeline.take())
        };

        // The lock is released so a reload waiting on it sees Stopped and bails
        if let Some(watcher) = watcher {
            watcher.stop().await;
        }
        if let Some(pipeline) = pipeline {
            pipeline.shutdown().await;
        }

        tracing::info!("Session for {} stopped", self.package());
        Ok(())
    }

    async fn report_kill(&self, pid: u32) {
        match self.device.kill(pid).await {
            KillOutcome::Killed => tracing::info!("Killed PID {}", pid),
            KillOutcome::AlreadyGone => tracing::error!("Process already dead"),
            KillOutcome::Failed(e) => tracing::error!("Failed to kill PID {}: {}", pid, e),
        }
    }
}

async fn report_detach(attached: &dyn AttachedSession) {
    match attached.detach().await {
        Ok(()) => tracing::debug!("Detached session {}", attached.id()),
        Err(e) => tracing::warn!("Failed to detach session {}: {}", attached.id(), e),
    }
}

/// create → register handler → load
async fn install_script(
    attached: &dyn AttachedSession,
    source: &str,
    sender: MessageSender,
) -> Result<Box<dyn InjectedScript>> {
    let mut script = attached.create_script(source).await?;
    script.on_message(sender).await?;
    script.load().await?;
    Ok(script)
}
