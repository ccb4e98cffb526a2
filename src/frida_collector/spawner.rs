use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::thread;
use async_trait::async_trait;
use frida::{DeviceManager, DeviceType, Frida, ScriptOption, SpawnOptions};
use tokio::sync::oneshot;
use crate::device::{
    AttachedSession, Device, DeviceSelector, InjectedScript, KillOutcome, MessageSender, ScriptId,
};
use crate::{Error, Result};
use super::messages::ChannelHandler;

/// Commands sent to the Frida worker thread
enum FridaCommand {
    Spawn {
        program: String,
        response: oneshot::Sender<Result<u32>>,
    },
    Attach {
        pid: u32,
        response: oneshot::Sender<Result<u64>>,
    },
    Resume {
        pid: u32,
        response: oneshot::Sender<Result<()>>,
    },
    Kill {
        pid: u32,
        response: oneshot::Sender<KillOutcome>,
    },
    Detach {
        session_id: u64,
        response: oneshot::Sender<Result<()>>,
    },
    CreateScript {
        session_id: u64,
        source: String,
        response: oneshot::Sender<Result<u64>>,
    },
    HandleMessages {
        script_id: u64,
        sender: MessageSender,
        response: oneshot::Sender<Result<()>>,
    },
    LoadScript {
        script_id: u64,
        response: oneshot::Sender<Result<()>>,
    },
    UnloadScript {
        script_id: u64,
        response: oneshot::Sender<Result<()>>,
    },
}

/// Script state managed in the worker thread
struct WorkerScript {
    session_id: u64,
    script: frida::Script<'static>,
}

fn open_device<'a>(manager: &'a DeviceManager<'a>, selector: &DeviceSelector) -> Result<frida::Device<'a>> {
    let device = match selector {
        DeviceSelector::Usb => manager.get_device_by_type(DeviceType::USB),
        DeviceSelector::Local => manager.get_local_device(),
        DeviceSelector::Remote(host) => manager.get_remote_device(host),
    };
    device.map_err(|e| Error::DeviceUnavailable(format!("No {} Frida device: {}", selector, e)))
}

/// Frida worker that runs on a dedicated thread
fn frida_worker(
    selector: DeviceSelector,
    cmd_rx: Receiver<FridaCommand>,
    ready_tx: SyncSender<Result<()>>,
) {
    // Initialize Frida on this thread (unsafe because it initializes global state)
    let frida = unsafe { Frida::obtain() };
    let device_manager = DeviceManager::obtain(&frida);

    let mut device = match open_device(&device_manager, &selector) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("{}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    tracing::info!("Using Frida device '{}'", device.get_name());
    let _ = ready_tx.send(Ok(()));

    // Sessions and scripts are stored with 'static lifetimes; both maps are
    // declared after `device` so they are dropped before it, scripts first.
    let mut sessions: HashMap<u64, frida::Session<'static>> = HashMap::new();
    let mut scripts: HashMap<u64, WorkerScript> = HashMap::new();
    let mut next_id = 1u64;

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            FridaCommand::Spawn { program, response } => {
                // Spawned suspended until Resume
                let result = device.spawn(&program, &SpawnOptions::new())
                    .map_err(|e| Error::SpawnFailed { package: program.clone(), reason: e.to_string() });
                let _ = response.send(result);
            }

            FridaCommand::Attach { pid, response } => {
                let result = device.attach(pid)
                    .map(|session| {
                        let id = next_id;
                        next_id += 1;
                        let session: frida::Session<'static> = unsafe { std::mem::transmute(session) };
                        sessions.insert(id, session);
                        id
                    })
                    .map_err(|e| {
                        tracing::error!("Attach to PID {} failed: {:?}", pid, e);
                        Error::AttachFailed { pid, reason: e.to_string() }
                    });
                let _ = response.send(result);
            }

            FridaCommand::Resume { pid, response } => {
                let result = device.resume(pid)
                    .map_err(|e| Error::Frida(format!("Resume of PID {} failed: {}", pid, e)));
                let _ = response.send(result);
            }

            FridaCommand::Kill { pid, response } => {
                let outcome = match device.kill(pid) {
                    Ok(()) => KillOutcome::Killed,
                    Err(e) => {
                        let reason = e.to_string();
                        if is_process_gone(&reason) {
                            KillOutcome::AlreadyGone
                        } else {
                            KillOutcome::Failed(Error::Frida(format!("Kill of PID {} failed: {}", pid, reason)))
                        }
                    }
                };
                let _ = response.send(outcome);
            }

            FridaCommand::Detach { session_id, response } => {
                scripts.retain(|_, s| s.session_id != session_id);
                let result = match sessions.remove(&session_id) {
                    Some(session) => session.detach()
                        .map_err(|e| Error::Frida(format!("Detach failed: {}", e))),
                    None => Ok(()),
                };
                let _ = response.send(result);
            }

            FridaCommand::CreateScript { session_id, source, response } => {
                let result = (|| -> Result<u64> {
                    let session = sessions.get(&session_id)
                        .ok_or_else(|| Error::InvalidState(format!("session {} is detached", session_id)))?;
                    let script = session.create_script(&source, &mut ScriptOption::new())
                        .map_err(|e| Error::ScriptFailed(format!("Script creation failed: {}", e)))?;
                    let script: frida::Script<'static> = unsafe { std::mem::transmute(script) };

                    let id = next_id;
                    next_id += 1;
                    scripts.insert(id, WorkerScript { session_id, script });
                    Ok(id)
                })();
                let _ = response.send(result);
            }

            FridaCommand::HandleMessages { script_id, sender, response } => {
                let result = match scripts.get_mut(&script_id) {
                    Some(s) => s.script.handle_message(ChannelHandler::new(sender))
                        .map_err(|e| Error::ScriptFailed(format!("Message handler setup failed: {}", e))),
                    None => Err(unknown_script(script_id)),
                };
                let _ = response.send(result);
            }

            FridaCommand::LoadScript { script_id, response } => {
                let result = load_or_discard(&mut scripts, script_id, |s| {
                    s.script.load()
                        .map_err(|e| Error::ScriptFailed(format!("Script load failed: {}", e)))
                });
                let _ = response.send(result);
            }

            FridaCommand::UnloadScript { script_id, response } => {
                let result = match scripts.remove(&script_id) {
                    Some(s) => s.script.unload()
                        .map_err(|e| Error::ScriptFailed(format!("Script unload failed: {}", e))),
                    None => Err(unknown_script(script_id)),
                };
                let _ = response.send(result);
            }
        }
    }

    tracing::debug!("Frida worker exiting");
}

/// Load a created script. A script that fails to load is never unloaded
/// either, so it is dropped from the map right away.
fn load_or_discard<S>(
    scripts: &mut HashMap<u64, S>,
    script_id: u64,
    load: impl FnOnce(&mut S) -> Result<()>,
) -> Result<()> {
    let script = scripts.get_mut(&script_id).ok_or_else(|| unknown_script(script_id))?;
    let result = load(script);
    if result.is_err() {
        scripts.remove(&script_id);
    }
    result
}

fn unknown_script(script_id: u64) -> Error {
    Error::InvalidState(format!("script#{} is not loaded", script_id))
}

/// Whether a kill error means the process was already gone.
fn is_process_gone(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("unable to find process")
        || reason.contains("process not found")
        || reason.contains("no such process")
}

async fn request<T>(
    cmd_tx: &Sender<FridaCommand>,
    build: impl FnOnce(oneshot::Sender<T>) -> FridaCommand,
) -> Result<T> {
    let (response_tx, response_rx) = oneshot::channel();

    cmd_tx.send(build(response_tx))
        .map_err(|_| Error::Frida("Worker thread died".to_string()))?;

    response_rx.await
        .map_err(|_| Error::Frida("Worker response lost".to_string()))
}

/// Device handle that forwards every call to the Frida worker thread
pub struct FridaDevice {
    cmd_tx: Sender<FridaCommand>,
}

impl FridaDevice {
    /// Start the worker and wait until it has acquired the device.
    pub fn open(selector: DeviceSelector) -> Result<Self> {
        let (cmd_tx, cmd_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        thread::Builder::new()
            .name("frida-worker".to_string())
            .spawn(move || frida_worker(selector, cmd_rx, ready_tx))?;

        ready_rx.recv()
            .map_err(|_| Error::Frida("Worker thread died during startup".to_string()))??;

        Ok(Self { cmd_tx })
    }
}

#[async_trait]
impl Device for FridaDevice {
    async fn spawn(&self, program: &str) -> Result<u32> {
        let program = program.to_string();
        request(&self.cmd_tx, |response| FridaCommand::Spawn { program, response }).await?
    }

    async fn attach(&self, pid: u32) -> Result<Box<dyn AttachedSession>> {
        let id = request(&self.cmd_tx, |response| FridaCommand::Attach { pid, response }).await??;
        Ok(Box::new(FridaSession { id, cmd_tx: self.cmd_tx.clone() }))
    }

    async fn resume(&self, pid: u32) -> Result<()> {
        request(&self.cmd_tx, |response| FridaCommand::Resume { pid, response }).await?
    }

    async fn kill(&self, pid: u32) -> KillOutcome {
        match request(&self.cmd_tx, |response| FridaCommand::Kill { pid, response }).await {
            Ok(outcome) => outcome,
            Err(e) => KillOutcome::Failed(e),
        }
    }
}

struct FridaSession {
    id: u64,
    cmd_tx: Sender<FridaCommand>,
}

#[async_trait]
impl AttachedSession for FridaSession {
    fn id(&self) -> u64 {
        self.id
    }

    async fn create_script(&self, source: &str) -> Result<Box<dyn InjectedScript>> {
        let source = source.to_string();
        let session_id = self.id;
        let id = request(&self.cmd_tx, |response| FridaCommand::CreateScript {
            session_id,
            source,
            response,
        }).await??;
        Ok(Box::new(FridaScript { id: ScriptId(id), cmd_tx: self.cmd_tx.clone() }))
    }

    async fn detach(&self) -> Result<()> {
        let session_id = self.id;
        request(&self.cmd_tx, |response| FridaCommand::Detach { session_id, response }).await?
    }
}

struct FridaScript {
    id: ScriptId,
    cmd_tx: Sender<FridaCommand>,
}

#[async_trait]
impl InjectedScript for FridaScript {
    fn id(&self) -> ScriptId {
        self.id
    }

    async fn on_message(&mut self, sender: MessageSender) -> Result<()> {
        let script_id = self.id.0;
        request(&self.cmd_tx, |response| FridaCommand::HandleMessages {
            script_id,
            sender,
            response,
        }).await?
    }

    async fn load(&mut self) -> Result<()> {
        let script_id = self.id.0;
        request(&self.cmd_tx, |response| FridaCommand::LoadScript { script_id, response }).await?
    }

    async fn unload(&mut self) -> Result<()> {
        let script_id = self.id.0;
        request(&self.cmd_tx, |response| FridaCommand::UnloadScript { script_id, response }).await?
    }
}
