use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SCRIPT_NOT_FOUND: File {} does not exist", .0.display())]
    ScriptNotFound(PathBuf),

    #[error("DEVICE_UNAVAILABLE: {0}")]
    DeviceUnavailable(String),

    #[error("SPAWN_FAILED: Failed to spawn '{package}': {reason}")]
    SpawnFailed { package: String, reason: String },

    #[error("ATTACH_FAILED: Failed to attach to PID {pid}: {reason}")]
    AttachFailed { pid: u32, reason: String },

    #[error("SCRIPT_FAILED: {0}")]
    ScriptFailed(String),

    #[error("INVALID_STATE: {0}")]
    InvalidState(String),

    #[error("WATCH_FAILED: {0}")]
    WatchFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frida error: {0}")]
    Frida(String),
}

impl From<notify::Error> for Error {
    fn from(e: notify::Error) -> Self {
        Error::WatchFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
