//! Append-only JSONL event log, one file per session.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use crate::Result;

/// One logged event. Field order is the serialized key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Receipt time in ms since the epoch.
    pub time: i64,
    pub event: String,
    pub data: serde_json::Value,
}

/// `<folder>/<unix_secs>_<package-with-dots-as-dashes>.log`
pub fn log_path(folder: &Path, package: &str, unix_secs: i64) -> PathBuf {
    folder.join(format!("{}_{}.log", unix_secs, sanitize_package(package)))
}

fn sanitize_package(package: &str) -> String {
    package.replace(['.', '/', '\\'], "-")
}

pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Creates the parent directory if needed. Idempotent.
    pub fn create(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open, write one line, close. No handle is kept between calls, so a
    /// crash loses at most the record being written. Relies on O_APPEND
    /// writes of a single small buffer being atomic.
    pub fn append(&self, record: &EventRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
