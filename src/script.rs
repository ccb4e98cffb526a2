use std::io::ErrorKind;
use std::path::Path;
use crate::{Error, Result};

/// Read the full agent script from disk. Never cached: every call sees the
/// current contents, which is what makes reloads pick up edits.
pub fn load(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::ScriptNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })
}

/// Fail early, before any device resource is acquired.
pub fn ensure_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::ScriptNotFound(path.to_path_buf()))
    }
}
