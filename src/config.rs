use serde::Deserialize;
use std::path::{Path, PathBuf};
use crate::device::DeviceSelector;

pub const DEFAULT_LOG_FOLDER: &str = "logs";

/// All configurable settings with their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct HooklogSettings {
    pub device: DeviceSelector,
    pub log_folder: PathBuf,
}

impl Default for HooklogSettings {
    fn default() -> Self {
        Self {
            device: DeviceSelector::Usb,
            log_folder: PathBuf::from(DEFAULT_LOG_FOLDER),
        }
    }
}

/// Raw JSON representation, all fields optional for partial overrides.
#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(rename = "device.type")]
    device_type: Option<String>,
    #[serde(rename = "device.host")]
    device_host: Option<String>,
    #[serde(rename = "log.folder")]
    log_folder: Option<String>,
}

/// Resolve settings: defaults → user global → project-local.
pub fn resolve(project_root: Option<&Path>) -> HooklogSettings {
    let global_path = dirs::home_dir()
        .map(|h| h.join(".hooklog/settings.json"));
    let project_path = project_root
        .map(|r| r.join(".hooklog/settings.json"));
    resolve_with_paths(
        global_path.as_deref(),
        project_path.as_deref(),
    )
}

/// Testable resolver that accepts explicit file paths (no home dir dependency).
fn resolve_with_paths(
    global_path: Option<&Path>,
    project_path: Option<&Path>,
) -> HooklogSettings {
    let mut settings = HooklogSettings::default();

    if let Some(path) = global_path {
        apply_file(&mut settings, path);
    }
    if let Some(path) = project_path {
        apply_file(&mut settings, path);
    }

    settings
}

fn apply_file(settings: &mut HooklogSettings, path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else { return };
    let Ok(file) = serde_json::from_str::<SettingsFile>(&content) else {
        tracing::warn!("Invalid settings file, ignoring: {}", path.display());
        return;
    };

    // A host on its own only matters once the device is remote
    let host = file.device_host.or_else(|| match &settings.device {
        DeviceSelector::Remote(h) => Some(h.clone()),
        _ => None,
    });

    if let Some(kind) = file.device_type.as_deref() {
        match parse_device(kind, host.as_deref()) {
            Some(device) => settings.device = device,
            None => tracing::warn!(
                "device.type ({}) invalid in {} (expected usb, local, or remote with device.host), using {}",
                kind, path.display(), settings.device
            ),
        }
    } else if matches!(settings.device, DeviceSelector::Remote(_)) {
        if let Some(h) = host {
            settings.device = DeviceSelector::Remote(h);
        }
    }

    if let Some(folder) = file.log_folder {
        if folder.trim().is_empty() {
            tracing::warn!("log.folder is empty in {}, using {}", path.display(), settings.log_folder.display());
        } else {
            settings.log_folder = PathBuf::from(folder);
        }
    }
}

/// Map a device kind name (as used in settings and on the command line) to a selector.
pub fn parse_device(kind: &str, host: Option<&str>) -> Option<DeviceSelector> {
    match kind {
        "usb" => Some(DeviceSelector::Usb),
        "local" => Some(DeviceSelector::Local),
        "remote" => host
            .filter(|h| !h.is_empty())
            .map(|h| DeviceSelector::Remote(h.to_string())),
        _ => None,
    }
}
