use std::path::PathBuf;
use std::sync::Arc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use crate::config::{self, HooklogSettings};
use crate::device::DeviceSelector;
use crate::frida_collector::FridaDevice;
use crate::session::{Session, SessionOptions};
use crate::{script, Error, Result};

#[derive(Parser, Debug)]
#[command(name = "hooklog", version, about = "Run a Frida agent against a mobile app and log the events it sends")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Spawn the app, inject the agent and log its events until stdin is closed (CTRL-D)
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Package name of the target app, e.g. com.example.app
    pub package: String,

    /// Path to the agent script
    #[arg(short = 'f', long = "file", default_value = "_agent.js")]
    pub script: PathBuf,

    /// Folder to store logs [default: logs]
    #[arg(long)]
    pub log_folder: Option<PathBuf>,

    /// Watch for changes of the agent script
    #[arg(short, long)]
    pub watch: bool,

    /// Device to use [default: usb]
    #[arg(long, value_enum)]
    pub device: Option<DeviceKind>,

    /// host[:port] of a remote frida-server (implies --device remote)
    #[arg(long)]
    pub host: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Usb,
    Local,
    Remote,
}

impl DeviceKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl RunArgs {
    /// Command-line flags win over settings files.
    fn device_selector(&self, settings: &HooklogSettings) -> Result<DeviceSelector> {
        let settings_host = match &settings.device {
            DeviceSelector::Remote(h) => Some(h.as_str()),
            _ => None,
        };
        match (self.device, self.host.as_deref()) {
            (Some(kind), host) => config::parse_device(kind.as_str(), host.or(settings_host))
                .ok_or_else(|| Error::DeviceUnavailable("--device remote requires --host".to_string())),
            (None, Some(host)) => Ok(DeviceSelector::Remote(host.to_string())),
            (None, None) => Ok(settings.device.clone()),
        }
    }

    fn session_options(&self, settings: &HooklogSettings) -> SessionOptions {
        SessionOptions {
            package: self.package.clone(),
            script_path: self.script.clone(),
            log_folder: self.log_folder.clone().unwrap_or_else(|| settings.log_folder.clone()),
        }
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    // Nothing is acquired before the script is known to exist
    script::ensure_exists(&args.script)?;

    let cwd = std::env::current_dir()?;
    let settings = config::resolve(Some(&cwd));
    let selector = args.device_selector(&settings)?;
    let options = args.session_options(&settings);

    tracing::info!("Connecting to {} device", selector);
    let device = tokio::task::spawn_blocking(move || FridaDevice::open(selector))
        .await
        .map_err(|e| Error::Frida(format!("Device startup panicked: {}", e)))??;

    let session = Arc::new(Session::new(Arc::new(device), options)?);
    session.start().await?;

    if args.watch {
        if let Err(e) = session.watch().await {
            session.stop().await?;
            return Err(e);
        }
    }

    tracing::info!("CTRL-D to kill...");
    wait_for_eof().await;

    session.stop().await
}

/// Block until stdin reaches end of input. Anything typed is discarded.
async fn wait_for_eof() {
    let mut stdin = tokio::io::stdin();
    if let Err(e) = tokio::io::copy(&mut stdin, &mut tokio::io::sink()).await {
        tracing::warn!("Reading stdin failed, stopping: {}", e);
    }
}
