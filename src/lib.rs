pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod event_log;
pub mod frida_collector;
pub mod script;
pub mod session;
pub mod watcher;

pub use error::{Error, Result};
