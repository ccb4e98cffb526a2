mod controller;
mod pipeline;

pub use controller::{Session, SessionOptions, SessionState};
pub use pipeline::MalformedPayload;
