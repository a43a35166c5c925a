//! Logging for pipeline runs.

mod logging;
mod messenger;

pub use logging::{default_directive, init_logging, LogFormat};
pub use messenger::{LogLine, Messenger, Section};
