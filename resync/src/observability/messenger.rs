//! Indented operation log.
//!
//! Each stage receives a shared [`Messenger`] at construction. Nesting depth
//! is owned by the messenger instance; sections indent on entry and outdent
//! when their guard drops.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::Level;

const INDENT_WIDTH: usize = 2;

/// A line captured by a recording messenger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Severity.
    pub level: Level,
    /// Nesting depth when the line was emitted.
    pub depth: usize,
    /// Message text without indentation.
    pub message: String,
}

/// Structured, indented logger shared by the pipeline stages.
#[derive(Debug, Default)]
pub struct Messenger {
    depth: AtomicUsize,
    recorded: Option<Mutex<Vec<LogLine>>>,
}

impl Messenger {
    /// Creates a messenger that only emits tracing events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a messenger that also keeps every line for later inspection.
    #[must_use]
    pub fn recording() -> Self {
        Self {
            depth: AtomicUsize::new(0),
            recorded: Some(Mutex::new(Vec::new())),
        }
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Increases the nesting depth.
    pub fn indent(&self) {
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Decreases the nesting depth, stopping at zero.
    pub fn outdent(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
    }

    /// Logs at debug level.
    pub fn debug(&self, message: impl AsRef<str>) {
        self.emit(Level::DEBUG, message.as_ref());
    }

    /// Logs at info level.
    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(Level::INFO, message.as_ref());
    }

    /// Logs at warn level.
    pub fn warn(&self, message: impl AsRef<str>) {
        self.emit(Level::WARN, message.as_ref());
    }

    /// Logs at error level.
    pub fn error(&self, message: impl AsRef<str>) {
        self.emit(Level::ERROR, message.as_ref());
    }

    /// Logs `"{title}..."` and indents until the returned guard is dropped.
    pub fn section(&self, title: impl Into<String>) -> Section<'_> {
        let title = title.into();
        self.info(format!("{title}..."));
        self.indent();
        Section {
            messenger: self,
            title,
            started: Instant::now(),
            finished: false,
        }
    }

    /// Lines captured so far. Empty unless created with [`Messenger::recording`].
    #[must_use]
    pub fn lines(&self) -> Vec<LogLine> {
        self.recorded
            .as_ref()
            .map(|lines| lines.lock().clone())
            .unwrap_or_default()
    }

    fn emit(&self, level: Level, message: &str) {
        let depth = self.depth();
        let line = format!("{:width$}{message}", "", width = depth * INDENT_WIDTH);
        match level {
            Level::ERROR => tracing::error!(indent = depth, "{line}"),
            Level::WARN => tracing::warn!(indent = depth, "{line}"),
            Level::INFO => tracing::info!(indent = depth, "{line}"),
            Level::DEBUG => tracing::debug!(indent = depth, "{line}"),
            _ => tracing::trace!(indent = depth, "{line}"),
        }
        if let Some(recorded) = &self.recorded {
            recorded.lock().push(LogLine {
                level,
                depth,
                message: message.to_string(),
            });
        }
    }
}

/// An indented block of log output.
///
/// Dropping the guard restores the indentation. [`Section::finish`] also logs
/// the closing `"Done {title}"` line, so failed sections end silently.
#[derive(Debug)]
#[must_use = "the section outdents when dropped"]
pub struct Section<'a> {
    messenger: &'a Messenger,
    title: String,
    started: Instant,
    finished: bool,
}

impl Section<'_> {
    /// Closes the section and logs its completion.
    pub fn finish(mut self) {
        self.finished = true;
        self.messenger.outdent();
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(section = %self.title, elapsed_ms, "Section finished");
        self.messenger.info(format!("Done {}", self.title));
    }
}

impl Drop for Section<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.messenger.outdent();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent_and_outdent() {
        let messenger = Messenger::new();
        messenger.indent();
        messenger.indent();
        assert_eq!(messenger.depth(), 2);

        messenger.outdent();
        messenger.outdent();
        messenger.outdent();
        assert_eq!(messenger.depth(), 0);
    }

    #[test]
    fn test_section_guard_restores_depth() {
        let messenger = Messenger::recording();
        {
            let _section = messenger.section("Transforming");
            messenger.debug("inside");
            assert_eq!(messenger.depth(), 1);
        }
        assert_eq!(messenger.depth(), 0);

        let lines = messenger.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "Transforming...");
        assert_eq!(lines[1].depth, 1);
    }

    #[test]
    fn test_finished_section_logs_done() {
        let messenger = Messenger::recording();
        let section = messenger.section("Appending");
        messenger.warn("careful");
        section.finish();

        let lines = messenger.lines();
        assert_eq!(lines.last().unwrap().message, "Done Appending");
        assert_eq!(lines.last().unwrap().depth, 0);
        assert_eq!(lines[1].level, Level::WARN);
    }

    #[test]
    fn test_plain_messenger_records_nothing() {
        let messenger = Messenger::new();
        messenger.error("boom");
        assert!(messenger.lines().is_empty());
    }
}
