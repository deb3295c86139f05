use tracing::{debug, error, info, warn};

use tactician_events::{InstanceId, LogEntry, LogLevel, Mention};

/// Logger handed to scripts. Entries are buffered for the engine's log and
/// mirrored to `tracing` as they are written.
#[derive(Debug, Clone)]
pub struct InstanceLogger {
    instance_id: Option<InstanceId>,
    label: String,
    now_ms: u64,
    entries: Vec<LogEntry>,
}

impl InstanceLogger {
    pub fn new(instance_id: Option<InstanceId>, label: impl Into<String>, now_ms: u64) -> Self {
        Self {
            instance_id,
            label: label.into(),
            now_ms,
            entries: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, mentions: Vec<Mention>) {
        let message = message.into();
        let rendered = if mentions.is_empty() {
            message.clone()
        } else {
            let refs: Vec<String> = mentions.iter().map(|m| m.to_string()).collect();
            format!("{} {}", message, refs.join(" "))
        };
        match level {
            LogLevel::Debug => debug!(target: "scripting", "[{}] {}", self.label, rendered),
            LogLevel::Info => info!(target: "scripting", "[{}] {}", self.label, rendered),
            LogLevel::Warn => warn!(target: "scripting", "[{}] {}", self.label, rendered),
            LogLevel::Error => error!(target: "scripting", "[{}] {}", self.label, rendered),
        }
        self.entries.push(LogEntry {
            level,
            message,
            mentions,
            instance_id: self.instance_id,
            label: self.label.clone(),
            at_ms: self.now_ms,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, Vec::new());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, Vec::new());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, Vec::new());
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, Vec::new());
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn take_entries(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }
}
