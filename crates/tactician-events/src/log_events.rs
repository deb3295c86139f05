use serde::{Deserialize, Serialize};
use std::fmt;

use crate::InstanceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Structured reference embedded in a log line, rendered richly by presentation code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mention {
    Player { id: String, name: Option<String> },
    Team(String),
    Clan(String),
}

impl fmt::Display for Mention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mention::Player { id, name: Some(name) } => write!(f, "@{} ({})", name, id),
            Mention::Player { id, name: None } => write!(f, "@{}", id),
            Mention::Team(team) => write!(f, "team:{}", team),
            Mention::Clan(clan) => write!(f, "[{}]", clan),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub mentions: Vec<Mention>,
    /// Instance that wrote the line; `None` for engine-level lines
    pub instance_id: Option<InstanceId>,
    pub label: String,
    pub at_ms: u64,
}
