use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an action definition. Never reused within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action-{}", self.0)
    }
}

/// Identifier of a running action instance, distinct from its definition id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// How an instance of an action is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Execute the script body exactly once
    Once,
    /// Execute every `run_interval_ticks` game ticks until stopped
    #[default]
    Continuous,
    /// Execute once to register event subscriptions, then react until stopped
    Event,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Once => "once",
            RunMode::Continuous => "continuous",
            RunMode::Event => "event",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
