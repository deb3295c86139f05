//! The only view of the game a script can reach.

use std::sync::Arc;

use tactician_client::{PlayerId, PlayerRecord, Snapshot};
use tactician_events::Value;

use crate::ScriptError;

/// A trade command queued by a script, applied by the engine after the invocation returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeCommand {
    pub target: PlayerId,
    /// `true` stops trade, `false` resumes it
    pub stopped: bool,
}

/// Read-only roster summary plus the two trade commands
pub struct GameFacade {
    snapshot: Option<Arc<Snapshot>>,
    commands: Vec<TradeCommand>,
}

impl GameFacade {
    pub fn new(snapshot: Option<Arc<Snapshot>>) -> Self {
        Self {
            snapshot,
            commands: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_deref()
    }

    /// Current game tick; 0 while detached
    pub fn tick(&self) -> u64 {
        self.snapshot.as_ref().map(|s| s.tick).unwrap_or(0)
    }

    pub fn player(&self, id: &str) -> Option<&PlayerRecord> {
        self.snapshot.as_ref().and_then(|s| s.player(id))
    }

    pub fn me(&self) -> Option<&PlayerRecord> {
        self.snapshot.as_ref().and_then(|s| s.me())
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.snapshot.iter().flat_map(|s| s.players.iter())
    }

    /// Roster summary as script values
    pub fn players_value(&self) -> Value {
        Value::List(self.players().map(PlayerRecord::to_value).collect())
    }

    pub fn me_value(&self) -> Value {
        self.me().map(PlayerRecord::to_value).unwrap_or_default()
    }

    /// Stop trade with one player or a collection of players.
    /// Returns the number of commands queued.
    pub fn stop_trade(&mut self, targets: &Value) -> Result<usize, ScriptError> {
        self.queue(targets, true)
    }

    pub fn start_trade(&mut self, targets: &Value) -> Result<usize, ScriptError> {
        self.queue(targets, false)
    }

    /// Stop or resume trade with a single player by id
    pub fn set_trade(&mut self, target: &str, stopped: bool) -> Result<(), ScriptError> {
        if self
            .snapshot
            .as_ref()
            .is_some_and(|snapshot| snapshot.player(target).is_none())
        {
            return Err(ScriptError::runtime(format!("unknown player '{}'", target)));
        }
        self.commands.push(TradeCommand {
            target: target.to_string(),
            stopped,
        });
        Ok(())
    }

    fn queue(&mut self, targets: &Value, stopped: bool) -> Result<usize, ScriptError> {
        let ids = collect_ids(targets)?;
        for id in &ids {
            self.set_trade(id, stopped)?;
        }
        Ok(ids.len())
    }

    pub fn take_commands(&mut self) -> Vec<TradeCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn pending_commands(&self) -> &[TradeCommand] {
        &self.commands
    }
}

/// Accepts an id, a player record value, or a list of either
fn collect_ids(targets: &Value) -> Result<Vec<String>, ScriptError> {
    match targets {
        Value::Text(id) => Ok(vec![id.clone()]),
        Value::Map(_) => match targets.get("id") {
            Some(Value::Text(id)) => Ok(vec![id.clone()]),
            _ => Err(ScriptError::runtime("player value has no id")),
        },
        Value::List(items) => {
            let mut ids = Vec::new();
            for item in items {
                ids.extend(collect_ids(item)?);
            }
            Ok(ids)
        }
        other => Err(ScriptError::runtime(format!(
            "expected a player id or list of ids, got {}",
            other.type_name()
        ))),
    }
}
