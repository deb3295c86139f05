use tactician_events::{ActionId, InstanceId, RunMode, Value};

use crate::event_bus::BusHandle;
use crate::facade::GameFacade;
use crate::logger::InstanceLogger;

/// Metadata about the run a script invocation belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct RunMeta {
    pub action_id: ActionId,
    pub instance_id: InstanceId,
    pub name: String,
    pub mode: RunMode,
    pub run_interval_ticks: u64,
    /// Number of completed body executions before this one
    pub execution: u64,
    pub started_at_ms: u64,
    pub now_ms: u64,
}

impl RunMeta {
    pub fn new(action_id: ActionId, instance_id: InstanceId, name: impl Into<String>, mode: RunMode) -> Self {
        Self {
            action_id,
            instance_id,
            name: name.into(),
            mode,
            run_interval_ticks: 1,
            execution: 0,
            started_at_ms: 0,
            now_ms: 0,
        }
    }

    /// Label used for log lines of this instance
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.instance_id)
    }

    pub fn to_value(&self) -> Value {
        Value::map()
            .with("actionId", self.action_id.to_string())
            .with("instanceId", self.instance_id.to_string())
            .with("name", self.name.as_str())
            .with("mode", self.mode.as_str())
            .with("runIntervalTicks", self.run_interval_ticks)
            .with("execution", self.execution)
            .with("startedAtMs", self.started_at_ms)
            .with("nowMs", self.now_ms)
    }
}

/// Everything a script invocation may touch.
///
/// The context owns its data: the engine moves the instance's state in before
/// the call and takes it (plus queued commands, log lines and subscriptions)
/// back out afterwards.
pub struct ScriptContext {
    pub game: GameFacade,
    /// Flattened `key -> value` settings of the instance
    pub settings: Value,
    /// Per-instance mutable state, kept across executions
    pub state: Value,
    pub meta: RunMeta,
    pub log: InstanceLogger,
    pub bus: BusHandle,
}

impl ScriptContext {
    pub fn new(game: GameFacade, settings: Value, state: Value, meta: RunMeta, bus: BusHandle) -> Self {
        let log = InstanceLogger::new(Some(meta.instance_id), meta.label(), meta.now_ms);
        Self {
            game,
            settings,
            state: if matches!(state, Value::Map(_)) {
                state
            } else {
                Value::map()
            },
            meta,
            log,
            bus,
        }
    }

    pub fn tick(&self) -> u64 {
        self.game.tick()
    }

    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn state_get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn state_set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Value::Map(entries) = &mut self.state {
            entries.insert(key.into(), value.into());
        }
    }
}
