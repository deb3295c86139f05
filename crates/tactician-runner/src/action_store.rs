//! Action definitions and their running instances.
//!
//! The store only enforces data invariants (id uniqueness, normalisation,
//! one-way status transitions, valid selection pointers). Driving instances
//! is the scheduler's job; the engine composes both.

use std::fmt;

use tactician_events::{ActionId, InstanceId, RunMode, Value};

use crate::error::EngineError;

pub const DEFAULT_ACTION_NAME: &str = "New action";

/// Script seeded into freshly created definitions
pub const DEFAULT_SCRIPT: &str = r#"# Runs every `run interval` ticks. `state` survives between runs.
fn run {
  state.runs = (state.runs or 0) + 1
  info "tick " + str(tick) + ", run " + str(state.runs)
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettingType {
    #[default]
    Text,
    Number,
    Toggle,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::Text => "text",
            SettingType::Number => "number",
            SettingType::Toggle => "toggle",
        }
    }

    /// Coerce an arbitrary value into this type. Never fails; unusable
    /// input becomes the type's zero value.
    pub fn coerce(&self, value: &Value) -> Value {
        match self {
            SettingType::Text => match value {
                Value::Null => Value::from(""),
                Value::Text(s) => Value::Text(s.clone()),
                other => Value::Text(other.to_string()),
            },
            SettingType::Number => Value::Number(match value {
                Value::Number(n) if n.is_finite() => *n,
                Value::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .unwrap_or(0.0),
                Value::Bool(true) => 1.0,
                _ => 0.0,
            }),
            SettingType::Toggle => Value::Bool(match value {
                Value::Bool(b) => *b,
                Value::Text(s) => matches!(
                    s.trim().to_ascii_lowercase().as_str(),
                    "true" | "1" | "yes" | "on"
                ),
                other => other.is_truthy(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingDefinition {
    pub id: String,
    pub key: String,
    pub label: String,
    pub kind: SettingType,
    pub value: Value,
}

impl SettingDefinition {
    pub fn new(key: impl Into<String>, kind: SettingType, value: impl Into<Value>) -> Self {
        Self {
            id: String::new(),
            key: key.into(),
            label: String::new(),
            kind,
            value: value.into(),
        }
    }

    /// Fill in missing id/key/label and coerce the value to the declared type
    fn normalized(self, index: usize) -> Self {
        let label = self.label.trim().to_string();
        let mut key = self.key.trim().to_string();
        if key.is_empty() {
            key = slug(&label);
        }
        if key.is_empty() {
            key = format!("setting_{}", index + 1);
        }
        let id = match self.id.trim() {
            "" => format!("setting-{}", index + 1),
            id => id.to_string(),
        };
        let label = if label.is_empty() { key.clone() } else { label };
        let value = self.kind.coerce(&self.value);
        Self {
            id,
            key,
            label,
            kind: self.kind,
            value,
        }
    }
}

fn slug(label: &str) -> String {
    let raw: String = label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    raw.trim_matches('_').to_string()
}

/// `key -> value` record handed to scripts
pub fn flatten_settings(settings: &[SettingDefinition]) -> Value {
    settings
        .iter()
        .fold(Value::map(), |acc, s| acc.with(s.key.clone(), s.value.clone()))
}

pub fn normalize_interval(ticks: i64) -> u64 {
    ticks.max(1) as u64
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionDefinition {
    pub id: ActionId,
    pub name: String,
    pub script: String,
    pub mode: RunMode,
    pub enabled: bool,
    pub description: String,
    pub run_interval_ticks: u64,
    pub settings: Vec<SettingDefinition>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Wholesale replacement of a definition's editable fields. Everything is
/// normalised on save, so drafts may carry raw user input.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDraft {
    pub name: String,
    pub script: String,
    pub mode: RunMode,
    pub description: String,
    pub run_interval_ticks: i64,
    pub settings: Vec<SettingDefinition>,
}

impl Default for ActionDraft {
    fn default() -> Self {
        Self {
            name: DEFAULT_ACTION_NAME.to_string(),
            script: DEFAULT_SCRIPT.to_string(),
            mode: RunMode::Continuous,
            description: String::new(),
            run_interval_ticks: 1,
            settings: Vec::new(),
        }
    }
}

impl ActionDraft {
    pub fn new(name: impl Into<String>, script: impl Into<String>, mode: RunMode) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            mode,
            ..Self::default()
        }
    }

    pub fn interval(mut self, ticks: i64) -> Self {
        self.run_interval_ticks = ticks;
        self
    }

    pub fn setting(mut self, setting: SettingDefinition) -> Self {
        self.settings.push(setting);
        self
    }
}

impl From<&ActionDefinition> for ActionDraft {
    fn from(def: &ActionDefinition) -> Self {
        Self {
            name: def.name.clone(),
            script: def.script.clone(),
            mode: def.mode,
            description: def.description.clone(),
            run_interval_ticks: def.run_interval_ticks as i64,
            settings: def.settings.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One execution of a definition. Name, mode, interval and settings are
/// copied at start and never follow later edits of the definition.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningInstance {
    pub id: InstanceId,
    pub action_id: ActionId,
    pub name: String,
    pub description: String,
    pub mode: RunMode,
    pub run_interval_ticks: u64,
    pub settings: Vec<SettingDefinition>,
    pub status: InstanceStatus,
    pub started_at_ms: u64,
    pub last_updated_ms: u64,
    /// Completed body executions and handler deliveries
    pub executions: u64,
    pub last_error: Option<String>,
}

impl RunningInstance {
    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.id)
    }
}

pub struct ActionStore {
    definitions: Vec<ActionDefinition>,
    instances: Vec<RunningInstance>,
    next_action_id: u64,
    next_instance_id: u64,
    definitions_revision: u64,
    running_revision: u64,
    selected_action: Option<ActionId>,
    selected_running: Option<InstanceId>,
}

impl ActionStore {
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
            instances: Vec::new(),
            next_action_id: 1,
            next_instance_id: 1,
            definitions_revision: 0,
            running_revision: 0,
            selected_action: None,
            selected_running: None,
        }
    }

    pub fn definitions(&self) -> &[ActionDefinition] {
        &self.definitions
    }

    pub fn definition(&self, id: ActionId) -> Option<&ActionDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    fn definition_mut(&mut self, id: ActionId) -> Result<&mut ActionDefinition, EngineError> {
        self.definitions
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(EngineError::UnknownAction(id))
    }

    pub fn instances(&self) -> &[RunningInstance] {
        &self.instances
    }

    pub fn instance(&self, id: InstanceId) -> Option<&RunningInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    fn instance_mut(&mut self, id: InstanceId) -> Option<&mut RunningInstance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    /// Every instance of `action`, running or not
    pub fn instance_ids(&self, action: ActionId) -> Vec<InstanceId> {
        self.instances
            .iter()
            .filter(|i| i.action_id == action)
            .map(|i| i.id)
            .collect()
    }

    /// Running instances of `action`, optionally restricted to one mode
    pub fn running_ids(&self, action: ActionId, mode: Option<RunMode>) -> Vec<InstanceId> {
        self.instances
            .iter()
            .filter(|i| i.action_id == action && i.is_running())
            .filter(|i| mode.is_none_or(|m| i.mode == m))
            .map(|i| i.id)
            .collect()
    }

    pub fn definitions_revision(&self) -> u64 {
        self.definitions_revision
    }

    pub fn running_revision(&self) -> u64 {
        self.running_revision
    }

    pub fn selected_action(&self) -> Option<ActionId> {
        self.selected_action
    }

    pub fn selected_running(&self) -> Option<InstanceId> {
        self.selected_running
    }

    /// Seed a definition from the default template and select it
    pub fn create(&mut self, now_ms: u64) -> ActionId {
        let id = ActionId(self.next_action_id);
        self.next_action_id += 1;
        let draft = ActionDraft::default();
        self.definitions.push(ActionDefinition {
            id,
            name: draft.name,
            script: draft.script,
            mode: draft.mode,
            enabled: true,
            description: draft.description,
            run_interval_ticks: normalize_interval(draft.run_interval_ticks),
            settings: Vec::new(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        });
        self.selected_action = Some(id);
        self.definitions_revision += 1;
        id
    }

    /// Replace the editable fields of a definition. Returns the mode it had before.
    pub fn save(&mut self, id: ActionId, draft: ActionDraft, now_ms: u64) -> Result<RunMode, EngineError> {
        let def = self.definition_mut(id)?;
        let previous = def.mode;

        let name = draft.name.trim();
        def.name = if name.is_empty() {
            DEFAULT_ACTION_NAME.to_string()
        } else {
            name.to_string()
        };
        def.script = draft.script;
        def.mode = draft.mode;
        def.description = draft.description.trim().to_string();
        def.run_interval_ticks = normalize_interval(draft.run_interval_ticks);
        def.settings = draft
            .settings
            .into_iter()
            .enumerate()
            .map(|(index, setting)| setting.normalized(index))
            .collect();
        def.updated_at_ms = now_ms;

        self.definitions_revision += 1;
        Ok(previous)
    }

    pub fn set_enabled(&mut self, id: ActionId, enabled: bool, now_ms: u64) -> Result<(), EngineError> {
        let def = self.definition_mut(id)?;
        def.enabled = enabled;
        def.updated_at_ms = now_ms;
        self.definitions_revision += 1;
        Ok(())
    }

    /// Remove a definition, re-targeting the selection to a neighbour.
    /// Instances must have been removed beforehand.
    pub fn remove_definition(&mut self, id: ActionId) -> Result<ActionDefinition, EngineError> {
        let index = self
            .definitions
            .iter()
            .position(|d| d.id == id)
            .ok_or(EngineError::UnknownAction(id))?;
        let removed = self.definitions.remove(index);
        if self.selected_action == Some(id) {
            self.selected_action = neighbour(&self.definitions, index).map(|d| d.id);
        }
        self.definitions_revision += 1;
        Ok(removed)
    }

    /// Add a `running` instance of `action`, snapshotting its current definition
    pub fn insert_instance(&mut self, action: ActionId, now_ms: u64) -> Result<InstanceId, EngineError> {
        let def = self
            .definition(action)
            .ok_or(EngineError::UnknownAction(action))?;
        let id = InstanceId(self.next_instance_id);
        let instance = RunningInstance {
            id,
            action_id: action,
            name: def.name.clone(),
            description: def.description.clone(),
            mode: def.mode,
            run_interval_ticks: def.run_interval_ticks,
            settings: def.settings.clone(),
            status: InstanceStatus::Running,
            started_at_ms: now_ms,
            last_updated_ms: now_ms,
            executions: 0,
            last_error: None,
        };
        self.next_instance_id += 1;
        self.instances.push(instance);
        self.running_revision += 1;
        Ok(id)
    }

    /// Move a running instance to a terminal status. Returns false if the
    /// instance is missing or already terminal.
    pub fn finish(
        &mut self,
        id: InstanceId,
        status: InstanceStatus,
        error: Option<String>,
        now_ms: u64,
    ) -> bool {
        let Some(instance) = self.instance_mut(id) else {
            return false;
        };
        if instance.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        instance.status = status;
        instance.last_error = error;
        instance.last_updated_ms = instance.last_updated_ms.max(now_ms);
        self.running_revision += 1;
        true
    }

    /// Liveness heartbeat after an execution attempt. `last_updated_ms`
    /// strictly increases even when the clock did not move.
    pub fn touch(&mut self, id: InstanceId, now_ms: u64) {
        if let Some(instance) = self.instance_mut(id) {
            instance.last_updated_ms = now_ms.max(instance.last_updated_ms + 1);
            instance.executions += 1;
            self.running_revision += 1;
        }
    }

    pub fn set_instance_interval(&mut self, id: InstanceId, ticks: i64) -> Result<u64, EngineError> {
        let instance = self
            .instance_mut(id)
            .ok_or(EngineError::UnknownInstance(id))?;
        instance.run_interval_ticks = normalize_interval(ticks);
        let interval = instance.run_interval_ticks;
        self.running_revision += 1;
        Ok(interval)
    }

    pub fn remove_instance(&mut self, id: InstanceId) -> Option<RunningInstance> {
        let index = self.instances.iter().position(|i| i.id == id)?;
        let removed = self.instances.remove(index);
        if self.selected_running == Some(id) {
            self.selected_running = neighbour(&self.instances, index).map(|i| i.id);
        }
        self.running_revision += 1;
        Some(removed)
    }

    pub fn select_action(&mut self, id: Option<ActionId>) -> Result<(), EngineError> {
        if let Some(id) = id.filter(|&id| self.definition(id).is_none()) {
            return Err(EngineError::UnknownAction(id));
        }
        self.selected_action = id;
        self.definitions_revision += 1;
        Ok(())
    }

    pub fn select_running(&mut self, id: Option<InstanceId>) -> Result<(), EngineError> {
        if let Some(id) = id.filter(|&id| self.instance(id).is_none()) {
            return Err(EngineError::UnknownInstance(id));
        }
        self.selected_running = id;
        self.running_revision += 1;
        Ok(())
    }
}

impl Default for ActionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Element that took the place of a removed one, or the one before it
fn neighbour<T>(items: &[T], removed_index: usize) -> Option<&T> {
    items
        .get(removed_index)
        .or_else(|| removed_index.checked_sub(1).and_then(|i| items.get(i)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_seeds_template_and_selects() {
        let mut store = ActionStore::new();
        let id = store.create(5);
        let def = store.definition(id).unwrap();
        assert_eq!(def.mode, RunMode::Continuous);
        assert!(def.enabled);
        assert_eq!(def.script, DEFAULT_SCRIPT);
        assert_eq!(def.run_interval_ticks, 1);
        assert_eq!(store.selected_action(), Some(id));
        assert_eq!(store.definitions_revision(), 1);
    }

    #[test]
    fn test_save_normalizes_everything() {
        let mut store = ActionStore::new();
        let id = store.create(0);
        let draft = ActionDraft::new("   ", "1", RunMode::Event)
            .interval(-4)
            .setting(SettingDefinition {
                label: "Max Gold!".into(),
                ..SettingDefinition::new("", SettingType::Number, "12.5")
            })
            .setting(SettingDefinition::new("armed", SettingType::Toggle, "yes"))
            .setting(SettingDefinition::new("", SettingType::Text, Value::Null));

        let previous = store.save(id, draft, 9).unwrap();
        assert_eq!(previous, RunMode::Continuous);

        let def = store.definition(id).unwrap();
        assert_eq!(def.name, DEFAULT_ACTION_NAME);
        assert_eq!(def.run_interval_ticks, 1);
        assert_eq!(def.updated_at_ms, 9);

        let keys: Vec<&str> = def.settings.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["max_gold", "armed", "setting_3"]);
        assert_eq!(def.settings[0].label, "Max Gold!");
        assert_eq!(def.settings[0].value, Value::from(12.5));
        assert_eq!(def.settings[1].value, Value::Bool(true));
        assert_eq!(def.settings[1].id, "setting-2");
        assert_eq!(def.settings[2].value, Value::from(""));

        assert_eq!(
            flatten_settings(&def.settings).get("armed"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn test_number_coercion_falls_back_to_zero() {
        assert_eq!(SettingType::Number.coerce(&Value::from("abc")), Value::from(0.0));
        assert_eq!(SettingType::Number.coerce(&Value::from(f64::NAN)), Value::from(0.0));
        assert_eq!(SettingType::Toggle.coerce(&Value::from("off")), Value::Bool(false));
        assert_eq!(SettingType::Text.coerce(&Value::from(3.0)), Value::from("3"));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut store = ActionStore::new();
        let a = store.create(0);
        store.remove_definition(a).unwrap();
        let b = store.create(0);
        assert_ne!(a, b);

        let i1 = store.insert_instance(b, 0).unwrap();
        store.remove_instance(i1);
        let i2 = store.insert_instance(b, 0).unwrap();
        assert_ne!(i1, i2);
    }

    #[test]
    fn test_selection_moves_to_neighbour() {
        let mut store = ActionStore::new();
        let a = store.create(0);
        let b = store.create(0);
        let c = store.create(0);

        store.select_action(Some(b)).unwrap();
        store.remove_definition(b).unwrap();
        assert_eq!(store.selected_action(), Some(c));

        store.remove_definition(c).unwrap();
        assert_eq!(store.selected_action(), Some(a));

        store.remove_definition(a).unwrap();
        assert_eq!(store.selected_action(), None);

        assert_eq!(
            store.select_action(Some(a)),
            Err(EngineError::UnknownAction(a))
        );
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut store = ActionStore::new();
        let action = store.create(0);
        let id = store.insert_instance(action, 0).unwrap();

        assert!(!store.finish(id, InstanceStatus::Running, None, 1));
        assert!(store.finish(id, InstanceStatus::Failed, Some("boom".into()), 1));
        assert!(!store.finish(id, InstanceStatus::Completed, None, 2));

        let instance = store.instance(id).unwrap();
        assert_eq!(instance.status, InstanceStatus::Failed);
        assert_eq!(instance.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_instances_are_isolated_from_later_edits() {
        let mut store = ActionStore::new();
        let action = store.create(0);
        store
            .save(
                action,
                ActionDraft::new("first", "1", RunMode::Continuous)
                    .setting(SettingDefinition::new("n", SettingType::Number, 1.0)),
                0,
            )
            .unwrap();
        let id = store.insert_instance(action, 0).unwrap();
        store
            .save(action, ActionDraft::new("second", "1", RunMode::Once).interval(9), 0)
            .unwrap();

        let instance = store.instance(id).unwrap();
        assert_eq!(instance.name, "first");
        assert_eq!(instance.mode, RunMode::Continuous);
        assert_eq!(instance.settings.len(), 1);
    }

    #[test]
    fn test_touch_and_interval_bump_running_revision() {
        let mut store = ActionStore::new();
        let action = store.create(0);
        let id = store.insert_instance(action, 100).unwrap();
        let revision = store.running_revision();

        store.touch(id, 100);
        store.touch(id, 100);
        assert_eq!(store.instance(id).unwrap().last_updated_ms, 102);
        assert_eq!(store.set_instance_interval(id, 0), Ok(1));
        assert_eq!(store.running_revision(), revision + 3);
        assert_eq!(
            store.set_instance_interval(InstanceId(99), 2),
            Err(EngineError::UnknownInstance(InstanceId(99)))
        );
    }
}
