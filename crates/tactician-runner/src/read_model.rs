use std::sync::Arc;

use tactician_client::Snapshot;
use tactician_events::{ActionId, InstanceId, LogEntry};

use crate::action_store::{ActionDefinition, ActionStore, RunningInstance};

/// Consistent copy of everything presentation code renders. Compare the
/// revisions with a previous copy to skip re-rendering.
#[derive(Debug, Clone, Default)]
pub struct ReadModel {
    pub definitions_revision: u64,
    pub running_revision: u64,
    pub actions: Vec<ActionDefinition>,
    pub running: Vec<RunningInstance>,
    pub selected_action_id: Option<ActionId>,
    pub selected_running_action_id: Option<InstanceId>,
    pub logs: Vec<LogEntry>,
    pub snapshot: Option<Arc<Snapshot>>,
}

impl ReadModel {
    pub(crate) fn capture<'a>(
        store: &ActionStore,
        logs: impl Iterator<Item = &'a LogEntry>,
        snapshot: Option<Arc<Snapshot>>,
    ) -> Self {
        Self {
            definitions_revision: store.definitions_revision(),
            running_revision: store.running_revision(),
            actions: store.definitions().to_vec(),
            running: store.instances().to_vec(),
            selected_action_id: store.selected_action(),
            selected_running_action_id: store.selected_running(),
            logs: logs.cloned().collect(),
            snapshot,
        }
    }

    pub fn action(&self, id: ActionId) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&RunningInstance> {
        self.running.iter().find(|i| i.id == id)
    }

    pub fn instances_of(&self, action: ActionId) -> impl Iterator<Item = &RunningInstance> {
        self.running.iter().filter(move |i| i.action_id == action)
    }

    /// True when nothing a renderer cares about changed since `previous`
    pub fn same_revisions(&self, previous: &ReadModel) -> bool {
        self.definitions_revision == previous.definitions_revision
            && self.running_revision == previous.running_revision
    }
}
