use tactician_events::{ActionId, InstanceId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("No action definition with id {0}")]
    UnknownAction(ActionId),

    #[error("No running instance with id {0}")]
    UnknownInstance(InstanceId),

    #[error("Action {0} is disabled")]
    ActionDisabled(ActionId),

    #[error("Engine has stopped")]
    EngineStopped,
}
