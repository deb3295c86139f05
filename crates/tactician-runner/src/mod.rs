pub mod action_store;
pub mod engine;
mod engine_runner;
pub mod error;
mod event_consumer;
pub mod logging;
mod read_model;
pub mod scheduler;

pub use action_store::{
    ActionDefinition, ActionDraft, ActionStore, InstanceStatus, RunningInstance, SettingDefinition,
    SettingType,
};
pub use engine::{Engine, StepSummary};
pub use engine_runner::{EngineCommand, EngineHandle, run_engine, spawn};
pub use error::EngineError;
pub use event_consumer::{ChannelConsumer, EventConsumer, LoggingConsumer};
pub use read_model::ReadModel;
