/// Script sandbox for tactician actions
///
/// Scripts are compiled from their current text on every execution attempt and
/// invoked with a [`ScriptContext`], the only surface they can reach: a narrow
/// game facade, flattened settings, per-instance state, run metadata, an
/// instance-scoped logger and an event bus handle.
use std::panic::{AssertUnwindSafe, catch_unwind};

use tactician_events::Value;

pub mod context;
pub mod dsl;
pub mod error;
pub mod event_bus;
pub mod facade;
pub mod logger;
pub mod registry;
pub mod scripts;
pub mod timer;

pub use context::{RunMeta, ScriptContext};
pub use dsl::DslCompiler;
pub use error::ScriptError;
pub use event_bus::{BusHandle, Delivery, Dispatch, EventBus, SubscriptionId, UNKNOWN_GROUP};
pub use facade::{GameFacade, TradeCommand};
pub use logger::InstanceLogger;
pub use registry::ScriptRegistry;
pub use timer::{TimerId, TimerManager};

/// A compiled, invocable script body
pub trait Script: Send {
    /// Execute the body once
    fn run(&mut self, ctx: &mut ScriptContext) -> Result<ScriptOutcome, ScriptError>;
}

/// Turns script text into a [`Script`]
pub trait ScriptCompiler: Send {
    fn compile(&self, source: &str) -> Result<Box<dyn Script>, ScriptError>;
}

/// Routine a script hands back to run when its instance stops
pub trait Cleanup: Send {
    fn run(self: Box<Self>, ctx: &mut ScriptContext) -> Result<(), ScriptError>;
}

impl<F> Cleanup for F
where
    F: FnOnce(&mut ScriptContext) -> Result<(), ScriptError> + Send,
{
    fn run(self: Box<Self>, ctx: &mut ScriptContext) -> Result<(), ScriptError> {
        (*self)(ctx)
    }
}

/// Result of one execution
#[derive(Default)]
pub struct ScriptOutcome {
    pub value: Value,
    pub cleanup: Option<Box<dyn Cleanup>>,
}

impl ScriptOutcome {
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            cleanup: None,
        }
    }

    pub fn with_cleanup(mut self, cleanup: impl Cleanup + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

/// Run a script body, containing panics as [`ScriptError::Panicked`]
pub fn invoke(script: &mut dyn Script, ctx: &mut ScriptContext) -> Result<ScriptOutcome, ScriptError> {
    match catch_unwind(AssertUnwindSafe(|| script.run(ctx))) {
        Ok(result) => result,
        Err(payload) => Err(ScriptError::from_panic(payload)),
    }
}

/// Run a cleanup routine, containing panics as [`ScriptError::Panicked`]
pub fn run_cleanup(cleanup: Box<dyn Cleanup>, ctx: &mut ScriptContext) -> Result<(), ScriptError> {
    match catch_unwind(AssertUnwindSafe(|| cleanup.run(ctx))) {
        Ok(result) => result,
        Err(payload) => Err(ScriptError::from_panic(payload)),
    }
}
