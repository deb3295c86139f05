/// Core event system traits and shared types for tactician
///
/// This crate provides the vocabulary shared by the synchronizer, the scripting
/// host and the runner, so that consumers can be written without depending on
/// the engine itself.
mod domain_events;
mod ids;
mod log_events;
mod value;

pub use domain_events::{
    ActorRef, BusEvent, Donation, DonationDirection, DonationKind, DomainEvent, GOLD_DONATED,
    STRUCTURE_BUILT, StructureBuilt, TROOPS_DONATED, clan_tag_of,
};
pub use ids::{ActionId, InstanceId, RunMode};
pub use log_events::{LogEntry, LogLevel, Mention};
pub use value::Value;

// ============================================================================
// Engine Events
// ============================================================================

/// Why the synchronizer dropped or reset its session-scoped memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A live game object was discovered and attached
    Attached,
    /// The game object stopped answering and was dropped
    Detached { reason: String },
    /// The roster went from empty to populated
    RosterRepopulated,
    /// The locally controlled player changed identity
    SelfChanged { from: String, to: String },
}

/// Everything an observer of the engine can be told about
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A store commit finished; revisions are the values after the commit
    StoreChanged {
        definitions_revision: u64,
        running_revision: u64,
    },
    /// A structured fact mined from the game this cycle
    Domain(DomainEvent),
    /// A log line written by an action instance or by the engine
    Log(LogEntry),
    /// Synchronizer session lifecycle
    Session(SessionEvent),
}

// ============================================================================
// Event Consumer Trait
// ============================================================================

/// Trait for observing the engine - allows different implementations for CLI vs overlays
pub trait EventConsumer: Send + 'static {
    /// Handle an engine event. Called synchronously right after the commit that produced it.
    fn handle_event(&mut self, event: &EngineEvent);
}

// Allow closures to be used as consumers
impl<F> EventConsumer for F
where
    F: FnMut(&EngineEvent) + Send + 'static,
{
    fn handle_event(&mut self, event: &EngineEvent) {
        (self)(event)
    }
}
