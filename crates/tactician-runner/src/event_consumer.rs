use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use tactician_events::{DomainEvent, EngineEvent, LogLevel, SessionEvent};

// Re-export EventConsumer from tactician-events
pub use tactician_events::EventConsumer;

/// Event consumer that writes engine events to `tracing` (for the CLI)
#[derive(Debug, Default)]
pub struct LoggingConsumer {
    /// Also log every store commit
    verbose: bool,
}

impl LoggingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose() -> Self {
        Self { verbose: true }
    }
}

impl EventConsumer for LoggingConsumer {
    fn handle_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::StoreChanged {
                definitions_revision,
                running_revision,
            } => {
                if self.verbose {
                    debug!(target: "events", "Store changed (definitions r{}, running r{})", definitions_revision, running_revision);
                }
            }
            EngineEvent::Domain(DomainEvent::StructureBuilt(s)) => {
                info!(target: "events", "STRUCTURE: {} built {} at ({}, {})", s.owner.name, s.structure, s.x, s.y);
            }
            EngineEvent::Domain(DomainEvent::TroopsDonated(d) | DomainEvent::GoldDonated(d)) => {
                info!(target: "events", "DONATION: {} -> {}: {} {:?}", d.sender.name, d.recipient.name, d.amount_display, d.kind);
            }
            EngineEvent::Log(entry) => {
                let mentions: Vec<String> = entry.mentions.iter().map(|m| m.to_string()).collect();
                let line = if mentions.is_empty() {
                    entry.message.clone()
                } else {
                    format!("{} {}", entry.message, mentions.join(" "))
                };
                match entry.level {
                    LogLevel::Debug => debug!(target: "events", "[{}] {}", entry.label, line),
                    LogLevel::Info => info!(target: "events", "[{}] {}", entry.label, line),
                    LogLevel::Warn => warn!(target: "events", "[{}] {}", entry.label, line),
                    LogLevel::Error => error!(target: "events", "[{}] {}", entry.label, line),
                }
            }
            EngineEvent::Session(SessionEvent::Detached { reason }) => {
                warn!(target: "events", "SESSION: detached ({})", reason);
            }
            EngineEvent::Session(session) => {
                info!(target: "events", "SESSION: {:?}", session);
            }
        }
    }
}

/// Forwards engine events to an async receiver, e.g. a UI task
pub struct ChannelConsumer {
    tx: UnboundedSender<EngineEvent>,
}

impl ChannelConsumer {
    pub fn new(tx: UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl EventConsumer for ChannelConsumer {
    fn handle_event(&mut self, event: &EngineEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!(target: "events", "Event receiver dropped");
        }
    }
}
