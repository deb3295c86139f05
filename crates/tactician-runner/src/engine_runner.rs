//! Async driver around [`Engine`].
//!
//! The engine itself is synchronous; the driver owns it on one task, calls
//! [`Engine::step`] every `tick_ms` and applies commands sent through an
//! [`EngineHandle`] between cycles, so nothing ever touches the engine
//! concurrently.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use tactician_events::{ActionId, BusEvent, InstanceId};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::read_model::ReadModel;

/// Work applied to the engine between two cycles
pub type EngineCommand = Box<dyn FnOnce(&mut Engine) + Send>;

/// Cloneable remote control of a running engine task
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl EngineHandle {
    /// Run `f` against the engine and wait for its result
    pub async fn call<R, F>(&self, f: F) -> Result<R, EngineError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Engine) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Box::new(move |engine: &mut Engine| {
                let _ = reply_tx.send(f(engine));
            }))
            .map_err(|_| EngineError::EngineStopped)?;
        reply_rx.await.map_err(|_| EngineError::EngineStopped)
    }

    pub async fn create_action(&self) -> Result<ActionId, EngineError> {
        self.call(|engine| engine.create_action()).await
    }

    pub async fn start_action(&self, id: ActionId) -> Result<InstanceId, EngineError> {
        self.call(move |engine| engine.start_action(id)).await?
    }

    pub async fn stop_instance(&self, id: InstanceId) -> Result<(), EngineError> {
        self.call(move |engine| engine.stop_instance(id)).await?
    }

    pub async fn emit(&self, event: BusEvent) -> Result<(), EngineError> {
        self.call(move |engine| engine.emit(event)).await
    }

    pub async fn read_model(&self) -> Result<ReadModel, EngineError> {
        self.call(|engine| engine.read_model()).await
    }

    /// Ask the driver to stop after the current cycle
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Drive `engine` until shutdown is signalled, every command sender is
/// dropped, or (without a shutdown channel) Ctrl+C. Running instances are
/// stopped on the way out and the engine is handed back.
pub async fn run_engine(
    mut engine: Engine,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    mut shutdown_rx: Option<watch::Receiver<bool>>,
) -> Engine {
    let tick_interval = tokio::time::Duration::from_millis(engine.config().tick_ms);
    let mut last_tick = tokio::time::Instant::now();
    info!(target: "engine", "Engine loop started ({}ms ticks)", engine.config().tick_ms);

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(last_tick + tick_interval) => {
                last_tick = tokio::time::Instant::now();
                let summary = engine.step();
                if summary.domain_events > 0 {
                    debug!(target: "engine", "Cycle at tick {:?}: {} domain event(s)", summary.tick, summary.domain_events);
                }
            }
            command = commands.recv() => {
                match command {
                    Some(command) => command(&mut engine),
                    None => {
                        info!(target: "engine", "All engine handles dropped");
                        break;
                    }
                }
            }
            _ = async {
                if let Some(ref mut rx) = shutdown_rx {
                    rx.changed().await
                } else {
                    std::future::pending().await
                }
            } => {
                info!(target: "engine", "Engine received shutdown signal");
                break;
            }
            _ = tokio::signal::ctrl_c(), if shutdown_rx.is_none() => {
                info!(target: "engine", "Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    engine.shutdown();
    info!(target: "engine", "Engine loop stopped");
    engine
}

/// Spawn the driver on the current tokio runtime
pub fn spawn(engine: Engine) -> (EngineHandle, JoinHandle<Engine>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_engine(engine, commands_rx, Some(shutdown_rx)));
    (
        EngineHandle {
            commands: commands_tx,
            shutdown: Arc::new(shutdown_tx),
        },
        task,
    )
}
