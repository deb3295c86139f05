//! The automation engine.
//!
//! One [`Engine`] owns the synchronizer, the telemetry extractor, the action
//! store, the scheduler and the event bus. Everything runs on the caller's
//! thread: [`Engine::step`] is one cooperative cycle and every public
//! operation commits atomically before observers are notified.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use tactician_client::config::{EngineConfig, TacticianConfig};
use tactician_client::{Clock, GameLocator, Snapshot, Synchronizer, TelemetryExtractor};
use tactician_events::{
    ActionId, BusEvent, DomainEvent, EngineEvent, EventConsumer, InstanceId, LogEntry, RunMode,
    Value,
};
use tactician_scripting_host::{
    Cleanup, Dispatch, EventBus, GameFacade, InstanceLogger, RunMeta, ScriptCompiler,
    ScriptContext, ScriptError, ScriptOutcome, ScriptRegistry, invoke, run_cleanup,
};

use crate::action_store::{ActionDraft, ActionStore, InstanceStatus, flatten_settings};
use crate::error::EngineError;
use crate::read_model::ReadModel;
use crate::scheduler::{Controller, Scheduler, TimerTask};

/// Bus events processed per drain before the rest is dropped. Bounds
/// handlers that keep re-emitting the event they listen to.
const MAX_CHAINED_EVENTS: usize = 1024;

/// What one [`Engine::step`] observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepSummary {
    /// Game tick of this cycle; `None` while detached
    pub tick: Option<u64>,
    pub domain_events: usize,
    pub timer_tasks: usize,
}

pub struct Engine {
    config: EngineConfig,
    clock: Box<dyn Clock>,
    sync: Synchronizer,
    telemetry: TelemetryExtractor,
    store: ActionStore,
    scheduler: Scheduler,
    bus: EventBus,
    compiler: Box<dyn ScriptCompiler>,
    /// Per-instance script state, fresh for every instance
    states: HashMap<InstanceId, Value>,
    logs: VecDeque<LogEntry>,
    pending_events: VecDeque<BusEvent>,
    consumers: Vec<Box<dyn EventConsumer>>,
    /// Revisions last announced to consumers
    notified: (u64, u64),
}

impl Engine {
    pub fn new(locator: Box<dyn GameLocator>, clock: Box<dyn Clock>, config: &TacticianConfig) -> Self {
        let config_engine = config.engine.clone().normalized();
        Self {
            sync: Synchronizer::new(locator, &config_engine),
            telemetry: TelemetryExtractor::new(config_engine.dedup_horizon_ticks),
            store: ActionStore::new(),
            scheduler: Scheduler::new(config_engine.tick_ms, config_engine.grace_period_ms),
            bus: EventBus::new(),
            compiler: Box::new(ScriptRegistry::from_config(&config.scripting)),
            states: HashMap::new(),
            logs: VecDeque::new(),
            pending_events: VecDeque::new(),
            consumers: Vec::new(),
            notified: (0, 0),
            clock,
            config: config_engine,
        }
    }

    /// Replace the script compiler (e.g. a registry with extra native scripts)
    pub fn with_compiler(mut self, compiler: impl ScriptCompiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    pub fn add_consumer(&mut self, consumer: impl EventConsumer) {
        self.consumers.push(Box::new(consumer));
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &ActionStore {
        &self.store
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.sync.snapshot()
    }

    pub fn is_attached(&self) -> bool {
        self.sync.is_attached()
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn read_model(&self) -> ReadModel {
        ReadModel::capture(&self.store, self.logs.iter(), self.sync.snapshot())
    }

    pub fn instance_state(&self, instance: InstanceId) -> Option<&Value> {
        self.states.get(&instance)
    }

    pub fn subscription_count(&self, instance: InstanceId) -> usize {
        self.bus.count_for(instance)
    }

    pub fn has_heartbeat(&self, instance: InstanceId) -> bool {
        self.scheduler.has_heartbeat(instance)
    }

    pub fn has_pending_removal(&self, instance: InstanceId) -> bool {
        self.scheduler.has_pending_removal(instance)
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    pub fn create_action(&mut self) -> ActionId {
        let id = self.store.create(self.clock.now_ms());
        info!(target: "actions", "Created {}", id);
        self.notify_if_changed();
        id
    }

    /// Replace a definition's editable fields.
    ///
    /// Leaving Event mode stops the definition's Event instances; being in
    /// Event mode while enabled ensures exactly one Event run.
    pub fn save_action(&mut self, id: ActionId, draft: ActionDraft) -> Result<(), EngineError> {
        let now = self.clock.now_ms();
        let previous = self.store.save(id, draft, now)?;
        let (mode, enabled) = self.mode_and_enabled(id)?;

        if previous == RunMode::Event && mode != RunMode::Event {
            for instance in self.store.running_ids(id, Some(RunMode::Event)) {
                self.finish(instance, InstanceStatus::Stopped, None, now);
            }
        }
        if mode == RunMode::Event && enabled {
            self.ensure_event_run(id, now);
        }

        debug!(target: "actions", "Saved {} ({})", id, mode);
        self.settle();
        Ok(())
    }

    pub fn set_enabled(&mut self, id: ActionId, enabled: bool) -> Result<(), EngineError> {
        let now = self.clock.now_ms();
        self.store.set_enabled(id, enabled, now)?;
        let (mode, _) = self.mode_and_enabled(id)?;

        if !enabled {
            for instance in self.store.running_ids(id, None) {
                self.finish(instance, InstanceStatus::Stopped, None, now);
            }
        } else if mode == RunMode::Event {
            self.ensure_event_run(id, now);
        }

        info!(target: "actions", "{} {}", id, if enabled { "enabled" } else { "disabled" });
        self.settle();
        Ok(())
    }

    /// Stop and drop every instance of a definition, then remove it. No
    /// grace timers or subscriptions referencing it survive.
    pub fn delete_action(&mut self, id: ActionId) -> Result<(), EngineError> {
        if self.store.definition(id).is_none() {
            return Err(EngineError::UnknownAction(id));
        }
        let now = self.clock.now_ms();
        for instance in self.store.instance_ids(id) {
            self.finish(instance, InstanceStatus::Stopped, None, now);
            self.remove_instance(instance);
        }
        self.store.remove_definition(id)?;

        info!(target: "actions", "Deleted {}", id);
        self.settle();
        Ok(())
    }

    pub fn select_action(&mut self, id: Option<ActionId>) -> Result<(), EngineError> {
        self.store.select_action(id)?;
        self.notify_if_changed();
        Ok(())
    }

    pub fn select_running(&mut self, id: Option<InstanceId>) -> Result<(), EngineError> {
        self.store.select_running(id)?;
        self.notify_if_changed();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Start an instance of an enabled definition. Starting an Event-mode
    /// definition that already has a running Event instance returns that one.
    pub fn start_action(&mut self, id: ActionId) -> Result<InstanceId, EngineError> {
        let (mode, enabled) = self.mode_and_enabled(id)?;
        if !enabled {
            return Err(EngineError::ActionDisabled(id));
        }
        if mode == RunMode::Event {
            if let Some(&existing) = self.store.running_ids(id, Some(RunMode::Event)).first() {
                return Ok(existing);
            }
        }

        let instance = self.launch(id, self.clock.now_ms())?;
        self.settle();
        Ok(instance)
    }

    /// Stop a running instance. Stopping a finished one is a no-op.
    pub fn stop_instance(&mut self, id: InstanceId) -> Result<(), EngineError> {
        if self.store.instance(id).is_none() {
            return Err(EngineError::UnknownInstance(id));
        }
        self.finish(id, InstanceStatus::Stopped, None, self.clock.now_ms());
        self.settle();
        Ok(())
    }

    /// Change how often a Continuous instance runs, without restarting it
    pub fn set_instance_interval(&mut self, id: InstanceId, ticks: i64) -> Result<u64, EngineError> {
        let interval = self.store.set_instance_interval(id, ticks)?;
        debug!(target: "actions", "Interval of {} set to {} tick(s)", id, interval);
        self.notify_if_changed();
        Ok(interval)
    }

    /// Publish an externally supplied event to every subscriber
    pub fn emit(&mut self, event: BusEvent) {
        self.pending_events.push_back(event);
        self.settle();
    }

    /// Stop every running instance
    pub fn shutdown(&mut self) {
        let now = self.clock.now_ms();
        let running: Vec<InstanceId> = self
            .store
            .instances()
            .iter()
            .filter(|i| i.is_running())
            .map(|i| i.id)
            .collect();
        for id in running {
            self.finish(id, InstanceStatus::Stopped, None, now);
        }
        self.settle();
    }

    // ------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------

    /// One cooperative cycle: synchronize, extract, dispatch, then run due
    /// heartbeats and grace removals.
    pub fn step(&mut self) -> StepSummary {
        let now = self.clock.now_ms();
        let mut summary = StepSummary::default();

        let report = self.sync.poll(now);
        if report.invalidates_session() {
            self.telemetry.reset();
        }
        for event in report.session_events {
            self.publish(EngineEvent::Session(event));
        }

        let mut domain = Vec::new();
        if let Some(cycle) = report.cycle {
            summary.tick = Some(cycle.snapshot.tick);
            domain.extend(
                cycle
                    .structures_built
                    .into_iter()
                    .map(DomainEvent::StructureBuilt),
            );
            if let Some(batch) = &cycle.update_batch {
                domain.extend(self.telemetry.extract(batch, &cycle.snapshot));
            }
        }
        summary.domain_events = domain.len();
        for event in domain {
            trace!(target: "engine", "Domain event {} at tick {}", event.name(), event.tick());
            self.pending_events.push_back(event.to_bus_event());
            self.publish(EngineEvent::Domain(event));
        }
        self.drain_events();

        let tasks = self.scheduler.due(now);
        summary.timer_tasks = tasks.len();
        for task in tasks {
            match task {
                TimerTask::Heartbeat(id) => self.heartbeat(id, now),
                TimerTask::Remove(id) => {
                    debug!(target: "actions", "Grace period over for {}", id);
                    self.remove_instance(id);
                }
            }
        }

        self.settle();
        summary
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn mode_and_enabled(&self, id: ActionId) -> Result<(RunMode, bool), EngineError> {
        self.store
            .definition(id)
            .map(|d| (d.mode, d.enabled))
            .ok_or(EngineError::UnknownAction(id))
    }

    fn ensure_event_run(&mut self, id: ActionId, now: u64) {
        if !self.store.running_ids(id, Some(RunMode::Event)).is_empty() {
            return;
        }
        if let Err(e) = self.launch(id, now) {
            warn!(target: "actions", "Could not start event run of {}: {}", id, e);
        }
    }

    fn launch(&mut self, action: ActionId, now: u64) -> Result<InstanceId, EngineError> {
        let id = self.store.insert_instance(action, now)?;
        let mode = self
            .store
            .instance(id)
            .map(|i| i.mode)
            .ok_or(EngineError::UnknownInstance(id))?;
        info!(target: "actions", "Started {} of {} ({})", id, action, mode);

        match mode {
            RunMode::Once => match self.execute(id, now) {
                Ok(outcome) => {
                    if let Some(cleanup) = outcome.cleanup {
                        self.run_cleanup_routine(id, cleanup, now);
                    }
                    self.finish(id, InstanceStatus::Completed, None, now);
                }
                Err(e) => self.finish(id, InstanceStatus::Failed, Some(e), now),
            },
            RunMode::Continuous => {
                let tick = self.sync.snapshot().map(|s| s.tick);
                self.scheduler.attach_heartbeat(id, tick, now);
            }
            RunMode::Event => match self.execute(id, now) {
                Ok(outcome) => {
                    self.scheduler.attach_event(id, outcome.cleanup);
                    debug!(target: "actions", "{} listening with {} subscription(s)", id, self.bus.count_for(id));
                }
                Err(e) => self.finish(id, InstanceStatus::Failed, Some(e), now),
            },
        }
        Ok(id)
    }

    fn heartbeat(&mut self, id: InstanceId, now: u64) {
        let Some(instance) = self.store.instance(id).filter(|i| i.is_running()) else {
            // Fired after the instance left `running`
            self.scheduler.detach(id);
            return;
        };
        let interval = instance.run_interval_ticks;
        let Some(tick) = self.sync.snapshot().map(|s| s.tick) else {
            trace!(target: "actions", "Detached, skipping heartbeat of {}", id);
            return;
        };
        if !self.scheduler.continuous_due(id, tick, interval) {
            return;
        }
        trace!(target: "actions", "Executing {} at tick {}", id, tick);
        match self.execute(id, now) {
            Ok(outcome) => self.scheduler.set_cleanup(id, outcome.cleanup),
            Err(e) => self.finish(id, InstanceStatus::Failed, Some(e), now),
        }
    }

    /// Compile the definition's current script and run it once
    fn execute(&mut self, id: InstanceId, now: u64) -> Result<ScriptOutcome, ScriptError> {
        let source = self
            .store
            .instance(id)
            .and_then(|i| self.store.definition(i.action_id))
            .map(|d| d.script.clone())
            .ok_or_else(|| ScriptError::runtime(format!("definition of {} no longer exists", id)))?;
        let Some(mut ctx) = self.begin(id, now) else {
            return Err(ScriptError::runtime(format!("{} no longer exists", id)));
        };

        let result = self
            .compiler
            .compile(&source)
            .and_then(|mut script| invoke(script.as_mut(), &mut ctx));

        self.end(id, ctx);
        self.store.touch(id, now);
        result
    }

    /// Move an instance out of `running`: dispose its controller and
    /// subscriptions first, then flip the status and arm the grace timer.
    fn finish(&mut self, id: InstanceId, status: InstanceStatus, error: Option<ScriptError>, now: u64) {
        let Some(label) = self
            .store
            .instance(id)
            .filter(|i| i.is_running())
            .map(|i| i.label())
        else {
            return;
        };

        if let Some(cleanup) = self.scheduler.detach(id).and_then(Controller::into_cleanup) {
            self.run_cleanup_routine(id, cleanup, now);
        }
        let released = self.bus.dispose(id);

        if let Some(error) = &error {
            let mut log = InstanceLogger::new(Some(id), label.clone(), now);
            log.error(format!("Execution failed: {}", error));
            for entry in log.take_entries() {
                self.push_log(entry);
            }
        }

        self.store.finish(id, status, error.map(|e| e.to_string()), now);
        self.scheduler.schedule_removal(id, now);
        info!(target: "actions", "{} is {} ({} subscription(s) released)", label, status, released);
    }

    fn run_cleanup_routine(&mut self, id: InstanceId, cleanup: Box<dyn Cleanup>, now: u64) {
        let Some(mut ctx) = self.begin(id, now) else {
            return;
        };
        if let Err(e) = run_cleanup(cleanup, &mut ctx) {
            ctx.log.error(format!("Cleanup failed: {}", e));
        }
        self.end(id, ctx);
    }

    fn remove_instance(&mut self, id: InstanceId) {
        self.scheduler.cancel_removal(id);
        self.scheduler.detach(id);
        self.bus.dispose(id);
        self.states.remove(&id);
        if self.store.remove_instance(id).is_some() {
            debug!(target: "actions", "Removed {}", id);
        }
    }

    /// Build the context of one invocation. Moves the instance state out.
    fn begin(&mut self, id: InstanceId, now: u64) -> Option<ScriptContext> {
        let instance = self.store.instance(id)?;
        let mut meta = RunMeta::new(instance.action_id, id, instance.name.clone(), instance.mode);
        meta.run_interval_ticks = instance.run_interval_ticks;
        meta.execution = instance.executions;
        meta.started_at_ms = instance.started_at_ms;
        meta.now_ms = now;
        let settings = flatten_settings(&instance.settings);
        let state = self.states.remove(&id).unwrap_or_else(Value::map);

        Some(ScriptContext::new(
            GameFacade::new(self.sync.snapshot()),
            settings,
            state,
            meta,
            self.bus.handle(id),
        ))
    }

    /// Take back what an invocation produced: state, trade commands, bus
    /// changes and log lines.
    fn end(&mut self, id: InstanceId, ctx: ScriptContext) {
        let ScriptContext {
            mut game,
            state,
            mut log,
            bus,
            ..
        } = ctx;
        self.states.insert(id, state);

        for command in game.take_commands() {
            match self.sync.set_embargo(&command.target, command.stopped) {
                Ok(()) => debug!(
                    target: "actions",
                    "{} set trade with {} to {}",
                    id,
                    command.target,
                    if command.stopped { "stopped" } else { "allowed" }
                ),
                Err(e) => log.warn(format!("Trade command for {} failed: {}", command.target, e)),
            }
        }

        let emitted = self.bus.commit(bus);
        self.pending_events.extend(emitted);
        for entry in log.take_entries() {
            self.push_log(entry);
        }
    }

    fn drain_events(&mut self) {
        let mut processed = 0;
        while let Some(event) = self.pending_events.pop_front() {
            processed += 1;
            if processed > MAX_CHAINED_EVENTS {
                warn!(
                    target: "events",
                    "Dropping {} chained event(s) after '{}'",
                    self.pending_events.len() + 1,
                    event.name
                );
                self.pending_events.clear();
                break;
            }
            self.deliver(&event);
        }
    }

    /// Offer one event to its subscribers in registration order
    fn deliver(&mut self, event: &BusEvent) {
        let now = self.clock.now_ms();
        for (subscription, owner) in self.bus.targets(&event.name) {
            if !self.store.instance(owner).is_some_and(|i| i.is_running()) {
                continue;
            }
            let Some(mut ctx) = self.begin(owner, now) else {
                continue;
            };
            let outcome = self.bus.dispatch(subscription, event, &mut ctx);
            if let Dispatch::Attempted(Err(e)) = &outcome {
                ctx.log
                    .error(format!("Handler for '{}' failed: {}", event.name, e));
            }
            self.end(owner, ctx);
            if matches!(outcome, Dispatch::Attempted(_) | Dispatch::Filtered) {
                self.store.touch(owner, now);
            }
        }
    }

    fn push_log(&mut self, entry: LogEntry) {
        self.logs.push_back(entry.clone());
        while self.logs.len() > self.config.log_capacity {
            self.logs.pop_front();
        }
        self.publish(EngineEvent::Log(entry));
    }

    fn publish(&mut self, event: EngineEvent) {
        for consumer in &mut self.consumers {
            consumer.handle_event(&event);
        }
    }

    /// Deliver queued events, then tell observers about store changes
    fn settle(&mut self) {
        self.drain_events();
        self.notify_if_changed();
    }

    fn notify_if_changed(&mut self) {
        let revisions = (
            self.store.definitions_revision(),
            self.store.running_revision(),
        );
        if revisions != self.notified {
            self.notified = revisions;
            self.publish(EngineEvent::StoreChanged {
                definitions_revision: revisions.0,
                running_revision: revisions.1,
            });
        }
    }
}
