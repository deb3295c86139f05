//! Runtime controllers for running instances.
//!
//! Every `running` instance that needs to outlive its start call owns exactly
//! one [`Controller`]: Continuous instances a heartbeat timer, Event instances
//! their cleanup routine. Finished instances get a one-shot grace timer after
//! which the engine removes them.

use std::collections::HashMap;

use tracing::{debug, trace};

use tactician_events::InstanceId;
use tactician_scripting_host::{Cleanup, TimerId, TimerManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTask {
    Heartbeat(InstanceId),
    Remove(InstanceId),
}

pub enum Controller {
    Continuous {
        heartbeat: TimerId,
        /// Game tick of the last execution, or of the start
        last_executed_tick: Option<u64>,
        /// Cleanup returned by the latest execution
        cleanup: Option<Box<dyn Cleanup>>,
    },
    Event {
        cleanup: Option<Box<dyn Cleanup>>,
    },
}

impl Controller {
    pub fn into_cleanup(self) -> Option<Box<dyn Cleanup>> {
        match self {
            Controller::Continuous { cleanup, .. } | Controller::Event { cleanup } => cleanup,
        }
    }
}

pub struct Scheduler {
    tick_ms: u64,
    grace_period_ms: u64,
    timers: TimerManager<TimerTask>,
    controllers: HashMap<InstanceId, Controller>,
    removals: HashMap<InstanceId, TimerId>,
}

impl Scheduler {
    pub fn new(tick_ms: u64, grace_period_ms: u64) -> Self {
        Self {
            tick_ms: tick_ms.max(1),
            grace_period_ms,
            timers: TimerManager::new(),
            controllers: HashMap::new(),
            removals: HashMap::new(),
        }
    }

    /// Start the heartbeat of a Continuous instance. `start_tick` is the
    /// current game tick, or `None` while detached.
    pub fn attach_heartbeat(&mut self, instance: InstanceId, start_tick: Option<u64>, now_ms: u64) {
        let heartbeat = self
            .timers
            .schedule_recurring(self.tick_ms, TimerTask::Heartbeat(instance), now_ms);
        debug!(target: "actions", "Heartbeat {:?} attached to {}", heartbeat, instance);
        self.replace(
            instance,
            Controller::Continuous {
                heartbeat,
                last_executed_tick: start_tick,
                cleanup: None,
            },
        );
    }

    pub fn attach_event(&mut self, instance: InstanceId, cleanup: Option<Box<dyn Cleanup>>) {
        self.replace(instance, Controller::Event { cleanup });
    }

    fn replace(&mut self, instance: InstanceId, controller: Controller) {
        if let Some(old) = self.controllers.insert(instance, controller) {
            self.cancel(&old);
        }
    }

    fn cancel(&mut self, controller: &Controller) {
        if let Controller::Continuous { heartbeat, .. } = controller {
            self.timers.cancel_timer(*heartbeat);
        }
    }

    /// Keep the latest cleanup of a Continuous execution
    pub fn set_cleanup(&mut self, instance: InstanceId, new: Option<Box<dyn Cleanup>>) {
        if new.is_none() {
            return;
        }
        if let Some(Controller::Continuous { cleanup, .. } | Controller::Event { cleanup }) =
            self.controllers.get_mut(&instance)
        {
            *cleanup = new;
        }
    }

    /// Dispose the controller of `instance`, clearing its heartbeat. Returns
    /// it so the caller can run the cleanup routine. Idempotent.
    pub fn detach(&mut self, instance: InstanceId) -> Option<Controller> {
        let controller = self.controllers.remove(&instance)?;
        self.cancel(&controller);
        debug!(target: "actions", "Controller of {} disposed", instance);
        Some(controller)
    }

    /// Whether a Continuous instance is due at `tick`. Records the tick when
    /// it is. A tick that went backwards restarts the count.
    pub fn continuous_due(&mut self, instance: InstanceId, tick: u64, interval: u64) -> bool {
        let Some(Controller::Continuous {
            last_executed_tick, ..
        }) = self.controllers.get_mut(&instance)
        else {
            return false;
        };
        let Some(last) = *last_executed_tick else {
            *last_executed_tick = Some(tick);
            return false;
        };
        if tick < last {
            trace!(target: "actions", "Tick went backwards for {} ({} < {})", instance, tick, last);
            *last_executed_tick = Some(tick);
            return false;
        }
        if tick - last >= interval.max(1) {
            *last_executed_tick = Some(tick);
            return true;
        }
        false
    }

    pub fn schedule_removal(&mut self, instance: InstanceId, now_ms: u64) {
        let timer = self
            .timers
            .schedule_timer(self.grace_period_ms, TimerTask::Remove(instance), now_ms);
        if let Some(previous) = self.removals.insert(instance, timer) {
            self.timers.cancel_timer(previous);
        }
    }

    pub fn cancel_removal(&mut self, instance: InstanceId) {
        if let Some(timer) = self.removals.remove(&instance) {
            self.timers.cancel_timer(timer);
        }
    }

    /// Timer tasks due at `now_ms`, in scheduling order
    pub fn due(&mut self, now_ms: u64) -> Vec<TimerTask> {
        let fired = self.timers.tick(now_ms);
        fired
            .into_iter()
            .map(|(_, task)| {
                if let TimerTask::Remove(instance) = task {
                    self.removals.remove(&instance);
                }
                task
            })
            .collect()
    }

    pub fn has_controller(&self, instance: InstanceId) -> bool {
        self.controllers.contains_key(&instance)
    }

    pub fn has_heartbeat(&self, instance: InstanceId) -> bool {
        matches!(
            self.controllers.get(&instance),
            Some(Controller::Continuous { heartbeat, .. }) if self.timers.is_active(*heartbeat)
        )
    }

    pub fn has_pending_removal(&self, instance: InstanceId) -> bool {
        self.removals.contains_key(&instance)
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    /// Live timers of any kind
    pub fn active_timers(&self) -> usize {
        self.timers.active_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactician_scripting_host::{ScriptContext, ScriptError};

    const A: InstanceId = InstanceId(1);

    #[test]
    fn test_interval_counts_from_start_tick() {
        let mut scheduler = Scheduler::new(100, 1000);
        scheduler.attach_heartbeat(A, Some(10), 0);
        let executed: Vec<u64> = (11..=20)
            .filter(|tick| scheduler.continuous_due(A, *tick, 3))
            .collect();
        assert_eq!(executed, vec![13, 16, 19]);
    }

    #[test]
    fn test_detached_start_seeds_on_first_tick() {
        let mut scheduler = Scheduler::new(100, 1000);
        scheduler.attach_heartbeat(A, None, 0);
        assert!(!scheduler.continuous_due(A, 50, 1));
        assert!(scheduler.continuous_due(A, 51, 1));
        // Backwards tick resets instead of underflowing
        assert!(!scheduler.continuous_due(A, 2, 1));
        assert!(scheduler.continuous_due(A, 3, 1));
    }

    #[test]
    fn test_heartbeat_fires_every_tick_until_detached() {
        let mut scheduler = Scheduler::new(100, 1000);
        scheduler.attach_heartbeat(A, Some(0), 0);
        assert!(scheduler.due(50).is_empty());
        assert_eq!(scheduler.due(100), vec![TimerTask::Heartbeat(A)]);
        assert_eq!(scheduler.due(200), vec![TimerTask::Heartbeat(A)]);
        assert!(scheduler.has_heartbeat(A));

        assert!(scheduler.detach(A).is_some());
        assert!(scheduler.detach(A).is_none());
        assert!(!scheduler.has_heartbeat(A));
        assert!(scheduler.due(300).is_empty());
        assert_eq!(scheduler.active_timers(), 0);
    }

    #[test]
    fn test_removal_fires_once_and_can_be_cancelled() {
        let mut scheduler = Scheduler::new(100, 1000);
        let b = InstanceId(2);
        scheduler.schedule_removal(A, 0);
        scheduler.schedule_removal(b, 0);
        scheduler.cancel_removal(b);

        assert!(scheduler.due(999).is_empty());
        assert_eq!(scheduler.due(1000), vec![TimerTask::Remove(A)]);
        assert!(!scheduler.has_pending_removal(A));
        assert_eq!(scheduler.active_timers(), 0);
    }

    #[test]
    fn test_event_controller_hands_back_cleanup() {
        let mut scheduler = Scheduler::new(100, 1000);
        let cleanup: Box<dyn Cleanup> =
            Box::new(|_ctx: &mut ScriptContext| -> Result<(), ScriptError> { Ok(()) });
        scheduler.attach_event(A, Some(cleanup));
        assert!(scheduler.has_controller(A));
        assert!(!scheduler.has_heartbeat(A));
        let controller = scheduler.detach(A).unwrap();
        assert!(controller.into_cleanup().is_some());
    }
}
