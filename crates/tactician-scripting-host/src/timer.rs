use std::collections::BTreeMap;

/// Unique identifier for a timer. Ids increase monotonically and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Type of timer
#[derive(Debug, Clone, Copy)]
enum TimerType {
    /// One-shot timer that fires once and is removed
    OneShot { fire_at: u64 },
    /// Recurring timer that fires repeatedly at an interval
    Recurring { interval: u64, next_fire: u64 },
}

#[derive(Debug, Clone)]
struct Timer<T> {
    payload: T,
    timer_type: TimerType,
}

/// Deterministic timer wheel driven by an explicit millisecond clock.
///
/// Nothing fires on its own: the owner calls [`TimerManager::tick`] with the
/// current time and receives the payloads of every due timer, in id order.
pub struct TimerManager<T> {
    timers: BTreeMap<TimerId, Timer<T>>,
    next_id: u64,
}

impl<T: Clone> TimerManager<T> {
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
            next_id: 0,
        }
    }

    fn insert(&mut self, payload: T, timer_type: TimerType) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.timers.insert(
            id,
            Timer {
                payload,
                timer_type,
            },
        );
        id
    }

    /// Schedule a one-shot timer that fires `delay_ms` after `now_ms`
    pub fn schedule_timer(&mut self, delay_ms: u64, payload: T, now_ms: u64) -> TimerId {
        self.insert(
            payload,
            TimerType::OneShot {
                fire_at: now_ms + delay_ms,
            },
        )
    }

    /// Schedule a recurring timer that fires every `interval_ms`
    pub fn schedule_recurring(&mut self, interval_ms: u64, payload: T, now_ms: u64) -> TimerId {
        let interval = interval_ms.max(1);
        self.insert(
            payload,
            TimerType::Recurring {
                interval,
                next_fire: now_ms + interval,
            },
        )
    }

    /// Cancel a timer. Cancelling twice is harmless.
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Process timers and return every fired timer with its payload
    pub fn tick(&mut self, now_ms: u64) -> Vec<(TimerId, T)> {
        let mut fired = Vec::new();
        let mut to_remove = Vec::new();

        for (id, timer) in self.timers.iter_mut() {
            match &mut timer.timer_type {
                TimerType::OneShot { fire_at } => {
                    if now_ms >= *fire_at {
                        fired.push((*id, timer.payload.clone()));
                        to_remove.push(*id);
                    }
                }
                TimerType::Recurring {
                    interval,
                    next_fire,
                } => {
                    if now_ms >= *next_fire {
                        fired.push((*id, timer.payload.clone()));
                        *next_fire = now_ms + *interval;
                    }
                }
            }
        }

        for id in to_remove {
            self.timers.remove(&id);
        }

        fired
    }

    /// Get the number of active timers
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl<T: Clone> Default for TimerManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_timer() {
        let mut manager = TimerManager::new();
        let id = manager.schedule_timer(50, "test", 0);

        // Should not fire immediately
        assert!(manager.tick(10).is_empty());

        let fired = manager.tick(50);
        assert_eq!(fired, vec![(id, "test")]);

        // Should be removed after firing
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_recurring_timer() {
        let mut manager = TimerManager::new();
        let id = manager.schedule_recurring(100, 7u32, 0);

        assert!(manager.tick(99).is_empty());
        assert_eq!(manager.tick(100), vec![(id, 7)]);
        assert_eq!(manager.active_count(), 1);

        assert!(manager.tick(150).is_empty());
        assert_eq!(manager.tick(200), vec![(id, 7)]);
    }

    #[test]
    fn test_cancel_timer() {
        let mut manager = TimerManager::new();
        let id = manager.schedule_timer(10_000, (), 0);

        assert!(manager.cancel_timer(id));
        assert_eq!(manager.active_count(), 0);
        assert!(!manager.cancel_timer(id)); // Already removed
        assert!(manager.tick(20_000).is_empty());
    }

    #[test]
    fn test_fires_in_id_order() {
        let mut manager = TimerManager::new();
        let a = manager.schedule_timer(30, 'a', 0);
        let b = manager.schedule_recurring(10, 'b', 0);
        let c = manager.schedule_timer(5, 'c', 0);

        let fired = manager.tick(40);
        assert_eq!(fired, vec![(a, 'a'), (b, 'b'), (c, 'c')]);
    }
}
