//! Per-instance publish/subscribe.
//!
//! Scripts never touch the [`EventBus`] directly. Each invocation receives a
//! [`BusHandle`] that records new subscriptions, removals and emitted events;
//! the engine commits the handle back into the bus once the invocation
//! returns. Subscriptions are grouped by owning instance so that everything
//! an instance registered can be disposed in one call.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use tactician_events::{BusEvent, InstanceId, Value};

use crate::{ScriptContext, ScriptError};

/// Grouping bucket for events with an absent or empty team/clan field
pub const UNKNOWN_GROUP: &str = "unknown";

pub type Handler = Box<dyn FnMut(&BusEvent, &mut ScriptContext) -> Result<(), ScriptError> + Send>;

/// Predicate gating a handler. A failing predicate counts as a failed delivery.
pub type Filter = Box<dyn FnMut(&BusEvent, &mut ScriptContext) -> Result<bool, ScriptError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// How often a subscription accepts deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Every,
    /// Unregistered after the first accepted delivery
    Once,
    /// At most once per distinct `team` value
    OncePerTeam,
    /// At most once per distinct `clan` value
    OncePerClan,
}

/// Grouping key of a payload field.
///
/// An absent or empty field maps to [`UNKNOWN_GROUP`]; an explicit null
/// yields `None`, which suppresses delivery.
pub fn group_key(payload: &Value, field: &str) -> Option<String> {
    match payload.get(field) {
        None => Some(UNKNOWN_GROUP.to_string()),
        Some(Value::Null) => None,
        Some(Value::Text(s)) if s.trim().is_empty() => Some(UNKNOWN_GROUP.to_string()),
        Some(Value::Text(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

struct PendingSubscription {
    id: SubscriptionId,
    event: String,
    delivery: Delivery,
    filter: Option<Filter>,
    handler: Handler,
}

/// Subscription recorder handed to a single script invocation
pub struct BusHandle {
    owner: InstanceId,
    ids: Arc<AtomicU64>,
    added: Vec<PendingSubscription>,
    removed: Vec<SubscriptionId>,
    emitted: Vec<BusEvent>,
}

impl BusHandle {
    /// A handle not connected to any bus; commits are simply dropped
    pub fn detached(owner: InstanceId) -> Self {
        Self::with_counter(owner, Arc::new(AtomicU64::new(0)))
    }

    fn with_counter(owner: InstanceId, ids: Arc<AtomicU64>) -> Self {
        Self {
            owner,
            ids,
            added: Vec::new(),
            removed: Vec::new(),
            emitted: Vec::new(),
        }
    }

    pub fn owner(&self) -> InstanceId {
        self.owner
    }

    pub fn subscribe(
        &mut self,
        event: impl Into<String>,
        delivery: Delivery,
        filter: Option<Filter>,
        handler: Handler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.ids.fetch_add(1, Ordering::Relaxed));
        self.added.push(PendingSubscription {
            id,
            event: event.into(),
            delivery,
            filter,
            handler,
        });
        id
    }

    pub fn on<F>(&mut self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&BusEvent, &mut ScriptContext) -> Result<(), ScriptError> + Send + 'static,
    {
        self.subscribe(event, Delivery::Every, None, Box::new(handler))
    }

    pub fn once<F>(&mut self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&BusEvent, &mut ScriptContext) -> Result<(), ScriptError> + Send + 'static,
    {
        self.subscribe(event, Delivery::Once, None, Box::new(handler))
    }

    pub fn once_per_team<F>(&mut self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&BusEvent, &mut ScriptContext) -> Result<(), ScriptError> + Send + 'static,
    {
        self.subscribe(event, Delivery::OncePerTeam, None, Box::new(handler))
    }

    pub fn once_per_clan<F>(&mut self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&BusEvent, &mut ScriptContext) -> Result<(), ScriptError> + Send + 'static,
    {
        self.subscribe(event, Delivery::OncePerClan, None, Box::new(handler))
    }

    /// Unregister a subscription owned by the same instance
    pub fn off(&mut self, id: SubscriptionId) {
        if let Some(pos) = self.added.iter().position(|s| s.id == id) {
            self.added.remove(pos);
        } else {
            self.removed.push(id);
        }
    }

    /// Publish a custom event once the invocation commits
    pub fn emit(&mut self, event: BusEvent) {
        self.emitted.push(event);
    }

    pub fn pending_subscriptions(&self) -> usize {
        self.added.len()
    }

    pub fn pending_events(&self) -> &[BusEvent] {
        &self.emitted
    }
}

struct Subscription {
    id: SubscriptionId,
    owner: InstanceId,
    event: String,
    delivery: Delivery,
    filter: Option<Filter>,
    handler: Handler,
    seen_groups: HashSet<String>,
}

/// Result of offering one event to one subscription
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// Subscription gone, or the payload does not qualify for it
    Skipped,
    /// The filter rejected the event
    Filtered,
    /// The filter or the handler ran; carries the handler outcome
    Attempted(Result<(), ScriptError>),
}

pub struct EventBus {
    /// Registration order is delivery order
    subscriptions: Vec<Subscription>,
    ids: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            ids: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle for one invocation of `owner`
    pub fn handle(&self, owner: InstanceId) -> BusHandle {
        BusHandle::with_counter(owner, self.ids.clone())
    }

    /// Apply what an invocation recorded. Returns the events it emitted.
    pub fn commit(&mut self, handle: BusHandle) -> Vec<BusEvent> {
        let BusHandle {
            owner,
            added,
            removed,
            emitted,
            ..
        } = handle;

        if !removed.is_empty() {
            self.subscriptions
                .retain(|s| !(s.owner == owner && removed.contains(&s.id)));
        }
        for pending in added {
            debug!(target: "events", "{} subscribed to '{}' ({:?})", owner, pending.event, pending.delivery);
            self.subscriptions.push(Subscription {
                id: pending.id,
                owner,
                event: pending.event,
                delivery: pending.delivery,
                filter: pending.filter,
                handler: pending.handler,
                seen_groups: HashSet::new(),
            });
        }
        emitted
    }

    /// Subscriptions listening for `event_name`, in registration order
    pub fn targets(&self, event_name: &str) -> Vec<(SubscriptionId, InstanceId)> {
        self.subscriptions
            .iter()
            .filter(|s| s.event == event_name)
            .map(|s| (s.id, s.owner))
            .collect()
    }

    /// Offer `event` to a single subscription. Panics inside the filter or
    /// handler are contained and reported as [`ScriptError::Panicked`].
    pub fn dispatch(&mut self, id: SubscriptionId, event: &BusEvent, ctx: &mut ScriptContext) -> Dispatch {
        let Some(index) = self.subscriptions.iter().position(|s| s.id == id) else {
            return Dispatch::Skipped;
        };
        let sub = &mut self.subscriptions[index];

        if let Some(filter) = sub.filter.as_mut() {
            match catch_unwind(AssertUnwindSafe(|| filter(event, ctx))) {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => return Dispatch::Filtered,
                Ok(Err(e)) => return Dispatch::Attempted(Err(e)),
                Err(payload) => return Dispatch::Attempted(Err(ScriptError::from_panic(payload))),
            }
        }

        let group_field = match sub.delivery {
            Delivery::OncePerTeam => Some("team"),
            Delivery::OncePerClan => Some("clan"),
            Delivery::Every | Delivery::Once => None,
        };
        if let Some(field) = group_field {
            let Some(key) = group_key(&event.payload, field) else {
                trace!(target: "events", "Null {} on '{}', not delivering", field, event.name);
                return Dispatch::Skipped;
            };
            if !sub.seen_groups.insert(key) {
                return Dispatch::Skipped;
            }
        }

        let handler = &mut sub.handler;
        let result = match catch_unwind(AssertUnwindSafe(|| handler(event, ctx))) {
            Ok(result) => result,
            Err(payload) => Err(ScriptError::from_panic(payload)),
        };

        if sub.delivery == Delivery::Once {
            self.subscriptions.remove(index);
        }
        Dispatch::Attempted(result)
    }

    /// Unregister every subscription `owner` created. Returns how many were removed.
    pub fn dispose(&mut self, owner: InstanceId) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.owner != owner);
        let removed = before - self.subscriptions.len();
        if removed > 0 {
            debug!(target: "events", "Disposed {} subscription(s) of {}", removed, owner);
        }
        removed
    }

    pub fn count_for(&self, owner: InstanceId) -> usize {
        self.subscriptions.iter().filter(|s| s.owner == owner).count()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GameFacade, RunMeta};
    use tactician_events::{ActionId, RunMode};

    const OWNER: InstanceId = InstanceId(1);

    fn ctx(bus: &EventBus, owner: InstanceId) -> ScriptContext {
        let meta = RunMeta::new(ActionId(1), owner, "test", RunMode::Event);
        ScriptContext::new(GameFacade::new(None), Value::map(), Value::map(), meta, bus.handle(owner))
    }

    fn built(team: Option<Value>) -> BusEvent {
        let payload = match team {
            Some(team) => Value::map().with("team", team),
            None => Value::map(),
        };
        BusEvent::new("structureBuilt", 1, payload)
    }

    /// Deliver to every target, counting successful handler runs in `state.hits`
    fn publish(bus: &mut EventBus, event: &BusEvent) -> Vec<Dispatch> {
        let mut outcomes = Vec::new();
        for (id, owner) in bus.targets(&event.name) {
            let mut c = ctx(bus, owner);
            outcomes.push(bus.dispatch(id, event, &mut c));
            bus.commit(c.bus);
        }
        outcomes
    }

    fn counting_handler(counter: Arc<AtomicU64>) -> impl FnMut(&BusEvent, &mut ScriptContext) -> Result<(), ScriptError> + Send + 'static {
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_group_key_rules() {
        assert_eq!(group_key(&Value::map(), "team"), Some("unknown".into()));
        assert_eq!(group_key(&Value::map().with("team", ""), "team"), Some("unknown".into()));
        assert_eq!(group_key(&Value::map().with("team", Value::Null), "team"), None);
        assert_eq!(group_key(&Value::map().with("team", "Alpha"), "team"), Some("Alpha".into()));
    }

    #[test]
    fn test_once_per_team_delivers_once_per_group() {
        let mut bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let mut handle = bus.handle(OWNER);
        handle.once_per_team("structureBuilt", counting_handler(hits.clone()));
        bus.commit(handle);

        for team in ["Alpha", "Alpha", "Beta"] {
            publish(&mut bus, &built(Some(Value::from(team))));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Explicit null never delivers, absent falls into the unknown bucket once
        publish(&mut bus, &built(Some(Value::Null)));
        publish(&mut bus, &built(None));
        publish(&mut bus, &built(Some(Value::from(""))));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_once_unregisters_after_first_accepted_delivery() {
        let mut bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let mut handle = bus.handle(OWNER);
        let filter: Filter = Box::new(|event, _| Ok(event.payload.get("team") == Some(&Value::from("Beta"))));
        handle.subscribe(
            "structureBuilt",
            Delivery::Once,
            Some(filter),
            Box::new(counting_handler(hits.clone())),
        );
        bus.commit(handle);

        assert_eq!(publish(&mut bus, &built(Some("Alpha".into()))), vec![Dispatch::Filtered]);
        assert_eq!(bus.len(), 1, "rejected by filter is not a delivery");
        publish(&mut bus, &built(Some("Beta".into())));
        publish(&mut bus, &built(Some("Beta".into())));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_failing_handler_stays_registered_and_others_still_run() {
        let mut bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let mut handle = bus.handle(OWNER);
        handle.on("structureBuilt", |_, _| Err(ScriptError::Raised("boom".into())));
        handle.on("structureBuilt", |_, _| panic!("handler panic"));
        bus.commit(handle);
        let mut other = bus.handle(InstanceId(2));
        other.on("structureBuilt", counting_handler(hits.clone()));
        bus.commit(other);

        let outcomes = publish(&mut bus, &built(None));
        assert!(matches!(outcomes[0], Dispatch::Attempted(Err(ScriptError::Raised(_)))));
        assert!(matches!(outcomes[1], Dispatch::Attempted(Err(ScriptError::Panicked(_)))));
        assert_eq!(outcomes[2], Dispatch::Attempted(Ok(())));
        assert_eq!(bus.len(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let mut bus = EventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for owner in [InstanceId(3), InstanceId(1), InstanceId(2)] {
            let order = order.clone();
            let mut handle = bus.handle(owner);
            handle.on("goldDonated", move |_, ctx| {
                order.lock().unwrap().push(ctx.meta.instance_id);
                Ok(())
            });
            bus.commit(handle);
        }
        publish(&mut bus, &BusEvent::new("goldDonated", 1, Value::map()));
        assert_eq!(
            *order.lock().unwrap(),
            vec![InstanceId(3), InstanceId(1), InstanceId(2)]
        );
    }

    #[test]
    fn test_dispose_and_off() {
        let mut bus = EventBus::new();
        let mut handle = bus.handle(OWNER);
        let first = handle.on("a", |_, _| Ok(()));
        handle.on("b", |_, _| Ok(()));
        bus.commit(handle);
        let mut other = bus.handle(InstanceId(9));
        other.on("a", |_, _| Ok(()));
        bus.commit(other);

        let mut handle = bus.handle(OWNER);
        handle.off(first);
        bus.commit(handle);
        assert_eq!(bus.count_for(OWNER), 1);

        assert_eq!(bus.dispose(OWNER), 1);
        assert_eq!(bus.count_for(OWNER), 0);
        assert_eq!(bus.targets("a"), vec![(SubscriptionId(2), InstanceId(9))]);
    }

    #[test]
    fn test_commit_returns_emitted_events() {
        let mut bus = EventBus::new();
        let mut handle = bus.handle(OWNER);
        handle.emit(BusEvent::new("custom", 4, Value::from("hello")));
        let emitted = bus.commit(handle);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].name, "custom");
    }
}
