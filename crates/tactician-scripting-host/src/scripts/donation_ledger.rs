use tactician_events::{BusEvent, GOLD_DONATED, LogLevel, Mention, TROOPS_DONATED, Value};

use crate::{Script, ScriptContext, ScriptError, ScriptOutcome};

const LEDGER_KEY: &str = "ledger";

/// Event-mode script keeping running donation totals per counterpart.
///
/// State layout: `ledger.<counterpart name>.<troops|gold><Sent|Received>`.
#[derive(Default)]
pub struct DonationLedger;

impl DonationLedger {
    pub const NAME: &'static str = "donation_ledger";
}

impl Script for DonationLedger {
    fn run(&mut self, ctx: &mut ScriptContext) -> Result<ScriptOutcome, ScriptError> {
        ctx.bus
            .on(TROOPS_DONATED, |event, ctx| record("troops", event, ctx));
        ctx.bus.on(GOLD_DONATED, |event, ctx| record("gold", event, ctx));
        ctx.log.info("Donation ledger listening");

        Ok(ScriptOutcome::default().with_cleanup(
            |ctx: &mut ScriptContext| -> Result<(), ScriptError> {
                let counterparts = ctx
                    .state_get(LEDGER_KEY)
                    .and_then(Value::as_map)
                    .map(|m| m.len())
                    .unwrap_or(0);
                ctx.log.info(format!(
                    "Donation ledger closed with {} counterpart(s)",
                    counterparts
                ));
                Ok(())
            },
        ))
    }
}

fn text<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn record(kind: &str, event: &BusEvent, ctx: &mut ScriptContext) -> Result<(), ScriptError> {
    let payload = &event.payload;
    let sent = text(payload, "direction") == "sent";
    let (id, name) = if sent {
        (text(payload, "recipientId"), text(payload, "recipientName"))
    } else {
        (text(payload, "senderId"), text(payload, "senderName"))
    };
    if name.is_empty() {
        return Err(ScriptError::runtime(format!("{} event without counterpart", event.name)));
    }
    let amount = payload
        .get("approxAmount")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let field = format!("{}{}", kind, if sent { "Sent" } else { "Received" });

    let mut ledger = ctx.state_get(LEDGER_KEY).cloned().unwrap_or_else(Value::map);
    if let Value::Map(entries) = &mut ledger {
        if let Value::Map(totals) = entries.entry(name.to_string()).or_insert_with(Value::map) {
            let total = totals.get(&field).and_then(Value::as_f64).unwrap_or(0.0) + amount;
            totals.insert(field, Value::from(total));
        }
    }
    ctx.state_set(LEDGER_KEY, ledger);

    let mut mentions = vec![Mention::Player {
        id: id.to_string(),
        name: Some(name.to_string()),
    }];
    if let Some(team) = payload.get("team").and_then(Value::as_str) {
        mentions.push(Mention::Team(team.to_string()));
    }
    let verb = if sent { "Sent" } else { "Received" };
    ctx.log.log(
        LogLevel::Info,
        format!("{} {} {}", verb, text(payload, "amount"), kind),
        mentions,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dispatch, EventBus, GameFacade, RunMeta, invoke, run_cleanup};
    use tactician_events::{ActionId, InstanceId, RunMode};

    const OWNER: InstanceId = InstanceId(3);

    fn context(bus: &EventBus, state: Value) -> ScriptContext {
        let meta = RunMeta::new(ActionId(1), OWNER, "ledger", RunMode::Event);
        ScriptContext::new(GameFacade::new(None), Value::map(), state, meta, bus.handle(OWNER))
    }

    fn donation(name: &str, direction: &str, amount: &str, approx: u64) -> BusEvent {
        let payload = Value::map()
            .with("direction", direction)
            .with("senderId", "p1")
            .with("senderName", if direction == "sent" { "Me" } else { "Ally" })
            .with("recipientId", "p2")
            .with("recipientName", if direction == "sent" { "Ally" } else { "Me" })
            .with("amount", amount)
            .with("approxAmount", approx)
            .with("team", "Alpha");
        BusEvent::new(name, 5, payload)
    }

    #[test]
    fn test_accumulates_per_counterpart_and_cleans_up() {
        let mut bus = EventBus::new();
        let mut ctx = context(&bus, Value::map());
        let outcome = invoke(&mut DonationLedger, &mut ctx).unwrap();
        let ScriptContext { bus: handle, mut state, .. } = ctx;
        bus.commit(handle);
        assert_eq!(bus.count_for(OWNER), 2);

        let events = [
            donation(TROOPS_DONATED, "sent", "1.2K", 1200),
            donation(TROOPS_DONATED, "sent", "300", 300),
            donation(GOLD_DONATED, "received", "5K", 5000),
        ];
        for event in &events {
            for (id, _) in bus.targets(&event.name) {
                let mut ctx = context(&bus, state);
                let result = bus.dispatch(id, event, &mut ctx);
                assert_eq!(result, Dispatch::Attempted(Ok(())));
                assert_eq!(ctx.log.entries()[0].mentions.len(), 2);
                state = ctx.state;
            }
        }

        let ally = state.get("ledger").and_then(|l| l.get("Ally")).unwrap();
        assert_eq!(ally.get("troopsSent"), Some(&Value::from(1500.0)));
        assert_eq!(ally.get("goldReceived"), Some(&Value::from(5000.0)));

        let mut ctx = context(&bus, state);
        run_cleanup(outcome.cleanup.unwrap(), &mut ctx).unwrap();
        assert_eq!(
            ctx.log.entries()[0].message,
            "Donation ledger closed with 1 counterpart(s)"
        );
    }

    #[test]
    fn test_missing_counterpart_fails_the_delivery() {
        let mut bus = EventBus::new();
        let mut ctx = context(&bus, Value::map());
        invoke(&mut DonationLedger, &mut ctx).unwrap();
        bus.commit(ctx.bus);

        let event = BusEvent::new(GOLD_DONATED, 1, Value::map().with("direction", "sent"));
        let (id, _) = bus.targets(GOLD_DONATED)[0];
        let mut ctx = context(&bus, Value::map());
        assert!(matches!(
            bus.dispatch(id, &event, &mut ctx),
            Dispatch::Attempted(Err(ScriptError::Runtime(_)))
        ));
        // Handler failures keep the subscription
        assert_eq!(bus.count_for(OWNER), 2);
    }
}
