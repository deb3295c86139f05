use std::sync::Arc;

use tactician_client::config::ScriptingConfig;
use tactician_client::snapshot::Snapshot;
use tactician_events::{ActionId, BusEvent, InstanceId, RunMode, Value};
use tactician_scripting_host::{
    Dispatch, EventBus, GameFacade, RunMeta, Script, ScriptCompiler, ScriptContext, ScriptError,
    ScriptOutcome, ScriptRegistry, invoke, run_cleanup,
};

fn context(bus: &EventBus, owner: InstanceId, state: Value) -> ScriptContext {
    let meta = RunMeta::new(ActionId(1), owner, "sandbox", RunMode::Event);
    let snapshot = Snapshot {
        tick: 7,
        ..Snapshot::default()
    };
    ScriptContext::new(
        GameFacade::new(Some(Arc::new(snapshot))),
        Value::map().with("greeting", "hi"),
        state,
        meta,
        bus.handle(owner),
    )
}

#[test]
fn event_script_lifecycle_through_the_registry() {
    let registry = ScriptRegistry::from_config(&ScriptingConfig::default());
    let source = r#"
        on "ping" once {
            state.pings = (state.pings or 0) + 1
            info settings.greeting + " " + event.from
        }
        cleanup { info "bye" }
    "#;

    let owner = InstanceId(1);
    let mut bus = EventBus::new();
    let mut ctx = context(&bus, owner, Value::map());
    let mut script = registry.compile(source).unwrap();
    let outcome = invoke(script.as_mut(), &mut ctx).unwrap();
    assert!(outcome.cleanup.is_some());
    bus.commit(ctx.bus);
    assert_eq!(bus.count_for(owner), 1);

    let ping = BusEvent::new("ping", 7, Value::map().with("from", "tester"));
    let (id, target) = bus.targets("ping")[0];
    assert_eq!(target, owner);
    let mut ctx = context(&bus, owner, Value::map());
    assert_eq!(bus.dispatch(id, &ping, &mut ctx), Dispatch::Attempted(Ok(())));
    assert_eq!(ctx.state.get("pings"), Some(&Value::from(1.0)));
    assert_eq!(ctx.log.entries()[0].message, "hi tester");

    // Once subscriptions are gone after the first delivery
    assert!(bus.targets("ping").is_empty());

    let mut ctx = context(&bus, owner, Value::map());
    if let Some(cleanup) = outcome.cleanup {
        run_cleanup(cleanup, &mut ctx).unwrap();
    }
    assert_eq!(ctx.log.entries()[0].message, "bye");
}

struct Exploding;

impl Script for Exploding {
    fn run(&mut self, _ctx: &mut ScriptContext) -> Result<ScriptOutcome, ScriptError> {
        panic!("kaboom");
    }
}

#[test]
fn panics_are_contained() {
    let mut registry = ScriptRegistry::empty(100);
    registry.register_native("explode", || Box::new(Exploding));
    let bus = EventBus::new();
    let mut ctx = context(&bus, InstanceId(2), Value::map());
    let mut script = registry.compile("native:explode").unwrap();
    let result = invoke(script.as_mut(), &mut ctx);
    assert!(matches!(result, Err(ScriptError::Panicked(msg)) if msg.contains("kaboom")));
}

#[test]
fn compile_errors_carry_the_line() {
    let registry = ScriptRegistry::new(100);
    let error = registry.compile("let a = 1\nlet = 2").err();
    assert!(matches!(error, Some(ScriptError::Compile { line: 2, .. })));
}
