//! The action language.
//!
//! A small closed language: statements read the game facade, settings and
//! per-instance state, issue trade commands, log, emit events and register
//! event handlers. There are no user-defined functions and no unbounded
//! loops; every invocation is additionally bounded by a step budget.

pub mod interpreter;
pub mod lexer;
pub mod parser;

use std::sync::Arc;

use crate::{Script, ScriptCompiler, ScriptContext, ScriptError, ScriptOutcome};
use interpreter::{Interpreter, Limits};
use parser::Program;

/// Value size cap used when none is configured
pub const DEFAULT_MAX_VALUE_LEN: usize = 100_000;

pub struct DslCompiler {
    limits: Limits,
}

impl DslCompiler {
    pub fn new(max_steps: u64) -> Self {
        Self {
            limits: Limits {
                max_steps: max_steps.max(1),
                max_value_len: DEFAULT_MAX_VALUE_LEN,
            },
        }
    }

    pub fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.limits.max_value_len = max_value_len.max(1);
        self
    }
}

impl ScriptCompiler for DslCompiler {
    fn compile(&self, source: &str) -> Result<Box<dyn Script>, ScriptError> {
        let program = parser::parse(source)?;
        Ok(Box::new(DslScript {
            program: Arc::new(program),
            limits: self.limits,
        }))
    }
}

pub struct DslScript {
    program: Arc<Program>,
    limits: Limits,
}

impl Script for DslScript {
    fn run(&mut self, ctx: &mut ScriptContext) -> Result<ScriptOutcome, ScriptError> {
        Interpreter::new(ctx, self.limits).run_program(&self.program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventBus, GameFacade, RunMeta, invoke, run_cleanup};
    use std::sync::Arc as StdArc;
    use tactician_client::snapshot::{PlayerRecord, Snapshot};
    use tactician_events::{ActionId, BusEvent, InstanceId, LogLevel, Mention, RunMode, Value};

    fn player(id: &str, name: &str, team: &str) -> PlayerRecord {
        PlayerRecord {
            id: id.to_string(),
            small_id: 0,
            name: name.to_string(),
            clan_tag: tactician_events::clan_tag_of(name),
            team: Some(team.to_string()),
            tiles: 10,
            gold: 100,
            troops: 50,
            incoming_attacks: Vec::new(),
            outgoing_attacks: Vec::new(),
            alliances: Vec::new(),
            trade_stopped_by_self: false,
            trade_stopped_by_other: false,
            is_traitor: false,
            betrayed: Vec::new(),
            is_self: id == "p1",
        }
    }

    fn snapshot() -> StdArc<Snapshot> {
        let mut traitor = player("p3", "[RED] Judas", "Beta");
        traitor.is_traitor = true;
        StdArc::new(Snapshot {
            tick: 42,
            players: vec![player("p1", "Me", "Alpha"), player("p2", "Bob", "Alpha"), traitor],
            self_id: Some("p1".into()),
            ..Snapshot::default()
        })
    }

    fn context(bus: &EventBus, settings: Value) -> ScriptContext {
        let meta = RunMeta::new(ActionId(1), InstanceId(7), "test", RunMode::Once);
        ScriptContext::new(
            GameFacade::new(Some(snapshot())),
            settings,
            Value::map(),
            meta,
            bus.handle(InstanceId(7)),
        )
    }

    fn run(source: &str) -> (Result<ScriptOutcome, ScriptError>, ScriptContext) {
        let bus = EventBus::new();
        let mut ctx = context(&bus, Value::map().with("limit", 2.0));
        let result = DslCompiler::new(10_000)
            .compile(source)
            .and_then(|mut script| invoke(script.as_mut(), &mut ctx));
        (result, ctx)
    }

    fn value_of(source: &str) -> Value {
        run(source).0.unwrap().value
    }

    #[test]
    fn test_entry_point_probing_order() {
        assert_eq!(value_of("fn default { return 2 }\nfn run { return 1 }"), Value::from(1.0));
        assert_eq!(value_of("fn default { return 2 }"), Value::from(2.0));
        assert_eq!(value_of("let a = 3\na * 2"), Value::from(6.0));
        // Top level runs before the entry point
        assert_eq!(value_of("let base = 10\nfn run { return base + 1 }"), Value::from(11.0));
    }

    #[test]
    fn test_facade_reads() {
        assert_eq!(value_of("tick"), Value::from(42u64));
        assert_eq!(value_of("len(players)"), Value::from(3u64));
        assert_eq!(value_of("me.name"), Value::from("Me"));
        assert_eq!(value_of("find(players, \"name\", \"Bob\").team"), Value::from("Alpha"));
        assert_eq!(value_of("settings.limit + 1"), Value::from(3.0));
        assert_eq!(value_of("settings.missing"), Value::Null);
    }

    #[test]
    fn test_and_or_return_operands() {
        assert_eq!(value_of("null or \"fallback\""), Value::from("fallback"));
        assert_eq!(value_of("0 and 5"), Value::from(0.0));
        assert_eq!(value_of("not 0"), Value::Bool(true));
    }

    #[test]
    fn test_loops_conditions_and_state() {
        let (result, ctx) = run(
            "let total = 0\n\
             for p in players {\n\
               if p.team == \"Alpha\" { total = total + p.gold }\n\
               else { state.other = p.name }\n\
             }\n\
             state.total = total\n\
             total",
        );
        assert_eq!(result.unwrap().value, Value::from(200.0));
        assert_eq!(ctx.state.get("total"), Some(&Value::from(200.0)));
        assert_eq!(ctx.state.get("other"), Some(&Value::from("[RED] Judas")));
    }

    #[test]
    fn test_trade_commands_accept_collections() {
        let (result, mut ctx) = run(
            "let traitors = []\n\
             for p in players { if p.isTraitor { traitors = traitors + [p] } }\n\
             stop_trade traitors\n\
             start_trade \"p2\"",
        );
        result.unwrap();
        let commands = ctx.game.take_commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].target, "p3");
        assert!(commands[0].stopped);
        assert!(!commands[1].stopped);
    }

    #[test]
    fn test_logging_with_mentions() {
        let (result, ctx) = run("warn \"watch \" + \"out\" @player(\"p3\") @team(\"Beta\") @clan(null)");
        result.unwrap();
        let entries = ctx.log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert_eq!(entries[0].message, "watch out");
        assert_eq!(
            entries[0].mentions,
            vec![
                Mention::Player {
                    id: "p3".into(),
                    name: Some("[RED] Judas".into())
                },
                Mention::Team("Beta".into())
            ]
        );
        assert_eq!(entries[0].instance_id, Some(InstanceId(7)));
    }

    #[test]
    fn test_errors() {
        assert_eq!(run("fail \"nope\"").0.err(), Some(ScriptError::Raised("nope".into())));
        assert!(matches!(
            run("let a = 1\nmissing + 1").0,
            Err(ScriptError::Runtime(msg)) if msg.starts_with("line 2:")
        ));
        assert!(matches!(run("1 / 0").0, Err(ScriptError::Runtime(_))));
        assert!(matches!(run("stop_trade \"nobody\"").0, Err(ScriptError::Runtime(_))));
        assert!(matches!(run("let = ").0, Err(ScriptError::Compile { line: 1, .. })));
    }

    #[test]
    fn test_step_budget() {
        let bus = EventBus::new();
        let mut ctx = context(&bus, Value::map());
        let source = "let n = 0\nfor a in [1,2,3,4,5,6,7,8,9,10] { for b in [1,2,3,4,5,6,7,8,9,10] { n = n + 1 } }";
        let mut script = DslCompiler::new(50).compile(source).unwrap();
        assert_eq!(invoke(script.as_mut(), &mut ctx).err(), Some(ScriptError::BudgetExhausted(50)));
    }

    fn thirty() -> String {
        (1..=30).map(|n| n.to_string()).collect::<Vec<_>>().join(", ")
    }

    fn size_error(result: Result<ScriptOutcome, ScriptError>) -> bool {
        matches!(result, Err(ScriptError::Runtime(msg)) if msg.contains("value size limit"))
    }

    #[test]
    fn test_doubling_values_hit_the_size_limit() {
        let text = format!("let s = \"xxxxxxxx\"\nfor i in [{}] {{ s = s + s }}", thirty());
        assert!(size_error(run(&text).0));
        let list = format!("let l = [1, 2, 3, 4]\nfor i in [{}] {{ l = l + l }}", thirty());
        assert!(size_error(run(&list).0));
        let pairs = format!("let l = [1]\nfor i in [{}] {{ l = [l, l] }}", thirty());
        assert!(size_error(run(&pairs).0));
    }

    #[test]
    fn test_deeply_nested_values_are_rejected() {
        let source = format!("let l = []\nfor i in [{}, {}] {{ l = [l] }}", thirty(), thirty());
        assert!(size_error(run(&source).0));
        let shallow = "let l = []\nfor i in [1, 2, 3] { l = [l] }\nl";
        assert!(run(shallow).0.is_ok());
    }

    #[test]
    fn test_state_writes_respect_configured_limit() {
        let bus = EventBus::new();
        let mut ctx = context(&bus, Value::map());
        let mut script = DslCompiler::new(1_000)
            .with_max_value_len(10)
            .compile("state.short = \"ok\"\nstate.long = \"0123456789abc\"")
            .unwrap();
        assert!(size_error(invoke(script.as_mut(), &mut ctx)));
        assert_eq!(ctx.state.get("short"), Some(&Value::from("ok")));
        assert_eq!(ctx.state.get("long"), None);
    }

    #[test]
    fn test_handlers_capture_locals_and_see_event() {
        let mut bus = EventBus::new();
        let mut ctx = context(&bus, Value::map());
        let mut script = DslCompiler::new(1_000)
            .compile(
                "let prefix = \"built: \"\n\
                 on \"structureBuilt\" per_team when event.structureType != \"Port\" {\n\
                   state.seen = (state.seen or 0) + 1\n\
                   info prefix + event.structureType @team(event.team)\n\
                 }\n\
                 emit \"ready\" {at: tick}",
            )
            .unwrap();
        invoke(script.as_mut(), &mut ctx).unwrap();
        assert_eq!(ctx.bus.pending_subscriptions(), 1);
        assert_eq!(ctx.bus.pending_events()[0].name, "ready");
        let ScriptContext { state, bus: handle, .. } = ctx;
        bus.commit(handle);

        let mut state = state;
        let events = [("City", "Alpha"), ("Port", "Beta"), ("City", "Alpha"), ("City", "Beta")];
        let mut logged = Vec::new();
        for (structure, team) in events {
            let event = BusEvent::new(
                "structureBuilt",
                43,
                Value::map().with("structureType", structure).with("team", team),
            );
            for (id, _) in bus.targets("structureBuilt") {
                let mut ctx = context(&bus, Value::map());
                ctx.state = state.clone();
                bus.dispatch(id, &event, &mut ctx);
                logged.extend(ctx.log.take_entries());
                state = ctx.state;
            }
        }
        assert_eq!(state.get("seen"), Some(&Value::from(2.0)));
        assert_eq!(logged[0].message, "built: City");
        assert_eq!(logged[1].mentions, vec![Mention::Team("Beta".into())]);
    }

    #[test]
    fn test_cleanup_block_is_returned() {
        let bus = EventBus::new();
        let mut ctx = context(&bus, Value::map());
        let mut script = DslCompiler::new(1_000)
            .compile("let name = \"ledger\"\ncleanup { info \"closing \" + name }")
            .unwrap();
        let outcome = invoke(script.as_mut(), &mut ctx).unwrap();
        let cleanup = outcome.cleanup.expect("cleanup registered");
        run_cleanup(cleanup, &mut ctx).unwrap();
        assert_eq!(ctx.log.entries()[0].message, "closing ledger");
    }
}
