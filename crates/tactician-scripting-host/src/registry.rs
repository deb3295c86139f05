use std::collections::BTreeMap;

use tracing::debug;

use crate::dsl::DslCompiler;
use crate::scripts;
use crate::{Script, ScriptCompiler, ScriptError};
use tactician_client::config::ScriptingConfig;

/// Prefix that routes script text to a registered native script
pub const NATIVE_PREFIX: &str = "native:";

type NativeFactory = Box<dyn Fn() -> Box<dyn Script> + Send>;

/// Compiler front door: `native:<name>` resolves a registered Rust script,
/// any other text is compiled as the action language.
pub struct ScriptRegistry {
    natives: BTreeMap<String, NativeFactory>,
    natives_enabled: bool,
    dsl: DslCompiler,
}

impl ScriptRegistry {
    /// Registry with the built-in native scripts
    pub fn new(max_steps: u64) -> Self {
        let mut registry = Self::empty(max_steps);
        scripts::register_builtins(&mut registry);
        registry
    }

    /// Registry without any native scripts
    pub fn empty(max_steps: u64) -> Self {
        Self {
            natives: BTreeMap::new(),
            natives_enabled: true,
            dsl: DslCompiler::new(max_steps),
        }
    }

    pub fn from_config(config: &ScriptingConfig) -> Self {
        debug!(target: "scripting", "Creating script registry (builtins: {})", config.builtin_scripts);
        let mut registry = Self::new(config.max_steps);
        registry.natives_enabled = config.builtin_scripts;
        registry.dsl = DslCompiler::new(config.max_steps).with_max_value_len(config.max_value_len);
        registry
    }

    pub fn register_native<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Script> + Send + 'static,
    {
        self.natives.insert(name.into(), Box::new(factory));
    }

    pub fn native_names(&self) -> impl Iterator<Item = &str> {
        self.natives.keys().map(String::as_str)
    }
}

impl ScriptCompiler for ScriptRegistry {
    fn compile(&self, source: &str) -> Result<Box<dyn Script>, ScriptError> {
        let Some(name) = source.trim().strip_prefix(NATIVE_PREFIX) else {
            return self.dsl.compile(source);
        };
        if !self.natives_enabled {
            return Err(ScriptError::compile(1, "native scripts are disabled"));
        }
        let name = name.trim();
        self.natives
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ScriptError::compile(1, format!("unknown native script '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventBus, GameFacade, RunMeta, ScriptContext, ScriptOutcome, invoke};
    use tactician_events::{ActionId, InstanceId, RunMode, Value};

    struct Answer;

    impl Script for Answer {
        fn run(&mut self, _ctx: &mut ScriptContext) -> Result<ScriptOutcome, ScriptError> {
            Ok(ScriptOutcome::value(42u64))
        }
    }

    fn run(registry: &ScriptRegistry, source: &str) -> Result<Value, ScriptError> {
        let bus = EventBus::new();
        let meta = RunMeta::new(ActionId(1), InstanceId(1), "t", RunMode::Once);
        let mut ctx = ScriptContext::new(GameFacade::new(None), Value::map(), Value::map(), meta, bus.handle(InstanceId(1)));
        let mut script = registry.compile(source)?;
        invoke(script.as_mut(), &mut ctx).map(|outcome| outcome.value)
    }

    #[test]
    fn test_routes_native_and_dsl() {
        let mut registry = ScriptRegistry::empty(1000);
        registry.register_native("answer", || Box::new(Answer));
        assert_eq!(run(&registry, "native:answer"), Ok(Value::from(42u64)));
        assert_eq!(run(&registry, "  native: answer \n"), Ok(Value::from(42u64)));
        assert_eq!(run(&registry, "1 + 1"), Ok(Value::from(2.0)));
    }

    #[test]
    fn test_unknown_native_is_compile_error() {
        let registry = ScriptRegistry::empty(1000);
        assert!(matches!(
            run(&registry, "native:nope"),
            Err(ScriptError::Compile { line: 1, .. })
        ));
    }

    #[test]
    fn test_builtins_can_be_disabled() {
        let config = ScriptingConfig {
            max_steps: 1000,
            max_value_len: 1000,
            builtin_scripts: false,
        };
        let registry = ScriptRegistry::from_config(&config);
        assert!(registry.native_names().any(|n| n == "embargo_traitors"));
        assert!(matches!(
            run(&registry, "native:embargo_traitors"),
            Err(ScriptError::Compile { .. })
        ));
    }
}
