use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Interpreter steps allowed per script invocation (default: 100000)
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Largest text, list or map a script may build, counted in characters
    /// plus elements (default: 100000)
    #[serde(default = "default_max_value_len")]
    pub max_value_len: usize,

    /// Whether `native:` built-in scripts can be referenced (default: true)
    #[serde(default = "default_builtin_scripts")]
    pub builtin_scripts: bool,
}

fn default_max_steps() -> u64 {
    100_000
}

fn default_max_value_len() -> usize {
    100_000
}

fn default_builtin_scripts() -> bool {
    true
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_value_len: default_max_value_len(),
            builtin_scripts: default_builtin_scripts(),
        }
    }
}
