use thiserror::Error;

/// Failure of a single script execution or handler invocation.
///
/// Every variant is contained to the instance that produced it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("compile error on line {line}: {message}")]
    Compile { line: usize, message: String },

    #[error("runtime error: {0}")]
    Runtime(String),

    /// The script raised an error on purpose (`fail`)
    #[error("{0}")]
    Raised(String),

    #[error("script panicked: {0}")]
    Panicked(String),

    #[error("script exceeded its budget of {0} steps")]
    BudgetExhausted(u64),
}

impl ScriptError {
    pub fn compile(line: usize, message: impl Into<String>) -> Self {
        ScriptError::Compile {
            line,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime(message.into())
    }

    /// Turn a caught panic payload into an error
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ScriptError::Panicked(message)
    }
}
