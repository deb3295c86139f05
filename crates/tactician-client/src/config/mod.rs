pub mod engine_config;
pub mod logging_config;
pub mod paths;
pub mod scripting_config;
pub mod tactician_config;

pub use engine_config::EngineConfig;
pub use logging_config::LoggingConfig;
pub use paths::ProjectPaths;
pub use scripting_config::ScriptingConfig;
pub use tactician_config::{ConfigLoadError, TacticianConfig};
