use serde::{Deserialize, Serialize};

/// Timing and capacity knobs of the engine loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of one engine cycle in milliseconds
    pub tick_ms: u64,

    /// Delay before retrying discovery after the game was not found or lost
    pub discovery_retry_ms: u64,

    /// How long a finished instance stays visible before it is removed
    pub grace_period_ms: u64,

    /// Ticks a donation key is remembered for de-duplication
    pub dedup_horizon_ticks: u64,

    /// Maximum number of log entries kept in memory
    pub log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            discovery_retry_ms: 1000,
            grace_period_ms: 3000,
            dedup_horizon_ticks: 5,
            log_capacity: 500,
        }
    }
}

impl EngineConfig {
    /// Replace zero values with their defaults
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.tick_ms == 0 {
            self.tick_ms = defaults.tick_ms;
        }
        if self.discovery_retry_ms == 0 {
            self.discovery_retry_ms = defaults.discovery_retry_ms;
        }
        if self.grace_period_ms == 0 {
            self.grace_period_ms = defaults.grace_period_ms;
        }
        if self.dedup_horizon_ticks == 0 {
            self.dedup_horizon_ticks = defaults.dedup_horizon_ticks;
        }
        if self.log_capacity == 0 {
            self.log_capacity = defaults.log_capacity;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_replaces_zeroes() {
        let config = EngineConfig {
            tick_ms: 0,
            log_capacity: 0,
            grace_period_ms: 250,
            ..EngineConfig::default()
        }
        .normalized();
        assert_eq!(config.tick_ms, 100);
        assert_eq!(config.log_capacity, 500);
        assert_eq!(config.grace_period_ms, 250);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("tick_ms = 50").unwrap();
        assert_eq!(config.tick_ms, 50);
        assert_eq!(config.discovery_retry_ms, 1000);
    }
}
