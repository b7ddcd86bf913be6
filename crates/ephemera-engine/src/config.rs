//! Engine configuration.

use serde::Deserialize;

use crate::error::{EngineError, Result};

const MINUTE_MS: i64 = 60_000;

/// Configuration for the expiration engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of locations each attribute component is replicated to.
    pub replication_factor: u8,
    /// Minutes between two full rescans.
    pub main_event_interval_minutes: u32,
    /// Between-event candidates closer than this to an existing bucket join it.
    pub between_event_granularity_minutes: u32,
    /// Bulk push attempts before a record is rescheduled.
    pub push_retry_count: u32,
    /// Size of derived locations in bytes.
    pub location_size_bytes: usize,
    /// Debounce window of the reevaluation inbox.
    pub reevaluation_delay_ms: u64,
    /// Delay of the first main event after the engine starts.
    pub initial_main_event_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            replication_factor: 7,
            main_event_interval_minutes: 240,
            between_event_granularity_minutes: 20,
            push_retry_count: 3,
            location_size_bytes: 20,
            reevaluation_delay_ms: 5_000,
            initial_main_event_delay_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field is in range.
    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(EngineError::Config("replication_factor must be at least 1".into()));
        }
        if self.main_event_interval_minutes == 0 {
            return Err(EngineError::Config(
                "main_event_interval_minutes must be at least 1".into(),
            ));
        }
        if self.between_event_granularity_minutes >= self.main_event_interval_minutes {
            return Err(EngineError::Config(
                "between_event_granularity_minutes must be below the main event interval".into(),
            ));
        }
        if self.push_retry_count == 0 {
            return Err(EngineError::Config("push_retry_count must be at least 1".into()));
        }
        if !(1..=32).contains(&self.location_size_bytes) {
            return Err(EngineError::Config(
                "location_size_bytes must be between 1 and 32".into(),
            ));
        }
        Ok(())
    }

    pub fn main_event_interval_ms(&self) -> i64 {
        self.main_event_interval_minutes as i64 * MINUTE_MS
    }

    pub fn granularity_ms(&self) -> i64 {
        self.between_event_granularity_minutes as i64 * MINUTE_MS
    }
}
