//! Log configuration.

use crate::error::{CoreError, CoreResult};
use crate::types::EventId;
use std::time::Duration;

/// Configuration for opening a log.
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the current segment is sealed and replaced.
    ///
    /// Lower this if uncommitted events pile up in memory, or if a single
    /// segment could issue more ids than `max_event_id` within one interval.
    pub rotation_interval: Duration,

    /// Highest id a segment issues before it requires rotation.
    pub max_event_id: u32,

    /// How long the retry worker rests after a pass that committed nothing.
    ///
    /// A rotation or shutdown ends the rest early.
    pub retry_pause: Duration,

    /// Whether to create the log directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(6 * 60),
            max_event_id: EventId::MAX.as_u32(),
            retry_pause: Duration::from_millis(50),
            create_if_missing: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rotation interval.
    #[must_use]
    pub const fn rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = interval;
        self
    }

    /// Sets the per-segment id ceiling.
    #[must_use]
    pub const fn max_event_id(mut self, max: u32) -> Self {
        self.max_event_id = max;
        self
    }

    /// Sets the retry worker's rest after an unproductive pass.
    #[must_use]
    pub const fn retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Sets whether to create the log directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Checks that the configuration can drive a log.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for a zero rotation interval or
    /// an id ceiling outside `1..=EventId::MAX`.
    pub fn validate(&self) -> CoreResult<()> {
        if self.rotation_interval.is_zero() {
            return Err(CoreError::invalid_config("rotation interval must be non-zero"));
        }
        if self.max_event_id == 0 || self.max_event_id > EventId::MAX.as_u32() {
            return Err(CoreError::invalid_config(format!(
                "max event id must be within 1..={}, got {}",
                EventId::MAX.as_u32(),
                self.max_event_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.rotation_interval, Duration::from_secs(360));
        assert_eq!(config.max_event_id, i32::MAX as u32);
        assert!(config.create_if_missing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .rotation_interval(Duration::from_millis(500))
            .max_event_id(8)
            .retry_pause(Duration::from_millis(5))
            .create_if_missing(false);

        assert_eq!(config.rotation_interval, Duration::from_millis(500));
        assert_eq!(config.max_event_id, 8);
        assert_eq!(config.retry_pause, Duration::from_millis(5));
        assert!(!config.create_if_missing);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = Config::new().rotation_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn id_ceiling_must_fit_int32() {
        assert!(Config::new().max_event_id(0).validate().is_err());
        assert!(Config::new().max_event_id(u32::MAX).validate().is_err());
        assert!(Config::new().max_event_id(1).validate().is_ok());
    }
}
