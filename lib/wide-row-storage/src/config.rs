//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::StorageError;

/// How soft metadata findings (uniqueness constraints, custom identity
/// classes) are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IgnorableMetadataBehavior {
    None,
    #[default]
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Idle time before a released connection may be evicted.
    pub idle_timeout_millis: u64,
    /// Evictor period. Zero disables background eviction.
    pub eviction_interval_millis: u64,
    /// Shorthand for both `auto_create_tables` and `auto_create_columns`.
    pub auto_create_schema: bool,
    pub auto_create_tables: bool,
    pub auto_create_columns: bool,
    pub ignorable_metadata_behavior: IgnorableMetadataBehavior,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            idle_timeout_millis: 30_000,
            eviction_interval_millis: 15_000,
            auto_create_schema: false,
            auto_create_tables: false,
            auto_create_columns: false,
            ignorable_metadata_behavior: IgnorableMetadataBehavior::Warn,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from JSON; absent keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval_millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn auto_create_schema(mut self, enabled: bool) -> Self {
        self.auto_create_schema = enabled;
        self
    }

    pub fn auto_create_tables(mut self, enabled: bool) -> Self {
        self.auto_create_tables = enabled;
        self
    }

    pub fn auto_create_columns(mut self, enabled: bool) -> Self {
        self.auto_create_columns = enabled;
        self
    }

    pub fn ignorable_metadata_behavior(mut self, behavior: IgnorableMetadataBehavior) -> Self {
        self.ignorable_metadata_behavior = behavior;
        self
    }

    pub fn creates_tables(&self) -> bool {
        self.auto_create_schema || self.auto_create_tables
    }

    pub fn creates_columns(&self) -> bool {
        self.auto_create_schema || self.auto_create_columns
    }

    /// `None` when background eviction is disabled.
    pub fn eviction_period(&self) -> Option<Duration> {
        (self.eviction_interval_millis > 0)
            .then(|| Duration::from_millis(self.eviction_interval_millis))
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        if self.idle_timeout_millis == 0 {
            return Err(StorageError::Configuration(
                "idleTimeoutMillis must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.idle_timeout_millis, 30_000);
        assert_eq!(config.eviction_interval_millis, 15_000);
        assert_eq!(
            config.ignorable_metadata_behavior,
            IgnorableMetadataBehavior::Warn
        );
        assert!(!config.creates_tables());
    }

    #[test]
    fn json_overrides_selected_keys() {
        let config = StoreConfig::from_json(
            r#"{"idleTimeoutMillis": 500, "autoCreateSchema": true, "ignorableMetadataBehavior": "ERROR"}"#,
        )
        .unwrap();
        assert_eq!(config.idle_timeout_millis, 500);
        assert_eq!(config.eviction_interval_millis, 15_000);
        assert!(config.creates_tables());
        assert!(config.creates_columns());
        assert_eq!(
            config.ignorable_metadata_behavior,
            IgnorableMetadataBehavior::Error
        );
    }

    #[test]
    fn zero_idle_timeout_is_rejected() {
        let err = StoreConfig::new()
            .idle_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, StorageError::Configuration(_)));
        assert!(StoreConfig::from_json(r#"{"idleTimeoutMillis": 0}"#).is_err());
    }

    #[test]
    fn zero_interval_disables_eviction() {
        let config = StoreConfig::new().eviction_interval(Duration::ZERO);
        assert!(config.eviction_period().is_none());
    }
}
