// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Service configuration and its storage port.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Key under which [`ServiceConfig`] is persisted.
pub const SERVICE_CONFIG_KEY: &str = "service";

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A stored value parsed but is not usable.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Serializes config values and delegates storage to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)` if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                let value = serde_json::from_slice(&bytes)?;
                Ok(Some(value))
            }
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Loads the [`ServiceConfig`], falling back to defaults when none is
    /// stored.
    pub fn service_config(&self) -> Result<ServiceConfig, ConfigError> {
        let cfg = self
            .load::<ServiceConfig>(SERVICE_CONFIG_KEY)?
            .unwrap_or_default();
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Tunables of the analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Default cap on direct children of a command-tree group.
    pub max_children: u64,
    /// Default cap on consecutive leaf commands next to sibling groups.
    pub max_neighbours: u64,
    /// Default for grouping the trailing, unterminated frame.
    pub allow_incomplete_frame: bool,
    /// Default result cap for `find`; zero means unlimited.
    pub find_max_items: u64,
    /// Default array chunk size in state trees.
    pub state_tree_array_group_size: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_children: 2000,
            max_neighbours: 20,
            allow_incomplete_frame: true,
            find_max_items: 0,
            state_tree_array_group_size: 100,
        }
    }
}

impl ServiceConfig {
    /// Rejects values the analyses cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_children == 1 {
            return Err(ConfigError::Invalid(
                "max_children must be 0 (unlimited) or at least 2".into(),
            ));
        }
        if self.state_tree_array_group_size == 1 {
            return Err(ConfigError::Invalid(
                "state_tree_array_group_size must be 0 (ungrouped) or at least 2".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct MemStore(RefCell<HashMap<String, Vec<u8>>>);

    impl ConfigStore for MemStore {
        fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
            self.0.borrow().get(key).cloned().ok_or(ConfigError::NotFound)
        }
        fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
            self.0.borrow_mut().insert(key.to_owned(), data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn missing_config_yields_defaults() {
        let svc = ConfigService::new(MemStore::default());
        assert_eq!(svc.service_config().unwrap(), ServiceConfig::default());
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let store = MemStore::default();
        store
            .save_raw(SERVICE_CONFIG_KEY, br#"{"max_children": 10}"#)
            .unwrap();
        let cfg = ConfigService::new(store).service_config().unwrap();
        assert_eq!(cfg.max_children, 10);
        assert_eq!(cfg.max_neighbours, 20);
    }

    #[test]
    fn round_trips_through_the_store() {
        let svc = ConfigService::new(MemStore::default());
        let cfg = ServiceConfig {
            find_max_items: 5,
            ..ServiceConfig::default()
        };
        svc.save(SERVICE_CONFIG_KEY, &cfg).unwrap();
        assert_eq!(svc.service_config().unwrap(), cfg);
    }

    #[test]
    fn degenerate_limits_are_rejected() {
        let svc = ConfigService::new(MemStore::default());
        svc.save(
            SERVICE_CONFIG_KEY,
            &ServiceConfig {
                max_children: 1,
                ..ServiceConfig::default()
            },
        )
        .unwrap();
        match svc.service_config() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("max_children")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
