//! Store configuration.
//!
//! A [`StoreConfig`] names the backend identity (service namespace plus an
//! optional access group) and sizes the two queues owned by the store.  It
//! can be built in code, parsed from TOML, loaded from a `.toml` or `.json`
//! file, and adjusted from `KEYWARD_*` environment variables.  The
//! configuration is read once when the store is opened; it is immutable
//! afterwards.

use std::path::Path;

use keyward_vault::ServiceIdentity;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Default service namespace.
pub const DEFAULT_SERVICE: &str = "keychain";
/// Default per-subscriber event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
/// Default command queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

pub const ENV_SERVICE: &str = "KEYWARD_SERVICE";
pub const ENV_ACCESS_GROUP: &str = "KEYWARD_ACCESS_GROUP";
pub const ENV_EVENT_CAPACITY: &str = "KEYWARD_EVENT_CAPACITY";
pub const ENV_QUEUE_CAPACITY: &str = "KEYWARD_QUEUE_CAPACITY";

/// Configuration for a [`SecureStore`](crate::SecureStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Service namespace the backend files entries under.
    pub service: String,
    /// Optional sharing group.
    pub access_group: Option<String>,
    /// Events buffered per subscriber before new ones are dropped.
    pub event_capacity: usize,
    /// Commands queued behind the one currently executing.
    pub queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            access_group: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl StoreConfig {
    /// Default configuration for `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn with_access_group(mut self, access_group: impl Into<String>) -> Self {
        self.access_group = Some(access_group.into());
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Parse a TOML document.  Missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| StoreError::Config {
            reason: format!("invalid TOML: {e}"),
        })
    }

    /// Load from a `.toml` or `.json` file, chosen by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => serde_json::from_str(&content).map_err(|e| StoreError::Config {
                reason: format!("invalid JSON in {}: {e}", path.display()),
            })?,
            _ => {
                return Err(StoreError::Config {
                    reason: format!(
                        "unsupported config file {}: expected .toml or .json",
                        path.display()
                    ),
                });
            }
        };

        tracing::debug!(path = %path.display(), service = %config.service, "store config loaded");
        Ok(config)
    }

    /// Apply `KEYWARD_*` variables from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `KEYWARD_*` overrides from an arbitrary variable source.
    ///
    /// Unknown variables are ignored.  An empty `KEYWARD_ACCESS_GROUP`
    /// clears the access group.
    pub fn apply_overrides<I, K, V>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let value = value.as_ref();
            match name.as_ref() {
                ENV_SERVICE => self.service = value.to_string(),
                ENV_ACCESS_GROUP if value.is_empty() => self.access_group = None,
                ENV_ACCESS_GROUP => self.access_group = Some(value.to_string()),
                ENV_EVENT_CAPACITY => self.event_capacity = parse_capacity(ENV_EVENT_CAPACITY, value)?,
                ENV_QUEUE_CAPACITY => self.queue_capacity = parse_capacity(ENV_QUEUE_CAPACITY, value)?,
                _ => continue,
            }
            tracing::debug!(variable = name.as_ref(), "store config override applied");
        }
        Ok(self)
    }

    /// Reject configurations the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            return Err(StoreError::Config {
                reason: "service must not be empty".into(),
            });
        }
        if self.access_group.as_deref().is_some_and(|g| g.trim().is_empty()) {
            return Err(StoreError::Config {
                reason: "access_group must not be blank".into(),
            });
        }
        if self.event_capacity == 0 {
            return Err(StoreError::Config {
                reason: "event_capacity must be at least 1".into(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(StoreError::Config {
                reason: "queue_capacity must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// The backend identity this configuration describes.
    pub fn identity(&self) -> ServiceIdentity {
        let identity = ServiceIdentity::new(self.service.clone());
        match &self.access_group {
            Some(group) => identity.with_access_group(group.clone()),
            None => identity,
        }
    }
}

fn parse_capacity(variable: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|e| StoreError::Config {
        reason: format!("{variable}={value:?} is not a valid capacity: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.service, "keychain");
        assert_eq!(config.access_group, None);
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.queue_capacity, 64);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = StoreConfig::from_toml_str(
            r#"
            service = "wallet"
            access_group = "team.wallet"
            "#,
        )
        .unwrap();
        assert_eq!(config.service, "wallet");
        assert_eq!(config.access_group.as_deref(), Some("team.wallet"));
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);

        let identity = config.identity();
        assert_eq!(identity.service, "wallet");
        assert_eq!(identity.access_group.as_deref(), Some("team.wallet"));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = StoreConfig::from_toml_str("service = [").unwrap_err();
        assert!(matches!(err, StoreError::Config { .. }));
    }

    #[test]
    fn load_toml_and_json_files() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("store.toml");
        std::fs::write(&toml_path, "service = \"from-toml\"\nevent_capacity = 8\n").unwrap();
        let config = StoreConfig::load(&toml_path).unwrap();
        assert_eq!(config.service, "from-toml");
        assert_eq!(config.event_capacity, 8);

        let json_path = dir.path().join("store.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        write!(file, r#"{{"service": "from-json", "queue_capacity": 4}}"#).unwrap();
        let config = StoreConfig::load(&json_path).unwrap();
        assert_eq!(config.service, "from-json");
        assert_eq!(config.queue_capacity, 4);
    }

    #[test]
    fn load_rejects_unknown_extension_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("store.yaml");
        std::fs::write(&yaml, "service: x").unwrap();
        assert!(matches!(
            StoreConfig::load(&yaml),
            Err(StoreError::Config { .. })
        ));

        assert!(matches!(
            StoreConfig::load(dir.path().join("absent.toml")),
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn overrides_apply_and_validate() {
        let config = StoreConfig::new("base")
            .with_access_group("group")
            .apply_overrides([
                (ENV_SERVICE, "overridden"),
                (ENV_ACCESS_GROUP, ""),
                (ENV_EVENT_CAPACITY, "32"),
                ("UNRELATED", "ignored"),
            ])
            .unwrap();
        assert_eq!(config.service, "overridden");
        assert_eq!(config.access_group, None);
        assert_eq!(config.event_capacity, 32);

        let err = StoreConfig::default()
            .apply_overrides([(ENV_QUEUE_CAPACITY, "lots")])
            .unwrap_err();
        assert!(err.to_string().contains(ENV_QUEUE_CAPACITY));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(StoreConfig::new("  ").validate().is_err());
        assert!(StoreConfig::default().with_access_group(" ").validate().is_err());
        assert!(StoreConfig::default().with_event_capacity(0).validate().is_err());
        assert!(StoreConfig::default().with_queue_capacity(0).validate().is_err());
    }
}
