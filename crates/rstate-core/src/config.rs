#![forbid(unsafe_code)]

//! Construction-time store configuration.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Configuration for a [`Store`](crate::store::Store).
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Store identity. Prefixes every event name the store dispatches.
    pub id: String,
    /// Canonical shape and fallback values. Must be a JSON object.
    pub default_state: Value,
    /// Intercept writes at any depth (see [`NodeRef`](crate::node::NodeRef)).
    pub recursive: bool,
}

impl StoreConfig {
    /// Configuration with the given identity and defaults, recursion off.
    #[must_use]
    pub fn new(id: impl Into<String>, default_state: Value) -> Self {
        Self {
            id: id.into(),
            default_state,
            recursive: false,
        }
    }

    /// Configuration whose defaults are a serialized typed shape.
    pub fn from_defaults<T: Serialize>(id: impl Into<String>, defaults: &T) -> Result<Self> {
        Ok(Self::new(id, serde_json::to_value(defaults)?))
    }

    /// Toggle recursive tracking.
    #[must_use]
    pub fn with_recursive(mut self, enabled: bool) -> Self {
        self.recursive = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Settings {
        volume: u8,
        theme: Theme,
    }

    #[derive(Serialize)]
    struct Theme {
        mode: String,
    }

    #[test]
    fn defaults_off() {
        let config = StoreConfig::new("settings", json!({}));
        assert!(!config.recursive);
        assert_eq!(config.id, "settings");
    }

    #[test]
    fn builder_toggles_recursion() {
        let config = StoreConfig::new("s", json!({})).with_recursive(true);
        assert!(config.recursive);
    }

    #[test]
    fn typed_defaults_serialize_in_field_order() -> Result<()> {
        let config = StoreConfig::from_defaults(
            "settings",
            &Settings {
                volume: 50,
                theme: Theme {
                    mode: "dark".into(),
                },
            },
        )?;
        assert_eq!(
            config.default_state,
            json!({"volume": 50, "theme": {"mode": "dark"}})
        );
        let keys: Vec<&String> = config
            .default_state
            .as_object()
            .map(|m| m.keys().collect())
            .unwrap_or_default();
        assert_eq!(keys, ["volume", "theme"]);
        Ok(())
    }
}
