//! Bus-level configuration surface (§ Configuration Surface, ambient).

use std::path::Path;

use eventbus_types::{EngineConfig, RoutingRule};
use serde::{Deserialize, Serialize};

/// Root configuration for an [`crate::Router`]-driven bus.
///
/// Deserializes either as the legacy single-engine shorthand
/// `{"engine": "memory"}` or the full multi-engine form
/// `{"engines": [...], "routing": [...]}`. `serde(untagged)` tries each
/// variant in declaration order, so the legacy form is attempted first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusConfig {
    /// Single named engine with no routing rules; all topics go to it.
    Legacy {
        /// Name of the single engine to construct and route everything to.
        engine: String,
    },
    /// Multiple named engines with explicit routing rules.
    Full {
        /// Declared engines, constructed in this order.
        engines: Vec<EngineConfig>,
        /// Ordered routing rules; see [`crate::Router`].
        #[serde(default)]
        routing: Vec<RoutingRule>,
    },
}

/// Errors raised while validating a [`BusConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `Full` configuration declared zero engines.
    #[error("bus configuration must declare at least one engine")]
    NoEngines,
    /// Two engines were declared under the same name.
    #[error("duplicate engine name: {0}")]
    DuplicateEngineName(String),
    /// A routing rule referenced an engine name not present in `engines`.
    #[error("routing rule references unknown engine: {0}")]
    UnknownRoutingTarget(String),
    /// The configuration file could not be read from disk.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file's contents could not be parsed in the format
    /// implied by its extension.
    #[error("failed to parse configuration file {path} as {format}: {source}")]
    Parse {
        /// Path whose contents failed to parse.
        path: String,
        /// Format that was attempted (`toml` or `json`).
        format: &'static str,
        /// Underlying parse failure.
        #[source]
        source: anyhow::Error,
    },
}

impl BusConfig {
    /// Load and validate a [`BusConfig`] from `path`, dispatching on file
    /// extension: `.toml` is parsed with `toml`, anything else (including no
    /// extension) falls back to JSON, matching the format-from-extension
    /// convention the rest of the workspace's config tooling uses.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;

        let is_toml = path.extension().and_then(|ext| ext.to_str()).map(|ext| ext.eq_ignore_ascii_case("toml")).unwrap_or(false);
        let config: BusConfig = if is_toml {
            toml::from_str(&contents)
                .map_err(|source| ConfigError::Parse { path: path.display().to_string(), format: "toml", source: source.into() })?
        } else {
            serde_json::from_str(&contents)
                .map_err(|source| ConfigError::Parse { path: path.display().to_string(), format: "json", source: source.into() })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants that serde alone can't express:
    /// non-empty engine list, unique names, and routing rules that only
    /// reference declared engines.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            BusConfig::Legacy { .. } => Ok(()),
            BusConfig::Full { engines, routing } => {
                if engines.is_empty() {
                    return Err(ConfigError::NoEngines);
                }
                let mut seen = std::collections::HashSet::new();
                for engine in engines {
                    if !seen.insert(engine.name.as_str()) {
                        return Err(ConfigError::DuplicateEngineName(engine.name.clone()));
                    }
                }
                for rule in routing {
                    if !seen.contains(rule.engine.as_str()) {
                        return Err(ConfigError::UnknownRoutingTarget(rule.engine.clone()));
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_shorthand_deserializes() {
        let raw = r#"{"engine": "memory"}"#;
        let cfg: BusConfig = serde_json::from_str(raw).unwrap();
        assert!(matches!(cfg, BusConfig::Legacy { engine } if engine == "memory"));
    }

    #[test]
    fn full_form_deserializes_with_default_routing() {
        let raw = r#"{"engines": [{"name": "primary", "type": "memory", "config": {}}]}"#;
        let cfg: BusConfig = serde_json::from_str(raw).unwrap();
        match cfg {
            BusConfig::Full { engines, routing } => {
                assert_eq!(engines.len(), 1);
                assert!(routing.is_empty());
            }
            _ => panic!("expected Full variant"),
        }
    }

    #[test]
    fn validate_rejects_empty_engine_list() {
        let cfg = BusConfig::Full { engines: vec![], routing: vec![] };
        assert!(matches!(cfg.validate(), Err(ConfigError::NoEngines)));
    }

    #[test]
    fn validate_rejects_duplicate_engine_names() {
        let cfg = BusConfig::Full {
            engines: vec![
                EngineConfig { name: "a".into(), engine_type: "memory".into(), config: serde_json::Value::Null },
                EngineConfig { name: "a".into(), engine_type: "memory".into(), config: serde_json::Value::Null },
            ],
            routing: vec![],
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateEngineName(_))));
    }

    #[test]
    fn validate_rejects_routing_rule_to_unknown_engine() {
        let cfg = BusConfig::Full {
            engines: vec![EngineConfig { name: "a".into(), engine_type: "memory".into(), config: serde_json::Value::Null }],
            routing: vec![RoutingRule { topics: vec!["*".into()], engine: "ghost".into() }],
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::UnknownRoutingTarget(_))));
    }

    #[test]
    fn from_file_parses_toml_by_extension() {
        let dir = std::env::temp_dir().join(format!("eventbus-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bus.toml");
        std::fs::write(&path, "engine = \"memory\"\n").unwrap();

        let cfg = BusConfig::from_file(&path).unwrap();
        assert!(matches!(cfg, BusConfig::Legacy { engine } if engine == "memory"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn from_file_falls_back_to_json_for_non_toml_extensions() {
        let dir = std::env::temp_dir().join(format!("eventbus-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bus.json");
        std::fs::write(&path, r#"{"engine": "memory"}"#).unwrap();

        let cfg = BusConfig::from_file(&path).unwrap();
        assert!(matches!(cfg, BusConfig::Legacy { engine } if engine == "memory"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn from_file_surfaces_io_error_for_missing_file() {
        let err = BusConfig::from_file("/nonexistent/eventbus-bus.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn from_file_rejects_structurally_invalid_config() {
        let dir = std::env::temp_dir().join(format!("eventbus-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bus.toml");
        std::fs::write(&path, "engines = []\n").unwrap();

        let err = BusConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::NoEngines));
        std::fs::remove_dir_all(&dir).ok();
    }
}
