//! 런타임 설정
//!
//! JSON 파일에서 읽고 `CAYX_` 환경 변수로 덮어씁니다.
//!
//! | 변수 | 필드 |
//! |------|------|
//! | `CAYX_DATA_SOURCE` | `data_source` |
//! | `CAYX_MAX_CONNECTIONS` | `max_connections` |
//! | `CAYX_ADAPTER` | `adapter` |
//! | `CAYX_SNAPSHOT_CACHE_SIZE` | `snapshot_cache_size` |
//! | `CAYX_QUERY_CACHE_SIZE` | `query_cache_size` |
//! | `CAYX_PK_CACHE_SIZE` | `pk_cache_size` |
//! | `CAYX_VALIDATE_ON_COMMIT` | `validate_on_commit` |

use crate::access::{DEFAULT_PK_CACHE_SIZE, DEFAULT_QUERY_CACHE_SIZE, DEFAULT_SNAPSHOT_CACHE_SIZE};
use crate::dba::QuotingStrategy;
use crate::error::{CayxError, CayxResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "CAYX_";

/// Everything [`ServerRuntime`](crate::runtime::ServerRuntime) needs to build a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub domain_name: String,
    pub node_name: String,
    /// SQLite file path, or `:memory:`
    pub data_source: String,
    pub max_connections: usize,
    /// `generic` or `sqlite`
    pub adapter: String,
    pub quoting: QuotingStrategy,
    pub snapshot_cache_size: usize,
    pub query_cache_size: usize,
    pub pk_cache_size: i64,
    pub validate_on_commit: bool,
    /// DataMap JSON files, relative paths resolved against the config file
    pub data_maps: Vec<PathBuf>,
    /// Create missing tables on startup
    pub create_schema: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            domain_name: "cayx".to_string(),
            node_name: "node".to_string(),
            data_source: ":memory:".to_string(),
            max_connections: 4,
            adapter: "sqlite".to_string(),
            quoting: QuotingStrategy::default(),
            snapshot_cache_size: DEFAULT_SNAPSHOT_CACHE_SIZE,
            query_cache_size: DEFAULT_QUERY_CACHE_SIZE,
            pk_cache_size: DEFAULT_PK_CACHE_SIZE,
            validate_on_commit: true,
            data_maps: Vec::new(),
            create_schema: false,
        }
    }
}

impl RuntimeConfig {
    /// Reads a JSON config file and applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> CayxResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&content)?;

        if let Some(dir) = path.parent() {
            for map in &mut config.data_maps {
                if map.is_relative() {
                    *map = dir.join(&*map);
                }
            }
        }
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::info!(path = %path.display(), "runtime config loaded");
        Ok(config)
    }

    pub fn from_json(json: &str) -> CayxResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> CayxResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Environment variables take precedence over file values.
    pub fn apply_env_overrides(&mut self) -> CayxResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any `CAYX_*` lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> CayxResult<()> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("DATA_SOURCE") {
            self.data_source = v;
        }
        if let Some(v) = var("MAX_CONNECTIONS") {
            self.max_connections = parse_var("MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = var("ADAPTER") {
            self.adapter = v;
        }
        if let Some(v) = var("SNAPSHOT_CACHE_SIZE") {
            self.snapshot_cache_size = parse_var("SNAPSHOT_CACHE_SIZE", &v)?;
        }
        if let Some(v) = var("QUERY_CACHE_SIZE") {
            self.query_cache_size = parse_var("QUERY_CACHE_SIZE", &v)?;
        }
        if let Some(v) = var("PK_CACHE_SIZE") {
            self.pk_cache_size = parse_var("PK_CACHE_SIZE", &v)?;
        }
        if let Some(v) = var("VALIDATE_ON_COMMIT") {
            self.validate_on_commit = parse_flag("VALIDATE_ON_COMMIT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> CayxResult<()> {
        if self.max_connections == 0 {
            return Err(CayxError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.pk_cache_size < 1 {
            return Err(CayxError::Configuration(
                "pk_cache_size must be at least 1".to_string(),
            ));
        }
        match self.adapter.to_ascii_lowercase().as_str() {
            "generic" | "jdbc" | "sqlite" => Ok(()),
            other => Err(CayxError::Configuration(format!(
                "unmapped DbAdapter '{other}'"
            ))),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> CayxResult<T> {
    value.trim().parse().map_err(|_| {
        CayxError::Configuration(format!("invalid {ENV_PREFIX}{name} value: '{value}'"))
    })
}

fn parse_flag(name: &str, value: &str) -> CayxResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CayxError::Configuration(format!(
            "invalid {ENV_PREFIX}{name} value: '{value}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{"data_source": "app.db", "max_connections": 8}"#)
            .unwrap();
        assert_eq!(config.data_source, "app.db");
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.pk_cache_size, DEFAULT_PK_CACHE_SIZE);
        assert!(config.validate_on_commit);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(env(&[
                ("CAYX_DATA_SOURCE", "/tmp/x.db"),
                ("CAYX_PK_CACHE_SIZE", "50"),
                ("CAYX_VALIDATE_ON_COMMIT", "off"),
                ("CAYX_ADAPTER", "generic"),
            ]))
            .unwrap();
        assert_eq!(config.data_source, "/tmp/x.db");
        assert_eq!(config.pk_cache_size, 50);
        assert!(!config.validate_on_commit);
        assert_eq!(config.adapter, "generic");
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_overrides(env(&[("CAYX_MAX_CONNECTIONS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("CAYX_MAX_CONNECTIONS"));
    }

    #[test]
    fn test_validate_rejects_unknown_adapter() {
        let config = RuntimeConfig {
            adapter: "oracle".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(config.validate(), Err(CayxError::Configuration(_))));
    }

    #[test]
    fn test_load_resolves_map_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cayx.json");
        std::fs::write(&path, r#"{"data_maps": ["maps/testmap.json"]}"#).unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.data_maps, vec![dir.path().join("maps/testmap.json")]);
    }
}
