//! ServerRuntime — 설정과 DataMap으로 스택 전체를 조립
//!
//! ```text
//! RuntimeConfig + DataMap(s) → EntityResolver → SqliteDataSource + DbAdapter
//!          → DataNode → DataDomain → ObjectContext
//! ```
//!
//! # 예제
//!
//! ```rust,no_run
//! use cayx_core::{RuntimeConfig, ServerRuntime};
//!
//! # fn main() -> cayx_core::CayxResult<()> {
//! let runtime = ServerRuntime::builder()
//!     .config(RuntimeConfig::load("cayx.json")?)
//!     .build()?;
//! let context = runtime.create_context();
//! # Ok(())
//! # }
//! ```

use crate::access::{DataDomain, DataNode, SqliteDataSource};
use crate::config::RuntimeConfig;
use crate::context::{ContextOptions, ObjectContext};
use crate::dba::adapter_for;
use crate::error::{CayxError, CayxResult};
use crate::map::{DataMap, EntityResolver};
use std::sync::Arc;

/// Assembled domain plus the data source behind its single node.
pub struct ServerRuntime {
    config: RuntimeConfig,
    domain: Arc<DataDomain>,
    data_source: Arc<SqliteDataSource>,
}

impl ServerRuntime {
    pub fn builder() -> ServerRuntimeBuilder {
        ServerRuntimeBuilder::default()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn domain(&self) -> &Arc<DataDomain> {
        &self.domain
    }

    pub fn data_source(&self) -> &Arc<SqliteDataSource> {
        &self.data_source
    }

    pub fn create_context(&self) -> Arc<ObjectContext> {
        self.domain.create_context()
    }
}

impl std::fmt::Debug for ServerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRuntime")
            .field("domain", &self.domain.name())
            .field("data_source", &self.data_source.location())
            .finish()
    }
}

#[derive(Default)]
pub struct ServerRuntimeBuilder {
    config: Option<RuntimeConfig>,
    maps: Vec<DataMap>,
    map_json: Vec<String>,
    create_schema: Option<bool>,
}

impl ServerRuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn data_map(mut self, map: DataMap) -> Self {
        self.maps.push(map);
        self
    }

    /// DataMap given as JSON text, parsed at build time.
    pub fn data_map_json(mut self, json: impl Into<String>) -> Self {
        self.map_json.push(json.into());
        self
    }

    /// Overrides `RuntimeConfig::create_schema`.
    pub fn create_schema(mut self, create: bool) -> Self {
        self.create_schema = Some(create);
        self
    }

    pub fn build(self) -> CayxResult<ServerRuntime> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let mut maps = self.maps;
        for path in &config.data_maps {
            maps.push(DataMap::load(path)?);
        }
        for json in &self.map_json {
            maps.push(DataMap::from_json(json)?);
        }
        if maps.is_empty() {
            return Err(CayxError::Configuration(
                "runtime needs at least one DataMap".to_string(),
            ));
        }
        let map_names: Vec<String> = maps.iter().map(|m| m.name.clone()).collect();
        let resolver = Arc::new(EntityResolver::new(maps)?);

        let data_source = Arc::new(SqliteDataSource::open(
            &config.data_source,
            config.max_connections,
        )?);
        let adapter = adapter_for(&config.adapter, config.quoting.clone())?;
        let node = map_names.iter().fold(
            DataNode::new(
                config.node_name.clone(),
                data_source.clone(),
                adapter,
                Arc::clone(&resolver),
            ),
            |node, name| node.with_data_map(name.clone()),
        );
        if self.create_schema.unwrap_or(config.create_schema) {
            node.create_schema(false)?;
        }

        let domain = DataDomain::new(config.domain_name.clone(), resolver)?
            .with_node(node)
            .with_snapshot_cache_size(config.snapshot_cache_size)
            .with_query_cache_size(config.query_cache_size)
            .with_pk_cache_size(config.pk_cache_size)
            .with_context_options(ContextOptions {
                validate_on_commit: config.validate_on_commit,
                ..ContextOptions::default()
            });

        tracing::info!(
            domain = %config.domain_name,
            maps = ?map_names,
            data_source = %config.data_source,
            "runtime started"
        );
        Ok(ServerRuntime {
            config,
            domain: Arc::new(domain),
            data_source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::TEST_MAP_JSON;

    #[test]
    fn test_build_requires_a_map() {
        let err = ServerRuntime::builder().build().unwrap_err();
        assert!(matches!(err, CayxError::Configuration(_)));
    }

    #[test]
    fn test_build_in_memory_with_schema() {
        let runtime = ServerRuntime::builder()
            .data_map_json(TEST_MAP_JSON)
            .create_schema(true)
            .build()
            .unwrap();
        assert_eq!(runtime.domain().nodes().len(), 1);
        assert!(runtime.domain().node_for_entity("Artist").is_ok());

        let context = runtime.create_context();
        let artist = context.new_object("Artist").unwrap();
        context.write_property(artist, "artistName", "Monet").unwrap();
        context.commit_changes().unwrap();
        assert!(!context.has_changes());
    }

    #[test]
    fn test_config_flows_into_contexts() {
        let config = RuntimeConfig {
            validate_on_commit: false,
            ..RuntimeConfig::default()
        };
        let runtime = ServerRuntime::builder()
            .config(config)
            .data_map_json(TEST_MAP_JSON)
            .create_schema(true)
            .build()
            .unwrap();

        // no artistName: passes validation, the NOT NULL column rejects it
        let context = runtime.create_context();
        context.new_object("Artist").unwrap();
        let err = context.commit_changes().unwrap_err();
        assert!(!matches!(err, CayxError::Validation(_)));
    }
}
