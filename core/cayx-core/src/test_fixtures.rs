//! Unit-test mapping shared with the integration tests (`tests/fixtures/testmap.json`).

use crate::access::{DataDomain, DataNode, SqliteDataSource};
use crate::context::ObjectContext;
use crate::dba::{QuotingStrategy, SqliteAdapter};
use crate::map::{DataMap, EntityResolver};
use std::sync::Arc;

pub const TEST_MAP_JSON: &str = include_str!("../tests/fixtures/testmap.json");

pub fn data_map() -> DataMap {
    DataMap::from_json(TEST_MAP_JSON).expect("test map must load")
}

pub fn resolver() -> EntityResolver {
    EntityResolver::new(vec![data_map()]).expect("test map must resolve")
}

/// Context over a domain without nodes; any database access fails.
pub fn offline_context() -> Arc<ObjectContext> {
    let domain = DataDomain::new("offline", Arc::new(resolver())).expect("domain");
    Arc::new(domain).create_context()
}

/// Domain over a fresh in-memory SQLite database with the schema created.
pub fn sqlite_domain() -> (Arc<DataDomain>, Arc<SqliteDataSource>) {
    let resolver = Arc::new(resolver());
    let ds = Arc::new(SqliteDataSource::in_memory(4).expect("sqlite"));
    let node = DataNode::new(
        "node",
        ds.clone(),
        Arc::new(SqliteAdapter::new(QuotingStrategy::default())),
        Arc::clone(&resolver),
    )
    .with_data_map("testmap");
    node.create_schema(false).expect("schema");
    let domain = DataDomain::new("test", resolver).expect("domain").with_node(node);
    (Arc::new(domain), ds)
}
