//! DataMap — 엔티티 메타데이터 묶음
//!
//! 모든 엔티티는 이름을 키로 하는 맵 하나가 소유하며, 관계는 이름으로만 참조합니다.

use crate::error::{CayxError, CayxResult};
use crate::map::db::DbEntity;
use crate::map::obj::ObjEntity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 매핑 단위. 하나의 DataNode에 연결됩니다.
#[derive(Debug, Clone, Default)]
pub struct DataMap {
    pub name: String,
    pub default_schema: Option<String>,
    db_entities: BTreeMap<String, DbEntity>,
    obj_entities: BTreeMap<String, ObjEntity>,
}

/// JSON 파일 형식
#[derive(Serialize, Deserialize)]
struct DataMapFile {
    name: String,
    #[serde(default)]
    default_schema: Option<String>,
    #[serde(default)]
    db_entities: Vec<DbEntity>,
    #[serde(default)]
    obj_entities: Vec<ObjEntity>,
}

impl DataMap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_db_entity(mut self, entity: DbEntity) -> Self {
        self.add_db_entity(entity);
        self
    }

    pub fn with_obj_entity(mut self, entity: ObjEntity) -> Self {
        self.add_obj_entity(entity);
        self
    }

    pub fn add_db_entity(&mut self, mut entity: DbEntity) {
        if entity.schema.is_none() {
            entity.schema = self.default_schema.clone();
        }
        self.db_entities.insert(entity.name.clone(), entity);
    }

    pub fn add_obj_entity(&mut self, entity: ObjEntity) {
        self.obj_entities.insert(entity.name.clone(), entity);
    }

    pub fn db_entity(&self, name: &str) -> Option<&DbEntity> {
        self.db_entities.get(name)
    }

    pub fn obj_entity(&self, name: &str) -> Option<&ObjEntity> {
        self.obj_entities.get(name)
    }

    pub fn db_entities(&self) -> impl Iterator<Item = &DbEntity> {
        self.db_entities.values()
    }

    pub fn obj_entities(&self) -> impl Iterator<Item = &ObjEntity> {
        self.obj_entities.values()
    }

    // ════════════════════════════════════════════
    // JSON
    // ════════════════════════════════════════════

    /// JSON 문자열에서 DataMap을 읽고 참조 무결성을 검사합니다.
    pub fn from_json(json: &str) -> CayxResult<Self> {
        let file: DataMapFile = serde_json::from_str(json)?;
        let mut map = DataMap::new(file.name);
        map.default_schema = file.default_schema;
        for e in file.db_entities {
            map.add_db_entity(e);
        }
        for e in file.obj_entities {
            map.add_obj_entity(e);
        }
        map.validate()?;
        Ok(map)
    }

    pub fn load(path: impl AsRef<Path>) -> CayxResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading data map");
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> CayxResult<String> {
        let file = DataMapFile {
            name: self.name.clone(),
            default_schema: self.default_schema.clone(),
            db_entities: self.db_entities.values().cloned().collect(),
            obj_entities: self.obj_entities.values().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Checks that every name reference inside this map resolves.
    ///
    /// Relationship targets in other maps are checked by the resolver.
    pub fn validate(&self) -> CayxResult<()> {
        for obj in self.obj_entities.values() {
            if let Some(sup) = &obj.super_entity {
                if !self.obj_entities.contains_key(sup) {
                    return Err(CayxError::Configuration(format!(
                        "ObjEntity '{}' extends unknown entity '{sup}'",
                        obj.name
                    )));
                }
            }
            let Some(db) = self.db_entities.get(&obj.db_entity) else {
                return Err(CayxError::Configuration(format!(
                    "ObjEntity '{}' is mapped to unknown DbEntity '{}'",
                    obj.name, obj.db_entity
                )));
            };
            for attr in obj.attributes.iter().filter(|a| !a.is_flattened()) {
                if db.attribute(&attr.db_attribute_path).is_none() {
                    return Err(CayxError::Configuration(format!(
                        "no DbAttribute '{}' in '{}' for {}.{}",
                        attr.db_attribute_path, db.name, obj.name, attr.name
                    )));
                }
            }
        }
        for db in self.db_entities.values() {
            for rel in &db.relationships {
                if let Some(target) = self.db_entities.get(&rel.target) {
                    for join in &rel.joins {
                        if db.attribute(&join.source).is_none()
                            || target.attribute(&join.target).is_none()
                        {
                            return Err(CayxError::Configuration(format!(
                                "relationship {}.{} joins unknown column {} -> {}",
                                db.name, rel.name, join.source, join.target
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{DbAttribute, DbRelationship, JdbcType, ObjAttribute};

    const JSON: &str = r#"{
        "name": "testmap",
        "db_entities": [
            {"name": "ARTIST", "attributes": [
                {"name": "ARTIST_ID", "type": "BIG_INT", "primary_key": true, "mandatory": true},
                {"name": "ARTIST_NAME", "type": "CHAR", "mandatory": true, "max_length": 254}
            ], "relationships": [
                {"name": "paintingArray", "target": "PAINTING", "to_many": true,
                 "joins": [{"source": "ARTIST_ID", "target": "ARTIST_ID"}]}
            ]},
            {"name": "PAINTING", "attributes": [
                {"name": "PAINTING_ID", "type": "INTEGER", "primary_key": true},
                {"name": "ARTIST_ID", "type": "BIG_INT"}
            ]}
        ],
        "obj_entities": [
            {"name": "Artist", "db_entity": "ARTIST",
             "attributes": [{"name": "artistName", "db_attribute_path": "ARTIST_NAME"}]}
        ]
    }"#;

    #[test]
    fn test_load_from_json() {
        let map = DataMap::from_json(JSON).unwrap();
        assert_eq!(map.name, "testmap");
        let artist = map.db_entity("ARTIST").unwrap();
        assert_eq!(artist.attribute("ARTIST_NAME").unwrap().max_length, Some(254));
        assert!(map.obj_entity("Artist").is_some());

        let back = DataMap::from_json(&map.to_json().unwrap()).unwrap();
        assert_eq!(back.db_entities().count(), 2);
    }

    #[test]
    fn test_validate_rejects_missing_db_attribute() {
        let map = DataMap::new("m")
            .with_db_entity(
                DbEntity::new("ARTIST").attr(DbAttribute::new("ARTIST_ID", JdbcType::BigInt).pk()),
            )
            .with_obj_entity(
                ObjEntity::new("Artist", "ARTIST").attr(ObjAttribute::new("artistName", "ARTIST_NAME")),
            );
        let err = map.validate().unwrap_err();
        assert!(err.to_string().contains("ARTIST_NAME"));
    }

    #[test]
    fn test_validate_rejects_bad_join_column() {
        let map = DataMap::new("m")
            .with_db_entity(
                DbEntity::new("A")
                    .attr(DbAttribute::new("ID", JdbcType::Integer).pk())
                    .rel(DbRelationship::to_one("toB", "B").join("B_ID", "ID")),
            )
            .with_db_entity(DbEntity::new("B").attr(DbAttribute::new("ID", JdbcType::Integer).pk()));
        assert!(matches!(map.validate(), Err(CayxError::Configuration(_))));
    }

    #[test]
    fn test_default_schema_applied() {
        let mut map = DataMap::new("m");
        map.default_schema = Some("APP".to_string());
        map.add_db_entity(DbEntity::new("T"));
        assert_eq!(map.db_entity("T").unwrap().full_name(), "APP.T");
    }
}
