//! EntityResolver — 여러 DataMap에 걸친 엔티티 조회와 경로 해석
//!
//! 런타임 동안 읽기 전용이며 `Arc`로 모든 컨텍스트가 공유합니다.

use crate::error::{CayxError, CayxResult};
use crate::exp::{Expression, PropertySource};
use crate::map::data_map::DataMap;
use crate::map::db::{DbAttribute, DbEntity, DbRelationship};
use crate::map::obj::{ObjAttribute, ObjEntity, ObjRelationship};
use smallvec::SmallVec;
use std::collections::HashMap;

/// One relationship hop of a resolved DB path.
#[derive(Debug, Clone, Copy)]
pub struct DbHop<'a> {
    /// Name of the DbEntity the relationship is declared on
    pub source: &'a str,
    pub relationship: &'a DbRelationship,
    /// `+` suffix: the join must be an outer join
    pub outer: bool,
}

/// Relationship hops of a path; most paths are one or two hops long.
pub type DbHops<'a> = SmallVec<[DbHop<'a>; 4]>;

/// End of a resolved path.
#[derive(Debug, Clone, Copy)]
pub enum PathEnd<'a> {
    /// A column of `entity`
    Attribute {
        entity: &'a DbEntity,
        attribute: &'a DbAttribute,
    },
    /// The path ends on a relationship (the last hop); compared by key.
    Relationship,
}

/// 객체/DB 경로를 DB 관계 홉 + 끝점으로 해석한 결과
#[derive(Debug, Clone)]
pub struct ResolvedPath<'a> {
    pub hops: DbHops<'a>,
    pub end: PathEnd<'a>,
}

impl ResolvedPath<'_> {
    /// 경로가 to-many 관계를 지나면 결과 행이 곱해집니다.
    pub fn traverses_to_many(&self) -> bool {
        self.hops.iter().any(|h| h.relationship.to_many)
    }
}

/// 메타데이터 조회 진입점
#[derive(Debug, Default)]
pub struct EntityResolver {
    maps: Vec<DataMap>,
    db_index: HashMap<String, usize>,
    obj_index: HashMap<String, usize>,
}

impl EntityResolver {
    /// 여러 DataMap을 합쳐 resolver를 만듭니다. 이름 충돌과 맵 간 참조를 검사합니다.
    pub fn new(maps: Vec<DataMap>) -> CayxResult<Self> {
        let mut resolver = EntityResolver {
            maps,
            ..Default::default()
        };
        for (i, map) in resolver.maps.iter().enumerate() {
            for e in map.db_entities() {
                if resolver.db_index.insert(e.name.clone(), i).is_some() {
                    return Err(CayxError::Configuration(format!(
                        "duplicate DbEntity '{}' in data map '{}'",
                        e.name, map.name
                    )));
                }
            }
            for e in map.obj_entities() {
                if resolver.obj_index.insert(e.name.clone(), i).is_some() {
                    return Err(CayxError::Configuration(format!(
                        "duplicate ObjEntity '{}' in data map '{}'",
                        e.name, map.name
                    )));
                }
            }
        }
        resolver.validate()?;
        Ok(resolver)
    }

    fn validate(&self) -> CayxResult<()> {
        for map in &self.maps {
            for db in map.db_entities() {
                for rel in &db.relationships {
                    self.db_entity(&rel.target)?;
                }
            }
            for obj in map.obj_entities() {
                for rel in &obj.relationships {
                    self.obj_entity(&rel.target)?;
                    self.db_hops(&obj.db_entity, &rel.db_relationship_path, false)?;
                }
                for attr in obj.attributes.iter().filter(|a| a.is_flattened()) {
                    self.resolve_db_path(&obj.db_entity, &attr.db_attribute_path)?;
                }
            }
        }
        Ok(())
    }

    pub fn data_maps(&self) -> &[DataMap] {
        &self.maps
    }

    /// Name of the DataMap an ObjEntity belongs to.
    pub fn data_map_for(&self, obj_entity: &str) -> CayxResult<&DataMap> {
        self.obj_index
            .get(obj_entity)
            .map(|i| &self.maps[*i])
            .ok_or_else(|| unknown("ObjEntity", obj_entity))
    }

    pub fn db_entity(&self, name: &str) -> CayxResult<&DbEntity> {
        self.db_index
            .get(name)
            .and_then(|i| self.maps[*i].db_entity(name))
            .ok_or_else(|| unknown("DbEntity", name))
    }

    pub fn obj_entity(&self, name: &str) -> CayxResult<&ObjEntity> {
        self.obj_index
            .get(name)
            .and_then(|i| self.maps[*i].obj_entity(name))
            .ok_or_else(|| unknown("ObjEntity", name))
    }

    pub fn db_entity_for(&self, obj_entity: &str) -> CayxResult<&DbEntity> {
        let obj = self.obj_entity(obj_entity)?;
        self.db_entity(&obj.db_entity)
    }

    pub fn db_entities(&self) -> impl Iterator<Item = &DbEntity> {
        self.maps.iter().flat_map(|m| m.db_entities())
    }

    pub fn obj_entities(&self) -> impl Iterator<Item = &ObjEntity> {
        self.maps.iter().flat_map(|m| m.obj_entities())
    }

    // ════════════════════════════════════════════
    // Inheritance
    // ════════════════════════════════════════════

    /// Entity followed by its super entities, most specific first.
    pub fn hierarchy(&self, name: &str) -> CayxResult<Vec<&ObjEntity>> {
        let mut chain = Vec::new();
        let mut current = Some(self.obj_entity(name)?);
        while let Some(e) = current {
            if chain.iter().any(|c: &&ObjEntity| c.name == e.name) {
                return Err(CayxError::Configuration(format!(
                    "inheritance cycle at '{}'",
                    e.name
                )));
            }
            chain.push(e);
            current = match &e.super_entity {
                Some(s) => Some(self.obj_entity(s)?),
                None => None,
            };
        }
        Ok(chain)
    }

    /// Direct sub-entities.
    pub fn sub_entities(&self, name: &str) -> Vec<&ObjEntity> {
        self.obj_entities()
            .filter(|e| e.super_entity.as_deref() == Some(name))
            .collect()
    }

    /// All descendants, deepest first.
    pub fn descendants(&self, name: &str) -> Vec<&ObjEntity> {
        let mut out = Vec::new();
        for sub in self.sub_entities(name) {
            out.extend(self.descendants(&sub.name));
            out.push(sub);
        }
        out
    }

    pub fn is_sub_entity_of(&self, name: &str, super_name: &str) -> bool {
        self.hierarchy(name)
            .map(|chain| chain.iter().any(|e| e.name == super_name))
            .unwrap_or(false)
    }

    /// 상속 판별 조건: 엔티티 자신과 하위 엔티티의 조건을 OR로 결합.
    ///
    /// 자신에게 조건이 없으면 테이블의 모든 행이 대상이므로 `None` 입니다.
    pub fn inheritance_qualifier(&self, name: &str) -> CayxResult<Option<Expression>> {
        let entity = self.obj_entity(name)?;
        let Some(own) = &entity.qualifier else {
            return Ok(None);
        };
        let combined = self
            .descendants(name)
            .into_iter()
            .filter_map(|d| d.qualifier.clone())
            .fold(own.clone(), Expression::or);
        Ok(Some(combined))
    }

    /// 데이터 행에 맞는 가장 구체적인 엔티티를 찾습니다.
    pub fn entity_for_row<'a>(
        &'a self,
        root: &'a str,
        row: &dyn PropertySource,
    ) -> CayxResult<&'a ObjEntity> {
        for sub in self.descendants(root) {
            if let Some(q) = &sub.qualifier {
                if q.matches(row)? {
                    return Ok(sub);
                }
            }
        }
        self.obj_entity(root)
    }

    /// Attributes including inherited ones; a redeclared name overrides.
    pub fn attributes(&self, name: &str) -> CayxResult<Vec<&ObjAttribute>> {
        let mut out: Vec<&ObjAttribute> = Vec::new();
        for e in self.hierarchy(name)? {
            for a in &e.attributes {
                if !out.iter().any(|o| o.name == a.name) {
                    out.push(a);
                }
            }
        }
        Ok(out)
    }

    pub fn relationships(&self, name: &str) -> CayxResult<Vec<&ObjRelationship>> {
        let mut out: Vec<&ObjRelationship> = Vec::new();
        for e in self.hierarchy(name)? {
            for r in &e.relationships {
                if !out.iter().any(|o| o.name == r.name) {
                    out.push(r);
                }
            }
        }
        Ok(out)
    }

    pub fn attribute(&self, entity: &str, name: &str) -> CayxResult<Option<&ObjAttribute>> {
        Ok(self.attributes(entity)?.into_iter().find(|a| a.name == name))
    }

    pub fn relationship(&self, entity: &str, name: &str) -> CayxResult<Option<&ObjRelationship>> {
        Ok(self
            .relationships(entity)?
            .into_iter()
            .find(|r| r.name == name))
    }

    /// Relationship that must exist, as a configuration error otherwise.
    pub fn require_relationship(&self, entity: &str, name: &str) -> CayxResult<&ObjRelationship> {
        self.relationship(entity, name)?.ok_or_else(|| {
            CayxError::Configuration(format!("no relationship '{name}' in ObjEntity '{entity}'"))
        })
    }

    pub fn require_attribute(&self, entity: &str, name: &str) -> CayxResult<&ObjAttribute> {
        self.attribute(entity, name)?.ok_or_else(|| {
            CayxError::Configuration(format!("no attribute '{name}' in ObjEntity '{entity}'"))
        })
    }

    /// DbAttribute backing a non-flattened ObjAttribute.
    pub fn db_attribute_for(&self, entity: &str, attr: &ObjAttribute) -> CayxResult<&DbAttribute> {
        let db = self.db_entity_for(entity)?;
        db.attribute(&attr.db_attribute_path).ok_or_else(|| {
            CayxError::Configuration(format!(
                "no DbAttribute '{}' in '{}' for {entity}.{}",
                attr.db_attribute_path, db.name, attr.name
            ))
        })
    }

    // ════════════════════════════════════════════
    // Relationships
    // ════════════════════════════════════════════

    /// 반대 방향 DB 관계 (조인 컬럼을 뒤집어 매칭)
    pub fn reverse_db_relationship(
        &self,
        source: &str,
        rel: &DbRelationship,
    ) -> CayxResult<Option<&DbRelationship>> {
        let target = self.db_entity(&rel.target)?;
        Ok(target
            .relationships
            .iter()
            .find(|r| rel.is_reverse_of(source, r)))
    }

    /// 반대 방향 객체 관계: DB 경로가 정확히 역순인 관계
    pub fn reverse_relationship(
        &self,
        entity: &str,
        rel_name: &str,
    ) -> CayxResult<Option<&ObjRelationship>> {
        let obj = self.obj_entity(entity)?;
        let rel = self.require_relationship(entity, rel_name)?;
        let hops = self.db_hops(&obj.db_entity, &rel.db_relationship_path, false)?;

        let mut reversed = Vec::with_capacity(hops.len());
        for hop in hops.iter().rev() {
            match self.reverse_db_relationship(hop.source, hop.relationship)? {
                Some(r) => reversed.push(r.name.as_str()),
                None => return Ok(None),
            }
        }
        let path = reversed.join(".");
        Ok(self
            .relationships(&rel.target)?
            .into_iter()
            .find(|r| {
                r.db_relationship_path == path
                    && (r.target == entity
                        || self.is_sub_entity_of(entity, &r.target)
                        || self.is_sub_entity_of(&r.target, entity))
            }))
    }

    /// Whether the ObjRelationship is to-many at the object level.
    pub fn is_to_many(&self, entity: &str, rel_name: &str) -> CayxResult<bool> {
        let obj = self.obj_entity(entity)?;
        let rel = self.require_relationship(entity, rel_name)?;
        Ok(self
            .db_hops(&obj.db_entity, &rel.db_relationship_path, false)?
            .iter()
            .any(|h| h.relationship.to_many))
    }

    /// Expands a dot-separated DbRelationship path into hops.
    pub fn db_hops<'a>(
        &'a self,
        start: &str,
        path: &str,
        outer: bool,
    ) -> CayxResult<DbHops<'a>> {
        let mut hops = DbHops::new();
        let mut current = self.db_entity(start)?;
        for name in path.split('.') {
            let rel = current.relationship(name).ok_or_else(|| {
                CayxError::Configuration(format!(
                    "no DbRelationship '{name}' in '{}'",
                    current.name
                ))
            })?;
            hops.push(DbHop {
                source: current.name.as_str(),
                relationship: rel,
                outer,
            });
            current = self.db_entity(&rel.target)?;
        }
        Ok(hops)
    }

    // ════════════════════════════════════════════
    // Path resolution
    // ════════════════════════════════════════════

    /// 객체 경로를 DB 홉으로 해석합니다 (`toArtist.artistName`, `paintingArray+.paintingTitle`).
    pub fn resolve_obj_path<'a>(&'a self, root: &str, path: &str) -> CayxResult<ResolvedPath<'a>> {
        let components: Vec<&str> = path.split('.').collect();
        let mut hops = DbHops::new();
        let mut entity = self.obj_entity(root)?;

        for (i, raw) in components.iter().enumerate() {
            let last = i + 1 == components.len();
            let (name, outer) = match raw.strip_suffix('+') {
                Some(n) => (n, true),
                None => (*raw, false),
            };

            if let Some(rel) = self.relationship(&entity.name, name)? {
                hops.extend(self.db_hops(&entity.db_entity, &rel.db_relationship_path, outer)?);
                entity = self.obj_entity(&rel.target)?;
                if last {
                    return Ok(ResolvedPath {
                        hops,
                        end: PathEnd::Relationship,
                    });
                }
                continue;
            }

            let Some(attr) = self.attribute(&entity.name, name)? else {
                return Err(CayxError::Configuration(format!(
                    "can't resolve path component '{name}' of '{path}' in ObjEntity '{}'",
                    entity.name
                )));
            };
            if !last {
                return Err(CayxError::Configuration(format!(
                    "attribute '{name}' must be the last component of '{path}'"
                )));
            }
            let tail = self.resolve_db_path_outer(&entity.db_entity, &attr.db_attribute_path, outer)?;
            hops.extend(tail.hops);
            return Ok(ResolvedPath {
                hops,
                end: tail.end,
            });
        }

        Err(CayxError::Configuration(format!("empty path in '{root}'")))
    }

    /// DB 경로를 해석합니다 (`toArtist.ARTIST_NAME`, `ARTIST_ID`).
    pub fn resolve_db_path<'a>(&'a self, db_entity: &str, path: &str) -> CayxResult<ResolvedPath<'a>> {
        self.resolve_db_path_outer(db_entity, path, false)
    }

    fn resolve_db_path_outer<'a>(
        &'a self,
        db_entity: &str,
        path: &str,
        outer_all: bool,
    ) -> CayxResult<ResolvedPath<'a>> {
        let components: Vec<&str> = path.split('.').collect();
        let mut hops = DbHops::new();
        let mut entity = self.db_entity(db_entity)?;

        for (i, raw) in components.iter().enumerate() {
            let last = i + 1 == components.len();
            let (name, outer) = match raw.strip_suffix('+') {
                Some(n) => (n, true),
                None => (*raw, outer_all),
            };
            if let Some(rel) = entity.relationship(name) {
                hops.push(DbHop {
                    source: entity.name.as_str(),
                    relationship: rel,
                    outer,
                });
                entity = self.db_entity(&rel.target)?;
                if last {
                    return Ok(ResolvedPath {
                        hops,
                        end: PathEnd::Relationship,
                    });
                }
                continue;
            }
            let attribute = entity.attribute(name).ok_or_else(|| {
                CayxError::Configuration(format!(
                    "no DbAttribute or DbRelationship '{name}' in '{}' (path '{path}')",
                    entity.name
                ))
            })?;
            if !last {
                return Err(CayxError::Configuration(format!(
                    "column '{name}' must be the last component of '{path}'"
                )));
            }
            return Ok(ResolvedPath {
                hops,
                end: PathEnd::Attribute { entity, attribute },
            });
        }
        Err(CayxError::Configuration(format!("empty path in '{db_entity}'")))
    }
}

fn unknown(kind: &str, name: &str) -> CayxError {
    CayxError::Configuration(format!("unknown {kind} '{name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{DbAttribute, DbRelationship, JdbcType, ObjAttribute};
    use crate::value::Value;

    fn resolver() -> EntityResolver {
        let map = DataMap::new("m")
            .with_db_entity(
                DbEntity::new("ARTIST")
                    .attr(DbAttribute::new("ARTIST_ID", JdbcType::BigInt).pk())
                    .attr(DbAttribute::new("ARTIST_NAME", JdbcType::Char))
                    .rel(DbRelationship::to_many("paintingArray", "PAINTING").join("ARTIST_ID", "ARTIST_ID")),
            )
            .with_db_entity(
                DbEntity::new("PAINTING")
                    .attr(DbAttribute::new("PAINTING_ID", JdbcType::Integer).pk())
                    .attr(DbAttribute::new("PAINTING_TITLE", JdbcType::Varchar))
                    .attr(DbAttribute::new("ARTIST_ID", JdbcType::BigInt))
                    .rel(DbRelationship::to_one("toArtist", "ARTIST").join("ARTIST_ID", "ARTIST_ID")),
            )
            .with_db_entity(
                DbEntity::new("PERSON")
                    .attr(DbAttribute::new("PERSON_ID", JdbcType::Integer).pk())
                    .attr(DbAttribute::new("PERSON_TYPE", JdbcType::Char)),
            )
            .with_obj_entity(
                ObjEntity::new("Artist", "ARTIST")
                    .attr(ObjAttribute::new("artistName", "ARTIST_NAME"))
                    .rel(ObjRelationship::new("paintingArray", "Painting", "paintingArray")),
            )
            .with_obj_entity(
                ObjEntity::new("Painting", "PAINTING")
                    .attr(ObjAttribute::new("paintingTitle", "PAINTING_TITLE"))
                    .rel(ObjRelationship::new("toArtist", "Artist", "toArtist")),
            )
            .with_obj_entity(ObjEntity::new("AbstractPerson", "PERSON"))
            .with_obj_entity(
                ObjEntity::new("Employee", "PERSON")
                    .extends("AbstractPerson")
                    .qualifier(Expression::match_db("PERSON_TYPE", "EE")),
            )
            .with_obj_entity(
                ObjEntity::new("Manager", "PERSON")
                    .extends("Employee")
                    .qualifier(Expression::match_db("PERSON_TYPE", "EM")),
            );
        EntityResolver::new(vec![map]).unwrap()
    }

    #[test]
    fn test_resolve_obj_path_through_to_many() {
        let r = resolver();
        let path = r.resolve_obj_path("Artist", "paintingArray+.paintingTitle").unwrap();
        assert_eq!(path.hops.len(), 1);
        assert!(path.hops[0].outer);
        assert!(path.traverses_to_many());
        match path.end {
            PathEnd::Attribute { entity, attribute } => {
                assert_eq!(entity.name, "PAINTING");
                assert_eq!(attribute.name, "PAINTING_TITLE");
            }
            PathEnd::Relationship => panic!("expected attribute"),
        }
    }

    #[test]
    fn test_resolve_path_errors() {
        let r = resolver();
        assert!(matches!(
            r.resolve_obj_path("Artist", "noSuchThing"),
            Err(CayxError::Configuration(_))
        ));
        assert!(r.resolve_obj_path("Painting", "paintingTitle.x").is_err());
        let rel_end = r.resolve_obj_path("Painting", "toArtist").unwrap();
        assert!(matches!(rel_end.end, PathEnd::Relationship));
    }

    #[test]
    fn test_reverse_relationships() {
        let r = resolver();
        let rev = r.reverse_relationship("Artist", "paintingArray").unwrap().unwrap();
        assert_eq!(rev.name, "toArtist");
        let rev = r.reverse_relationship("Painting", "toArtist").unwrap().unwrap();
        assert_eq!(rev.name, "paintingArray");
        assert!(r.is_to_many("Artist", "paintingArray").unwrap());
        assert!(!r.is_to_many("Painting", "toArtist").unwrap());
    }

    #[test]
    fn test_inheritance_qualifier_and_row_resolution() {
        let r = resolver();
        assert!(r.inheritance_qualifier("AbstractPerson").unwrap().is_none());
        let q = r.inheritance_qualifier("Employee").unwrap().unwrap();
        assert_eq!(q.to_string(), "db:PERSON_TYPE = 'EE' or db:PERSON_TYPE = 'EM'");

        let mut row: HashMap<String, Value> = HashMap::new();
        row.insert("PERSON_TYPE".to_string(), Value::from("EM"));
        assert_eq!(r.entity_for_row("AbstractPerson", &row).unwrap().name, "Manager");
        row.insert("PERSON_TYPE".to_string(), Value::from("XX"));
        assert_eq!(r.entity_for_row("AbstractPerson", &row).unwrap().name, "AbstractPerson");
        assert!(r.is_sub_entity_of("Manager", "AbstractPerson"));
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let a = DataMap::new("a").with_db_entity(DbEntity::new("T"));
        let b = DataMap::new("b").with_db_entity(DbEntity::new("T"));
        assert!(EntityResolver::new(vec![a, b]).is_err());
    }
}
