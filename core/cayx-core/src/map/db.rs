//! DB-level metadata: tables, columns and foreign-key relationships.

use crate::map::types::JdbcType;
use serde::{Deserialize, Serialize};

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub jdbc_type: JdbcType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub mandatory: bool,
    /// Value assigned by the database on insert (auto-increment).
    #[serde(default)]
    pub generated: bool,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
}

impl DbAttribute {
    pub fn new(name: impl Into<String>, jdbc_type: JdbcType) -> Self {
        Self {
            name: name.into(),
            jdbc_type,
            primary_key: false,
            mandatory: false,
            generated: false,
            max_length: None,
            scale: None,
        }
    }

    /// Primary key column; implies mandatory.
    pub fn pk(mut self) -> Self {
        self.primary_key = true;
        self.mandatory = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    pub fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }
}

/// One column pair of a foreign-key relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbJoin {
    pub source: String,
    pub target: String,
}

/// A directed foreign-key relationship between two tables.
///
/// Every relationship is expected to have a reverse declared on the target
/// entity; the resolver finds it by matching swapped joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbRelationship {
    pub name: String,
    pub target: String,
    pub joins: Vec<DbJoin>,
    #[serde(default)]
    pub to_many: bool,
    /// Target PK is propagated from the source PK (one-to-one dependent row).
    #[serde(default)]
    pub to_dependent_pk: bool,
}

impl DbRelationship {
    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            joins: Vec::new(),
            to_many: false,
            to_dependent_pk: false,
        }
    }

    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            to_many: true,
            ..Self::to_one(name, target)
        }
    }

    pub fn join(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.joins.push(DbJoin {
            source: source.into(),
            target: target.into(),
        });
        self
    }

    pub fn dependent_pk(mut self) -> Self {
        self.to_dependent_pk = true;
        self
    }

    /// Whether `other` (declared on the target entity) is the reverse of this one.
    pub fn is_reverse_of(&self, source_entity: &str, other: &DbRelationship) -> bool {
        other.target == source_entity
            && other.joins.len() == self.joins.len()
            && self.joins.iter().all(|j| {
                other
                    .joins
                    .iter()
                    .any(|o| o.source == j.target && o.target == j.source)
            })
    }

    /// The source row holds the FK: a to-one that is not the master side of
    /// a dependent PK. Insert order puts the target (master) first.
    pub fn is_to_master(&self) -> bool {
        !self.to_many && !self.to_dependent_pk
    }
}

/// A table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbEntity {
    pub name: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub attributes: Vec<DbAttribute>,
    #[serde(default)]
    pub relationships: Vec<DbRelationship>,
    /// Multi-column unique constraints emitted by the schema generator.
    #[serde(default)]
    pub unique_keys: Vec<Vec<String>>,
}

impl DbEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            attributes: Vec::new(),
            relationships: Vec::new(),
            unique_keys: Vec::new(),
        }
    }

    pub fn attr(mut self, attribute: DbAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn rel(mut self, relationship: DbRelationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique_keys
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Schema-qualified table name.
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&DbAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&DbRelationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &DbAttribute> {
        self.attributes.iter().filter(|a| a.primary_key)
    }

    pub fn has_primary_key(&self) -> bool {
        self.attributes.iter().any(|a| a.primary_key)
    }

    /// PK column whose value is copied from a master row through a to-one join.
    pub fn is_propagated_pk(&self, column: &str) -> bool {
        self.relationships
            .iter()
            .filter(|r| r.is_to_master())
            .any(|r| r.joins.iter().any(|j| j.source == column))
    }

    /// The single PK column cayx has to generate itself, if any.
    ///
    /// Compound keys, DB-generated keys and keys propagated from a master
    /// row are excluded.
    pub fn generated_pk_candidate(&self) -> Option<&DbAttribute> {
        let mut pk = self.primary_key();
        match (pk.next(), pk.next()) {
            (Some(attr), None) if !attr.generated && !self.is_propagated_pk(&attr.name) => Some(attr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artist() -> DbEntity {
        DbEntity::new("ARTIST")
            .attr(DbAttribute::new("ARTIST_ID", JdbcType::BigInt).pk())
            .attr(DbAttribute::new("ARTIST_NAME", JdbcType::Char).mandatory().max_length(254))
            .rel(DbRelationship::to_many("paintingArray", "PAINTING").join("ARTIST_ID", "ARTIST_ID"))
    }

    fn painting() -> DbEntity {
        DbEntity::new("PAINTING")
            .attr(DbAttribute::new("PAINTING_ID", JdbcType::Integer).pk())
            .attr(DbAttribute::new("ARTIST_ID", JdbcType::BigInt))
            .rel(DbRelationship::to_one("toArtist", "ARTIST").join("ARTIST_ID", "ARTIST_ID"))
    }

    #[test]
    fn test_reverse_relationship_match() {
        let a = artist();
        let p = painting();
        let to_many = a.relationship("paintingArray").unwrap();
        let to_one = p.relationship("toArtist").unwrap();
        assert!(to_many.is_reverse_of("ARTIST", to_one));
        assert!(to_one.is_reverse_of("PAINTING", to_many));
    }

    #[test]
    fn test_to_master_detection() {
        let a = artist();
        let p = painting();
        assert!(p.relationship("toArtist").unwrap().is_to_master());
        assert!(!a.relationship("paintingArray").unwrap().is_to_master());
    }

    #[test]
    fn test_pk_generation_candidates() {
        assert_eq!(artist().generated_pk_candidate().map(|a| a.name.as_str()), Some("ARTIST_ID"));
        let info = DbEntity::new("PAINTING_INFO")
            .attr(DbAttribute::new("PAINTING_ID", JdbcType::Integer).pk())
            .rel(DbRelationship::to_one("painting", "PAINTING").join("PAINTING_ID", "PAINTING_ID"));
        assert!(info.is_propagated_pk("PAINTING_ID"));
        assert!(info.generated_pk_candidate().is_none());
        let gallery = DbEntity::new("GALLERY")
            .attr(DbAttribute::new("GALLERY_ID", JdbcType::Integer).pk().generated());
        assert!(gallery.generated_pk_candidate().is_none());
    }

    #[test]
    fn test_primary_key_columns() {
        let a = artist();
        let pk: Vec<_> = a.primary_key().map(|a| a.name.as_str()).collect();
        assert_eq!(pk, vec!["ARTIST_ID"]);
        assert!(a.attribute("ARTIST_NAME").unwrap().mandatory);
    }
}
