//! Object-level metadata: persistent classes mapped onto DbEntities.

use crate::exp::Expression;
use serde::{Deserialize, Serialize};

/// What happens to related objects when the source object is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteRule {
    #[default]
    NoAction,
    /// Unset the reverse relationship of related objects
    Nullify,
    /// Delete related objects as well
    Cascade,
    /// Refuse to delete while related objects exist
    Deny,
}

/// Concurrency control applied to UPDATE/DELETE of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    #[default]
    None,
    /// Qualify UPDATE/DELETE with the snapshot values of locking attributes
    Optimistic,
}

/// A persistent property mapped to a column.
///
/// `db_attribute_path` is either a column of the entity's own table
/// (`ARTIST_NAME`) or a dot-path through DbRelationships
/// (`toArtist.ARTIST_NAME`) for a flattened attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjAttribute {
    pub name: String,
    pub db_attribute_path: String,
    #[serde(default)]
    pub used_for_locking: bool,
}

impl ObjAttribute {
    pub fn new(name: impl Into<String>, db_attribute_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_attribute_path: db_attribute_path.into(),
            used_for_locking: false,
        }
    }

    pub fn locking(mut self) -> Self {
        self.used_for_locking = true;
        self
    }

    /// Flattened attributes read through a join and are never written.
    pub fn is_flattened(&self) -> bool {
        self.db_attribute_path.contains('.')
    }
}

/// A relationship between two persistent classes.
///
/// A multi-hop `db_relationship_path` (`artistExhibitArray.toExhibit`) is a
/// flattened relationship mediated by a link table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjRelationship {
    pub name: String,
    pub target: String,
    pub db_relationship_path: String,
    #[serde(default)]
    pub delete_rule: DeleteRule,
    #[serde(default)]
    pub used_for_locking: bool,
}

impl ObjRelationship {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        db_relationship_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            db_relationship_path: db_relationship_path.into(),
            delete_rule: DeleteRule::NoAction,
            used_for_locking: false,
        }
    }

    pub fn delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = rule;
        self
    }

    pub fn is_flattened(&self) -> bool {
        self.db_relationship_path.contains('.')
    }

    pub fn db_path_components(&self) -> impl Iterator<Item = &str> {
        self.db_relationship_path.split('.')
    }
}

/// A persistent class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjEntity {
    pub name: String,
    /// Table of the entity; sub-entities share the super entity's table.
    pub db_entity: String,
    #[serde(default)]
    pub super_entity: Option<String>,
    /// Discriminator restricting the shared table to this entity's rows.
    #[serde(default, with = "qualifier_serde")]
    pub qualifier: Option<Expression>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub lock_type: LockType,
    #[serde(default)]
    pub attributes: Vec<ObjAttribute>,
    #[serde(default)]
    pub relationships: Vec<ObjRelationship>,
}

impl ObjEntity {
    pub fn new(name: impl Into<String>, db_entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_entity: db_entity.into(),
            super_entity: None,
            qualifier: None,
            read_only: false,
            lock_type: LockType::None,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn attr(mut self, attribute: ObjAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn rel(mut self, relationship: ObjRelationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn extends(mut self, super_entity: impl Into<String>) -> Self {
        self.super_entity = Some(super_entity.into());
        self
    }

    pub fn qualifier(mut self, qualifier: Expression) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn optimistic_locking(mut self) -> Self {
        self.lock_type = LockType::Optimistic;
        self
    }

    /// Declared attribute (not inherited).
    pub fn declared_attribute(&self, name: &str) -> Option<&ObjAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Declared relationship (not inherited).
    pub fn declared_relationship(&self, name: &str) -> Option<&ObjRelationship> {
        self.relationships.iter().find(|r| r.name == name)
    }
}

mod qualifier_serde {
    use crate::exp::Expression;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(q: &Option<Expression>, s: S) -> Result<S::Ok, S::Error> {
        match q {
            Some(expr) => s.serialize_some(&expr.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Expression>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        raw.map(|s| Expression::parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
