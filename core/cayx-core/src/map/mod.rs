//! 매핑 메타데이터 — DbEntity/ObjEntity 그래프, 경로 해석, 의존성 정렬
//!
//! 엔티티는 DataMap이 이름 키로 소유하고, 관계는 대상 이름으로만 참조합니다.

pub mod data_map;
pub mod db;
pub mod obj;
pub mod resolver;
pub mod sorter;
pub mod types;

pub use data_map::DataMap;
pub use db::{DbAttribute, DbEntity, DbJoin, DbRelationship};
pub use obj::{DeleteRule, LockType, ObjAttribute, ObjEntity, ObjRelationship};
pub use resolver::{DbHop, DbHops, EntityResolver, PathEnd, ResolvedPath};
pub use sorter::EntitySorter;
pub use types::JdbcType;
