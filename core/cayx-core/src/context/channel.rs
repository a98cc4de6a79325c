//! DataChannel — 컨텍스트가 부모에게 조회와 커밋을 위임하는 인터페이스
//!
//! 최상위 컨텍스트의 부모는 [`DataDomain`](crate::access::DataDomain)이고,
//! 중첩 컨텍스트의 부모는 다른 [`ObjectContext`](super::ObjectContext)입니다.

use crate::access::{DataRowStore, Transaction};
use crate::context::ObjectId;
use crate::error::CayxResult;
use crate::event::{CallbackRegistry, EventManager};
use crate::map::EntityResolver;
use crate::query::SelectQuery;
use crate::row::DataRow;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// 부모 채널
pub trait DataChannel: Send + Sync {
    fn entity_resolver(&self) -> &Arc<EntityResolver>;

    fn event_manager(&self) -> &Arc<EventManager>;

    fn callbacks(&self) -> &Arc<CallbackRegistry>;

    /// Snapshot cache shared by every context of the runtime.
    fn snapshot_store(&self) -> &Arc<DataRowStore>;

    /// Rows of a select as seen through this channel.
    fn select_rows(&self, query: &SelectQuery) -> CayxResult<Vec<DataRow>>;

    /// Current row of an object, fetched if necessary. `None` if it doesn't exist.
    fn snapshot(&self, id: &ObjectId) -> CayxResult<Option<DataRow>>;

    /// Applies a child's changes. With [`CommitMode::Cascade`] the changes
    /// continue all the way to the database.
    fn commit_changes(
        &self,
        changes: &ChangeSet,
        mode: CommitMode,
        tx: Option<&mut Transaction>,
    ) -> CayxResult<CommitResult>;

    /// Reverts the channel's own uncommitted changes, up to the root.
    fn rollback_changes(&self) -> CayxResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Stop at the parent context
    ToParent,
    /// Continue to the database
    Cascade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOperation {
    Insert,
    Update,
    Delete,
}

/// 객체 하나의 변경 내용
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDiff {
    pub id: ObjectId,
    /// Concrete ObjEntity
    pub entity: String,
    pub operation: DiffOperation,
    /// ObjAttribute name → value: every attribute for an insert, changed
    /// ones for an update
    pub attributes: BTreeMap<String, Value>,
    /// To-master DbRelationship name → target
    pub to_one: BTreeMap<String, Option<ObjectId>>,
    /// Last committed attribute values (optimistic locking)
    pub committed_attributes: BTreeMap<String, Value>,
    pub committed_to_one: BTreeMap<String, Option<ObjectId>>,
}

/// Flattened (link table) relationship change.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkDiff {
    pub source: ObjectId,
    pub source_entity: String,
    /// Flattened ObjRelationship of the source entity
    pub relationship: String,
    pub target: ObjectId,
    pub insert: bool,
}

/// 컨텍스트 하나의 커밋 단위
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Committing context
    pub context: u64,
    pub objects: Vec<ObjectDiff>,
    pub links: Vec<LinkDiff>,
}

impl ChangeSet {
    pub fn new(context: u64) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.links.is_empty()
    }

    pub fn count(&self, operation: DiffOperation) -> usize {
        self.objects.iter().filter(|o| o.operation == operation).count()
    }
}

/// 커밋 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitResult {
    /// Temporary id → permanent id of every inserted object
    pub id_map: HashMap<ObjectId, ObjectId>,
    /// Committed rows keyed by the final id
    pub snapshots: HashMap<ObjectId, DataRow>,
}

impl CommitResult {
    /// Final id of an object after the commit.
    pub fn resolve<'a>(&'a self, id: &'a ObjectId) -> &'a ObjectId {
        self.id_map.get(id).unwrap_or(id)
    }
}
