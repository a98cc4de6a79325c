//! SQL 번역기
//!
//! - [`SelectTranslator`]: SelectQuery → SELECT (조인, 프리페치, 상속, DISTINCT 처리)
//! - [`QualifierTranslator`]: 표현식 → WHERE/HAVING 조건
//! - [`BatchTranslator`]: INSERT/UPDATE/DELETE
//! - [`ddl`]: CREATE/DROP TABLE, FK, UNIQUE, [`SchemaGenerator`]

pub mod batch;
pub mod ddl;
pub mod join;
pub mod qualifier;
pub mod select;

pub use batch::{BatchStatement, BatchTranslator};
pub use ddl::SchemaGenerator;
pub use join::{JoinTree, JoinType};
pub use qualifier::QualifierTranslator;
pub use select::{ColumnDescriptor, SelectTranslator, TranslatedSelect};
