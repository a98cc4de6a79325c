//! # cayx — Object-Relational Persistence Core
//!
//! cayx는 매핑 메타데이터(DataMap)를 바탕으로 객체 그래프를 관계형 데이터베이스에
//! 저장하고 불러오는 영속성 엔진입니다. 순수 Rust로 구현되었으며 SQLite를 기본
//! 드라이버로 사용합니다.
//!
//! ## 주요 특징
//!
//! - **쿼리 번역**: 객체 경로 표현식 → 조인, 상속 한정자, 프리페치를 포함한 SQL
//! - **작업 단위**: [`ObjectContext`]가 NEW/MODIFIED/DELETED/HOLLOW 상태를 추적하고
//!   관계의 양방향을 유지
//! - **커밋**: PK 생성, FK 전파, 의존성 순서 배치, 낙관적 잠금을 하나의 트랜잭션으로
//! - **중첩 컨텍스트**: 자식 컨텍스트의 변경을 부모로 커밋하거나 되돌리기
//! - **스냅샷 캐시**: 컨텍스트 간 공유되는 버전 관리 데이터 행 캐시와 변경 이벤트
//!
//! ## 빠른 시작
//!
//! ```rust,no_run
//! use cayx_core::{ServerRuntime, query::SelectQuery, exp::parse_expression};
//!
//! # fn main() -> cayx_core::CayxResult<()> {
//! let runtime = ServerRuntime::builder()
//!     .data_map_json(std::fs::read_to_string("testmap.json")?)
//!     .create_schema(true)
//!     .build()?;
//!
//! // 객체 생성 후 커밋
//! let context = runtime.create_context();
//! let artist = context.new_object("Artist")?;
//! context.write_property(artist, "artistName", "Monet")?;
//! context.commit_changes()?;
//!
//! // 조회
//! let query = SelectQuery::new("Artist")
//!     .qualifier(parse_expression("artistName like 'M%'")?);
//! let artists = context.perform_query(&query)?;
//! assert_eq!(artists.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## 아키텍처
//!
//! ```text
//! ObjectContext (자식) → ObjectContext (부모) → DataDomain → DataNode → SQLite
//!        │                                          │
//!        └──────── DataChannel ─────────────────────┘
//! ```
//!
//! ## 모듈 구조
//!
//! - [`map`]: DbEntity/ObjEntity 메타데이터, 경로 해석, 의존성 정렬
//! - [`exp`]: 한정자 표현식, 파서, 인메모리 평가
//! - [`query`]: SelectQuery, 배치 쿼리, 정렬, 프리페치, 결과 캐시
//! - [`dba`]: DbAdapter (SQL 방언, DDL)
//! - [`translator`]: SELECT/배치/DDL SQL 번역
//! - [`access`]: 커넥션 풀, 트랜잭션, DataNode, 스냅샷 캐시, DataDomain
//! - [`context`]: ObjectContext (작업 단위)
//! - [`event`]: 이벤트 관리자와 생명주기 콜백
//! - [`config`] / [`runtime`]: 설정과 조립

// generated `::cayx_core::...` paths resolve inside this crate too
extern crate self as cayx_core;

pub mod access;
pub mod config;
pub mod context;
pub mod dba;
pub mod error;
pub mod event;
pub mod exp;
pub mod map;
pub mod query;
pub mod row;
pub mod runtime;
pub mod translator;
pub mod value;

// Logging utilities
pub mod logging;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export commonly used types
pub use access::{DataDomain, DataNode, Transaction};
pub use config::RuntimeConfig;
pub use context::{ObjRef, ObjectContext, ObjectId, PersistenceState};
pub use error::{CayxError, CayxResult};
pub use row::{DataRow, FromDataRow, FromValue};
pub use runtime::ServerRuntime;
pub use value::Value;

// Re-export derive macros
pub use cayx_derive::DataObject;
