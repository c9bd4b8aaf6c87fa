//! # DQX: Embedded Document-Query Engine
//!
//! DQX는 인메모리 JSON 문서 컬렉션을 위한 임베디드 쿼리 엔진입니다.
//! 질의 객체를 파싱하고, 등록된 인덱스로 재작성한 뒤, 바이트코드로 컴파일하여
//! 스택/레지스터 VM에서 실행합니다.
//!
//! ## 빠른 시작
//!
//! ```rust
//! use dqx_core::{Database, IndexKind, QueryConditions, SortOrder};
//! use serde_json::json;
//!
//! # fn main() -> dqx_core::DqxResult<()> {
//! let mut db = Database::in_memory();
//! let users = db.create_collection("users")?;
//!
//! users.insert(json!({"name": "kim", "age": 31, "city": "Seoul"}))?;
//! users.insert(json!({"name": "lee", "age": 25, "city": "Busan"}))?;
//! users.ensure_index(&["city"], IndexKind::Hash)?;
//!
//! // 조회
//! let seoul = users.find(
//!     &json!({"city": "Seoul", "age": {"$gte": 30}}),
//!     &QueryConditions::new().sort_by("age", SortOrder::Ascending),
//! )?;
//! assert_eq!(seoul.len(), 1);
//!
//! // 변경 (query → mutate 2단계 실행)
//! users.update(&json!({"name": "lee"}), &json!({"$set": {"city": "Seoul"}}), false)?;
//! assert_eq!(users.count(&json!({"city": "Seoul"}))?, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## 아키텍처
//!
//! ```text
//! predicate object → Parser → QueryTree → Visitor (index substitution)
//!          → Compiler → Program (bytecode) → VirtualMachine → [DocId]
//!                                                  └─ mutate phase → rindex
//! ```
//!
//! ## 모듈 구조
//!
//! - [`btree`]: order-N B+Tree ([`IndexTree`])
//! - [`index`]: tree / hash document indices
//! - [`query`]: parser, AST, index selection
//! - [`vm`]: compiler, opcodes, virtual machine, program cache
//! - [`collection`]: in-memory [`Collection`]
//! - [`engine`]: [`Database`] facade
//! - [`config`], [`error`], [`logging`]: ambient

pub mod btree;
pub mod collection;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod geo;
pub mod index;
pub mod logging;
pub mod query;
pub mod vm;

// ════════════════════════════════════════════
// Public API Re-exports
// ════════════════════════════════════════════

pub use btree::IndexTree;
pub use collection::{Collection, DocumentStore};
pub use config::EngineConfig;
pub use document::{DocId, Document};
pub use engine::Database;
pub use error::{DqxError, DqxResult};
pub use index::{DocumentIndex, HashIndex, IndexKey, IndexKind, TreeIndex};
pub use query::{QueryTree, parse_query, visit};
pub use vm::{
    Opcode, Program, QueryConditions, SortOrder, VirtualMachine, compile_mutate, compile_query,
};
