//! Storage seam: one transactional session per request.

mod memory;
mod postgres;
mod reflect;

pub use memory::MemoryBackend;
pub use postgres::PgBackend;
pub use reflect::reflect_schema;

use crate::query::{Condition, Select};
use crate::schema::{EntityDescriptor, Row, Secondary};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    NotNull,
    NoDefault,
    ForeignKey,
}

/// Raw storage failure; classified into the API taxonomy at the response boundary.
#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("{kind:?} constraint violated on {table}")]
    Constraint {
        kind: ConstraintKind,
        table: String,
        column: Option<String>,
        value: Option<Value>,
    },
    #[error("no row in {table} matches the key")]
    Missing { table: String },
    #[error("connection: {0}")]
    Connection(String),
    #[error("execution: {0}")]
    Execution(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Memory,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Session>, DbError>;

    async fn ping(&self) -> Result<(), DbError>;

    fn dialect(&self) -> Dialect;
}

/// An open transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait Session: Send {
    async fn select(&mut self, entity: &EntityDescriptor, select: &Select) -> Result<Vec<Row>, DbError>;

    async fn count(&mut self, entity: &EntityDescriptor, filters: &[Condition]) -> Result<u64, DbError>;

    /// Inserts `row` and returns the stored row including defaults.
    async fn insert(&mut self, entity: &EntityDescriptor, row: &Row) -> Result<Row, DbError>;

    /// Applies `changes` to the row identified by `key` (primary key columns).
    async fn update(&mut self, entity: &EntityDescriptor, key: &Row, changes: &Row) -> Result<Row, DbError>;

    async fn delete(&mut self, entity: &EntityDescriptor, key: &Row) -> Result<(), DbError>;

    async fn link(&mut self, secondary: &Secondary, local: &Value, remote: &Value) -> Result<(), DbError>;

    /// Removes junction rows for `local`; only the one pointing at `remote` when given.
    async fn unlink(&mut self, secondary: &Secondary, local: &Value, remote: Option<&Value>) -> Result<(), DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
