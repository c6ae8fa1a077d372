//! PostgreSQL backend over a sqlx pool; one transaction per session.

use super::{Backend, DbError, Dialect, Session};
use crate::query::{Condition, Select};
use crate::schema::{EntityDescriptor, FieldDescriptor, Row, Secondary, SemanticType};
use crate::sql::{self, bind_text, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Transaction};

#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        PgBackend { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn begin(&self) -> Result<Box<dyn Session>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSession { tx }))
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }
}

pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

impl PgSession {
    async fn fetch_rows(&mut self, entity: &EntityDescriptor, q: &QueryBuf) -> Result<Vec<Row>, DbError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(bind_text(p));
        }
        let rows = query.fetch_all(&mut *self.tx).await?;
        Ok(rows.iter().map(|r| row_to_json(entity, r)).collect())
    }

    async fn execute(&mut self, q: &QueryBuf) -> Result<u64, DbError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(bind_text(p));
        }
        let done = query.execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl Session for PgSession {
    async fn select(&mut self, entity: &EntityDescriptor, select: &Select) -> Result<Vec<Row>, DbError> {
        let q = sql::select(entity, select);
        self.fetch_rows(entity, &q).await
    }

    async fn count(&mut self, entity: &EntityDescriptor, filters: &[Condition]) -> Result<u64, DbError> {
        use sqlx::Row as _;
        let q = sql::count(entity, filters);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(bind_text(p));
        }
        let row = query.fetch_one(&mut *self.tx).await?;
        let total: i64 = row.try_get(0)?;
        Ok(total.max(0) as u64)
    }

    async fn insert(&mut self, entity: &EntityDescriptor, row: &Row) -> Result<Row, DbError> {
        let q = sql::insert(entity, row);
        self.fetch_rows(entity, &q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Execution(format!("insert into {} returned no row", entity.table_name)))
    }

    async fn update(&mut self, entity: &EntityDescriptor, key: &Row, changes: &Row) -> Result<Row, DbError> {
        let q = sql::update(entity, key, changes);
        self.fetch_rows(entity, &q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Missing {
                table: entity.table_name.clone(),
            })
    }

    async fn delete(&mut self, entity: &EntityDescriptor, key: &Row) -> Result<(), DbError> {
        let q = sql::delete(entity, key);
        if self.execute(&q).await? == 0 {
            return Err(DbError::Missing {
                table: entity.table_name.clone(),
            });
        }
        Ok(())
    }

    async fn link(&mut self, secondary: &Secondary, local: &Value, remote: &Value) -> Result<(), DbError> {
        self.execute(&sql::link(secondary, local, remote)).await?;
        Ok(())
    }

    async fn unlink(&mut self, secondary: &Secondary, local: &Value, remote: Option<&Value>) -> Result<(), DbError> {
        self.execute(&sql::unlink(secondary, local, remote)).await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn row_to_json(entity: &EntityDescriptor, row: &PgRow) -> Row {
    entity
        .scalars()
        .map(|f| (f.name.clone(), cell_to_value(row, f)))
        .collect()
}

/// Decodes one selected column by its semantic type; the builder already turned
/// datetimes, dates, numerics and enums into text.
fn cell_to_value(row: &PgRow, field: &FieldDescriptor) -> Value {
    use sqlx::Row as _;
    let name = field.name.as_str();
    match field.semantic {
        SemanticType::Integer | SemanticType::BigInteger => {
            if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
                return Value::from(n);
            }
            if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
                return Value::from(n);
            }
            if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
                return Value::from(n);
            }
            Value::Null
        }
        SemanticType::Float => {
            if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
                return serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null);
            }
            if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
                return serde_json::Number::from_f64(n as f64).map(Value::Number).unwrap_or(Value::Null);
            }
            Value::Null
        }
        SemanticType::Boolean => row
            .try_get::<Option<bool>, _>(name)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        SemanticType::Json => row
            .try_get::<Option<Value>, _>(name)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        SemanticType::Raw => {
            if let Ok(Some(bytes)) = row.try_get::<Option<Vec<u8>>, _>(name) {
                return Value::String(String::from_utf8_lossy(&bytes).into_owned());
            }
            row.try_get::<Option<String>, _>(name)
                .ok()
                .flatten()
                .map(Value::String)
                .unwrap_or(Value::Null)
        }
        _ => row
            .try_get::<Option<String>, _>(name)
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
