//! Per-request state threaded through compiler, serializer and executor.

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::query::QueryPlan;
use crate::schema::{CommitHook, Registry, ResourceSchema, Row};
use crate::serialize::Projection;
use crate::store::Session;
use axum::http::Extensions;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    Created,
    Updated,
    Deleted,
}

struct Pending {
    key: (usize, HookKind, String),
    hook: CommitHook,
    row: Row,
}

pub struct RequestContext {
    session: Box<dyn Session>,
    pub registry: Arc<Registry>,
    pub config: Arc<ApiConfig>,
    pub plan: QueryPlan,
    /// Opaque caller data (auth, tenant, ...) handed to filter hooks.
    pub extensions: Extensions,
    projections: HashMap<String, Arc<Projection>>,
    pending: Vec<Pending>,
}

impl RequestContext {
    pub fn new(
        session: Box<dyn Session>,
        registry: Arc<Registry>,
        config: Arc<ApiConfig>,
        plan: QueryPlan,
        extensions: Extensions,
    ) -> Self {
        RequestContext {
            session,
            registry,
            config,
            plan,
            extensions,
            projections: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn session(&mut self) -> &mut dyn Session {
        self.session.as_mut()
    }

    /// Dump projection for `schema` under this request's `_fields` / `_except`.
    pub fn projection(&mut self, schema: &ResourceSchema) -> Arc<Projection> {
        if let Some(p) = self.projections.get(&schema.name) {
            return p.clone();
        }
        let projection = Arc::new(Projection::build(schema, &self.plan));
        self.projections.insert(schema.name.clone(), projection.clone());
        projection
    }

    /// Queues `schema`'s post-commit hook of `kind` for `row`. A second queueing for the
    /// same hook and instance only refreshes the row.
    pub fn queue(&mut self, schema: &ResourceSchema, kind: HookKind, row: &Row) {
        let hook = match kind {
            HookKind::Created => &schema.options.created,
            HookKind::Updated => &schema.options.updated,
            HookKind::Deleted => &schema.options.deleted,
        };
        let Some(hook) = hook else { return };
        let identity = serde_json::Value::Object(schema.entity.identity(row)).to_string();
        let key = (
            Arc::as_ptr(hook) as *const () as usize,
            kind,
            format!("{}:{}", schema.entity.name, identity),
        );
        match self.pending.iter_mut().find(|p| p.key == key) {
            Some(p) => p.row = row.clone(),
            None => self.pending.push(Pending {
                key,
                hook: hook.clone(),
                row: row.clone(),
            }),
        }
    }

    /// Commits the transaction, then runs queued hooks in queue order.
    pub async fn commit(self) -> Result<(), ApiError> {
        let RequestContext { session, pending, .. } = self;
        session.commit().await?;
        if !pending.is_empty() {
            tracing::debug!(callbacks = pending.len(), "flushing post-commit callbacks");
        }
        for p in pending {
            (p.hook)(&p.row);
        }
        Ok(())
    }

    /// Discards the transaction and every queued hook.
    pub async fn rollback(self) {
        if let Err(e) = self.session.rollback().await {
            tracing::warn!(error = %e, "rollback failed");
        }
    }
}
