//! Resource handlers: collection, item and sub-resource routes for every exposed endpoint.
//! Each request runs in one session that commits once, after the operation succeeds.

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::extractors::{AcceptJson, ResourceRequest};
use crate::query::QueryPlan;
use crate::response::Reply;
use crate::schema::{ResourceSchema, Verb};
use crate::service::CrudService;
use crate::state::ApiState;
use axum::extract::{Path, State};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug)]
enum Target {
    Collection,
    Item(String),
    Relation(String, String),
}

fn body(doc: Option<&Value>) -> Result<&Value, ApiError> {
    doc.ok_or_else(|| ApiError::illegal("request.data format error."))
}

async fn execute(
    ctx: &mut RequestContext,
    schema: &Arc<ResourceSchema>,
    verb: Verb,
    target: &Target,
    doc: Option<&Value>,
) -> Result<Reply, ApiError> {
    match (target, verb) {
        (Target::Collection, Verb::Get) => CrudService::list(ctx, schema).await,
        (Target::Collection, Verb::Post) => CrudService::create(ctx, schema, body(doc)?).await,
        (Target::Collection, Verb::Put) => CrudService::upsert(ctx, schema, body(doc)?).await,
        (Target::Collection, Verb::Delete) => CrudService::delete_batch(ctx, schema, body(doc)?).await,
        (Target::Item(key), Verb::Get) => CrudService::fetch_one(ctx, schema, key).await,
        (Target::Item(key), Verb::Post) => CrudService::create_at(ctx, schema, key, body(doc)?).await,
        (Target::Item(key), Verb::Put) => CrudService::upsert_at(ctx, schema, key, body(doc)?).await,
        (Target::Item(key), Verb::Delete) => CrudService::delete_one(ctx, schema, key).await,
        (Target::Relation(key, name), Verb::Get) => CrudService::fetch_relation(ctx, schema, key, name).await,
        (Target::Relation(key, name), Verb::Post) => {
            CrudService::modify_relation(ctx, schema, key, name, body(doc)?, false).await
        }
        (Target::Relation(key, name), Verb::Put) => {
            CrudService::modify_relation(ctx, schema, key, name, body(doc)?, true).await
        }
        (Target::Relation(key, name), Verb::Delete) => CrudService::remove_relation(ctx, schema, key, name, doc).await,
    }
}

async fn dispatch(state: ApiState, endpoint: String, target: Target, req: ResourceRequest) -> Result<Reply, ApiError> {
    let schema = state
        .routes
        .get(&endpoint)
        .cloned()
        .ok_or_else(|| ApiError::not_found(json!({ "endpoint": endpoint })))?;
    let verb = Verb::from_method(&req.method)
        .filter(|v| schema.options.allows(*v))
        .ok_or_else(|| ApiError::AccessDenied(json!({ "method": req.method.as_str(), "endpoint": endpoint })))?;
    tracing::debug!(endpoint = %endpoint, method = %req.method, target = ?target, "dispatch");

    let plan = QueryPlan::parse(&req.params)?;
    let doc = match (verb, &target) {
        (Verb::Get, _) | (Verb::Delete, Target::Item(_)) => None,
        (Verb::Delete, _) => req.data_opt()?,
        _ => Some(req.data()?),
    };

    let session = state.backend.begin().await?;
    let mut ctx = RequestContext::new(session, state.registry.clone(), state.config.clone(), plan, req.extensions);
    match execute(&mut ctx, &schema, verb, &target, doc.as_ref()).await {
        Ok(reply) => {
            ctx.commit().await?;
            Ok(reply)
        }
        Err(e) => {
            ctx.rollback().await;
            Err(e)
        }
    }
}

/// `/:endpoint`
pub async fn collection(
    State(state): State<ApiState>,
    Path(endpoint): Path<String>,
    _accept: AcceptJson,
    req: ResourceRequest,
) -> Result<Reply, ApiError> {
    dispatch(state, endpoint, Target::Collection, req).await
}

/// `/:endpoint/:key`
pub async fn item(
    State(state): State<ApiState>,
    Path((endpoint, key)): Path<(String, String)>,
    _accept: AcceptJson,
    req: ResourceRequest,
) -> Result<Reply, ApiError> {
    dispatch(state, endpoint, Target::Item(key), req).await
}

/// `/:endpoint/:key/:relation`
pub async fn relation(
    State(state): State<ApiState>,
    Path((endpoint, key, name)): Path<(String, String, String)>,
    _accept: AcceptJson,
    req: ResourceRequest,
) -> Result<Reply, ApiError> {
    dispatch(state, endpoint, Target::Relation(key, name), req).await
}
