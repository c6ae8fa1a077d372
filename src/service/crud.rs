//! Generic CRUD execution for one resource schema inside a request transaction.

use crate::context::{HookKind, RequestContext};
use crate::error::ApiError;
use crate::query::{self, Condition, Select};
use crate::response::Reply;
use crate::schema::{RelationDescriptor, ResourceSchema, Row};
use crate::serialize::{dump, dump_all, load, load_many, parse_text, resolve, LoadOptions, Loaded, ParentLink};
use crate::service::relations;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct CrudService;

fn as_list(doc: &Value) -> Vec<&Value> {
    match doc {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    }
}

impl CrudService {
    /// Column and stored value a URL key addresses: `key_field` for prefixed keys,
    /// otherwise the primary key. A key that does not coerce is not found.
    pub fn key_condition(ctx: &RequestContext, schema: &ResourceSchema, key: &str) -> Result<(String, Value), ApiError> {
        let not_found = || ApiError::not_found(json!({ "endpoint": schema.endpoint(), "key": key }));
        let entity = &schema.entity;
        let prefixed = key.strip_prefix(ctx.config.key_field_prefix.as_str());
        let (field, text) = match (prefixed, &schema.options.key_field) {
            (Some(rest), Some(name)) => (entity.scalar(name).ok_or_else(not_found)?, rest),
            _ => (entity.pk_field().ok_or_else(not_found)?, key),
        };
        let value = parse_text(field, text).map_err(|_| not_found())?;
        Ok((field.name.clone(), value))
    }

    async fn lookup(ctx: &mut RequestContext, schema: &ResourceSchema, column: &str, value: &Value) -> Result<Option<Row>, ApiError> {
        let select = Select::first(vec![Condition::eq(column, value.clone())]);
        Ok(ctx.session().select(&schema.entity, &select).await?.into_iter().next())
    }

    /// The row a URL key addresses, or `ResourceNotFound`.
    pub async fn find(ctx: &mut RequestContext, schema: &ResourceSchema, key: &str) -> Result<Row, ApiError> {
        let (column, value) = Self::key_condition(ctx, schema, key)?;
        Self::lookup(ctx, schema, &column, &value)
            .await?
            .ok_or_else(|| ApiError::not_found(json!({ "endpoint": schema.endpoint(), "key": key })))
    }

    fn with_key(doc: &Value, column: String, value: Value) -> Result<Value, ApiError> {
        let Value::Object(object) = doc else {
            return Err(ApiError::illegal("request.data format error."));
        };
        let mut object = object.clone();
        object.insert(column, value);
        Ok(Value::Object(object))
    }

    async fn render(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>, loaded: &[Loaded], batch: bool) -> Result<Value, ApiError> {
        let rows: Vec<Row> = loaded.iter().map(|l| l.row.clone()).collect();
        let expand = ctx.plan.expand;
        let mut items = dump_all(ctx, schema.clone(), &rows, expand).await?;
        Ok(match (batch, items.pop()) {
            (false, Some(single)) if items.is_empty() => single,
            (_, last) => {
                items.extend(last);
                Value::Array(items)
            }
        })
    }

    pub async fn list(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>) -> Result<Reply, ApiError> {
        let (rows, total) = query::apply(ctx, schema, Vec::new(), &[]).await?;
        let expand = ctx.plan.expand;
        let items = dump_all(ctx, schema.clone(), &rows, expand).await?;
        Ok(Reply::list(total, &ctx.config.items_key, items))
    }

    /// Pure insert of one document or a batch.
    pub async fn create(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>, doc: &Value) -> Result<Reply, ApiError> {
        let (loaded, batch) = load_many(ctx, schema.clone(), doc, LoadOptions::insert()).await?;
        Ok(Reply::created(Self::render(ctx, schema, &loaded, batch).await?))
    }

    /// Insert or merge each document by key; 201 only when every item was new.
    pub async fn upsert(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>, doc: &Value) -> Result<Reply, ApiError> {
        let (loaded, batch) = load_many(ctx, schema.clone(), doc, LoadOptions::upsert()).await?;
        let body = Self::render(ctx, schema, &loaded, batch).await?;
        Ok(if loaded.iter().all(|l| l.created) {
            Reply::created(body)
        } else {
            Reply::ok(body)
        })
    }

    pub async fn fetch_one(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>, key: &str) -> Result<Reply, ApiError> {
        let row = Self::find(ctx, schema, key).await?;
        let expand = ctx.plan.expand;
        Ok(Reply::ok(dump(ctx, schema.clone(), &row, expand).await?))
    }

    pub async fn create_at(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>, key: &str, doc: &Value) -> Result<Reply, ApiError> {
        let (column, value) = Self::key_condition(ctx, schema, key)?;
        let doc = Self::with_key(doc, column, value)?;
        let loaded = load(ctx, schema.clone(), &doc, LoadOptions::insert()).await?;
        Ok(Reply::created(Self::render(ctx, schema, &[loaded], false).await?))
    }

    /// Merges into the row the key addresses, creating it when absent.
    pub async fn upsert_at(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>, key: &str, doc: &Value) -> Result<Reply, ApiError> {
        let (column, value) = Self::key_condition(ctx, schema, key)?;
        let existing = Self::lookup(ctx, schema, &column, &value).await?;
        let doc = Self::with_key(doc, column, value)?;
        let loaded = load(ctx, schema.clone(), &doc, LoadOptions::upsert().instance(existing)).await?;
        let created = loaded.created;
        let body = Self::render(ctx, schema, &[loaded], false).await?;
        Ok(if created { Reply::created(body) } else { Reply::ok(body) })
    }

    async fn delete_row(ctx: &mut RequestContext, schema: &ResourceSchema, row: &Row) -> Result<(), ApiError> {
        if let Some(hook) = &schema.options.delete {
            hook(row)?;
        }
        relations::unlink_all(ctx, &schema.entity, row).await?;
        ctx.session().delete(&schema.entity, &schema.entity.identity(row)).await?;
        ctx.queue(schema, HookKind::Deleted, row);
        Ok(())
    }

    pub async fn delete_one(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>, key: &str) -> Result<Reply, ApiError> {
        let row = Self::find(ctx, schema, key).await?;
        Self::delete_row(ctx, schema, &row).await?;
        Ok(Reply::NoContent)
    }

    /// Deletes every document in the body; each must resolve by primary or unique key.
    pub async fn delete_batch(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>, doc: &Value) -> Result<Reply, ApiError> {
        for item in as_list(doc) {
            let row = resolve(ctx, schema, item)
                .await?
                .ok_or_else(|| ApiError::not_found(json!({ "endpoint": schema.endpoint(), "data": item })))?;
            Self::delete_row(ctx, schema, &row).await?;
        }
        Ok(Reply::NoContent)
    }

    /// A relation exposed as a sub-resource and the schema its members are written through.
    fn sub_resource(
        ctx: &RequestContext,
        schema: &ResourceSchema,
        name: &str,
    ) -> Result<(RelationDescriptor, Arc<ResourceSchema>), ApiError> {
        let relation = schema
            .entity
            .relation(name)
            .filter(|_| schema.declares(name))
            .ok_or_else(|| ApiError::ResourceRelationNotExists(json!({ "endpoint": schema.endpoint(), "relation": name })))?;
        let target = ctx.registry.primary_schema(&relation.target)?;
        Ok((relation.clone(), target))
    }

    pub async fn fetch_relation(ctx: &mut RequestContext, schema: &Arc<ResourceSchema>, key: &str, name: &str) -> Result<Reply, ApiError> {
        let parent = Self::find(ctx, schema, key).await?;
        let (relation, target) = Self::sub_resource(ctx, schema, name)?;
        let expand = ctx.plan.expand;
        if relation.is_many() {
            let scope = vec![relations::scope(&relation, &parent)];
            let (rows, total) = query::apply(ctx, &target, scope, &relation.order_by).await?;
            let items = dump_all(ctx, target, &rows, expand).await?;
            return Ok(Reply::list(total, &ctx.config.items_key, items));
        }
        Ok(Reply::ok(match relations::related_one(ctx, &relation, &target.entity, &parent).await? {
            Some(row) => dump(ctx, target, &row, expand).await?,
            None => json!({}),
        }))
    }

    /// Adds (`replace == false`) or replaces relation members and returns them dumped.
    pub async fn modify_relation(
        ctx: &mut RequestContext,
        schema: &Arc<ResourceSchema>,
        key: &str,
        name: &str,
        doc: &Value,
        replace: bool,
    ) -> Result<Reply, ApiError> {
        let parent = Self::find(ctx, schema, key).await?;
        let (relation, target) = Self::sub_resource(ctx, schema, name)?;

        if !relation.is_many() {
            if !replace {
                return Err(ApiError::illegal(format!(
                    "Collection:{} attribute:{} Not List.",
                    schema.endpoint(),
                    name
                )));
            }
            if doc.is_array() {
                return Err(ApiError::IllegalRequestData(json!({ "prompt": "Batch is not supported here.", "data": doc })));
            }
            let child = load(ctx, target.clone(), doc, LoadOptions::upsert()).await?;
            let updated = relations::set_one(ctx, &schema.entity, &relation, &parent, Some(&child.row)).await?;
            ctx.queue(schema, HookKind::Updated, &updated);
            return Ok(Reply::ok(Self::render(ctx, &target, &[child], false).await?));
        }

        let link = ParentLink {
            relation: &relation,
            row: &parent,
        };
        let mut children = Vec::new();
        for item in as_list(doc) {
            children.push(load(ctx, target.clone(), item, LoadOptions::upsert().under(link)).await?);
        }
        let rows: Vec<Row> = children.iter().map(|c| c.row.clone()).collect();
        if replace {
            relations::replace_members(ctx, &relation, &target.entity, &parent, &rows).await?;
        } else {
            for row in &rows {
                relations::add_member(ctx, &relation, &target.entity, &parent, row).await?;
            }
        }
        ctx.queue(schema, HookKind::Updated, &parent);
        Ok(Reply::ok(Self::render(ctx, &target, &children, true).await?))
    }

    /// Unlinks each document from a to-many relation, or clears a to-one relation.
    pub async fn remove_relation(
        ctx: &mut RequestContext,
        schema: &Arc<ResourceSchema>,
        key: &str,
        name: &str,
        doc: Option<&Value>,
    ) -> Result<Reply, ApiError> {
        let parent = Self::find(ctx, schema, key).await?;
        let (relation, target) = Self::sub_resource(ctx, schema, name)?;
        if !relation.is_many() {
            relations::set_one(ctx, &schema.entity, &relation, &parent, None).await?;
            return Ok(Reply::NoContent);
        }
        let Some(doc) = doc else {
            return Err(ApiError::illegal("request.data format error."));
        };
        for item in as_list(doc) {
            let missing = json!({ "endpoint": target.endpoint(), "data": item });
            let Some(row) = resolve(ctx, &target, item).await? else {
                return Err(ApiError::not_found(missing));
            };
            if !relations::is_member(ctx, &relation, &target.entity, &parent, &row).await? {
                return Err(ApiError::ResourceRelationNotExists(missing));
            }
            relations::remove_member(ctx, &relation, &target.entity, &parent, &row).await?;
        }
        Ok(Reply::NoContent)
    }
}
