//! JSON documents to stored rows: coercion, existence resolution, nested writes.

use crate::context::{HookKind, RequestContext};
use crate::error::ApiError;
use crate::query::{Condition, Select};
use crate::schema::{values_equal, EntityDescriptor, Join, LoadMode, RelationDescriptor, ResourceSchema, Row};
use crate::serialize::{check_validators, load_scalar, BoxFuture};
use crate::service::relations;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// The relation a nested document is written through.
#[derive(Clone, Copy)]
pub struct ParentLink<'a> {
    pub relation: &'a RelationDescriptor,
    pub row: &'a Row,
}

#[derive(Clone, Default)]
pub struct LoadOptions<'a> {
    /// Resolve the document against existing rows by primary or unique key.
    pub check_existence: bool,
    /// Row to merge into; skips the key lookup.
    pub instance: Option<Row>,
    pub parent: Option<ParentLink<'a>>,
}

impl<'a> LoadOptions<'a> {
    pub fn insert() -> Self {
        LoadOptions::default()
    }

    pub fn upsert() -> Self {
        LoadOptions {
            check_existence: true,
            ..Default::default()
        }
    }

    pub fn instance(mut self, row: Option<Row>) -> Self {
        self.instance = row;
        self
    }

    pub fn under(mut self, parent: ParentLink<'a>) -> Self {
        self.parent = Some(parent);
        self
    }
}

#[derive(Clone, Debug)]
pub struct Loaded {
    pub row: Row,
    /// Inserted by this load.
    pub created: bool,
    /// Inserted, updated, or had relation membership rewritten.
    pub changed: bool,
}

type FieldErrors = Map<String, Value>;

fn push_error(errors: &mut FieldErrors, field: &str, message: impl Into<String>) {
    let entry = errors.entry(field.to_string()).or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(list) = entry {
        list.push(Value::String(message.into()));
    }
}

fn is_foreign_key(entity: &EntityDescriptor, column: &str) -> bool {
    entity.relations().any(|r| r.owner_column() == Some(column))
}

/// Every column of some key set is present and non-null in `row`.
async fn find_existing(ctx: &mut RequestContext, entity: &EntityDescriptor, row: &Row) -> Result<Option<Row>, ApiError> {
    for key in entity.key_sets() {
        if key.is_empty() || key.iter().any(|k| row.get(k).map_or(true, Value::is_null)) {
            continue;
        }
        let filters: Vec<Condition> = key
            .iter()
            .filter_map(|k| row.get(k).map(|v| Condition::eq(k.clone(), v.clone())))
            .collect();
        if let Some(found) = ctx.session().select(entity, &Select::first(filters)).await?.into_iter().next() {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

/// Looks a document up by primary key, then unique keys, without writing anything.
pub async fn resolve(ctx: &mut RequestContext, schema: &ResourceSchema, doc: &Value) -> Result<Option<Row>, ApiError> {
    let Some(object) = doc.as_object() else {
        return Ok(None);
    };
    let entity = &schema.entity;
    let mut key = Row::new();
    for (name, value) in object {
        if let Some(field) = entity.scalar(name) {
            match load_scalar(field, value) {
                Ok(v) => key.insert(name.clone(), v),
                Err(_) => return Ok(None),
            };
        }
    }
    find_existing(ctx, entity, &key).await
}

/// Loads one document through `schema`, writing it inside the request's transaction.
pub fn load<'a>(
    ctx: &'a mut RequestContext,
    schema: Arc<ResourceSchema>,
    doc: &'a Value,
    opts: LoadOptions<'a>,
) -> BoxFuture<'a, Result<Loaded, ApiError>> {
    Box::pin(async move {
        let entity = schema.entity.clone();
        let Some(object) = doc.as_object() else {
            return Err(ApiError::IllegalRequestData(json!({ "_schema": ["Invalid input type."] })));
        };

        let mut scalars = Row::new();
        let mut to_one: Vec<(&RelationDescriptor, &Value)> = Vec::new();
        let mut to_many: Vec<(&RelationDescriptor, &Vec<Value>)> = Vec::new();
        let mut errors = FieldErrors::new();
        for (name, value) in object {
            if !schema.declares(name) {
                continue;
            }
            let Some(field) = entity.field(name) else { continue };
            match &field.relation {
                None if value.is_null() && !field.nullable && !is_foreign_key(&entity, name) => {
                    push_error(&mut errors, name, "Field may not be null.")
                }
                None => match load_scalar(field, value) {
                    Ok(v) => {
                        scalars.insert(name.clone(), v);
                    }
                    Err(message) => push_error(&mut errors, name, message),
                },
                Some(relation) if relation.is_many() => match value {
                    Value::Array(items) => to_many.push((relation, items)),
                    _ => push_error(&mut errors, name, "Not a valid list."),
                },
                Some(relation) => match value {
                    Value::Object(_) | Value::Null => to_one.push((relation, value)),
                    _ => push_error(&mut errors, name, "Not a valid object."),
                },
            }
        }
        if !errors.is_empty() {
            return Err(ApiError::IllegalRequestData(Value::Object(errors)));
        }

        if let Some(parent) = &opts.parent {
            if let (true, Join::Direct { local, remote }) = (parent.relation.is_many(), &parent.relation.join) {
                let value = parent.row.get(local).cloned().unwrap_or(Value::Null);
                scalars.insert(remote.clone(), value);
            }
        }

        let existing = match opts.instance {
            Some(row) => Some(row),
            None if opts.check_existence => find_existing(ctx, &entity, &scalars).await?,
            None => None,
        };

        for (relation, value) in to_one {
            let Some(local) = relation.owner_column() else { continue };
            let Join::Direct { remote, .. } = &relation.join else { continue };
            if value.is_null() {
                scalars.insert(local.to_string(), Value::Null);
                continue;
            }
            let target = ctx.registry.primary_schema(&relation.target)?;
            let reuse = match &existing {
                Some(current) if relation.lazy == LoadMode::Select && !has_full_key(&target.entity, value) => {
                    relations::related_one(ctx, relation, &target.entity, current).await?
                }
                _ => None,
            };
            let child_opts = LoadOptions {
                check_existence: opts.check_existence,
                instance: reuse,
                parent: None,
            };
            let child = load(ctx, target, value, child_opts).await?;
            scalars.insert(local.to_string(), child.row.get(remote).cloned().unwrap_or(Value::Null));
        }

        let creating = existing.is_none();
        for field in schema.fields().filter(|f| !f.is_relation()) {
            let value = match &existing {
                Some(current) => scalars.get(&field.name).or_else(|| current.get(&field.name)),
                None => scalars.get(&field.name),
            };
            for message in check_validators(field, value, creating) {
                push_error(&mut errors, &field.name, message);
            }
        }
        if !errors.is_empty() {
            return Err(ApiError::IllegalRequestData(Value::Object(errors)));
        }

        match existing {
            Some(current) => {
                let mut changes: Row = scalars
                    .into_iter()
                    .filter(|(k, v)| current.get(k).map_or(true, |c| !values_equal(c, v)))
                    .collect();
                let mut row = current.clone();
                if !changes.is_empty() {
                    if let Some(hook) = &schema.options.update {
                        changes = hook(&current, changes)?;
                    }
                    row = ctx.session().update(&entity, &entity.identity(&current), &changes).await?;
                }
                let mut changed = !changes.is_empty();
                for (relation, items) in to_many {
                    changed |= load_members(ctx, relation, &row, items, opts.check_existence).await?;
                }
                if changed {
                    ctx.queue(&schema, HookKind::Updated, &row);
                }
                Ok(Loaded {
                    row,
                    created: false,
                    changed,
                })
            }
            None => {
                let mut values = scalars;
                if let Some(hook) = &schema.options.create {
                    values = hook(values)?;
                }
                let row = ctx.session().insert(&entity, &values).await?;
                for (relation, items) in to_many {
                    load_members(ctx, relation, &row, items, opts.check_existence).await?;
                }
                ctx.queue(&schema, HookKind::Created, &row);
                Ok(Loaded {
                    row,
                    created: true,
                    changed: true,
                })
            }
        }
    })
}

fn has_full_key(entity: &EntityDescriptor, doc: &Value) -> bool {
    entity
        .primary_key
        .iter()
        .all(|k| doc.get(k).is_some_and(|v| !v.is_null()))
}

/// Loads nested documents under `parent` and makes them the relation's membership.
async fn load_members(
    ctx: &mut RequestContext,
    relation: &RelationDescriptor,
    parent: &Row,
    items: &[Value],
    check_existence: bool,
) -> Result<bool, ApiError> {
    let target = ctx.registry.primary_schema(&relation.target)?;
    let before = relations::members(ctx, relation, &target.entity, parent).await?;
    let mut children = Vec::with_capacity(items.len());
    let mut changed = false;
    for item in items {
        let opts = LoadOptions {
            check_existence,
            instance: None,
            parent: Some(ParentLink { relation, row: parent }),
        };
        let child = load(ctx, target.clone(), item, opts).await?;
        changed |= child.created;
        children.push(child.row);
    }
    relations::replace_members(ctx, relation, &target.entity, parent, &children).await?;
    let same = before.len() == children.len()
        && before.iter().all(|b| children.iter().any(|c| target.entity.same_identity(b, c)));
    Ok(changed || !same)
}

/// Loads a single document or an array of documents. The flag is true for arrays.
pub async fn load_many(
    ctx: &mut RequestContext,
    schema: Arc<ResourceSchema>,
    doc: &Value,
    opts: LoadOptions<'_>,
) -> Result<(Vec<Loaded>, bool), ApiError> {
    match doc {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(load(ctx, schema.clone(), item, opts.clone()).await?);
            }
            Ok((out, true))
        }
        single => Ok((vec![load(ctx, schema, single, opts).await?], false)),
    }
}
