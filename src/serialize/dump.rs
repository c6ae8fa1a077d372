//! Stored rows to JSON documents, expanding relations to a bounded depth.

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::schema::{ResourceSchema, Row};
use crate::serialize::{dump_scalar, BoxFuture};
use crate::service::relations;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Dumps `row` through `schema`. At `expand == 0` relation fields are omitted; otherwise
/// each related row is dumped through its entity's primary schema at `expand - 1`.
pub fn dump<'a>(
    ctx: &'a mut RequestContext,
    schema: Arc<ResourceSchema>,
    row: &'a Row,
    expand: u8,
) -> BoxFuture<'a, Result<Value, ApiError>> {
    Box::pin(async move {
        let projection = ctx.projection(&schema);
        let mut out = Map::new();
        for field in projection.fields(&schema) {
            let Some(relation) = &field.relation else {
                let value = dump_scalar(field, row.get(&field.name).unwrap_or(&Value::Null))
                    .map_err(ApiError::Unknown)?;
                out.insert(field.name.clone(), value);
                continue;
            };
            if expand == 0 {
                continue;
            }
            let target = ctx.registry.primary_schema(&relation.target)?;
            let value = if relation.is_many() {
                let rows = relations::members(ctx, relation, &target.entity, row).await?;
                Value::Array(dump_all(ctx, target, &rows, expand - 1).await?)
            } else {
                match relations::related_one(ctx, relation, &target.entity, row).await? {
                    Some(related) => dump(ctx, target, &related, expand - 1).await?,
                    None => Value::Null,
                }
            };
            out.insert(field.name.clone(), value);
        }
        Ok(Value::Object(out))
    })
}

pub async fn dump_all(
    ctx: &mut RequestContext,
    schema: Arc<ResourceSchema>,
    rows: &[Row],
    expand: u8,
) -> Result<Vec<Value>, ApiError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(dump(ctx, schema.clone(), row, expand).await?);
    }
    Ok(out)
}
