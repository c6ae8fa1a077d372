//! Validates a `QueryPlan` against an entity and runs it.

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::query::{CompareOp, Condition, Filter, FilterOp, FilterValue, Order, QueryPlan, Select};
use crate::schema::{Direction, EntityDescriptor, FieldDescriptor, Join, Registry, ResourceSchema, Row};
use crate::serialize::parse_text;
use serde_json::Value;

fn filter_key(filter: &Filter) -> String {
    match filter.op {
        FilterOp::In => format!("{}[]", filter.path),
        _ => filter.path.clone(),
    }
}

/// Comparison on one scalar with the query text coerced to the field's stored form.
fn compare(field: &FieldDescriptor, filter: &Filter, key: &str) -> Result<Condition, ApiError> {
    let coerce = |raw: &str| parse_text(field, raw).map_err(|_| ApiError::invalid_argument(key, raw));
    let (op, value) = match (&filter.op, &filter.value) {
        (FilterOp::Like, v) => (CompareOp::Like, Value::String(v.raw().to_string())),
        (FilterOp::In, FilterValue::Many(values)) => (
            CompareOp::In,
            Value::Array(values.iter().map(|v| coerce(v)).collect::<Result<_, _>>()?),
        ),
        (_, v) => (CompareOp::Eq, coerce(v.raw())?),
    };
    Ok(Condition::Compare {
        field: field.name.clone(),
        op,
        value,
    })
}

/// OR of `LIKE` patterns over the entity's string match fields. Fields that are not
/// string columns are skipped; `None` when nothing is left to match.
pub fn match_condition(registry: &Registry, entity: &EntityDescriptor, keywords: &str) -> Option<Condition> {
    let patterns: Vec<String> = keywords
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| if k.contains('%') { k.to_string() } else { format!("%{}%", k) })
        .collect();
    let mut parts = Vec::new();
    for name in registry.match_fields(&entity.name) {
        let Some(field) = entity.scalar(&name).filter(|f| f.semantic.is_textual()) else {
            continue;
        };
        for pattern in &patterns {
            parts.push(Condition::Compare {
                field: field.name.clone(),
                op: CompareOp::Like,
                value: Value::String(pattern.clone()),
            });
        }
    }
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Condition::Any(parts)),
    }
}

/// Filter conditions for `entity` from the request's plan, including `_match`.
pub async fn conditions(ctx: &mut RequestContext, entity: &EntityDescriptor) -> Result<Vec<Condition>, ApiError> {
    let filters = ctx.plan.filters.clone();
    let mut out = Vec::with_capacity(filters.len() + 1);
    for filter in &filters {
        let key = filter_key(filter);
        let Some((relation_name, child)) = filter.path.split_once('.') else {
            let field = entity
                .scalar(&filter.path)
                .ok_or_else(|| ApiError::invalid_argument(&key, filter.value.raw()))?;
            out.push(compare(field, filter, &key)?);
            continue;
        };

        let relation = entity
            .relation(relation_name)
            .ok_or_else(|| ApiError::invalid_argument(&key, filter.value.raw()))?
            .clone();
        let target = ctx.registry.resolve(&relation.target)?;
        let condition = if child == "_match" {
            match match_condition(&ctx.registry, &target, filter.value.raw()) {
                Some(c) => c,
                None => continue,
            }
        } else {
            let field = target
                .scalar(child)
                .ok_or_else(|| ApiError::invalid_argument(&key, filter.value.raw()))?;
            compare(field, filter, &key)?
        };

        // To-one equality resolves the related row first and filters on the foreign key.
        if let (FilterOp::Eq, false, Join::Direct { local, remote }) = (filter.op, relation.is_many(), &relation.join) {
            if child != "_match" {
                let found = ctx.session().select(&target, &Select::first(vec![condition])).await?;
                out.push(match found.first().and_then(|r| r.get(remote)) {
                    Some(value) if !value.is_null() => Condition::eq(local.clone(), value.clone()),
                    _ => Condition::Never,
                });
                continue;
            }
        }
        out.push(Condition::Related {
            relation,
            target,
            condition: Box::new(condition),
        });
    }

    if let Some(keywords) = ctx.plan.match_keywords.clone() {
        if let Some(c) = match_condition(&ctx.registry, entity, &keywords) {
            out.push(c);
        }
    }
    Ok(out)
}

/// Sort keys checked against the entity's columns.
pub fn orders(entity: &EntityDescriptor, plan: &QueryPlan) -> Result<Vec<Order>, ApiError> {
    plan.orders
        .iter()
        .map(|o| match entity.scalar(&o.field) {
            Some(_) => Ok(Order {
                field: o.field.clone(),
                direction: o.direction,
            }),
            None => Err(ApiError::invalid_argument(o.source.key(), &o.field)),
        })
        .collect()
}

/// `_num`, else the endpoint default, else the manager default; `None` is unpaged.
pub fn page_size(plan: &QueryPlan, schema: &ResourceSchema, ctx: &RequestContext) -> Option<u64> {
    let num = plan
        .num
        .or(schema.options.results_per_page.map(i64::from))
        .or(ctx.config.results_per_page.map(i64::from))?;
    if num < 0 {
        return None;
    }
    let max = schema
        .options
        .max_results_per_page
        .or(ctx.config.max_results_per_page)
        .map(i64::from);
    Some(max.map_or(num, |m| num.min(m)) as u64)
}

/// Rows skipped before `page`. An offset past the range of a SQL `OFFSET` is rejected.
pub fn page_offset(page: u64, limit: Option<u64>) -> Result<u64, ApiError> {
    let Some(size) = limit else { return Ok(0) };
    page
        .saturating_sub(1)
        .checked_mul(size)
        .filter(|offset| i64::try_from(*offset).is_ok())
        .ok_or_else(|| ApiError::assertion(format!("_page out of range: {}", page)))
}

/// Runs the plan against `schema`'s entity inside `scope`. Returns the page and the
/// unpaged filtered total.
pub async fn apply(
    ctx: &mut RequestContext,
    schema: &ResourceSchema,
    scope: Vec<Condition>,
    default_order: &[(String, Direction)],
) -> Result<(Vec<Row>, u64), ApiError> {
    let entity = schema.entity.clone();
    let mut order = orders(&entity, &ctx.plan)?;
    if order.is_empty() {
        order = default_order
            .iter()
            .map(|(field, direction)| Order {
                field: field.clone(),
                direction: *direction,
            })
            .collect();
    }
    let mut filters = conditions(ctx, &entity).await?;
    if let Some(hook) = &schema.options.filters {
        filters.extend(hook(&ctx.extensions, &*entity));
    }
    filters.extend(scope);

    let total = ctx.session().count(&entity, &filters).await?;
    let limit = page_size(&ctx.plan, schema, ctx);
    let offset = page_offset(ctx.plan.page, limit)?;
    let select = Select {
        filters,
        order,
        limit,
        offset,
    };
    let rows = ctx.session().select(&entity, &select).await?;
    Ok((rows, total))
}
