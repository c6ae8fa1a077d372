//! Reading and rewriting relation membership.
//!
//! A direct to-many relation keeps membership in the child's foreign key, a
//! secondary relation keeps it in junction rows, a to-one relation in the owner's
//! foreign key column.

use crate::context::RequestContext;
use crate::error::ApiError;
use crate::query::{Condition, Order, Select};
use crate::schema::{EntityDescriptor, Join, RelationDescriptor, Row};
use serde_json::Value;

fn present<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
    row.get(column).filter(|v| !v.is_null())
}

/// Rows of the relation target that belong to `parent`.
pub fn scope(relation: &RelationDescriptor, parent: &Row) -> Condition {
    match &relation.join {
        Join::Direct { local, remote } => match present(parent, local) {
            Some(v) => Condition::eq(remote.clone(), v.clone()),
            None => Condition::Never,
        },
        Join::Secondary(sec) => match present(parent, &sec.local) {
            Some(v) => Condition::Linked {
                secondary: sec.clone(),
                parent: v.clone(),
            },
            None => Condition::Never,
        },
    }
}

fn default_order(relation: &RelationDescriptor) -> Vec<Order> {
    relation
        .order_by
        .iter()
        .map(|(field, direction)| Order {
            field: field.clone(),
            direction: *direction,
        })
        .collect()
}

pub async fn members(
    ctx: &mut RequestContext,
    relation: &RelationDescriptor,
    target: &EntityDescriptor,
    parent: &Row,
) -> Result<Vec<Row>, ApiError> {
    let select = Select {
        filters: vec![scope(relation, parent)],
        order: default_order(relation),
        ..Default::default()
    };
    Ok(ctx.session().select(target, &select).await?)
}

pub async fn related_one(
    ctx: &mut RequestContext,
    relation: &RelationDescriptor,
    target: &EntityDescriptor,
    parent: &Row,
) -> Result<Option<Row>, ApiError> {
    let select = Select::first(vec![scope(relation, parent)]);
    Ok(ctx.session().select(target, &select).await?.into_iter().next())
}

pub async fn is_member(
    ctx: &mut RequestContext,
    relation: &RelationDescriptor,
    target: &EntityDescriptor,
    parent: &Row,
    child: &Row,
) -> Result<bool, ApiError> {
    let filters = vec![scope(relation, parent), Condition::matching(&target.identity(child))];
    Ok(ctx.session().count(target, &filters).await? > 0)
}

/// Points the owner's foreign key at `child`, or clears it. Returns the updated owner.
pub async fn set_one(
    ctx: &mut RequestContext,
    owner: &EntityDescriptor,
    relation: &RelationDescriptor,
    parent: &Row,
    child: Option<&Row>,
) -> Result<Row, ApiError> {
    let Join::Direct { local, remote } = &relation.join else {
        return Err(ApiError::ResourceRelationNotExists(
            serde_json::json!({ "relation": relation.name }),
        ));
    };
    let value = child.and_then(|c| c.get(remote)).cloned().unwrap_or(Value::Null);
    let mut changes = Row::new();
    changes.insert(local.clone(), value);
    Ok(ctx.session().update(owner, &owner.identity(parent), &changes).await?)
}

pub async fn add_member(
    ctx: &mut RequestContext,
    relation: &RelationDescriptor,
    target: &EntityDescriptor,
    parent: &Row,
    child: &Row,
) -> Result<(), ApiError> {
    match &relation.join {
        Join::Direct { local, remote } => {
            let value = parent.get(local).cloned().unwrap_or(Value::Null);
            if child.get(remote).is_some_and(|v| crate::schema::values_equal(v, &value)) {
                return Ok(());
            }
            let mut changes = Row::new();
            changes.insert(remote.clone(), value);
            ctx.session().update(target, &target.identity(child), &changes).await?;
        }
        Join::Secondary(sec) => {
            let (Some(local), Some(remote)) = (present(parent, &sec.local), present(child, &sec.remote)) else {
                return Ok(());
            };
            let (local, remote) = (local.clone(), remote.clone());
            ctx.session().link(sec, &local, &remote).await?;
        }
    }
    Ok(())
}

pub async fn remove_member(
    ctx: &mut RequestContext,
    relation: &RelationDescriptor,
    target: &EntityDescriptor,
    parent: &Row,
    child: &Row,
) -> Result<(), ApiError> {
    match &relation.join {
        Join::Direct { remote, .. } => {
            let mut changes = Row::new();
            changes.insert(remote.clone(), Value::Null);
            ctx.session().update(target, &target.identity(child), &changes).await?;
        }
        Join::Secondary(sec) => {
            if let (Some(local), Some(remote)) = (present(parent, &sec.local), present(child, &sec.remote)) {
                let (local, remote) = (local.clone(), remote.clone());
                ctx.session().unlink(sec, &local, Some(&remote)).await?;
            }
        }
    }
    Ok(())
}

/// Makes `children` the exact membership of the relation. Returns whether it changed.
pub async fn replace_members(
    ctx: &mut RequestContext,
    relation: &RelationDescriptor,
    target: &EntityDescriptor,
    parent: &Row,
    children: &[Row],
) -> Result<bool, ApiError> {
    let current = members(ctx, relation, target, parent).await?;
    let mut changed = false;
    for row in &current {
        if !children.iter().any(|c| target.same_identity(c, row)) {
            remove_member(ctx, relation, target, parent, row).await?;
            changed = true;
        }
    }
    for child in children {
        if !current.iter().any(|row| target.same_identity(child, row)) {
            add_member(ctx, relation, target, parent, child).await?;
            changed = true;
        }
    }
    Ok(changed)
}

/// Drops every junction row of `parent` before it is deleted.
pub async fn unlink_all(ctx: &mut RequestContext, entity: &EntityDescriptor, parent: &Row) -> Result<(), ApiError> {
    for relation in entity.relations() {
        if let Join::Secondary(sec) = &relation.join {
            if let Some(local) = present(parent, &sec.local) {
                let local = local.clone();
                ctx.session().unlink(sec, &local, None).await?;
            }
        }
    }
    Ok(())
}
