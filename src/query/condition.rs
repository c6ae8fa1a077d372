//! Backend-neutral filter and ordering tree.

use crate::schema::{Direction, EntityDescriptor, RelationDescriptor, Secondary};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    /// `value` is an array.
    In,
    /// `value` is a pattern string; `/` escapes `%` and `_`.
    Like,
}

#[derive(Clone, Debug)]
pub enum Condition {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    Any(Vec<Condition>),
    All(Vec<Condition>),
    /// At least one row of `target` reachable through `relation` satisfies `condition`.
    Related {
        relation: RelationDescriptor,
        target: Arc<EntityDescriptor>,
        condition: Box<Condition>,
    },
    /// Rows linked to `parent` through the junction table.
    Linked { secondary: Secondary, parent: Value },
    /// Matches nothing.
    Never,
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Condition::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    /// Equality on every column of `key`.
    pub fn matching(key: &serde_json::Map<String, Value>) -> Self {
        Condition::All(key.iter().map(|(k, v)| Condition::eq(k.clone(), v.clone())).collect())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// One read against a single entity.
#[derive(Clone, Debug, Default)]
pub struct Select {
    pub filters: Vec<Condition>,
    pub order: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl Select {
    pub fn filtered(filters: Vec<Condition>) -> Self {
        Select {
            filters,
            ..Default::default()
        }
    }

    pub fn first(filters: Vec<Condition>) -> Self {
        Select {
            filters,
            limit: Some(1),
            ..Default::default()
        }
    }
}
