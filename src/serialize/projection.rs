use crate::query::QueryPlan;
use crate::schema::{FieldDescriptor, ResourceSchema};
use std::collections::HashMap;

/// Fields a dump emits for one schema: the schema's own allow/deny lists narrowed by
/// the request's `_fields` / `_except` group for its endpoint (or table name).
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    names: Vec<String>,
}

impl Projection {
    pub fn build(schema: &ResourceSchema, plan: &QueryPlan) -> Self {
        let group = |groups: &HashMap<String, Vec<String>>| {
            groups
                .get(schema.endpoint())
                .or_else(|| groups.get(&schema.entity.table_name))
                .cloned()
        };
        let only = group(&plan.fields);
        let except = group(&plan.except).unwrap_or_default();
        let names = schema
            .fields()
            .map(|f| f.name.clone())
            .filter(|n| only.as_ref().map_or(true, |o| o.contains(n)))
            .filter(|n| !except.contains(n))
            .collect();
        Projection { names }
    }

    pub fn includes(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Projected fields in entity declaration order.
    pub fn fields<'a>(&'a self, schema: &'a ResourceSchema) -> impl Iterator<Item = &'a FieldDescriptor> + 'a {
        schema.entity.fields.iter().filter(move |f| self.includes(&f.name))
    }
}
