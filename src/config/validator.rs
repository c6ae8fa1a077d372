//! Config validation: referential integrity and endpoint consistency.

use crate::config::FullConfig;
use crate::error::ConfigError;
use std::collections::HashSet;

/// Schema name for tables that omit `schema_id`.
pub fn default_schema_name(config: &FullConfig) -> &str {
    config.schemas.first().map(|s| s.name.as_str()).unwrap_or("public")
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let schema_ids: HashSet<&str> = config.schemas.iter().map(|s| s.id.as_str()).collect();
    let table_ids: HashSet<&str> = config.tables.iter().map(|t| t.id.as_str()).collect();
    let column_ids: HashSet<&str> = config.columns.iter().map(|c| c.id.as_str()).collect();

    for sid in config
        .enums
        .iter()
        .filter_map(|e| e.schema_id.as_deref())
        .chain(config.tables.iter().filter_map(|t| t.schema_id.as_deref()))
    {
        if !schema_ids.contains(sid) {
            return Err(ConfigError::MissingReference {
                kind: "schema",
                id: sid.to_string(),
            });
        }
    }

    let mut table_names = HashSet::new();
    for t in &config.tables {
        if !table_names.insert(t.name.as_str()) {
            return Err(ConfigError::Validation(format!("duplicate table name: {}", t.name)));
        }
        let table_columns: HashSet<&str> = config
            .columns
            .iter()
            .filter(|c| c.table_id == t.id)
            .map(|c| c.name.as_str())
            .collect();
        for pk in t.primary_key.columns() {
            if !table_columns.contains(pk.as_str()) {
                return Err(ConfigError::InvalidPrimaryKey {
                    table_id: t.id.clone(),
                    column: pk,
                });
            }
        }
        for column in t.unique.iter().flatten() {
            if !table_columns.contains(column.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "unique column",
                    id: format!("{}.{}", t.name, column),
                });
            }
        }
    }

    for c in &config.columns {
        if !table_ids.contains(c.table_id.as_str()) {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: c.table_id.clone(),
            });
        }
    }

    for r in &config.relationships {
        if !table_ids.contains(r.from_table_id.as_str())
            || !table_ids.contains(r.to_table_id.as_str())
            || !column_ids.contains(r.from_column_id.as_str())
            || !column_ids.contains(r.to_column_id.as_str())
        {
            return Err(ConfigError::MissingReference {
                kind: "relationship",
                id: r.id.clone(),
            });
        }
    }

    let mut endpoints = HashSet::new();
    for api in &config.api_entities {
        let Some(table) = config.tables.iter().find(|t| t.id == api.entity_id) else {
            return Err(ConfigError::MissingReference {
                kind: "table",
                id: api.entity_id.clone(),
            });
        };
        let endpoint = api.endpoint.clone().unwrap_or_else(|| table.name.clone());
        if !endpoints.insert(endpoint.clone()) {
            return Err(ConfigError::DuplicateEndpoint(endpoint));
        }
    }

    Ok(())
}
