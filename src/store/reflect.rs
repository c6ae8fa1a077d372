//! Model config from a live PostgreSQL schema via `information_schema`.

use crate::config::{
    ColumnConfig, ColumnDefaultConfig, ColumnTypeConfig, EnumConfig, FullConfig, PrimaryKeyConfig, RelationshipConfig,
    SchemaConfig, TableConfig,
};
use crate::store::DbError;
use sqlx::PgPool;
use std::collections::BTreeMap;

const TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name";

const COLUMNS_SQL: &str = "SELECT table_name::text, column_name::text, data_type::text, udt_name::text, \
     is_nullable::text, column_default::text, character_maximum_length::int4, \
     numeric_precision::int4, numeric_scale::int4 \
     FROM information_schema.columns WHERE table_schema = $1 \
     ORDER BY table_name, ordinal_position";

const KEYS_SQL: &str = "SELECT tc.table_name::text, tc.constraint_name::text, tc.constraint_type::text, kcu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_schema = kcu.constraint_schema AND tc.constraint_name = kcu.constraint_name \
      AND tc.table_name = kcu.table_name \
     WHERE tc.table_schema = $1 AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE') \
     ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position";

const FOREIGN_KEYS_SQL: &str = "SELECT tc.constraint_name::text, kcu.table_name::text, kcu.column_name::text, \
     ccu.table_name::text, ccu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_schema = kcu.constraint_schema AND tc.constraint_name = kcu.constraint_name \
     JOIN information_schema.constraint_column_usage ccu \
       ON tc.constraint_schema = ccu.constraint_schema AND tc.constraint_name = ccu.constraint_name \
     WHERE tc.table_schema = $1 AND tc.constraint_type = 'FOREIGN KEY' \
     ORDER BY tc.constraint_name";

const ENUMS_SQL: &str = "SELECT t.typname::text, e.enumlabel::text FROM pg_type t \
     JOIN pg_enum e ON e.enumtypid = t.oid \
     JOIN pg_namespace n ON n.oid = t.typnamespace \
     WHERE n.nspname = $1 ORDER BY t.typname, e.enumsortorder";

type ColumnRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<i32>,
    Option<i32>,
    Option<i32>,
);
type KeyRow = (String, String, String, String);
type ForeignKeyRow = (String, String, String, String, String);

#[derive(Debug, Default)]
struct Catalog {
    tables: Vec<String>,
    columns: Vec<ColumnRow>,
    keys: Vec<KeyRow>,
    foreign_keys: Vec<ForeignKeyRow>,
    enums: Vec<(String, String)>,
}

/// Reads tables, columns, primary/unique keys, single-column foreign keys and enum
/// types of `schema`. Tables without a primary key are left out. No endpoints are
/// configured; expose entities with `ApiBuilder::add_all` or `add`.
pub async fn reflect_schema(pool: &PgPool, schema: &str) -> Result<FullConfig, DbError> {
    let catalog = Catalog {
        tables: fetch::<(String,)>(pool, TABLES_SQL, schema)
            .await?
            .into_iter()
            .map(|(t,)| t)
            .collect(),
        columns: fetch(pool, COLUMNS_SQL, schema).await?,
        keys: fetch(pool, KEYS_SQL, schema).await?,
        foreign_keys: fetch(pool, FOREIGN_KEYS_SQL, schema).await?,
        enums: fetch(pool, ENUMS_SQL, schema).await?,
    };
    let config = assemble(schema, catalog);
    tracing::debug!(schema = %schema, tables = config.tables.len(), relationships = config.relationships.len(), "reflected schema");
    Ok(config)
}

async fn fetch<T>(pool: &PgPool, sql: &'static str, schema: &str) -> Result<Vec<T>, DbError>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
{
    tracing::debug!(sql = %sql, params = ?[schema], "query");
    Ok(sqlx::query_as::<_, T>(sql).bind(schema).fetch_all(pool).await?)
}

fn column_type(data_type: &str, udt_name: &str, length: Option<i32>, precision: Option<i32>, scale: Option<i32>) -> ColumnTypeConfig {
    let param = |v: Option<i32>| v.and_then(|n| u32::try_from(n).ok());
    match data_type {
        "USER-DEFINED" => ColumnTypeConfig::Simple(udt_name.to_string()),
        "character varying" | "character" => ColumnTypeConfig::Parameterized {
            name: data_type.to_string(),
            params: param(length).map(|n| vec![n]),
        },
        "numeric" => ColumnTypeConfig::Parameterized {
            name: "numeric".into(),
            params: param(precision).map(|p| vec![p, param(scale).unwrap_or(0)]),
        },
        other => ColumnTypeConfig::Simple(other.to_string()),
    }
}

fn assemble(schema: &str, catalog: Catalog) -> FullConfig {
    let mut primary: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    let mut unique: BTreeMap<(&str, &str), Vec<String>> = BTreeMap::new();
    for (table, constraint, kind, column) in &catalog.keys {
        if kind == "PRIMARY KEY" {
            primary.entry(table.as_str()).or_default().push(column.clone());
        } else {
            unique.entry((table.as_str(), constraint.as_str())).or_default().push(column.clone());
        }
    }

    let tables: Vec<TableConfig> = catalog
        .tables
        .iter()
        .filter_map(|name| {
            let pk = primary.get(name.as_str())?;
            Some(TableConfig {
                id: name.clone(),
                schema_id: Some(schema.to_string()),
                name: name.clone(),
                comment: None,
                primary_key: match pk.as_slice() {
                    [single] => PrimaryKeyConfig::Single(single.clone()),
                    _ => PrimaryKeyConfig::Composite(pk.clone()),
                },
                unique: unique
                    .iter()
                    .filter(|((t, _), _)| *t == name.as_str())
                    .map(|(_, cols)| cols.clone())
                    .collect(),
            })
        })
        .collect();
    let known = |table: &str| tables.iter().any(|t| t.id == table);

    let columns = catalog
        .columns
        .iter()
        .filter(|c| known(c.0.as_str()))
        .map(|(table, column, data_type, udt, nullable, default, length, precision, scale)| ColumnConfig {
            id: format!("{}.{}", table, column),
            table_id: table.clone(),
            name: column.clone(),
            type_: column_type(data_type, udt, *length, *precision, *scale),
            nullable: nullable == "YES",
            default: default.clone().map(|expression| ColumnDefaultConfig::Expression { expression }),
        })
        .collect();

    let mut by_constraint: BTreeMap<&str, Vec<&ForeignKeyRow>> = BTreeMap::new();
    for fk in &catalog.foreign_keys {
        by_constraint.entry(fk.0.as_str()).or_default().push(fk);
    }
    let relationships = by_constraint
        .into_iter()
        .filter_map(|(name, rows)| match rows.as_slice() {
            [(_, from_table, from_column, to_table, to_column)] if known(from_table.as_str()) && known(to_table.as_str()) => {
                Some(RelationshipConfig {
                    id: name.to_string(),
                    from_table_id: from_table.clone(),
                    from_column_id: format!("{}.{}", from_table, from_column),
                    to_table_id: to_table.clone(),
                    to_column_id: format!("{}.{}", to_table, to_column),
                    name: None,
                    backref: None,
                    order_by: Vec::new(),
                    lazy: None,
                })
            }
            _ => None,
        })
        .collect();

    let mut enums: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, label) in &catalog.enums {
        enums.entry(name.as_str()).or_default().push(label.clone());
    }

    FullConfig {
        schemas: vec![SchemaConfig {
            id: schema.to_string(),
            name: schema.to_string(),
            comment: None,
        }],
        enums: enums
            .into_iter()
            .map(|(name, values)| EnumConfig {
                id: name.to_string(),
                schema_id: Some(schema.to_string()),
                name: name.to_string(),
                values,
            })
            .collect(),
        tables,
        columns,
        relationships,
        api_entities: Vec::new(),
    }
}
