//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from entity descriptors.

use crate::query::{CompareOp, Condition, Order, Select};
use crate::schema::{Direction, EntityDescriptor, FieldDescriptor, Join, Row, Secondary, SemanticType};
use serde_json::Value;

const MAIN_ALIAS: &str = "main";

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn entity_table(entity: &EntityDescriptor) -> String {
    qualified_table(&entity.schema_name, &entity.table_name)
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
    /// Incremented per nested subquery so aliases never collide.
    depth: u32,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
            depth: 0,
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Placeholder with a cast to the column type; values are always bound as text.
    fn placeholder(&mut self, v: Value, sql_type: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, sql_type)
    }

    fn next_alias(&mut self, prefix: &str) -> String {
        self.depth += 1;
        format!("{}{}", prefix, self.depth)
    }
}

/// Column as read back: datetimes in canonical text, numerics and enums as text so scale survives.
fn read_expr(alias: &str, field: &FieldDescriptor) -> String {
    let col = format!("{}.{}", alias, quoted(&field.name));
    match field.semantic {
        SemanticType::DateTime => format!("to_char({}, 'YYYY-MM-DD HH24:MI:SS')", col),
        SemanticType::Date | SemanticType::Decimal | SemanticType::Uuid => format!("{}::text", col),
        SemanticType::String if field.sql_type.contains('.') => format!("{}::text", col),
        _ => col,
    }
}

fn select_column_list(entity: &EntityDescriptor, alias: &str) -> String {
    entity
        .scalars()
        .map(|f| format!("{} AS {}", read_expr(alias, f), quoted(&f.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sql_type_of(entity: &EntityDescriptor, column: &str) -> String {
    entity
        .scalar(column)
        .map(|f| f.sql_type.clone())
        .unwrap_or_else(|| "text".to_string())
}

/// Renders one condition against `alias`, pushing its parameters.
fn push_condition(q: &mut QueryBuf, entity: &EntityDescriptor, alias: &str, cond: &Condition) -> String {
    match cond {
        Condition::Compare { field, op, value } => {
            let col = format!("{}.{}", alias, quoted(field));
            let sql_type = sql_type_of(entity, field);
            match op {
                CompareOp::Eq if value.is_null() => format!("{} IS NULL", col),
                CompareOp::Eq => {
                    let ph = q.placeholder(value.clone(), &sql_type);
                    format!("{} = {}", col, ph)
                }
                CompareOp::In => {
                    let values = value.as_array().cloned().unwrap_or_default();
                    if values.is_empty() {
                        return "1 = 0".to_string();
                    }
                    let placeholders: Vec<String> =
                        values.into_iter().map(|v| q.placeholder(v, &sql_type)).collect();
                    format!("{} IN ({})", col, placeholders.join(", "))
                }
                CompareOp::Like => {
                    let ph = q.placeholder(value.clone(), "text");
                    format!("{}::text LIKE {} ESCAPE '/'", col, ph)
                }
            }
        }
        Condition::Any(parts) => group(q, entity, alias, parts, " OR ", "1 = 0"),
        Condition::All(parts) => group(q, entity, alias, parts, " AND ", "1 = 1"),
        Condition::Never => "1 = 0".to_string(),
        Condition::Related {
            relation,
            target,
            condition,
        } => {
            let rel = q.next_alias("rel");
            let inner = push_condition(q, target, &rel, condition);
            match &relation.join {
                Join::Direct { local, remote } => format!(
                    "EXISTS (SELECT 1 FROM {} {} WHERE {}.{} = {}.{} AND {})",
                    entity_table(target),
                    rel,
                    rel,
                    quoted(remote),
                    alias,
                    quoted(local),
                    inner
                ),
                Join::Secondary(sec) => {
                    let sec_alias = q.next_alias("sec");
                    format!(
                        "EXISTS (SELECT 1 FROM {} {} JOIN {} {} ON {}.{} = {}.{} WHERE {}.{} = {}.{} AND {})",
                        qualified_table(&sec.schema_name, &sec.table),
                        sec_alias,
                        entity_table(target),
                        rel,
                        rel,
                        quoted(&sec.remote),
                        sec_alias,
                        quoted(&sec.secondary_remote),
                        sec_alias,
                        quoted(&sec.secondary_local),
                        alias,
                        quoted(&sec.local),
                        inner
                    )
                }
            }
        }
        Condition::Linked { secondary, parent } => {
            let sec_alias = q.next_alias("sec");
            let ph = q.placeholder(parent.clone(), &secondary.local_type);
            format!(
                "EXISTS (SELECT 1 FROM {} {} WHERE {}.{} = {} AND {}.{} = {}.{})",
                qualified_table(&secondary.schema_name, &secondary.table),
                sec_alias,
                sec_alias,
                quoted(&secondary.secondary_local),
                ph,
                sec_alias,
                quoted(&secondary.secondary_remote),
                alias,
                quoted(&secondary.remote)
            )
        }
    }
}

fn group(
    q: &mut QueryBuf,
    entity: &EntityDescriptor,
    alias: &str,
    parts: &[Condition],
    joiner: &str,
    empty: &str,
) -> String {
    if parts.is_empty() {
        return empty.to_string();
    }
    let rendered: Vec<String> = parts.iter().map(|c| push_condition(q, entity, alias, c)).collect();
    format!("({})", rendered.join(joiner))
}

fn where_clause(q: &mut QueryBuf, entity: &EntityDescriptor, filters: &[Condition]) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = filters
        .iter()
        .map(|c| push_condition(q, entity, MAIN_ALIAS, c))
        .collect();
    format!(" WHERE {}", parts.join(" AND "))
}

fn order_clause(entity: &EntityDescriptor, order: &[Order]) -> String {
    let mut parts: Vec<String> = order
        .iter()
        .map(|o| {
            let dir = match o.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            format!("{}.{} {}", MAIN_ALIAS, quoted(&o.field), dir)
        })
        .collect();
    // Stable paging: primary key breaks ties.
    for pk in &entity.primary_key {
        if !order.iter().any(|o| &o.field == pk) {
            parts.push(format!("{}.{} ASC", MAIN_ALIAS, quoted(pk)));
        }
    }
    format!(" ORDER BY {}", parts.join(", "))
}

pub fn select(entity: &EntityDescriptor, select: &Select) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, entity, &select.filters);
    let limit = select.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset = if select.offset > 0 {
        format!(" OFFSET {}", select.offset)
    } else {
        String::new()
    };
    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}{}",
        select_column_list(entity, MAIN_ALIAS),
        entity_table(entity),
        MAIN_ALIAS,
        where_sql,
        order_clause(entity, &select.order),
        limit,
        offset
    );
    q
}

pub fn count(entity: &EntityDescriptor, filters: &[Condition]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_sql = where_clause(&mut q, entity, filters);
    q.sql = format!(
        "SELECT COUNT(*) FROM {} {}{}",
        entity_table(entity),
        MAIN_ALIAS,
        where_sql
    );
    q
}

/// INSERT of the columns present in `row`; omitted columns take their database default.
pub fn insert(entity: &EntityDescriptor, row: &Row) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for f in entity.scalars() {
        let Some(v) = row.get(&f.name) else { continue };
        placeholders.push(q.placeholder(v.clone(), &f.sql_type));
        cols.push(quoted(&f.name));
    }
    let values = if cols.is_empty() {
        " DEFAULT VALUES".to_string()
    } else {
        format!(" ({}) VALUES ({})", cols.join(", "), placeholders.join(", "))
    };
    q.sql = format!(
        "INSERT INTO {} AS {}{} RETURNING {}",
        entity_table(entity),
        MAIN_ALIAS,
        values,
        select_column_list(entity, MAIN_ALIAS)
    );
    q
}

fn key_clause(q: &mut QueryBuf, entity: &EntityDescriptor, key: &Row) -> String {
    entity
        .primary_key
        .iter()
        .map(|pk| {
            let v = key.get(pk).cloned().unwrap_or(Value::Null);
            let ph = q.placeholder(v, &sql_type_of(entity, pk));
            format!("{}.{} = {}", MAIN_ALIAS, quoted(pk), ph)
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// UPDATE by primary key: SET only scalar columns present in `changes`.
pub fn update(entity: &EntityDescriptor, key: &Row, changes: &Row) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for f in entity.scalars() {
        let Some(v) = changes.get(&f.name) else { continue };
        let ph = q.placeholder(v.clone(), &f.sql_type);
        sets.push(format!("{} = {}", quoted(&f.name), ph));
    }
    let table = entity_table(entity);
    let returning = select_column_list(entity, MAIN_ALIAS);
    if sets.is_empty() {
        let cond = key_clause(&mut q, entity, key);
        q.sql = format!("SELECT {} FROM {} {} WHERE {}", returning, table, MAIN_ALIAS, cond);
        return q;
    }
    let cond = key_clause(&mut q, entity, key);
    q.sql = format!(
        "UPDATE {} AS {} SET {} WHERE {} RETURNING {}",
        table,
        MAIN_ALIAS,
        sets.join(", "),
        cond,
        returning
    );
    q
}

pub fn delete(entity: &EntityDescriptor, key: &Row) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cond = key_clause(&mut q, entity, key);
    q.sql = format!(
        "DELETE FROM {} AS {} WHERE {}",
        entity_table(entity),
        MAIN_ALIAS,
        cond
    );
    q
}

pub fn link(secondary: &Secondary, local: &Value, remote: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let a = q.placeholder(local.clone(), &secondary.local_type);
    let b = q.placeholder(remote.clone(), &secondary.remote_type);
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {}) ON CONFLICT DO NOTHING",
        qualified_table(&secondary.schema_name, &secondary.table),
        quoted(&secondary.secondary_local),
        quoted(&secondary.secondary_remote),
        a,
        b
    );
    q
}

pub fn unlink(secondary: &Secondary, local: &Value, remote: Option<&Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let a = q.placeholder(local.clone(), &secondary.local_type);
    let mut cond = format!("{} = {}", quoted(&secondary.secondary_local), a);
    if let Some(remote) = remote {
        let b = q.placeholder(remote.clone(), &secondary.remote_type);
        cond.push_str(&format!(" AND {} = {}", quoted(&secondary.secondary_remote), b));
    }
    q.sql = format!(
        "DELETE FROM {} WHERE {}",
        qualified_table(&secondary.schema_name, &secondary.table),
        cond
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Cardinality, LoadMode, RelationDescriptor};
    use serde_json::json;
    use std::sync::Arc;

    fn column(name: &str, semantic: SemanticType, sql_type: &str) -> FieldDescriptor {
        FieldDescriptor {
            name: name.into(),
            semantic,
            nullable: true,
            has_default: false,
            default_value: None,
            max_length: None,
            choices: None,
            scale: None,
            sql_type: sql_type.into(),
            validators: Vec::new(),
            relation: None,
        }
    }

    fn album() -> EntityDescriptor {
        EntityDescriptor {
            name: "Album".into(),
            schema_name: "public".into(),
            table_name: "Album".into(),
            fields: vec![
                column("AlbumId", SemanticType::Integer, "integer"),
                column("Title", SemanticType::String, "varchar"),
            ],
            primary_key: vec!["AlbumId".into()],
            unique: Vec::new(),
        }
    }

    fn track() -> EntityDescriptor {
        EntityDescriptor {
            name: "Track".into(),
            schema_name: "public".into(),
            table_name: "Track".into(),
            fields: vec![
                column("TrackId", SemanticType::Integer, "integer"),
                column("Name", SemanticType::String, "varchar"),
                column("UnitPrice", SemanticType::Decimal, "numeric"),
                column("AlbumId", SemanticType::Integer, "integer"),
            ],
            primary_key: vec!["TrackId".into()],
            unique: Vec::new(),
        }
    }

    #[test]
    fn test_select_casts_params_and_orders_by_pk() {
        let q = select(
            &track(),
            &Select {
                filters: vec![Condition::eq("AlbumId", json!(1))],
                order: vec![Order {
                    field: "Name".into(),
                    direction: Direction::Desc,
                }],
                limit: Some(20),
                offset: 40,
            },
        );
        assert!(q.sql.contains("main.\"UnitPrice\"::text AS \"UnitPrice\""));
        assert!(q.sql.contains("WHERE main.\"AlbumId\" = $1::integer"));
        assert!(q.sql.ends_with("ORDER BY main.\"Name\" DESC, main.\"TrackId\" ASC LIMIT 20 OFFSET 40"));
        assert_eq!(q.params, vec![json!(1)]);
    }

    #[test]
    fn test_like_and_in_filters() {
        let q = count(
            &track(),
            &[Condition::Any(vec![
                Condition::Compare {
                    field: "Name".into(),
                    op: CompareOp::Like,
                    value: json!("%Inject%"),
                },
                Condition::Compare {
                    field: "TrackId".into(),
                    op: CompareOp::In,
                    value: json!([1, 2]),
                },
            ])],
        );
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) FROM \"public\".\"Track\" main WHERE (main.\"Name\"::text LIKE $1::text ESCAPE '/' OR main.\"TrackId\" IN ($2::integer, $3::integer))"
        );
    }

    #[test]
    fn test_related_condition_renders_exists() {
        let relation = RelationDescriptor {
            name: "Album".into(),
            target: "Album".into(),
            target_table: "Album".into(),
            cardinality: Cardinality::One,
            nullable: true,
            lazy: LoadMode::Select,
            order_by: Vec::new(),
            join: Join::Direct {
                local: "AlbumId".into(),
                remote: "AlbumId".into(),
            },
        };
        let q = count(
            &track(),
            &[Condition::Related {
                relation,
                target: Arc::new(album()),
                condition: Box::new(Condition::Compare {
                    field: "Title".into(),
                    op: CompareOp::Like,
                    value: json!("%Rock%"),
                }),
            }],
        );
        assert!(q.sql.contains(
            "EXISTS (SELECT 1 FROM \"public\".\"Album\" rel1 WHERE rel1.\"AlbumId\" = main.\"AlbumId\" AND rel1.\"Title\"::text LIKE $1::text ESCAPE '/')"
        ));
    }

    #[test]
    fn test_update_without_changes_reads_row() {
        let mut key = Row::new();
        key.insert("TrackId".into(), json!(3));
        let q = update(&track(), &key, &Row::new());
        assert!(q.sql.starts_with("SELECT "));
        assert!(q.sql.ends_with("WHERE main.\"TrackId\" = $1::integer"));
    }
}
