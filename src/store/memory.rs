//! Transactional in-memory store. A session holds the store lock, mutates a copy,
//! and swaps it in on commit.

use super::{Backend, ConstraintKind, DbError, Dialect, Session};
use crate::query::{CompareOp, Condition, Order, Select};
use crate::schema::{values_equal, Direction, EntityDescriptor, Join, Row, Secondary, SemanticType};
use crate::serialize::parse_decimal;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
}

impl Tables {
    fn table(&self, name: &str) -> &[Row] {
        self.rows.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<Mutex<Tables>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends rows to `table` without constraint checks.
    pub async fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        let mut data = self.data.lock().await;
        data.rows.entry(table.to_string()).or_default().extend(rows);
    }

    /// Committed contents of `table`.
    pub async fn snapshot(&self, table: &str) -> Vec<Row> {
        self.data.lock().await.table(table).to_vec()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn begin(&self) -> Result<Box<dyn Session>, DbError> {
        let guard = self.data.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemorySession { guard, work }))
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn dialect(&self) -> Dialect {
        Dialect::Memory
    }
}

pub struct MemorySession {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

fn like_regex(pattern: &str) -> Result<Regex, DbError> {
    let mut re = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '/' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| DbError::Execution(e.to_string()))
}

fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Postgres ordering: NULLs sort after every value.
fn compare_values(semantic: SemanticType, a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    if semantic == SemanticType::Decimal {
        if let (Some(x), Some(y)) = (parse_decimal(a), parse_decimal(b)) {
            return x.cmp(&y);
        }
    }
    if semantic.is_numeric() {
        if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
            return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => text_of(a).cmp(&text_of(b)),
    }
}

/// Stored values and filter values are both canonical, except decimals which may differ in trailing zeros.
fn stored_equal(semantic: SemanticType, a: &Value, b: &Value) -> bool {
    if semantic == SemanticType::Decimal {
        if let (Some(x), Some(y)) = (parse_decimal(a), parse_decimal(b)) {
            return x == y;
        }
    }
    values_equal(a, b)
}

impl MemorySession {
    fn matches(&self, entity: &EntityDescriptor, row: &Row, cond: &Condition) -> Result<bool, DbError> {
        Ok(match cond {
            Condition::Compare { field, op, value } => {
                let semantic = entity
                    .scalar(field)
                    .map(|f| f.semantic)
                    .unwrap_or(SemanticType::String);
                let current = row.get(field).unwrap_or(&Value::Null);
                match op {
                    CompareOp::Eq if value.is_null() => current.is_null(),
                    CompareOp::Eq => !current.is_null() && stored_equal(semantic, current, value),
                    CompareOp::In => value
                        .as_array()
                        .map(|vs| vs.iter().any(|v| !current.is_null() && stored_equal(semantic, current, v)))
                        .unwrap_or(false),
                    CompareOp::Like => match (text_of(current), value.as_str()) {
                        (Some(text), Some(pattern)) => like_regex(pattern)?.is_match(&text),
                        _ => false,
                    },
                }
            }
            Condition::Any(parts) => {
                for p in parts {
                    if self.matches(entity, row, p)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::All(parts) => {
                for p in parts {
                    if !self.matches(entity, row, p)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::Never => false,
            Condition::Related {
                relation,
                target,
                condition,
            } => {
                for candidate in self.related_rows(row, &relation.join, &relation.target_table) {
                    if self.matches(target, candidate, condition)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::Linked { secondary, parent } => {
                let Some(remote) = row.get(&secondary.remote).filter(|v| !v.is_null()) else {
                    return Ok(false);
                };
                self.work.table(&secondary.table).iter().any(|link| {
                    link.get(&secondary.secondary_local).is_some_and(|v| values_equal(v, parent))
                        && link.get(&secondary.secondary_remote).is_some_and(|v| values_equal(v, remote))
                })
            }
        })
    }

    fn related_rows<'a>(&'a self, row: &Row, join: &Join, target_table: &str) -> Vec<&'a Row> {
        match join {
            Join::Direct { local, remote } => {
                let Some(key) = row.get(local).filter(|v| !v.is_null()) else {
                    return Vec::new();
                };
                self.work
                    .table(target_table)
                    .iter()
                    .filter(|r| r.get(remote).is_some_and(|v| values_equal(v, key)))
                    .collect()
            }
            Join::Secondary(sec) => {
                let Some(key) = row.get(&sec.local).filter(|v| !v.is_null()) else {
                    return Vec::new();
                };
                let remotes: Vec<&Value> = self
                    .work
                    .table(&sec.table)
                    .iter()
                    .filter(|l| l.get(&sec.secondary_local).is_some_and(|v| values_equal(v, key)))
                    .filter_map(|l| l.get(&sec.secondary_remote))
                    .collect();
                self.work
                    .table(target_table)
                    .iter()
                    .filter(|r| {
                        r.get(&sec.remote)
                            .is_some_and(|v| remotes.iter().any(|k| values_equal(v, k)))
                    })
                    .collect()
            }
        }
    }

    fn filtered(&self, entity: &EntityDescriptor, filters: &[Condition]) -> Result<Vec<Row>, DbError> {
        let mut out = Vec::new();
        for row in self.work.table(&entity.table_name) {
            let mut keep = true;
            for f in filters {
                if !self.matches(entity, row, f)? {
                    keep = false;
                    break;
                }
            }
            if keep {
                out.push(row.clone());
            }
        }
        Ok(out)
    }

    fn position(&self, entity: &EntityDescriptor, key: &Row) -> Option<usize> {
        self.work
            .table(&entity.table_name)
            .iter()
            .position(|r| entity.same_identity(key, r))
    }

    /// Not-null, unique and many-to-one foreign key checks for `row` at `skip` (its own slot on update).
    fn check_constraints(&self, entity: &EntityDescriptor, row: &Row, skip: Option<usize>) -> Result<(), DbError> {
        let table = &entity.table_name;
        for f in entity.scalars() {
            if !f.nullable && row.get(&f.name).map_or(true, Value::is_null) {
                return Err(DbError::Constraint {
                    kind: ConstraintKind::NotNull,
                    table: table.clone(),
                    column: Some(f.name.clone()),
                    value: None,
                });
            }
        }
        for key in entity.key_sets() {
            let values: Vec<&Value> = key.iter().filter_map(|k| row.get(k)).collect();
            if values.len() != key.len() || values.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = self.work.table(table).iter().enumerate().any(|(i, other)| {
                Some(i) != skip
                    && key.iter().all(|k| {
                        let semantic = entity.scalar(k).map(|f| f.semantic).unwrap_or(SemanticType::String);
                        match (row.get(k), other.get(k)) {
                            (Some(a), Some(b)) => stored_equal(semantic, a, b),
                            _ => false,
                        }
                    })
            });
            if clash {
                return Err(DbError::Constraint {
                    kind: ConstraintKind::Unique,
                    table: table.clone(),
                    column: Some(key.join(",")),
                    value: Some(Value::Array(values.into_iter().cloned().collect())),
                });
            }
        }
        for relation in entity.relations() {
            let (Some(local), Join::Direct { remote, .. }) = (relation.owner_column(), &relation.join) else {
                continue;
            };
            let Some(value) = row.get(local).filter(|v| !v.is_null()) else {
                continue;
            };
            let exists = self
                .work
                .table(&relation.target_table)
                .iter()
                .any(|r| r.get(remote).is_some_and(|v| values_equal(v, value)));
            if !exists {
                return Err(DbError::Constraint {
                    kind: ConstraintKind::ForeignKey,
                    table: table.clone(),
                    column: Some(local.to_string()),
                    value: Some(value.clone()),
                });
            }
        }
        Ok(())
    }

    fn next_id(&self, entity: &EntityDescriptor, column: &str) -> Value {
        let max = self
            .work
            .table(&entity.table_name)
            .iter()
            .filter_map(|r| r.get(column).and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        Value::from(max + 1)
    }
}

fn sort_rows(entity: &EntityDescriptor, rows: &mut [Row], order: &[Order]) {
    let mut keys: Vec<(String, Direction)> = order.iter().map(|o| (o.field.clone(), o.direction)).collect();
    for pk in &entity.primary_key {
        if !keys.iter().any(|(f, _)| f == pk) {
            keys.push((pk.clone(), Direction::Asc));
        }
    }
    rows.sort_by(|a, b| {
        for (field, direction) in &keys {
            let semantic = entity.scalar(field).map(|f| f.semantic).unwrap_or(SemanticType::String);
            let x = a.get(field).unwrap_or(&Value::Null);
            let y = b.get(field).unwrap_or(&Value::Null);
            let ord = match direction {
                Direction::Asc => compare_values(semantic, x, y),
                Direction::Desc => compare_values(semantic, y, x),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[async_trait]
impl Session for MemorySession {
    async fn select(&mut self, entity: &EntityDescriptor, select: &Select) -> Result<Vec<Row>, DbError> {
        let mut rows = self.filtered(entity, &select.filters)?;
        sort_rows(entity, &mut rows, &select.order);
        let rows = rows.into_iter().skip(select.offset as usize);
        Ok(match select.limit {
            Some(n) => rows.take(n as usize).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&mut self, entity: &EntityDescriptor, filters: &[Condition]) -> Result<u64, DbError> {
        Ok(self.filtered(entity, filters)?.len() as u64)
    }

    async fn insert(&mut self, entity: &EntityDescriptor, row: &Row) -> Result<Row, DbError> {
        let mut stored = Row::new();
        let auto_pk = match entity.primary_key.as_slice() {
            [pk] if entity.scalar(pk).is_some_and(|f| f.semantic == SemanticType::Integer && f.has_default) => {
                Some(pk.as_str())
            }
            _ => None,
        };
        for f in entity.scalars() {
            let value = match row.get(&f.name) {
                Some(v) => v.clone(),
                None if Some(f.name.as_str()) == auto_pk => self.next_id(entity, &f.name),
                None if f.default_value.is_some() => f.default_value.clone().unwrap_or(Value::Null),
                None if f.has_default || f.nullable => Value::Null,
                None => {
                    return Err(DbError::Constraint {
                        kind: ConstraintKind::NoDefault,
                        table: entity.table_name.clone(),
                        column: Some(f.name.clone()),
                        value: None,
                    })
                }
            };
            stored.insert(f.name.clone(), value);
        }
        self.check_constraints(entity, &stored, None)?;
        self.work
            .rows
            .entry(entity.table_name.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn update(&mut self, entity: &EntityDescriptor, key: &Row, changes: &Row) -> Result<Row, DbError> {
        let Some(idx) = self.position(entity, key) else {
            return Err(DbError::Missing {
                table: entity.table_name.clone(),
            });
        };
        let mut updated = self.work.table(&entity.table_name)[idx].clone();
        for f in entity.scalars() {
            if let Some(v) = changes.get(&f.name) {
                updated.insert(f.name.clone(), v.clone());
            }
        }
        self.check_constraints(entity, &updated, Some(idx))?;
        if let Some(rows) = self.work.rows.get_mut(&entity.table_name) {
            rows[idx] = updated.clone();
        }
        Ok(updated)
    }

    async fn delete(&mut self, entity: &EntityDescriptor, key: &Row) -> Result<(), DbError> {
        let Some(idx) = self.position(entity, key) else {
            return Err(DbError::Missing {
                table: entity.table_name.clone(),
            });
        };
        if let Some(rows) = self.work.rows.get_mut(&entity.table_name) {
            rows.remove(idx);
        }
        Ok(())
    }

    async fn link(&mut self, secondary: &Secondary, local: &Value, remote: &Value) -> Result<(), DbError> {
        let links = self.work.rows.entry(secondary.table.clone()).or_default();
        let present = links.iter().any(|l| {
            l.get(&secondary.secondary_local).is_some_and(|v| values_equal(v, local))
                && l.get(&secondary.secondary_remote).is_some_and(|v| values_equal(v, remote))
        });
        if !present {
            let mut link = Row::new();
            link.insert(secondary.secondary_local.clone(), local.clone());
            link.insert(secondary.secondary_remote.clone(), remote.clone());
            links.push(link);
        }
        Ok(())
    }

    async fn unlink(&mut self, secondary: &Secondary, local: &Value, remote: Option<&Value>) -> Result<(), DbError> {
        if let Some(links) = self.work.rows.get_mut(&secondary.table) {
            links.retain(|l| {
                let same_local = l.get(&secondary.secondary_local).is_some_and(|v| values_equal(v, local));
                let same_remote = match remote {
                    Some(r) => l.get(&secondary.secondary_remote).is_some_and(|v| values_equal(v, r)),
                    None => true,
                };
                !(same_local && same_remote)
            });
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let MemorySession { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}
