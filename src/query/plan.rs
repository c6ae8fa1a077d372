//! Query-string parameters to a `QueryPlan`.
//!
//! Reserved keys start with `_`; keys starting with `__` belong to the caller and
//! are skipped. Every other key is a filter. Singular keys keep their first value,
//! `[]` keys collect every value.

use crate::error::ApiError;
use crate::schema::Direction;
use std::collections::{HashMap, HashSet};

pub const MAX_EXPAND: i64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
    Like,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
    Single(String),
    Many(Vec<String>),
}

impl FilterValue {
    /// Raw text for error messages: the first value.
    pub fn raw(&self) -> &str {
        match self {
            FilterValue::Single(s) => s,
            FilterValue::Many(v) => v.first().map(String::as_str).unwrap_or(""),
        }
    }
}

/// `path` is `field` or `relation.field`.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub path: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

/// Where a sort key came from; bad fields are reported under that parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortSource {
    Sort,
    Orders,
}

impl SortSource {
    pub fn key(self) -> &'static str {
        match self {
            SortSource::Sort => "_sort",
            SortSource::Orders => "_orders",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
    pub source: SortSource,
}

#[derive(Clone, Debug)]
pub struct QueryPlan {
    pub page: u64,
    /// `Some(-1)` is unpaged; `None` defers to the endpoint and manager defaults.
    pub num: Option<i64>,
    pub orders: Vec<SortKey>,
    pub expand: u8,
    /// Allow lists keyed by endpoint name.
    pub fields: HashMap<String, Vec<String>>,
    /// Deny lists keyed by endpoint name.
    pub except: HashMap<String, Vec<String>>,
    pub match_keywords: Option<String>,
    pub filters: Vec<Filter>,
}

impl Default for QueryPlan {
    fn default() -> Self {
        QueryPlan {
            page: 1,
            num: None,
            orders: Vec::new(),
            expand: 0,
            fields: HashMap::new(),
            except: HashMap::new(),
            match_keywords: None,
            filters: Vec::new(),
        }
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64, ApiError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| ApiError::invalid_argument(key, value))
}

fn parse_direction(value: &str) -> Result<Direction, ApiError> {
    Direction::parse(value.trim()).ok_or_else(|| ApiError::assertion(format!("direction must be asc or desc: {}", value)))
}

/// `field:asc,other:desc`; the direction defaults to ascending.
fn parse_orders(value: &str, out: &mut Vec<SortKey>) -> Result<(), ApiError> {
    for phrase in value.split(',').filter(|p| !p.is_empty()) {
        let (field, direction) = match phrase.split_once(':') {
            Some((field, direction)) => (field, parse_direction(direction)?),
            None => (phrase, Direction::Asc),
        };
        out.push(SortKey {
            field: field.to_string(),
            direction,
            source: SortSource::Orders,
        });
    }
    Ok(())
}

/// `endpoint:f1,f2;other:f3`.
fn parse_field_groups(value: &str, out: &mut HashMap<String, Vec<String>>) -> Result<(), ApiError> {
    for group in value.split(';').filter(|g| !g.is_empty()) {
        let (endpoint, fields) = group
            .split_once(':')
            .ok_or_else(|| ApiError::assertion(format!("expected endpoint:field,... got {}", group)))?;
        out.insert(
            endpoint.to_string(),
            fields.split(',').filter(|f| !f.is_empty()).map(str::to_string).collect(),
        );
    }
    Ok(())
}

impl QueryPlan {
    pub fn parse(params: &[(String, String)]) -> Result<Self, ApiError> {
        let mut plan = QueryPlan::default();
        let mut sort: Option<String> = None;
        let mut direction = Direction::Asc;
        let mut orders = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for (key, value) in params {
            if key.starts_with("__") {
                continue;
            }
            let (name, listed) = match key.strip_suffix("[]") {
                Some(name) => (name, true),
                None => (key.as_str(), false),
            };
            if !listed && !seen.insert(key.as_str()) {
                continue;
            }
            match name {
                "_page" => {
                    let page = parse_int(key, value)?;
                    if page < 1 {
                        return Err(ApiError::assertion("_page must be >= 1"));
                    }
                    plan.page = page as u64;
                }
                "_num" => {
                    let num = parse_int(key, value)?;
                    if num < -1 {
                        return Err(ApiError::assertion("_num must be >= 0 or -1"));
                    }
                    plan.num = Some(num);
                }
                "_sort" => sort = Some(value.clone()),
                "_direction" => direction = parse_direction(value)?,
                "_orders" => parse_orders(value, &mut orders)?,
                "_expand" => {
                    let expand = parse_int(key, value)?;
                    if !(0..=MAX_EXPAND).contains(&expand) {
                        return Err(ApiError::assertion("_expand params must [0,10]"));
                    }
                    plan.expand = expand as u8;
                }
                "_fields" => parse_field_groups(value, &mut plan.fields)?,
                "_except" => parse_field_groups(value, &mut plan.except)?,
                "_match" => plan.match_keywords = Some(value.clone()),
                _ if listed => plan.push_listed(name, value),
                _ => {
                    let op = if value.starts_with('%') || value.ends_with('%') {
                        FilterOp::Like
                    } else {
                        FilterOp::Eq
                    };
                    plan.filters.push(Filter {
                        path: name.to_string(),
                        op,
                        value: FilterValue::Single(value.clone()),
                    });
                }
            }
        }

        if let Some(field) = sort {
            plan.orders.push(SortKey {
                field,
                direction,
                source: SortSource::Sort,
            });
        }
        plan.orders.extend(orders);
        Ok(plan)
    }

    fn push_listed(&mut self, path: &str, value: &str) {
        let existing = self
            .filters
            .iter_mut()
            .find(|f| f.op == FilterOp::In && f.path == path);
        match existing {
            Some(Filter {
                value: FilterValue::Many(values),
                ..
            }) => values.push(value.to_string()),
            _ => self.filters.push(Filter {
                path: path.to_string(),
                op: FilterOp::In,
                value: FilterValue::Many(vec![value.to_string()]),
            }),
        }
    }
}
