//! Raw model config types (schemas, enums, tables, columns, relationships, api entities)
//! plus the manager-level `ApiConfig`.

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumConfig {
    pub id: String,
    #[serde(default)]
    pub schema_id: Option<String>,
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKeyConfig {
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKeyConfig {
    pub fn columns(&self) -> Vec<String> {
        match self {
            PrimaryKeyConfig::Single(s) => vec![s.clone()],
            PrimaryKeyConfig::Composite(v) => v.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableConfig {
    pub id: String,
    #[serde(default)]
    pub schema_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub primary_key: PrimaryKeyConfig,
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    /// Lowercased base name and numeric parameters: `numeric(10,2)` gives `("numeric", [10, 2])`.
    pub fn parts(&self) -> (String, Vec<u32>) {
        match self {
            ColumnTypeConfig::Parameterized { name, params } => {
                (name.trim().to_lowercase(), params.clone().unwrap_or_default())
            }
            ColumnTypeConfig::Simple(s) => match s.split_once('(') {
                Some((base, rest)) => {
                    let params = rest
                        .trim_end_matches(')')
                        .split(',')
                        .filter_map(|p| p.trim().parse().ok())
                        .collect();
                    (base.trim().to_lowercase(), params)
                }
                None => (s.trim().to_lowercase(), Vec::new()),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum ColumnDefaultConfig {
    Literal(String),
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::String(s) => Ok(ColumnDefaultConfig::Literal(s)),
            serde_json::Value::Number(n) => Ok(ColumnDefaultConfig::Literal(n.to_string())),
            serde_json::Value::Bool(b) => Ok(ColumnDefaultConfig::Literal(b.to_string())),
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                if let Some(serde_json::Value::String(s)) = obj.remove("value") {
                    return Ok(ColumnDefaultConfig::Literal(s));
                }
                Err(serde::de::Error::custom(format!(
                    "column default must be a literal, {{ \"expression\": \"...\" }}, or {{ \"value\": \"...\" }}; got object with keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            other => Err(serde::de::Error::custom(format!(
                "column default must be a literal or {{ \"expression\": \"...\" }}; got {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub id: String,
    pub table_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
}

fn default_true() -> bool {
    true
}

/// Foreign key `from_table.from_column -> to_table.to_column`.
///
/// `name` is the to-one attribute on the referencing table (default: the referenced
/// table's name); `backref` is the collection attribute on the referenced table
/// (default: `<from_table>_collection`). On a junction table the `backref` of each
/// foreign key names the collection its referenced table gets across the junction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub id: String,
    pub from_table_id: String,
    pub from_column_id: String,
    pub to_table_id: String,
    pub to_column_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub backref: Option<String>,
    /// Ordering of the collection side, `field` or `field:desc`.
    #[serde(default)]
    pub order_by: Vec<String>,
    #[serde(default)]
    pub lazy: Option<String>,
}

/// Exposure of one table as an endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiEntityConfig {
    pub entity_id: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// `GET`, `POST`, `PUT`, `DELETE`; default read-only.
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub key_field: Option<String>,
    #[serde(default)]
    pub match_fields: Vec<String>,
    #[serde(default)]
    pub only: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub results_per_page: Option<u32>,
    #[serde(default)]
    pub max_results_per_page: Option<u32>,
}

/// All config types in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FullConfig {
    pub schemas: Vec<SchemaConfig>,
    pub enums: Vec<EnumConfig>,
    pub tables: Vec<TableConfig>,
    pub columns: Vec<ColumnConfig>,
    pub relationships: Vec<RelationshipConfig>,
    pub api_entities: Vec<ApiEntityConfig>,
}

/// Manager-level settings shared by every endpoint.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub prefix: String,
    pub key_field_prefix: String,
    pub items_key: String,
    /// Page size when neither `_num` nor the entity sets one; `None` is unpaged.
    pub results_per_page: Option<u32>,
    pub max_results_per_page: Option<u32>,
    pub body_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            prefix: "/api".into(),
            key_field_prefix: "@".into(),
            items_key: "items".into(),
            results_per_page: None,
            max_results_per_page: None,
            body_limit: 2 * 1024 * 1024,
        }
    }
}

impl ApiConfig {
    /// Defaults overridden by `RESTAPI_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = ApiConfig::default();
        if let Some(v) = lookup("RESTAPI_PREFIX") {
            config.prefix = v;
        }
        if let Some(v) = lookup("RESTAPI_KEY_FIELD_PREFIX") {
            config.key_field_prefix = v;
        }
        if let Some(v) = lookup("RESTAPI_ITEMS_KEY") {
            config.items_key = v;
        }
        if let Some(v) = lookup("RESTAPI_RESULTS_PER_PAGE") {
            config.results_per_page = Some(parse_env("RESTAPI_RESULTS_PER_PAGE", &v)?);
        }
        if let Some(v) = lookup("RESTAPI_MAX_RESULTS_PER_PAGE") {
            config.max_results_per_page = Some(parse_env("RESTAPI_MAX_RESULTS_PER_PAGE", &v)?);
        }
        if let Some(v) = lookup("RESTAPI_BODY_LIMIT") {
            config.body_limit = parse_env("RESTAPI_BODY_LIMIT", &v)?;
        }
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Load(format!("{} is not a valid number: {}", key, value)))
}
