//! Compiled entity metadata: fields, keys, relations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored row: column name to JSON value.
pub type Row = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    String,
    Integer,
    /// Dumped as decimal text.
    BigInteger,
    /// Dumped as text with the declared scale.
    Decimal,
    Float,
    Boolean,
    /// `YYYY-MM-DD HH:MM:SS`.
    DateTime,
    Date,
    Uuid,
    Json,
    Raw,
    Related,
}

impl SemanticType {
    pub fn is_textual(self) -> bool {
        matches!(self, SemanticType::String)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            SemanticType::Integer | SemanticType::BigInteger | SemanticType::Decimal | SemanticType::Float
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Validator {
    Required,
    Length { max: u32 },
    OneOf(Vec<String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    #[default]
    Select,
    Dynamic,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(Direction::Asc),
            "desc" => Some(Direction::Desc),
            _ => None,
        }
    }
}

/// Junction table linking two entities.
#[derive(Clone, Debug, PartialEq)]
pub struct Secondary {
    pub schema_name: String,
    pub table: String,
    /// Column on the owning entity.
    pub local: String,
    /// Junction column pointing at `local`.
    pub secondary_local: String,
    /// Junction column pointing at `remote`.
    pub secondary_remote: String,
    /// Column on the target entity.
    pub remote: String,
    pub local_type: String,
    pub remote_type: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Join {
    /// `owner.local = target.remote`.
    Direct { local: String, remote: String },
    Secondary(Secondary),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelationDescriptor {
    pub name: String,
    /// Entity name of the other side; looked up in the registry.
    pub target: String,
    pub target_table: String,
    pub cardinality: Cardinality,
    pub nullable: bool,
    pub lazy: LoadMode,
    pub order_by: Vec<(String, Direction)>,
    pub join: Join,
}

impl RelationDescriptor {
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Many-to-one: the foreign key lives on the owning entity.
    pub fn owner_column(&self) -> Option<&str> {
        match (&self.join, self.cardinality) {
            (Join::Direct { local, .. }, Cardinality::One) => Some(local),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub semantic: SemanticType,
    pub nullable: bool,
    pub has_default: bool,
    pub default_value: Option<Value>,
    pub max_length: Option<u32>,
    pub choices: Option<Vec<String>>,
    pub scale: Option<u32>,
    /// Database type used for casts, e.g. `integer`, `numeric`, `sample.order_status`.
    pub sql_type: String,
    pub validators: Vec<Validator>,
    pub relation: Option<RelationDescriptor>,
}

impl FieldDescriptor {
    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntityDescriptor {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub fields: Vec<FieldDescriptor>,
    pub primary_key: Vec<String>,
    pub unique: Vec<Vec<String>>,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn scalar(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field(name).filter(|f| !f.is_relation())
    }

    pub fn scalars(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.is_relation())
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.field(name).and_then(|f| f.relation.as_ref())
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationDescriptor> {
        self.fields.iter().filter_map(|f| f.relation.as_ref())
    }

    /// First primary key column; used for URL keys and default ordering.
    pub fn pk_field(&self) -> Option<&FieldDescriptor> {
        self.primary_key.first().and_then(|pk| self.scalar(pk))
    }

    /// Primary key followed by unique constraints, in declaration order.
    pub fn key_sets(&self) -> impl Iterator<Item = &Vec<String>> {
        std::iter::once(&self.primary_key).chain(self.unique.iter())
    }

    /// Primary key columns of `row`.
    pub fn identity(&self, row: &Row) -> Row {
        self.primary_key
            .iter()
            .map(|k| (k.clone(), row.get(k).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// True when every primary key value of `a` equals the one in `b`.
    pub fn same_identity(&self, a: &Row, b: &Row) -> bool {
        self.primary_key.iter().all(|k| match (a.get(k), b.get(k)) {
            (Some(x), Some(y)) => !x.is_null() && values_equal(x, y),
            _ => false,
        })
    }
}

/// Equality across JSON representations of the same stored value (`1` vs `1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}
