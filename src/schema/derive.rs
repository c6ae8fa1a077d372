//! Entity descriptors from model config: type inference, validators, relations.

use crate::config::{default_schema_name, ColumnConfig, ColumnDefaultConfig, EnumConfig, FullConfig, RelationshipConfig, TableConfig};
use crate::error::ConfigError;
use crate::schema::{
    Cardinality, Direction, EntityDescriptor, FieldDescriptor, Join, LoadMode, RelationDescriptor, Secondary,
    SemanticType, Validator,
};
use crate::serialize::parse_text;
use std::collections::{HashMap, HashSet};

/// Caller-supplied type mappings, consulted before the built-in table.
#[derive(Clone, Debug, Default)]
pub struct DeriveOptions {
    overrides: HashMap<String, (SemanticType, String)>,
}

impl DeriveOptions {
    /// Maps a vendor type name (lowercase base name) to a semantic type and cast type.
    pub fn override_type(mut self, type_name: &str, semantic: SemanticType, sql_type: &str) -> Self {
        self.overrides
            .insert(type_name.to_lowercase(), (semantic, sql_type.to_string()));
        self
    }
}

/// Built-in type table: base name to semantic type and cast type.
fn builtin_type(base: &str) -> Option<(SemanticType, &'static str)> {
    Some(match base {
        "varchar" | "character varying" | "char" | "character" | "nvarchar" | "nchar" | "text" | "citext"
        | "string" | "time" | "interval" => (SemanticType::String, "text"),
        "smallint" | "int2" | "smallserial" | "serial2" => (SemanticType::Integer, "smallint"),
        "integer" | "int" | "int4" | "serial" | "serial4" | "tinyint" | "mediumint" => (SemanticType::Integer, "integer"),
        "bigint" | "int8" | "bigserial" | "serial8" => (SemanticType::BigInteger, "bigint"),
        "numeric" | "decimal" | "money" => (SemanticType::Decimal, "numeric"),
        "real" | "float4" => (SemanticType::Float, "real"),
        "double precision" | "float8" | "float" | "double" => (SemanticType::Float, "double precision"),
        "boolean" | "bool" => (SemanticType::Boolean, "boolean"),
        "timestamp" | "timestamp without time zone" | "datetime" => (SemanticType::DateTime, "timestamp"),
        "timestamptz" | "timestamp with time zone" => (SemanticType::DateTime, "timestamptz"),
        "date" => (SemanticType::Date, "date"),
        "uuid" => (SemanticType::Uuid, "uuid"),
        "json" => (SemanticType::Json, "json"),
        "jsonb" => (SemanticType::Json, "jsonb"),
        "bytea" | "blob" | "binary" | "varbinary" => (SemanticType::Raw, "bytea"),
        _ => return None,
    })
}

fn is_serial(base: &str) -> bool {
    base.contains("serial")
}

fn is_string_bounded(base: &str) -> bool {
    matches!(base, "varchar" | "character varying" | "char" | "character" | "nvarchar" | "nchar")
}

struct Model<'a> {
    config: &'a FullConfig,
    options: &'a DeriveOptions,
    tables_by_id: HashMap<&'a str, &'a TableConfig>,
    columns_by_id: HashMap<&'a str, &'a ColumnConfig>,
    enums: HashMap<String, &'a EnumConfig>,
    fk_columns: HashSet<&'a str>,
}

impl<'a> Model<'a> {
    fn new(config: &'a FullConfig, options: &'a DeriveOptions) -> Self {
        let schema_names: HashMap<&str, &str> = config.schemas.iter().map(|s| (s.id.as_str(), s.name.as_str())).collect();
        let mut enums = HashMap::new();
        for e in &config.enums {
            enums.insert(e.name.to_lowercase(), e);
            if let Some(schema) = e.schema_id.as_deref().and_then(|id| schema_names.get(id)) {
                enums.insert(format!("{}.{}", schema, e.name).to_lowercase(), e);
            }
        }
        Model {
            config,
            options,
            tables_by_id: config.tables.iter().map(|t| (t.id.as_str(), t)).collect(),
            columns_by_id: config.columns.iter().map(|c| (c.id.as_str(), c)).collect(),
            enums,
            fk_columns: config.relationships.iter().map(|r| r.from_column_id.as_str()).collect(),
        }
    }

    fn schema_name(&self, table: &TableConfig) -> String {
        table
            .schema_id
            .as_deref()
            .and_then(|id| self.config.schemas.iter().find(|s| s.id == id))
            .map(|s| s.name.clone())
            .unwrap_or_else(|| default_schema_name(self.config).to_string())
    }

    fn columns_of(&self, table: &TableConfig) -> Vec<&'a ColumnConfig> {
        self.config.columns.iter().filter(|c| c.table_id == table.id).collect()
    }

    fn enum_qualified_name(&self, e: &EnumConfig) -> String {
        match e.schema_id.as_deref().and_then(|id| self.config.schemas.iter().find(|s| s.id == id)) {
            Some(schema) => format!("{}.{}", schema.name, e.name),
            None => e.name.clone(),
        }
    }

    fn scalar_field(&self, table: &TableConfig, column: &ColumnConfig) -> Result<FieldDescriptor, ConfigError> {
        let (base, params) = column.type_.parts();
        let pk = table.primary_key.columns();
        let mut choices = None;
        let (semantic, sql_type) = if let Some((semantic, sql_type)) = self.options.overrides.get(&base) {
            (*semantic, sql_type.clone())
        } else if let Some(e) = self.enums.get(&base) {
            choices = Some(e.values.clone());
            (SemanticType::String, self.enum_qualified_name(e))
        } else if let Some((semantic, sql_type)) = builtin_type(&base) {
            (semantic, sql_type.to_string())
        } else {
            return Err(ConfigError::UnsupportedType {
                table: table.name.clone(),
                column: column.name.clone(),
                type_name: base,
            });
        };

        let is_pk = pk.contains(&column.name);
        let autoincrement = pk.len() == 1
            && is_pk
            && matches!(semantic, SemanticType::Integer | SemanticType::BigInteger);
        let has_default = column.default.is_some() || is_serial(&base) || autoincrement;
        let nullable = column.nullable && !is_pk;
        let max_length = if is_string_bounded(&base) { params.first().copied() } else { None };
        let scale = match (semantic, params.as_slice()) {
            (SemanticType::Decimal, [_, scale, ..]) => Some(*scale),
            (SemanticType::Decimal, [_]) => Some(0),
            _ => None,
        };

        let mut field = FieldDescriptor {
            name: column.name.clone(),
            semantic,
            nullable,
            has_default,
            default_value: None,
            max_length,
            choices: choices.clone(),
            scale,
            sql_type,
            validators: Vec::new(),
            relation: None,
        };
        if let Some(ColumnDefaultConfig::Literal(lit)) = &column.default {
            field.default_value = parse_text(&field, lit).ok();
        }
        if !self.fk_columns.contains(column.id.as_str()) && !nullable && !has_default {
            field.validators.push(Validator::Required);
        }
        if let Some(max) = max_length {
            field.validators.push(Validator::Length { max });
        }
        if let Some(choices) = choices {
            field.validators.push(Validator::OneOf(choices));
        }
        Ok(field)
    }

    fn column(&self, id: &str) -> Result<&'a ColumnConfig, ConfigError> {
        self.columns_by_id.get(id).copied().ok_or_else(|| ConfigError::MissingReference {
            kind: "column",
            id: id.to_string(),
        })
    }

    fn table(&self, id: &str) -> Result<&'a TableConfig, ConfigError> {
        self.tables_by_id.get(id).copied().ok_or_else(|| ConfigError::MissingReference {
            kind: "table",
            id: id.to_string(),
        })
    }

    fn cast_type(&self, table: &TableConfig, column: &ColumnConfig) -> Result<String, ConfigError> {
        Ok(self.scalar_field(table, column)?.sql_type)
    }

    /// Exactly two columns, both foreign keys, together forming the primary key.
    fn junction_links(&self, table: &TableConfig) -> Option<(&'a RelationshipConfig, &'a RelationshipConfig)> {
        let columns = self.columns_of(table);
        let pk: HashSet<String> = table.primary_key.columns().into_iter().collect();
        if columns.len() != 2 || pk.len() != 2 || !columns.iter().all(|c| pk.contains(&c.name)) {
            return None;
        }
        let links: Vec<&RelationshipConfig> = self
            .config
            .relationships
            .iter()
            .filter(|r| r.from_table_id == table.id)
            .collect();
        match links.as_slice() {
            [a, b] if a.from_column_id != b.from_column_id => Some((*a, *b)),
            _ => None,
        }
    }
}

fn parse_order_by(items: &[String]) -> Result<Vec<(String, Direction)>, ConfigError> {
    items
        .iter()
        .map(|item| match item.split_once(':') {
            Some((field, dir)) => Direction::parse(dir.trim())
                .map(|d| (field.trim().to_string(), d))
                .ok_or_else(|| ConfigError::Validation(format!("invalid order_by direction: {}", item))),
            None => Ok((item.trim().to_string(), Direction::Asc)),
        })
        .collect()
}

fn parse_lazy(lazy: Option<&str>) -> Result<LoadMode, ConfigError> {
    match lazy {
        None | Some("select") => Ok(LoadMode::Select),
        Some("dynamic") => Ok(LoadMode::Dynamic),
        Some(other) => Err(ConfigError::Validation(format!("invalid lazy mode: {}", other))),
    }
}

fn relation_field(relation: RelationDescriptor) -> FieldDescriptor {
    FieldDescriptor {
        name: relation.name.clone(),
        semantic: SemanticType::Related,
        nullable: relation.nullable,
        has_default: false,
        default_value: None,
        max_length: None,
        choices: None,
        scale: None,
        sql_type: String::new(),
        validators: Vec::new(),
        relation: Some(relation),
    }
}

/// Derives one descriptor per mapped table. Junction tables become secondary joins
/// instead of entities.
pub fn derive(config: &FullConfig, options: &DeriveOptions) -> Result<Vec<EntityDescriptor>, ConfigError> {
    let model = Model::new(config, options);
    let junctions: HashMap<&str, (&RelationshipConfig, &RelationshipConfig)> = config
        .tables
        .iter()
        .filter_map(|t| model.junction_links(t).map(|links| (t.id.as_str(), links)))
        .collect();

    let mut entities: Vec<EntityDescriptor> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for table in &config.tables {
        if junctions.contains_key(table.id.as_str()) {
            continue;
        }
        let fields = model
            .columns_of(table)
            .into_iter()
            .map(|c| model.scalar_field(table, c))
            .collect::<Result<Vec<_>, _>>()?;
        index.insert(table.id.as_str(), entities.len());
        entities.push(EntityDescriptor {
            name: table.name.clone(),
            schema_name: model.schema_name(table),
            table_name: table.name.clone(),
            fields,
            primary_key: table.primary_key.columns(),
            unique: table.unique.clone(),
        });
    }

    let mut relations: Vec<(usize, RelationDescriptor)> = Vec::new();
    for r in &config.relationships {
        if junctions.contains_key(r.from_table_id.as_str()) {
            continue;
        }
        let from = model.table(&r.from_table_id)?;
        let to = model.table(&r.to_table_id)?;
        let from_col = model.column(&r.from_column_id)?;
        let to_col = model.column(&r.to_column_id)?;
        let (Some(&from_idx), Some(&to_idx)) = (index.get(from.id.as_str()), index.get(to.id.as_str())) else {
            continue;
        };
        let lazy = parse_lazy(r.lazy.as_deref())?;
        relations.push((
            from_idx,
            RelationDescriptor {
                name: r.name.clone().unwrap_or_else(|| to.name.clone()),
                target: to.name.clone(),
                target_table: to.name.clone(),
                cardinality: Cardinality::One,
                nullable: from_col.nullable,
                lazy,
                order_by: Vec::new(),
                join: Join::Direct {
                    local: from_col.name.clone(),
                    remote: to_col.name.clone(),
                },
            },
        ));
        relations.push((
            to_idx,
            RelationDescriptor {
                name: r.backref.clone().unwrap_or_else(|| format!("{}_collection", from.name)),
                target: from.name.clone(),
                target_table: from.name.clone(),
                cardinality: Cardinality::Many,
                nullable: true,
                lazy,
                order_by: parse_order_by(&r.order_by)?,
                join: Join::Direct {
                    local: to_col.name.clone(),
                    remote: from_col.name.clone(),
                },
            },
        ));
    }

    for table in &config.tables {
        let Some((a, b)) = junctions.get(table.id.as_str()) else { continue };
        let schema_name = model.schema_name(table);
        for (this, other) in [(a, b), (b, a)] {
            let owner = model.table(&this.to_table_id)?;
            let target = model.table(&other.to_table_id)?;
            let (Some(&owner_idx), Some(_)) = (index.get(owner.id.as_str()), index.get(target.id.as_str())) else {
                continue;
            };
            let owner_col = model.column(&this.to_column_id)?;
            let target_col = model.column(&other.to_column_id)?;
            relations.push((
                owner_idx,
                RelationDescriptor {
                    name: this.backref.clone().unwrap_or_else(|| format!("{}_collection", target.name)),
                    target: target.name.clone(),
                    target_table: target.name.clone(),
                    cardinality: Cardinality::Many,
                    nullable: true,
                    lazy: parse_lazy(this.lazy.as_deref())?,
                    order_by: parse_order_by(&this.order_by)?,
                    join: Join::Secondary(Secondary {
                        schema_name: schema_name.clone(),
                        table: table.name.clone(),
                        local: owner_col.name.clone(),
                        secondary_local: model.column(&this.from_column_id)?.name.clone(),
                        secondary_remote: model.column(&other.from_column_id)?.name.clone(),
                        remote: target_col.name.clone(),
                        local_type: model.cast_type(owner, owner_col)?,
                        remote_type: model.cast_type(target, target_col)?,
                    }),
                },
            ));
        }
    }

    for (idx, relation) in relations {
        let entity = &mut entities[idx];
        if entity.field(&relation.name).is_some() {
            return Err(ConfigError::Validation(format!(
                "relation {}.{} collides with an existing field",
                entity.name, relation.name
            )));
        }
        entity.fields.push(relation_field(relation));
    }
    Ok(entities)
}
