//! Process-wide registry of entity descriptors and the schemas declared over them.
//!
//! Built in two phases: entity shells are registered first, relation targets are
//! resolved when the registry is built. Read-only afterwards.

use crate::error::ConfigError;
use crate::schema::{EndpointOptions, EntityDescriptor, FieldDescriptor};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaOrigin {
    Declared,
    Auto,
}

/// A serialization schema over one entity.
#[derive(Debug)]
pub struct ResourceSchema {
    pub name: String,
    pub entity: Arc<EntityDescriptor>,
    pub options: EndpointOptions,
    pub origin: SchemaOrigin,
}

impl ResourceSchema {
    /// URL segment: the endpoint override, else the table name.
    pub fn endpoint(&self) -> &str {
        self.options.endpoint.as_deref().unwrap_or(&self.entity.table_name)
    }

    /// Fields after the schema-level allow and deny lists.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.entity.fields.iter().filter(|f| self.declares(&f.name))
    }

    pub fn declares(&self, field: &str) -> bool {
        let allowed = self
            .options
            .only
            .as_ref()
            .map_or(true, |only| only.iter().any(|f| f == field));
        allowed && !self.options.exclude.iter().any(|f| f == field)
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entities: HashMap<String, Arc<EntityDescriptor>>,
    by_table: HashMap<String, String>,
    schemas: HashMap<String, Vec<Arc<ResourceSchema>>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// By entity name, falling back to table name.
    pub fn resolve(&self, name: &str) -> Result<Arc<EntityDescriptor>, ConfigError> {
        self.entities
            .get(name)
            .or_else(|| self.by_table.get(name).and_then(|n| self.entities.get(n)))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEntity(name.to_string()))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    pub fn schemas_for(&self, entity: &str) -> &[Arc<ResourceSchema>] {
        self.schemas.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First declared schema, else the auto-derived one.
    pub fn primary_schema(&self, entity: &str) -> Result<Arc<ResourceSchema>, ConfigError> {
        let schemas = self.schemas_for(entity);
        schemas
            .iter()
            .find(|s| s.origin == SchemaOrigin::Declared)
            .or_else(|| schemas.first())
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEntity(entity.to_string()))
    }

    pub fn schema(&self, name: &str) -> Option<Arc<ResourceSchema>> {
        self.schemas.values().flatten().find(|s| s.name == name).cloned()
    }

    /// Union of match fields over every schema of `entity`, in registration order.
    pub fn match_fields(&self, entity: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for field in self.schemas_for(entity).iter().flat_map(|s| s.options.match_fields.iter()) {
            if !out.contains(field) {
                out.push(field.clone());
            }
        }
        out
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityDescriptor>,
    schemas: Vec<(String, String, EndpointOptions, SchemaOrigin)>,
}

impl RegistryBuilder {
    /// Registers an entity shell; a second registration under the same name is ignored.
    pub fn entity(&mut self, descriptor: EntityDescriptor) -> &mut Self {
        if !self.entities.iter().any(|e| e.name == descriptor.name) {
            self.entities.push(descriptor);
        }
        self
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.entities.iter().any(|e| e.name == name)
    }

    pub fn entity_names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name.clone()).collect()
    }

    /// Associates a schema with `entity` and returns its name. Re-registering a name is a
    /// no-op; an auto schema is only added to an entity with no schema at all.
    pub fn register(&mut self, entity: &str, options: EndpointOptions, origin: SchemaOrigin) -> String {
        let existing: Vec<&(String, String, EndpointOptions, SchemaOrigin)> =
            self.schemas.iter().filter(|(_, e, _, _)| e == entity).collect();
        if origin == SchemaOrigin::Auto {
            if let Some((name, ..)) = existing
                .iter()
                .find(|(_, _, _, o)| *o == SchemaOrigin::Declared)
                .or_else(|| existing.first())
            {
                return name.clone();
            }
        }
        let name = options.name.clone().unwrap_or_else(|| match origin {
            SchemaOrigin::Declared => format!("{}Schema", entity),
            SchemaOrigin::Auto => format!("Auto{}Schema", entity),
        });
        if !self.schemas.iter().any(|(n, ..)| *n == name) {
            self.schemas.push((name.clone(), entity.to_string(), options, origin));
        }
        name
    }

    pub fn build(mut self) -> Result<Registry, ConfigError> {
        let names: Vec<String> = self.entities.iter().map(|e| e.name.clone()).collect();
        for name in &names {
            self.register(name, EndpointOptions::new(), SchemaOrigin::Auto);
        }

        let mut registry = Registry::default();
        for entity in self.entities {
            if entity.primary_key.is_empty() || entity.primary_key.iter().any(|pk| entity.scalar(pk).is_none()) {
                return Err(ConfigError::InvalidPrimaryKey {
                    table_id: entity.table_name.clone(),
                    column: entity.primary_key.join(","),
                });
            }
            registry.by_table.insert(entity.table_name.clone(), entity.name.clone());
            registry.entities.insert(entity.name.clone(), Arc::new(entity));
        }
        for entity in registry.entities.values() {
            for relation in entity.relations() {
                if !registry.entities.contains_key(&relation.target) {
                    return Err(ConfigError::MissingReference {
                        kind: "relation target",
                        id: format!("{}.{} -> {}", entity.name, relation.name, relation.target),
                    });
                }
            }
        }

        for (name, entity_name, options, origin) in self.schemas {
            let entity = registry.resolve(&entity_name)?;
            check_options(&entity, &name, &options)?;
            registry.schemas.entry(entity.name.clone()).or_default().push(Arc::new(ResourceSchema {
                name,
                entity,
                options,
                origin,
            }));
        }
        Ok(registry)
    }
}

fn check_options(entity: &EntityDescriptor, schema: &str, options: &EndpointOptions) -> Result<(), ConfigError> {
    if let Some(key) = &options.key_field {
        if entity.scalar(key).is_none() {
            return Err(ConfigError::Validation(format!(
                "{}: key_field {} is not a column of {}",
                schema, key, entity.name
            )));
        }
    }
    for field in options.only.iter().flatten().chain(options.exclude.iter()) {
        if entity.field(field).is_none() {
            return Err(ConfigError::Validation(format!(
                "{}: {} is not a field of {}",
                schema, field, entity.name
            )));
        }
    }
    if let Some(only) = &options.only {
        if entity.primary_key.iter().any(|pk| !only.contains(pk)) {
            return Err(ConfigError::Validation(format!(
                "{}: only must keep the primary key of {}",
                schema, entity.name
            )));
        }
    }
    Ok(())
}
