//! API assembly: entity registration, endpoint exposure, resource router.

use crate::config::{validate, ApiConfig, FullConfig};
use crate::error::ConfigError;
use crate::handlers::{collection, item, relation};
use crate::routes::common::common_routes;
use crate::schema::{derive, DeriveOptions, EndpointOptions, EntityDescriptor, Registry, RegistryBuilder, SchemaOrigin, Verb};
use crate::state::{ApiState, RouteTable};
use crate::store::Backend;
use axum::{routing::any, Router};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Collects entities and endpoint options; `build` validates everything at once.
pub struct ApiBuilder {
    config: ApiConfig,
    backend: Arc<dyn Backend>,
    registry: RegistryBuilder,
    /// (entity, schema name) pairs served under their endpoint.
    exposed: Vec<(String, String)>,
}

impl ApiBuilder {
    pub fn new(backend: Arc<dyn Backend>, config: ApiConfig) -> Self {
        ApiBuilder {
            config,
            backend,
            registry: Registry::builder(),
            exposed: Vec::new(),
        }
    }

    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.registry.entity(descriptor);
        self
    }

    pub fn entities(mut self, descriptors: impl IntoIterator<Item = EntityDescriptor>) -> Self {
        for descriptor in descriptors {
            self.registry.entity(descriptor);
        }
        self
    }

    /// Registers a schema for nested reads and writes without routing it.
    pub fn declare(mut self, entity: &str, options: EndpointOptions) -> Self {
        self.registry.register(entity, options, SchemaOrigin::Declared);
        self
    }

    /// Registers a schema and serves it under its endpoint.
    pub fn add(mut self, entity: &str, options: EndpointOptions) -> Self {
        let name = self.registry.register(entity, options, SchemaOrigin::Declared);
        self.expose(entity, name);
        self
    }

    /// Serves every entity not exposed yet, through its existing schema or an auto one
    /// allowing `methods`.
    pub fn add_all(mut self, methods: impl IntoIterator<Item = Verb>) -> Self {
        let methods: Vec<Verb> = methods.into_iter().collect();
        for entity in self.registry.entity_names() {
            if self.exposed.iter().any(|(e, _)| *e == entity) {
                continue;
            }
            let options = EndpointOptions::new().methods(methods.iter().copied());
            let name = self.registry.register(&entity, options, SchemaOrigin::Auto);
            self.expose(&entity, name);
        }
        self
    }

    fn expose(&mut self, entity: &str, name: String) {
        if !self.exposed.iter().any(|(_, n)| *n == name) {
            self.exposed.push((entity.to_string(), name));
        }
    }

    /// Derives entities from `model` and exposes each `api_entities` entry.
    pub fn from_config(
        model: &FullConfig,
        backend: Arc<dyn Backend>,
        config: ApiConfig,
        options: &DeriveOptions,
    ) -> Result<Self, ConfigError> {
        validate(model)?;
        let mut builder = ApiBuilder::new(backend, config).entities(derive(model, options)?);
        for entry in &model.api_entities {
            let table = model
                .tables
                .iter()
                .find(|t| t.id == entry.entity_id)
                .ok_or_else(|| ConfigError::UnknownEntity(entry.entity_id.clone()))?;
            builder = builder.add(&table.name, EndpointOptions::from_config(entry)?);
        }
        Ok(builder)
    }

    pub fn build(self) -> Result<ApiManager, ConfigError> {
        let registry = Arc::new(self.registry.build()?);
        let mut routes = RouteTable::default();
        for (entity, name) in &self.exposed {
            let schema = registry
                .schema(name)
                .filter(|s| s.entity.name == *entity)
                .ok_or_else(|| ConfigError::UnknownEntity(entity.clone()))?;
            let endpoint = schema.endpoint().to_string();
            if routes.endpoints.insert(endpoint.clone(), schema).is_some() {
                return Err(ConfigError::DuplicateEndpoint(endpoint));
            }
        }
        tracing::info!(endpoints = routes.endpoints.len(), prefix = %self.config.prefix, "api built");
        Ok(ApiManager {
            state: ApiState {
                backend: self.backend,
                registry,
                config: Arc::new(self.config),
                routes: Arc::new(routes),
            },
        })
    }
}

/// Built API: owns the backend handle, registry and route table.
#[derive(Clone)]
pub struct ApiManager {
    state: ApiState,
}

impl ApiManager {
    pub fn state(&self) -> &ApiState {
        &self.state
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.state.registry
    }

    /// Exposed endpoint names, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.routes.endpoints.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resource routes under the configured prefix. Every method reaches the handler so
    /// unconfigured ones answer `AccessDenied` instead of 405.
    pub fn router(&self) -> Router {
        let resources = Router::new()
            .route("/:endpoint", any(collection))
            .route("/:endpoint/:key", any(item))
            .route("/:endpoint/:key/:relation", any(relation))
            .with_state(self.state.clone());
        let prefix = self.state.config.prefix.trim_end_matches('/');
        let router = if prefix.is_empty() {
            resources
        } else if prefix.starts_with('/') {
            Router::new().nest(prefix, resources)
        } else {
            Router::new().nest(&format!("/{}", prefix), resources)
        };
        router.layer(RequestBodyLimitLayer::new(self.state.config.body_limit))
    }

    /// `/health`, `/ready` and `/version`.
    pub fn common_routes(&self) -> Router {
        common_routes(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDescriptor, SemanticType};
    use crate::store::MemoryBackend;

    fn scalar(name: &str, has_default: bool) -> FieldDescriptor {
        FieldDescriptor {
            name: name.into(),
            semantic: SemanticType::Integer,
            nullable: false,
            has_default,
            default_value: None,
            max_length: None,
            choices: None,
            scale: None,
            sql_type: "integer".into(),
            validators: Vec::new(),
            relation: None,
        }
    }

    fn genre() -> EntityDescriptor {
        EntityDescriptor {
            name: "Genre".into(),
            schema_name: "public".into(),
            table_name: "Genre".into(),
            fields: vec![scalar("GenreId", true), scalar("Rank", false)],
            primary_key: vec!["GenreId".into()],
            unique: Vec::new(),
        }
    }

    fn builder() -> ApiBuilder {
        ApiBuilder::new(Arc::new(MemoryBackend::new()), ApiConfig::default()).entity(genre())
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let result = builder()
            .add("Genre", EndpointOptions::new().name("A"))
            .add("Genre", EndpointOptions::new().name("B"))
            .build();
        assert!(matches!(result, Err(ConfigError::DuplicateEndpoint(ref e)) if e == "Genre"));
    }

    #[test]
    fn test_add_all_and_unknown_entity() {
        let manager = builder().add_all(Verb::ALL).build().unwrap();
        assert_eq!(manager.endpoints(), vec!["Genre".to_string()]);

        let result = builder().add("Nope", EndpointOptions::new()).build();
        assert!(matches!(result, Err(ConfigError::UnknownEntity(ref e)) if e == "Nope"));
    }
}
