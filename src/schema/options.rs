//! Per-endpoint options: exposure, lookup, paging, projection and callbacks.

use crate::config::ApiEntityConfig;
use crate::error::{ApiError, ConfigError};
use crate::query::Condition;
use crate::schema::{EntityDescriptor, Row};
use axum::http::{Extensions, Method};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// HTTP verbs an endpoint can allow. `PATCH` is served as `PUT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub const ALL: [Verb; 4] = [Verb::Get, Verb::Post, Verb::Put, Verb::Delete];
    pub const READ_ONLY: [Verb; 1] = [Verb::Get];

    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Verb::Get),
            Method::POST => Some(Verb::Post),
            Method::PUT | Method::PATCH => Some(Verb::Put),
            Method::DELETE => Some(Verb::Delete),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Method::from_bytes(s.trim().to_uppercase().as_bytes())
            .ok()
            .and_then(|m| Verb::from_method(&m))
    }
}

/// Extra conditions ANDed into every list query; receives the request's extensions.
pub type FilterHook = Arc<dyn Fn(&Extensions, &EntityDescriptor) -> Vec<Condition> + Send + Sync>;
/// Runs before insert; may rewrite the document or reject it.
pub type CreateHook = Arc<dyn Fn(Row) -> Result<Row, ApiError> + Send + Sync>;
/// Runs before update with the current row and the changed columns.
pub type UpdateHook = Arc<dyn Fn(&Row, Row) -> Result<Row, ApiError> + Send + Sync>;
/// Runs before delete.
pub type DeleteHook = Arc<dyn Fn(&Row) -> Result<(), ApiError> + Send + Sync>;
/// Runs after a successful commit.
pub type CommitHook = Arc<dyn Fn(&Row) + Send + Sync>;

#[derive(Clone)]
pub struct EndpointOptions {
    pub name: Option<String>,
    pub methods: BTreeSet<Verb>,
    pub key_field: Option<String>,
    pub endpoint: Option<String>,
    pub match_fields: Vec<String>,
    pub only: Option<Vec<String>>,
    pub exclude: Vec<String>,
    pub results_per_page: Option<u32>,
    pub max_results_per_page: Option<u32>,
    pub filters: Option<FilterHook>,
    pub create: Option<CreateHook>,
    pub update: Option<UpdateHook>,
    pub delete: Option<DeleteHook>,
    pub created: Option<CommitHook>,
    pub updated: Option<CommitHook>,
    pub deleted: Option<CommitHook>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        EndpointOptions {
            name: None,
            methods: Verb::READ_ONLY.into_iter().collect(),
            key_field: None,
            endpoint: None,
            match_fields: Vec::new(),
            only: None,
            exclude: Vec::new(),
            results_per_page: None,
            max_results_per_page: None,
            filters: None,
            create: None,
            update: None,
            delete: None,
            created: None,
            updated: None,
            deleted: None,
        }
    }
}

impl fmt::Debug for EndpointOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointOptions")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("key_field", &self.key_field)
            .field("endpoint", &self.endpoint)
            .field("match_fields", &self.match_fields)
            .field("only", &self.only)
            .field("exclude", &self.exclude)
            .field("results_per_page", &self.results_per_page)
            .field("max_results_per_page", &self.max_results_per_page)
            .finish_non_exhaustive()
    }
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn methods(mut self, methods: impl IntoIterator<Item = Verb>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = Some(field.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn match_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.match_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn only<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn results_per_page(mut self, n: u32) -> Self {
        self.results_per_page = Some(n);
        self
    }

    pub fn max_results_per_page(mut self, n: u32) -> Self {
        self.max_results_per_page = Some(n);
        self
    }

    pub fn filters(mut self, f: impl Fn(&Extensions, &EntityDescriptor) -> Vec<Condition> + Send + Sync + 'static) -> Self {
        self.filters = Some(Arc::new(f));
        self
    }

    pub fn on_create(mut self, f: impl Fn(Row) -> Result<Row, ApiError> + Send + Sync + 'static) -> Self {
        self.create = Some(Arc::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&Row, Row) -> Result<Row, ApiError> + Send + Sync + 'static) -> Self {
        self.update = Some(Arc::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&Row) -> Result<(), ApiError> + Send + Sync + 'static) -> Self {
        self.delete = Some(Arc::new(f));
        self
    }

    pub fn on_created(mut self, f: impl Fn(&Row) + Send + Sync + 'static) -> Self {
        self.created = Some(Arc::new(f));
        self
    }

    pub fn on_updated(mut self, f: impl Fn(&Row) + Send + Sync + 'static) -> Self {
        self.updated = Some(Arc::new(f));
        self
    }

    pub fn on_deleted(mut self, f: impl Fn(&Row) + Send + Sync + 'static) -> Self {
        self.deleted = Some(Arc::new(f));
        self
    }

    pub fn allows(&self, verb: Verb) -> bool {
        self.methods.contains(&verb)
    }

    pub fn from_config(api: &ApiEntityConfig) -> Result<Self, ConfigError> {
        let mut options = EndpointOptions::new().match_fields(api.match_fields.iter().cloned());
        if !api.methods.is_empty() {
            let verbs = api
                .methods
                .iter()
                .map(|m| Verb::parse(m).ok_or_else(|| ConfigError::Validation(format!("unknown method: {}", m))))
                .collect::<Result<Vec<_>, _>>()?;
            options = options.methods(verbs);
        }
        options.endpoint = api.endpoint.clone();
        options.key_field = api.key_field.clone();
        options.only = api.only.clone();
        options.exclude = api.exclude.clone();
        options.results_per_page = api.results_per_page;
        options.max_results_per_page = api.max_results_per_page;
        Ok(options)
    }
}
