//! autorest: a REST API derived from a relational model.
//!
//! Entities are described by `FullConfig` (JSON files, one document, or a reflected
//! PostgreSQL schema), exposed through `ApiBuilder`, and served by the axum router
//! `ApiManager::router` returns. Each request runs in one storage session.

pub mod config;
pub mod context;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod query;
pub mod response;
pub mod routes;
pub mod schema;
pub mod serialize;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_dir, load_from_str, validate, ApiConfig, FullConfig};
pub use context::RequestContext;
pub use error::{ApiError, ConfigError};
pub use response::Reply;
pub use routes::{common_routes, ApiBuilder, ApiManager};
pub use schema::{DeriveOptions, EndpointOptions, EntityDescriptor, Registry, ResourceSchema, Verb};
pub use service::CrudService;
pub use state::ApiState;
pub use store::{reflect_schema, Backend, MemoryBackend, PgBackend, Session};
