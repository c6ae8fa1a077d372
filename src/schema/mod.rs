//! Entity metadata and the schemas exposed over it.

mod derive;
mod options;
mod registry;
mod types;

pub use derive::{derive, DeriveOptions};
pub use options::*;
pub use registry::{Registry, RegistryBuilder, ResourceSchema, SchemaOrigin};
pub use types::*;
