//! CrudService: resource operations over the request session.

mod crud;
pub mod relations;

pub use crud::CrudService;
