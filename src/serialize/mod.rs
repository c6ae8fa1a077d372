//! Row to document conversion in both directions.

mod dump;
mod load;
mod projection;
mod value;

pub use dump::{dump, dump_all};
pub use load::{load, load_many, resolve, LoadOptions, Loaded, ParentLink};
pub use projection::Projection;
pub use value::*;

use std::future::Future;
use std::pin::Pin;

/// Boxed future for the recursive dump and load paths.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
