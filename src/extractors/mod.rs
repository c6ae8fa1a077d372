//! Request extractors for resource handlers.

mod accept;
mod body;

pub use accept::AcceptJson;
pub use body::ResourceRequest;
