//! Request query plans: parsing, validation and execution.

mod compile;
mod condition;
mod plan;

pub use compile::{apply, conditions, match_condition, orders, page_size};
pub use condition::*;
pub use plan::*;
