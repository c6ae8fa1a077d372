//! Route assembly: resource routes per exposed endpoint plus common routes.

pub mod api;
pub mod common;

pub use api::{ApiBuilder, ApiManager};
pub use common::common_routes;
