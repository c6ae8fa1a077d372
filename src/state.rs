//! Shared application state for resource routes.

use crate::config::ApiConfig;
use crate::schema::{Registry, ResourceSchema};
use crate::store::Backend;
use std::collections::HashMap;
use std::sync::Arc;

/// Exposed endpoint name to the schema serving it. Built once by `ApiBuilder::build`.
#[derive(Debug, Default)]
pub struct RouteTable {
    pub endpoints: HashMap<String, Arc<ResourceSchema>>,
}

impl RouteTable {
    pub fn get(&self, endpoint: &str) -> Option<&Arc<ResourceSchema>> {
        self.endpoints.get(endpoint)
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub backend: Arc<dyn Backend>,
    pub registry: Arc<Registry>,
    pub config: Arc<ApiConfig>,
    pub routes: Arc<RouteTable>,
}
