//! `Accept` negotiation: JSON bodies are the only representation served.

use crate::error::ApiError;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::ACCEPT, request::Parts},
};
use serde_json::json;

const ACCEPTABLE: [&str; 5] = [
    "application/json",
    "application/*",
    "*/*",
    "text/html",
    "application/x-www-form-urlencoded",
];

/// Rejects requests whose `Accept` header names none of the served types.
#[derive(Clone, Copy, Debug)]
pub struct AcceptJson;

fn acceptable(header: &str) -> bool {
    header
        .split(',')
        .filter_map(|item| item.split(';').next())
        .map(|item| item.trim().to_ascii_lowercase())
        .any(|item| ACCEPTABLE.contains(&item.as_str()))
}

#[async_trait]
impl<S> FromRequestParts<S> for AcceptJson
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get(ACCEPT).map(|v| v.to_str().unwrap_or("")) {
            Some(value) if !value.trim().is_empty() && !acceptable(value) => {
                Err(ApiError::RequestHeadersAcceptNotSupport(json!({ "ACCEPT": value })))
            }
            _ => Ok(AcceptJson),
        }
    }
}
