//! Request pieces a resource handler needs: method, query pairs, body, extensions.

use crate::error::ApiError;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header::CONTENT_TYPE, Extensions, Method},
};
use serde_json::{json, Map, Value};

const JSON_TYPES: [&str; 1] = ["application/json"];
const FORM_TYPES: [&str; 2] = ["application/x-www-form-urlencoded", "text/html"];

pub struct ResourceRequest {
    pub method: Method,
    /// Decoded query pairs in request order; repeated keys are kept.
    pub params: Vec<(String, String)>,
    /// Media type without parameters, lowercased.
    pub content_type: Option<String>,
    pub body: Bytes,
    pub extensions: Extensions,
}

impl ResourceRequest {
    /// Body as a document: JSON (object or array) when the content type is JSON or
    /// absent, a flat string map for form bodies, 415 otherwise.
    pub fn data(&self) -> Result<Value, ApiError> {
        match self.content_type.as_deref() {
            None => self.json(),
            Some(t) if JSON_TYPES.contains(&t) => self.json(),
            Some(t) if FORM_TYPES.contains(&t) => Ok(self.form()),
            Some(t) => Err(ApiError::RequestHeadersContentTypeNotSupport(json!({ "types": t }))),
        }
    }

    /// Like `data`, but an empty body is `None`.
    pub fn data_opt(&self) -> Result<Option<Value>, ApiError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        self.data().map(Some)
    }

    fn json(&self) -> Result<Value, ApiError> {
        match serde_json::from_slice::<Value>(&self.body) {
            Ok(v @ (Value::Object(_) | Value::Array(_))) => Ok(v),
            _ => Err(ApiError::illegal("request.json format error.")),
        }
    }

    fn form(&self) -> Value {
        let mut out = Map::new();
        for (k, v) in url::form_urlencoded::parse(&self.body) {
            out.entry(k.into_owned()).or_insert(Value::String(v.into_owned()));
        }
        Value::Object(out)
    }
}

#[async_trait]
impl<S> FromRequest<S> for ResourceRequest
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let params = parts
            .uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase());
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ApiError::illegal(format!("request body: {}", e)))?;
        Ok(ResourceRequest {
            method: parts.method,
            params,
            content_type,
            body,
            extensions: parts.extensions,
        })
    }
}
