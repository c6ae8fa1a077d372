//! Response bodies: list envelope, single documents, empty 204.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{Map, Value};

#[derive(Debug, PartialEq)]
pub enum Reply {
    Json(StatusCode, Value),
    NoContent,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Json(StatusCode::OK, body)
    }

    pub fn created(body: Value) -> Self {
        Reply::Json(StatusCode::CREATED, body)
    }

    /// `{"total": n, "<items_key>": [...]}`.
    pub fn list(total: u64, items_key: &str, items: Vec<Value>) -> Self {
        let mut body = Map::new();
        body.insert("total".into(), Value::from(total));
        body.insert(items_key.to_string(), Value::Array(items));
        Reply::ok(Value::Object(body))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Reply::Json(status, _) => *status,
            Reply::NoContent => StatusCode::NO_CONTENT,
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Json(status, body) => (status, Json(body)).into_response(),
            Reply::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}
