//! Typed errors and HTTP mapping.

use crate::store::{ConstraintKind, DbError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} id '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table_id} column {column}")]
    InvalidPrimaryKey { table_id: String, column: String },
    #[error("duplicate endpoint: {0}")]
    DuplicateEndpoint(String),
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    #[error("unsupported column type '{type_name}' on {table}.{column}")]
    UnsupportedType {
        table: String,
        column: String,
        type_name: String,
    },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Request-time failure. Every variant renders as `{"type", "msg", "detail"}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Illegal request data.")]
    IllegalRequestData(Value),
    #[error("Assertion failed.")]
    RestAssertionError(Value),
    #[error("Resources already exists.")]
    ResourcesAlreadyExists(Value),
    #[error("Column can not be null.")]
    ResourcesConstraintNotNullable(Value),
    #[error("Column doesn't have a default value.")]
    ResourcesConstraintNotDefaultValue(Value),
    #[error("Foreign key constraint fails.")]
    ForeignKeyConstraintFails(Value),
    #[error("Permission denied.")]
    PermissionDenied(Value),
    #[error("Access denied.")]
    AccessDenied(Value),
    #[error("Resource not found.")]
    ResourceNotFound(Value),
    #[error("Resource relation does not exist.")]
    ResourceRelationNotExists(Value),
    #[error("Accept header not supported.")]
    RequestHeadersAcceptNotSupport(Value),
    #[error("Content-Type header not supported.")]
    RequestHeadersContentTypeNotSupport(Value),
    #[error("Database execution error.")]
    DatabaseExecutionError(Value),
    #[error("Database connection error.")]
    DatabaseConnectionError(Value),
    #[error("Statement execution error.")]
    StatementError(Value),
    #[error("Undefined exception: {0}")]
    Unknown(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub msg: String,
    pub detail: Value,
}

impl ApiError {
    /// `IllegalRequestData` with a free-text prompt.
    pub fn illegal(prompt: impl Into<String>) -> Self {
        ApiError::IllegalRequestData(json!({ "prompt": prompt.into() }))
    }

    /// `IllegalRequestData` naming an offending query argument and its raw value.
    pub fn invalid_argument(key: &str, value: &str) -> Self {
        ApiError::illegal(format!("Invalid argument key:{} value:{}.", key, value))
    }

    pub fn assertion(prompt: impl Into<String>) -> Self {
        ApiError::RestAssertionError(json!({ "prompt": prompt.into() }))
    }

    pub fn not_found(detail: Value) -> Self {
        ApiError::ResourceNotFound(detail)
    }

    /// Storage and configuration errors resolved into a taxonomy variant.
    pub fn classify(self) -> Self {
        match self {
            ApiError::Db(e) => classify_db(e),
            ApiError::Config(e) => ApiError::Unknown(e.to_string()),
            other => other,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::IllegalRequestData(_) => "IllegalRequestData",
            ApiError::RestAssertionError(_) => "RestAssertionError",
            ApiError::ResourcesAlreadyExists(_) => "ResourcesAlreadyExists",
            ApiError::ResourcesConstraintNotNullable(_) => "ResourcesConstraintNotNullable",
            ApiError::ResourcesConstraintNotDefaultValue(_) => "ResourcesConstraintNotDefaultValue",
            ApiError::ForeignKeyConstraintFails(_) => "ForeignKeyConstraintFails",
            ApiError::PermissionDenied(_) => "PermissionDenied",
            ApiError::AccessDenied(_) => "AccessDenied",
            ApiError::ResourceNotFound(_) => "ResourceNotFound",
            ApiError::ResourceRelationNotExists(_) => "ResourceRelationNotExists",
            ApiError::RequestHeadersAcceptNotSupport(_) => "RequestHeadersAcceptNotSupport",
            ApiError::RequestHeadersContentTypeNotSupport(_) => "RequestHeadersContentTypeNotSupport",
            ApiError::DatabaseExecutionError(_) => "DatabaseExecutionError",
            ApiError::DatabaseConnectionError(_) => "DatabaseConnectionError",
            ApiError::StatementError(_) => "StatementError",
            ApiError::Unknown(_) | ApiError::Db(_) | ApiError::Config(_) => "Unknown",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::IllegalRequestData(_)
            | ApiError::RestAssertionError(_)
            | ApiError::ResourcesAlreadyExists(_)
            | ApiError::ResourcesConstraintNotNullable(_)
            | ApiError::ResourcesConstraintNotDefaultValue(_)
            | ApiError::ForeignKeyConstraintFails(_)
            | ApiError::DatabaseExecutionError(_) => StatusCode::BAD_REQUEST,
            ApiError::PermissionDenied(_) | ApiError::AccessDenied(_) => StatusCode::FORBIDDEN,
            ApiError::ResourceNotFound(_) | ApiError::ResourceRelationNotExists(_) => StatusCode::NOT_FOUND,
            ApiError::RequestHeadersAcceptNotSupport(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::RequestHeadersContentTypeNotSupport(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::DatabaseConnectionError(_)
            | ApiError::StatementError(_)
            | ApiError::Unknown(_)
            | ApiError::Db(_)
            | ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> Value {
        match self {
            ApiError::IllegalRequestData(d)
            | ApiError::RestAssertionError(d)
            | ApiError::ResourcesAlreadyExists(d)
            | ApiError::ResourcesConstraintNotNullable(d)
            | ApiError::ResourcesConstraintNotDefaultValue(d)
            | ApiError::ForeignKeyConstraintFails(d)
            | ApiError::PermissionDenied(d)
            | ApiError::AccessDenied(d)
            | ApiError::ResourceNotFound(d)
            | ApiError::ResourceRelationNotExists(d)
            | ApiError::RequestHeadersAcceptNotSupport(d)
            | ApiError::RequestHeadersContentTypeNotSupport(d)
            | ApiError::DatabaseExecutionError(d)
            | ApiError::DatabaseConnectionError(d)
            | ApiError::StatementError(d) => d.clone(),
            ApiError::Unknown(_) | ApiError::Db(_) | ApiError::Config(_) => json!({}),
        }
    }

    /// Human text for the envelope. Internal failures never leak their message.
    fn message(&self) -> String {
        match self {
            ApiError::Unknown(_) | ApiError::Db(_) | ApiError::Config(_) => "Undefined exception.".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.classify();
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(kind = err.kind(), error = ?err, "request failed");
        } else {
            tracing::info!(kind = err.kind(), detail = %err.detail(), "request rejected");
        }
        let body = ErrorBody {
            kind: err.kind(),
            msg: err.message(),
            detail: err.detail(),
        };
        (status, Json(body)).into_response()
    }
}

/// Single translation point for storage failures.
pub fn classify_db(err: DbError) -> ApiError {
    match err {
        DbError::Sqlx(e) => classify_sqlx(e),
        DbError::Constraint {
            kind,
            table,
            column,
            value,
        } => {
            let detail = json!({ "table": table, "column": column, "value": value });
            match kind {
                ConstraintKind::Unique => ApiError::ResourcesAlreadyExists(detail),
                ConstraintKind::NotNull => ApiError::ResourcesConstraintNotNullable(detail),
                ConstraintKind::NoDefault => ApiError::ResourcesConstraintNotDefaultValue(detail),
                ConstraintKind::ForeignKey => ApiError::ForeignKeyConstraintFails(detail),
            }
        }
        DbError::Missing { table } => ApiError::not_found(json!({ "table": table })),
        DbError::Connection(message) => ApiError::DatabaseConnectionError(json!({ "message": message })),
        DbError::Execution(message) => ApiError::DatabaseExecutionError(json!({ "message": message })),
    }
}

fn classify_sqlx(err: sqlx::Error) -> ApiError {
    use sqlx::error::ErrorKind;
    match &err {
        sqlx::Error::Database(db) => {
            let column = db
                .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                .and_then(|pg| pg.column())
                .map(str::to_string);
            let detail = json!({
                "table": db.table(),
                "constraint": db.constraint(),
                "column": column,
                "message": db.message(),
            });
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            match db.kind() {
                ErrorKind::UniqueViolation => ApiError::ResourcesAlreadyExists(detail),
                ErrorKind::NotNullViolation => ApiError::ResourcesConstraintNotNullable(detail),
                ErrorKind::ForeignKeyViolation => ApiError::ForeignKeyConstraintFails(detail),
                _ if code.starts_with("08") => ApiError::DatabaseConnectionError(detail),
                _ if code.starts_with("22") || code.starts_with("23") => ApiError::DatabaseExecutionError(detail),
                _ => ApiError::StatementError(json!({ "code": code, "message": db.message() })),
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ApiError::DatabaseConnectionError(json!({ "message": err.to_string() })),
        _ => ApiError::StatementError(json!({ "message": err.to_string() })),
    }
}
