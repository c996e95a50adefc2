use thiserror::Error;

/// Errors surfaced by the database manager.
///
/// Kinds mirror the caller-facing taxonomy: configuration mistakes
/// (`InvalidConnectionString`, `SchemaError`), caller mistakes (`BadRequest`,
/// `ValidationError`, `InvalidId`), store outcomes (`NotFound`), and
/// infrastructure failures (`ConnectionError`, `Timeout`, `Internal`).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Connection failed: {0}")]
    ConnectionError(String),

    #[error("No live connection for tenant: {0}")]
    NotConnected(String),

    #[error("Unknown model: {0}")]
    ModelNotFound(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Validation failed for fields: {}", fields.join(", "))]
    ValidationError { fields: Vec<String> },

    #[error("Invalid document id: {0}")]
    InvalidId(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// HTTP status code equivalent.
    ///
    /// The manager exposes no transport of its own; this is what the audit
    /// event records and what an embedding request handler would map onto
    /// its own status representation.
    pub fn status_code(&self) -> u16 {
        match self {
            DbError::InvalidConnectionString(_) => 400,
            DbError::SchemaError(_) => 400,
            DbError::ValidationError { .. } => 400,
            DbError::InvalidId(_) => 400,
            DbError::BadRequest(_) => 400,
            DbError::ModelNotFound(_) => 404,
            DbError::NotFound(_) => 404,
            DbError::NotConnected(_) => 503,
            DbError::ConnectionError(_) => 503,
            DbError::Timeout(_) => 504,
            DbError::Internal(_) => 500,
        }
    }

    /// Stable code for client handling and audit records.
    pub fn error_code(&self) -> &'static str {
        match self {
            DbError::InvalidConnectionString(_) => "INVALID_CONNECTION_STRING",
            DbError::ConnectionError(_) => "CONNECTION_ERROR",
            DbError::NotConnected(_) => "NOT_CONNECTED",
            DbError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            DbError::SchemaError(_) => "SCHEMA_ERROR",
            DbError::ValidationError { .. } => "VALIDATION_ERROR",
            DbError::InvalidId(_) => "INVALID_ID",
            DbError::BadRequest(_) => "BAD_REQUEST",
            DbError::NotFound(_) => "NOT_FOUND",
            DbError::Timeout(_) => "TIMEOUT",
            DbError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn validation(fields: Vec<String>) -> Self {
        DbError::ValidationError { fields }
    }
}

impl From<mongodb::error::Error> for DbError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::ServerSelection { message, .. } => {
                DbError::ConnectionError(message.clone())
            }
            ErrorKind::Io(io_err) => DbError::ConnectionError(io_err.to_string()),
            _ => {
                // Log the real error but keep the caller-facing message generic
                tracing::error!("MongoDB driver error: {}", err);
                DbError::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(DbError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(DbError::ModelNotFound("Post".into()).status_code(), 404);
        assert_eq!(DbError::NotConnected("t1".into()).status_code(), 503);
        assert_eq!(DbError::Timeout("dial".into()).status_code(), 504);
    }

    #[test]
    fn validation_error_lists_fields() {
        let err = DbError::validation(vec!["title".into(), "views".into()]);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("title, views"));
    }
}
