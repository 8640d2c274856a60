/// Domain-specific error types for arxiv-scout
///
/// Component errors (feed transport, Semantic Scholar client, model scoring) stay
/// inside their stage and are logged there. Only storage, configuration and
/// validation failures surface to the caller as ScoutError.

#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Paper not found: {id}")]
    NotFound {
        id: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for ScoutError {
    fn from(e: sqlx::Error) -> Self {
        ScoutError::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for ScoutError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        ScoutError::Storage(format!("Migration failed: {}", e))
    }
}

impl ScoutError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use arxiv_scout::errors::ScoutError;
    /// let err = ScoutError::validation("order_by", "unknown sort column");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        ScoutError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_helper_sets_field() {
        match ScoutError::validation("order_by", "bad") {
            ScoutError::Validation { message, field } => {
                assert_eq!(message, "bad");
                assert_eq!(field.as_deref(), Some("order_by"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_sqlx_error_maps_to_storage() {
        let err: ScoutError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ScoutError::Storage(_)));
    }
}
