use thiserror::Error;

/// Persistence failure with a categorised kind
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("constraint violated: {message}")]
    ConstraintViolation { message: String },

    #[error("database connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("database configuration error: {message}")]
    Configuration { message: String },

    #[error("row mapping failed: {message}")]
    Decode { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    pub fn unique_violation(constraint: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::UniqueViolation {
            constraint: constraint.into(),
        })
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Decode {
            message: message.into(),
        })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    /// Connection-level failures may clear up; data errors will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionFailed { .. } | DatabaseErrorKind::Unknown { .. }
        )
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found("row", "unknown"),
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                match db_err.code().as_deref() {
                    // unique_violation
                    Some("23505") => Self::unique_violation(constraint),
                    // foreign_key_violation, check_violation, not_null_violation
                    Some("23503") | Some("23514") | Some("23502") => {
                        Self::new(DatabaseErrorKind::ConstraintViolation {
                            message: db_err.message().to_string(),
                        })
                    }
                    _ => Self::new(DatabaseErrorKind::Unknown {
                        message: db_err.message().to_string(),
                    }),
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::new(DatabaseErrorKind::ConnectionFailed {
                    message: err.to_string(),
                })
            }
            sqlx::Error::Configuration(e) => Self::new(DatabaseErrorKind::Configuration {
                message: e.to_string(),
            }),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::decode(err.to_string())
            }
            other => Self::new(DatabaseErrorKind::Unknown {
                message: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_is_not_retryable() {
        let err = DatabaseError::unique_violation("payments_invoice_id_key");
        assert!(err.is_unique_violation());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("payments_invoice_id_key"));
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = DatabaseError::not_found("Payment", "fine-1-abc");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Payment 'fine-1-abc' not found");
    }
}
