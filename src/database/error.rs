use std::fmt;

#[derive(Debug, Clone)]
pub enum DatabaseErrorKind {
    NotFound { entity: String, id: String },
    InsufficientBalance { user_id: String, required: String },
    ConnectionError { message: String },
    QueryError { message: String },
    /// A status write that would move a payment backwards or sideways.
    InvalidTransition { id: String, from: String, to: String },
    Unknown { message: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
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

    pub fn invalid_transition(id: impl ToString, from: impl ToString, to: impl ToString) -> Self {
        Self::new(DatabaseErrorKind::InvalidTransition {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn message(&self) -> String {
        match &self.kind {
            DatabaseErrorKind::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
            DatabaseErrorKind::InsufficientBalance { user_id, required } => {
                format!("insufficient balance for user {} (required {})", user_id, required)
            }
            DatabaseErrorKind::ConnectionError { message } => {
                format!("database connection error: {}", message)
            }
            DatabaseErrorKind::QueryError { message } => format!("database query error: {}", message),
            DatabaseErrorKind::InvalidTransition { id, from, to } => {
                format!("payment {} cannot move from {} to {}", id, from, to)
            }
            DatabaseErrorKind::Unknown { message } => format!("database error: {}", message),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::ConnectionError { .. })
    }

    #[cfg(feature = "database")]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::ConnectionError {
                    message: err.to_string(),
                }
            }
            sqlx::Error::Database(db_err) if db_err.message().contains("insufficient balance") => {
                DatabaseErrorKind::InsufficientBalance {
                    user_id: "unknown".to_string(),
                    required: db_err.message().to_string(),
                }
            }
            _ => DatabaseErrorKind::QueryError {
                message: err.to_string(),
            },
        };
        Self::new(kind)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};

        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                AppErrorKind::Domain(DomainError::NotFound {
                    entity: entity.clone(),
                    id: id.clone(),
                })
            }
            DatabaseErrorKind::InsufficientBalance { .. } => {
                AppErrorKind::Domain(DomainError::LedgerRejected {
                    reason: err.message(),
                })
            }
            DatabaseErrorKind::InvalidTransition { id, from, to } => {
                AppErrorKind::Domain(DomainError::InvalidState {
                    payment_id: id.clone(),
                    status: from.clone(),
                    operation: format!("transition to {}", to),
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.message(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

impl From<DatabaseError> for crate::payments::error::PaymentError {
    fn from(err: DatabaseError) -> Self {
        crate::payments::error::PaymentError::LedgerError {
            message: err.message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity() {
        let err = DatabaseError::not_found("Payment", "p1");
        assert_eq!(err.to_string(), "Payment 'p1' not found");
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_transition_is_a_domain_conflict() {
        let err = DatabaseError::invalid_transition("p1", "completed", "pending");
        assert_eq!(err.to_string(), "payment p1 cannot move from completed to pending");
        assert!(!err.is_retryable());

        let app: crate::error::AppError = err.into();
        assert_eq!(app.status_code(), 409);
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err = DatabaseError::new(DatabaseErrorKind::ConnectionError {
            message: "refused".to_string(),
        });
        assert!(err.is_retryable());
    }
}
