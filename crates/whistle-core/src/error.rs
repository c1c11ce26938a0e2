use thiserror::Error;
use whistle_db::DbError;
use whistle_util::validation::ValidationError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(DbError),
    #[error("not found")]
    NotFound,
}

impl CoreError {
    /// Storage faults and timeouts are transient; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Text safe to hand back to a client. Storage details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Storage(_) => "message store unavailable, try again".to_string(),
            Self::NotFound => "not found".to_string(),
        }
    }
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::MessageIdConflict(id) => {
                Self::Validation(format!("messageId '{id}' is already in use"))
            }
            other => Self::Storage(other),
        }
    }
}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}
