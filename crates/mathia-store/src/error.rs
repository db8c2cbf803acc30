use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Password hash error: {0}")]
    PasswordHash(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for mathia_core::MathiaError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { what, id } => mathia_core::MathiaError::Unsupported {
                action: format!("{what} {id}"),
            },
            StoreError::Conflict(msg) => mathia_core::MathiaError::Conflict(msg),
            other => mathia_core::MathiaError::Database(other.to_string()),
        }
    }
}
