use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No handler registered for job '{name}'")]
    NoHandler { name: String },
}

pub type Result<T> = std::result::Result<T, JobError>;
