use thiserror::Error;

#[derive(Debug, Error)]
pub enum MathiaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session missing or expired")]
    Unauthenticated,

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Validation failed on '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Unsupported action: {action}")]
    Unsupported { action: String },

    #[error("Upstream failure ({provider}): {reason}")]
    UpstreamFailure { provider: String, reason: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Keystore failure: {0}")]
    Keystore(String),

    #[error("Decrypt failure for room {room_id}")]
    Decrypt { room_id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MathiaError {
    /// Short error code string sent to clients in WS error frames.
    pub fn code(&self) -> &'static str {
        match self {
            MathiaError::Config(_) => "CONFIG_ERROR",
            MathiaError::Unauthenticated => "UNAUTHENTICATED",
            MathiaError::Forbidden { .. } => "FORBIDDEN",
            MathiaError::Validation { .. } => "VALIDATION",
            MathiaError::RateLimited { .. } => "RATE_LIMITED",
            MathiaError::Unsupported { .. } => "UNSUPPORTED",
            MathiaError::UpstreamFailure { .. } => "UPSTREAM_FAILURE",
            MathiaError::Conflict(_) => "CONFLICT",
            MathiaError::Keystore(_) => "KEYSTORE_FAILURE",
            MathiaError::Decrypt { .. } => "DECRYPT_FAILURE",
            MathiaError::Database(_) => "DATABASE_ERROR",
            MathiaError::Serialization(_) => "SERIALIZATION_ERROR",
            MathiaError::Io(_) => "IO_ERROR",
            MathiaError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            MathiaError::Timeout { .. } => "TIMEOUT",
            MathiaError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// WebSocket close code for errors that terminate the connection.
    /// Returns `None` for errors that are reported in-band instead.
    pub fn ws_close_code(&self) -> Option<u16> {
        match self {
            MathiaError::Unauthenticated => Some(4001),
            MathiaError::Forbidden { .. } => Some(4003),
            MathiaError::RateLimited { .. } => Some(4008),
            MathiaError::Internal(_) | MathiaError::Database(_) => Some(1011),
            _ => None,
        }
    }

    /// HTTP status for the boundary API.
    pub fn http_status(&self) -> u16 {
        match self {
            MathiaError::Unauthenticated => 401,
            MathiaError::Forbidden { .. } => 403,
            MathiaError::Validation { .. } | MathiaError::PayloadTooLarge { .. } => 400,
            MathiaError::RateLimited { .. } => 429,
            MathiaError::Unsupported { .. } => 404,
            MathiaError::Conflict(_) => 409,
            MathiaError::UpstreamFailure { .. } | MathiaError::Timeout { .. } => 502,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, MathiaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_match_contract() {
        assert_eq!(MathiaError::Unauthenticated.ws_close_code(), Some(4001));
        assert_eq!(
            MathiaError::Forbidden {
                reason: "not a member".into()
            }
            .ws_close_code(),
            Some(4003)
        );
        assert_eq!(
            MathiaError::RateLimited {
                retry_after_secs: 10
            }
            .ws_close_code(),
            Some(4008)
        );
        assert_eq!(
            MathiaError::Internal("broken".into()).ws_close_code(),
            Some(1011)
        );
        // validation errors stay in-band
        assert_eq!(
            MathiaError::Validation {
                field: "pax".into(),
                reason: "must be >= 1".into()
            }
            .ws_close_code(),
            None
        );
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(MathiaError::Unauthenticated.http_status(), 401);
        assert_eq!(MathiaError::Conflict("dup".into()).http_status(), 409);
        assert_eq!(
            MathiaError::UpstreamFailure {
                provider: "mailer".into(),
                reason: "timeout".into()
            }
            .http_status(),
            502
        );
    }
}
