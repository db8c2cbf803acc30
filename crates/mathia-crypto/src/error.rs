use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Keystore failure: {0}")]
    KeystoreFailure(String),

    #[error("Decrypt failure")]
    DecryptFailure,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Encrypt failure: {0}")]
    EncryptFailure(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

impl From<CryptoError> for mathia_core::MathiaError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::DecryptFailure => mathia_core::MathiaError::Decrypt {
                room_id: String::new(),
            },
            other => mathia_core::MathiaError::Keystore(other.to_string()),
        }
    }
}
