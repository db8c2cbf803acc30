pub mod aead;
pub mod error;
pub mod keystore;
pub mod webhook;

pub use aead::{decrypt, encrypt, RoomKey, NONCE_LEN};
pub use error::CryptoError;
pub use keystore::{Keystore, WrappedKey};
pub use webhook::verify_hmac_sha256;
