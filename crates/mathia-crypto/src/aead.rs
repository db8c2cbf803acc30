//! AEAD construction for message bodies and stored credentials.
//!
//! ChaCha20-Poly1305 with a random 96-bit nonce per encryption. The nonce is
//! stored beside the ciphertext; the key never leaves this crate's callers.

use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::error::{CryptoError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// A 256-bit room-scoped symmetric key.
#[derive(Clone)]
pub struct RoomKey([u8; KEY_LEN]);

impl RoomKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

// Key material must never appear in logs or panics.
impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RoomKey(..)")
    }
}

/// Encrypt `plaintext` under `key`. Returns `(ciphertext, nonce)`.
pub fn encrypt(key: &RoomKey, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptFailure(e.to_string()))?;

    let mut nonce_out = [0u8; NONCE_LEN];
    nonce_out.copy_from_slice(&nonce);
    Ok((ciphertext, nonce_out))
}

/// Decrypt `ciphertext` with `key` and the stored `nonce`.
pub fn decrypt(key: &RoomKey, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::DecryptFailure);
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = RoomKey::generate();
        let plaintext = b"hello world";
        let (ciphertext, nonce) = encrypt(&key, plaintext).unwrap();

        assert_ne!(&ciphertext, plaintext);
        let recovered = decrypt(&key, &ciphertext, &nonce).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let key = RoomKey::generate();
        let other = RoomKey::generate();
        let (ciphertext, nonce) = encrypt(&key, b"secret").unwrap();

        assert!(matches!(
            decrypt(&other, &ciphertext, &nonce),
            Err(CryptoError::DecryptFailure)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = RoomKey::generate();
        let (mut ciphertext, nonce) = encrypt(&key, b"secret").unwrap();
        ciphertext[0] ^= 0xff;

        assert!(decrypt(&key, &ciphertext, &nonce).is_err());
    }

    #[test]
    fn nonces_are_unique_per_call() {
        let key = RoomKey::generate();
        let (_, n1) = encrypt(&key, b"a").unwrap();
        let (_, n2) = encrypt(&key, b"a").unwrap();
        assert_ne!(n1, n2);
    }

    #[test]
    fn debug_never_prints_key_material() {
        let key = RoomKey::generate();
        assert_eq!(format!("{:?}", key), "RoomKey(..)");
    }
}
