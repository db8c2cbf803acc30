//! Process-wide keystore — wraps room keys under a master key held in the
//! environment, with a declared list of legacy keys for rotation.

use base64::Engine;
use tracing::warn;

use mathia_core::config::KeystoreConfig;

use crate::aead::{self, RoomKey, KEY_LEN, NONCE_LEN};
use crate::error::{CryptoError, Result};

/// A room key encrypted under the master key, as persisted in `room_keys`.
#[derive(Debug, Clone)]
pub struct WrappedKey {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
}

impl WrappedKey {
    /// Single-blob form for storage: nonce || ciphertext.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.len() <= NONCE_LEN {
            return Err(CryptoError::KeystoreFailure(
                "wrapped key blob too short".to_string(),
            ));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&blob[..NONCE_LEN]);
        Ok(Self {
            ciphertext: blob[NONCE_LEN..].to_vec(),
            nonce,
        })
    }
}

pub struct Keystore {
    master: RoomKey,
    legacy: Vec<RoomKey>,
}

impl Keystore {
    /// Build from config. The master key is required; legacy keys are
    /// optional and tried in declaration order on unwrap failure.
    pub fn from_config(cfg: &KeystoreConfig) -> Result<Self> {
        let master_b64 = cfg.master_key.as_deref().ok_or_else(|| {
            CryptoError::KeystoreFailure("no master key configured".to_string())
        })?;
        let master = decode_key(master_b64)?;

        let mut legacy = Vec::with_capacity(cfg.legacy_keys.len());
        for (i, k) in cfg.legacy_keys.iter().enumerate() {
            legacy.push(decode_key(k).map_err(|e| {
                CryptoError::KeystoreFailure(format!("legacy key {i}: {e}"))
            })?);
        }

        Ok(Self { master, legacy })
    }

    /// Test/bootstrap constructor with explicit key material.
    pub fn new(master: RoomKey, legacy: Vec<RoomKey>) -> Self {
        Self { master, legacy }
    }

    /// Generate a fresh room key and wrap it under the master key.
    pub fn issue_room_key(&self) -> Result<(RoomKey, WrappedKey)> {
        let key = RoomKey::generate();
        let wrapped = self.wrap_room_key(&key)?;
        Ok((key, wrapped))
    }

    pub fn wrap_room_key(&self, key: &RoomKey) -> Result<WrappedKey> {
        let (ciphertext, nonce) = aead::encrypt(&self.master, key.as_bytes())?;
        Ok(WrappedKey { ciphertext, nonce })
    }

    /// Encrypt an arbitrary secret (integration credentials) under the
    /// master key.
    pub fn seal(&self, plaintext: &[u8]) -> Result<WrappedKey> {
        let (ciphertext, nonce) = aead::encrypt(&self.master, plaintext)?;
        Ok(WrappedKey { ciphertext, nonce })
    }

    /// Decrypt a sealed secret, with the same legacy-key fallback as
    /// `unwrap_room_key`.
    pub fn open(&self, sealed: &WrappedKey) -> Result<Vec<u8>> {
        if let Ok(bytes) = aead::decrypt(&self.master, &sealed.ciphertext, &sealed.nonce) {
            return Ok(bytes);
        }
        for (i, legacy) in self.legacy.iter().enumerate() {
            if let Ok(bytes) = aead::decrypt(legacy, &sealed.ciphertext, &sealed.nonce) {
                warn!(legacy_index = i, "secret opened with legacy master key");
                return Ok(bytes);
            }
        }
        Err(CryptoError::KeystoreFailure(
            "sealed secret does not match any configured master key".to_string(),
        ))
    }

    /// Unwrap a stored room key. Tries the current master key first, then
    /// each declared legacy key. Fails with `KeystoreFailure` if none work.
    pub fn unwrap_room_key(&self, wrapped: &WrappedKey) -> Result<RoomKey> {
        if let Ok(bytes) = aead::decrypt(&self.master, &wrapped.ciphertext, &wrapped.nonce) {
            return RoomKey::from_bytes(&bytes);
        }

        for (i, legacy) in self.legacy.iter().enumerate() {
            if let Ok(bytes) = aead::decrypt(legacy, &wrapped.ciphertext, &wrapped.nonce) {
                warn!(legacy_index = i, "room key unwrapped with legacy master key");
                return RoomKey::from_bytes(&bytes);
            }
        }

        Err(CryptoError::KeystoreFailure(
            "wrapped key does not match any configured master key".to_string(),
        ))
    }
}

fn decode_key(b64: &str) -> Result<RoomKey> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    if bytes.len() != KEY_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "master key must be {KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    RoomKey::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keystore_with_legacy() -> (Keystore, Keystore) {
        let old_master = RoomKey::generate();
        let new_master = RoomKey::generate();
        let old = Keystore::new(old_master.clone(), Vec::new());
        let rotated = Keystore::new(new_master, vec![old_master]);
        (old, rotated)
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let ks = Keystore::new(RoomKey::generate(), Vec::new());
        let (key, wrapped) = ks.issue_room_key().unwrap();
        let recovered = ks.unwrap_room_key(&wrapped).unwrap();
        assert_eq!(recovered.as_bytes(), key.as_bytes());
    }

    #[test]
    fn legacy_key_fallback_after_rotation() {
        let (old, rotated) = keystore_with_legacy();
        let (key, wrapped) = old.issue_room_key().unwrap();

        // the rotated keystore can still unwrap keys wrapped by the old master
        let recovered = rotated.unwrap_room_key(&wrapped).unwrap();
        assert_eq!(recovered.as_bytes(), key.as_bytes());
    }

    #[test]
    fn unknown_master_fails() {
        let ks_a = Keystore::new(RoomKey::generate(), Vec::new());
        let ks_b = Keystore::new(RoomKey::generate(), Vec::new());
        let (_, wrapped) = ks_a.issue_room_key().unwrap();

        assert!(matches!(
            ks_b.unwrap_room_key(&wrapped),
            Err(CryptoError::KeystoreFailure(_))
        ));
    }

    #[test]
    fn blob_round_trip() {
        let ks = Keystore::new(RoomKey::generate(), Vec::new());
        let (_, wrapped) = ks.issue_room_key().unwrap();
        let blob = wrapped.to_blob();
        let parsed = WrappedKey::from_blob(&blob).unwrap();
        assert_eq!(parsed.nonce, wrapped.nonce);
        assert_eq!(parsed.ciphertext, wrapped.ciphertext);
    }

    #[test]
    fn from_config_requires_master() {
        let cfg = KeystoreConfig::default();
        assert!(Keystore::from_config(&cfg).is_err());
    }

    #[test]
    fn from_config_decodes_base64() {
        use base64::Engine;
        let raw = RoomKey::generate();
        let cfg = KeystoreConfig {
            master_key: Some(
                base64::engine::general_purpose::STANDARD.encode(raw.as_bytes()),
            ),
            legacy_keys: Vec::new(),
        };
        let ks = Keystore::from_config(&cfg).unwrap();
        let (key, wrapped) = ks.issue_room_key().unwrap();
        assert_eq!(
            ks.unwrap_room_key(&wrapped).unwrap().as_bytes(),
            key.as_bytes()
        );
    }
}
