use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};

use crate::{Error, Result};

const NONCE_LEN: usize = 12;

/// Encrypts per-connection webhook secrets at rest with AES-256-GCM.
/// Ciphertext format: hex(nonce || sealed), key from the environment.
#[derive(Clone)]
pub struct SecretCodec {
    key: [u8; 32],
}

impl SecretCodec {
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|_| Error::Crypto("encryption key is not valid hex".to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("encryption key must be 32 bytes".to_string()))?;
        Ok(Self { key })
    }

    pub fn from_env(var: &str) -> Result<Self> {
        let raw = std::env::var(var)
            .map_err(|_| Error::Config(format!("{} must be set", var)))?;
        Self::from_hex(&raw)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Crypto("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let bytes = hex::decode(ciphertext_hex)
            .map_err(|_| Error::Crypto("ciphertext is not valid hex".to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".to_string()));
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plain = cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::Crypto("decryption failed; wrong key?".to_string()))?;
        String::from_utf8(plain).map_err(|_| Error::Crypto("secret is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn round_trip() {
        let codec = SecretCodec::from_hex(KEY).unwrap();
        let sealed = codec.encrypt("whsec_super_secret").unwrap();
        assert_ne!(sealed, "whsec_super_secret");
        assert_eq!(codec.decrypt(&sealed).unwrap(), "whsec_super_secret");
    }

    #[test]
    fn distinct_nonces_per_encryption() {
        let codec = SecretCodec::from_hex(KEY).unwrap();
        let a = codec.encrypt("same").unwrap();
        let b = codec.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let codec = SecretCodec::from_hex(KEY).unwrap();
        let sealed = codec.encrypt("whsec_super_secret").unwrap();

        let other =
            SecretCodec::from_hex("ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff")
                .unwrap();
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn bad_key_material_rejected() {
        assert!(SecretCodec::from_hex("deadbeef").is_err());
        assert!(SecretCodec::from_hex("zz").is_err());
    }
}
