use crate::error::{Result, WalletError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

pub const KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 12;
pub const SALT_LENGTH: usize = 32;

/// Output of one encryption: ciphertext plus the nonce it was sealed with
#[derive(Debug, Clone)]
pub struct EncryptionResult {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Key material that is wiped when dropped
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecureKey {
    key: Vec<u8>,
}

impl SecureKey {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureKey")
            .field("length", &self.key.len())
            .finish()
    }
}

/// Argon2id stretch of the wallet password (64 MiB, 3 passes)
pub fn derive_key_from_password(password: &str, salt: &[u8]) -> Result<SecureKey> {
    let params = Params::new(65536, 3, 1, Some(KEY_LENGTH))
        .map_err(|e| WalletError::Encryption(format!("Invalid Argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = vec![0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| WalletError::Encryption(format!("Key derivation failed: {e}")))?;
    Ok(SecureKey::new(key))
}

pub fn random_bytes(length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// AES-256-GCM sealing of wallet containers
pub struct Aes256GcmCipher {
    cipher: Aes256Gcm,
}

impl Aes256GcmCipher {
    pub fn new(key: &SecureKey) -> Result<Self> {
        if key.len() != KEY_LENGTH {
            return Err(WalletError::Encryption(
                "AES-256-GCM requires a 32-byte key".to_string(),
            ));
        }
        let aes_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
        Ok(Self {
            cipher: Aes256Gcm::new(aes_key),
        })
    }

    /// Encrypts under a fresh random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptionResult> {
        let nonce_bytes = random_bytes(NONCE_LENGTH);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self.cipher.encrypt(nonce, plaintext).map_err(|e| {
            WalletError::Encryption(format!("AES-256-GCM encryption failed: {e}"))
        })?;
        Ok(EncryptionResult {
            ciphertext,
            nonce: nonce_bytes,
        })
    }

    /// Fails when the key is wrong or the ciphertext was tampered with
    pub fn decrypt(&self, ciphertext: &[u8], nonce_bytes: &[u8]) -> Result<Vec<u8>> {
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(WalletError::Encryption(
                "AES-256-GCM requires a 12-byte nonce".to_string(),
            ));
        }
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher.decrypt(nonce, ciphertext).map_err(|e| {
            WalletError::Encryption(format!("AES-256-GCM decryption failed: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_rejects_short_key() {
        let key = SecureKey::new(vec![0u8; 16]);
        assert!(Aes256GcmCipher::new(&key).is_err());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = SecureKey::new(vec![1u8; 32]);
        let cipher = Aes256GcmCipher::new(&key).unwrap();
        let sealed = cipher.encrypt(b"view and spend keys").unwrap();
        assert_eq!(sealed.nonce.len(), NONCE_LENGTH);
        let opened = cipher.decrypt(&sealed.ciphertext, &sealed.nonce).unwrap();
        assert_eq!(opened, b"view and spend keys");

        let other = Aes256GcmCipher::new(&SecureKey::new(vec![2u8; 32])).unwrap();
        assert!(other.decrypt(&sealed.ciphertext, &sealed.nonce).is_err());
    }

    #[test]
    fn test_password_derivation_depends_on_salt() {
        let a = derive_key_from_password("hunter2", &[1u8; SALT_LENGTH]).unwrap();
        let b = derive_key_from_password("hunter2", &[2u8; SALT_LENGTH]).unwrap();
        let again = derive_key_from_password("hunter2", &[1u8; SALT_LENGTH]).unwrap();
        assert_eq!(a.len(), KEY_LENGTH);
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes(), again.as_bytes());
    }
}
