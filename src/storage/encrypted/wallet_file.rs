//! Versioned, encrypted wallet container
//!
//! Layout (bincode): magic, format version, Argon2 salt, GCM nonce and the
//! sealed payload. Version 1 sealed the keys alone; version 2 seals the keys
//! plus an optional cache blob with the ledgers and history.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use super::cipher::{derive_key_from_password, random_bytes, Aes256GcmCipher, SALT_LENGTH};
use crate::crypto::{PublicKey, SecretKey};
use crate::error::{Result, WalletError};
use crate::utils::{deserialize, serialize};

pub const WALLET_FILE_MAGIC: [u8; 4] = *b"CCXW";
pub const KEYS_ONLY_VERSION: u32 = 1;
pub const CURRENT_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveLevel {
    KeysOnly,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct StoredAccount {
    pub spend_public_key: PublicKey,
    pub spend_secret_key: Option<SecretKey>,
    pub creation_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct StoredKeys {
    pub view_public_key: PublicKey,
    pub view_secret_key: SecretKey,
    pub accounts: Vec<StoredAccount>,
}

/// Decrypted contents of a wallet file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct WalletPayload {
    pub keys: StoredKeys,
    /// Opaque cache written by the wallet; absent for keys-only saves
    pub cache: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct WalletContainer {
    magic: [u8; 4],
    version: u32,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

fn seal(version: u32, password: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let salt = random_bytes(SALT_LENGTH);
    let key = derive_key_from_password(password, &salt)?;
    let sealed = Aes256GcmCipher::new(&key)?.encrypt(plaintext)?;
    serialize(&WalletContainer {
        magic: WALLET_FILE_MAGIC,
        version,
        salt,
        nonce: sealed.nonce,
        ciphertext: sealed.ciphertext,
    })
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writes `bytes` next to `path`, syncs it and renames it over `path`, so a
/// crash leaves either the old or the new file
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = temporary_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

pub fn write_wallet_file(path: &Path, password: &str, payload: &WalletPayload) -> Result<()> {
    let plaintext = Zeroizing::new(serialize(payload)?);
    let bytes = seal(CURRENT_VERSION, password, &plaintext)?;
    write_atomically(path, &bytes)?;
    info!("Wallet saved to {}", path.display());
    Ok(())
}

pub fn read_wallet_file(path: &Path, password: &str) -> Result<WalletPayload> {
    let bytes = fs::read(path)?;
    let container: WalletContainer = deserialize(&bytes)
        .map_err(|_| WalletError::Serialization("Not a wallet file".to_string()))?;
    if container.magic != WALLET_FILE_MAGIC {
        return Err(WalletError::Serialization("Not a wallet file".to_string()));
    }
    if container.version == 0 || container.version > CURRENT_VERSION {
        return Err(WalletError::WrongVersion(container.version));
    }

    let key = derive_key_from_password(password, &container.salt)?;
    let plaintext = Zeroizing::new(
        Aes256GcmCipher::new(&key)?
            .decrypt(&container.ciphertext, &container.nonce)
            .map_err(|_| WalletError::WrongPassword)?,
    );

    if container.version == KEYS_ONLY_VERSION {
        warn!("Migrating keys-only wallet file {}", path.display());
        let keys: StoredKeys = deserialize(&plaintext)?;
        return Ok(WalletPayload { keys, cache: None });
    }
    deserialize(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keys;
    use tempfile::tempdir;

    fn sample_keys() -> StoredKeys {
        let (view_public_key, view_secret_key) = generate_keys();
        let (spend_public_key, spend_secret_key) = generate_keys();
        StoredKeys {
            view_public_key,
            view_secret_key,
            accounts: vec![StoredAccount {
                spend_public_key,
                spend_secret_key: Some(spend_secret_key),
                creation_timestamp: 1_700_000_000,
            }],
        }
    }

    #[test]
    fn test_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.ccx");
        let payload = WalletPayload {
            keys: sample_keys(),
            cache: Some(vec![1, 2, 3]),
        };
        write_wallet_file(&path, "secret", &payload).unwrap();
        assert!(!temporary_path(&path).exists());
        assert_eq!(read_wallet_file(&path, "secret").unwrap(), payload);
        assert_eq!(
            read_wallet_file(&path, "wrong"),
            Err(WalletError::WrongPassword)
        );
    }

    #[test]
    fn test_keys_only_file_is_migrated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.ccx");
        let keys = sample_keys();
        let bytes = seal(KEYS_ONLY_VERSION, "pw", &serialize(&keys).unwrap()).unwrap();
        fs::write(&path, bytes).unwrap();

        let payload = read_wallet_file(&path, "pw").unwrap();
        assert_eq!(payload.keys, keys);
        assert_eq!(payload.cache, None);
    }

    #[test]
    fn test_rejects_newer_version_and_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("future.ccx");
        let bytes = seal(CURRENT_VERSION + 1, "pw", b"whatever").unwrap();
        fs::write(&path, bytes).unwrap();
        assert_eq!(
            read_wallet_file(&path, "pw"),
            Err(WalletError::WrongVersion(CURRENT_VERSION + 1))
        );

        fs::write(&path, b"definitely not a wallet").unwrap();
        assert!(matches!(
            read_wallet_file(&path, "pw"),
            Err(WalletError::Serialization(_))
        ));
    }

    #[test]
    fn test_atomic_write_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_atomically(&path, b"first").unwrap();
        write_atomically(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}
