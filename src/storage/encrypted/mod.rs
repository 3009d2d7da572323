//! Wallet encryption
//!
//! Only the wallet file needs protection: it holds the secret keys and the
//! history derived from them. Blocks and pool data are public.

pub mod cipher;
pub mod wallet_file;

pub use cipher::{derive_key_from_password, Aes256GcmCipher, EncryptionResult, SecureKey};
pub use wallet_file::{
    read_wallet_file, write_atomically, write_wallet_file, SaveLevel, StoredAccount, StoredKeys,
    WalletPayload, CURRENT_VERSION,
};
