//! Persistence of wallet state
//!
//! Everything the wallet stores goes through one encrypted, versioned file
//! that is replaced atomically on every save.

pub mod encrypted;

pub use encrypted::{
    read_wallet_file, write_wallet_file, SaveLevel, StoredAccount, StoredKeys, WalletPayload,
};
