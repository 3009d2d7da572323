//! # Conceal Wallet - My CryptoNote Wallet Core
//!
//! This is the wallet engine I wrote for the Conceal network in Rust.
//! When I come back to this code, here's what I need to remember:
//!
//! ## What It Does
//! - **Accounts**: one view key shared by many spend addresses, including
//!   view-only (tracking) addresses
//! - **Ledgers**: per-address output containers fed from blocks and the
//!   pool, surviving chain reorganizations
//! - **History**: every transaction touching the wallet with its signed
//!   transfers, deposits and unlock tracking
//! - **Sending**: ring-signed transfers, term deposits with interest,
//!   withdrawals and zero-fee fusion transactions
//! - **Storage**: one Argon2id + AES-256-GCM encrypted file, saved
//!   atomically
//!
//! ## How I Organized My Code
//! - `core/`: currency rules, amounts, interest, account keys, transactions
//! - `crypto/`: Ristretto keys, derivations, key images, ring signatures
//! - `transfers/`: output ledgers and the synchronizer that feeds them
//! - `wallet/`: the [`Wallet`] facade, history index, builders and events
//! - `network/`: the [`Node`] trait plus an offline and an in-memory node
//! - `storage/`: the encrypted wallet file
//! - `config/`: settings file and environment overrides
//! - `utils/`: hashing, text encodings, varints and bincode helpers
//! - `cli/`: the command-line front end
//!
//! ## When I Need to Understand Something
//! 1. Start with `wallet/wallet.rs` for the lifecycle and locking
//! 2. `wallet/sync.rs` walks the chain and folds ledger events into history
//! 3. `wallet/send.rs` builds and relays everything outgoing
//! 4. `transfers/container.rs` decides what is spendable

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod network;
pub mod storage;
pub mod transfers;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, DonationSettings, WalletSettings, GLOBAL_CONFIG};
pub use crate::core::{AccountKeys, AccountPublicAddress, Currency, Transaction};
pub use error::{Result, WalletError};
pub use network::{InMemoryNode, Node, OfflineNode};
pub use storage::SaveLevel;
pub use wallet::{
    Balance, Deposit, FusionEstimate, TransactionParameters, TransactionWithTransfers,
    TransactionsInBlock, Wallet, WalletEvent, WalletOrder, WalletState, WalletTransaction,
    WalletTransactionState, WalletTransfer, WalletTransferKind,
};
