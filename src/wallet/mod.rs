//! The wallet itself
//!
//! A [`Wallet`] owns one view key and any number of spend addresses sharing
//! it. It follows the chain through a [`crate::network::Node`], keeps a
//! history of every transaction touching its addresses, builds and relays
//! transfers, deposits and fusion transactions, and reports what happened
//! through a blocking event queue.

pub mod builder;
pub mod events;
pub mod fusion;
pub mod index;
mod send;
mod sync;
pub mod types;
#[allow(clippy::module_inception)]
pub mod wallet;

pub use events::{EventQueue, WalletEvent};
pub use types::{
    Balance, Deposit, FusionEstimate, TransactionParameters, TransactionWithTransfers,
    TransactionsInBlock, WalletOrder, WalletState, WalletTransaction, WalletTransactionState,
    WalletTransfer, WalletTransferKind,
};
pub use wallet::Wallet;
