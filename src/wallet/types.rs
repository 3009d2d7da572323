use serde::{Deserialize, Serialize};

use crate::config::{DonationSettings, DEFAULT_MIXIN};
use crate::core::MINIMUM_FEE;
use crate::crypto::Hash;
use crate::transfers::UNCONFIRMED_TRANSACTION_HEIGHT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletState {
    NotInitialized,
    Initialized,
    Saving,
    Loading,
    ShuttingDown,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum WalletTransactionState {
    /// Built locally, not relayed yet
    Created,
    Succeeded,
    Failed,
    Cancelled,
    /// Every address it touched was removed from the wallet
    Deleted,
}

/// One entry of the wallet history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct WalletTransaction {
    pub state: WalletTransactionState,
    pub hash: Hash,
    pub block_height: u32,
    pub timestamp: u64,
    /// Net effect on the wallet: outputs received minus inputs spent
    pub total_amount: i64,
    pub fee: u64,
    pub unlock_time: u64,
    pub extra: Vec<u8>,
    pub creation_time: u64,
    pub is_base: bool,
    pub first_deposit_id: Option<usize>,
    pub deposit_count: usize,
}

impl WalletTransaction {
    pub fn is_confirmed(&self) -> bool {
        self.block_height != UNCONFIRMED_TRANSACTION_HEIGHT
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum WalletTransferKind {
    Usual,
    Donation,
    Change,
}

/// Signed amount moved to or from one address by a transaction. Negative
/// amounts are inputs; an empty address stands for inputs or outputs the
/// wallet cannot attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct WalletTransfer {
    pub kind: WalletTransferKind,
    pub address: String,
    pub amount: i64,
}

impl WalletTransfer {
    pub fn usual(address: impl Into<String>, amount: i64) -> Self {
        WalletTransfer {
            kind: WalletTransferKind::Usual,
            address: address.into(),
            amount,
        }
    }
}

/// A term deposit owned by one of the wallet addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Deposit {
    pub creating_transaction_id: usize,
    pub spending_transaction_id: Option<usize>,
    pub term: u32,
    pub amount: u64,
    pub interest: u64,
    pub height: u32,
    pub unlock_height: u32,
    pub locked: bool,
    pub transaction_hash: Hash,
    pub output_in_transaction: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletOrder {
    pub address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionParameters {
    /// Addresses to spend from; empty means every address with funds
    pub source_addresses: Vec<String>,
    pub destinations: Vec<WalletOrder>,
    pub fee: u64,
    pub mix_in: u64,
    pub extra: Vec<u8>,
    pub unlock_timestamp: u64,
    /// Overrides the donation policy from the settings
    pub donation: Option<DonationSettings>,
    pub change_destination: Option<String>,
}

impl Default for TransactionParameters {
    fn default() -> Self {
        TransactionParameters {
            source_addresses: Vec::new(),
            destinations: Vec::new(),
            fee: MINIMUM_FEE,
            mix_in: DEFAULT_MIXIN,
            extra: Vec::new(),
            unlock_timestamp: 0,
            donation: None,
            change_destination: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Spendable now
    pub actual: u64,
    /// Received but still locked, or in the pool
    pub pending: u64,
    pub locked_deposit: u64,
    pub unlocked_deposit: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionEstimate {
    pub fusion_ready_count: usize,
    pub total_output_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionWithTransfers {
    pub transaction: WalletTransaction,
    pub transfers: Vec<WalletTransfer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionsInBlock {
    pub block_hash: Hash,
    pub transactions: Vec<TransactionWithTransfers>,
}
