use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr};

use crate::core::AccountPublicAddress;
use crate::crypto::{Hash, KeyImage, PublicKey};

/// Height sentinel for transactions seen only in the pool
pub const UNCONFIRMED_TRANSACTION_HEIGHT: u32 = u32::MAX;
/// Global index sentinel for outputs of pool transactions
pub const UNCONFIRMED_GLOBAL_OUTPUT_INDEX: u32 = u32::MAX;

/// Where a transaction sits in the chain
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TransactionBlockInfo {
    pub height: u32,
    pub timestamp: u64,
    pub transaction_index: u32,
}

impl TransactionBlockInfo {
    pub fn unconfirmed() -> Self {
        TransactionBlockInfo {
            height: UNCONFIRMED_TRANSACTION_HEIGHT,
            timestamp: 0,
            transaction_index: 0,
        }
    }

    pub fn confirmed(height: u32, timestamp: u64, transaction_index: u32) -> Self {
        TransactionBlockInfo {
            height,
            timestamp,
            transaction_index,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.height != UNCONFIRMED_TRANSACTION_HEIGHT
    }
}

/// Identifies one output: `(transaction hash, index in transaction)`
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct OutputId {
    pub transaction_hash: Hash,
    pub output_in_transaction: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum OutputKind {
    /// Ring-spendable output; the key image is zero for tracking accounts
    Key { key_image: KeyImage },
    /// Multisignature output; a nonzero term makes it a deposit
    Multisignature { required_signatures: u8, term: u32 },
}

/// A transaction output that belongs to a tracked account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TransactionOutputInformation {
    pub transaction_hash: Hash,
    pub output_in_transaction: u32,
    pub amount: u64,
    pub global_output_index: u32,
    pub output_key: PublicKey,
    pub transaction_public_key: PublicKey,
    pub kind: OutputKind,
}

impl TransactionOutputInformation {
    pub fn id(&self) -> OutputId {
        OutputId {
            transaction_hash: self.transaction_hash,
            output_in_transaction: self.output_in_transaction,
        }
    }

    pub fn key_image(&self) -> Option<&KeyImage> {
        match &self.kind {
            OutputKind::Key { key_image } => Some(key_image),
            OutputKind::Multisignature { .. } => None,
        }
    }

    pub fn term(&self) -> u32 {
        match &self.kind {
            OutputKind::Key { .. } => 0,
            OutputKind::Multisignature { term, .. } => *term,
        }
    }

    pub fn is_deposit(&self) -> bool {
        self.term() != 0
    }

    /// Descriptor an input uses to reference this output, once known.
    /// Tracking accounts cannot compute key images, so their key outputs
    /// have none.
    pub fn spent_descriptor(&self) -> Option<SpentOutputDescriptor> {
        match &self.kind {
            OutputKind::Key { key_image } if *key_image == KeyImage::default() => None,
            OutputKind::Key { key_image } => Some(SpentOutputDescriptor::KeyImage(*key_image)),
            OutputKind::Multisignature { .. } => {
                if self.global_output_index == UNCONFIRMED_GLOBAL_OUTPUT_INDEX {
                    None
                } else {
                    Some(SpentOutputDescriptor::Multisignature {
                        amount: self.amount,
                        global_output_index: self.global_output_index,
                    })
                }
            }
        }
    }

    pub(crate) fn type_flag(&self) -> IncludeFlags {
        match &self.kind {
            OutputKind::Key { .. } => IncludeFlags::TYPE_KEY,
            OutputKind::Multisignature { term: 0, .. } => IncludeFlags::TYPE_MULTISIGNATURE,
            OutputKind::Multisignature { .. } => IncludeFlags::TYPE_DEPOSIT,
        }
    }
}

/// How an input refers to the output it spends
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub enum SpentOutputDescriptor {
    KeyImage(KeyImage),
    Multisignature {
        amount: u64,
        global_output_index: u32,
    },
}

/// Transaction as recorded by a ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TransactionInformation {
    pub transaction_hash: Hash,
    pub public_key: PublicKey,
    pub block_height: u32,
    pub timestamp: u64,
    pub transaction_index: u32,
    pub unlock_time: u64,
    pub total_amount_in: u64,
    pub total_amount_out: u64,
    pub extra: Vec<u8>,
}

/// An output together with the input that consumed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct SpentOutput {
    pub output: TransactionOutputInformation,
    pub spending_block: TransactionBlockInfo,
    pub spending_transaction_hash: Hash,
    pub input_in_transaction: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Unconfirmed,
    Available,
    Spent,
}

/// Output selection flags: a state mask ORed with a type mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IncludeFlags(u32);

impl IncludeFlags {
    pub const STATE_UNLOCKED: IncludeFlags = IncludeFlags(0x01);
    pub const STATE_LOCKED: IncludeFlags = IncludeFlags(0x02);
    pub const STATE_SOFT_LOCKED: IncludeFlags = IncludeFlags(0x04);
    pub const STATE_SPENT: IncludeFlags = IncludeFlags(0x08);
    pub const STATE_ALL: IncludeFlags = IncludeFlags(0xff);

    pub const TYPE_KEY: IncludeFlags = IncludeFlags(0x100);
    pub const TYPE_MULTISIGNATURE: IncludeFlags = IncludeFlags(0x200);
    pub const TYPE_DEPOSIT: IncludeFlags = IncludeFlags(0x400);
    pub const TYPE_ALL: IncludeFlags = IncludeFlags(0xff00);

    pub const ALL: IncludeFlags = IncludeFlags(0xffff);
    pub const KEY_UNLOCKED: IncludeFlags = IncludeFlags(0x100 | 0x01);
    pub const KEY_NOT_UNLOCKED: IncludeFlags = IncludeFlags(0x100 | 0x02 | 0x04);
    pub const ALL_UNLOCKED: IncludeFlags = IncludeFlags(0xff00 | 0x01);
    pub const DEFAULT: IncludeFlags = Self::KEY_UNLOCKED;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: IncludeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: IncludeFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for IncludeFlags {
    type Output = IncludeFlags;

    fn bitor(self, rhs: IncludeFlags) -> IncludeFlags {
        IncludeFlags(self.0 | rhs.0)
    }
}

impl BitAnd for IncludeFlags {
    type Output = IncludeFlags;

    fn bitand(self, rhs: IncludeFlags) -> IncludeFlags {
        IncludeFlags(self.0 & rhs.0)
    }
}

/// Result of rolling a ledger back to a height
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetachResult {
    pub deleted_transactions: Vec<Hash>,
    pub locked_transfers: Vec<TransactionOutputInformation>,
}

/// Where an account starts scanning the chain
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct SynchronizationStart {
    pub timestamp: u64,
    pub height: u32,
}

/// Notifications produced while feeding blocks and pool changes into the
/// ledgers, in the order they must be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransfersEvent {
    BlocksAdded {
        view_public_key: PublicKey,
        block_hashes: Vec<Hash>,
    },
    BlockchainDetached {
        view_public_key: PublicKey,
        height: u32,
    },
    /// A transaction changed the ledgers of `accounts`
    TransactionUpdated {
        view_public_key: PublicKey,
        transaction_hash: Hash,
        accounts: Vec<AccountPublicAddress>,
    },
    TransactionDeleteBegin {
        view_public_key: PublicKey,
        transaction_hash: Hash,
    },
    TransactionDeleteEnd {
        view_public_key: PublicKey,
        transaction_hash: Hash,
    },
    /// A transaction was removed from one account's ledger
    TransactionDeleted {
        address: AccountPublicAddress,
        transaction_hash: Hash,
    },
    TransfersUnlocked {
        address: AccountPublicAddress,
        transfers: Vec<TransactionOutputInformation>,
    },
    TransfersLocked {
        address: AccountPublicAddress,
        transfers: Vec<TransactionOutputInformation>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = IncludeFlags::TYPE_KEY | IncludeFlags::STATE_LOCKED;
        assert!(flags.contains(IncludeFlags::TYPE_KEY));
        assert!(!flags.contains(IncludeFlags::STATE_UNLOCKED));
        assert!(IncludeFlags::KEY_NOT_UNLOCKED.intersects(IncludeFlags::STATE_SOFT_LOCKED));
        assert_eq!(IncludeFlags::DEFAULT, IncludeFlags::KEY_UNLOCKED);
        assert_eq!((IncludeFlags::ALL & IncludeFlags::TYPE_ALL).bits(), 0xff00);
    }

    #[test]
    fn test_descriptor_requires_global_index_for_multisig() {
        let mut output = TransactionOutputInformation {
            transaction_hash: Hash::default(),
            output_in_transaction: 0,
            amount: 100,
            global_output_index: UNCONFIRMED_GLOBAL_OUTPUT_INDEX,
            output_key: PublicKey::default(),
            transaction_public_key: PublicKey::default(),
            kind: OutputKind::Multisignature {
                required_signatures: 1,
                term: 5_040,
            },
        };
        assert!(output.is_deposit());
        assert_eq!(output.spent_descriptor(), None);
        output.global_output_index = 4;
        assert_eq!(
            output.spent_descriptor(),
            Some(SpentOutputDescriptor::Multisignature {
                amount: 100,
                global_output_index: 4
            })
        );
        assert_eq!(output.type_flag(), IncludeFlags::TYPE_DEPOSIT);
    }

    #[test]
    fn test_tracking_outputs_have_no_descriptor() {
        let output = TransactionOutputInformation {
            transaction_hash: Hash::default(),
            output_in_transaction: 0,
            amount: 100,
            global_output_index: 3,
            output_key: PublicKey::default(),
            transaction_public_key: PublicKey::default(),
            kind: OutputKind::Key {
                key_image: KeyImage::default(),
            },
        };
        assert_eq!(output.spent_descriptor(), None);
        assert_eq!(output.type_flag(), IncludeFlags::TYPE_KEY);
    }
}
