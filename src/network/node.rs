use serde::{Deserialize, Serialize};

use crate::core::{CompleteBlock, Transaction};
use crate::crypto::{Hash, PublicKey};
use crate::error::{Result, WalletError};

/// Blocks the node has after the newest hash both sides agree on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBlocks {
    /// Height of `blocks[0]`; it is the common block when one was found
    pub start_height: u32,
    pub blocks: Vec<CompleteBlock>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolChanges {
    pub added: Vec<Transaction>,
    pub deleted: Vec<Hash>,
}

/// A decoy candidate: one key output of the requested amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomOutput {
    pub global_index: u32,
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomOutputs {
    pub amount: u64,
    pub outputs: Vec<RandomOutput>,
}

/// Block and pool source the wallet synchronizes against
///
/// Every call may fail with [`WalletError::Network`]; the wallet never
/// retries on its own.
pub trait Node: Send + Sync {
    /// `known_block_hashes` is newest first and ends with the genesis hash
    fn get_new_blocks(&self, known_block_hashes: &[Hash]) -> Result<NewBlocks>;
    fn get_pool_changes(&self, known_pool_transactions: &[Hash]) -> Result<PoolChanges>;
    fn relay_transaction(&self, transaction: &Transaction) -> Result<()>;
    fn get_random_outputs_for_amounts(
        &self,
        amounts: &[u64],
        outputs_count: u64,
    ) -> Result<Vec<RandomOutputs>>;
    fn last_known_block_height(&self) -> Result<u32>;
}

/// Node used when the wallet runs without a daemon
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNode;

impl OfflineNode {
    fn unavailable<T>() -> Result<T> {
        Err(WalletError::Network("Wallet is running offline".to_string()))
    }
}

impl Node for OfflineNode {
    fn get_new_blocks(&self, _known_block_hashes: &[Hash]) -> Result<NewBlocks> {
        Self::unavailable()
    }

    fn get_pool_changes(&self, _known_pool_transactions: &[Hash]) -> Result<PoolChanges> {
        Self::unavailable()
    }

    fn relay_transaction(&self, _transaction: &Transaction) -> Result<()> {
        Self::unavailable()
    }

    fn get_random_outputs_for_amounts(
        &self,
        _amounts: &[u64],
        _outputs_count: u64,
    ) -> Result<Vec<RandomOutputs>> {
        Self::unavailable()
    }

    fn last_known_block_height(&self) -> Result<u32> {
        Self::unavailable()
    }
}
