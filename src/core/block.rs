use crate::core::Transaction;
use crate::crypto::{fast_hash, Hash};
use crate::error::Result;
use crate::utils::serialize;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub previous_block_hash: Hash,
    pub nonce: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    pub header: BlockHeader,
    pub base_transaction: Transaction,
    pub transaction_hashes: Vec<Hash>,
}

impl Block {
    /// Hash over the header, the coinbase and every included transaction id
    pub fn hash(&self) -> Result<Hash> {
        let mut data = serialize(&self.header)?;
        data.extend_from_slice(&self.base_transaction.hash()?.0);
        for tx_hash in &self.transaction_hashes {
            data.extend_from_slice(&tx_hash.0);
        }
        Ok(fast_hash(&data))
    }
}

/// A transaction as delivered to the wallet, with the global index the
/// chain assigned to each of its outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockTransaction {
    pub hash: Hash,
    pub transaction: Transaction,
    pub global_output_indices: Vec<u32>,
}

/// Fully expanded block: coinbase first, then the block's transactions
/// in inclusion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct CompleteBlock {
    pub hash: Hash,
    pub height: u32,
    pub timestamp: u64,
    pub transactions: Vec<BlockTransaction>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TransactionInput, TransactionPrefix};

    fn coinbase(height: u32) -> Transaction {
        Transaction {
            prefix: TransactionPrefix {
                inputs: vec![TransactionInput::Base {
                    block_index: height,
                }],
                ..TransactionPrefix::default()
            },
            signatures: vec![],
        }
    }

    #[test]
    fn test_block_hash_depends_on_contents() {
        let block = Block {
            header: BlockHeader::default(),
            base_transaction: coinbase(1),
            transaction_hashes: vec![],
        };
        let mut other = block.clone();
        other.transaction_hashes.push(fast_hash(b"tx"));
        assert_ne!(block.hash().unwrap(), other.hash().unwrap());
        assert_eq!(block.hash().unwrap(), block.clone().hash().unwrap());
    }
}
