// A small in-process chain I use to drive wallets in tests and demos.
// It mines blocks on demand, keeps a pool, hands out decoys and checks the
// signatures of relayed transactions. There is no consensus here: no
// difficulty, no proof-of-work, no block size rules.

use log::{debug, info};
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::node::{NewBlocks, Node, PoolChanges, RandomOutput, RandomOutputs};
use crate::core::transaction::{add_public_key_to_extra, relative_output_offsets_to_absolute};
use crate::core::{
    AccountKeys, AccountPublicAddress, Block, BlockHeader, BlockTransaction, CompleteBlock,
    Currency, Transaction, TransactionInput, TransactionOutputTarget, TransactionPrefix,
};
use crate::crypto::{
    check_ring_signature, check_signature, derive_public_key, generate_key_derivation,
    generate_keys, Hash, KeyImage, PublicKey,
};
use crate::error::{Result, WalletError};
use crate::utils::current_timestamp;

const MAX_BLOCKS_PER_REQUEST: usize = 100;

#[derive(Debug, Clone)]
struct KeyOutputEntry {
    public_key: PublicKey,
    unlock_time: u64,
}

#[derive(Debug, Clone)]
struct MultisigOutputEntry {
    keys: Vec<PublicKey>,
    required_signatures: u8,
    term: u32,
    height: u32,
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<CompleteBlock>,
    block_heights: HashMap<Hash, u32>,
    pool: BTreeMap<Hash, Transaction>,
    // global output indices are per amount, separately for both output kinds
    key_outputs: BTreeMap<u64, Vec<KeyOutputEntry>>,
    multisig_outputs: BTreeMap<u64, Vec<MultisigOutputEntry>>,
    key_images: HashSet<KeyImage>,
    spent_multisig: HashSet<(u64, u32)>,
    relay_failure: bool,
}

impl ChainState {
    fn top_height(&self) -> u32 {
        self.blocks.len().saturating_sub(1) as u32
    }

    /// Indexes the outputs and spends of `transaction`, returning the global
    /// index assigned to each output
    fn index_transaction(&mut self, transaction: &Transaction, height: u32) -> Vec<u32> {
        for input in &transaction.prefix.inputs {
            match input {
                TransactionInput::Key { key_image, .. } => {
                    self.key_images.insert(*key_image);
                }
                TransactionInput::Multisignature {
                    amount,
                    output_index,
                    ..
                } => {
                    self.spent_multisig.insert((*amount, *output_index));
                }
                TransactionInput::Base { .. } => {}
            }
        }

        let mut indices = Vec::with_capacity(transaction.prefix.outputs.len());
        for output in &transaction.prefix.outputs {
            match &output.target {
                TransactionOutputTarget::Key { key } => {
                    let entries = self.key_outputs.entry(output.amount).or_default();
                    indices.push(entries.len() as u32);
                    entries.push(KeyOutputEntry {
                        public_key: *key,
                        unlock_time: transaction.prefix.unlock_time,
                    });
                }
                TransactionOutputTarget::Multisignature {
                    keys,
                    required_signatures,
                    term,
                } => {
                    let entries = self.multisig_outputs.entry(output.amount).or_default();
                    indices.push(entries.len() as u32);
                    entries.push(MultisigOutputEntry {
                        keys: keys.clone(),
                        required_signatures: *required_signatures,
                        term: *term,
                        height,
                    });
                }
            }
        }
        indices
    }

    fn rebuild_indices(&mut self) {
        self.key_outputs.clear();
        self.multisig_outputs.clear();
        self.key_images.clear();
        self.spent_multisig.clear();
        self.block_heights.clear();
        let blocks = std::mem::take(&mut self.blocks);
        for block in &blocks {
            self.block_heights.insert(block.hash, block.height);
            for entry in &block.transactions {
                self.index_transaction(&entry.transaction, block.height);
            }
        }
        self.blocks = blocks;
    }

    fn pool_spends(&self) -> (HashSet<KeyImage>, HashSet<(u64, u32)>) {
        let mut images = HashSet::new();
        let mut multisig = HashSet::new();
        for transaction in self.pool.values() {
            for input in &transaction.prefix.inputs {
                match input {
                    TransactionInput::Key { key_image, .. } => {
                        images.insert(*key_image);
                    }
                    TransactionInput::Multisignature {
                        amount,
                        output_index,
                        ..
                    } => {
                        multisig.insert((*amount, *output_index));
                    }
                    TransactionInput::Base { .. } => {}
                }
            }
        }
        (images, multisig)
    }
}

fn rejected(reason: impl Into<String>) -> WalletError {
    WalletError::Network(format!("Transaction rejected: {}", reason.into()))
}

pub struct InMemoryNode {
    currency: Currency,
    state: Mutex<ChainState>,
}

impl InMemoryNode {
    /// New chain holding only a genesis block
    pub fn new(currency: Currency) -> Result<Self> {
        let node = InMemoryNode {
            currency,
            state: Mutex::new(ChainState::default()),
        };
        {
            let mut state = node.state()?;
            let genesis = node.coinbase(0, &[])?;
            node.append_block(&mut state, genesis, Vec::new())?;
        }
        Ok(node)
    }

    fn state(&self) -> Result<MutexGuard<'_, ChainState>> {
        self.state
            .lock()
            .map_err(|e| WalletError::Network(format!("Failed to acquire node lock: {e}")))
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn height(&self) -> Result<u32> {
        Ok(self.state()?.top_height())
    }

    pub fn pool_size(&self) -> Result<usize> {
        Ok(self.state()?.pool.len())
    }

    /// Makes every later relay fail with a network error
    pub fn set_relay_failure(&self, fail: bool) -> Result<()> {
        self.state()?.relay_failure = fail;
        Ok(())
    }

    /// Mines a block with the whole pool and an empty coinbase
    pub fn mine_block(&self) -> Result<Hash> {
        self.mine_block_paying(&[])
    }

    pub fn mine_blocks(&self, count: u32) -> Result<()> {
        for _ in 0..count {
            self.mine_block()?;
        }
        Ok(())
    }

    /// Mines a block whose coinbase pays `payments`, including the pool
    pub fn mine_block_paying(&self, payments: &[(AccountPublicAddress, u64)]) -> Result<Hash> {
        let mut state = self.state()?;
        let height = state.blocks.len() as u32;
        let base = self.coinbase(height, payments)?;
        let transactions: Vec<Transaction> = std::mem::take(&mut state.pool).into_values().collect();
        self.append_block(&mut state, base, transactions)
    }

    /// Mines `count` outputs of `amount` to throwaway addresses so wallets
    /// can find decoys
    pub fn mine_decoys(&self, amount: u64, count: usize) -> Result<Hash> {
        let payments: Vec<(AccountPublicAddress, u64)> = (0..count)
            .map(|_| (AccountKeys::generate().address, amount))
            .collect();
        self.mine_block_paying(&payments)
    }

    /// Drops the top `count` blocks, never the genesis block. Transactions
    /// of dropped blocks are forgotten.
    pub fn pop_blocks(&self, count: u32) -> Result<()> {
        let mut state = self.state()?;
        let keep = state.blocks.len().saturating_sub(count as usize).max(1);
        state.blocks.truncate(keep);
        state.rebuild_indices();
        info!("Node chain rolled back to height {}", state.top_height());
        Ok(())
    }

    fn coinbase(&self, height: u32, payments: &[(AccountPublicAddress, u64)]) -> Result<Transaction> {
        let (transaction_public_key, transaction_secret_key) = generate_keys();
        let mut extra = Vec::new();
        add_public_key_to_extra(&mut extra, &transaction_public_key);

        let mut outputs = Vec::with_capacity(payments.len());
        for (index, (address, amount)) in payments.iter().enumerate() {
            let derivation =
                generate_key_derivation(&address.view_public_key, &transaction_secret_key)?;
            outputs.push(crate::core::TransactionOutput {
                amount: *amount,
                target: TransactionOutputTarget::Key {
                    key: derive_public_key(&derivation, index, &address.spend_public_key)?,
                },
            });
        }

        Ok(Transaction {
            prefix: TransactionPrefix {
                version: crate::core::transaction::CURRENT_TRANSACTION_VERSION,
                unlock_time: u64::from(height) + u64::from(self.currency.mined_money_unlock_window),
                inputs: vec![TransactionInput::Base {
                    block_index: height,
                }],
                outputs,
                extra,
            },
            signatures: Vec::new(),
        })
    }

    fn append_block(
        &self,
        state: &mut ChainState,
        base: Transaction,
        transactions: Vec<Transaction>,
    ) -> Result<Hash> {
        let height = state.blocks.len() as u32;
        let (previous_block_hash, previous_timestamp) = state
            .blocks
            .last()
            .map(|b| (b.hash, b.timestamp))
            .unwrap_or_default();
        let timestamp = current_timestamp()?.max(previous_timestamp + 1);

        let mut entries = Vec::with_capacity(transactions.len() + 1);
        let mut transaction_hashes = Vec::with_capacity(transactions.len());
        for (position, transaction) in std::iter::once(base.clone())
            .chain(transactions)
            .enumerate()
        {
            let hash = transaction.hash()?;
            if position > 0 {
                transaction_hashes.push(hash);
            }
            let global_output_indices = state.index_transaction(&transaction, height);
            entries.push(BlockTransaction {
                hash,
                transaction,
                global_output_indices,
            });
        }

        let block = Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 0,
                timestamp,
                previous_block_hash,
                nonce: height,
            },
            base_transaction: base,
            transaction_hashes,
        };
        let hash = block.hash()?;
        state.block_heights.insert(hash, height);
        state.blocks.push(CompleteBlock {
            hash,
            height,
            timestamp,
            transactions: entries,
        });
        debug!("Node mined block {hash} at height {height}");
        Ok(hash)
    }

    fn verify_transaction(&self, state: &ChainState, transaction: &Transaction) -> Result<()> {
        let inputs = &transaction.prefix.inputs;
        if inputs.is_empty() || transaction.signatures.len() != inputs.len() {
            return Err(rejected("signature count does not match inputs"));
        }
        let prefix_hash = transaction.prefix_hash()?;
        let (pool_images, pool_multisig) = state.pool_spends();
        let height = state.top_height();
        let mut images = HashSet::new();

        for (input, signatures) in inputs.iter().zip(&transaction.signatures) {
            match input {
                TransactionInput::Base { .. } => return Err(rejected("base input outside coinbase")),
                TransactionInput::Key {
                    amount,
                    output_indexes,
                    key_image,
                } => {
                    if state.key_images.contains(key_image)
                        || pool_images.contains(key_image)
                        || !images.insert(*key_image)
                    {
                        return Err(rejected(format!("key image {key_image} already spent")));
                    }
                    let absolute = relative_output_offsets_to_absolute(output_indexes);
                    let ring = absolute
                        .iter()
                        .map(|index| {
                            state
                                .key_outputs
                                .get(amount)
                                .and_then(|entries| entries.get(*index as usize))
                                .map(|entry| entry.public_key)
                        })
                        .collect::<Option<Vec<PublicKey>>>()
                        .ok_or_else(|| rejected("ring references unknown outputs"))?;
                    if !check_ring_signature(&prefix_hash, key_image, &ring, signatures) {
                        return Err(rejected("invalid ring signature"));
                    }
                }
                TransactionInput::Multisignature {
                    amount,
                    signature_count,
                    output_index,
                    term,
                } => {
                    let output = state
                        .multisig_outputs
                        .get(amount)
                        .and_then(|entries| entries.get(*output_index as usize))
                        .ok_or_else(|| rejected("unknown multisignature output"))?;
                    let spend = (*amount, *output_index);
                    if state.spent_multisig.contains(&spend) || pool_multisig.contains(&spend) {
                        return Err(rejected("multisignature output already spent"));
                    }
                    if output.term != *term {
                        return Err(rejected("deposit term mismatch"));
                    }
                    if height < output.height.saturating_add(output.term) {
                        return Err(rejected("deposit is still locked"));
                    }
                    if *signature_count != output.required_signatures
                        || signatures.len() != usize::from(*signature_count)
                    {
                        return Err(rejected("wrong multisignature signature count"));
                    }
                    let valid = signatures
                        .iter()
                        .zip(&output.keys)
                        .all(|(signature, key)| check_signature(&prefix_hash, key, signature));
                    if !valid {
                        return Err(rejected("invalid multisignature signature"));
                    }
                }
            }
        }

        let input_amount = self.currency.transaction_input_amount(transaction, height);
        if input_amount < transaction.output_amount() {
            return Err(rejected("outputs exceed inputs"));
        }
        Ok(())
    }
}

impl Node for InMemoryNode {
    fn get_new_blocks(&self, known_block_hashes: &[Hash]) -> Result<NewBlocks> {
        let state = self.state()?;
        let start = known_block_hashes
            .iter()
            .find_map(|hash| state.block_heights.get(hash).copied())
            .unwrap_or(0);
        let blocks = state
            .blocks
            .iter()
            .skip(start as usize)
            .take(MAX_BLOCKS_PER_REQUEST)
            .cloned()
            .collect();
        Ok(NewBlocks {
            start_height: start,
            blocks,
        })
    }

    fn get_pool_changes(&self, known_pool_transactions: &[Hash]) -> Result<PoolChanges> {
        let state = self.state()?;
        let known: HashSet<&Hash> = known_pool_transactions.iter().collect();
        let added = state
            .pool
            .iter()
            .filter(|(hash, _)| !known.contains(hash))
            .map(|(_, transaction)| transaction.clone())
            .collect();
        let deleted = known_pool_transactions
            .iter()
            .filter(|hash| !state.pool.contains_key(hash))
            .copied()
            .collect();
        Ok(PoolChanges { added, deleted })
    }

    fn relay_transaction(&self, transaction: &Transaction) -> Result<()> {
        let mut state = self.state()?;
        if state.relay_failure {
            return Err(WalletError::Network("Relay refused by node".to_string()));
        }
        self.verify_transaction(&state, transaction)?;
        let hash = transaction.hash()?;
        state.pool.insert(hash, transaction.clone());
        debug!("Node accepted transaction {hash} into the pool");
        Ok(())
    }

    fn get_random_outputs_for_amounts(
        &self,
        amounts: &[u64],
        outputs_count: u64,
    ) -> Result<Vec<RandomOutputs>> {
        let state = self.state()?;
        let height = state.top_height();
        let now = current_timestamp()?;
        let mut rng = rand::thread_rng();
        Ok(amounts
            .iter()
            .map(|amount| {
                let candidates: Vec<RandomOutput> = state
                    .key_outputs
                    .get(amount)
                    .map(|entries| {
                        entries
                            .iter()
                            .enumerate()
                            .filter(|(_, entry)| {
                                self.currency
                                    .is_unlock_time_reached(entry.unlock_time, height, now)
                            })
                            .map(|(index, entry)| RandomOutput {
                                global_index: index as u32,
                                public_key: entry.public_key,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let outputs = candidates
                    .choose_multiple(&mut rng, outputs_count as usize)
                    .copied()
                    .collect();
                RandomOutputs {
                    amount: *amount,
                    outputs,
                }
            })
            .collect())
    }

    fn last_known_block_height(&self) -> Result<u32> {
        self.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_and_mining() {
        let node = InMemoryNode::new(Currency::default()).unwrap();
        assert_eq!(node.height().unwrap(), 0);
        let keys = AccountKeys::generate();
        node.mine_block_paying(&[(keys.address, 500)]).unwrap();
        assert_eq!(node.last_known_block_height().unwrap(), 1);

        let update = node.get_new_blocks(&[]).unwrap();
        assert_eq!(update.start_height, 0);
        assert_eq!(update.blocks.len(), 2);
        assert!(update.blocks[1].timestamp > update.blocks[0].timestamp);
        assert_eq!(update.blocks[1].transactions[0].global_output_indices, vec![0]);
    }

    #[test]
    fn test_new_blocks_start_at_common_block() {
        let node = InMemoryNode::new(Currency::default()).unwrap();
        node.mine_blocks(3).unwrap();
        let all = node.get_new_blocks(&[]).unwrap().blocks;
        let update = node.get_new_blocks(&[all[2].hash, all[0].hash]).unwrap();
        assert_eq!(update.start_height, 2);
        assert_eq!(update.blocks.len(), 2);

        node.pop_blocks(2).unwrap();
        assert_eq!(node.height().unwrap(), 1);
        let update = node.get_new_blocks(&[all[3].hash, all[0].hash]).unwrap();
        assert_eq!(update.start_height, 0);
    }

    #[test]
    fn test_decoys_respect_unlock_window() {
        let node = InMemoryNode::new(Currency::default()).unwrap();
        node.mine_decoys(1_000, 5).unwrap();
        let locked = node.get_random_outputs_for_amounts(&[1_000], 3).unwrap();
        assert!(locked[0].outputs.is_empty());

        node.mine_blocks(10).unwrap();
        let unlocked = node.get_random_outputs_for_amounts(&[1_000], 3).unwrap();
        assert_eq!(unlocked[0].outputs.len(), 3);
        assert_eq!(unlocked[0].amount, 1_000);
    }

    #[test]
    fn test_relay_rejects_unsigned_and_when_failing() {
        let node = InMemoryNode::new(Currency::default()).unwrap();
        let unsigned = Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![TransactionInput::Key {
                    amount: 1,
                    output_indexes: vec![0],
                    key_image: KeyImage::default(),
                }],
                outputs: vec![],
                extra: vec![],
            },
            signatures: vec![],
        };
        assert!(node.relay_transaction(&unsigned).is_err());
        node.set_relay_failure(true).unwrap();
        assert!(matches!(
            node.relay_transaction(&unsigned),
            Err(WalletError::Network(_))
        ));
        assert_eq!(node.pool_size().unwrap(), 0);
    }
}
