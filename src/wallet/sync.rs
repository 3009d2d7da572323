//! Chain and pool synchronization
//!
//! The wallet keeps the hashes of every block it has seen. Each round asks
//! the node for blocks after the newest hash both sides share, detaches the
//! ledgers where the node disagrees and feeds the rest to the
//! synchronizer. Ledger events are then folded into the history index.

use log::{debug, info};
use std::collections::BTreeSet;

use super::events::WalletEvent;
use super::index::{AccountChange, TransactionChange};
use super::types::WalletTransaction;
use super::wallet::{Wallet, WalletData};
use crate::core::{CompleteBlock, Currency};
use crate::crypto::Hash;
use crate::error::{Result, WalletError};
use crate::network::NewBlocks;
use crate::transfers::{IncludeFlags, TransfersEvent, UNCONFIRMED_TRANSACTION_HEIGHT};
use crate::utils::current_timestamp;

const DENSE_HASH_COUNT: usize = 10;

/// Known hashes newest first: the last ten, then doubling gaps, always
/// ending with the genesis hash
pub(super) fn sparse_chain(known: &[Hash]) -> Vec<Hash> {
    let Some(top) = known.len().checked_sub(1) else {
        return Vec::new();
    };
    let mut chain = Vec::new();
    let mut offset = 0usize;
    let mut step = 1usize;
    while offset <= top {
        chain.push(known[top - offset]);
        if chain.len() >= DENSE_HASH_COUNT {
            step = step.saturating_mul(2);
        }
        offset = offset.saturating_add(step);
    }
    if chain.last() != Some(&known[0]) {
        chain.push(known[0]);
    }
    chain
}

// First height some subscription still has to process
fn resume_height(data: &WalletData) -> usize {
    let known = data.known_blocks.len();
    data.accounts
        .iter()
        .map(|account| {
            data.synchronizer
                .subscription(&account.keys.address)
                .and_then(|s| s.processed_height())
                .map_or(0, |height| height as usize + 1)
        })
        .min()
        .unwrap_or(known)
        .min(known)
}

pub(super) fn uncommitted_hashes(data: &WalletData) -> Result<BTreeSet<Hash>> {
    data.index
        .uncommitted()
        .values()
        .map(|transaction| transaction.hash())
        .collect()
}

/// Fusion check from the ledger view: zero fee, key inputs and outputs
/// only, canonical outputs of the input total
pub(super) fn detect_fusion(
    currency: &Currency,
    data: &WalletData,
    transaction: &WalletTransaction,
) -> Result<bool> {
    if transaction.fee != 0 || transaction.is_base {
        return Ok(false);
    }
    let hash = &transaction.hash;
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut totals = None;
    for account in 0..data.accounts.len() {
        let container = data.container(account)?;
        let Some((info, _, _)) = container.transaction_information(hash) else {
            continue;
        };
        inputs.extend(
            container
                .transaction_inputs(hash, IncludeFlags::TYPE_KEY)
                .iter()
                .map(|o| o.amount),
        );
        outputs.extend(
            container
                .transaction_outputs(hash, IncludeFlags::TYPE_KEY | IncludeFlags::STATE_ALL)
                .iter()
                .map(|o| o.amount),
        );
        totals = Some((info.total_amount_in, info.total_amount_out));
    }

    let Some((total_in, total_out)) = totals else {
        return Ok(false);
    };
    let sum = |amounts: &[u64]| amounts.iter().fold(0u64, |s, a| s.saturating_add(*a));
    if sum(&inputs) != total_in || sum(&outputs) != total_out {
        return Ok(false);
    }
    outputs.sort_unstable();
    Ok(currency.is_fusion_transaction_amounts(&inputs, &outputs, 0))
}

impl Wallet {
    /// Pulls new blocks and pool changes from the node. Returns the number
    /// of blocks the wallet knows afterwards.
    pub fn synchronize(&self) -> Result<u32> {
        let _operation = self.begin_operation()?;
        self.read().data()?;
        let node_height = self.node_call(|node| node.last_known_block_height())?;

        loop {
            self.check_stopped()?;
            let (request, resume) = {
                let inner = self.read();
                let data = inner.data()?;
                let resume = resume_height(data);
                (sparse_chain(&data.known_blocks[..resume]), resume)
            };
            let update = self.node_call(move |node| node.get_new_blocks(&request))?;
            self.check_stopped()?;
            if !self.apply_blocks(update, resume, node_height)? {
                break;
            }
        }

        self.check_stopped()?;
        self.sync_pool()?;

        let block_count = self.read().data()?.known_blocks.len() as u32;
        self.events.push(WalletEvent::SyncCompleted);
        info!("Wallet synchronized, {block_count} blocks known");
        Ok(block_count)
    }

    /// Applies one node answer; false once there is nothing left to do
    fn apply_blocks(&self, update: NewBlocks, resume: usize, node_height: u32) -> Result<bool> {
        let mut inner = self.write();
        let data = inner.data_mut()?;
        let mut events = Vec::new();
        let mut fresh: Vec<CompleteBlock> = Vec::new();
        let mut applied = 0usize;
        let mut detached = false;
        let mut last_height = None;

        for (offset, block) in update.blocks.into_iter().enumerate() {
            let height = update.start_height as usize + offset;
            if block.height as usize != height {
                return Err(WalletError::Network(format!(
                    "Node returned block {} at position {height}",
                    block.height
                )));
            }
            last_height = Some(height);

            if height < data.known_blocks.len() {
                if data.known_blocks[height] == block.hash {
                    // only subscriptions lagging behind still want it
                    if height >= resume {
                        fresh.push(block);
                    }
                    continue;
                }
                applied += Self::feed_blocks(data, &mut fresh, &mut events)?;
                Self::detach(data, height as u32, &mut events);
                detached = true;
            }
            if height > data.known_blocks.len() {
                return Err(WalletError::Network(format!(
                    "Node skipped blocks before height {height}"
                )));
            }
            data.known_blocks.push(block.hash);
            fresh.push(block);
        }
        applied += Self::feed_blocks(data, &mut fresh, &mut events)?;

        // the node chain ends below ours and nothing replaced the tail
        if let Some(last) = last_height {
            if !detached && last + 1 < data.known_blocks.len() && last as u32 >= node_height {
                Self::detach(data, last as u32 + 1, &mut events);
                detached = true;
            }
        }

        self.handle_transfers_events(data, events)?;
        if applied > 0 || detached {
            self.events.push(WalletEvent::SyncProgressUpdated {
                processed: data.known_blocks.len() as u32,
                total: node_height.saturating_add(1),
            });
        }
        if !data.known_blocks.is_empty() && data.index.unlock_due(data.top_height()) {
            self.events.push(WalletEvent::BalanceUnlocked);
        }
        Ok(applied > 0 || detached)
    }

    fn feed_blocks(
        data: &mut WalletData,
        fresh: &mut Vec<CompleteBlock>,
        events: &mut Vec<TransfersEvent>,
    ) -> Result<usize> {
        if fresh.is_empty() {
            return Ok(0);
        }
        events.extend(data.synchronizer.on_new_blocks(fresh)?);
        let count = fresh.len();
        debug!(
            "Processed {count} blocks up to height {}",
            fresh.last().map_or(0, |b| b.height)
        );
        fresh.clear();
        Ok(count)
    }

    fn detach(data: &mut WalletData, height: u32, events: &mut Vec<TransfersEvent>) {
        data.known_blocks.truncate(height as usize);
        events.extend(data.synchronizer.on_blockchain_detach(height));
        info!("Blockchain switched, wallet detached at height {height}");
    }

    fn sync_pool(&self) -> Result<()> {
        let known: Vec<Hash> = {
            let inner = self.read();
            let data = inner.data()?;
            let uncommitted = uncommitted_hashes(data)?;
            data.synchronizer
                .known_pool_transactions()
                .into_iter()
                .filter(|hash| !uncommitted.contains(hash))
                .collect()
        };
        let changes = self.node_call(move |node| node.get_pool_changes(&known))?;
        self.check_stopped()?;

        let mut inner = self.write();
        let data = inner.data_mut()?;
        let uncommitted = uncommitted_hashes(data)?;
        let deleted: Vec<Hash> = changes
            .deleted
            .into_iter()
            .filter(|hash| !uncommitted.contains(hash))
            .collect();
        if changes.added.is_empty() && deleted.is_empty() {
            return Ok(());
        }
        debug!(
            "Pool changed: {} added, {} deleted",
            changes.added.len(),
            deleted.len()
        );
        let events = data.synchronizer.on_pool_updated(&changes.added, &deleted)?;
        self.handle_transfers_events(data, events)
    }

    /// Folds ledger events into the history and queues the wallet events
    pub(super) fn handle_transfers_events(
        &self,
        data: &mut WalletData,
        events: Vec<TransfersEvent>,
    ) -> Result<()> {
        for event in events {
            match event {
                TransfersEvent::TransactionUpdated {
                    transaction_hash, ..
                } => {
                    if let Some(event) = self.transaction_updated(data, &transaction_hash)? {
                        self.events.push(event);
                    }
                }
                TransfersEvent::TransactionDeleted {
                    transaction_hash, ..
                } => {
                    let still_known = (0..data.accounts.len()).any(|account| {
                        data.container(account)
                            .is_ok_and(|c| c.contains_transaction(&transaction_hash))
                    });
                    let event = if still_known {
                        self.transaction_updated(data, &transaction_hash)?
                    } else {
                        data.index.transaction_deleted(&transaction_hash)
                    };
                    if let Some(event) = event {
                        self.events.push(event);
                    }
                }
                TransfersEvent::TransfersUnlocked { transfers, .. } => {
                    if data.index.set_deposits_locked(&transfers, false) > 0 {
                        self.events.push(WalletEvent::BalanceUnlocked);
                    }
                }
                TransfersEvent::TransfersLocked { transfers, .. } => {
                    data.index.set_deposits_locked(&transfers, true);
                }
                TransfersEvent::BlocksAdded { .. }
                | TransfersEvent::BlockchainDetached { .. }
                | TransfersEvent::TransactionDeleteBegin { .. }
                | TransfersEvent::TransactionDeleteEnd { .. } => {}
            }
        }
        Ok(())
    }

    fn transaction_updated(
        &self,
        data: &mut WalletData,
        hash: &Hash,
    ) -> Result<Option<WalletEvent>> {
        let mut info = None;
        let mut accounts = Vec::new();
        for account in 0..data.accounts.len() {
            let container = data.container(account)?;
            let Some((transaction_info, input, output)) = container.transaction_information(hash)
            else {
                continue;
            };
            accounts.push(AccountChange {
                address: data.address_string(&self.currency, account),
                input,
                output,
                deposits: container
                    .transaction_outputs(hash, IncludeFlags::TYPE_DEPOSIT | IncludeFlags::STATE_ALL),
                spent_deposits: container.transaction_inputs(hash, IncludeFlags::TYPE_DEPOSIT),
            });
            info.get_or_insert(transaction_info);
        }
        let Some(info) = info else {
            return Ok(None);
        };

        let unlock_height = if info.block_height == UNCONFIRMED_TRANSACTION_HEIGHT {
            UNCONFIRMED_TRANSACTION_HEIGHT
        } else {
            let soft_lock = self
                .settings
                .transaction_soft_lock_time
                .max(self.currency.transaction_spendable_age);
            info.block_height.saturating_add(soft_lock).max(
                self.currency.unlock_time_to_height(
                    info.unlock_time,
                    info.block_height,
                    current_timestamp()?,
                ),
            )
        };

        let applied = data.index.apply_transaction(
            &TransactionChange {
                info,
                accounts,
                unlock_height,
            },
            &self.currency,
        );
        if applied.created {
            let transaction = data.index.transaction(applied.transaction_id)?.clone();
            let is_fusion = detect_fusion(&self.currency, data, &transaction)?;
            data.index
                .cache_fusion_status(applied.transaction_id, is_fusion);
        }
        Ok(applied.event())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::fast_hash;

    fn chain(length: usize) -> Vec<Hash> {
        (0..length).map(|i| fast_hash(&i.to_le_bytes())).collect()
    }

    #[test]
    fn test_sparse_chain_short() {
        assert!(sparse_chain(&[]).is_empty());
        let known = chain(3);
        assert_eq!(sparse_chain(&known), vec![known[2], known[1], known[0]]);
    }

    #[test]
    fn test_sparse_chain_long() {
        let known = chain(100);
        let sparse = sparse_chain(&known);
        assert_eq!(sparse[..10], known[90..].iter().rev().copied().collect::<Vec<_>>()[..]);
        assert_eq!(sparse[10], known[99 - 11]);
        assert_eq!(sparse[11], known[99 - 15]);
        assert_eq!(*sparse.last().unwrap(), known[0]);
        assert!(sparse.len() < 20);
    }
}
