//! Fan-out from one block and pool feed to every consumer
//!
//! Consumers are keyed by view public key and applied in a fixed order, so
//! the event list returned for a batch is deterministic.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::consumer::{AccountSubscription, ConsumerSnapshot, TransfersConsumer, TransfersSubscription};
use super::container::TransfersContainer;
use super::types::{SynchronizationStart, TransfersEvent};
use crate::core::{AccountPublicAddress, CompleteBlock, Currency, Transaction};
use crate::crypto::{Hash, PublicKey};
use crate::error::{Result, WalletError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct SynchronizerSnapshot {
    pub consumers: Vec<ConsumerSnapshot>,
}

pub struct TransfersSynchronizer {
    currency: Currency,
    consumers: BTreeMap<PublicKey, TransfersConsumer>,
}

impl TransfersSynchronizer {
    pub fn new(currency: Currency) -> Self {
        TransfersSynchronizer {
            currency,
            consumers: BTreeMap::new(),
        }
    }

    pub fn add_subscription(&mut self, subscription: AccountSubscription) -> Result<()> {
        let view_public_key = subscription.keys.address.view_public_key;
        let consumer = self.consumers.entry(view_public_key).or_insert_with(|| {
            TransfersConsumer::new(
                self.currency.clone(),
                view_public_key,
                subscription.keys.view_secret_key.clone(),
            )
        });
        consumer.add_subscription(subscription)
    }

    pub fn remove_subscription(&mut self, address: &AccountPublicAddress) -> bool {
        let Some(consumer) = self.consumers.get_mut(&address.view_public_key) else {
            return false;
        };
        if consumer.subscription(address).is_none() {
            return false;
        }
        if consumer.remove_subscription(address) {
            self.consumers.remove(&address.view_public_key);
        }
        true
    }

    pub fn subscriptions(&self) -> Vec<AccountPublicAddress> {
        self.consumers
            .values()
            .flat_map(|consumer| consumer.subscriptions())
            .collect()
    }

    pub fn subscription(&self, address: &AccountPublicAddress) -> Option<&TransfersSubscription> {
        self.consumers
            .get(&address.view_public_key)?
            .subscription(address)
    }

    pub fn container(&self, address: &AccountPublicAddress) -> Option<&TransfersContainer> {
        self.subscription(address).map(|s| s.container())
    }

    pub fn sync_start(&self) -> SynchronizationStart {
        let mut starts = self.consumers.values().map(|c| c.sync_start());
        let Some(first) = starts.next() else {
            return SynchronizationStart::default();
        };
        starts.fold(first, |acc, start| SynchronizationStart {
            timestamp: acc.timestamp.min(start.timestamp),
            height: acc.height.min(start.height),
        })
    }

    pub fn known_pool_transactions(&self) -> BTreeSet<Hash> {
        self.consumers
            .values()
            .flat_map(|c| c.known_pool_transactions().iter().copied())
            .collect()
    }

    pub fn init_transaction_pool(&mut self, uncommitted: &BTreeSet<Hash>) {
        for consumer in self.consumers.values_mut() {
            consumer.init_transaction_pool(uncommitted);
        }
    }

    pub fn add_public_key_seen(
        &mut self,
        address: &AccountPublicAddress,
        transaction_hash: Hash,
        output_key: PublicKey,
    ) {
        if let Some(consumer) = self.consumers.get_mut(&address.view_public_key) {
            consumer.add_public_key_seen(transaction_hash, output_key);
        }
    }

    pub fn on_new_blocks(&mut self, blocks: &[CompleteBlock]) -> Result<Vec<TransfersEvent>> {
        let mut events = Vec::new();
        for consumer in self.consumers.values_mut() {
            events.extend(consumer.on_new_blocks(blocks)?);
        }
        Ok(events)
    }

    pub fn on_pool_updated(
        &mut self,
        added: &[Transaction],
        deleted: &[Hash],
    ) -> Result<Vec<TransfersEvent>> {
        let mut events = Vec::new();
        for consumer in self.consumers.values_mut() {
            events.extend(consumer.on_pool_updated(added, deleted)?);
        }
        Ok(events)
    }

    pub fn on_blockchain_detach(&mut self, height: u32) -> Vec<TransfersEvent> {
        info!("Detaching wallet ledgers from height {height}");
        self.consumers
            .values_mut()
            .flat_map(|consumer| consumer.on_blockchain_detach(height))
            .collect()
    }

    pub fn add_unconfirmed_transaction(
        &mut self,
        hash: Hash,
        transaction: &Transaction,
    ) -> Result<Vec<TransfersEvent>> {
        let mut events = Vec::new();
        for consumer in self.consumers.values_mut() {
            events.extend(consumer.add_unconfirmed_transaction(hash, transaction)?);
        }
        Ok(events)
    }

    pub fn remove_unconfirmed_transaction(&mut self, hash: &Hash) -> Result<Vec<TransfersEvent>> {
        let mut events = Vec::new();
        for consumer in self.consumers.values_mut() {
            events.extend(consumer.remove_unconfirmed_transaction(hash)?);
        }
        Ok(events)
    }

    pub fn snapshot(&self) -> SynchronizerSnapshot {
        SynchronizerSnapshot {
            consumers: self.consumers.values().map(|c| c.snapshot()).collect(),
        }
    }

    /// Loads ledgers saved by [`snapshot`](Self::snapshot); subscriptions
    /// must be registered first
    pub fn restore(&mut self, snapshot: SynchronizerSnapshot) -> Result<()> {
        for state in snapshot.consumers {
            let consumer = self.consumers.get_mut(&state.view_public_key).ok_or_else(|| {
                WalletError::Internal(format!(
                    "Snapshot references unknown view key {}",
                    state.view_public_key
                ))
            })?;
            consumer.restore(state)?;
        }
        Ok(())
    }
}
