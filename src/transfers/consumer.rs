//! Per view key block consumer
//!
//! All addresses of a wallet share one view key, so a single output scan
//! per transaction is enough to find outputs for every subscribed address:
//! the view key recovers the spend key an output pays to and the spend key
//! picks the subscription.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::container::{ContainerSnapshot, TransfersContainer};
use super::types::{
    OutputKind, SynchronizationStart, TransactionBlockInfo, TransactionOutputInformation,
    TransfersEvent, UNCONFIRMED_GLOBAL_OUTPUT_INDEX,
};
use crate::core::{
    AccountKeys, AccountPublicAddress, CompleteBlock, Currency, Transaction,
    TransactionOutputTarget,
};
use crate::crypto::{
    derive_secret_key, generate_key_derivation, generate_key_image, underive_public_key, Hash,
    KeyDerivation, KeyImage, PublicKey, SecretKey,
};
use crate::error::{Result, WalletError};

/// What the wallet registers for each address it tracks
#[derive(Debug, Clone)]
pub struct AccountSubscription {
    pub keys: AccountKeys,
    pub sync_start: SynchronizationStart,
    pub transaction_spendable_age: u32,
}

/// One tracked address and its ledger
#[derive(Debug, Clone)]
pub struct TransfersSubscription {
    subscription: AccountSubscription,
    container: TransfersContainer,
    processed_height: Option<u32>,
}

impl TransfersSubscription {
    fn new(currency: &Currency, subscription: AccountSubscription) -> Self {
        let container =
            TransfersContainer::new(currency.clone(), subscription.transaction_spendable_age);
        TransfersSubscription {
            subscription,
            container,
            processed_height: None,
        }
    }

    pub fn address(&self) -> AccountPublicAddress {
        self.subscription.keys.address
    }

    pub fn keys(&self) -> &AccountKeys {
        &self.subscription.keys
    }

    pub fn sync_start(&self) -> SynchronizationStart {
        self.subscription.sync_start
    }

    pub fn container(&self) -> &TransfersContainer {
        &self.container
    }

    /// Last block height applied to this subscription
    pub fn processed_height(&self) -> Option<u32> {
        self.processed_height
    }

    fn wants_block(&self, height: u32) -> bool {
        self.processed_height.map_or(true, |processed| height > processed)
    }

    fn scans_block(&self, height: u32, timestamp: u64) -> bool {
        let start = self.subscription.sync_start;
        height >= start.height && (start.timestamp == 0 || timestamp >= start.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct SubscriptionSnapshot {
    pub address: AccountPublicAddress,
    pub processed_height: Option<u32>,
    pub container: ContainerSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct ConsumerSnapshot {
    pub view_public_key: PublicKey,
    pub seen_output_keys: Vec<(PublicKey, Hash)>,
    pub pool_transactions: Vec<Hash>,
    pub subscriptions: Vec<SubscriptionSnapshot>,
}

pub struct TransfersConsumer {
    currency: Currency,
    view_public_key: PublicKey,
    view_secret_key: SecretKey,
    // spend public key -> subscription
    subscriptions: BTreeMap<PublicKey, TransfersSubscription>,
    seen_output_keys: HashMap<PublicKey, Hash>,
    pool_transactions: BTreeSet<Hash>,
}

impl TransfersConsumer {
    pub fn new(currency: Currency, view_public_key: PublicKey, view_secret_key: SecretKey) -> Self {
        TransfersConsumer {
            currency,
            view_public_key,
            view_secret_key,
            subscriptions: BTreeMap::new(),
            seen_output_keys: HashMap::new(),
            pool_transactions: BTreeSet::new(),
        }
    }

    pub fn view_public_key(&self) -> PublicKey {
        self.view_public_key
    }

    pub fn add_subscription(&mut self, subscription: AccountSubscription) -> Result<()> {
        let address = subscription.keys.address;
        if address.view_public_key != self.view_public_key
            || subscription.keys.view_secret_key != self.view_secret_key
        {
            return Err(WalletError::Internal(
                "Subscription view key does not match its consumer".to_string(),
            ));
        }
        if !self.subscriptions.contains_key(&address.spend_public_key) {
            self.subscriptions.insert(
                address.spend_public_key,
                TransfersSubscription::new(&self.currency, subscription),
            );
        }
        Ok(())
    }

    /// Returns true when no subscription is left
    pub fn remove_subscription(&mut self, address: &AccountPublicAddress) -> bool {
        self.subscriptions.remove(&address.spend_public_key);
        self.subscriptions.is_empty()
    }

    pub fn subscription(&self, address: &AccountPublicAddress) -> Option<&TransfersSubscription> {
        self.subscriptions
            .get(&address.spend_public_key)
            .filter(|s| s.address() == *address)
    }

    pub fn subscriptions(&self) -> Vec<AccountPublicAddress> {
        self.subscriptions.values().map(|s| s.address()).collect()
    }

    /// Earliest start over every subscription
    pub fn sync_start(&self) -> SynchronizationStart {
        let mut subscriptions = self.subscriptions.values().map(|s| s.sync_start());
        let Some(first) = subscriptions.next() else {
            return SynchronizationStart::default();
        };
        subscriptions.fold(first, |acc, start| SynchronizationStart {
            timestamp: acc.timestamp.min(start.timestamp),
            height: acc.height.min(start.height),
        })
    }

    pub fn known_pool_transactions(&self) -> &BTreeSet<Hash> {
        &self.pool_transactions
    }

    /// Seeds the pool set with transactions built but not yet relayed
    pub fn init_transaction_pool(&mut self, uncommitted: &BTreeSet<Hash>) {
        self.pool_transactions.extend(uncommitted.iter().copied());
    }

    pub fn add_public_key_seen(&mut self, transaction_hash: Hash, output_key: PublicKey) {
        self.seen_output_keys.insert(output_key, transaction_hash);
    }

    pub fn on_new_blocks(&mut self, blocks: &[CompleteBlock]) -> Result<Vec<TransfersEvent>> {
        let mut events = Vec::new();
        let mut block_hashes = Vec::with_capacity(blocks.len());

        for block in blocks {
            if self.subscriptions.values().any(|s| s.wants_block(block.height)) {
                for (index, entry) in block.transactions.iter().enumerate() {
                    let info = TransactionBlockInfo::confirmed(
                        block.height,
                        block.timestamp,
                        index as u32,
                    );
                    events.extend(self.process_transaction(
                        &info,
                        entry.hash,
                        &entry.transaction,
                        &entry.global_output_indices,
                    )?);
                }
                for subscription in self.subscriptions.values_mut() {
                    if !subscription.wants_block(block.height) {
                        continue;
                    }
                    let unlocked = subscription.container.advance_height(block.height);
                    subscription.processed_height = Some(block.height);
                    if !unlocked.is_empty() {
                        events.push(TransfersEvent::TransfersUnlocked {
                            address: subscription.address(),
                            transfers: unlocked,
                        });
                    }
                }
            }
            block_hashes.push(block.hash);
        }

        if !block_hashes.is_empty() {
            events.push(TransfersEvent::BlocksAdded {
                view_public_key: self.view_public_key,
                block_hashes,
            });
        }
        Ok(events)
    }

    pub fn on_pool_updated(
        &mut self,
        added: &[Transaction],
        deleted: &[Hash],
    ) -> Result<Vec<TransfersEvent>> {
        let mut events = Vec::new();
        for hash in deleted {
            self.pool_transactions.remove(hash);
            events.extend(self.delete_unconfirmed(hash)?);
        }
        for transaction in added {
            let hash = transaction.hash()?;
            self.pool_transactions.insert(hash);
            events.extend(self.process_transaction(
                &TransactionBlockInfo::unconfirmed(),
                hash,
                transaction,
                &[],
            )?);
        }
        Ok(events)
    }

    pub fn on_blockchain_detach(&mut self, height: u32) -> Vec<TransfersEvent> {
        let mut events = Vec::new();
        let mut deleted = BTreeSet::new();
        for subscription in self.subscriptions.values_mut() {
            if subscription.processed_height.map_or(true, |h| h < height) {
                continue;
            }
            let result = subscription.container.detach(height);
            subscription.processed_height = height.checked_sub(1);
            let address = subscription.address();
            for transaction_hash in result.deleted_transactions {
                deleted.insert(transaction_hash);
                events.push(TransfersEvent::TransactionDeleted {
                    address,
                    transaction_hash,
                });
            }
            if !result.locked_transfers.is_empty() {
                events.push(TransfersEvent::TransfersLocked {
                    address,
                    transfers: result.locked_transfers,
                });
            }
        }
        self.seen_output_keys.retain(|_, hash| !deleted.contains(hash));
        events.push(TransfersEvent::BlockchainDetached {
            view_public_key: self.view_public_key,
            height,
        });
        debug!(
            "Consumer {} detached at height {height}",
            self.view_public_key
        );
        events
    }

    /// Feeds a locally built transaction into the ledgers before relay
    pub fn add_unconfirmed_transaction(
        &mut self,
        hash: Hash,
        transaction: &Transaction,
    ) -> Result<Vec<TransfersEvent>> {
        self.pool_transactions.insert(hash);
        self.process_transaction(&TransactionBlockInfo::unconfirmed(), hash, transaction, &[])
    }

    pub fn remove_unconfirmed_transaction(&mut self, hash: &Hash) -> Result<Vec<TransfersEvent>> {
        self.pool_transactions.remove(hash);
        let mut events = vec![TransfersEvent::TransactionDeleteBegin {
            view_public_key: self.view_public_key,
            transaction_hash: *hash,
        }];
        events.extend(self.delete_unconfirmed(hash)?);
        events.push(TransfersEvent::TransactionDeleteEnd {
            view_public_key: self.view_public_key,
            transaction_hash: *hash,
        });
        Ok(events)
    }

    fn delete_unconfirmed(&mut self, hash: &Hash) -> Result<Vec<TransfersEvent>> {
        let mut events = Vec::new();
        for subscription in self.subscriptions.values_mut() {
            if subscription.container.delete_unconfirmed_transaction(hash)? {
                events.push(TransfersEvent::TransactionDeleted {
                    address: subscription.address(),
                    transaction_hash: *hash,
                });
            }
        }
        if !events.is_empty() {
            self.seen_output_keys.retain(|_, seen| seen != hash);
        }
        Ok(events)
    }

    fn process_transaction(
        &mut self,
        block: &TransactionBlockInfo,
        hash: Hash,
        transaction: &Transaction,
        global_indices: &[u32],
    ) -> Result<Vec<TransfersEvent>> {
        let mut found = self.preprocess_outputs(block, hash, transaction, global_indices)?;
        let mut events = Vec::new();
        let mut updated = Vec::new();

        for (spend_key, subscription) in self.subscriptions.iter_mut() {
            if block.is_confirmed()
                && (!subscription.wants_block(block.height)
                    || !subscription.scans_block(block.height, block.timestamp))
            {
                continue;
            }
            let address = subscription.address();
            let outputs = found.remove(spend_key).unwrap_or_default();

            if block.is_confirmed() {
                for conflict in subscription
                    .container
                    .conflicting_unconfirmed_transactions(transaction)
                {
                    if conflict == hash {
                        continue;
                    }
                    warn!("Transaction {hash} replaces pool transaction {conflict}");
                    if subscription.container.delete_unconfirmed_transaction(&conflict)? {
                        events.push(TransfersEvent::TransactionDeleted {
                            address,
                            transaction_hash: conflict,
                        });
                    }
                }
            }

            let changed = if subscription.container.contains_transaction(&hash) {
                block.is_confirmed()
                    && subscription.container.mark_transaction_confirmed(
                        block,
                        &hash,
                        global_indices,
                    )?
            } else {
                subscription
                    .container
                    .add_transaction(block, hash, transaction, &outputs)?
            };

            if changed {
                for output in &outputs {
                    self.seen_output_keys.insert(output.output_key, hash);
                }
                updated.push(address);
            }
        }

        if !updated.is_empty() {
            events.push(TransfersEvent::TransactionUpdated {
                view_public_key: self.view_public_key,
                transaction_hash: hash,
                accounts: updated,
            });
        }
        Ok(events)
    }

    /// Finds the outputs of `transaction` paying any subscribed address,
    /// grouped by spend public key
    fn preprocess_outputs(
        &self,
        block: &TransactionBlockInfo,
        hash: Hash,
        transaction: &Transaction,
        global_indices: &[u32],
    ) -> Result<HashMap<PublicKey, Vec<TransactionOutputInformation>>> {
        let mut found: HashMap<PublicKey, Vec<TransactionOutputInformation>> = HashMap::new();
        let Some(transaction_public_key) = transaction.public_key() else {
            return Ok(found);
        };
        let Ok(derivation) = generate_key_derivation(&transaction_public_key, &self.view_secret_key)
        else {
            return Ok(found);
        };

        for (index, output) in transaction.prefix.outputs.iter().enumerate() {
            let global_output_index = if block.is_confirmed() {
                *global_indices.get(index).ok_or_else(|| {
                    WalletError::Internal(format!(
                        "Missing global index for output {index} of {hash}"
                    ))
                })?
            } else {
                UNCONFIRMED_GLOBAL_OUTPUT_INDEX
            };

            let candidates: Vec<PublicKey> = match &output.target {
                TransactionOutputTarget::Key { key } => vec![*key],
                TransactionOutputTarget::Multisignature { keys, .. } => keys.clone(),
            };
            let Some((spend_key, output_key)) = candidates
                .iter()
                .find_map(|key| self.owner_of(&derivation, index, key).map(|owner| (owner, *key)))
            else {
                continue;
            };

            if let Some(seen) = self.seen_output_keys.get(&output_key) {
                if *seen != hash {
                    warn!(
                        "Output key {output_key} of {hash} was already seen in {seen}, ignoring it"
                    );
                    continue;
                }
            }

            let kind = match &output.target {
                TransactionOutputTarget::Key { .. } => OutputKind::Key {
                    key_image: self.key_image(&spend_key, &derivation, index, &output_key)?,
                },
                TransactionOutputTarget::Multisignature {
                    required_signatures,
                    term,
                    ..
                } => OutputKind::Multisignature {
                    required_signatures: *required_signatures,
                    term: *term,
                },
            };

            found
                .entry(spend_key)
                .or_default()
                .push(TransactionOutputInformation {
                    transaction_hash: hash,
                    output_in_transaction: index as u32,
                    amount: output.amount,
                    global_output_index,
                    output_key,
                    transaction_public_key,
                    kind,
                });
        }
        Ok(found)
    }

    fn owner_of(
        &self,
        derivation: &KeyDerivation,
        index: usize,
        output_key: &PublicKey,
    ) -> Option<PublicKey> {
        let spend_key = underive_public_key(derivation, index, output_key).ok()?;
        self.subscriptions
            .contains_key(&spend_key)
            .then_some(spend_key)
    }

    fn key_image(
        &self,
        spend_key: &PublicKey,
        derivation: &KeyDerivation,
        index: usize,
        output_key: &PublicKey,
    ) -> Result<KeyImage> {
        let secret = self
            .subscriptions
            .get(spend_key)
            .and_then(|s| s.keys().spend_secret_key.as_ref());
        match secret {
            Some(secret) => {
                let ephemeral = derive_secret_key(derivation, index, secret)?;
                generate_key_image(output_key, &ephemeral)
            }
            None => Ok(KeyImage::default()),
        }
    }

    pub fn snapshot(&self) -> ConsumerSnapshot {
        let mut seen_output_keys: Vec<(PublicKey, Hash)> = self
            .seen_output_keys
            .iter()
            .map(|(key, hash)| (*key, *hash))
            .collect();
        seen_output_keys.sort();
        ConsumerSnapshot {
            view_public_key: self.view_public_key,
            seen_output_keys,
            pool_transactions: self.pool_transactions.iter().copied().collect(),
            subscriptions: self
                .subscriptions
                .values()
                .map(|s| SubscriptionSnapshot {
                    address: s.address(),
                    processed_height: s.processed_height,
                    container: s.container.to_snapshot(),
                })
                .collect(),
        }
    }

    /// Restores ledgers into subscriptions that were already re-added
    pub fn restore(&mut self, snapshot: ConsumerSnapshot) -> Result<()> {
        for state in snapshot.subscriptions {
            let Some(subscription) = self
                .subscriptions
                .get_mut(&state.address.spend_public_key)
            else {
                return Err(WalletError::Internal(format!(
                    "Snapshot references unknown address {}",
                    state.address.spend_public_key
                )));
            };
            subscription.container = TransfersContainer::from_snapshot(
                self.currency.clone(),
                subscription.subscription.transaction_spendable_age,
                state.container,
            )?;
            subscription.processed_height = state.processed_height;
        }
        self.seen_output_keys = snapshot.seen_output_keys.into_iter().collect();
        self.pool_transactions = snapshot.pool_transactions.into_iter().collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BlockTransaction, TransactionOutput, TransactionPrefix};
    use crate::core::transaction::add_public_key_to_extra;
    use crate::crypto::{derive_public_key, fast_hash, generate_keys};
    use crate::transfers::IncludeFlags;

    fn subscription(keys: &AccountKeys) -> AccountSubscription {
        AccountSubscription {
            keys: keys.clone(),
            sync_start: SynchronizationStart::default(),
            transaction_spendable_age: 1,
        }
    }

    fn wallet_pair() -> (AccountKeys, AccountKeys) {
        let first = AccountKeys::generate();
        let (spend_public_key, spend_secret_key) = generate_keys();
        let second = AccountKeys {
            address: AccountPublicAddress {
                spend_public_key,
                view_public_key: first.address.view_public_key,
            },
            spend_secret_key: Some(spend_secret_key),
            view_secret_key: first.view_secret_key.clone(),
        };
        (first, second)
    }

    fn payment(to: &[(&AccountPublicAddress, u64)], salt: u8) -> Transaction {
        let (tx_public, tx_secret) = generate_keys();
        let mut extra = Vec::new();
        add_public_key_to_extra(&mut extra, &tx_public);
        let outputs = to
            .iter()
            .enumerate()
            .map(|(index, (address, amount))| {
                let derivation =
                    generate_key_derivation(&address.view_public_key, &tx_secret).unwrap();
                TransactionOutput {
                    amount: *amount,
                    target: TransactionOutputTarget::Key {
                        key: derive_public_key(&derivation, index, &address.spend_public_key)
                            .unwrap(),
                    },
                }
            })
            .collect();
        Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![crate::core::TransactionInput::Base {
                    block_index: u32::from(salt),
                }],
                outputs,
                extra,
            },
            signatures: vec![],
        }
    }

    fn block(height: u32, transactions: Vec<Transaction>) -> CompleteBlock {
        let mut next_global = height * 10;
        CompleteBlock {
            hash: fast_hash(format!("block-{height}").as_bytes()),
            height,
            timestamp: 1_000 + u64::from(height),
            transactions: transactions
                .into_iter()
                .map(|transaction| {
                    let count = transaction.prefix.outputs.len() as u32;
                    let global_output_indices = (next_global..next_global + count).collect();
                    next_global += count;
                    BlockTransaction {
                        hash: transaction.hash().unwrap(),
                        transaction,
                        global_output_indices,
                    }
                })
                .collect(),
        }
    }

    fn consumer_for(keys: &AccountKeys) -> TransfersConsumer {
        TransfersConsumer::new(
            Currency::default(),
            keys.address.view_public_key,
            keys.view_secret_key.clone(),
        )
    }

    #[test]
    fn test_one_scan_fans_out_to_every_address() {
        let (first, second) = wallet_pair();
        let mut consumer = consumer_for(&first);
        consumer.add_subscription(subscription(&first)).unwrap();
        consumer.add_subscription(subscription(&second)).unwrap();

        let tx = payment(&[(&first.address, 700), (&second.address, 300)], 1);
        let events = consumer.on_new_blocks(&[block(1, vec![tx])]).unwrap();

        let updated = events
            .iter()
            .find_map(|e| match e {
                TransfersEvent::TransactionUpdated { accounts, .. } => Some(accounts.len()),
                _ => None,
            })
            .unwrap();
        assert_eq!(updated, 2);
        let first_balance = consumer
            .subscription(&first.address)
            .unwrap()
            .container()
            .balance(IncludeFlags::ALL);
        assert_eq!(first_balance, 700);
        assert!(matches!(events.last(), Some(TransfersEvent::BlocksAdded { .. })));
    }

    #[test]
    fn test_pool_then_block_counts_once() {
        let keys = AccountKeys::generate();
        let mut consumer = consumer_for(&keys);
        consumer.add_subscription(subscription(&keys)).unwrap();

        let tx = payment(&[(&keys.address, 500)], 2);
        consumer.on_pool_updated(&[tx.clone()], &[]).unwrap();
        let container = consumer.subscription(&keys.address).unwrap().container();
        assert_eq!(container.balance(IncludeFlags::ALL), 500);
        assert_eq!(container.unconfirmed_transactions().len(), 1);

        consumer.on_new_blocks(&[block(1, vec![tx.clone()])]).unwrap();
        // the pool echo after confirmation is a no-op
        consumer.on_pool_updated(&[tx], &[]).unwrap();
        let container = consumer.subscription(&keys.address).unwrap().container();
        assert_eq!(container.balance(IncludeFlags::ALL), 500);
        assert_eq!(container.transfers_count(), 1);
        assert!(container.unconfirmed_transactions().is_empty());
        container.verify_consistency().unwrap();
    }

    #[test]
    fn test_duplicate_output_key_is_ignored() {
        let keys = AccountKeys::generate();
        let mut consumer = consumer_for(&keys);
        consumer.add_subscription(subscription(&keys)).unwrap();

        let original = payment(&[(&keys.address, 100)], 3);
        let mut copy = original.clone();
        copy.prefix.inputs = vec![crate::core::TransactionInput::Base { block_index: 99 }];
        consumer
            .on_new_blocks(&[block(1, vec![original]), block(2, vec![copy])])
            .unwrap();
        let container = consumer.subscription(&keys.address).unwrap().container();
        assert_eq!(container.balance(IncludeFlags::ALL), 100);
    }

    #[test]
    fn test_tracking_subscription_has_no_key_images() {
        let keys = AccountKeys::generate();
        let tracking = AccountKeys::tracking(
            keys.address.spend_public_key,
            keys.view_secret_key.clone(),
        )
        .unwrap();
        let mut consumer = consumer_for(&keys);
        consumer.add_subscription(subscription(&tracking)).unwrap();

        let tx = payment(&[(&keys.address, 40)], 4);
        consumer.on_new_blocks(&[block(1, vec![tx])]).unwrap();
        let outputs = consumer
            .subscription(&keys.address)
            .unwrap()
            .container()
            .outputs(IncludeFlags::ALL);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].key_image(), Some(&KeyImage::default()));
    }

    #[test]
    fn test_detach_reports_deleted_transactions() {
        let keys = AccountKeys::generate();
        let mut consumer = consumer_for(&keys);
        consumer.add_subscription(subscription(&keys)).unwrap();
        let tx = payment(&[(&keys.address, 80)], 5);
        let hash = tx.hash().unwrap();
        consumer
            .on_new_blocks(&[block(1, vec![]), block(2, vec![tx])])
            .unwrap();

        let events = consumer.on_blockchain_detach(2);
        assert!(events.contains(&TransfersEvent::TransactionDeleted {
            address: keys.address,
            transaction_hash: hash,
        }));
        let subscription = consumer.subscription(&keys.address).unwrap();
        assert_eq!(subscription.processed_height(), Some(1));
        assert_eq!(subscription.container().balance(IncludeFlags::ALL), 0);
    }

    #[test]
    fn test_rejects_foreign_view_key() {
        let keys = AccountKeys::generate();
        let other = AccountKeys::generate();
        let mut consumer = consumer_for(&keys);
        assert!(consumer.add_subscription(subscription(&other)).is_err());
    }
}
