//! Per-account output ledger
//!
//! One primary store keyed by [`OutputId`] holds every output the account
//! owns together with its location (unconfirmed, available or spent). The
//! secondary indices (by transaction, by spending transaction, by spend
//! descriptor, by height, and the unlock job queue) are only touched from
//! the mutating methods below, always in the same call that changes the
//! primary store.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::types::{
    DetachResult, IncludeFlags, OutputId, OutputKind, SpentOutput, SpentOutputDescriptor,
    TransactionBlockInfo, TransactionInformation, TransactionOutputInformation, TransferState,
    UNCONFIRMED_GLOBAL_OUTPUT_INDEX, UNCONFIRMED_TRANSACTION_HEIGHT,
};
use crate::core::{Currency, Transaction, TransactionInput};
use crate::crypto::Hash;
use crate::error::{Result, WalletError};
use crate::utils::current_timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct SpendInfo {
    spending_block: TransactionBlockInfo,
    spending_transaction_hash: Hash,
    input_in_transaction: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
enum OutputLocation {
    Unconfirmed,
    Available,
    Spent(SpendInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct OutputRecord {
    info: TransactionOutputInformation,
    unlock_time: u64,
    block_height: u32,
    transaction_index: u32,
    visible: bool,
    location: OutputLocation,
}

/// Serializable image of a ledger; indices are rebuilt on restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct ContainerSnapshot {
    current_height: u32,
    outputs: Vec<OutputRecord>,
    transactions: Vec<TransactionInformation>,
}

#[derive(Debug, Clone)]
pub struct TransfersContainer {
    currency: Currency,
    spendable_age: u32,
    current_height: u32,
    outputs: HashMap<OutputId, OutputRecord>,
    transactions: HashMap<Hash, TransactionInformation>,
    transactions_by_height: BTreeMap<u32, BTreeSet<Hash>>,
    outputs_by_transaction: HashMap<Hash, BTreeSet<OutputId>>,
    outputs_by_spending_transaction: HashMap<Hash, BTreeSet<OutputId>>,
    outputs_by_descriptor: HashMap<SpentOutputDescriptor, BTreeSet<OutputId>>,
    unlock_jobs: BTreeMap<u32, BTreeSet<OutputId>>,
    unlock_job_heights: HashMap<OutputId, u32>,
}

fn now() -> u64 {
    clock_or_epoch(current_timestamp())
}

/// Without a usable clock every timestamp lock reads as not reached yet
fn clock_or_epoch(reading: Result<u64>) -> u64 {
    reading.unwrap_or_else(|e| {
        warn!("Cannot read the clock, timestamp-locked outputs stay locked: {e}");
        0
    })
}

fn input_descriptor(input: &TransactionInput) -> Option<(SpentOutputDescriptor, u64)> {
    match input {
        TransactionInput::Base { .. } => None,
        TransactionInput::Key {
            amount, key_image, ..
        } => Some((SpentOutputDescriptor::KeyImage(*key_image), *amount)),
        TransactionInput::Multisignature {
            amount,
            output_index,
            ..
        } => Some((
            SpentOutputDescriptor::Multisignature {
                amount: *amount,
                global_output_index: *output_index,
            },
            *amount,
        )),
    }
}

impl TransfersContainer {
    pub fn new(currency: Currency, spendable_age: u32) -> Self {
        TransfersContainer {
            currency,
            spendable_age,
            current_height: 0,
            outputs: HashMap::new(),
            transactions: HashMap::new(),
            transactions_by_height: BTreeMap::new(),
            outputs_by_transaction: HashMap::new(),
            outputs_by_spending_transaction: HashMap::new(),
            outputs_by_descriptor: HashMap::new(),
            unlock_jobs: BTreeMap::new(),
            unlock_job_heights: HashMap::new(),
        }
    }

    pub fn current_height(&self) -> u32 {
        self.current_height
    }

    pub fn transactions_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn transfers_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn contains_transaction(&self, hash: &Hash) -> bool {
        self.transactions.contains_key(hash)
    }

    /// Records the outputs `tx` pays to this account and the account
    /// outputs its inputs consume. Returns false when the transaction does
    /// not touch the account.
    pub fn add_transaction(
        &mut self,
        block: &TransactionBlockInfo,
        tx_hash: Hash,
        tx: &Transaction,
        outputs: &[TransactionOutputInformation],
    ) -> Result<bool> {
        if block.is_confirmed() && block.height < self.current_height {
            return Err(WalletError::Internal(format!(
                "Transaction {tx_hash} at height {} is below ledger height {}",
                block.height, self.current_height
            )));
        }
        if self.transactions.contains_key(&tx_hash) {
            return Err(WalletError::Internal(format!(
                "Transaction {tx_hash} is already in the ledger"
            )));
        }
        self.check_new_outputs(block, &tx_hash, outputs)?;
        let spends = self.find_spent_outputs(tx)?;

        let added_outputs = self.add_outputs(block, tx_hash, tx.prefix.unlock_time, outputs);
        let added_inputs = !spends.is_empty();
        for (input_index, id) in spends {
            self.spend_output(id, block, tx_hash, input_index);
        }

        if added_outputs || added_inputs {
            let info = TransactionInformation {
                transaction_hash: tx_hash,
                public_key: tx.public_key().unwrap_or_default(),
                block_height: block.height,
                timestamp: block.timestamp,
                transaction_index: block.transaction_index,
                unlock_time: tx.prefix.unlock_time,
                total_amount_in: tx.input_amount(),
                total_amount_out: tx.output_amount(),
                extra: tx.prefix.extra.clone(),
            };
            self.transactions_by_height
                .entry(block.height)
                .or_default()
                .insert(tx_hash);
            self.transactions.insert(tx_hash, info);
            trace!(
                "Ledger recorded transaction {tx_hash} at height {} (outputs: {added_outputs}, inputs: {added_inputs})",
                block.height
            );
        }
        Ok(added_outputs || added_inputs)
    }

    fn check_new_outputs(
        &self,
        block: &TransactionBlockInfo,
        tx_hash: &Hash,
        outputs: &[TransactionOutputInformation],
    ) -> Result<()> {
        let mut seen = BTreeSet::new();
        for output in outputs {
            if output.transaction_hash != *tx_hash {
                return Err(WalletError::Internal(format!(
                    "Output belongs to {} but was added with {tx_hash}",
                    output.transaction_hash
                )));
            }
            let id = output.id();
            if self.outputs.contains_key(&id) || !seen.insert(id) {
                return Err(WalletError::Internal(format!(
                    "Output {} of {tx_hash} already exists",
                    id.output_in_transaction
                )));
            }
            if block.is_confirmed() {
                if let (OutputKind::Multisignature { .. }, Some(descriptor)) =
                    (&output.kind, output.spent_descriptor())
                {
                    if self.outputs_by_descriptor.contains_key(&descriptor) {
                        return Err(WalletError::Internal(format!(
                            "Duplicate multisignature output {descriptor:?}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn find_spent_outputs(&self, tx: &Transaction) -> Result<Vec<(u32, OutputId)>> {
        let mut spends = Vec::new();
        for (index, input) in tx.prefix.inputs.iter().enumerate() {
            let Some((descriptor, amount)) = input_descriptor(input) else {
                continue;
            };
            let Some(ids) = self.outputs_by_descriptor.get(&descriptor) else {
                continue;
            };

            let mut available: Option<(OutputId, bool)> = None;
            let mut has_unconfirmed = false;
            for id in ids {
                let Some(record) = self.outputs.get(id) else {
                    continue;
                };
                match &record.location {
                    OutputLocation::Spent(spend) => {
                        return Err(WalletError::Internal(format!(
                            "Output {descriptor:?} is already spent by {}",
                            spend.spending_transaction_hash
                        )));
                    }
                    OutputLocation::Unconfirmed => has_unconfirmed = true,
                    OutputLocation::Available => {
                        if record.info.amount == amount
                            && available.map_or(true, |(_, visible)| !visible && record.visible)
                        {
                            available = Some((*id, record.visible));
                        }
                    }
                }
            }

            match available {
                Some((id, _)) => spends.push((index as u32, id)),
                None if has_unconfirmed => {
                    return Err(WalletError::Internal(format!(
                        "Input {index} spends an unconfirmed output"
                    )));
                }
                None => {}
            }
        }
        Ok(spends)
    }

    /// Unconfirmed transactions whose spends collide with `tx`'s inputs
    pub fn conflicting_unconfirmed_transactions(&self, tx: &Transaction) -> Vec<Hash> {
        let mut conflicts = BTreeSet::new();
        for input in &tx.prefix.inputs {
            let Some((descriptor, _)) = input_descriptor(input) else {
                continue;
            };
            let Some(ids) = self.outputs_by_descriptor.get(&descriptor) else {
                continue;
            };
            for id in ids {
                if let Some(OutputRecord {
                    location: OutputLocation::Spent(spend),
                    ..
                }) = self.outputs.get(id)
                {
                    if !spend.spending_block.is_confirmed() {
                        conflicts.insert(spend.spending_transaction_hash);
                    }
                }
            }
        }
        conflicts.into_iter().collect()
    }

    fn add_outputs(
        &mut self,
        block: &TransactionBlockInfo,
        tx_hash: Hash,
        unlock_time: u64,
        outputs: &[TransactionOutputInformation],
    ) -> bool {
        let mut added = false;
        for output in outputs {
            if let Some(descriptor) = output.spent_descriptor() {
                if matches!(descriptor, SpentOutputDescriptor::KeyImage(_))
                    && self.descriptor_is_spent(&descriptor)
                {
                    debug!(
                        "Skipping output {} of {tx_hash}: its key image is already spent",
                        output.output_in_transaction
                    );
                    continue;
                }
            }

            let mut info = output.clone();
            if !block.is_confirmed() {
                info.global_output_index = UNCONFIRMED_GLOBAL_OUTPUT_INDEX;
            }
            let id = info.id();
            let descriptor = info.spent_descriptor();
            let record = OutputRecord {
                info,
                unlock_time,
                block_height: block.height,
                transaction_index: block.transaction_index,
                visible: true,
                location: if block.is_confirmed() {
                    OutputLocation::Available
                } else {
                    OutputLocation::Unconfirmed
                },
            };
            self.outputs.insert(id, record);
            self.outputs_by_transaction
                .entry(tx_hash)
                .or_default()
                .insert(id);
            if let Some(descriptor) = descriptor {
                self.outputs_by_descriptor
                    .entry(descriptor)
                    .or_default()
                    .insert(id);
                self.update_visibility(&descriptor);
            }
            if block.is_confirmed() {
                self.schedule_unlock_if_locked(id);
            }
            added = true;
        }
        added
    }

    fn descriptor_is_spent(&self, descriptor: &SpentOutputDescriptor) -> bool {
        self.outputs_by_descriptor
            .get(descriptor)
            .map(|ids| {
                ids.iter().any(|id| {
                    matches!(
                        self.outputs.get(id).map(|r| &r.location),
                        Some(OutputLocation::Spent(_))
                    )
                })
            })
            .unwrap_or(false)
    }

    fn spend_output(
        &mut self,
        id: OutputId,
        block: &TransactionBlockInfo,
        tx_hash: Hash,
        input_index: u32,
    ) {
        self.delete_unlock_job(&id);
        let Some(record) = self.outputs.get_mut(&id) else {
            return;
        };
        record.location = OutputLocation::Spent(SpendInfo {
            spending_block: *block,
            spending_transaction_hash: tx_hash,
            input_in_transaction: input_index,
        });
        let descriptor = record.info.spent_descriptor();
        self.outputs_by_spending_transaction
            .entry(tx_hash)
            .or_default()
            .insert(id);
        if let Some(descriptor) = descriptor {
            self.update_visibility(&descriptor);
        }
    }

    /// A spent output hides every competitor; otherwise a lone available
    /// output is visible and several available ones hide each other
    fn update_visibility(&mut self, descriptor: &SpentOutputDescriptor) {
        let Some(ids) = self.outputs_by_descriptor.get(descriptor) else {
            return;
        };
        let ids: Vec<OutputId> = ids.iter().copied().collect();

        let mut spent = 0usize;
        let mut available = 0usize;
        for id in &ids {
            match self.outputs.get(id).map(|r| &r.location) {
                Some(OutputLocation::Spent(_)) => spent += 1,
                Some(OutputLocation::Available) => available += 1,
                _ => {}
            }
        }

        for id in &ids {
            if let Some(record) = self.outputs.get_mut(id) {
                record.visible = match record.location {
                    OutputLocation::Spent(_) => true,
                    OutputLocation::Available => spent == 0 && available == 1,
                    OutputLocation::Unconfirmed => spent == 0,
                };
            }
        }
    }

    /// Promotes a pool transaction to a block. Returns false if the
    /// transaction is unknown or already confirmed.
    pub fn mark_transaction_confirmed(
        &mut self,
        block: &TransactionBlockInfo,
        tx_hash: &Hash,
        global_indices: &[u32],
    ) -> Result<bool> {
        if !block.is_confirmed() {
            return Err(WalletError::Internal(
                "Cannot confirm a transaction with an unconfirmed block".to_string(),
            ));
        }
        match self.transactions.get(tx_hash) {
            None => return Ok(false),
            Some(info) if info.block_height != UNCONFIRMED_TRANSACTION_HEIGHT => return Ok(false),
            Some(_) => {}
        }
        if block.height < self.current_height {
            return Err(WalletError::Internal(format!(
                "Confirmation height {} is below ledger height {}",
                block.height, self.current_height
            )));
        }

        let own: Vec<OutputId> = self
            .outputs_by_transaction
            .get(tx_hash)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        for id in &own {
            let Some(record) = self.outputs.get(id) else {
                continue;
            };
            if record.location != OutputLocation::Unconfirmed {
                continue;
            }
            let index = id.output_in_transaction as usize;
            let Some(global_index) = global_indices.get(index) else {
                return Err(WalletError::Internal(format!(
                    "No global index for output {index} of {tx_hash}"
                )));
            };
            if let OutputKind::Multisignature { .. } = record.info.kind {
                let descriptor = SpentOutputDescriptor::Multisignature {
                    amount: record.info.amount,
                    global_output_index: *global_index,
                };
                if self.outputs_by_descriptor.contains_key(&descriptor) {
                    return Err(WalletError::Internal(format!(
                        "Duplicate multisignature output {descriptor:?}"
                    )));
                }
            }
        }

        if let Some(info) = self.transactions.get_mut(tx_hash) {
            info.block_height = block.height;
            info.timestamp = block.timestamp;
            info.transaction_index = block.transaction_index;
        }
        if let Some(pool) = self
            .transactions_by_height
            .get_mut(&UNCONFIRMED_TRANSACTION_HEIGHT)
        {
            pool.remove(tx_hash);
            if pool.is_empty() {
                self.transactions_by_height
                    .remove(&UNCONFIRMED_TRANSACTION_HEIGHT);
            }
        }
        self.transactions_by_height
            .entry(block.height)
            .or_default()
            .insert(*tx_hash);

        for id in &own {
            let descriptor = {
                let Some(record) = self.outputs.get_mut(id) else {
                    continue;
                };
                if record.location != OutputLocation::Unconfirmed {
                    continue;
                }
                record.info.global_output_index = global_indices[id.output_in_transaction as usize];
                record.block_height = block.height;
                record.transaction_index = block.transaction_index;
                record.location = OutputLocation::Available;
                record.info.spent_descriptor()
            };
            if let Some(descriptor) = descriptor {
                self.outputs_by_descriptor
                    .entry(descriptor)
                    .or_default()
                    .insert(*id);
                self.update_visibility(&descriptor);
            }
            self.schedule_unlock_if_locked(*id);
        }

        if let Some(spent) = self.outputs_by_spending_transaction.get(tx_hash) {
            for id in spent {
                if let Some(OutputRecord {
                    location: OutputLocation::Spent(spend),
                    ..
                }) = self.outputs.get_mut(id)
                {
                    spend.spending_block = *block;
                }
            }
        }
        Ok(true)
    }

    /// Forgets a pool transaction, releasing whatever it spent
    pub fn delete_unconfirmed_transaction(&mut self, tx_hash: &Hash) -> Result<bool> {
        match self.transactions.get(tx_hash) {
            Some(info) if info.block_height == UNCONFIRMED_TRANSACTION_HEIGHT => {
                self.delete_transaction(tx_hash);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_transaction(&mut self, tx_hash: &Hash) {
        self.delete_transaction_transfers(tx_hash);
        if let Some(info) = self.transactions.remove(tx_hash) {
            if let Some(hashes) = self.transactions_by_height.get_mut(&info.block_height) {
                hashes.remove(tx_hash);
                if hashes.is_empty() {
                    self.transactions_by_height.remove(&info.block_height);
                }
            }
        }
    }

    fn delete_transaction_transfers(&mut self, tx_hash: &Hash) {
        if let Some(spent) = self.outputs_by_spending_transaction.remove(tx_hash) {
            for id in spent {
                let descriptor = match self.outputs.get_mut(&id) {
                    Some(record) => {
                        record.location = OutputLocation::Available;
                        record.info.spent_descriptor()
                    }
                    None => continue,
                };
                if let Some(descriptor) = descriptor {
                    self.update_visibility(&descriptor);
                }
                self.schedule_unlock_if_locked(id);
            }
        }

        if let Some(own) = self.outputs_by_transaction.remove(tx_hash) {
            for id in own {
                self.delete_unlock_job(&id);
                let Some(record) = self.outputs.remove(&id) else {
                    continue;
                };
                if let OutputLocation::Spent(spend) = &record.location {
                    let spender = spend.spending_transaction_hash;
                    if let Some(ids) = self.outputs_by_spending_transaction.get_mut(&spender) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            self.outputs_by_spending_transaction.remove(&spender);
                        }
                    }
                }
                if let Some(descriptor) = record.info.spent_descriptor() {
                    if let Some(ids) = self.outputs_by_descriptor.get_mut(&descriptor) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            self.outputs_by_descriptor.remove(&descriptor);
                        }
                    }
                    self.update_visibility(&descriptor);
                }
            }
        }
    }

    /// Rolls the ledger back so that `height` becomes the first block to be
    /// re-applied
    pub fn detach(&mut self, height: u32) -> DetachResult {
        let unlocked_before: BTreeSet<OutputId> = self
            .outputs
            .iter()
            .filter(|(_, r)| {
                r.location == OutputLocation::Available
                    && self.available_state(r) == IncludeFlags::STATE_UNLOCKED
            })
            .map(|(id, _)| *id)
            .collect();

        let mut to_delete: Vec<Hash> = Vec::new();
        if let Some(pool) = self
            .transactions_by_height
            .get(&UNCONFIRMED_TRANSACTION_HEIGHT)
        {
            for hash in pool {
                let spends_detached = self
                    .outputs_by_spending_transaction
                    .get(hash)
                    .map(|ids| {
                        ids.iter().any(|id| {
                            self.outputs
                                .get(id)
                                .map(|r| r.block_height >= height)
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false);
                if spends_detached {
                    to_delete.push(*hash);
                }
            }
        }
        for (_, hashes) in self
            .transactions_by_height
            .range(height..UNCONFIRMED_TRANSACTION_HEIGHT)
            .rev()
        {
            to_delete.extend(hashes.iter().copied());
        }

        for hash in &to_delete {
            self.delete_transaction(hash);
        }

        self.current_height = height.saturating_sub(1);
        self.rebuild_unlock_jobs();

        let locked_transfers = unlocked_before
            .iter()
            .filter_map(|id| self.outputs.get(id))
            .filter(|r| {
                r.location == OutputLocation::Available
                    && self.available_state(r) != IncludeFlags::STATE_UNLOCKED
            })
            .map(|r| r.info.clone())
            .collect();

        debug!(
            "Ledger detached at height {height}: {} transactions removed",
            to_delete.len()
        );
        DetachResult {
            deleted_transactions: to_delete,
            locked_transfers,
        }
    }

    /// Moves the ledger to `height`, firing unlock jobs that are due.
    /// Returns the outputs that became spendable.
    pub fn advance_height(&mut self, height: u32) -> Vec<TransactionOutputInformation> {
        if height < self.current_height {
            return Vec::new();
        }
        self.current_height = height;

        let due = match height.checked_add(1) {
            Some(next) => {
                let later = self.unlock_jobs.split_off(&next);
                std::mem::replace(&mut self.unlock_jobs, later)
            }
            None => std::mem::take(&mut self.unlock_jobs),
        };

        let mut unlocked = Vec::new();
        for (_, ids) in due {
            for id in ids {
                self.unlock_job_heights.remove(&id);
                let Some(record) = self.outputs.get(&id) else {
                    continue;
                };
                if record.location != OutputLocation::Available {
                    continue;
                }
                if self.available_state(record) == IncludeFlags::STATE_UNLOCKED {
                    unlocked.push(record.info.clone());
                } else {
                    self.schedule_unlock_if_locked(id);
                }
            }
        }
        unlocked
    }

    fn is_spend_time_unlocked(&self, record: &OutputRecord) -> bool {
        let term = record.info.term();
        if term != 0 && self.current_height < record.block_height.saturating_add(term) {
            return false;
        }
        self.currency
            .is_unlock_time_reached(record.unlock_time, self.current_height, now())
    }

    /// State of an available output: locked, soft-locked or unlocked
    fn available_state(&self, record: &OutputRecord) -> IncludeFlags {
        if !record.location_is_confirmed() || !self.is_spend_time_unlocked(record) {
            IncludeFlags::STATE_LOCKED
        } else if self.current_height < record.block_height.saturating_add(self.spendable_age) {
            IncludeFlags::STATE_SOFT_LOCKED
        } else {
            IncludeFlags::STATE_UNLOCKED
        }
    }

    fn unlock_height(&self, record: &OutputRecord) -> u32 {
        let mut height = record.block_height.saturating_add(self.spendable_age);
        let term = record.info.term();
        if term != 0 {
            height = height.max(record.block_height.saturating_add(term));
        }
        if record.unlock_time != 0 {
            height = height.max(self.currency.unlock_time_to_height(
                record.unlock_time,
                self.current_height,
                now(),
            ));
        }
        height.max(self.current_height.saturating_add(1))
    }

    fn schedule_unlock_if_locked(&mut self, id: OutputId) {
        let Some(record) = self.outputs.get(&id) else {
            return;
        };
        if record.location != OutputLocation::Available
            || self.available_state(record) == IncludeFlags::STATE_UNLOCKED
        {
            return;
        }
        let height = self.unlock_height(record);
        self.delete_unlock_job(&id);
        self.unlock_jobs.entry(height).or_default().insert(id);
        self.unlock_job_heights.insert(id, height);
    }

    fn delete_unlock_job(&mut self, id: &OutputId) {
        if let Some(height) = self.unlock_job_heights.remove(id) {
            if let Some(ids) = self.unlock_jobs.get_mut(&height) {
                ids.remove(id);
                if ids.is_empty() {
                    self.unlock_jobs.remove(&height);
                }
            }
        }
    }

    fn rebuild_unlock_jobs(&mut self) {
        self.unlock_jobs.clear();
        self.unlock_job_heights.clear();
        let ids: Vec<OutputId> = self.outputs.keys().copied().collect();
        for id in ids {
            self.schedule_unlock_if_locked(id);
        }
    }

    fn record_state(&self, record: &OutputRecord) -> IncludeFlags {
        match record.location {
            OutputLocation::Unconfirmed => IncludeFlags::STATE_LOCKED,
            OutputLocation::Available => self.available_state(record),
            OutputLocation::Spent(_) => IncludeFlags::STATE_SPENT,
        }
    }

    fn is_included(&self, record: &OutputRecord, flags: IncludeFlags) -> bool {
        if !flags.intersects(record.info.type_flag()) {
            return false;
        }
        match record.location {
            OutputLocation::Spent(_) => flags.intersects(IncludeFlags::STATE_SPENT),
            _ => record.visible && flags.intersects(self.record_state(record)),
        }
    }

    fn sorted_records(&self) -> Vec<&OutputRecord> {
        let mut records: Vec<&OutputRecord> = self.outputs.values().collect();
        records.sort_by_key(|r| {
            (
                r.block_height,
                r.transaction_index,
                r.info.transaction_hash,
                r.info.output_in_transaction,
            )
        });
        records
    }

    pub fn outputs(&self, flags: IncludeFlags) -> Vec<TransactionOutputInformation> {
        self.sorted_records()
            .into_iter()
            .filter(|r| self.is_included(r, flags))
            .map(|r| r.info.clone())
            .collect()
    }

    pub fn balance(&self, flags: IncludeFlags) -> u64 {
        self.outputs
            .values()
            .filter(|r| self.is_included(r, flags))
            .fold(0u64, |sum, r| sum.saturating_add(r.info.amount))
    }

    pub fn transaction_outputs(
        &self,
        tx_hash: &Hash,
        flags: IncludeFlags,
    ) -> Vec<TransactionOutputInformation> {
        let mut outputs: Vec<TransactionOutputInformation> = self
            .outputs_by_transaction
            .get(tx_hash)
            .into_iter()
            .flatten()
            .filter_map(|id| self.outputs.get(id))
            .filter(|r| self.is_included(r, flags))
            .map(|r| r.info.clone())
            .collect();
        outputs.sort_by_key(|o| o.output_in_transaction);
        outputs
    }

    /// Account outputs consumed by `tx_hash`, filtered by type only
    pub fn transaction_inputs(
        &self,
        tx_hash: &Hash,
        flags: IncludeFlags,
    ) -> Vec<TransactionOutputInformation> {
        self.outputs_by_spending_transaction
            .get(tx_hash)
            .into_iter()
            .flatten()
            .filter_map(|id| self.outputs.get(id))
            .filter(|r| flags.intersects(r.info.type_flag()))
            .map(|r| r.info.clone())
            .collect()
    }

    /// Transaction info plus the account's own input and output totals
    pub fn transaction_information(
        &self,
        tx_hash: &Hash,
    ) -> Option<(TransactionInformation, u64, u64)> {
        let info = self.transactions.get(tx_hash)?;
        let amount_in = self
            .outputs_by_spending_transaction
            .get(tx_hash)
            .into_iter()
            .flatten()
            .filter_map(|id| self.outputs.get(id))
            .fold(0u64, |sum, r| sum.saturating_add(r.info.amount));
        let amount_out = self
            .outputs_by_transaction
            .get(tx_hash)
            .into_iter()
            .flatten()
            .filter_map(|id| self.outputs.get(id))
            .fold(0u64, |sum, r| sum.saturating_add(r.info.amount));
        Some((info.clone(), amount_in, amount_out))
    }

    pub fn unconfirmed_transactions(&self) -> Vec<Hash> {
        self.transactions_by_height
            .get(&UNCONFIRMED_TRANSACTION_HEIGHT)
            .map(|hashes| hashes.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn spent_outputs(&self) -> Vec<SpentOutput> {
        self.sorted_records()
            .into_iter()
            .filter_map(|r| match &r.location {
                OutputLocation::Spent(spend) => Some(SpentOutput {
                    output: r.info.clone(),
                    spending_block: spend.spending_block,
                    spending_transaction_hash: spend.spending_transaction_hash,
                    input_in_transaction: spend.input_in_transaction,
                }),
                _ => None,
            })
            .collect()
    }

    pub fn transfer(
        &self,
        tx_hash: &Hash,
        output_in_transaction: u32,
    ) -> Option<(TransactionOutputInformation, TransferState)> {
        let record = self.outputs.get(&OutputId {
            transaction_hash: *tx_hash,
            output_in_transaction,
        })?;
        let state = match record.location {
            OutputLocation::Unconfirmed => TransferState::Unconfirmed,
            OutputLocation::Available => TransferState::Available,
            OutputLocation::Spent(_) => TransferState::Spent,
        };
        Some((record.info.clone(), state))
    }

    pub fn unlock_jobs(&self) -> Vec<(u32, OutputId)> {
        self.unlock_jobs
            .iter()
            .flat_map(|(height, ids)| ids.iter().map(move |id| (*height, *id)))
            .collect()
    }

    /// Cross-checks the primary store against every index
    pub fn verify_consistency(&self) -> Result<()> {
        let fail = |msg: String| Err(WalletError::Internal(msg));

        for (descriptor, ids) in &self.outputs_by_descriptor {
            if let SpentOutputDescriptor::KeyImage(_) = descriptor {
                let mut spent = false;
                let mut available = false;
                for id in ids {
                    match self.outputs.get(id).map(|r| &r.location) {
                        Some(OutputLocation::Spent(_)) => spent = true,
                        Some(OutputLocation::Available) => available = true,
                        Some(OutputLocation::Unconfirmed) => {}
                        None => return fail(format!("Descriptor index points at missing {id:?}")),
                    }
                }
                if spent && available {
                    return fail(format!("{descriptor:?} is both available and spent"));
                }
            }
        }

        for (id, record) in &self.outputs {
            let locked = record.location == OutputLocation::Available
                && self.available_state(record) != IncludeFlags::STATE_UNLOCKED;
            if locked != self.unlock_job_heights.contains_key(id) {
                return fail(format!("Unlock job mismatch for {id:?}"));
            }
            let in_tx_index = self
                .outputs_by_transaction
                .get(&id.transaction_hash)
                .map(|ids| ids.contains(id))
                .unwrap_or(false);
            if !in_tx_index || !self.transactions.contains_key(&id.transaction_hash) {
                return fail(format!("Output {id:?} has no owning transaction"));
            }
            if let OutputLocation::Spent(spend) = &record.location {
                let indexed = self
                    .outputs_by_spending_transaction
                    .get(&spend.spending_transaction_hash)
                    .map(|ids| ids.contains(id))
                    .unwrap_or(false);
                if !indexed {
                    return fail(format!("Spent output {id:?} missing from spender index"));
                }
            }
        }

        for (height, ids) in &self.unlock_jobs {
            for id in ids {
                if self.unlock_job_heights.get(id) != Some(height) {
                    return fail(format!("Unlock queue disagrees for {id:?}"));
                }
            }
        }
        Ok(())
    }

    pub fn to_snapshot(&self) -> ContainerSnapshot {
        let mut outputs: Vec<OutputRecord> = self.outputs.values().cloned().collect();
        outputs.sort_by_key(|r| r.info.id());
        let mut transactions: Vec<TransactionInformation> =
            self.transactions.values().cloned().collect();
        transactions.sort_by_key(|t| t.transaction_hash);
        ContainerSnapshot {
            current_height: self.current_height,
            outputs,
            transactions,
        }
    }

    pub fn from_snapshot(
        currency: Currency,
        spendable_age: u32,
        snapshot: ContainerSnapshot,
    ) -> Result<Self> {
        let mut container = TransfersContainer::new(currency, spendable_age);
        container.current_height = snapshot.current_height;

        for info in snapshot.transactions {
            container
                .transactions_by_height
                .entry(info.block_height)
                .or_default()
                .insert(info.transaction_hash);
            if container
                .transactions
                .insert(info.transaction_hash, info)
                .is_some()
            {
                return Err(WalletError::Internal(
                    "Duplicate transaction in ledger snapshot".to_string(),
                ));
            }
        }

        for record in snapshot.outputs {
            let id = record.info.id();
            container
                .outputs_by_transaction
                .entry(id.transaction_hash)
                .or_default()
                .insert(id);
            if let OutputLocation::Spent(spend) = &record.location {
                container
                    .outputs_by_spending_transaction
                    .entry(spend.spending_transaction_hash)
                    .or_default()
                    .insert(id);
            }
            if let Some(descriptor) = record.info.spent_descriptor() {
                container
                    .outputs_by_descriptor
                    .entry(descriptor)
                    .or_default()
                    .insert(id);
            }
            if container.outputs.insert(id, record).is_some() {
                return Err(WalletError::Internal(
                    "Duplicate output in ledger snapshot".to_string(),
                ));
            }
        }

        container.rebuild_unlock_jobs();
        container.verify_consistency()?;
        Ok(container)
    }
}

impl OutputRecord {
    fn location_is_confirmed(&self) -> bool {
        self.location != OutputLocation::Unconfirmed
            && self.block_height != UNCONFIRMED_TRANSACTION_HEIGHT
    }
}
