//! Wallet history: transactions, per-address transfers and deposits
//!
//! The ledgers in [`crate::transfers`] know which outputs an address owns.
//! This index turns their per-transaction totals into the history the wallet
//! shows: one record per transaction, a list of signed transfers per record
//! and the deposits the wallet owns. It is pure data so the reconciliation
//! rules can be tested without a chain.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::events::WalletEvent;
use super::types::{Deposit, WalletTransaction, WalletTransactionState, WalletTransfer};
use crate::core::{Currency, Transaction, MINIMUM_FEE};
use crate::crypto::Hash;
use crate::error::{Result, WalletError};
use crate::transfers::{
    OutputId, TransactionInformation, TransactionOutputInformation,
    UNCONFIRMED_TRANSACTION_HEIGHT,
};

/// What one address ledger reports about a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountChange {
    pub address: String,
    /// Address outputs spent by the transaction
    pub input: u64,
    /// Address outputs created by the transaction
    pub output: u64,
    pub deposits: Vec<TransactionOutputInformation>,
    pub spent_deposits: Vec<TransactionOutputInformation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionChange {
    pub info: TransactionInformation,
    pub accounts: Vec<AccountChange>,
    /// Height at which the outputs become spendable, once confirmed
    pub unlock_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedChange {
    pub transaction_id: usize,
    pub created: bool,
    pub updated: bool,
}

impl AppliedChange {
    pub fn event(&self) -> Option<WalletEvent> {
        if self.created {
            Some(WalletEvent::TransactionCreated {
                transaction_id: self.transaction_id,
            })
        } else if self.updated {
            Some(WalletEvent::TransactionUpdated {
                transaction_id: self.transaction_id,
            })
        } else {
            None
        }
    }
}

pub(crate) fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

fn is_output(amount: i64) -> bool {
    amount > 0
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct WalletIndex {
    transactions: Vec<WalletTransaction>,
    ids_by_hash: BTreeMap<Hash, usize>,
    transfers: BTreeMap<usize, Vec<WalletTransfer>>,
    deposits: Vec<Deposit>,
    deposit_ids: BTreeMap<OutputId, usize>,
    fusion_cache: BTreeMap<usize, bool>,
    unlock_jobs: BTreeMap<u32, BTreeSet<Hash>>,
    /// Built but not relayed yet, waiting for commit or rollback
    uncommitted: BTreeMap<usize, Transaction>,
}

impl WalletIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn transactions(&self) -> &[WalletTransaction] {
        &self.transactions
    }

    pub fn transaction(&self, id: usize) -> Result<&WalletTransaction> {
        self.transactions
            .get(id)
            .ok_or(WalletError::IndexOutOfRange {
                index: id,
                len: self.transactions.len(),
            })
    }

    pub fn transaction_id(&self, hash: &Hash) -> Option<usize> {
        self.ids_by_hash.get(hash).copied()
    }

    pub fn transfers(&self, id: usize) -> &[WalletTransfer] {
        self.transfers.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn deposits(&self) -> &[Deposit] {
        &self.deposits
    }

    pub fn deposit(&self, id: usize) -> Result<&Deposit> {
        self.deposits.get(id).ok_or(WalletError::DepositNotFound(id))
    }

    pub fn fusion_status(&self, id: usize) -> Option<bool> {
        self.fusion_cache.get(&id).copied()
    }

    pub fn cache_fusion_status(&mut self, id: usize, is_fusion: bool) {
        self.fusion_cache.insert(id, is_fusion);
    }

    pub fn uncommitted(&self) -> &BTreeMap<usize, Transaction> {
        &self.uncommitted
    }

    pub fn add_uncommitted(&mut self, id: usize, transaction: Transaction) {
        self.uncommitted.insert(id, transaction);
    }

    pub fn remove_uncommitted(&mut self, id: usize) -> Option<Transaction> {
        self.uncommitted.remove(&id)
    }

    pub fn unlock_jobs(&self) -> &BTreeMap<u32, BTreeSet<Hash>> {
        &self.unlock_jobs
    }

    /// Records a transaction the wallet built itself
    pub fn insert_outgoing(
        &mut self,
        transaction: WalletTransaction,
        transfers: Vec<WalletTransfer>,
        is_fusion: bool,
    ) -> usize {
        let id = self.insert_transaction(transaction);
        if !transfers.is_empty() {
            self.transfers.insert(id, transfers);
        }
        self.fusion_cache.insert(id, is_fusion);
        id
    }

    fn insert_transaction(&mut self, transaction: WalletTransaction) -> usize {
        let id = self.transactions.len();
        self.ids_by_hash.insert(transaction.hash, id);
        self.transactions.push(transaction);
        id
    }

    /// Returns true when the state actually changed
    pub fn set_state(&mut self, id: usize, state: WalletTransactionState) -> bool {
        match self.transactions.get_mut(id) {
            Some(transaction) if transaction.state != state => {
                transaction.state = state;
                true
            }
            _ => false,
        }
    }

    /// Folds the ledger view of a transaction into the history
    pub fn apply_transaction(
        &mut self,
        change: &TransactionChange,
        currency: &Currency,
    ) -> AppliedChange {
        let info = &change.info;
        let total_amount = change.accounts.iter().fold(0i64, |total, account| {
            total
                .saturating_add(signed(account.output))
                .saturating_sub(signed(account.input))
        });

        let (transaction_id, created, mut updated) =
            match self.ids_by_hash.get(&info.transaction_hash).copied() {
                Some(id) => {
                    let updated = self.update_transaction_info(id, info, total_amount);
                    (id, false, updated)
                }
                None => {
                    let is_base = info.total_amount_in == 0;
                    let fee = if is_base {
                        0
                    } else if info.total_amount_in < info.total_amount_out {
                        MINIMUM_FEE
                    } else {
                        info.total_amount_in - info.total_amount_out
                    };
                    let id = self.insert_transaction(WalletTransaction {
                        state: WalletTransactionState::Succeeded,
                        hash: info.transaction_hash,
                        block_height: info.block_height,
                        timestamp: info.timestamp,
                        total_amount,
                        fee,
                        unlock_time: info.unlock_time,
                        extra: info.extra.clone(),
                        creation_time: info.timestamp,
                        is_base,
                        first_deposit_id: None,
                        deposit_count: 0,
                    });
                    (id, true, false)
                }
            };

        let confirmed = info.block_height != UNCONFIRMED_TRANSACTION_HEIGHT;
        if confirmed {
            updated |= self.record_deposits(transaction_id, change, currency);
        }
        updated |= self.record_deposit_spends(transaction_id, change);

        if confirmed {
            self.uncommitted.remove(&transaction_id);
            self.unlock_jobs
                .entry(change.unlock_height)
                .or_default()
                .insert(info.transaction_hash);
        }

        let accounts: Vec<(String, i64, i64)> = change
            .accounts
            .iter()
            .map(|a| (a.address.clone(), -signed(a.input), signed(a.output)))
            .collect();
        let transfers = self.transfers.entry(transaction_id).or_default();
        updated |= reconcile_transfers(
            transfers,
            &accounts,
            -signed(info.total_amount_in),
            signed(info.total_amount_out),
        );
        if transfers.is_empty() {
            self.transfers.remove(&transaction_id);
        }

        AppliedChange {
            transaction_id,
            created,
            updated,
        }
    }

    fn update_transaction_info(
        &mut self,
        id: usize,
        info: &TransactionInformation,
        total_amount: i64,
    ) -> bool {
        let transaction = &mut self.transactions[id];
        let mut updated = false;

        if transaction.block_height != info.block_height {
            transaction.block_height = info.block_height;
            updated = true;
        }
        if transaction.timestamp != info.timestamp {
            transaction.timestamp = info.timestamp;
            updated = true;
        }

        // Created and Failed transactions never reached the node
        let was_sent = !matches!(
            transaction.state,
            WalletTransactionState::Created | WalletTransactionState::Failed
        );
        if transaction.state != WalletTransactionState::Succeeded
            && (was_sent || transaction.is_confirmed())
        {
            transaction.state = WalletTransactionState::Succeeded;
            updated = true;
        }
        if transaction.total_amount != total_amount {
            transaction.total_amount = total_amount;
            updated = true;
        }
        if transaction.extra.is_empty() && !info.extra.is_empty() {
            transaction.extra = info.extra.clone();
            updated = true;
        }
        let is_base = info.total_amount_in == 0;
        if transaction.is_base != is_base {
            transaction.is_base = is_base;
            updated = true;
        }
        updated
    }

    // Deposits are keyed by their output, so a transaction confirmed again
    // after a detach updates the existing record
    fn record_deposits(&mut self, id: usize, change: &TransactionChange, currency: &Currency) -> bool {
        let height = change.info.block_height;
        let mut updated = false;
        for output in change.accounts.iter().flat_map(|a| &a.deposits) {
            let term = output.term();
            match self.deposit_ids.get(&output.id()).copied() {
                Some(deposit_id) => {
                    let deposit = &mut self.deposits[deposit_id];
                    if deposit.height != height {
                        deposit.height = height;
                        deposit.unlock_height = height.saturating_add(term);
                        deposit.interest = currency.calculate_interest(output.amount, term, height);
                        updated = true;
                    }
                }
                None => {
                    let deposit_id = self.deposits.len();
                    self.deposits.push(Deposit {
                        creating_transaction_id: id,
                        spending_transaction_id: None,
                        term,
                        amount: output.amount,
                        interest: currency.calculate_interest(output.amount, term, height),
                        height,
                        unlock_height: height.saturating_add(term),
                        locked: true,
                        transaction_hash: output.transaction_hash,
                        output_in_transaction: output.output_in_transaction,
                    });
                    self.deposit_ids.insert(output.id(), deposit_id);
                    let transaction = &mut self.transactions[id];
                    if transaction.first_deposit_id.is_none() {
                        transaction.first_deposit_id = Some(deposit_id);
                    }
                    transaction.deposit_count += 1;
                    debug!("Deposit {deposit_id} of {} for {term} blocks", output.amount);
                    updated = true;
                }
            }
        }
        updated
    }

    fn record_deposit_spends(&mut self, id: usize, change: &TransactionChange) -> bool {
        let mut updated = false;
        for output in change.accounts.iter().flat_map(|a| &a.spent_deposits) {
            match self.deposit_ids.get(&output.id()) {
                Some(&deposit_id) => {
                    let deposit = &mut self.deposits[deposit_id];
                    if deposit.spending_transaction_id != Some(id) {
                        deposit.spending_transaction_id = Some(id);
                        updated = true;
                    }
                }
                None => warn!(
                    "Transaction {} spends an unknown deposit {}:{}",
                    change.info.transaction_hash,
                    output.transaction_hash,
                    output.output_in_transaction
                ),
            }
        }
        updated
    }

    /// A ledger dropped the transaction: pool eviction, detach or rollback
    pub fn transaction_deleted(&mut self, hash: &Hash) -> Option<WalletEvent> {
        let id = self.transaction_id(hash)?;
        self.remove_unlock_jobs(hash);

        let transaction = &mut self.transactions[id];
        let mut updated = false;
        if matches!(
            transaction.state,
            WalletTransactionState::Created | WalletTransactionState::Succeeded
        ) {
            transaction.state = WalletTransactionState::Cancelled;
            updated = true;
        }
        if transaction.block_height != UNCONFIRMED_TRANSACTION_HEIGHT {
            transaction.block_height = UNCONFIRMED_TRANSACTION_HEIGHT;
            updated = true;
        }
        for deposit in &mut self.deposits {
            if deposit.spending_transaction_id == Some(id) {
                deposit.spending_transaction_id = None;
                updated = true;
            }
        }

        updated.then_some(WalletEvent::TransactionUpdated { transaction_id: id })
    }

    fn remove_unlock_jobs(&mut self, hash: &Hash) {
        self.unlock_jobs.retain(|_, hashes| {
            hashes.remove(hash);
            !hashes.is_empty()
        });
    }

    /// Drops every unlock job due at `height`; true when any fired
    pub fn unlock_due(&mut self, height: u32) -> bool {
        let later = match height.checked_add(1) {
            Some(next) => self.unlock_jobs.split_off(&next),
            None => BTreeMap::new(),
        };
        let fired = !self.unlock_jobs.is_empty();
        self.unlock_jobs = later;
        fired
    }

    /// Flips the lock flag of the deposits backed by `outputs`
    pub fn set_deposits_locked(
        &mut self,
        outputs: &[TransactionOutputInformation],
        locked: bool,
    ) -> usize {
        let mut changed = 0;
        for output in outputs.iter().filter(|o| o.is_deposit()) {
            if let Some(&deposit_id) = self.deposit_ids.get(&output.id()) {
                let deposit = &mut self.deposits[deposit_id];
                if deposit.locked != locked {
                    deposit.locked = locked;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Forgets `address`. Its inputs become unknown inputs, its outputs stay
    /// as foreign transfers, and transactions left without any wallet
    /// address are marked deleted.
    pub fn delete_transfers_for_address(
        &mut self,
        address: &str,
        remaining: &BTreeSet<String>,
    ) -> Vec<WalletEvent> {
        let mut events = Vec::new();
        let mut deleted = Vec::new();

        for (&id, transfers) in self.transfers.iter_mut() {
            let mut deleted_inputs = 0i64;
            let mut deleted_outputs = 0i64;
            let mut unknown_inputs = 0i64;
            let mut transfers_left = false;

            for transfer in transfers.iter_mut() {
                if transfer.address == address {
                    if is_output(transfer.amount) {
                        deleted_outputs = deleted_outputs.saturating_add(transfer.amount);
                    } else {
                        deleted_inputs = deleted_inputs.saturating_add(transfer.amount);
                        transfer.address.clear();
                    }
                } else if transfer.address.is_empty() {
                    if !is_output(transfer.amount) {
                        unknown_inputs = unknown_inputs.saturating_add(transfer.amount);
                    }
                } else if remaining.contains(&transfer.address) {
                    transfers_left = true;
                }
            }

            if deleted_inputs != 0 {
                adjust_transfer(transfers, "", deleted_inputs.saturating_add(unknown_inputs));
            }

            let transaction = &mut self.transactions[id];
            transaction.total_amount = transaction
                .total_amount
                .saturating_sub(deleted_inputs.saturating_add(deleted_outputs));
            if !transfers_left {
                transaction.state = WalletTransactionState::Deleted;
                deleted.push((id, transaction.hash));
            }
            if deleted_inputs != 0 || deleted_outputs != 0 {
                events.push(WalletEvent::TransactionUpdated { transaction_id: id });
            }
        }

        for (id, hash) in deleted {
            self.uncommitted.remove(&id);
            self.remove_unlock_jobs(&hash);
        }
        events
    }
}

/// Brings the stored transfers of one transaction in line with the ledger
/// totals. `accounts` holds `(address, input, output)` per wallet address,
/// inputs negative; `all_inputs` and `all_outputs` are the transaction
/// totals with the same signs. Returns true when anything changed.
pub(crate) fn reconcile_transfers(
    transfers: &mut Vec<WalletTransfer>,
    accounts: &[(String, i64, i64)],
    all_inputs: i64,
    all_outputs: i64,
) -> bool {
    let mut updated = false;

    let known = known_amounts(transfers);
    for (address, input, output) in accounts {
        let (known_input, known_output) = known.get(address).copied().unwrap_or_default();
        updated |= update_address_transfers(transfers, address, known_input, *input);
        updated |= update_address_transfers(transfers, address, known_output, *output);
    }

    let (known_inputs, known_outputs) = known_amounts(transfers)
        .values()
        .fold((0i64, 0i64), |(i, o), (ki, ko)| {
            (i.saturating_add(*ki), o.saturating_add(*ko))
        });
    let my_input_addresses: BTreeSet<&str> = accounts
        .iter()
        .filter(|(_, input, _)| *input != 0)
        .map(|(address, _, _)| address.as_str())
        .collect();
    let my_output_addresses: BTreeSet<&str> = accounts
        .iter()
        .filter(|(_, _, output)| *output != 0)
        .map(|(address, _, _)| address.as_str())
        .collect();
    let my_inputs = accounts.iter().fold(0i64, |s, (_, i, _)| s.saturating_add(*i));
    let my_outputs = accounts.iter().fold(0i64, |s, (_, _, o)| s.saturating_add(*o));

    updated |= update_unknown_transfers(
        transfers,
        &my_input_addresses,
        known_inputs,
        my_inputs,
        all_inputs,
        false,
    );
    updated |= update_unknown_transfers(
        transfers,
        &my_output_addresses,
        known_outputs,
        my_outputs,
        all_outputs,
        true,
    );
    updated
}

// address -> (inputs, outputs), attributed entries only
fn known_amounts(transfers: &[WalletTransfer]) -> BTreeMap<String, (i64, i64)> {
    let mut known: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    for transfer in transfers.iter().filter(|t| !t.address.is_empty()) {
        let entry = known.entry(transfer.address.clone()).or_default();
        if is_output(transfer.amount) {
            entry.1 = entry.1.saturating_add(transfer.amount);
        } else {
            entry.0 = entry.0.saturating_add(transfer.amount);
        }
    }
    known
}

fn update_address_transfers(
    transfers: &mut Vec<WalletTransfer>,
    address: &str,
    known: i64,
    target: i64,
) -> bool {
    if known == target {
        return false;
    }
    if known == 0 {
        transfers.push(WalletTransfer::usual(address, target));
        true
    } else if target == 0 {
        erase_transfers(transfers, is_output(known), |a| a == address)
    } else {
        adjust_transfer(transfers, address, target)
    }
}

fn update_unknown_transfers(
    transfers: &mut Vec<WalletTransfer>,
    my_addresses: &BTreeSet<&str>,
    known: i64,
    mine: i64,
    total: i64,
    outputs: bool,
) -> bool {
    let mut updated = false;
    if known.unsigned_abs() > total.unsigned_abs() {
        updated |= erase_transfers(transfers, outputs, |a| !my_addresses.contains(a));
        if total == mine {
            updated |= erase_transfers(transfers, outputs, str::is_empty);
        } else {
            updated |= adjust_transfer(transfers, "", total.saturating_sub(mine));
        }
    } else if known == total {
        updated |= erase_transfers(transfers, outputs, str::is_empty);
    } else {
        updated |= adjust_transfer(transfers, "", total.saturating_sub(known));
    }
    updated
}

fn erase_transfers(
    transfers: &mut Vec<WalletTransfer>,
    outputs: bool,
    matches: impl Fn(&str) -> bool,
) -> bool {
    let before = transfers.len();
    transfers.retain(|t| is_output(t.amount) != outputs || !matches(&t.address));
    transfers.len() != before
}

/// Sets the first transfer of `address` with the sign of `amount` to
/// `amount`, erasing any further ones; appends one when none exists
pub(crate) fn adjust_transfer(
    transfers: &mut Vec<WalletTransfer>,
    address: &str,
    amount: i64,
) -> bool {
    let outputs = is_output(amount);
    let mut updated = false;
    let mut found = false;
    transfers.retain_mut(|transfer| {
        if transfer.address != address || is_output(transfer.amount) != outputs {
            return true;
        }
        if found {
            updated = true;
            return false;
        }
        found = true;
        if transfer.amount != amount {
            transfer.amount = amount;
            updated = true;
        }
        true
    });
    if !found {
        transfers.push(WalletTransfer::usual(address, amount));
        updated = true;
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{fast_hash, PublicKey};
    use crate::transfers::OutputKind;
    use crate::wallet::types::WalletTransferKind;

    fn hash(tag: &str) -> Hash {
        fast_hash(tag.as_bytes())
    }

    fn info(tag: &str, height: u32, amount_in: u64, amount_out: u64) -> TransactionInformation {
        TransactionInformation {
            transaction_hash: hash(tag),
            public_key: PublicKey::default(),
            block_height: height,
            timestamp: if height == UNCONFIRMED_TRANSACTION_HEIGHT { 0 } else { 1_000 + u64::from(height) },
            transaction_index: 0,
            unlock_time: 0,
            total_amount_in: amount_in,
            total_amount_out: amount_out,
            extra: vec![1, 2, 3],
        }
    }

    fn account(address: &str, input: u64, output: u64) -> AccountChange {
        AccountChange {
            address: address.to_string(),
            input,
            output,
            ..AccountChange::default()
        }
    }

    fn change(info: TransactionInformation, accounts: Vec<AccountChange>) -> TransactionChange {
        let unlock_height = info.block_height.saturating_add(10);
        TransactionChange {
            info,
            accounts,
            unlock_height,
        }
    }

    fn deposit_output(tag: &str, amount: u64, term: u32) -> TransactionOutputInformation {
        TransactionOutputInformation {
            transaction_hash: hash(tag),
            output_in_transaction: 0,
            amount,
            global_output_index: 0,
            output_key: PublicKey::default(),
            transaction_public_key: PublicKey::default(),
            kind: OutputKind::Multisignature {
                required_signatures: 1,
                term,
            },
        }
    }

    fn amounts(transfers: &[WalletTransfer]) -> Vec<(String, i64)> {
        let mut list: Vec<(String, i64)> = transfers
            .iter()
            .map(|t| (t.address.clone(), t.amount))
            .collect();
        list.sort();
        list
    }

    #[test]
    fn test_incoming_transaction() {
        let currency = Currency::default();
        let mut index = WalletIndex::new();
        let applied = index.apply_transaction(
            &change(info("in", 5, 10_000, 9_990), vec![account("A", 0, 3_000)]),
            &currency,
        );
        assert!(applied.created);
        assert_eq!(
            applied.event(),
            Some(WalletEvent::TransactionCreated { transaction_id: 0 })
        );

        let transaction = index.transaction(0).unwrap();
        assert_eq!(transaction.state, WalletTransactionState::Succeeded);
        assert_eq!(transaction.total_amount, 3_000);
        assert_eq!(transaction.fee, 10);
        assert!(!transaction.is_base);
        // the sender's inputs and change are not attributable
        assert_eq!(
            amounts(index.transfers(0)),
            vec![
                (String::new(), -10_000),
                (String::new(), 6_990),
                ("A".to_string(), 3_000)
            ]
        );
        assert_eq!(index.unlock_jobs().get(&15).map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_pool_then_block_is_recorded_once() {
        let currency = Currency::default();
        let mut index = WalletIndex::new();
        let pool = info("tx", UNCONFIRMED_TRANSACTION_HEIGHT, 500, 490);
        let applied = index.apply_transaction(&change(pool, vec![account("A", 0, 490)]), &currency);
        assert!(applied.created);
        assert!(index.unlock_jobs().is_empty());

        let applied = index.apply_transaction(
            &change(info("tx", 7, 500, 490), vec![account("A", 0, 490)]),
            &currency,
        );
        assert!(!applied.created);
        assert!(applied.updated);
        assert_eq!(index.transaction_count(), 1);
        let transaction = index.transaction(0).unwrap();
        assert_eq!(transaction.block_height, 7);
        assert_eq!(transaction.total_amount, 490);
        assert_eq!(amounts(index.transfers(0)), vec![
            (String::new(), -500),
            ("A".to_string(), 490)
        ]);

        // same view again changes nothing
        let again = index.apply_transaction(
            &change(info("tx", 7, 500, 490), vec![account("A", 0, 490)]),
            &currency,
        );
        assert_eq!(again.event(), None);
    }

    #[test]
    fn test_outgoing_transaction_keeps_destinations() {
        let currency = Currency::default();
        let mut index = WalletIndex::new();
        let outgoing = WalletTransaction {
            state: WalletTransactionState::Created,
            hash: hash("out"),
            block_height: UNCONFIRMED_TRANSACTION_HEIGHT,
            timestamp: 0,
            total_amount: 0,
            fee: 10,
            unlock_time: 0,
            extra: Vec::new(),
            creation_time: 99,
            is_base: false,
            first_deposit_id: None,
            deposit_count: 0,
        };
        let destinations = vec![
            WalletTransfer::usual("B", 700),
            WalletTransfer {
                kind: WalletTransferKind::Change,
                address: "A".to_string(),
                amount: 290,
            },
        ];
        let id = index.insert_outgoing(outgoing, destinations, false);

        let applied = index.apply_transaction(
            &change(
                info("out", UNCONFIRMED_TRANSACTION_HEIGHT, 1_000, 990),
                vec![account("A", 1_000, 290)],
            ),
            &currency,
        );
        assert!(applied.updated);
        let transaction = index.transaction(id).unwrap();
        // still waiting for the relay
        assert_eq!(transaction.state, WalletTransactionState::Created);
        assert_eq!(transaction.total_amount, -710);
        assert_eq!(
            amounts(index.transfers(id)),
            vec![
                ("A".to_string(), -1_000),
                ("A".to_string(), 290),
                ("B".to_string(), 700)
            ]
        );
        assert!(index
            .transfers(id)
            .iter()
            .any(|t| t.kind == WalletTransferKind::Change && t.amount == 290));

        assert!(index.set_state(id, WalletTransactionState::Succeeded));
        assert_eq!(
            index.transaction_deleted(&hash("out")),
            Some(WalletEvent::TransactionUpdated { transaction_id: id })
        );
        assert_eq!(
            index.transaction(id).unwrap().state,
            WalletTransactionState::Cancelled
        );
        assert_eq!(index.transaction_deleted(&hash("out")), None);
    }

    #[test]
    fn test_confirmed_deposit_is_not_duplicated() {
        let mut currency = Currency::default();
        currency.deposit_min_term = 20;
        let mut index = WalletIndex::new();
        let output = deposit_output("dep", 1_000_000, 20);
        let mut owner = account("A", 1_001_000, 0);
        owner.deposits.push(output.clone());

        index.apply_transaction(
            &change(info("dep", UNCONFIRMED_TRANSACTION_HEIGHT, 1_001_000, 1_000_000), vec![owner.clone()]),
            &currency,
        );
        assert!(index.deposits().is_empty());

        index.apply_transaction(&change(info("dep", 10, 1_001_000, 1_000_000), vec![owner.clone()]), &currency);
        index.apply_transaction(&change(info("dep", 10, 1_001_000, 1_000_000), vec![owner.clone()]), &currency);
        assert_eq!(index.deposits().len(), 1);
        let deposit = index.deposit(0).unwrap();
        assert_eq!(deposit.unlock_height, 30);
        assert_eq!(deposit.interest, currency.calculate_interest(1_000_000, 20, 10));
        assert!(deposit.locked);
        let transaction = index.transaction(0).unwrap();
        assert_eq!(transaction.first_deposit_id, Some(0));
        assert_eq!(transaction.deposit_count, 1);

        // confirmed again at another height after a detach
        index.transaction_deleted(&hash("dep"));
        index.apply_transaction(&change(info("dep", 12, 1_001_000, 1_000_000), vec![owner]), &currency);
        assert_eq!(index.deposits().len(), 1);
        assert_eq!(index.deposit(0).unwrap().unlock_height, 32);

        assert_eq!(index.set_deposits_locked(&[output.clone()], false), 1);
        assert!(!index.deposit(0).unwrap().locked);

        let mut spender = account("A", 1_000_000, 0);
        spender.spent_deposits.push(output);
        index.apply_transaction(&change(info("withdraw", 40, 1_000_000, 1_000_290), vec![spender]), &currency);
        assert_eq!(index.deposit(0).unwrap().spending_transaction_id, Some(1));
        assert_eq!(index.transaction(1).unwrap().fee, MINIMUM_FEE);
        assert_eq!(index.deposit(5), Err(WalletError::DepositNotFound(5)));
    }

    #[test]
    fn test_unlock_jobs_fire_once() {
        let currency = Currency::default();
        let mut index = WalletIndex::new();
        index.apply_transaction(&change(info("a", 3, 0, 100), vec![account("A", 0, 100)]), &currency);
        index.apply_transaction(&change(info("b", 8, 0, 100), vec![account("A", 0, 100)]), &currency);
        assert!(!index.unlock_due(12));
        assert!(index.unlock_due(13));
        assert!(!index.unlock_due(13));
        assert!(index.unlock_due(30));
        assert!(index.unlock_jobs().is_empty());
        assert!(index.transaction(0).unwrap().is_base);
    }

    #[test]
    fn test_delete_address() {
        let currency = Currency::default();
        let mut index = WalletIndex::new();
        // A pays B, both are wallet addresses
        index.apply_transaction(
            &change(info("ab", 4, 1_000, 990), vec![account("A", 1_000, 0), account("B", 0, 990)]),
            &currency,
        );
        // only A
        index.apply_transaction(&change(info("a", 5, 0, 50), vec![account("A", 0, 50)]), &currency);

        let remaining: BTreeSet<String> = ["B".to_string()].into_iter().collect();
        let events = index.delete_transfers_for_address("A", &remaining);
        assert_eq!(
            events,
            vec![
                WalletEvent::TransactionUpdated { transaction_id: 0 },
                WalletEvent::TransactionUpdated { transaction_id: 1 }
            ]
        );
        let shared = index.transaction(0).unwrap();
        assert_eq!(shared.state, WalletTransactionState::Succeeded);
        assert_eq!(shared.total_amount, 990);
        assert_eq!(
            amounts(index.transfers(0)),
            vec![(String::new(), -1_000), ("B".to_string(), 990)]
        );
        assert_eq!(
            index.transaction(1).unwrap().state,
            WalletTransactionState::Deleted
        );
    }

    #[test]
    fn test_adjust_transfer_merges_duplicates() {
        let mut transfers = vec![
            WalletTransfer::usual("A", -5),
            WalletTransfer::usual("A", 7),
            WalletTransfer::usual("A", -6),
        ];
        assert!(adjust_transfer(&mut transfers, "A", -11));
        assert_eq!(amounts(&transfers), vec![("A".to_string(), -11), ("A".to_string(), 7)]);
        assert!(!adjust_transfer(&mut transfers, "A", -11));
        assert!(adjust_transfer(&mut transfers, "", 3));
        assert_eq!(transfers.len(), 3);
    }

    #[test]
    fn test_reconcile_drops_foreign_overcount() {
        // stale foreign destination bigger than what the chain shows
        let mut transfers = vec![WalletTransfer::usual("C", 900), WalletTransfer::usual("", 50)];
        let accounts = vec![("A".to_string(), 0i64, 100i64)];
        assert!(reconcile_transfers(&mut transfers, &accounts, -200, 150));
        assert_eq!(
            amounts(&transfers),
            vec![(String::new(), -200), (String::new(), 50), ("A".to_string(), 100)]
        );
    }
}
