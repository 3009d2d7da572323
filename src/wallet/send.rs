//! Outgoing transactions: transfers, deposits, withdrawals and fusion
//!
//! Every send follows the same shape. Inputs are validated and picked under
//! the read lock, decoys are fetched without any lock, the signed
//! transaction is recorded and fed to the ledgers as unconfirmed, and only
//! then relayed. A failed relay rolls the ledgers back and leaves the record
//! `Failed`.

use log::{info, warn};
use std::collections::BTreeSet;

use super::builder::{
    self, DepositOutput, InputInfo, OutputToTransfer, ReceiverAmounts, WalletOuts,
};
use super::events::WalletEvent;
use super::fusion;
use super::index::signed;
use super::sync::detect_fusion;
use super::types::{
    FusionEstimate, TransactionParameters, WalletTransaction, WalletTransactionState,
    WalletTransfer, WalletTransferKind,
};
use super::wallet::{Wallet, WalletData};
use crate::core::{AccountPublicAddress, Transaction};
use crate::crypto::SecretKey;
use crate::error::{Result, WalletError};
use crate::transfers::{IncludeFlags, TransferState, UNCONFIRMED_TRANSACTION_HEIGHT};
use crate::utils::current_timestamp;

/// Output count assumed when sizing a fusion transaction
const MAX_FUSION_OUTPUT_COUNT: usize = 8;

struct Receiver {
    address: AccountPublicAddress,
    text: String,
    amount: u64,
}

/// Everything a transfer needs from the wallet, captured under the lock
struct TransferPlan {
    wallets: Vec<WalletOuts>,
    destinations: Vec<Receiver>,
    destination_total: u64,
    change: (AccountPublicAddress, String),
    donation: Option<(AccountPublicAddress, String, u64)>,
    own: BTreeSet<AccountPublicAddress>,
    view_secret_key: SecretKey,
}

/// How a freshly built transaction goes into the history
struct Outgoing {
    transaction: Transaction,
    transfers: Vec<WalletTransfer>,
    fee: u64,
    total_amount: i64,
    is_fusion: bool,
}

fn sum_amounts(amounts: impl IntoIterator<Item = u64>) -> Result<u64> {
    amounts
        .into_iter()
        .try_fold(0u64, |sum, amount| sum.checked_add(amount))
        .ok_or(WalletError::SumOverflow)
}

fn input_total(inputs: &[InputInfo]) -> u64 {
    inputs
        .iter()
        .fold(0u64, |sum, input| sum.saturating_add(input.output.amount))
}

impl WalletData {
    fn source_accounts(&self, wallet: &Wallet, addresses: &[String]) -> Result<Vec<usize>> {
        addresses
            .iter()
            .map(|address| match self.account_index(&wallet.currency, address) {
                Err(WalletError::ObjectNotFound(_)) => Err(WalletError::BadAddress(format!(
                    "{address} does not belong to the wallet"
                ))),
                other => other,
            })
            .collect()
    }

    /// Where change goes: the explicit address, the only source, or the
    /// only address of the wallet
    fn change_account(
        &self,
        wallet: &Wallet,
        change_destination: Option<&str>,
        sources: &[usize],
    ) -> Result<usize> {
        if let Some(address) = change_destination {
            return self.source_accounts(wallet, &[address.to_string()])?.first().copied().ok_or(
                WalletError::ChangeAddressRequired,
            );
        }
        match (sources, self.accounts.len()) {
            ([only], _) => Ok(*only),
            ([], 1) => Ok(0),
            _ => Err(WalletError::ChangeAddressRequired),
        }
    }

    fn spending_accounts(&self, sources: Vec<usize>) -> Vec<usize> {
        if sources.is_empty() {
            (0..self.accounts.len()).collect()
        } else {
            sources
        }
    }

    fn own_addresses(&self) -> BTreeSet<AccountPublicAddress> {
        self.accounts.iter().map(|a| a.keys.address).collect()
    }
}

impl Wallet {
    /// Builds, records and relays a transfer; returns its transaction id
    pub fn transfer(&self, params: &TransactionParameters) -> Result<usize> {
        self.send_transfer(params, true)
    }

    /// Builds and records a transfer without relaying it. It stays in the
    /// history as `Created` until committed or rolled back.
    pub fn make_transaction(&self, params: &TransactionParameters) -> Result<usize> {
        self.send_transfer(params, false)
    }

    fn send_transfer(&self, params: &TransactionParameters, send: bool) -> Result<usize> {
        let _operation = self.begin_operation()?;
        let plan = {
            let inner = self.read();
            self.plan_transfer(inner.data()?, params)?
        };

        let needed = plan
            .destination_total
            .checked_add(params.fee)
            .ok_or(WalletError::SumOverflow)?;
        let dust = self.currency.default_dust_threshold;
        let (found, selected) = builder::select_transfers(needed, dust, &plan.wallets);
        if found < needed {
            return Err(WalletError::InsufficientFunds {
                required: needed,
                available: found,
            });
        }
        let inputs = self.prepare_inputs(selected, params.mix_in)?;

        let mut receivers = Vec::new();
        let mut transfers = Vec::new();
        for destination in &plan.destinations {
            receivers.push(ReceiverAmounts::split(destination.address, destination.amount, dust));
            transfers.push(WalletTransfer::usual(
                destination.text.clone(),
                signed(destination.amount),
            ));
        }
        let mut change = found - needed;
        if let Some((address, text, threshold)) = &plan.donation {
            let donation = builder::calculate_donation_amount(change, *threshold, dust);
            if donation > 0 {
                change -= donation;
                receivers.push(ReceiverAmounts::split(*address, donation, dust));
                transfers.push(WalletTransfer {
                    kind: WalletTransferKind::Donation,
                    address: text.clone(),
                    amount: signed(donation),
                });
            }
        }
        if change > 0 {
            let (address, text) = &plan.change;
            receivers.push(ReceiverAmounts::split(*address, change, dust));
            transfers.push(WalletTransfer {
                kind: WalletTransferKind::Change,
                address: text.clone(),
                amount: signed(change),
            });
        }

        let transaction = builder::make_transaction(
            &inputs,
            &receivers,
            None,
            &params.extra,
            params.unlock_timestamp,
            &plan.view_secret_key,
        )?;
        builder::check_transaction_size(&transaction, self.settings.upper_transaction_size_limit())?;

        let own_received = receivers
            .iter()
            .filter(|r| plan.own.contains(&r.receiver))
            .fold(0u64, |sum, r| sum.saturating_add(r.total()));
        self.record_and_send(
            Outgoing {
                transaction,
                transfers,
                fee: params.fee,
                total_amount: signed(own_received) - signed(found),
                is_fusion: false,
            },
            send,
        )
    }

    fn plan_transfer(&self, data: &WalletData, params: &TransactionParameters) -> Result<TransferPlan> {
        if params.destinations.is_empty() {
            return Err(WalletError::ZeroDestination);
        }
        let mut destinations = Vec::with_capacity(params.destinations.len());
        for order in &params.destinations {
            if order.amount == 0 {
                return Err(WalletError::ZeroDestination);
            }
            destinations.push(Receiver {
                address: self.currency.parse_account_address_string(&order.address)?,
                text: order.address.clone(),
                amount: order.amount,
            });
        }
        let destination_total = sum_amounts(destinations.iter().map(|d| d.amount))?;
        if destination_total
            .checked_add(params.fee)
            .map_or(true, |total| total > i64::MAX as u64)
        {
            return Err(WalletError::SumOverflow);
        }

        let donation = match params.donation.as_ref().or(self.settings.donation.as_ref()) {
            Some(policy) => Some((
                self.currency.parse_account_address_string(&policy.address)?,
                policy.address.clone(),
                policy.threshold,
            )),
            None => None,
        };

        let sources = data.source_accounts(self, &params.source_addresses)?;
        let change = data.change_account(self, params.change_destination.as_deref(), &sources)?;
        if data.is_tracking() {
            return Err(WalletError::TrackingMode);
        }

        let accounts = data.spending_accounts(sources);
        Ok(TransferPlan {
            wallets: data.wallet_outs(&accounts, IncludeFlags::KEY_UNLOCKED)?,
            destinations,
            destination_total,
            change: (
                data.accounts[change].keys.address,
                data.address_string(&self.currency, change),
            ),
            donation,
            own: data.own_addresses(),
            view_secret_key: data.view_secret_key.clone(),
        })
    }

    /// Fetches decoys for the selected outputs and builds their rings
    fn prepare_inputs(&self, selected: Vec<OutputToTransfer>, mixin: u64) -> Result<Vec<InputInfo>> {
        let decoys = if mixin == 0 {
            Vec::new()
        } else {
            let amounts: Vec<u64> = selected.iter().map(|o| o.output.amount).collect();
            let count = mixin.saturating_add(1);
            let decoys = self
                .node_call(move |node| node.get_random_outputs_for_amounts(&amounts, count))?;
            self.check_stopped()?;
            builder::check_mixins(&decoys, mixin)?;
            decoys
        };
        builder::prepare_inputs(selected, &decoys, mixin)
    }

    /// Records `outgoing` as `Created`, feeds it to the ledgers and relays it
    /// when `send` is set
    fn record_and_send(&self, outgoing: Outgoing, send: bool) -> Result<usize> {
        let Outgoing {
            transaction,
            transfers,
            fee,
            total_amount,
            is_fusion,
        } = outgoing;
        let hash = transaction.hash()?;
        let creation_time = current_timestamp()?;

        let id = {
            let mut inner = self.write();
            let data = inner.data_mut()?;
            let id = data.index.insert_outgoing(
                WalletTransaction {
                    state: WalletTransactionState::Created,
                    hash,
                    block_height: UNCONFIRMED_TRANSACTION_HEIGHT,
                    timestamp: 0,
                    total_amount,
                    fee,
                    unlock_time: transaction.prefix.unlock_time,
                    extra: transaction.prefix.extra.clone(),
                    creation_time,
                    is_base: false,
                    first_deposit_id: None,
                    deposit_count: 0,
                },
                transfers,
                is_fusion,
            );
            self.events
                .push(WalletEvent::TransactionCreated { transaction_id: id });

            let fed = data
                .synchronizer
                .add_unconfirmed_transaction(hash, &transaction)
                .and_then(|events| self.handle_transfers_events(data, events));
            if let Err(e) = fed {
                data.index.set_state(id, WalletTransactionState::Failed);
                self.events
                    .push(WalletEvent::TransactionUpdated { transaction_id: id });
                return Err(e);
            }
            if !send {
                data.index.add_uncommitted(id, transaction.clone());
            }
            id
        };

        if !send {
            info!("Transaction {hash} built and kept for commit as {id}");
            return Ok(id);
        }
        match self.relay(&transaction) {
            Ok(()) => {
                self.mark_relayed(id)?;
                Ok(id)
            }
            Err(e) => {
                warn!("Transaction {hash} was not relayed: {e}");
                let mut inner = self.write();
                let data = inner.data_mut()?;
                if data.index.set_state(id, WalletTransactionState::Failed) {
                    self.events
                        .push(WalletEvent::TransactionUpdated { transaction_id: id });
                }
                let events = data.synchronizer.remove_unconfirmed_transaction(&hash)?;
                self.handle_transfers_events(data, events)?;
                Err(e)
            }
        }
    }

    fn relay(&self, transaction: &Transaction) -> Result<()> {
        let transaction = transaction.clone();
        self.node_call(move |node| node.relay_transaction(&transaction))
    }

    fn mark_relayed(&self, id: usize) -> Result<()> {
        let mut inner = self.write();
        let data = inner.data_mut()?;
        data.index.remove_uncommitted(id);
        if data.index.set_state(id, WalletTransactionState::Succeeded) {
            self.events
                .push(WalletEvent::TransactionUpdated { transaction_id: id });
        }
        info!("Transaction {} relayed", data.index.transaction(id)?.hash);
        Ok(())
    }

    /// Relays a transaction built by `make_transaction`. A relay failure
    /// keeps it waiting so it can be committed again or rolled back.
    pub fn commit_transaction(&self, id: usize) -> Result<()> {
        let _operation = self.begin_operation()?;
        let transaction = {
            let inner = self.read();
            let data = inner.data()?;
            if data.is_tracking() {
                return Err(WalletError::TrackingMode);
            }
            let record = data.index.transaction(id)?;
            if record.state != WalletTransactionState::Created {
                return Err(WalletError::WrongState(format!(
                    "transaction {id} is {:?}",
                    record.state
                )));
            }
            data.index
                .uncommitted()
                .get(&id)
                .cloned()
                .ok_or(WalletError::TransferImpossible(id))?
        };
        self.relay(&transaction)?;
        self.mark_relayed(id)
    }

    /// Forgets a transaction built by `make_transaction`, releasing the
    /// outputs it would have spent
    pub fn rollback_uncommitted_transaction(&self, id: usize) -> Result<()> {
        let _operation = self.begin_operation()?;
        let mut inner = self.write();
        let data = inner.data_mut()?;
        if data.is_tracking() {
            return Err(WalletError::TrackingMode);
        }
        data.index.transaction(id)?;
        let hash = data
            .index
            .uncommitted()
            .get(&id)
            .ok_or(WalletError::CancelImpossible(id))?
            .hash()?;
        let events = data.synchronizer.remove_unconfirmed_transaction(&hash)?;
        self.handle_transfers_events(data, events)?;
        data.index.remove_uncommitted(id);
        info!("Transaction {hash} rolled back");
        Ok(())
    }

    /// Locks `amount` for `term` blocks in a deposit owned by `destination`
    /// (defaults to the source address, itself defaulting to the first one)
    pub fn create_deposit(
        &self,
        amount: u64,
        term: u32,
        source: Option<&str>,
        destination: Option<&str>,
    ) -> Result<usize> {
        self.currency.validate_deposit(amount, term)?;
        let _operation = self.begin_operation()?;
        let fee = self.currency.deposit_fee;
        let needed = amount.checked_add(fee).ok_or(WalletError::SumOverflow)?;

        let (wallets, source, receiver, view_secret_key) = {
            let inner = self.read();
            let data = inner.data()?;
            if data.is_tracking() {
                return Err(WalletError::TrackingMode);
            }
            let source = match source {
                Some(address) => data.source_accounts(self, &[address.to_string()])?[0],
                None if !data.accounts.is_empty() => 0,
                None => return Err(WalletError::ObjectNotFound("address".to_string())),
            };
            let receiver = match destination {
                Some(address) => data.source_accounts(self, &[address.to_string()])?[0],
                None => source,
            };
            (
                data.wallet_outs(&[source], IncludeFlags::KEY_UNLOCKED)?,
                (
                    data.accounts[source].keys.address,
                    data.address_string(&self.currency, source),
                ),
                (
                    data.accounts[receiver].keys.address,
                    data.address_string(&self.currency, receiver),
                ),
                data.view_secret_key.clone(),
            )
        };

        let dust = self.currency.default_dust_threshold;
        let (found, selected) = builder::select_transfers(needed, dust, &wallets);
        if found < needed {
            return Err(WalletError::InsufficientFunds {
                required: needed,
                available: found,
            });
        }
        let inputs = self.prepare_inputs(selected, self.settings.default_mixin)?;

        let change = found - needed;
        let mut receivers = Vec::new();
        let mut transfers = vec![WalletTransfer::usual(receiver.1.clone(), signed(amount))];
        if change > 0 {
            receivers.push(ReceiverAmounts::split(source.0, change, dust));
            transfers.push(WalletTransfer {
                kind: WalletTransferKind::Change,
                address: source.1.clone(),
                amount: signed(change),
            });
        }
        let deposit = DepositOutput {
            receiver: receiver.0,
            amount,
            term,
        };
        let transaction = builder::make_transaction(
            &inputs,
            &receivers,
            Some(&deposit),
            &[],
            0,
            &view_secret_key,
        )?;
        builder::check_transaction_size(&transaction, self.settings.upper_transaction_size_limit())?;

        let id = self.record_and_send(
            Outgoing {
                transaction,
                transfers,
                fee,
                total_amount: -signed(fee),
                is_fusion: false,
            },
            true,
        )?;
        info!("Deposit of {amount} for {term} blocks sent in transaction {id}");
        Ok(id)
    }

    /// Spends a matured deposit back to its owner, with interest and minus
    /// the minimum fee
    pub fn withdraw_deposit(&self, deposit_id: usize) -> Result<usize> {
        let _operation = self.begin_operation()?;
        let (output, keys, owner, payout, view_secret_key) = {
            let inner = self.read();
            let data = inner.data()?;
            let deposit = data.index.deposit(deposit_id)?;
            if deposit.locked
                || deposit.spending_transaction_id.is_some()
                || data.top_height() < deposit.unlock_height
            {
                return Err(WalletError::DepositLocked(deposit_id));
            }

            let mut owned = None;
            for account in 0..data.accounts.len() {
                if let Some((output, state)) = data
                    .container(account)?
                    .transfer(&deposit.transaction_hash, deposit.output_in_transaction)
                {
                    owned = Some((account, output, state));
                    break;
                }
            }
            let (account, output, state) = owned.ok_or(WalletError::DepositNotFound(deposit_id))?;
            if state != TransferState::Available {
                return Err(WalletError::DepositLocked(deposit_id));
            }
            let keys = data.accounts[account].keys.clone();
            if keys.is_tracking() {
                return Err(WalletError::TrackingMode);
            }

            let total = deposit.amount.saturating_add(deposit.interest);
            let fee = self.currency.minimum_fee;
            let payout = total.checked_sub(fee).ok_or(WalletError::InsufficientFunds {
                required: fee,
                available: total,
            })?;
            (
                output,
                keys,
                data.address_string(&self.currency, account),
                payout,
                data.view_secret_key.clone(),
            )
        };

        let receivers = ReceiverAmounts::split(
            keys.address,
            payout,
            self.currency.default_dust_threshold,
        );
        let transaction =
            builder::make_withdrawal(&output, &keys, &receivers, &view_secret_key)?;
        builder::check_transaction_size(&transaction, self.settings.upper_transaction_size_limit())?;

        let id = self.record_and_send(
            Outgoing {
                transaction,
                transfers: vec![WalletTransfer::usual(owner, signed(payout))],
                fee: self.currency.minimum_fee,
                total_amount: signed(payout) - signed(output.amount),
                is_fusion: false,
            },
            true,
        )?;
        info!("Deposit {deposit_id} withdrawn in transaction {id}");
        Ok(id)
    }

    /// Counts the outputs a fusion below `threshold` could merge
    pub fn estimate(&self, threshold: u64, source_addresses: &[String]) -> Result<FusionEstimate> {
        let inner = self.read();
        let data = inner.data()?;
        let sources = data.source_accounts(self, source_addresses)?;
        let wallets =
            data.wallet_outs(&data.spending_accounts(sources), IncludeFlags::KEY_UNLOCKED)?;
        Ok(fusion::estimate(&self.currency, threshold, &wallets))
    }

    /// Merges small outputs of one denomination bucket into canonical ones
    /// at zero fee
    pub fn create_fusion_transaction(
        &self,
        threshold: u64,
        mixin: u64,
        source_addresses: &[String],
        destination: Option<&str>,
    ) -> Result<usize> {
        let _operation = self.begin_operation()?;
        let dust_threshold = self.currency.default_dust_threshold;
        if threshold <= dust_threshold {
            return Err(WalletError::ThresholdTooLow {
                threshold,
                dust_threshold,
            });
        }
        let min_input_count = self.currency.fusion_tx_min_input_count;
        let max_input_count = self.currency.approximate_maximum_input_count(
            self.currency.fusion_tx_max_size,
            MAX_FUSION_OUTPUT_COUNT,
            usize::try_from(mixin).unwrap_or(usize::MAX),
        );
        if max_input_count < min_input_count {
            return Err(WalletError::MixinTooLarge {
                amount: 0,
                requested: mixin,
                available: 0,
            });
        }

        let (wallets, receiver, view_secret_key) = {
            let inner = self.read();
            let data = inner.data()?;
            let sources = data.source_accounts(self, source_addresses)?;
            let receiver = data.change_account(self, destination, &sources)?;
            if data.is_tracking() {
                return Err(WalletError::TrackingMode);
            }
            (
                data.wallet_outs(&data.spending_accounts(sources), IncludeFlags::KEY_UNLOCKED)?,
                data.accounts[receiver].keys.address,
                data.view_secret_key.clone(),
            )
        };

        let selected = fusion::pick_random_fusion_inputs(
            &self.currency,
            threshold,
            min_input_count,
            max_input_count,
            &wallets,
        );
        if selected.len() < min_input_count {
            return Err(WalletError::NothingToOptimize);
        }
        let mut inputs = self.prepare_inputs(selected, mixin)?;

        // inputs are sorted by amount, so dropping the last one sheds the largest
        let transaction = loop {
            let outputs = fusion::fusion_outputs(&self.currency, receiver, input_total(&inputs));
            let transaction = builder::make_transaction(
                &inputs,
                std::slice::from_ref(&outputs),
                None,
                &[],
                0,
                &view_secret_key,
            )?;
            if transaction.binary_size()? <= self.currency.fusion_tx_max_size {
                break transaction;
            }
            inputs.pop();
            if inputs.len() < min_input_count {
                return Err(WalletError::MinimumInputCount {
                    required: min_input_count,
                    actual: inputs.len(),
                });
            }
        };

        let id = self.record_and_send(
            Outgoing {
                transaction,
                transfers: Vec::new(),
                fee: 0,
                total_amount: 0,
                is_fusion: true,
            },
            true,
        )?;
        info!("Fusion transaction {id} merged {} inputs", inputs.len());
        Ok(id)
    }

    pub fn is_fusion_transaction(&self, id: usize) -> Result<bool> {
        let inner = self.read();
        let data = inner.data()?;
        let transaction = data.index.transaction(id)?;
        match data.index.fusion_status(id) {
            Some(is_fusion) => Ok(is_fusion),
            None => detect_fusion(&self.currency, data, transaction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalletSettings;
    use crate::core::AccountKeys;
    use crate::testnet::{funded_wallet, FundedWallet};
    use crate::wallet::types::WalletOrder;

    fn pay(wallet: &Wallet, amount: u64, fee: u64) -> TransactionParameters {
        TransactionParameters {
            destinations: vec![WalletOrder {
                address: wallet
                    .currency()
                    .account_address_as_string(&AccountKeys::generate().address),
                amount,
            }],
            fee,
            mix_in: 0,
            ..Default::default()
        }
    }

    fn funded(amounts: &[u64]) -> FundedWallet {
        funded_wallet(WalletSettings::default(), amounts).unwrap()
    }

    #[test]
    fn test_transfer_records_and_relays() {
        let FundedWallet { wallet, node, .. } = funded(&[1_000_000]);
        assert_eq!(wallet.balance().unwrap().actual, 1_000_000);

        let id = wallet.transfer(&pay(&wallet, 700_000, 1_000)).unwrap();
        let record = wallet.transaction(id).unwrap();
        assert_eq!(record.state, WalletTransactionState::Succeeded);
        assert_eq!(record.fee, 1_000);
        assert_eq!(record.total_amount, -701_000);
        assert!(!record.is_confirmed());
        assert_eq!(node.pool_size().unwrap(), 1);

        let transfers = wallet.transaction_transfers(id).unwrap();
        assert!(transfers
            .iter()
            .any(|t| t.kind == WalletTransferKind::Usual && t.amount == 700_000));
        assert!(transfers
            .iter()
            .any(|t| t.kind == WalletTransferKind::Change && t.amount == 299_000));
        assert_eq!(wallet.balance().unwrap().actual, 0);
        assert!(!wallet.is_fusion_transaction(id).unwrap());
    }

    #[test]
    fn test_transfer_validation() {
        let FundedWallet { wallet, .. } = funded(&[1_000_000]);
        assert_eq!(
            wallet.transfer(&TransactionParameters::default()),
            Err(WalletError::ZeroDestination)
        );
        assert_eq!(
            wallet.transfer(&pay(&wallet, 0, 10)),
            Err(WalletError::ZeroDestination)
        );

        let mut bad = pay(&wallet, 10, 10);
        bad.destinations[0].address = "not an address".to_string();
        assert!(matches!(wallet.transfer(&bad), Err(WalletError::BadAddress(_))));

        let mut overflow = pay(&wallet, u64::MAX, 10);
        overflow.destinations.push(overflow.destinations[0].clone());
        assert_eq!(wallet.transfer(&overflow), Err(WalletError::SumOverflow));

        assert_eq!(
            wallet.transfer(&pay(&wallet, 1_000_000, 10)),
            Err(WalletError::InsufficientFunds {
                required: 1_000_010,
                available: 1_000_000
            })
        );

        let mut foreign = pay(&wallet, 10, 10);
        foreign.source_addresses = vec![foreign.destinations[0].address.clone()];
        assert!(matches!(wallet.transfer(&foreign), Err(WalletError::BadAddress(_))));

        wallet.create_address().unwrap();
        assert_eq!(
            wallet.transfer(&pay(&wallet, 10, 10)),
            Err(WalletError::ChangeAddressRequired)
        );
        assert_eq!(wallet.transaction_count().unwrap(), 1);
    }

    #[test]
    fn test_mixin_without_decoys() {
        let FundedWallet { wallet, .. } = funded(&[1_000_000]);
        let mut params = pay(&wallet, 500_000, 10);
        params.mix_in = 3;
        assert!(matches!(
            wallet.transfer(&params),
            Err(WalletError::MixinTooLarge { requested: 3, .. })
        ));
        assert_eq!(wallet.transaction_count().unwrap(), 1);
        assert_eq!(wallet.balance().unwrap().actual, 1_000_000);
    }

    #[test]
    fn test_commit_and_rollback() {
        let FundedWallet { wallet, node, .. } = funded(&[500_000, 500_000]);

        let first = wallet.make_transaction(&pay(&wallet, 100_000, 10)).unwrap();
        assert_eq!(
            wallet.transaction(first).unwrap().state,
            WalletTransactionState::Created
        );
        assert_eq!(wallet.delayed_transaction_ids().unwrap(), vec![first]);
        assert_eq!(node.pool_size().unwrap(), 0);

        wallet.commit_transaction(first).unwrap();
        assert_eq!(
            wallet.transaction(first).unwrap().state,
            WalletTransactionState::Succeeded
        );
        assert_eq!(node.pool_size().unwrap(), 1);
        assert!(wallet.delayed_transaction_ids().unwrap().is_empty());
        assert!(matches!(
            wallet.commit_transaction(first),
            Err(WalletError::WrongState(_))
        ));

        let second = wallet.make_transaction(&pay(&wallet, 100_000, 10)).unwrap();
        assert_eq!(wallet.balance().unwrap().actual, 0);
        wallet.rollback_uncommitted_transaction(second).unwrap();
        assert_eq!(
            wallet.transaction(second).unwrap().state,
            WalletTransactionState::Cancelled
        );
        assert_eq!(wallet.balance().unwrap().actual, 500_000);
        assert_eq!(
            wallet.rollback_uncommitted_transaction(second),
            Err(WalletError::CancelImpossible(second))
        );
        assert_eq!(
            wallet.commit_transaction(second),
            Err(WalletError::WrongState(format!(
                "transaction {second} is Cancelled"
            )))
        );
    }

    #[test]
    fn test_relay_failure_rolls_back() {
        let FundedWallet { wallet, node, .. } = funded(&[1_000_000]);
        node.set_relay_failure(true).unwrap();

        assert!(matches!(
            wallet.transfer(&pay(&wallet, 100_000, 10)),
            Err(WalletError::Network(_))
        ));
        assert_eq!(
            wallet.transaction(1).unwrap().state,
            WalletTransactionState::Failed
        );
        assert_eq!(wallet.balance().unwrap().actual, 1_000_000);

        // the failed commit keeps the transaction for another try
        let id = wallet.make_transaction(&pay(&wallet, 100_000, 10)).unwrap();
        assert!(wallet.commit_transaction(id).is_err());
        assert_eq!(wallet.delayed_transaction_ids().unwrap(), vec![id]);
        node.set_relay_failure(false).unwrap();
        wallet.commit_transaction(id).unwrap();
        assert_eq!(node.pool_size().unwrap(), 1);
    }

    #[test]
    fn test_fusion() {
        let FundedWallet { wallet, node, .. } = funded(&[100; 20]);
        assert_eq!(
            wallet.create_fusion_transaction(10, 0, &[], None),
            Err(WalletError::ThresholdTooLow {
                threshold: 10,
                dust_threshold: 10
            })
        );
        let estimate = wallet.estimate(1_000, &[]).unwrap();
        assert_eq!(estimate.fusion_ready_count, 20);
        assert_eq!(estimate.total_output_count, 20);

        let id = wallet.create_fusion_transaction(1_000, 0, &[], None).unwrap();
        let record = wallet.transaction(id).unwrap();
        assert_eq!(record.fee, 0);
        assert_eq!(record.total_amount, 0);
        assert!(wallet.is_fusion_transaction(id).unwrap());
        assert_eq!(node.pool_size().unwrap(), 1);

        assert_eq!(
            wallet.create_fusion_transaction(1_000, 0, &[], None),
            Err(WalletError::NothingToOptimize)
        );
    }
}
