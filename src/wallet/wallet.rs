//! The wallet facade
//!
//! A `Wallet` owns the view key, every tracked address, the per-address
//! ledgers behind a [`TransfersSynchronizer`], the history index and the
//! known block chain. Callers drive it explicitly: `synchronize` pulls from
//! the node, `transfer` and friends build and relay transactions, and
//! wallet-level events are pulled from a blocking queue.
//!
//! Locking: `operation` serializes every operation that talks to the node,
//! writes the file or adds and removes addresses; `inner` guards the data
//! and is never held across a node call. Read-only queries only take
//! `inner`. Node calls run on a helper thread so `stop` can abandon them.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;
use zeroize::Zeroizing;

use super::builder::WalletOuts;
use super::events::{EventQueue, WalletEvent};
use super::index::WalletIndex;
use super::types::{
    Balance, Deposit, TransactionWithTransfers, TransactionsInBlock, WalletState, WalletTransaction,
    WalletTransactionState, WalletTransfer,
};
use crate::config::WalletSettings;
use crate::core::{AccountKeys, AccountPublicAddress, Currency};
use crate::crypto::{generate_keys, secret_key_to_public_key, Hash, PublicKey, SecretKey};
use crate::error::{Result, WalletError};
use crate::network::Node;
use crate::storage::{
    read_wallet_file, write_wallet_file, SaveLevel, StoredAccount, StoredKeys, WalletPayload,
};
use crate::transfers::{
    AccountSubscription, IncludeFlags, SynchronizationStart, SynchronizerSnapshot,
    TransfersContainer, TransfersSynchronizer,
};
use crate::utils::{current_timestamp, deserialize, serialize};

/// How often a pending node call looks at the stop flag
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub(super) struct WalletAccount {
    pub keys: AccountKeys,
    pub creation_timestamp: u64,
}

/// Everything a full save writes next to the keys
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct WalletCache {
    synchronizer: SynchronizerSnapshot,
    index: WalletIndex,
    known_blocks: Vec<Hash>,
}

pub(super) struct WalletData {
    pub path: PathBuf,
    pub password: Zeroizing<String>,
    pub view_public_key: PublicKey,
    pub view_secret_key: SecretKey,
    pub accounts: Vec<WalletAccount>,
    pub synchronizer: TransfersSynchronizer,
    pub index: WalletIndex,
    /// Hashes of the main chain as far as the wallet has seen it
    pub known_blocks: Vec<Hash>,
}

impl WalletData {
    fn new(
        currency: &Currency,
        path: &Path,
        password: &str,
        view_public_key: PublicKey,
        view_secret_key: SecretKey,
    ) -> Self {
        WalletData {
            path: path.to_path_buf(),
            password: Zeroizing::new(password.to_string()),
            view_public_key,
            view_secret_key,
            accounts: Vec::new(),
            synchronizer: TransfersSynchronizer::new(currency.clone()),
            index: WalletIndex::new(),
            known_blocks: Vec::new(),
        }
    }

    pub fn find_account(&self, address: &AccountPublicAddress) -> Option<usize> {
        self.accounts.iter().position(|a| a.keys.address == *address)
    }

    /// Index of the account behind `text`
    pub fn account_index(&self, currency: &Currency, text: &str) -> Result<usize> {
        let address = currency.parse_account_address_string(text)?;
        self.find_account(&address)
            .ok_or_else(|| WalletError::ObjectNotFound(format!("address {text}")))
    }

    pub fn address_string(&self, currency: &Currency, account: usize) -> String {
        currency.account_address_as_string(&self.accounts[account].keys.address)
    }

    pub fn address_strings(&self, currency: &Currency) -> Vec<String> {
        self.accounts
            .iter()
            .map(|a| currency.account_address_as_string(&a.keys.address))
            .collect()
    }

    /// A wallet is tracking when its addresses have no spend secret
    pub fn is_tracking(&self) -> bool {
        self.accounts
            .first()
            .is_some_and(|account| account.keys.is_tracking())
    }

    pub fn container(&self, account: usize) -> Result<&TransfersContainer> {
        let address = &self.accounts[account].keys.address;
        self.synchronizer.container(address).ok_or_else(|| {
            WalletError::Internal(format!("No ledger for address {}", address.spend_public_key))
        })
    }

    pub fn balance(&self, account: usize) -> Result<Balance> {
        let container = self.container(account)?;
        Ok(Balance {
            actual: container.balance(IncludeFlags::KEY_UNLOCKED),
            pending: container.balance(IncludeFlags::KEY_NOT_UNLOCKED),
            locked_deposit: container.balance(
                IncludeFlags::TYPE_DEPOSIT
                    | IncludeFlags::STATE_LOCKED
                    | IncludeFlags::STATE_SOFT_LOCKED,
            ),
            unlocked_deposit: container
                .balance(IncludeFlags::TYPE_DEPOSIT | IncludeFlags::STATE_UNLOCKED),
        })
    }

    /// Outputs matching `flags` of the given accounts, one entry each
    pub fn wallet_outs(&self, accounts: &[usize], flags: IncludeFlags) -> Result<Vec<WalletOuts>> {
        accounts
            .iter()
            .map(|&account| {
                Ok(WalletOuts {
                    keys: self.accounts[account].keys.clone(),
                    outs: self.container(account)?.outputs(flags),
                })
            })
            .collect()
    }

    /// Height of the newest known block
    pub fn top_height(&self) -> u32 {
        self.known_blocks.len().saturating_sub(1) as u32
    }

    fn payload(&self, level: SaveLevel) -> Result<WalletPayload> {
        let keys = StoredKeys {
            view_public_key: self.view_public_key,
            view_secret_key: self.view_secret_key.clone(),
            accounts: self
                .accounts
                .iter()
                .map(|a| StoredAccount {
                    spend_public_key: a.keys.address.spend_public_key,
                    spend_secret_key: a.keys.spend_secret_key.clone(),
                    creation_timestamp: a.creation_timestamp,
                })
                .collect(),
        };
        let cache = match level {
            SaveLevel::KeysOnly => None,
            SaveLevel::Full => Some(serialize(&WalletCache {
                synchronizer: self.synchronizer.snapshot(),
                index: self.index.clone(),
                known_blocks: self.known_blocks.clone(),
            })?),
        };
        Ok(WalletPayload { keys, cache })
    }
}

pub(super) struct WalletInner {
    pub state: WalletState,
    pub data: Option<WalletData>,
}

impl WalletInner {
    pub fn data(&self) -> Result<&WalletData> {
        match (self.state, &self.data) {
            (WalletState::Initialized | WalletState::Saving, Some(data)) => Ok(data),
            (state, _) => Err(WalletError::WrongState(format!("wallet is {state:?}"))),
        }
    }

    pub fn data_mut(&mut self) -> Result<&mut WalletData> {
        match (self.state, self.data.as_mut()) {
            (WalletState::Initialized, Some(data)) => Ok(data),
            (state, _) => Err(WalletError::WrongState(format!("wallet is {state:?}"))),
        }
    }
}

pub struct Wallet {
    pub(super) settings: WalletSettings,
    pub(super) currency: Currency,
    pub(super) node: Arc<dyn Node>,
    operation: Mutex<()>,
    pub(super) inner: RwLock<WalletInner>,
    pub(super) events: EventQueue,
    stopped: AtomicBool,
}

impl Wallet {
    pub fn new(settings: WalletSettings, node: Arc<dyn Node>) -> Result<Self> {
        settings.validate()?;
        Ok(Wallet {
            currency: settings.currency.clone(),
            events: EventQueue::new(settings.event_queue_capacity),
            settings,
            node,
            operation: Mutex::new(()),
            inner: RwLock::new(WalletInner {
                state: WalletState::NotInitialized,
                data: None,
            }),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &WalletSettings {
        &self.settings
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub(super) fn read(&self) -> RwLockReadGuard<'_, WalletInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn write(&self) -> RwLockWriteGuard<'_, WalletInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn check_stopped(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(WalletError::OperationCancelled);
        }
        Ok(())
    }

    /// Serializes blocking operations; fails fast once the wallet is stopped
    pub(super) fn begin_operation(&self) -> Result<MutexGuard<'_, ()>> {
        self.check_stopped()?;
        let guard = self.operation.lock().unwrap_or_else(|e| e.into_inner());
        self.check_stopped()?;
        Ok(guard)
    }

    /// Serializes account changes with the operations above. Unlike
    /// `begin_operation` this ignores the stop flag.
    fn lock_accounts(&self) -> MutexGuard<'_, ()> {
        self.operation.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `call` against the node on its own thread and waits for the
    /// answer, returning `OperationCancelled` as soon as the wallet is
    /// stopped. A cancelled call still runs to its end; its answer is dropped.
    pub(super) fn node_call<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Node) -> Result<T> + Send + 'static,
    {
        self.check_stopped()?;
        let node = Arc::clone(&self.node);
        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("wallet-node-call".to_string())
            .spawn(move || {
                // nobody listens any more after a stop
                let _ = sender.send(call(node.as_ref()));
            })
            .map_err(|e| WalletError::Internal(format!("Cannot start node call: {e}")))?;

        loop {
            match receiver.recv_timeout(STOP_POLL_INTERVAL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = self.check_stopped() {
                        debug!("Node call abandoned, wallet stopped");
                        return Err(e);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WalletError::Internal(
                        "Node call ended without an answer".to_string(),
                    ))
                }
            }
        }
    }

    pub fn state(&self) -> WalletState {
        self.read().state
    }

    /// Creates a new wallet file with a fresh view key and one address
    pub fn initialize(&self, path: &Path, password: &str) -> Result<()> {
        let (view_public_key, view_secret_key) = generate_keys();
        let (_, spend_secret_key) = generate_keys();
        let keys = AccountKeys::from_secrets(spend_secret_key, view_secret_key.clone())?;
        self.create_wallet(path, password, view_public_key, view_secret_key, Some(keys))
    }

    /// Creates a tracking wallet around an existing view key. Addresses are
    /// added afterwards with [`create_tracking_address`](Self::create_tracking_address).
    pub fn initialize_with_view_key(
        &self,
        path: &Path,
        password: &str,
        view_secret_key: SecretKey,
    ) -> Result<()> {
        let view_public_key = secret_key_to_public_key(&view_secret_key)?;
        self.create_wallet(path, password, view_public_key, view_secret_key, None)
    }

    fn create_wallet(
        &self,
        path: &Path,
        password: &str,
        view_public_key: PublicKey,
        view_secret_key: SecretKey,
        first_account: Option<AccountKeys>,
    ) -> Result<()> {
        let _operation = self.begin_operation()?;
        self.enter_loading()?;
        let result =
            self.write_new_wallet(path, password, view_public_key, view_secret_key, first_account);
        self.finish_loading(result)?;
        info!("Wallet created at {}", path.display());
        Ok(())
    }

    fn write_new_wallet(
        &self,
        path: &Path,
        password: &str,
        view_public_key: PublicKey,
        view_secret_key: SecretKey,
        first_account: Option<AccountKeys>,
    ) -> Result<WalletData> {
        if path.exists() {
            return Err(WalletError::Io(format!("{} already exists", path.display())));
        }
        let mut data =
            WalletData::new(&self.currency, path, password, view_public_key, view_secret_key);
        if let Some(keys) = first_account {
            self.attach_account(&mut data, keys, current_timestamp()?)?;
        }
        write_wallet_file(path, password, &data.payload(SaveLevel::KeysOnly)?)?;
        Ok(data)
    }

    /// Opens an existing wallet file. An unreadable cache is dropped and the
    /// chain rescanned.
    pub fn load(&self, path: &Path, password: &str) -> Result<()> {
        let _operation = self.begin_operation()?;
        self.enter_loading()?;
        let result = self.read_wallet(path, password);
        self.finish_loading(result)?;
        info!("Wallet loaded from {}", path.display());
        Ok(())
    }

    fn enter_loading(&self) -> Result<()> {
        let mut inner = self.write();
        if inner.state != WalletState::NotInitialized {
            return Err(WalletError::WrongState(format!("wallet is {:?}", inner.state)));
        }
        inner.state = WalletState::Loading;
        Ok(())
    }

    fn finish_loading(&self, result: Result<WalletData>) -> Result<()> {
        let mut inner = self.write();
        match result {
            Ok(data) => {
                inner.data = Some(data);
                inner.state = WalletState::Initialized;
                Ok(())
            }
            Err(e) => {
                inner.state = WalletState::NotInitialized;
                Err(e)
            }
        }
    }

    fn read_wallet(&self, path: &Path, password: &str) -> Result<WalletData> {
        let payload = read_wallet_file(path, password)?;
        let keys = payload.keys;
        if secret_key_to_public_key(&keys.view_secret_key)? != keys.view_public_key {
            return Err(WalletError::Crypto(
                "Stored view keys do not match".to_string(),
            ));
        }

        let mut data = WalletData::new(
            &self.currency,
            path,
            password,
            keys.view_public_key,
            keys.view_secret_key.clone(),
        );
        for stored in &keys.accounts {
            let account = match &stored.spend_secret_key {
                Some(secret) => AccountKeys::from_secrets(secret.clone(), keys.view_secret_key.clone())?,
                None => AccountKeys::tracking(stored.spend_public_key, keys.view_secret_key.clone())?,
            };
            if account.address.spend_public_key != stored.spend_public_key {
                return Err(WalletError::Crypto(format!(
                    "Stored spend keys of {} do not match",
                    stored.spend_public_key
                )));
            }
            self.attach_account(&mut data, account, stored.creation_timestamp)?;
        }

        if let Some(bytes) = payload.cache {
            if let Err(e) = Self::restore_cache(&mut data, &bytes) {
                warn!("Wallet cache is unusable, rescanning the chain: {e}");
                let accounts = std::mem::take(&mut data.accounts);
                data.synchronizer = TransfersSynchronizer::new(self.currency.clone());
                data.index = WalletIndex::new();
                data.known_blocks.clear();
                for account in accounts {
                    self.attach_account(&mut data, account.keys, account.creation_timestamp)?;
                }
            }
        }
        Ok(data)
    }

    fn restore_cache(data: &mut WalletData, bytes: &[u8]) -> Result<()> {
        let cache: WalletCache = deserialize(bytes)?;
        data.synchronizer.restore(cache.synchronizer)?;
        let uncommitted: BTreeSet<Hash> = cache
            .index
            .uncommitted()
            .values()
            .map(|t| t.hash())
            .collect::<Result<_>>()?;
        data.synchronizer.init_transaction_pool(&uncommitted);
        data.index = cache.index;
        data.known_blocks = cache.known_blocks;
        Ok(())
    }

    /// Writes the wallet file; `Full` includes the ledgers and history
    pub fn save(&self, level: SaveLevel) -> Result<()> {
        let _operation = self.begin_operation()?;
        self.save_locked(level)
    }

    fn save_locked(&self, level: SaveLevel) -> Result<()> {
        let (path, password, payload) = {
            let mut inner = self.write();
            let data = inner.data_mut()?;
            let prepared = (data.path.clone(), data.password.clone(), data.payload(level)?);
            inner.state = WalletState::Saving;
            prepared
        };
        let result = write_wallet_file(&path, &password, &payload);
        self.write().state = WalletState::Initialized;
        result
    }

    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let _operation = self.begin_operation()?;
        {
            let mut inner = self.write();
            let data = inner.data_mut()?;
            if data.password.as_str() != old_password {
                return Err(WalletError::WrongPassword);
            }
            data.password = Zeroizing::new(new_password.to_string());
        }
        info!("Wallet password changed");
        self.save_locked(SaveLevel::Full)
    }

    /// Drops all in-memory state without saving
    pub fn shutdown(&self) -> Result<()> {
        let _operation = self.operation.lock().unwrap_or_else(|e| e.into_inner());
        let mut inner = self.write();
        if inner.state != WalletState::Initialized {
            return Err(WalletError::WrongState(format!("wallet is {:?}", inner.state)));
        }
        inner.state = WalletState::ShuttingDown;
        inner.data = None;
        self.events.clear();
        inner.state = WalletState::NotInitialized;
        info!("Wallet shut down");
        Ok(())
    }

    /// Cancels blocking calls: waiters on the event queue and every later
    /// node-facing operation fail with `OperationCancelled` until `start`
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.events.stop();
        debug!("Wallet stopped");
    }

    pub fn start(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        self.events.start();
        debug!("Wallet started");
    }

    pub(super) fn attach_account(
        &self,
        data: &mut WalletData,
        keys: AccountKeys,
        creation_timestamp: u64,
    ) -> Result<String> {
        let address = self.currency.account_address_as_string(&keys.address);
        if keys.address.view_public_key != data.view_public_key {
            return Err(WalletError::Internal(format!(
                "Address {address} does not use the wallet view key"
            )));
        }
        if data.find_account(&keys.address).is_some() {
            return Err(WalletError::AddressAlreadyExists(address));
        }
        if let Some(first) = data.accounts.first() {
            if first.keys.is_tracking() != keys.is_tracking() {
                return Err(WalletError::WrongState(
                    "tracking and spending addresses cannot share a wallet".to_string(),
                ));
            }
        }
        data.synchronizer.add_subscription(AccountSubscription {
            keys: keys.clone(),
            sync_start: SynchronizationStart {
                timestamp: creation_timestamp,
                height: 0,
            },
            transaction_spendable_age: self.currency.transaction_spendable_age,
        })?;
        data.accounts.push(WalletAccount {
            keys,
            creation_timestamp,
        });
        Ok(address)
    }

    fn add_account(&self, keys: AccountKeys, creation_timestamp: u64) -> Result<String> {
        // a sync in flight would hand the new ledger only the blocks it fetched
        let _accounts = self.lock_accounts();
        let address = {
            let mut inner = self.write();
            let data = inner.data_mut()?;
            self.attach_account(data, keys, creation_timestamp)?
        };
        info!("Created address {address}");
        Ok(address)
    }

    /// New random address; only blocks from now on are scanned for it
    pub fn create_address(&self) -> Result<String> {
        let view_secret_key = self.read().data()?.view_secret_key.clone();
        let (_, spend_secret_key) = generate_keys();
        let keys = AccountKeys::from_secrets(spend_secret_key, view_secret_key)?;
        self.add_account(keys, current_timestamp()?)
    }

    /// Imports an address from its spend secret and rescans the whole chain for it
    pub fn create_address_from_secret(&self, spend_secret_key: SecretKey) -> Result<String> {
        let view_secret_key = self.read().data()?.view_secret_key.clone();
        let keys = AccountKeys::from_secrets(spend_secret_key, view_secret_key)?;
        self.add_account(keys, 0)
    }

    /// View-only address; its outputs are seen but cannot be spent
    pub fn create_tracking_address(&self, spend_public_key: PublicKey) -> Result<String> {
        let view_secret_key = self.read().data()?.view_secret_key.clone();
        let keys = AccountKeys::tracking(spend_public_key, view_secret_key)?;
        self.add_account(keys, 0)
    }

    pub fn delete_address(&self, address: &str) -> Result<()> {
        let _accounts = self.lock_accounts();
        let events = {
            let mut inner = self.write();
            let data = inner.data_mut()?;
            let account = data.account_index(&self.currency, address)?;
            let removed = data.accounts.remove(account);
            data.synchronizer.remove_subscription(&removed.keys.address);
            let remaining: BTreeSet<String> =
                data.address_strings(&self.currency).into_iter().collect();
            let events = data.index.delete_transfers_for_address(address, &remaining);
            if data.accounts.is_empty() {
                data.known_blocks.clear();
            }
            events
        };
        self.events.extend(events);
        info!("Deleted address {address}");
        Ok(())
    }

    pub fn addresses(&self) -> Result<Vec<String>> {
        Ok(self.read().data()?.address_strings(&self.currency))
    }

    pub fn address_count(&self) -> Result<usize> {
        Ok(self.read().data()?.accounts.len())
    }

    pub fn account_keys(&self, address: &str) -> Result<AccountKeys> {
        let inner = self.read();
        let data = inner.data()?;
        let account = data.account_index(&self.currency, address)?;
        Ok(data.accounts[account].keys.clone())
    }

    pub fn view_key(&self) -> Result<(PublicKey, SecretKey)> {
        let inner = self.read();
        let data = inner.data()?;
        Ok((data.view_public_key, data.view_secret_key.clone()))
    }

    pub fn is_tracking(&self) -> Result<bool> {
        Ok(self.read().data()?.is_tracking())
    }

    /// Aggregate balance of every address
    pub fn balance(&self) -> Result<Balance> {
        let inner = self.read();
        let data = inner.data()?;
        let mut total = Balance::default();
        for account in 0..data.accounts.len() {
            let balance = data.balance(account)?;
            total.actual = total.actual.saturating_add(balance.actual);
            total.pending = total.pending.saturating_add(balance.pending);
            total.locked_deposit = total.locked_deposit.saturating_add(balance.locked_deposit);
            total.unlocked_deposit = total
                .unlocked_deposit
                .saturating_add(balance.unlocked_deposit);
        }
        Ok(total)
    }

    pub fn address_balance(&self, address: &str) -> Result<Balance> {
        let inner = self.read();
        let data = inner.data()?;
        data.balance(data.account_index(&self.currency, address)?)
    }

    pub fn transaction_count(&self) -> Result<usize> {
        Ok(self.read().data()?.index.transaction_count())
    }

    pub fn transaction(&self, id: usize) -> Result<WalletTransaction> {
        Ok(self.read().data()?.index.transaction(id)?.clone())
    }

    pub fn transaction_transfers(&self, id: usize) -> Result<Vec<WalletTransfer>> {
        let inner = self.read();
        let index = &inner.data()?.index;
        index.transaction(id)?;
        Ok(index.transfers(id).to_vec())
    }

    pub fn transaction_by_hash(&self, hash: &Hash) -> Result<TransactionWithTransfers> {
        let inner = self.read();
        let index = &inner.data()?.index;
        let id = index
            .transaction_id(hash)
            .ok_or_else(|| WalletError::ObjectNotFound(format!("transaction {hash}")))?;
        Ok(TransactionWithTransfers {
            transaction: index.transaction(id)?.clone(),
            transfers: index.transfers(id).to_vec(),
        })
    }

    /// Succeeded transactions of `count` known blocks starting at `start`
    pub fn transactions_in_blocks(
        &self,
        start: u32,
        count: usize,
    ) -> Result<Vec<TransactionsInBlock>> {
        let inner = self.read();
        let data = inner.data()?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let start = start as usize;
        if start >= data.known_blocks.len() {
            return Err(WalletError::IndexOutOfRange {
                index: start,
                len: data.known_blocks.len(),
            });
        }
        let end = start.saturating_add(count).min(data.known_blocks.len());
        let index = &data.index;
        Ok((start..end)
            .map(|height| TransactionsInBlock {
                block_hash: data.known_blocks[height],
                transactions: index
                    .transactions()
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| {
                        t.block_height as usize == height
                            && t.state == WalletTransactionState::Succeeded
                    })
                    .map(|(id, t)| TransactionWithTransfers {
                        transaction: t.clone(),
                        transfers: index.transfers(id).to_vec(),
                    })
                    .collect(),
            })
            .collect())
    }

    /// Relayed transactions still waiting for a block
    pub fn unconfirmed_transactions(&self) -> Result<Vec<TransactionWithTransfers>> {
        let inner = self.read();
        let index = &inner.data()?.index;
        Ok(index
            .transactions()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state == WalletTransactionState::Succeeded && !t.is_confirmed())
            .map(|(id, t)| TransactionWithTransfers {
                transaction: t.clone(),
                transfers: index.transfers(id).to_vec(),
            })
            .collect())
    }

    /// Transactions built with `make_transaction` and not committed yet
    pub fn delayed_transaction_ids(&self) -> Result<Vec<usize>> {
        let inner = self.read();
        let data = inner.data()?;
        if data.is_tracking() {
            return Err(WalletError::TrackingMode);
        }
        Ok(data.index.uncommitted().keys().copied().collect())
    }

    pub fn block_count(&self) -> Result<u32> {
        Ok(self.read().data()?.known_blocks.len() as u32)
    }

    pub fn deposit(&self, id: usize) -> Result<Deposit> {
        Ok(self.read().data()?.index.deposit(id)?.clone())
    }

    pub fn deposit_count(&self) -> Result<usize> {
        Ok(self.read().data()?.index.deposits().len())
    }

    /// Blocks until the next event; fails with `OperationCancelled` once stopped
    pub fn get_event(&self) -> Result<WalletEvent> {
        self.check_stopped()?;
        self.events.wait()
    }

    pub fn wait_event(&self, timeout: Duration) -> Result<Option<WalletEvent>> {
        self.check_stopped()?;
        self.events.wait_timeout(timeout)
    }

    pub fn try_get_event(&self) -> Option<WalletEvent> {
        self.events.try_next()
    }
}
