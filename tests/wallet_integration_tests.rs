//! Wallet integration tests
//!
//! Drives whole wallets against the in-memory node: receiving, sending,
//! reorganizations, fusion, deposits and persistence.

use conceal_wallet::crypto::{generate_keys, Hash};
use conceal_wallet::network::{NewBlocks, Node, PoolChanges, RandomOutputs};
use conceal_wallet::{
    AccountKeys, InMemoryNode, Result, SaveLevel, Transaction, TransactionParameters, Wallet,
    WalletError, WalletEvent, WalletOrder, WalletSettings, WalletTransactionState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

const PASSWORD: &str = "integration";

struct Fixture {
    node: Arc<InMemoryNode>,
    wallet: Wallet,
    address: String,
    dir: TempDir,
}

fn settings() -> WalletSettings {
    let mut settings = WalletSettings::default();
    settings.default_mixin = 0;
    settings.currency.deposit_min_term = 20;
    settings
}

fn new_wallet(node: &Arc<InMemoryNode>, dir: &TempDir, name: &str) -> (Wallet, String) {
    let wallet = Wallet::new(settings(), node.clone()).unwrap();
    wallet.initialize(&dir.path().join(name), PASSWORD).unwrap();
    let address = wallet.addresses().unwrap().remove(0);
    (wallet, address)
}

/// A wallet paid `amounts` in one coinbase, unlocked and synchronized
fn funded(amounts: &[u64]) -> Fixture {
    let dir = tempdir().unwrap();
    let node = Arc::new(InMemoryNode::new(settings().currency).unwrap());
    let (wallet, address) = new_wallet(&node, &dir, "wallet.ccx");
    let keys = wallet.account_keys(&address).unwrap();
    let payments: Vec<_> = amounts.iter().map(|a| (keys.address, *a)).collect();
    node.mine_block_paying(&payments).unwrap();
    node.mine_blocks(10).unwrap();
    wallet.synchronize().unwrap();
    Fixture {
        node,
        wallet,
        address,
        dir,
    }
}

fn payment(to: &str, amount: u64, fee: u64, mix_in: u64) -> TransactionParameters {
    TransactionParameters {
        destinations: vec![WalletOrder {
            address: to.to_string(),
            amount,
        }],
        fee,
        mix_in,
        ..Default::default()
    }
}

fn stranger(wallet: &Wallet) -> String {
    wallet
        .currency()
        .account_address_as_string(&AccountKeys::generate().address)
}

fn drain_events(wallet: &Wallet) -> Vec<WalletEvent> {
    std::iter::from_fn(|| wallet.try_get_event()).collect()
}

#[test]
fn test_receive_then_spend() {
    let Fixture { node, wallet, .. } = funded(&[1_000_000]);
    let events = drain_events(&wallet);
    assert!(events.contains(&WalletEvent::TransactionCreated { transaction_id: 0 }));
    assert_eq!(events.last(), Some(&WalletEvent::SyncCompleted));
    assert_eq!(wallet.balance().unwrap().actual, 1_000_000);
    assert_eq!(wallet.block_count().unwrap(), 12);
    assert!(wallet.transaction(0).unwrap().is_base);

    let to = stranger(&wallet);
    let id = wallet
        .transfer(&payment(&to, 700_000, 1_000, 0))
        .unwrap();
    node.mine_block().unwrap();
    wallet.synchronize().unwrap();

    let record = wallet.transaction(id).unwrap();
    assert_eq!(record.state, WalletTransactionState::Succeeded);
    assert_eq!(record.block_height, 12);
    assert_eq!(record.fee, 1_000);
    assert_eq!(record.total_amount, -701_000);

    let blocks = node.get_new_blocks(&[]).unwrap().blocks;
    let sent = &blocks[12].transactions[1].transaction;
    let amounts: Vec<u64> = sent.prefix.outputs.iter().map(|o| o.amount).collect();
    assert_eq!(amounts, vec![9_000, 90_000, 200_000, 700_000]);
    assert_eq!(sent.input_amount() - sent.output_amount(), 1_000);

    let balance = wallet.balance().unwrap();
    assert_eq!(balance.actual + balance.pending, 299_000);
    node.mine_blocks(10).unwrap();
    wallet.synchronize().unwrap();
    assert_eq!(wallet.balance().unwrap().actual, 299_000);
}

#[test]
fn test_pool_then_block_counts_once() {
    let Fixture {
        node, wallet, dir, ..
    } = funded(&[1_000_000]);
    let (receiver, receiver_address) = new_wallet(&node, &dir, "receiver.ccx");

    wallet
        .transfer(&payment(&receiver_address, 100_000, 10, 0))
        .unwrap();
    receiver.synchronize().unwrap();
    assert_eq!(receiver.transaction_count().unwrap(), 1);
    assert_eq!(receiver.balance().unwrap().pending, 100_000);
    assert_eq!(receiver.unconfirmed_transactions().unwrap().len(), 1);

    node.mine_block().unwrap();
    receiver.synchronize().unwrap();
    assert_eq!(receiver.transaction_count().unwrap(), 1);
    assert_eq!(receiver.balance().unwrap().pending, 100_000);
    assert!(receiver.unconfirmed_transactions().unwrap().is_empty());

    node.mine_blocks(10).unwrap();
    receiver.synchronize().unwrap();
    let balance = receiver.balance().unwrap();
    assert_eq!(balance.actual, 100_000);
    assert_eq!(balance.pending, 0);
    assert!(drain_events(&receiver).contains(&WalletEvent::BalanceUnlocked));
}

#[test]
fn test_reorganization_restores_balance() {
    let Fixture {
        node,
        wallet,
        address,
        ..
    } = funded(&[1_000_000]);
    let keys = wallet.account_keys(&address).unwrap();

    node.mine_block_paying(&[(keys.address, 500_000)]).unwrap();
    node.mine_blocks(10).unwrap();
    wallet.synchronize().unwrap();
    assert_eq!(wallet.balance().unwrap().actual, 1_500_000);
    assert_eq!(wallet.transaction_count().unwrap(), 2);

    node.pop_blocks(11).unwrap();
    node.mine_blocks(12).unwrap();
    wallet.synchronize().unwrap();

    assert_eq!(wallet.block_count().unwrap(), 24);
    let balance = wallet.balance().unwrap();
    assert_eq!(balance.actual, 1_000_000);
    assert_eq!(balance.pending, 0);
    assert!(!wallet.transaction(1).unwrap().is_confirmed());
}

#[test]
fn test_mixin_needs_decoys() {
    let Fixture { node, wallet, .. } = funded(&[1_000_000]);
    let to = stranger(&wallet);

    assert!(matches!(
        wallet.transfer(&payment(&to, 500_000, 10, 5)),
        Err(WalletError::MixinTooLarge { requested: 5, .. })
    ));
    assert_eq!(wallet.transaction_count().unwrap(), 1);
    assert_eq!(wallet.balance().unwrap().actual, 1_000_000);
    assert_eq!(node.pool_size().unwrap(), 0);

    node.mine_decoys(1_000_000, 6).unwrap();
    node.mine_blocks(10).unwrap();
    wallet.synchronize().unwrap();
    let id = wallet
        .transfer(&payment(&to, 500_000, 10, 5))
        .unwrap();
    assert_eq!(
        wallet.transaction(id).unwrap().state,
        WalletTransactionState::Succeeded
    );
    assert_eq!(node.pool_size().unwrap(), 1);
}

#[test]
fn test_fusion_merges_small_outputs() {
    let Fixture { node, wallet, .. } = funded(&[100; 20]);
    assert_eq!(wallet.estimate(1_000, &[]).unwrap().fusion_ready_count, 20);

    let id = wallet.create_fusion_transaction(1_000, 0, &[], None).unwrap();
    assert!(wallet.is_fusion_transaction(id).unwrap());
    node.mine_block().unwrap();
    wallet.synchronize().unwrap();

    let blocks = node.get_new_blocks(&[]).unwrap().blocks;
    let fusion = &blocks[12].transactions[1].transaction;
    assert_eq!(fusion.prefix.inputs.len(), 20);
    let amounts: Vec<u64> = fusion.prefix.outputs.iter().map(|o| o.amount).collect();
    assert_eq!(amounts, vec![2_000]);
    assert!(wallet
        .currency()
        .is_fusion_transaction_amounts(&[100; 20], &amounts, 0));

    let record = wallet.transaction(id).unwrap();
    assert_eq!(record.fee, 0);
    assert_eq!(record.total_amount, 0);
    let balance = wallet.balance().unwrap();
    assert_eq!(balance.actual + balance.pending, 2_000);
}

#[test]
fn test_deposit_lifecycle() {
    let Fixture { node, wallet, .. } = funded(&[3_000_000]);
    assert!(matches!(
        wallet.create_deposit(1_000_000, 19, None, None),
        Err(WalletError::DepositParameters(_))
    ));

    let id = wallet.create_deposit(1_000_000, 20, None, None).unwrap();
    assert_eq!(wallet.transaction(id).unwrap().fee, 1_000);
    node.mine_block().unwrap();
    wallet.synchronize().unwrap();

    assert_eq!(wallet.deposit_count().unwrap(), 1);
    let deposit = wallet.deposit(0).unwrap();
    assert_eq!(deposit.amount, 1_000_000);
    assert_eq!(deposit.term, 20);
    assert_eq!(deposit.height, 12);
    assert_eq!(deposit.unlock_height, 32);
    assert!(deposit.locked);
    let interest = wallet.currency().calculate_interest(1_000_000, 20, 12);
    assert_eq!(deposit.interest, interest);
    assert_eq!(wallet.balance().unwrap().locked_deposit, 1_000_000);
    assert_eq!(wallet.withdraw_deposit(0), Err(WalletError::DepositLocked(0)));

    node.mine_blocks(19).unwrap();
    wallet.synchronize().unwrap();
    assert!(wallet.deposit(0).unwrap().locked);
    node.mine_block().unwrap();
    wallet.synchronize().unwrap();
    let deposit = wallet.deposit(0).unwrap();
    assert!(!deposit.locked);
    assert_eq!(deposit.interest, interest);
    assert_eq!(wallet.balance().unwrap().unlocked_deposit, 1_000_000);

    let withdrawal = wallet.withdraw_deposit(0).unwrap();
    let payout = 1_000_000 + interest - wallet.currency().minimum_fee;
    let record = wallet.transaction(withdrawal).unwrap();
    assert_eq!(record.total_amount, payout as i64 - 1_000_000);
    node.mine_block().unwrap();
    wallet.synchronize().unwrap();
    assert_eq!(
        wallet.deposit(0).unwrap().spending_transaction_id,
        Some(withdrawal)
    );
    assert_eq!(wallet.balance().unwrap().unlocked_deposit, 0);
}

#[test]
fn test_relay_failure_rolls_back() {
    let Fixture { node, wallet, .. } = funded(&[1_000_000]);
    node.set_relay_failure(true).unwrap();
    let to = stranger(&wallet);

    assert!(matches!(
        wallet.transfer(&payment(&to, 100_000, 10, 0)),
        Err(WalletError::Network(_))
    ));
    assert_eq!(
        wallet.transaction(1).unwrap().state,
        WalletTransactionState::Failed
    );
    assert_eq!(wallet.balance().unwrap().actual, 1_000_000);

    node.set_relay_failure(false).unwrap();
    wallet
        .transfer(&payment(&to, 100_000, 10, 0))
        .unwrap();
    assert_eq!(node.pool_size().unwrap(), 1);
}

#[test]
fn test_commit_and_rollback() {
    let Fixture { node, wallet, .. } = funded(&[1_000_000]);
    let to = stranger(&wallet);

    let id = wallet
        .make_transaction(&payment(&to, 100_000, 10, 0))
        .unwrap();
    assert_eq!(wallet.delayed_transaction_ids().unwrap(), vec![id]);
    wallet.rollback_uncommitted_transaction(id).unwrap();
    assert_eq!(
        wallet.transaction(id).unwrap().state,
        WalletTransactionState::Cancelled
    );
    assert_eq!(wallet.balance().unwrap().actual, 1_000_000);

    let id = wallet
        .make_transaction(&payment(&to, 100_000, 10, 0))
        .unwrap();
    wallet.commit_transaction(id).unwrap();
    node.mine_block().unwrap();
    wallet.synchronize().unwrap();
    assert!(wallet.transaction(id).unwrap().is_confirmed());
    assert_eq!(
        wallet.commit_transaction(id),
        Err(WalletError::WrongState(format!(
            "transaction {id} is Succeeded"
        )))
    );
}

#[test]
fn test_state_survives_reload() {
    let Fixture {
        node, wallet, dir, ..
    } = funded(&[1_000_000]);
    let to = stranger(&wallet);
    let id = wallet
        .transfer(&payment(&to, 250_000, 10, 0))
        .unwrap();
    node.mine_block().unwrap();
    wallet.synchronize().unwrap();
    let balance = wallet.balance().unwrap();
    let record = wallet.transaction(id).unwrap();
    wallet.save(SaveLevel::Full).unwrap();
    wallet.shutdown().unwrap();

    let reloaded = Wallet::new(settings(), node.clone()).unwrap();
    assert_eq!(
        reloaded.load(&dir.path().join("wallet.ccx"), "wrong"),
        Err(WalletError::WrongPassword)
    );
    reloaded
        .load(&dir.path().join("wallet.ccx"), PASSWORD)
        .unwrap();
    assert_eq!(reloaded.balance().unwrap(), balance);
    assert_eq!(reloaded.transaction(id).unwrap(), record);
    assert_eq!(reloaded.block_count().unwrap(), 13);

    node.mine_blocks(10).unwrap();
    reloaded.synchronize().unwrap();
    assert_eq!(reloaded.balance().unwrap().actual, 749_990);
}

#[test]
fn test_keys_only_save_rescans() {
    let Fixture {
        node, wallet, dir, ..
    } = funded(&[1_000_000]);
    wallet.save(SaveLevel::KeysOnly).unwrap();
    wallet.shutdown().unwrap();

    let reloaded = Wallet::new(settings(), node.clone()).unwrap();
    reloaded
        .load(&dir.path().join("wallet.ccx"), PASSWORD)
        .unwrap();
    assert_eq!(reloaded.block_count().unwrap(), 0);
    assert_eq!(reloaded.transaction_count().unwrap(), 0);
    reloaded.synchronize().unwrap();
    assert_eq!(reloaded.balance().unwrap().actual, 1_000_000);
}

#[test]
fn test_stopped_wallet_refuses_blocking_calls() {
    let Fixture { wallet, .. } = funded(&[1_000_000]);
    let to = stranger(&wallet);
    wallet.stop();
    assert_eq!(wallet.synchronize(), Err(WalletError::OperationCancelled));
    assert_eq!(
        wallet.transfer(&payment(&to, 10, 10, 0)),
        Err(WalletError::OperationCancelled)
    );
    assert_eq!(wallet.get_event(), Err(WalletError::OperationCancelled));
    assert_eq!(wallet.balance().unwrap().actual, 1_000_000);

    wallet.start();
    assert_eq!(wallet.synchronize().unwrap(), 12);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlowCall {
    NewBlocks,
    Decoys,
    Relay,
}

/// Forwards to an in-memory node. Once armed, the next call of the chosen
/// kind reports itself on `entered` and sleeps before answering.
struct SlowNode {
    inner: Arc<InMemoryNode>,
    call: SlowCall,
    delay: Duration,
    armed: AtomicBool,
    entered: Mutex<mpsc::Sender<()>>,
}

impl SlowNode {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    fn hold(&self, call: SlowCall) {
        if call == self.call && self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.entered.lock().unwrap().send(());
            thread::sleep(self.delay);
        }
    }
}

impl Node for SlowNode {
    fn get_new_blocks(&self, known_block_hashes: &[Hash]) -> Result<NewBlocks> {
        self.hold(SlowCall::NewBlocks);
        self.inner.get_new_blocks(known_block_hashes)
    }

    fn get_pool_changes(&self, known_pool_transactions: &[Hash]) -> Result<PoolChanges> {
        self.inner.get_pool_changes(known_pool_transactions)
    }

    fn relay_transaction(&self, transaction: &Transaction) -> Result<()> {
        self.hold(SlowCall::Relay);
        self.inner.relay_transaction(transaction)
    }

    fn get_random_outputs_for_amounts(
        &self,
        amounts: &[u64],
        outputs_count: u64,
    ) -> Result<Vec<RandomOutputs>> {
        self.hold(SlowCall::Decoys);
        self.inner.get_random_outputs_for_amounts(amounts, outputs_count)
    }

    fn last_known_block_height(&self) -> Result<u32> {
        self.inner.last_known_block_height()
    }
}

struct SlowFixture {
    node: Arc<InMemoryNode>,
    slow: Arc<SlowNode>,
    entered: mpsc::Receiver<()>,
    wallet: Wallet,
    address: String,
    _dir: TempDir,
}

/// Like `funded`, but the wallet talks to the chain through a `SlowNode`
fn slow_funded(amounts: &[u64], call: SlowCall, delay: Duration) -> SlowFixture {
    let dir = tempdir().unwrap();
    let node = Arc::new(InMemoryNode::new(settings().currency).unwrap());
    let (sender, entered) = mpsc::channel();
    let slow = Arc::new(SlowNode {
        inner: node.clone(),
        call,
        delay,
        armed: AtomicBool::new(false),
        entered: Mutex::new(sender),
    });
    let wallet = Wallet::new(settings(), slow.clone()).unwrap();
    wallet
        .initialize(&dir.path().join("wallet.ccx"), PASSWORD)
        .unwrap();
    let address = wallet.addresses().unwrap().remove(0);
    let keys = wallet.account_keys(&address).unwrap();
    if !amounts.is_empty() {
        let payments: Vec<_> = amounts.iter().map(|a| (keys.address, *a)).collect();
        node.mine_block_paying(&payments).unwrap();
        node.mine_blocks(10).unwrap();
    }
    wallet.synchronize().unwrap();
    SlowFixture {
        node,
        slow,
        entered,
        wallet,
        address,
        _dir: dir,
    }
}

#[test]
fn test_stop_abandons_relay_in_flight() {
    let SlowFixture {
        node,
        slow,
        entered,
        wallet,
        ..
    } = slow_funded(&[1_000_000], SlowCall::Relay, Duration::from_secs(3));
    let to = stranger(&wallet);
    slow.arm();

    thread::scope(|s| {
        let sender = s.spawn(|| wallet.transfer(&payment(&to, 700_000, 1_000, 0)));
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        let stopped_at = Instant::now();
        wallet.stop();
        assert_eq!(sender.join().unwrap(), Err(WalletError::OperationCancelled));
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
    });

    assert_eq!(node.pool_size().unwrap(), 0);
    assert_eq!(wallet.transaction_count().unwrap(), 2);
    assert_eq!(
        wallet.transaction(1).unwrap().state,
        WalletTransactionState::Failed
    );
    assert_eq!(wallet.balance().unwrap().actual, 1_000_000);
}

#[test]
fn test_stop_abandons_decoy_request_in_flight() {
    let SlowFixture {
        slow,
        entered,
        wallet,
        ..
    } = slow_funded(&[1_000_000], SlowCall::Decoys, Duration::from_secs(3));
    let to = stranger(&wallet);
    slow.arm();

    thread::scope(|s| {
        let sender = s.spawn(|| wallet.transfer(&payment(&to, 700_000, 1_000, 1)));
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        let stopped_at = Instant::now();
        wallet.stop();
        assert_eq!(sender.join().unwrap(), Err(WalletError::OperationCancelled));
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
    });

    // nothing was built
    assert_eq!(wallet.transaction_count().unwrap(), 1);
    assert_eq!(wallet.balance().unwrap().actual, 1_000_000);
}

#[test]
fn test_stop_wakes_event_waiter() {
    let Fixture { wallet, .. } = funded(&[1_000_000]);
    drain_events(&wallet);

    thread::scope(|s| {
        let waiter = s.spawn(|| wallet.get_event());
        thread::sleep(Duration::from_millis(100));
        wallet.stop();
        assert_eq!(waiter.join().unwrap(), Err(WalletError::OperationCancelled));
    });
}

#[test]
fn test_address_imported_during_sync_is_scanned() {
    let SlowFixture {
        node,
        slow,
        entered,
        wallet,
        ..
    } = slow_funded(&[], SlowCall::NewBlocks, Duration::from_millis(300));
    let (_, view_secret_key) = wallet.view_key().unwrap();
    let (_, spend_secret_key) = generate_keys();
    let imported = AccountKeys::from_secrets(spend_secret_key.clone(), view_secret_key).unwrap();
    node.mine_block_paying(&[(imported.address, 1_000_000)])
        .unwrap();
    node.mine_blocks(10).unwrap();
    wallet.synchronize().unwrap();

    node.mine_blocks(1).unwrap();
    slow.arm();
    let address = thread::scope(|s| {
        let sync = s.spawn(|| wallet.synchronize());
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        let address = wallet.create_address_from_secret(spend_secret_key).unwrap();
        sync.join().unwrap().unwrap();
        address
    });

    wallet.synchronize().unwrap();
    assert_eq!(wallet.address_balance(&address).unwrap().actual, 1_000_000);
}

#[test]
fn test_delete_address_waits_for_send() {
    let SlowFixture {
        node,
        slow,
        entered,
        wallet,
        address,
        ..
    } = slow_funded(&[1_000_000], SlowCall::Relay, Duration::from_millis(500));
    let to = stranger(&wallet);
    slow.arm();

    thread::scope(|s| {
        let sender = s.spawn(|| wallet.transfer(&payment(&to, 700_000, 1_000, 0)));
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        let started = Instant::now();
        wallet.delete_address(&address).unwrap();
        // held back until the relay answered
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(sender.join().unwrap(), Ok(1));
    });

    assert_eq!(node.pool_size().unwrap(), 1);
    assert!(wallet.addresses().unwrap().is_empty());
}
