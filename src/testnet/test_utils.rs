//! Test utilities for wallet testing

use std::sync::Arc;
use tempfile::TempDir;

use crate::config::WalletSettings;
use crate::core::AccountKeys;
use crate::crypto::{
    derive_public_key, derive_secret_key, fast_hash, generate_key_derivation, generate_key_image,
    generate_keys, KeyImage,
};
use crate::error::{Result, WalletError};
use crate::network::InMemoryNode;
use crate::transfers::{OutputKind, TransactionOutputInformation};
use crate::wallet::Wallet;

pub const TEST_PASSWORD: &str = "test password";

/// Create a temporary directory for testing
pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| WalletError::Io(e.to_string()))
}

fn paid_output(
    keys: &AccountKeys,
    amount: u64,
    global_index: u32,
    deposit_term: Option<u32>,
) -> Result<TransactionOutputInformation> {
    let (transaction_public_key, _) = generate_keys();
    let derivation = generate_key_derivation(&transaction_public_key, &keys.view_secret_key)?;
    let output_key = derive_public_key(&derivation, 0, &keys.address.spend_public_key)?;
    let kind = match (deposit_term, &keys.spend_secret_key) {
        (Some(term), _) => OutputKind::Multisignature {
            required_signatures: 1,
            term,
        },
        (None, Some(spend_secret_key)) => {
            let secret = derive_secret_key(&derivation, 0, spend_secret_key)?;
            OutputKind::Key {
                key_image: generate_key_image(&output_key, &secret)?,
            }
        }
        // tracking keys cannot compute key images
        (None, None) => OutputKind::Key {
            key_image: KeyImage::default(),
        },
    };
    Ok(TransactionOutputInformation {
        transaction_hash: fast_hash(transaction_public_key.as_bytes()),
        output_in_transaction: 0,
        amount,
        global_output_index: global_index,
        output_key,
        transaction_public_key,
        kind,
    })
}

/// A key output paying `amount` to `keys`, alone in its own transaction
pub fn owned_output(keys: &AccountKeys, amount: u64, global_index: u32) -> TransactionOutputInformation {
    paid_output(keys, amount, global_index, None).expect("owned output")
}

/// A deposit output locking `amount` for `term` blocks
pub fn owned_deposit_output(
    keys: &AccountKeys,
    amount: u64,
    term: u32,
    global_index: u32,
) -> TransactionOutputInformation {
    paid_output(keys, amount, global_index, Some(term)).expect("owned deposit output")
}

/// A wallet on a fresh in-memory chain whose first address received
/// `amounts` in one coinbase, already unlocked and synchronized
pub struct FundedWallet {
    pub wallet: Wallet,
    pub node: Arc<InMemoryNode>,
    pub address: String,
    pub dir: TempDir,
}

pub fn funded_wallet(settings: WalletSettings, amounts: &[u64]) -> Result<FundedWallet> {
    let dir = create_temp_dir()?;
    let node = Arc::new(InMemoryNode::new(settings.currency.clone())?);
    let wallet = Wallet::new(settings, node.clone())?;
    wallet.initialize(&dir.path().join("wallet.bin"), TEST_PASSWORD)?;
    let address = wallet
        .addresses()?
        .pop()
        .ok_or_else(|| WalletError::Internal("wallet has no address".to_string()))?;
    let keys = wallet.account_keys(&address)?;

    if !amounts.is_empty() {
        let payments: Vec<_> = amounts.iter().map(|a| (keys.address, *a)).collect();
        node.mine_block_paying(&payments)?;
        node.mine_blocks(wallet.currency().mined_money_unlock_window)?;
    }
    wallet.synchronize()?;
    Ok(FundedWallet {
        wallet,
        node,
        address,
        dir,
    })
}
