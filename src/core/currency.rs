//! Currency parameters and the consensus-adjacent rules the wallet relies on
//!
//! The wallet never validates blocks, but it must agree with the network on
//! how amounts are decomposed, when outputs unlock, what a fusion
//! transaction looks like and how addresses are encoded.

use serde::{Deserialize, Serialize};

use super::account::AccountPublicAddress;
use super::interest;
use super::monetary::{
    COIN, DEFAULT_DUST_THRESHOLD, DEPOSIT_MIN_AMOUNT, MINIMUM_FEE, MINIMUM_FEE_V2,
};
use super::transaction::{Transaction, TransactionInput};
use crate::crypto::{fast_hash, PublicKey};
use crate::error::{Result, WalletError};
use crate::utils::{base58_decode, base58_encode, read_varint, write_varint};

pub const CRYPTONOTE_MAX_BLOCK_NUMBER: u64 = 500_000_000;
pub const PUBLIC_ADDRESS_BASE58_PREFIX: u64 = 0x7ad4;
pub const MINED_MONEY_UNLOCK_WINDOW: u32 = 10;
pub const DEFAULT_TX_SPENDABLE_AGE: u32 = 10;
pub const DIFFICULTY_TARGET: u64 = 120;
pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u64 = 1;
pub const BLOCK_GRANTED_FULL_REWARD_ZONE: usize = 100_000;
pub const COINBASE_BLOB_RESERVED_SIZE: usize = 600;
pub const FUSION_TX_MAX_SIZE: usize = BLOCK_GRANTED_FULL_REWARD_ZONE * 30 / 100;
pub const FUSION_TX_MIN_INPUT_COUNT: usize = 12;
pub const FUSION_TX_MIN_IN_OUT_COUNT_RATIO: usize = 4;
pub const MINIMUM_MIXIN: u64 = 4;
pub const DEPOSIT_MIN_TERM: u32 = 5_040;
pub const DEPOSIT_MAX_TERM: u32 = 12 * 21_900;
pub const DEPOSIT_MAX_TERM_V1: u32 = 64_800 * 20;

const ADDRESS_CHECKSUM_SIZE: usize = 4;

/// Network parameters; every field can be overridden from the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(default)]
pub struct Currency {
    pub public_address_base58_prefix: u64,
    pub coin: u64,
    pub minimum_fee: u64,
    pub deposit_fee: u64,
    pub default_dust_threshold: u64,
    pub mined_money_unlock_window: u32,
    pub transaction_spendable_age: u32,
    pub difficulty_target: u64,
    pub locked_tx_allowed_delta_blocks: u64,
    pub max_block_number: u64,
    pub max_transaction_size: usize,
    pub fusion_tx_max_size: usize,
    pub fusion_tx_min_input_count: usize,
    pub fusion_tx_min_in_out_count_ratio: usize,
    pub deposit_min_amount: u64,
    pub deposit_min_term: u32,
    pub deposit_max_term: u32,
    pub deposit_max_term_v1: u32,
}

impl Default for Currency {
    fn default() -> Self {
        Currency {
            public_address_base58_prefix: PUBLIC_ADDRESS_BASE58_PREFIX,
            coin: COIN,
            minimum_fee: MINIMUM_FEE,
            deposit_fee: MINIMUM_FEE_V2,
            default_dust_threshold: DEFAULT_DUST_THRESHOLD,
            mined_money_unlock_window: MINED_MONEY_UNLOCK_WINDOW,
            transaction_spendable_age: DEFAULT_TX_SPENDABLE_AGE,
            difficulty_target: DIFFICULTY_TARGET,
            locked_tx_allowed_delta_blocks: LOCKED_TX_ALLOWED_DELTA_BLOCKS,
            max_block_number: CRYPTONOTE_MAX_BLOCK_NUMBER,
            max_transaction_size: BLOCK_GRANTED_FULL_REWARD_ZONE * 2
                - COINBASE_BLOB_RESERVED_SIZE,
            fusion_tx_max_size: FUSION_TX_MAX_SIZE,
            fusion_tx_min_input_count: FUSION_TX_MIN_INPUT_COUNT,
            fusion_tx_min_in_out_count_ratio: FUSION_TX_MIN_IN_OUT_COUNT_RATIO,
            deposit_min_amount: DEPOSIT_MIN_AMOUNT,
            deposit_min_term: DEPOSIT_MIN_TERM,
            deposit_max_term: DEPOSIT_MAX_TERM,
            deposit_max_term_v1: DEPOSIT_MAX_TERM_V1,
        }
    }
}

/// Splits `amount` into digit-sized chunks, merging chunks that fit under
/// `dust_threshold` into a single dust chunk.
///
/// # Examples
/// ```
/// use conceal_wallet::core::currency::decompose_amount;
/// assert_eq!(decompose_amount(137, 0), vec![7, 30, 100]);
/// assert_eq!(decompose_amount(299_000, 10), vec![9_000, 90_000, 200_000]);
/// ```
pub fn decompose_amount(amount: u64, dust_threshold: u64) -> Vec<u64> {
    let mut chunks = Vec::new();
    let mut dust: u64 = 0;
    let mut dust_handled = false;
    let mut rest = amount;
    let mut order: u64 = 1;

    while rest != 0 {
        let chunk = (rest % 10) * order;
        rest /= 10;
        order = order.saturating_mul(10);
        if dust.saturating_add(chunk) <= dust_threshold {
            dust += chunk;
        } else {
            if !dust_handled && dust != 0 {
                chunks.push(dust);
                dust_handled = true;
            }
            if chunk != 0 {
                chunks.push(chunk);
            }
        }
    }

    if !dust_handled && dust != 0 {
        chunks.push(dust);
    }
    chunks
}

/// Returns the power of ten of `amount` when it is a single significant
/// digit followed by zeros (`d × 10^k`)
pub fn pretty_amount_power(amount: u64) -> Option<u8> {
    if amount == 0 {
        return None;
    }
    let mut value = amount;
    let mut power = 0u8;
    while value % 10 == 0 {
        value /= 10;
        power += 1;
    }
    (value < 10).then_some(power)
}

impl Currency {
    pub fn upper_transaction_size_limit(&self) -> usize {
        self.max_transaction_size
    }

    pub fn locked_tx_allowed_delta_seconds(&self) -> u64 {
        self.difficulty_target * self.locked_tx_allowed_delta_blocks
    }

    /// Unlock time check shared by the ledger and the wallet: values below
    /// the max block number are heights, the rest are timestamps
    pub fn is_unlock_time_reached(&self, unlock_time: u64, current_height: u32, now: u64) -> bool {
        if unlock_time < self.max_block_number {
            u64::from(current_height) + self.locked_tx_allowed_delta_blocks >= unlock_time
        } else {
            now + self.locked_tx_allowed_delta_seconds() >= unlock_time
        }
    }

    /// Height from which `unlock_time` is satisfied, estimating timestamps
    /// with the block target
    pub fn unlock_time_to_height(&self, unlock_time: u64, current_height: u32, now: u64) -> u32 {
        if unlock_time < self.max_block_number {
            let height = unlock_time.saturating_sub(self.locked_tx_allowed_delta_blocks);
            return u32::try_from(height).unwrap_or(u32::MAX);
        }
        let wait = unlock_time
            .saturating_sub(now + self.locked_tx_allowed_delta_seconds())
            .div_ceil(self.difficulty_target.max(1));
        current_height.saturating_add(u32::try_from(wait).unwrap_or(u32::MAX))
    }

    pub fn decompose(&self, amount: u64) -> Vec<u64> {
        decompose_amount(amount, self.default_dust_threshold)
    }

    pub fn calculate_interest(&self, amount: u64, term: u32, height: u32) -> u64 {
        interest::calculate_interest(self, amount, term, height)
    }

    pub fn validate_deposit(&self, amount: u64, term: u32) -> Result<()> {
        if term < self.deposit_min_term {
            return Err(WalletError::DepositParameters(format!(
                "term {term} is shorter than {}",
                self.deposit_min_term
            )));
        }
        let max_term = self.deposit_max_term.max(self.deposit_max_term_v1);
        if term > max_term {
            return Err(WalletError::DepositParameters(format!(
                "term {term} is longer than {max_term}"
            )));
        }
        if amount < self.deposit_min_amount {
            return Err(WalletError::DepositParameters(format!(
                "amount {amount} is below {}",
                self.deposit_min_amount
            )));
        }
        Ok(())
    }

    /// Fusion input eligibility: a pretty amount strictly between the dust
    /// threshold and `threshold`; returns its power of ten
    pub fn fusion_input_power(&self, amount: u64, threshold: u64) -> Option<u8> {
        if amount >= threshold || amount <= self.default_dust_threshold {
            return None;
        }
        pretty_amount_power(amount)
    }

    pub fn is_fusion_transaction_amounts(
        &self,
        input_amounts: &[u64],
        output_amounts: &[u64],
        size: usize,
    ) -> bool {
        if size > self.fusion_tx_max_size {
            return false;
        }
        if input_amounts.len() < self.fusion_tx_min_input_count {
            return false;
        }
        if input_amounts.len() < output_amounts.len() * self.fusion_tx_min_in_out_count_ratio {
            return false;
        }

        let mut input_total: u64 = 0;
        for amount in input_amounts {
            if *amount < self.default_dust_threshold {
                return false;
            }
            input_total = match input_total.checked_add(*amount) {
                Some(total) => total,
                None => return false,
            };
        }

        let mut expected = self.decompose(input_total);
        expected.sort_unstable();
        expected == output_amounts
    }

    pub fn is_fusion_transaction(&self, transaction: &Transaction) -> bool {
        let Ok(size) = transaction.binary_size() else {
            return false;
        };
        let mut inputs = Vec::with_capacity(transaction.prefix.inputs.len());
        for input in &transaction.prefix.inputs {
            match input {
                TransactionInput::Key { amount, .. } => inputs.push(*amount),
                _ => return false,
            }
        }
        let outputs: Vec<u64> = transaction.prefix.outputs.iter().map(|o| o.amount).collect();
        self.is_fusion_transaction_amounts(&inputs, &outputs, size)
    }

    /// Upper bound on how many key inputs fit into `transaction_size`
    pub fn approximate_maximum_input_count(
        &self,
        transaction_size: usize,
        output_count: usize,
        mixin: usize,
    ) -> usize {
        const KEY_IMAGE_SIZE: usize = 32;
        const OUTPUT_KEY_SIZE: usize = 32;
        const AMOUNT_SIZE: usize = 8 + 2;
        const GLOBAL_INDEXES_VECTOR_SIZE_SIZE: usize = 1;
        const GLOBAL_INDEXES_INITIAL_VALUE_SIZE: usize = 4;
        const GLOBAL_INDEXES_DIFFERENCE_SIZE: usize = 4;
        const SIGNATURE_SIZE: usize = 64;
        const EXTRA_TAG_SIZE: usize = 1;
        const INPUT_TAG_SIZE: usize = 1;
        const OUTPUT_TAG_SIZE: usize = 1;
        const PUBLIC_KEY_SIZE: usize = 32;
        const TRANSACTION_VERSION_SIZE: usize = 1;
        const TRANSACTION_UNLOCK_TIME_SIZE: usize = 8;

        let outputs_size = output_count * (OUTPUT_TAG_SIZE + OUTPUT_KEY_SIZE + AMOUNT_SIZE);
        let header_size =
            TRANSACTION_VERSION_SIZE + TRANSACTION_UNLOCK_TIME_SIZE + EXTRA_TAG_SIZE + PUBLIC_KEY_SIZE;
        let input_size = INPUT_TAG_SIZE
            + AMOUNT_SIZE
            + KEY_IMAGE_SIZE
            + SIGNATURE_SIZE
            + GLOBAL_INDEXES_VECTOR_SIZE_SIZE
            + GLOBAL_INDEXES_INITIAL_VALUE_SIZE
            + mixin * (GLOBAL_INDEXES_DIFFERENCE_SIZE + SIGNATURE_SIZE);

        transaction_size.saturating_sub(header_size + outputs_size) / input_size
    }

    pub fn account_address_as_string(&self, address: &AccountPublicAddress) -> String {
        let mut data = Vec::with_capacity(72);
        write_varint(&mut data, self.public_address_base58_prefix);
        data.extend_from_slice(&address.spend_public_key.0);
        data.extend_from_slice(&address.view_public_key.0);
        let checksum = fast_hash(&data);
        data.extend_from_slice(&checksum.0[..ADDRESS_CHECKSUM_SIZE]);
        base58_encode(&data)
    }

    pub fn parse_account_address_string(&self, text: &str) -> Result<AccountPublicAddress> {
        let data = base58_decode(text)?;
        if data.len() < ADDRESS_CHECKSUM_SIZE {
            return Err(WalletError::BadAddress(text.to_string()));
        }
        let (body, checksum) = data.split_at(data.len() - ADDRESS_CHECKSUM_SIZE);
        if fast_hash(body).0[..ADDRESS_CHECKSUM_SIZE] != *checksum {
            return Err(WalletError::BadAddress(format!("{text}: checksum mismatch")));
        }
        let (prefix, consumed) =
            read_varint(body).ok_or_else(|| WalletError::BadAddress(text.to_string()))?;
        if prefix != self.public_address_base58_prefix {
            return Err(WalletError::BadAddress(format!(
                "{text}: wrong prefix {prefix:#x}"
            )));
        }
        let keys = &body[consumed..];
        if keys.len() != 64 {
            return Err(WalletError::BadAddress(format!("{text}: wrong length")));
        }
        let mut spend = [0u8; 32];
        let mut view = [0u8; 32];
        spend.copy_from_slice(&keys[..32]);
        view.copy_from_slice(&keys[32..]);
        let address = AccountPublicAddress {
            spend_public_key: PublicKey(spend),
            view_public_key: PublicKey(view),
        };
        if !crate::crypto::check_key(&address.spend_public_key)
            || !crate::crypto::check_key(&address.view_public_key)
        {
            return Err(WalletError::BadAddress(format!("{text}: invalid key")));
        }
        Ok(address)
    }

    pub fn is_valid_address(&self, text: &str) -> bool {
        self.parse_account_address_string(text).is_ok()
    }

    /// Sum of input amounts, counting deposit interest for multisignature
    /// inputs that carry a term
    pub fn transaction_input_amount(&self, transaction: &Transaction, height: u32) -> u64 {
        transaction
            .prefix
            .inputs
            .iter()
            .map(|input| match input {
                TransactionInput::Base { .. } => 0,
                TransactionInput::Key { amount, .. } => *amount,
                TransactionInput::Multisignature { amount, term, .. } => {
                    if *term == 0 {
                        *amount
                    } else {
                        amount.saturating_add(self.calculate_interest(*amount, *term, height))
                    }
                }
            })
            .fold(0u64, u64::saturating_add)
    }
}
