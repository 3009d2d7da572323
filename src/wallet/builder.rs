//! Transaction assembly
//!
//! Everything between "these outputs pay those receivers" and a signed
//! transaction: input selection, ring construction from node decoys,
//! donation carving, output decomposition and signing. Nothing here touches
//! wallet state, so the wallet can build without holding its lock.

use log::debug;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;

use crate::core::currency::decompose_amount;
use crate::core::transaction::{
    absolute_output_offsets_to_relative, add_public_key_to_extra, CURRENT_TRANSACTION_VERSION,
};
use crate::core::{
    AccountKeys, AccountPublicAddress, Transaction, TransactionInput, TransactionOutput,
    TransactionOutputTarget, TransactionPrefix,
};
use crate::crypto::{
    derive_public_key, derive_secret_key, fast_hash, generate_deterministic_tx_keys,
    generate_key_derivation, generate_ring_signature, generate_signature, KeyImage, PublicKey,
    SecretKey,
};
use crate::error::{Result, WalletError};
use crate::network::{RandomOutput, RandomOutputs};
use crate::transfers::{OutputKind, TransactionOutputInformation};
use crate::utils::serialize;

/// Unlocked outputs of one wallet address
#[derive(Debug, Clone)]
pub struct WalletOuts {
    pub keys: AccountKeys,
    pub outs: Vec<TransactionOutputInformation>,
}

/// An output picked for spending, with the keys that own it
#[derive(Debug, Clone)]
pub struct OutputToTransfer {
    pub output: TransactionOutputInformation,
    pub keys: AccountKeys,
}

/// A key input ready to sign: the ring is sorted by global index and holds
/// the real output at `real_index`
#[derive(Debug, Clone)]
pub struct InputInfo {
    pub output: TransactionOutputInformation,
    pub keys: AccountKeys,
    pub ring: Vec<RandomOutput>,
    pub real_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverAmounts {
    pub receiver: AccountPublicAddress,
    pub amounts: Vec<u64>,
}

impl ReceiverAmounts {
    /// Splits `amount` into the denominations the chain prefers
    pub fn split(receiver: AccountPublicAddress, amount: u64, dust_threshold: u64) -> Self {
        ReceiverAmounts {
            receiver,
            amounts: decompose_amount(amount, dust_threshold),
        }
    }

    pub fn total(&self) -> u64 {
        self.amounts.iter().fold(0u64, |s, a| s.saturating_add(*a))
    }
}

/// The single multisignature output of a deposit transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositOutput {
    pub receiver: AccountPublicAddress,
    pub amount: u64,
    pub term: u32,
}

fn digit_count(mut amount: u64) -> u32 {
    let mut digits = 1;
    while amount >= 10 {
        amount /= 10;
        digits += 1;
    }
    digits
}

/// Picks outputs until `needed` is covered. Outputs are bucketed by their
/// number of digits; every pass takes the largest output of each bucket,
/// smallest buckets first. Once the target is met the current pass still
/// drains its buckets but accepts nothing more. Returns the amount found,
/// which is below `needed` when the wallet cannot cover it.
pub fn select_transfers(
    needed: u64,
    dust_threshold: u64,
    wallets: &[WalletOuts],
) -> (u64, Vec<OutputToTransfer>) {
    let mut buckets: BTreeMap<u32, Vec<OutputToTransfer>> = BTreeMap::new();
    for wallet in wallets {
        for output in &wallet.outs {
            if output.amount == 0 || output.amount < dust_threshold {
                continue;
            }
            buckets
                .entry(digit_count(output.amount))
                .or_default()
                .push(OutputToTransfer {
                    output: output.clone(),
                    keys: wallet.keys.clone(),
                });
        }
    }
    for bucket in buckets.values_mut() {
        bucket.sort_by_key(|o| o.output.amount);
    }

    let mut found = 0u64;
    let mut selected = Vec::new();
    while found < needed && !buckets.is_empty() {
        for bucket in buckets.values_mut() {
            if let Some(candidate) = bucket.pop() {
                if found < needed {
                    found = found.saturating_add(candidate.output.amount);
                    selected.push(candidate);
                }
            }
        }
        buckets.retain(|_, bucket| !bucket.is_empty());
    }
    (found, selected)
}

/// Fails when the node could not return `mixin` decoys for some amount
pub fn check_mixins(decoys: &[RandomOutputs], mixin: u64) -> Result<()> {
    for outs in decoys {
        let available = outs.outputs.len() as u64;
        if available < mixin {
            return Err(WalletError::MixinTooLarge {
                amount: outs.amount,
                requested: mixin,
                available,
            });
        }
    }
    Ok(())
}

/// Builds the ring of every selected output from the decoys fetched for
/// its amount (`decoys[i]` belongs to `selected[i]`)
pub fn prepare_inputs(
    selected: Vec<OutputToTransfer>,
    decoys: &[RandomOutputs],
    mixin: u64,
) -> Result<Vec<InputInfo>> {
    let mut inputs = Vec::with_capacity(selected.len());
    for (position, OutputToTransfer { output, keys }) in selected.into_iter().enumerate() {
        let mut ring: Vec<RandomOutput> = Vec::new();
        if mixin > 0 {
            let outs = decoys.get(position).ok_or_else(|| {
                WalletError::Internal(format!("No decoys fetched for input {position}"))
            })?;
            if outs.amount != output.amount {
                return Err(WalletError::Internal(format!(
                    "Decoys for amount {} used for an input of {}",
                    outs.amount, output.amount
                )));
            }
            let mut candidates = outs.outputs.clone();
            candidates.sort_by_key(|o| o.global_index);
            for candidate in candidates {
                if candidate.global_index == output.global_output_index {
                    continue;
                }
                ring.push(candidate);
                if ring.len() as u64 >= mixin {
                    break;
                }
            }
            // the node may have handed back the real output as a candidate
            if (ring.len() as u64) < mixin {
                return Err(WalletError::MixinTooLarge {
                    amount: output.amount,
                    requested: mixin,
                    available: ring.len() as u64,
                });
            }
        }

        let real = RandomOutput {
            global_index: output.global_output_index,
            public_key: output.output_key,
        };
        let real_index = ring
            .iter()
            .position(|o| o.global_index >= real.global_index)
            .unwrap_or(ring.len());
        ring.insert(real_index, real);
        inputs.push(InputInfo {
            output,
            keys,
            ring,
            real_index,
        });
    }
    Ok(inputs)
}

/// Part of `free_amount` given away: the largest denominations of the
/// change that still fit under `threshold`
pub fn calculate_donation_amount(free_amount: u64, threshold: u64, dust_threshold: u64) -> u64 {
    let mut amounts = decompose_amount(free_amount, dust_threshold);
    amounts.sort_unstable_by(|a, b| b.cmp(a));
    let mut donation = 0u64;
    for amount in amounts {
        if amount > threshold - donation {
            continue;
        }
        donation += amount;
    }
    donation
}

/// One-time secret key of an owned output
pub fn output_secret_key(
    output: &TransactionOutputInformation,
    keys: &AccountKeys,
) -> Result<SecretKey> {
    let spend_secret_key = keys
        .spend_secret_key
        .as_ref()
        .ok_or(WalletError::TrackingMode)?;
    let derivation = generate_key_derivation(&output.transaction_public_key, &keys.view_secret_key)?;
    derive_secret_key(
        &derivation,
        output.output_in_transaction as usize,
        spend_secret_key,
    )
}

// Outputs are shuffled then stably sorted by amount, so equal amounts land
// in random order. The transaction key is derived from the inputs.
fn assemble(
    inputs: Vec<TransactionInput>,
    outputs: &[ReceiverAmounts],
    deposit: Option<&DepositOutput>,
    extra: &[u8],
    unlock_time: u64,
    view_secret_key: &SecretKey,
) -> Result<Transaction> {
    let inputs_hash = fast_hash(&serialize(&inputs)?);
    let (transaction_public_key, transaction_secret_key) =
        generate_deterministic_tx_keys(&inputs_hash, view_secret_key)?;

    let mut pairs: Vec<(AccountPublicAddress, u64)> = outputs
        .iter()
        .flat_map(|r| r.amounts.iter().map(move |amount| (r.receiver, *amount)))
        .collect();
    pairs.shuffle(&mut rand::thread_rng());
    pairs.sort_by_key(|(_, amount)| *amount);

    let mut prefix = TransactionPrefix {
        version: CURRENT_TRANSACTION_VERSION,
        unlock_time,
        inputs,
        outputs: Vec::with_capacity(pairs.len() + 1),
        extra: Vec::new(),
    };
    for (index, (receiver, amount)) in pairs.into_iter().enumerate() {
        let derivation =
            generate_key_derivation(&receiver.view_public_key, &transaction_secret_key)?;
        prefix.outputs.push(TransactionOutput {
            amount,
            target: TransactionOutputTarget::Key {
                key: derive_public_key(&derivation, index, &receiver.spend_public_key)?,
            },
        });
    }
    if let Some(deposit) = deposit {
        let index = prefix.outputs.len();
        let derivation =
            generate_key_derivation(&deposit.receiver.view_public_key, &transaction_secret_key)?;
        prefix.outputs.push(TransactionOutput {
            amount: deposit.amount,
            target: TransactionOutputTarget::Multisignature {
                keys: vec![derive_public_key(
                    &derivation,
                    index,
                    &deposit.receiver.spend_public_key,
                )?],
                required_signatures: 1,
                term: deposit.term,
            },
        });
    }
    add_public_key_to_extra(&mut prefix.extra, &transaction_public_key);
    prefix.extra.extend_from_slice(extra);

    Ok(Transaction {
        prefix,
        signatures: Vec::new(),
    })
}

fn key_image(output: &TransactionOutputInformation) -> Result<KeyImage> {
    match &output.kind {
        OutputKind::Key { key_image } if *key_image != KeyImage::default() => Ok(*key_image),
        OutputKind::Key { .. } => Err(WalletError::TrackingMode),
        OutputKind::Multisignature { .. } => Err(WalletError::Internal(format!(
            "Output {}:{} is not a key output",
            output.transaction_hash, output.output_in_transaction
        ))),
    }
}

/// Builds and ring-signs a transaction spending key outputs
pub fn make_transaction(
    inputs: &[InputInfo],
    outputs: &[ReceiverAmounts],
    deposit: Option<&DepositOutput>,
    extra: &[u8],
    unlock_time: u64,
    view_secret_key: &SecretKey,
) -> Result<Transaction> {
    let mut prefix_inputs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let absolute: Vec<u32> = input.ring.iter().map(|o| o.global_index).collect();
        prefix_inputs.push(TransactionInput::Key {
            amount: input.output.amount,
            output_indexes: absolute_output_offsets_to_relative(&absolute),
            key_image: key_image(&input.output)?,
        });
    }

    let mut transaction = assemble(
        prefix_inputs,
        outputs,
        deposit,
        extra,
        unlock_time,
        view_secret_key,
    )?;
    let prefix_hash = transaction.prefix_hash()?;
    for input in inputs {
        let secret = output_secret_key(&input.output, &input.keys)?;
        let ring: Vec<PublicKey> = input.ring.iter().map(|o| o.public_key).collect();
        transaction.signatures.push(generate_ring_signature(
            &prefix_hash,
            &key_image(&input.output)?,
            &ring,
            &secret,
            input.real_index,
        )?);
    }
    debug!(
        "Built transaction with {} inputs and {} outputs",
        transaction.prefix.inputs.len(),
        transaction.prefix.outputs.len()
    );
    Ok(transaction)
}

/// Builds and signs the transaction that spends a matured deposit
pub fn make_withdrawal(
    deposit: &TransactionOutputInformation,
    keys: &AccountKeys,
    outputs: &ReceiverAmounts,
    view_secret_key: &SecretKey,
) -> Result<Transaction> {
    let input = TransactionInput::Multisignature {
        amount: deposit.amount,
        signature_count: 1,
        output_index: deposit.global_output_index,
        term: deposit.term(),
    };
    let mut transaction = assemble(
        vec![input],
        std::slice::from_ref(outputs),
        None,
        &[],
        0,
        view_secret_key,
    )?;
    let prefix_hash = transaction.prefix_hash()?;
    let secret = output_secret_key(deposit, keys)?;
    transaction.signatures.push(vec![generate_signature(
        &prefix_hash,
        &deposit.output_key,
        &secret,
    )?]);
    Ok(transaction)
}

pub fn check_transaction_size(transaction: &Transaction, limit: usize) -> Result<usize> {
    let size = transaction.binary_size()?;
    if size > limit {
        return Err(WalletError::TransactionTooLarge { size, limit });
    }
    Ok(size)
}
