//! Fusion input picking
//!
//! A fusion transaction merges many small outputs of one denomination
//! bucket into a few large ones at zero fee. Buckets are powers of ten:
//! an output is eligible when it is a pretty amount above dust and below
//! the caller's threshold.

use rand::seq::SliceRandom;
use std::collections::BTreeMap;

use super::builder::{OutputToTransfer, ReceiverAmounts, WalletOuts};
use super::types::FusionEstimate;
use crate::core::{AccountPublicAddress, Currency};

fn bucket_sizes(currency: &Currency, threshold: u64, wallets: &[WalletOuts]) -> BTreeMap<u8, usize> {
    let mut sizes = BTreeMap::new();
    for output in wallets.iter().flat_map(|w| &w.outs) {
        if let Some(power) = currency.fusion_input_power(output.amount, threshold) {
            *sizes.entry(power).or_insert(0) += 1;
        }
    }
    sizes
}

/// Counts the unlocked outputs a fusion could consume right now
pub fn estimate(currency: &Currency, threshold: u64, wallets: &[WalletOuts]) -> FusionEstimate {
    let fusion_ready_count = bucket_sizes(currency, threshold, wallets)
        .values()
        .filter(|size| **size >= currency.fusion_tx_min_input_count)
        .sum();
    FusionEstimate {
        fusion_ready_count,
        total_output_count: wallets.iter().map(|w| w.outs.len()).sum(),
    }
}

/// Picks the inputs of one fusion transaction: a random bucket holding at
/// least `min_input_count` eligible outputs, trimmed at random to
/// `max_input_count` and sorted by amount. Empty when no bucket qualifies.
pub fn pick_random_fusion_inputs(
    currency: &Currency,
    threshold: u64,
    min_input_count: usize,
    max_input_count: usize,
    wallets: &[WalletOuts],
) -> Vec<OutputToTransfer> {
    let mut rng = rand::thread_rng();
    let candidates: Vec<u8> = bucket_sizes(currency, threshold, wallets)
        .into_iter()
        .filter(|(_, size)| *size >= min_input_count)
        .map(|(power, _)| power)
        .collect();
    let Some(&bucket) = candidates.choose(&mut rng) else {
        return Vec::new();
    };

    let mut selected: Vec<OutputToTransfer> = wallets
        .iter()
        .flat_map(|wallet| {
            wallet.outs.iter().filter_map(move |output| {
                (currency.fusion_input_power(output.amount, threshold) == Some(bucket)).then(|| {
                    OutputToTransfer {
                        output: output.clone(),
                        keys: wallet.keys.clone(),
                    }
                })
            })
        })
        .collect();
    if selected.len() > max_input_count {
        selected.shuffle(&mut rng);
        selected.truncate(max_input_count);
    }
    selected.sort_by_key(|o| o.output.amount);
    selected
}

/// Outputs of a fusion transaction: the decomposed input total
pub fn fusion_outputs(
    currency: &Currency,
    destination: AccountPublicAddress,
    amount: u64,
) -> ReceiverAmounts {
    ReceiverAmounts::split(destination, amount, currency.default_dust_threshold)
}
