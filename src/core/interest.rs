//! Deposit interest
//!
//! Interest is a pure function of amount, term and the height the deposit
//! was confirmed at. Terms that are whole weeks or whole quarters use the
//! v2 schedules; any other term falls back to the legacy linear rate, with
//! a bonus multiplier for deposits made in the first blocks of the chain.

use super::currency::Currency;

const QUARTER_TERM: u32 = 64_800;
const WEEK_TERM: u32 = 5_040;
const DEPOSIT_MAX_TOTAL_RATE: u128 = 4;
const DEPOSIT_MIN_TOTAL_RATE_FACTOR: u128 = 0;
const MULTIPLIER_FACTOR: u128 = 100;
const END_MULTIPLIER_BLOCK: u32 = 12_750;

// [low, high) in whole coins
const INVESTMENT_TIERS: &[(u64, u64, f32)] = &[
    (180_000, 260_000, 1.02),
    (260_000, 350_000, 1.03),
    (350_000, 450_000, 1.04),
    (450_000, 560_000, 1.05),
    (560_000, 680_000, 1.06),
    (680_000, 810_000, 1.07),
    (810_000, 950_000, 1.08),
    (950_000, 1_100_000, 1.09),
    (1_100_000, 1_260_000, 1.1),
    (1_260_000, 1_430_000, 1.11),
    (1_430_000, 1_610_000, 1.12),
    (1_610_000, 1_800_000, 1.13),
    (1_800_000, 2_000_000, 1.14),
];

pub fn calculate_interest(currency: &Currency, amount: u64, term: u32, height: u32) -> u64 {
    if term % QUARTER_TERM == 0 {
        return investment_interest(currency, amount, term);
    }
    if term % WEEK_TERM == 0 {
        return weekly_interest(amount, term);
    }

    let rate = u128::from(term) * DEPOSIT_MAX_TOTAL_RATE - DEPOSIT_MIN_TOTAL_RATE_FACTOR;
    let divisor = 100 * u128::from(currency.deposit_max_term.max(1));
    let mut interest = u128::from(amount) * rate / divisor;
    if height <= END_MULTIPLIER_BLOCK {
        interest *= MULTIPLIER_FACTOR;
    }
    u64::try_from(interest).unwrap_or(u64::MAX)
}

fn investment_tier(amount_in_coins: u64) -> f32 {
    if amount_in_coins > 110_000 && amount_in_coins < 180_000 {
        return 1.01;
    }
    if amount_in_coins > 2_000_000 {
        return 1.15;
    }
    INVESTMENT_TIERS
        .iter()
        .find(|(low, high, _)| amount_in_coins >= *low && amount_in_coins < *high)
        .map(|(_, _, tier)| *tier)
        .unwrap_or(1.0)
}

fn investment_interest(currency: &Currency, amount: u64, term: u32) -> u64 {
    let q_tier = investment_tier(amount / currency.coin.max(1));
    let mq: f32 = 1.4473;
    let quarters = (term / QUARTER_TERM) as f32;
    let m8 = (100.0 * (1.0 + f64::from(mq) / 100.0).powf(f64::from(quarters)) - 100.0) as f32;
    let m5 = quarters * 0.5;
    let m7 = m8 * (1.0 + m5 / 100.0);
    let rate = m7 * q_tier;
    (amount as f32 * (rate / 100.0)) as u64
}

fn weekly_interest(amount: u64, term: u32) -> u64 {
    let weeks = (term / WEEK_TERM) as f32;
    let base_interest: f32 = 0.0696;
    let interest_per_week: f32 = 0.0002;
    let rate = base_interest + weeks * interest_per_week;
    (amount as f32 * ((weeks * rate) / 100.0)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::monetary::COIN;

    #[test]
    fn test_linear_interest() {
        let currency = Currency::default();
        // 21,900 blocks at 4 units of rate over 262,800 * 100 is exactly 1/300
        assert_eq!(calculate_interest(&currency, 3 * COIN, 21_900, 20_000), 10_000);
        assert_eq!(
            calculate_interest(&currency, 3 * COIN, 21_900, END_MULTIPLIER_BLOCK),
            1_000_000
        );
        assert_eq!(calculate_interest(&currency, 0, 21_900, 20_000), 0);
    }

    #[test]
    fn test_weekly_interest() {
        let currency = Currency::default();
        let one_week = calculate_interest(&currency, COIN, WEEK_TERM, 500_000);
        assert!((697..=698).contains(&one_week), "got {one_week}");

        let four_weeks = calculate_interest(&currency, COIN, 4 * WEEK_TERM, 500_000);
        assert!(four_weeks > 4 * one_week);
    }

    #[test]
    fn test_investment_interest() {
        let currency = Currency::default();
        let interest = calculate_interest(&currency, 50_000 * COIN, QUARTER_TERM, 500_000);
        let expected = 50_000.0 * COIN as f64 * 0.014545;
        assert!((interest as f64 - expected).abs() / expected < 0.01);
    }

    #[test]
    fn test_investment_tiers() {
        assert_eq!(investment_tier(100_000), 1.0);
        assert_eq!(investment_tier(150_000), 1.01);
        assert_eq!(investment_tier(180_000), 1.02);
        assert_eq!(investment_tier(1_999_999), 1.14);
        assert_eq!(investment_tier(2_000_000), 1.0);
        assert_eq!(investment_tier(2_000_001), 1.15);
    }

    #[test]
    fn test_interest_is_deterministic() {
        let currency = Currency::default();
        let first = calculate_interest(&currency, 7 * COIN, 3 * WEEK_TERM, 1_000);
        let second = calculate_interest(&currency, 7 * COIN, 3 * WEEK_TERM, 1_000);
        assert_eq!(first, second);
    }
}
