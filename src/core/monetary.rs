/// Monetary units of the Conceal chain
///
/// All amounts inside the wallet are integer atomic units. One coin is
/// split into 1,000,000 atomic units (six decimal places).
///
/// ## Monetary Units
/// - **Atomic unit**: the smallest amount an output can carry
/// - **Coin**: 1,000,000 atomic units
/// - **Minimum Fee**: 10 atomic units for regular transfers
/// - **Deposit Fee**: 1,000 atomic units for deposit and v2 transactions
///
/// Number of atomic units in one coin
pub const COIN: u64 = 1_000_000;

/// Number of decimal places shown to users
pub const DISPLAY_DECIMAL_POINT: usize = 6;

/// Ticker used when formatting amounts
pub const TICKER: &str = "CCX";

/// Minimum fee accepted for a regular transfer
pub const MINIMUM_FEE: u64 = 10;

/// Fee charged for deposit creation and v2 transactions
pub const MINIMUM_FEE_V2: u64 = 1_000;

/// Outputs below this amount are dust
pub const DEFAULT_DUST_THRESHOLD: u64 = 10;

/// Smallest amount that can be locked in a deposit
pub const DEPOSIT_MIN_AMOUNT: u64 = COIN;

/// Utility functions for monetary conversions
pub mod conversions {
    use super::*;
    use crate::error::{Result, WalletError};

    /// Convert coins to atomic units
    ///
    /// # Examples
    /// ```
    /// use conceal_wallet::core::monetary::conversions::coins_to_atomic;
    /// assert_eq!(coins_to_atomic(1.0), 1_000_000);
    /// assert_eq!(coins_to_atomic(0.5), 500_000);
    /// ```
    pub fn coins_to_atomic(coins: f64) -> u64 {
        (coins * COIN as f64).round() as u64
    }

    /// Convert atomic units to coins
    ///
    /// # Examples
    /// ```
    /// use conceal_wallet::core::monetary::conversions::atomic_to_coins;
    /// assert_eq!(atomic_to_coins(1_000_000), 1.0);
    /// assert_eq!(atomic_to_coins(500_000), 0.5);
    /// ```
    pub fn atomic_to_coins(amount: u64) -> f64 {
        amount as f64 / COIN as f64
    }

    /// Format atomic units as a human-readable string without float rounding
    ///
    /// # Examples
    /// ```
    /// use conceal_wallet::core::monetary::conversions::format_amount;
    /// assert_eq!(format_amount(1_000_000), "1.000000 CCX");
    /// assert_eq!(format_amount(1_000), "0.001000 CCX");
    /// ```
    pub fn format_amount(amount: u64) -> String {
        format!(
            "{}.{:0width$} {TICKER}",
            amount / COIN,
            amount % COIN,
            width = DISPLAY_DECIMAL_POINT
        )
    }

    /// Format a signed wallet delta, keeping the sign in front
    pub fn format_signed_amount(amount: i64) -> String {
        if amount < 0 {
            format!("-{}", format_amount(amount.unsigned_abs()))
        } else {
            format_amount(amount as u64)
        }
    }

    /// Parse a decimal coin string such as `"12.5"` into atomic units
    pub fn parse_amount(text: &str) -> Result<u64> {
        let text = text.trim();
        let invalid = || WalletError::Config(format!("Invalid amount '{text}'"));
        let (whole, fraction) = match text.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (text, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if fraction.len() > DISPLAY_DECIMAL_POINT
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut padded = fraction.to_string();
        while padded.len() < DISPLAY_DECIMAL_POINT {
            padded.push('0');
        }
        let fraction: u64 = padded.parse().map_err(|_| invalid())?;
        whole
            .checked_mul(COIN)
            .and_then(|v| v.checked_add(fraction))
            .ok_or(WalletError::SumOverflow)
    }

    /// Validate that an amount is not dust under the given threshold
    pub fn is_above_dust_threshold(amount: u64, dust_threshold: u64) -> bool {
        amount >= dust_threshold
    }
}
