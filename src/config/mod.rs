//! Configuration management
//!
//! A `toml` settings file for the wallet and the currency parameters, plus a
//! process-wide store of environment overrides used by the CLI.

pub mod settings;

pub use settings::{
    Config, DonationSettings, WalletSettings, DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_MIXIN,
    GLOBAL_CONFIG,
};
