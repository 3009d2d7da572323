use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::Currency;
use crate::error::{Result, WalletError};

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_WALLET_FILE: &str = "wallet.ccx";
static DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_MIXIN: u64 = 4;
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1_024;

const WALLET_FILE_KEY: &str = "CONCEAL_WALLET_FILE";
const LOG_LEVEL_KEY: &str = "CONCEAL_LOG_LEVEL";
const DEFAULT_MIXIN_KEY: &str = "CONCEAL_DEFAULT_MIXIN";

/// Process-wide overrides read from the environment at first use
pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let mut map = HashMap::new();
        map.insert(
            String::from(WALLET_FILE_KEY),
            env::var(WALLET_FILE_KEY).unwrap_or_else(|_| String::from(DEFAULT_WALLET_FILE)),
        );
        map.insert(
            String::from(LOG_LEVEL_KEY),
            env::var(LOG_LEVEL_KEY).unwrap_or_else(|_| String::from(DEFAULT_LOG_LEVEL)),
        );
        if let Ok(mixin) = env::var(DEFAULT_MIXIN_KEY) {
            map.insert(String::from(DEFAULT_MIXIN_KEY), mixin);
        }
        Config {
            inner: RwLock::new(map),
        }
    }

    // a panic while holding the lock cannot leave the map half-written
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_wallet_file(&self) -> PathBuf {
        self.read()
            .get(WALLET_FILE_KEY)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WALLET_FILE))
    }

    pub fn set_wallet_file(&self, path: &Path) {
        self.write().insert(
            String::from(WALLET_FILE_KEY),
            path.to_string_lossy().into_owned(),
        );
    }

    pub fn get_log_level(&self) -> String {
        self.read()
            .get(LOG_LEVEL_KEY)
            .cloned()
            .unwrap_or_else(|| String::from(DEFAULT_LOG_LEVEL))
    }

    pub fn set_log_level(&self, level: String) {
        self.write().insert(String::from(LOG_LEVEL_KEY), level);
    }

    /// Mixin override, if one was set and parses
    pub fn get_default_mixin(&self) -> Option<u64> {
        self.read()
            .get(DEFAULT_MIXIN_KEY)
            .and_then(|value| value.parse().ok())
    }

    pub fn set_default_mixin(&self, mixin: u64) {
        self.write()
            .insert(String::from(DEFAULT_MIXIN_KEY), mixin.to_string());
    }
}

/// Where part of the change goes when a donation policy is active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationSettings {
    pub address: String,
    /// Upper bound on the part of the change given away
    pub threshold: u64,
}

/// Settings file of the wallet (`toml`); every key is optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletSettings {
    pub wallet_file: PathBuf,
    pub log_level: String,
    pub default_mixin: u64,
    pub event_queue_capacity: usize,
    /// Blocks after confirmation before a balance unlock is reported
    pub transaction_soft_lock_time: u32,
    pub upper_transaction_size_limit: Option<usize>,
    pub donation: Option<DonationSettings>,
    pub currency: Currency,
}

impl Default for WalletSettings {
    fn default() -> Self {
        WalletSettings {
            wallet_file: PathBuf::from(DEFAULT_WALLET_FILE),
            log_level: String::from(DEFAULT_LOG_LEVEL),
            default_mixin: DEFAULT_MIXIN,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            transaction_soft_lock_time: 1,
            upper_transaction_size_limit: None,
            donation: None,
            currency: Currency::default(),
        }
    }
}

impl WalletSettings {
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: WalletSettings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| WalletError::Config(e.to_string()))
    }

    /// Applies the environment overrides held by [`GLOBAL_CONFIG`]; the
    /// wallet file only when it was set explicitly
    pub fn with_overrides(mut self, config: &Config) -> Self {
        if env::var(WALLET_FILE_KEY).is_ok() {
            self.wallet_file = config.get_wallet_file();
        }
        if env::var(LOG_LEVEL_KEY).is_ok() {
            self.log_level = config.get_log_level();
        }
        if let Some(mixin) = config.get_default_mixin() {
            self.default_mixin = mixin;
        }
        self
    }

    pub fn upper_transaction_size_limit(&self) -> usize {
        self.upper_transaction_size_limit
            .unwrap_or_else(|| self.currency.upper_transaction_size_limit())
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_queue_capacity == 0 {
            return Err(WalletError::Config(
                "event_queue_capacity must be positive".to_string(),
            ));
        }
        if let Some(donation) = &self.donation {
            if donation.threshold == 0 {
                return Err(WalletError::Config(
                    "donation threshold must be positive".to_string(),
                ));
            }
            if !self.currency.is_valid_address(&donation.address) {
                return Err(WalletError::Config(format!(
                    "donation address {} is invalid",
                    donation.address
                )));
            }
        }
        if self.currency.difficulty_target == 0 {
            return Err(WalletError::Config(
                "currency.difficulty_target must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
