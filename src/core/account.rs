// Account keys: every wallet address is a spend keypair plus the view
// keypair shared by the whole wallet

use serde::{Deserialize, Serialize};

use crate::crypto::{generate_keys, secret_key_to_public_key, PublicKey, SecretKey};
use crate::error::Result;

/// Public half of an address
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct AccountPublicAddress {
    pub spend_public_key: PublicKey,
    pub view_public_key: PublicKey,
}

/// Full key set of one account; `spend_secret_key` is `None` for
/// tracking (view-only) accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct AccountKeys {
    pub address: AccountPublicAddress,
    pub spend_secret_key: Option<SecretKey>,
    pub view_secret_key: SecretKey,
}

impl AccountKeys {
    /// Fresh spend and view keypairs
    pub fn generate() -> AccountKeys {
        let (view_public_key, view_secret_key) = generate_keys();
        let (spend_public_key, spend_secret_key) = generate_keys();
        AccountKeys {
            address: AccountPublicAddress {
                spend_public_key,
                view_public_key,
            },
            spend_secret_key: Some(spend_secret_key),
            view_secret_key,
        }
    }

    /// Builds the key set from raw secrets, deriving the public halves
    pub fn from_secrets(spend_secret_key: SecretKey, view_secret_key: SecretKey) -> Result<Self> {
        let spend_public_key = secret_key_to_public_key(&spend_secret_key)?;
        let view_public_key = secret_key_to_public_key(&view_secret_key)?;
        Ok(AccountKeys {
            address: AccountPublicAddress {
                spend_public_key,
                view_public_key,
            },
            spend_secret_key: Some(spend_secret_key),
            view_secret_key,
        })
    }

    /// View-only key set for an address whose spend secret is unknown
    pub fn tracking(spend_public_key: PublicKey, view_secret_key: SecretKey) -> Result<Self> {
        let view_public_key = secret_key_to_public_key(&view_secret_key)?;
        Ok(AccountKeys {
            address: AccountPublicAddress {
                spend_public_key,
                view_public_key,
            },
            spend_secret_key: None,
            view_secret_key,
        })
    }

    pub fn is_tracking(&self) -> bool {
        self.spend_secret_key.is_none()
    }
}
