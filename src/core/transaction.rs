// Transaction model of the chain. A transaction spends key inputs (ring
// signed), deposit inputs (multisignature) or the block reward, and
// creates key or multisignature outputs.

use serde::{Deserialize, Serialize};

use crate::crypto::{fast_hash, Hash, KeyImage, PublicKey, Signature};
use crate::error::Result;
use crate::utils::serialize;

pub const CURRENT_TRANSACTION_VERSION: u8 = 1;

pub const TX_EXTRA_PADDING: u8 = 0x00;
pub const TX_EXTRA_PUBKEY: u8 = 0x01;
pub const TX_EXTRA_NONCE: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum TransactionInput {
    /// Block reward input of a coinbase transaction
    Base { block_index: u32 },
    /// Ring-signed spend; `output_indexes` are relative offsets into the
    /// global outputs of `amount`
    Key {
        amount: u64,
        output_indexes: Vec<u32>,
        key_image: KeyImage,
    },
    /// Spend of a multisignature output, used to withdraw deposits
    Multisignature {
        amount: u64,
        signature_count: u8,
        output_index: u32,
        term: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum TransactionOutputTarget {
    Key {
        key: PublicKey,
    },
    Multisignature {
        keys: Vec<PublicKey>,
        required_signatures: u8,
        term: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: TransactionOutputTarget,
}

/// Signed part of a transaction
#[derive(
    Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TransactionPrefix {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    /// One signature vector per input (ring members for key inputs)
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    pub fn prefix_hash(&self) -> Result<Hash> {
        Ok(fast_hash(&serialize(&self.prefix)?))
    }

    pub fn hash(&self) -> Result<Hash> {
        Ok(fast_hash(&serialize(self)?))
    }

    pub fn binary_size(&self) -> Result<usize> {
        Ok(serialize(self)?.len())
    }

    pub fn is_base(&self) -> bool {
        matches!(
            self.prefix.inputs.as_slice(),
            [TransactionInput::Base { .. }]
        )
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        public_key_from_extra(&self.prefix.extra)
    }

    /// Face value of inputs; deposit interest is not included
    pub fn input_amount(&self) -> u64 {
        self.prefix
            .inputs
            .iter()
            .map(|input| match input {
                TransactionInput::Base { .. } => 0,
                TransactionInput::Key { amount, .. } => *amount,
                TransactionInput::Multisignature { amount, .. } => *amount,
            })
            .fold(0u64, u64::saturating_add)
    }

    pub fn output_amount(&self) -> u64 {
        self.prefix
            .outputs
            .iter()
            .map(|output| output.amount)
            .fold(0u64, u64::saturating_add)
    }

    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.prefix.inputs.iter().filter_map(|input| match input {
            TransactionInput::Key { key_image, .. } => Some(key_image),
            _ => None,
        })
    }
}

pub fn add_public_key_to_extra(extra: &mut Vec<u8>, key: &PublicKey) {
    extra.push(TX_EXTRA_PUBKEY);
    extra.extend_from_slice(&key.0);
}

pub fn add_nonce_to_extra(extra: &mut Vec<u8>, nonce: &[u8]) -> bool {
    let Ok(len) = u8::try_from(nonce.len()) else {
        return false;
    };
    extra.push(TX_EXTRA_NONCE);
    extra.push(len);
    extra.extend_from_slice(nonce);
    true
}

/// First transaction public key found in `extra`
pub fn public_key_from_extra(extra: &[u8]) -> Option<PublicKey> {
    let mut pos = 0;
    while pos < extra.len() {
        match extra[pos] {
            TX_EXTRA_PADDING => return None,
            TX_EXTRA_PUBKEY => {
                let bytes = extra.get(pos + 1..pos + 33)?;
                let mut key = [0u8; 32];
                key.copy_from_slice(bytes);
                return Some(PublicKey(key));
            }
            TX_EXTRA_NONCE => {
                let len = usize::from(*extra.get(pos + 1)?);
                pos += 2 + len;
            }
            _ => return None,
        }
    }
    None
}

pub fn absolute_output_offsets_to_relative(offsets: &[u32]) -> Vec<u32> {
    let mut relative = Vec::with_capacity(offsets.len());
    let mut previous = 0u32;
    for (i, offset) in offsets.iter().enumerate() {
        relative.push(if i == 0 { *offset } else { offset.saturating_sub(previous) });
        previous = *offset;
    }
    relative
}

pub fn relative_output_offsets_to_absolute(offsets: &[u32]) -> Vec<u32> {
    let mut absolute = Vec::with_capacity(offsets.len());
    let mut total = 0u32;
    for offset in offsets {
        total = total.saturating_add(*offset);
        absolute.push(total);
    }
    absolute
}
