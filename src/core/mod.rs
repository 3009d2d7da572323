//! Core chain model
//!
//! Currency parameters and rules, monetary units, deposit interest,
//! account keys, and the transaction and block structures the wallet
//! reads from the node and builds itself.

pub mod account;
pub mod block;
pub mod currency;
pub mod interest;
pub mod monetary;
pub mod transaction;

pub use account::{AccountKeys, AccountPublicAddress};
pub use block::{Block, BlockHeader, BlockTransaction, CompleteBlock};
pub use currency::{decompose_amount, Currency};
pub use monetary::{COIN, DEFAULT_DUST_THRESHOLD, MINIMUM_FEE, MINIMUM_FEE_V2};
pub use transaction::{
    Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget, TransactionPrefix,
};
