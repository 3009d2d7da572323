//! Utility functions and helpers
//!
//! Hashing, text encodings, varints and bincode helpers shared by the
//! crypto, currency and storage layers.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, current_timestamp, read_varint, sha256_digest, sha512_digest,
    write_varint,
};

pub use serialization::{deserialize, serialize};
