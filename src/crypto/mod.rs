//! Cryptographic primitives
//!
//! Key generation, one-time output key derivation, key images and the two
//! signature schemes the wallet needs: a single-key Schnorr signature for
//! multisignature (deposit) inputs and a linkable ring signature for key
//! inputs. Everything runs over the Ristretto group from
//! `curve25519-dalek`; hashes come from `ring`.

pub mod keys;
pub mod ring_signature;

pub use keys::{
    check_key, check_signature, derive_public_key, derive_secret_key, fast_hash,
    generate_deterministic_tx_keys, generate_key_derivation, generate_key_image, generate_keys,
    generate_signature, secret_key_to_public_key, underive_public_key, Hash, KeyDerivation,
    KeyImage, PublicKey, SecretKey, Signature,
};
pub use ring_signature::{check_ring_signature, generate_ring_signature};
