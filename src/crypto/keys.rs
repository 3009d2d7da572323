use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use data_encoding::HEXLOWER;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, WalletError};
use crate::utils::{sha256_digest, sha512_digest, write_varint};

const HASH_TO_POINT_DOMAIN: &[u8] = b"ccx-hash-to-point";
const TX_KEY_DOMAIN: &[u8] = b"ccx-tx-key";

macro_rules! byte_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            Default,
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
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                HEXLOWER.encode(&self.0)
            }

            pub fn from_hex(text: &str) -> Result<Self> {
                let bytes = hex::decode(text).map_err(|e| {
                    WalletError::Crypto(format!("Invalid hex for {}: {e}", stringify!($name)))
                })?;
                let array: [u8; 32] = bytes.try_into().map_err(|_| {
                    WalletError::Crypto(format!("{} must be 32 bytes", stringify!($name)))
                })?;
                Ok($name(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }
    };
}

byte_key!(
    /// 32-byte hash identifying blocks and transactions
    Hash
);
byte_key!(
    /// Compressed Ristretto point
    PublicKey
);
byte_key!(
    /// Spend-uniqueness tag of a key output
    KeyImage
);
byte_key!(
    /// Shared secret `a·R` between a view key and a transaction key
    KeyDerivation
);

/// Secret scalar, wiped from memory on drop
#[derive(
    Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct SecretKey(pub [u8; 32]);

impl SecretKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text)
            .map_err(|e| WalletError::Crypto(format!("Invalid hex for SecretKey: {e}")))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WalletError::Crypto("SecretKey must be 32 bytes".to_string()))?;
        let key = SecretKey(array);
        to_scalar(&key)?;
        Ok(key)
    }

    fn from_scalar(scalar: &Scalar) -> Self {
        SecretKey(scalar.to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey").field("bytes", &"[redacted]").finish()
    }
}

/// Schnorr-style signature `(c, r)`; ring signatures are one per member
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Signature {
    pub c: [u8; 32],
    pub r: [u8; 32],
}

pub(crate) fn to_scalar(key: &SecretKey) -> Result<Scalar> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(key.0))
        .ok_or_else(|| WalletError::Crypto("Secret key is not a canonical scalar".to_string()))
}

pub(crate) fn to_point(key: &PublicKey) -> Result<RistrettoPoint> {
    CompressedRistretto(key.0)
        .decompress()
        .ok_or_else(|| WalletError::Crypto(format!("Invalid public key {key}")))
}

pub(crate) fn from_point(point: &RistrettoPoint) -> PublicKey {
    PublicKey(point.compress().to_bytes())
}

pub(crate) fn canonical_scalar(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(*bytes))
}

pub(crate) fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut wide);
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

pub(crate) fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    Scalar::from_bytes_mod_order_wide(&sha512_digest(parts))
}

pub(crate) fn hash_to_point(key: &PublicKey) -> RistrettoPoint {
    RistrettoPoint::from_uniform_bytes(&sha512_digest(&[HASH_TO_POINT_DOMAIN, &key.0]))
}

fn derivation_to_scalar(derivation: &KeyDerivation, output_index: usize) -> Scalar {
    let mut buf = Vec::with_capacity(42);
    buf.extend_from_slice(&derivation.0);
    write_varint(&mut buf, output_index as u64);
    hash_to_scalar(&[buf.as_slice()])
}

pub fn fast_hash(data: &[u8]) -> Hash {
    Hash(sha256_digest(data))
}

pub fn generate_keys() -> (PublicKey, SecretKey) {
    let scalar = random_scalar();
    let public = from_point(&RistrettoPoint::mul_base(&scalar));
    (public, SecretKey::from_scalar(&scalar))
}

pub fn secret_key_to_public_key(secret: &SecretKey) -> Result<PublicKey> {
    let scalar = to_scalar(secret)?;
    Ok(from_point(&RistrettoPoint::mul_base(&scalar)))
}

pub fn check_key(key: &PublicKey) -> bool {
    CompressedRistretto(key.0).decompress().is_some()
}

pub fn generate_key_derivation(
    tx_public_key: &PublicKey,
    view_secret: &SecretKey,
) -> Result<KeyDerivation> {
    let point = to_point(tx_public_key)?;
    let scalar = to_scalar(view_secret)?;
    Ok(KeyDerivation((point * scalar).compress().to_bytes()))
}

/// `H_s(D ‖ i)·G + B`
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: usize,
    base: &PublicKey,
) -> Result<PublicKey> {
    let base = to_point(base)?;
    let tweak = derivation_to_scalar(derivation, output_index);
    Ok(from_point(&(RistrettoPoint::mul_base(&tweak) + base)))
}

/// Inverse of [`derive_public_key`]: recovers the spend key an output pays to
pub fn underive_public_key(
    derivation: &KeyDerivation,
    output_index: usize,
    derived: &PublicKey,
) -> Result<PublicKey> {
    let derived = to_point(derived)?;
    let tweak = derivation_to_scalar(derivation, output_index);
    Ok(from_point(&(derived - RistrettoPoint::mul_base(&tweak))))
}

pub fn derive_secret_key(
    derivation: &KeyDerivation,
    output_index: usize,
    base: &SecretKey,
) -> Result<SecretKey> {
    let base = to_scalar(base)?;
    let tweak = derivation_to_scalar(derivation, output_index);
    Ok(SecretKey::from_scalar(&(tweak + base)))
}

/// `x·H_p(P)`
pub fn generate_key_image(public: &PublicKey, secret: &SecretKey) -> Result<KeyImage> {
    let scalar = to_scalar(secret)?;
    let point = hash_to_point(public) * scalar;
    Ok(KeyImage(point.compress().to_bytes()))
}

/// Transaction key derived from the wallet view secret and the inputs, so
/// the sender can later reproduce it
pub fn generate_deterministic_tx_keys(
    inputs_hash: &Hash,
    view_secret: &SecretKey,
) -> Result<(PublicKey, SecretKey)> {
    let scalar = hash_to_scalar(&[TX_KEY_DOMAIN, &view_secret.0, &inputs_hash.0]);
    if scalar == Scalar::ZERO {
        return Err(WalletError::Crypto(
            "Derived transaction key is zero".to_string(),
        ));
    }
    let public = from_point(&RistrettoPoint::mul_base(&scalar));
    Ok((public, SecretKey::from_scalar(&scalar)))
}

pub fn generate_signature(
    prefix_hash: &Hash,
    public: &PublicKey,
    secret: &SecretKey,
) -> Result<Signature> {
    let x = to_scalar(secret)?;
    if from_point(&RistrettoPoint::mul_base(&x)) != *public {
        return Err(WalletError::Crypto(
            "Secret key does not match public key".to_string(),
        ));
    }
    let k = random_scalar();
    let commitment = RistrettoPoint::mul_base(&k).compress();
    let c = hash_to_scalar(&[&prefix_hash.0, &public.0, commitment.as_bytes()]);
    let r = k - c * x;
    Ok(Signature {
        c: c.to_bytes(),
        r: r.to_bytes(),
    })
}

pub fn check_signature(prefix_hash: &Hash, public: &PublicKey, signature: &Signature) -> bool {
    let (Some(c), Some(r)) = (canonical_scalar(&signature.c), canonical_scalar(&signature.r))
    else {
        return false;
    };
    let Ok(point) = to_point(public) else {
        return false;
    };
    let commitment = (RistrettoPoint::mul_base(&r) + point * c).compress();
    hash_to_scalar(&[&prefix_hash.0, &public.0, commitment.as_bytes()]) == c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_match() {
        let (public, secret) = generate_keys();
        assert_eq!(secret_key_to_public_key(&secret).unwrap(), public);
        assert!(check_key(&public));
    }

    #[test]
    fn test_output_key_derivation_roundtrip() {
        let (view_pub, view_sec) = generate_keys();
        let (spend_pub, spend_sec) = generate_keys();
        let (tx_pub, tx_sec) = generate_keys();

        // sender side uses r·A, receiver side uses a·R
        let sender = generate_key_derivation(&view_pub, &tx_sec).unwrap();
        let receiver = generate_key_derivation(&tx_pub, &view_sec).unwrap();
        assert_eq!(sender, receiver);

        let output_key = derive_public_key(&sender, 3, &spend_pub).unwrap();
        assert_eq!(
            underive_public_key(&receiver, 3, &output_key).unwrap(),
            spend_pub
        );
        assert_ne!(
            underive_public_key(&receiver, 4, &output_key).unwrap(),
            spend_pub
        );

        let ephemeral = derive_secret_key(&receiver, 3, &spend_sec).unwrap();
        assert_eq!(secret_key_to_public_key(&ephemeral).unwrap(), output_key);
    }

    #[test]
    fn test_key_image_is_deterministic() {
        let (public, secret) = generate_keys();
        let first = generate_key_image(&public, &secret).unwrap();
        let second = generate_key_image(&public, &secret).unwrap();
        assert_eq!(first, second);

        let (other_pub, other_sec) = generate_keys();
        assert_ne!(first, generate_key_image(&other_pub, &other_sec).unwrap());
    }

    #[test]
    fn test_schnorr_signature() {
        let (public, secret) = generate_keys();
        let message = fast_hash(b"withdraw deposit");
        let signature = generate_signature(&message, &public, &secret).unwrap();
        assert!(check_signature(&message, &public, &signature));
        assert!(!check_signature(&fast_hash(b"other"), &public, &signature));

        let (other, _) = generate_keys();
        assert!(generate_signature(&message, &other, &secret).is_err());
    }

    #[test]
    fn test_deterministic_tx_keys() {
        let (_, view_sec) = generate_keys();
        let inputs = fast_hash(b"inputs");
        let (pub_a, _) = generate_deterministic_tx_keys(&inputs, &view_sec).unwrap();
        let (pub_b, _) = generate_deterministic_tx_keys(&inputs, &view_sec).unwrap();
        assert_eq!(pub_a, pub_b);
        let (pub_c, _) = generate_deterministic_tx_keys(&fast_hash(b"x"), &view_sec).unwrap();
        assert_ne!(pub_a, pub_c);
    }

    #[test]
    fn test_hex_and_debug() {
        let hash = fast_hash(b"abc");
        assert_eq!(Hash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert!(Hash::from_hex("abcd").is_err());

        let (_, secret) = generate_keys();
        assert!(!format!("{secret:?}").contains(&secret.to_hex()));
    }
}
