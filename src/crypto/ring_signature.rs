//! Linkable ring signatures over key inputs
//!
//! The signer proves knowledge of the secret key of one ring member and
//! binds the proof to the key image `I = x·H_p(P)`, so two signatures by the
//! same key are detectable without revealing which member signed.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;

use super::keys::{
    canonical_scalar, from_point, hash_to_point, hash_to_scalar, random_scalar, to_point,
    to_scalar, Hash, KeyImage, PublicKey, SecretKey, Signature,
};
use crate::error::{Result, WalletError};

fn image_point(image: &KeyImage) -> Result<RistrettoPoint> {
    let point = to_point(&PublicKey(image.0))?;
    if point == RistrettoPoint::identity() {
        return Err(WalletError::Crypto("Key image is the identity".to_string()));
    }
    Ok(point)
}

pub fn generate_ring_signature(
    prefix_hash: &Hash,
    image: &KeyImage,
    ring: &[PublicKey],
    secret: &SecretKey,
    real_index: usize,
) -> Result<Vec<Signature>> {
    if real_index >= ring.len() {
        return Err(WalletError::Crypto(format!(
            "Real output index {real_index} outside ring of {}",
            ring.len()
        )));
    }
    let x = to_scalar(secret)?;
    if from_point(&RistrettoPoint::mul_base(&x)) != ring[real_index] {
        return Err(WalletError::Crypto(
            "Secret key does not match the real ring member".to_string(),
        ));
    }
    let image_point = image_point(image)?;

    let mut transcript: Vec<u8> = Vec::with_capacity(32 + ring.len() * 64);
    transcript.extend_from_slice(&prefix_hash.0);

    let mut signatures = vec![Signature::default(); ring.len()];
    let mut sum = Scalar::ZERO;
    let mut k = Scalar::ZERO;
    for (i, member) in ring.iter().enumerate() {
        let hp = hash_to_point(member);
        let (l, r) = if i == real_index {
            k = random_scalar();
            (RistrettoPoint::mul_base(&k), hp * k)
        } else {
            let point = to_point(member)?;
            let c = random_scalar();
            let r = random_scalar();
            signatures[i] = Signature {
                c: c.to_bytes(),
                r: r.to_bytes(),
            };
            sum += c;
            (
                RistrettoPoint::mul_base(&r) + point * c,
                hp * r + image_point * c,
            )
        };
        transcript.extend_from_slice(l.compress().as_bytes());
        transcript.extend_from_slice(r.compress().as_bytes());
    }

    let challenge = hash_to_scalar(&[transcript.as_slice()]);
    let c_real = challenge - sum;
    let r_real = k - c_real * x;
    signatures[real_index] = Signature {
        c: c_real.to_bytes(),
        r: r_real.to_bytes(),
    };
    Ok(signatures)
}

pub fn check_ring_signature(
    prefix_hash: &Hash,
    image: &KeyImage,
    ring: &[PublicKey],
    signatures: &[Signature],
) -> bool {
    if ring.is_empty() || ring.len() != signatures.len() {
        return false;
    }
    let Ok(image_point) = image_point(image) else {
        return false;
    };

    let mut transcript: Vec<u8> = Vec::with_capacity(32 + ring.len() * 64);
    transcript.extend_from_slice(&prefix_hash.0);
    let mut sum = Scalar::ZERO;
    for (member, signature) in ring.iter().zip(signatures) {
        let (Some(c), Some(r)) = (canonical_scalar(&signature.c), canonical_scalar(&signature.r))
        else {
            return false;
        };
        let Ok(point) = to_point(member) else {
            return false;
        };
        let l = RistrettoPoint::mul_base(&r) + point * c;
        let rr = hash_to_point(member) * r + image_point * c;
        transcript.extend_from_slice(l.compress().as_bytes());
        transcript.extend_from_slice(rr.compress().as_bytes());
        sum += c;
    }
    hash_to_scalar(&[transcript.as_slice()]) == sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{fast_hash, generate_key_image, generate_keys};

    fn ring_with_real(size: usize, real: usize) -> (Vec<PublicKey>, SecretKey) {
        let mut ring = Vec::new();
        let mut real_secret = None;
        for i in 0..size {
            let (public, secret) = generate_keys();
            ring.push(public);
            if i == real {
                real_secret = Some(secret);
            }
        }
        (ring, real_secret.unwrap())
    }

    #[test]
    fn test_ring_signature_verifies() {
        let (ring, secret) = ring_with_real(5, 2);
        let image = generate_key_image(&ring[2], &secret).unwrap();
        let prefix = fast_hash(b"prefix");

        let sigs = generate_ring_signature(&prefix, &image, &ring, &secret, 2).unwrap();
        assert_eq!(sigs.len(), 5);
        assert!(check_ring_signature(&prefix, &image, &ring, &sigs));
        assert!(!check_ring_signature(&fast_hash(b"tampered"), &image, &ring, &sigs));
    }

    #[test]
    fn test_ring_signature_single_member() {
        let (ring, secret) = ring_with_real(1, 0);
        let image = generate_key_image(&ring[0], &secret).unwrap();
        let prefix = fast_hash(b"no mixin");
        let sigs = generate_ring_signature(&prefix, &image, &ring, &secret, 0).unwrap();
        assert!(check_ring_signature(&prefix, &image, &ring, &sigs));
    }

    #[test]
    fn test_wrong_image_rejected() {
        let (ring, secret) = ring_with_real(3, 0);
        let image = generate_key_image(&ring[0], &secret).unwrap();
        let prefix = fast_hash(b"prefix");
        let sigs = generate_ring_signature(&prefix, &image, &ring, &secret, 0).unwrap();

        let (other_pub, other_sec) = generate_keys();
        let other_image = generate_key_image(&other_pub, &other_sec).unwrap();
        assert!(!check_ring_signature(&prefix, &other_image, &ring, &sigs));
    }

    #[test]
    fn test_secret_must_match_real_member() {
        let (ring, _) = ring_with_real(3, 1);
        let (_, stranger) = generate_keys();
        let image = generate_key_image(&ring[1], &stranger).unwrap();
        let result = generate_ring_signature(&fast_hash(b"p"), &image, &ring, &stranger, 1);
        assert!(matches!(result, Err(WalletError::Crypto(_))));
    }
}
