//! Ring signature verification and generation.
//!
//! The scheme is the classic one-of-many ring over Ed25519: per ring
//! member a `(c, r)` pair, with the challenge hash tying every
//! `(L, R)` commitment to the transaction prefix hash, and the key
//! image binding the signer's one-time key so a second spend of the
//! same key is detectable.

//---------------------------------------------------------------------------------------------------- Import
use curve25519_dalek::{
    constants::ED25519_BASEPOINT_TABLE,
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar,
};
use rand::rngs::OsRng;

use azurite_types::{hash_bytes, Hash, KeyImage, PublicKey, Signature};

use super::RingSignatureVerifier;

//---------------------------------------------------------------------------------------------------- Curve helpers
fn hash_to_scalar(chunks: &[&[u8]]) -> Scalar {
    Scalar::from_bytes_mod_order(blake3_buf(chunks))
}

fn blake3_buf(chunks: &[&[u8]]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(chunks.iter().map(|c| c.len()).sum());
    for chunk in chunks {
        buf.extend_from_slice(chunk);
    }
    hash_bytes(&buf).0
}

/// Deterministic point derived from a public key, the second generator
/// of the key-image equation.
pub fn hash_to_point(key: &PublicKey) -> EdwardsPoint {
    ED25519_BASEPOINT_TABLE * &hash_to_scalar(&[b"azurite_hash_to_point", &key.0])
}

fn decompress(bytes: &[u8; 32]) -> Option<EdwardsPoint> {
    CompressedEdwardsY(*bytes).decompress()
}

fn scalar(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*bytes))
}

//---------------------------------------------------------------------------------------------------- Verify
/// The curve-backed [`RingSignatureVerifier`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RingVerifier;

impl RingSignatureVerifier for RingVerifier {
    fn check_ring_signature(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool {
        if ring.is_empty() || ring.len() != signatures.len() {
            return false;
        }

        let Some(image) = decompress(&key_image.0) else {
            return false;
        };
        // A torsioned key image would admit up to eight variants of
        // the same spend.
        if !image.is_torsion_free() {
            return false;
        }

        let mut challenge_buf: Vec<u8> = prefix_hash.0.to_vec();
        let mut c_sum = Scalar::ZERO;

        for (member, sig) in ring.iter().zip(signatures) {
            let Some(pubkey) = decompress(&member.0) else {
                return false;
            };
            let (Some(c), Some(r)) = (scalar(&sig.c), scalar(&sig.r)) else {
                return false;
            };

            // L = r·G + c·P, R = r·Hp(P) + c·I.
            let l = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &pubkey, &r);
            let h = hash_to_point(member);
            let rr = r * h + c * image;

            challenge_buf.extend_from_slice(l.compress().as_bytes());
            challenge_buf.extend_from_slice(rr.compress().as_bytes());
            c_sum += c;
        }

        let expected = Scalar::from_bytes_mod_order(hash_bytes(&challenge_buf).0);
        expected == c_sum
    }
}

//---------------------------------------------------------------------------------------------------- Generate
/// The key image of a one-time key: `x·Hp(x·G)`.
pub fn generate_key_image(secret: &Scalar) -> KeyImage {
    let pubkey = PublicKey((ED25519_BASEPOINT_TABLE * secret).compress().0);
    KeyImage((secret * hash_to_point(&pubkey)).compress().0)
}

/// Produce a ring signature for `secret` hiding at `secret_index`
/// within `ring`.
///
/// Wallet-side counterpart of [`RingVerifier`]; the node only needs it
/// for tests and tooling.
///
/// # Panics
/// Panics if `secret_index` is out of range or the ring members don't
/// decompress; callers construct the ring and own those invariants.
pub fn generate_ring_signature(
    prefix_hash: &Hash,
    key_image: &KeyImage,
    ring: &[PublicKey],
    secret: &Scalar,
    secret_index: usize,
) -> Vec<Signature> {
    assert!(secret_index < ring.len());

    let image = decompress(&key_image.0).expect("key image must be a valid point");

    let mut signatures = vec![
        Signature {
            c: [0; 32],
            r: [0; 32]
        };
        ring.len()
    ];
    let mut challenge_buf: Vec<u8> = prefix_hash.0.to_vec();
    let mut c_sum = Scalar::ZERO;
    let mut nonce = Scalar::ZERO;

    for (index, member) in ring.iter().enumerate() {
        let pubkey = decompress(&member.0).expect("ring member must be a valid point");
        let h = hash_to_point(member);

        if index == secret_index {
            nonce = Scalar::random(&mut OsRng);
            let l = ED25519_BASEPOINT_TABLE * &nonce;
            let r = nonce * h;
            challenge_buf.extend_from_slice(l.compress().as_bytes());
            challenge_buf.extend_from_slice(r.compress().as_bytes());
        } else {
            let c = Scalar::random(&mut OsRng);
            let r = Scalar::random(&mut OsRng);
            let l = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &pubkey, &r);
            let rr = r * h + c * image;
            challenge_buf.extend_from_slice(l.compress().as_bytes());
            challenge_buf.extend_from_slice(rr.compress().as_bytes());

            signatures[index] = Signature {
                c: c.to_bytes(),
                r: r.to_bytes(),
            };
            c_sum += c;
        }
    }

    let challenge = Scalar::from_bytes_mod_order(hash_bytes(&challenge_buf).0);
    let c_secret = challenge - c_sum;
    let r_secret = nonce - c_secret * secret;

    signatures[secret_index] = Signature {
        c: c_secret.to_bytes(),
        r: r_secret.to_bytes(),
    };
    signatures
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(seed: u8) -> (Scalar, PublicKey) {
        let secret = Scalar::from_bytes_mod_order([seed; 32]);
        let public = PublicKey((ED25519_BASEPOINT_TABLE * &secret).compress().0);
        (secret, public)
    }

    fn ring_of(seeds: &[u8]) -> Vec<PublicKey> {
        seeds.iter().map(|&s| keypair(s).1).collect()
    }

    #[test]
    fn signature_round_trip() {
        let prefix = Hash([0xaa; 32]);
        let (secret, public) = keypair(3);
        let mut ring = ring_of(&[1, 2]);
        ring.insert(1, public);

        let image = generate_key_image(&secret);
        let sigs = generate_ring_signature(&prefix, &image, &ring, &secret, 1);

        assert!(RingVerifier.check_ring_signature(&prefix, &image, &ring, &sigs));
    }

    #[test]
    fn wrong_prefix_hash_fails() {
        let prefix = Hash([0xaa; 32]);
        let (secret, public) = keypair(3);
        let ring = vec![public];
        let image = generate_key_image(&secret);
        let sigs = generate_ring_signature(&prefix, &image, &ring, &secret, 0);

        assert!(!RingVerifier.check_ring_signature(&Hash([0xbb; 32]), &image, &ring, &sigs));
    }

    #[test]
    fn wrong_key_image_fails() {
        let prefix = Hash([0xaa; 32]);
        let (secret, public) = keypair(3);
        let ring = vec![public];
        let image = generate_key_image(&secret);
        let sigs = generate_ring_signature(&prefix, &image, &ring, &secret, 0);

        let other_image = generate_key_image(&keypair(4).0);
        assert!(!RingVerifier.check_ring_signature(&prefix, &other_image, &ring, &sigs));
    }

    #[test]
    fn tampered_signature_fails() {
        let prefix = Hash([0xaa; 32]);
        let (secret, public) = keypair(3);
        let ring = vec![public];
        let image = generate_key_image(&secret);
        let mut sigs = generate_ring_signature(&prefix, &image, &ring, &secret, 0);
        sigs[0].r[0] ^= 1;

        assert!(!RingVerifier.check_ring_signature(&prefix, &image, &ring, &sigs));
    }

    #[test]
    fn key_image_is_deterministic() {
        let (secret, _) = keypair(3);
        assert_eq!(generate_key_image(&secret), generate_key_image(&secret));
    }
}
