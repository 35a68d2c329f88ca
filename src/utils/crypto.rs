use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{BlockchainError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Width of one P-256 scalar or coordinate in bytes
const P256_FIELD_LEN: usize = 32;
/// SEC1 tag for an uncompressed curve point
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// Seconds since the Unix epoch
pub fn current_timestamp() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    i64::try_from(secs).map_err(|_| BlockchainError::Crypto("Timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| BlockchainError::InvalidAddress(format!("Invalid base58 encoding: {e}")))
}

pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

/// Raw `x || y` public key of a PKCS#8 P-256 key pair, without the SEC1 point tag.
pub fn raw_public_key(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let point = key_pair.public_key().as_ref();
    match point.split_first() {
        Some((&UNCOMPRESSED_POINT_TAG, xy)) => Ok(xy.to_vec()),
        _ => Err(BlockchainError::Crypto(
            "Unexpected public key encoding".to_string(),
        )),
    }
}

/// Signs `message` and returns `r || s`, each a 32-byte big-endian integer.
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

/// Verifies an `r || s` signature against a raw `x || y` public key.
///
/// Both byte strings are split into equal halves; each half is a big-endian integer and may be
/// shorter than 32 bytes.
pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let Some((x, y)) = split_halves(public_key) else {
        return false;
    };
    let Some((r, s)) = split_halves(signature) else {
        return false;
    };

    let mut point = Vec::with_capacity(1 + 2 * P256_FIELD_LEN);
    point.push(UNCOMPRESSED_POINT_TAG);
    point.extend(x);
    point.extend(y);

    let mut fixed_signature = Vec::with_capacity(2 * P256_FIELD_LEN);
    fixed_signature.extend(r);
    fixed_signature.extend(s);

    let peer_public_key = ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, point);
    peer_public_key.verify(message, &fixed_signature).is_ok()
}

fn split_halves(bytes: &[u8]) -> Option<([u8; P256_FIELD_LEN], [u8; P256_FIELD_LEN])> {
    if bytes.is_empty() || bytes.len() % 2 != 0 || bytes.len() > 2 * P256_FIELD_LEN {
        return None;
    }
    let (left, right) = bytes.split_at(bytes.len() / 2);
    Some((left_pad(left), left_pad(right)))
}

fn left_pad(bytes: &[u8]) -> [u8; P256_FIELD_LEN] {
    let mut padded = [0u8; P256_FIELD_LEN];
    padded[P256_FIELD_LEN - bytes.len()..].copy_from_slice(bytes);
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let pkcs8 = new_key_pair().unwrap();
        let public_key = raw_public_key(&pkcs8).unwrap();
        assert_eq!(public_key.len(), 64);

        let message = sha256_digest(b"spend output 0");
        let signature = ecdsa_p256_sha256_sign_digest(&pkcs8, &message).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(ecdsa_p256_sha256_sign_verify(&public_key, &signature, &message));
    }

    #[test]
    fn test_verify_rejects_other_message_and_key() {
        let pkcs8 = new_key_pair().unwrap();
        let other = raw_public_key(&new_key_pair().unwrap()).unwrap();
        let public_key = raw_public_key(&pkcs8).unwrap();
        let signature = ecdsa_p256_sha256_sign_digest(&pkcs8, b"message").unwrap();

        assert!(!ecdsa_p256_sha256_sign_verify(&public_key, &signature, b"other"));
        assert!(!ecdsa_p256_sha256_sign_verify(&other, &signature, b"message"));
    }

    #[test]
    fn test_split_halves_left_pads_short_integers() {
        let (r, s) = split_halves(&[0x01, 0x02]).unwrap();
        let mut expected_r = [0u8; 32];
        expected_r[31] = 0x01;
        let mut expected_s = [0u8; 32];
        expected_s[31] = 0x02;
        assert_eq!(r, expected_r);
        assert_eq!(s, expected_s);

        assert!(split_halves(&[0x01, 0x02, 0x03]).is_none());
        assert!(split_halves(&[0u8; 66]).is_none());
    }

    #[test]
    fn test_verify_rejects_malformed_lengths() {
        let pkcs8 = new_key_pair().unwrap();
        let public_key = raw_public_key(&pkcs8).unwrap();
        let signature = ecdsa_p256_sha256_sign_digest(&pkcs8, b"message").unwrap();

        assert!(!ecdsa_p256_sha256_sign_verify(&public_key, &signature[..63], b"message"));
        assert!(!ecdsa_p256_sha256_sign_verify(&public_key, &[], b"message"));
        assert!(!ecdsa_p256_sha256_sign_verify(&public_key[..63], &signature, b"message"));
    }

    #[test]
    fn test_base58_round_trip_and_rejection() {
        let data = vec![0u8, 1, 2, 250];
        let encoded = base58_encode(&data);
        assert_eq!(base58_decode(&encoded).unwrap(), data);
        assert!(matches!(
            base58_decode("0OIl"),
            Err(BlockchainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_digest_lengths() {
        assert_eq!(sha256_digest(b"abc").len(), 32);
        assert_eq!(ripemd160_digest(b"abc").len(), 20);
    }
}
