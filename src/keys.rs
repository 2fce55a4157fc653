//! Single-key signing and signature verification.
//!
//! Curve and field arithmetic are consumed from `secp256k1`; this module
//! only adapts its surface to the wire formats the rest of the crate uses:
//! DER signatures with a trailing sighash byte, SEC-encoded points, and
//! base58check P2PKH addresses.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::codec::encode_base58check;
use crate::constants::{ADDR_PREFIX_MAINNET, ADDR_PREFIX_TESTNET};
use crate::error::{Result, SpvError};
use crate::hashing::hash160;
use crate::types::Hash;

/// A secp256k1 secret key with its derived public point.
pub struct PrivateKey {
    secret: SecretKey,
    public: PublicKey,
}

impl PrivateKey {
    /// Build a key from a 32-byte big-endian secret scalar.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| SpvError::Signature(format!("invalid secret key: {e}")))?;
        let public = PublicKey::from_secret_key(&secp, &secret);
        Ok(Self { secret, public })
    }

    /// Build a key from a small scalar. Test and example convenience.
    pub fn from_u64(value: u64) -> Result<Self> {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self::from_bytes(&bytes)
    }

    /// Sign a 32-byte digest. The returned DER signature is always low-S;
    /// nonces are deterministic (RFC 6979), so signing is reproducible.
    pub fn sign(&self, z: &Hash) -> Result<Vec<u8>> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(z)
            .map_err(|e| SpvError::Signature(format!("invalid digest: {e}")))?;
        let signature = secp.sign_ecdsa(&message, &self.secret);
        Ok(signature.serialize_der().to_vec())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Compressed SEC encoding: 0x02/0x03 prefix plus the x coordinate.
    pub fn sec_compressed(&self) -> [u8; 33] {
        self.public.serialize()
    }

    /// Uncompressed SEC encoding: 0x04 prefix plus both coordinates.
    pub fn sec_uncompressed(&self) -> [u8; 65] {
        self.public.serialize_uncompressed()
    }

    /// P2PKH address for the compressed public key.
    pub fn address(&self, testnet: bool) -> String {
        pubkey_to_address(&self.sec_compressed(), testnet)
    }
}

/// Derive the base58check P2PKH address for a SEC-encoded public key.
pub fn pubkey_to_address(sec: &[u8], testnet: bool) -> String {
    let prefix = if testnet {
        ADDR_PREFIX_TESTNET
    } else {
        ADDR_PREFIX_MAINNET
    };
    let h160 = hash160(sec);
    let mut payload = Vec::with_capacity(21);
    payload.push(prefix);
    payload.extend_from_slice(&h160);
    encode_base58check(&payload)
}

/// Verify a DER signature over digest `z` against a SEC-encoded public key.
///
/// High-S signatures are rejected: the underlying verifier only accepts the
/// canonical low-S form, which is also the only form `PrivateKey::sign`
/// produces.
pub fn verify_signature(sec_pubkey: &[u8], der: &[u8], z: &Hash) -> bool {
    let secp = Secp256k1::new();
    let pubkey = match PublicKey::from_slice(sec_pubkey) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let signature = match Signature::from_der(der) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    // reject non-canonical S rather than normalizing it away
    let mut normalized = signature;
    normalized.normalize_s();
    if normalized.serialize_compact() != signature.serialize_compact() {
        return false;
    }
    let message = match Message::from_digest_slice(z) {
        Ok(m) => m,
        Err(_) => return false,
    };
    secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash256;

    #[test]
    fn test_sign_and_verify() {
        let key = PrivateKey::from_u64(12345).unwrap();
        let z = hash256(b"Programming Bitcoin!");
        let der = key.sign(&z).unwrap();
        assert!(verify_signature(&key.sec_compressed(), &der, &z));
    }

    #[test]
    fn test_signature_is_low_s_and_der_round_trips() {
        let key = PrivateKey::from_u64(12345).unwrap();
        let z = hash256(b"Programming Bitcoin!");
        let der = key.sign(&z).unwrap();

        let parsed = Signature::from_der(&der).unwrap();
        let mut normalized = parsed;
        normalized.normalize_s();
        assert_eq!(
            normalized.serialize_compact(),
            parsed.serialize_compact(),
            "produced signature must already be low-S"
        );
        assert_eq!(parsed.serialize_der().to_vec(), der);
    }

    #[test]
    fn test_verify_rejects_wrong_message() {
        let key = PrivateKey::from_u64(98765).unwrap();
        let z = hash256(b"message one");
        let der = key.sign(&z).unwrap();
        let other = hash256(b"message two");
        assert!(!verify_signature(&key.sec_compressed(), &der, &other));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let z = hash256(b"anything");
        assert!(!verify_signature(&[0u8; 33], &[0u8; 70], &z));
        let key = PrivateKey::from_u64(7).unwrap();
        assert!(!verify_signature(&key.sec_compressed(), b"not der", &z));
    }

    #[test]
    fn test_zero_secret_rejected() {
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_sec_encodings() {
        let key = PrivateKey::from_u64(1).unwrap();
        let compressed = key.sec_compressed();
        let uncompressed = key.sec_uncompressed();
        assert!(compressed[0] == 0x02 || compressed[0] == 0x03);
        assert_eq!(uncompressed[0], 0x04);
        // same x coordinate in both encodings
        assert_eq!(&compressed[1..33], &uncompressed[1..33]);
        // generator x coordinate
        assert_eq!(
            hex::encode(&compressed[1..33]),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn test_address_versions_differ() {
        let key = PrivateKey::from_u64(2020).unwrap();
        let mainnet = key.address(false);
        let testnet = key.address(true);
        assert!(mainnet.starts_with('1'));
        assert!(mainnet != testnet);
        assert!(testnet.starts_with('m') || testnet.starts_with('n'));
    }
}
