//! The crypto façade: key generation, detached sign/verify, nonces.
//!
//! The engines depend only on this trait, so the signature scheme is an
//! adapter decision. Signatures must be deterministic enough that the
//! JSON-encoded canonical signing payload round-trips: sign(bytes) verifies
//! against exactly those bytes and the signer's public key.

use std::sync::atomic::{AtomicU64, Ordering};

use credcell_core::error::CellError;
use credcell_core::types::{PublicKey, Signature};

use crate::hash::blake3_hash;
use crate::keypair::KeyPair;

pub trait CryptoProvider: Send + Sync {
    fn generate_keypair(&self) -> KeyPair;

    fn sign(&self, message: &[u8], secret_key: &[u8]) -> Result<Signature, CellError>;

    fn verify(&self, message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool;

    /// Fresh uniqueness nonce for transaction payloads.
    fn generate_nonce(&self) -> [u8; 16];
}

// ── Test double ──────────────────────────────────────────────────────────────

/// Deterministic, non-networked test double.
///
/// Keys are mirrored (public == secret bytes) and a signature is
/// BLAKE3(key ‖ message), which satisfies the sign/verify algebra without any
/// cryptographic strength. Never use outside tests and local tooling.
pub struct StubCrypto {
    keys_issued: AtomicU64,
    nonces_issued: AtomicU64,
}

impl StubCrypto {
    pub fn new() -> Self {
        Self {
            keys_issued: AtomicU64::new(0),
            nonces_issued: AtomicU64::new(0),
        }
    }
}

impl Default for StubCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for StubCrypto {
    fn generate_keypair(&self) -> KeyPair {
        let n = self.keys_issued.fetch_add(1, Ordering::Relaxed);
        let mut seed = b"stub-key".to_vec();
        seed.extend_from_slice(&n.to_be_bytes());
        let key = blake3_hash(&seed).to_vec();
        KeyPair::from_raw(key.clone(), key)
    }

    fn sign(&self, message: &[u8], secret_key: &[u8]) -> Result<Signature, CellError> {
        let mut input = secret_key.to_vec();
        input.extend_from_slice(message);
        Ok(Signature(blake3_hash(&input).to_vec()))
    }

    fn verify(&self, message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
        // Mirrored keys: recompute with the public bytes.
        let mut input = public_key.0.clone();
        input.extend_from_slice(message);
        signature.0 == blake3_hash(&input)
    }

    fn generate_nonce(&self) -> [u8; 16] {
        let n = self.nonces_issued.fetch_add(1, Ordering::Relaxed);
        let mut nonce = [0u8; 16];
        nonce[8..].copy_from_slice(&n.to_be_bytes());
        nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_satisfies_sign_verify_algebra() {
        let crypto = StubCrypto::new();
        let kp = crypto.generate_keypair();
        let sig = crypto.sign(b"msg", kp.secret_key_bytes()).unwrap();
        assert!(crypto.verify(b"msg", &sig, &kp.public_key));
        assert!(!crypto.verify(b"other", &sig, &kp.public_key));

        let other = crypto.generate_keypair();
        assert!(!crypto.verify(b"msg", &sig, &other.public_key));
    }

    #[test]
    fn stub_signing_is_deterministic() {
        let crypto = StubCrypto::new();
        let kp = crypto.generate_keypair();
        let a = crypto.sign(b"msg", kp.secret_key_bytes()).unwrap();
        let b = crypto.sign(b"msg", kp.secret_key_bytes()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn stub_nonces_are_unique() {
        let crypto = StubCrypto::new();
        assert_ne!(crypto.generate_nonce(), crypto.generate_nonce());
    }
}
