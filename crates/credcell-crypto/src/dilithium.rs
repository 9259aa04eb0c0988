//! Production signature adapter: Dilithium2 detached signatures.

use credcell_core::error::CellError;
use credcell_core::types::{PublicKey, Signature};
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey as _, SecretKey as _};

use crate::keypair::KeyPair;
use crate::provider::CryptoProvider;

/// Dilithium2 adapter behind the [`CryptoProvider`] façade.
pub struct DilithiumProvider;

impl CryptoProvider for DilithiumProvider {
    fn generate_keypair(&self) -> KeyPair {
        let (pk, sk) = dilithium2::keypair();
        KeyPair::from_raw(pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
    }

    fn sign(&self, message: &[u8], secret_key: &[u8]) -> Result<Signature, CellError> {
        let sk = dilithium2::SecretKey::from_bytes(secret_key)
            .map_err(|_| CellError::Crypto("invalid Dilithium2 secret key".into()))?;
        let sig = dilithium2::detached_sign(message, &sk);
        Ok(Signature(sig.as_bytes().to_vec()))
    }

    fn verify(&self, message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
        let Ok(pk) = dilithium2::PublicKey::from_bytes(&public_key.0) else {
            return false;
        };
        let Ok(sig) = dilithium2::DetachedSignature::from_bytes(&signature.0) else {
            return false;
        };
        dilithium2::verify_detached_signature(&sig, message, &pk).is_ok()
    }

    fn generate_nonce(&self) -> [u8; 16] {
        rand::random()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let provider = DilithiumProvider;
        let kp = provider.generate_keypair();
        let message = b"credit is a promise a neighbour can audit";

        let sig = provider.sign(message, kp.secret_key_bytes()).unwrap();
        assert!(provider.verify(message, &sig, &kp.public_key));
    }

    #[test]
    fn tampered_message_fails() {
        let provider = DilithiumProvider;
        let kp = provider.generate_keypair();
        let sig = provider.sign(b"original", kp.secret_key_bytes()).unwrap();
        assert!(!provider.verify(b"tampered", &sig, &kp.public_key));
    }

    #[test]
    fn wrong_key_fails() {
        let provider = DilithiumProvider;
        let kp = provider.generate_keypair();
        let other = provider.generate_keypair();
        let sig = provider.sign(b"msg", kp.secret_key_bytes()).unwrap();
        assert!(!provider.verify(b"msg", &sig, &other.public_key));
    }
}
