use credcell_core::types::{MemberId, PublicKey};
use serde::{Deserialize, Serialize};

use crate::hash::member_id_from_pubkey;

/// A keypair with its derived member id.
///
/// The secret key bytes are wiped on drop. The key scheme is whatever the
/// generating [`crate::CryptoProvider`] uses; the pair is only meaningful
/// together with that provider.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub member_id: MemberId,
    pub public_key: PublicKey,
    secret_key: Vec<u8>,
}

impl KeyPair {
    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        let public_key = PublicKey(pk_bytes);
        Self {
            member_id: member_id_from_pubkey(&public_key),
            public_key,
            secret_key: sk_bytes,
        }
    }

    /// Read-only view of the secret key bytes, for passing to a provider's
    /// sign operation.
    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ member_id: {:?} }}", self.member_id)
    }
}
