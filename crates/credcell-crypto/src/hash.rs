use credcell_core::types::{MemberId, PublicKey};

/// Compute BLAKE3 hash of arbitrary bytes → 32-byte array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Derive a member identity id from a public key: base58(BLAKE3(key)).
pub fn member_id_from_pubkey(public_key: &PublicKey) -> MemberId {
    MemberId::new(bs58::encode(blake3_hash(&public_key.0)).into_string())
}
