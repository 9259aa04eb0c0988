pub mod dilithium;
pub mod hash;
pub mod keypair;
pub mod provider;

pub use dilithium::DilithiumProvider;
pub use hash::{blake3_hash, member_id_from_pubkey};
pub use keypair::KeyPair;
pub use provider::{CryptoProvider, StubCrypto};
