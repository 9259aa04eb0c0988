use serde::{Deserialize, Serialize};
use std::fmt;

/// Credit units. Signed: one unit ≈ one labor-hour of median local work.
/// i64 gives ample headroom for cell-scale balances (limits cap at 10,000).
pub type Credits = i64;

/// Milliseconds since Unix epoch, UTC.
pub type TimestampMs = i64;

// ── MemberId ─────────────────────────────────────────────────────────────────

/// Member identifier within a cell. Key-bound identities carry a derived id
/// (base58 of BLAKE3(public key)); synthetic members (e.g. the federation
/// clearing account) carry a fixed string id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The synthetic member holding a cell's net external position.
    pub fn clearing_account(cell: &CellId) -> Self {
        Self(format!("clearing-{}", cell.as_str()))
    }

    /// Whether this id names a clearing account rather than a person.
    /// Clearing accounts are skipped by the stress indicators and by
    /// capacity bases that should only count human members.
    pub fn is_clearing(&self) -> bool {
        self.0.starts_with("clearing-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemberId({})", self.0)
    }
}

// ── CellId ───────────────────────────────────────────────────────────────────

/// Identifier of a cell (the local zero-sum ledger community).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({})", self.0)
    }
}

// ── 32-byte record ids ───────────────────────────────────────────────────────

/// Declares a 32-byte BLAKE3-derived identifier newtype with hex rendering.
macro_rules! id32 {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn from_bytes(b: [u8; 32]) -> Self {
                Self(b)
            }

            /// Derive an id as BLAKE3 of `bytes`.
            pub fn digest(bytes: &[u8]) -> Self {
                Self(*blake3::hash(bytes).as_bytes())
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                if bytes.len() != 32 {
                    return Err(hex::FromHexError::InvalidStringLength);
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "({}…)"), &self.to_hex()[..16])
            }
        }
    };
}

id32!(
    /// Spot transaction identifier: BLAKE3 of the canonical signing payload.
    TxId,
    "TxId"
);
id32!(
    /// Commitment identifier.
    CommitmentId,
    "CommitmentId"
);
id32!(
    /// Governance proposal identifier.
    ProposalId,
    "ProposalId"
);
id32!(
    /// Dispute identifier.
    DisputeId,
    "DisputeId"
);
id32!(
    /// Task slot identifier.
    SlotId,
    "SlotId"
);
id32!(
    /// Task template identifier.
    TemplateId,
    "TemplateId"
);
id32!(
    /// Event identifier: BLAKE3(cell id ‖ big-endian sequence number).
    EventId,
    "EventId"
);
id32!(
    /// Federation transfer identifier.
    FederationTxId,
    "FederationTxId"
);

// ── Keys and signatures ──────────────────────────────────────────────────────

/// Public key bytes, scheme-defined by the active crypto provider
/// (Dilithium2 in production, mirrored bytes in the test double).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub Vec<u8>);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}b)", self.0.len())
    }
}

/// Detached signature bytes, scheme-defined by the active crypto provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}b)", self.0.len())
    }
}
