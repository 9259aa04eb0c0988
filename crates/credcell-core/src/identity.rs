//! Key-bound identity records.

use serde::{Deserialize, Serialize};

use crate::types::{CellId, MemberId, PublicKey, TimestampMs};

/// Binds a member id to the public key that authorizes its transactions.
/// The id is derived from the key (base58 of BLAKE3), so the binding is
/// self-certifying.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Identity {
    pub member_id: MemberId,
    pub public_key: PublicKey,
    pub cell_id: CellId,
    pub created_at: TimestampMs,
}
