//! Spot transaction records and the canonical signing payload.

use serde::{Deserialize, Serialize};

use crate::types::{Credits, MemberId, Signature, TimestampMs, TxId};

// ── Status ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Created and validated against the ledger snapshot at creation time.
    Pending,
    /// Both signatures attached; eligible for execution.
    Ready,
    Executed,
    Failed,
}

// ── SpotTransaction ──────────────────────────────────────────────────────────

/// A dual-signature spot payment between two members of one cell.
///
/// The transaction id is BLAKE3 of the canonical signing payload, so the id
/// commits to exactly the bytes both parties sign.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpotTransaction {
    pub tx_id: TxId,
    pub payer: MemberId,
    pub payee: MemberId,
    /// Strictly positive.
    pub amount: Credits,
    pub description: String,
    /// Hex-encoded uniqueness nonce from the crypto provider.
    pub nonce: String,
    pub created_at: TimestampMs,
    pub status: TransactionStatus,
    pub payer_signature: Option<Signature>,
    pub payee_signature: Option<Signature>,
    pub executed_at: Option<TimestampMs>,
    /// Ledger error code recorded when execution fails.
    pub failure_code: Option<String>,
}

/// The order-stable object both parties sign, JSON-encoded. Field order is
/// fixed by this struct definition; any change is a wire-format break.
#[derive(Serialize)]
pub struct SigningPayload<'a> {
    pub payer: &'a MemberId,
    pub payee: &'a MemberId,
    pub amount: Credits,
    pub description: &'a str,
    pub created_at: TimestampMs,
    pub nonce: &'a str,
}

impl SpotTransaction {
    pub fn signing_payload(&self) -> SigningPayload<'_> {
        SigningPayload {
            payer: &self.payer,
            payee: &self.payee,
            amount: self.amount,
            description: &self.description,
            created_at: self.created_at,
            nonce: &self.nonce,
        }
    }

    /// Canonical bytes covered by both signatures and hashed into `tx_id`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.signing_payload()).expect("signing payload serializes")
    }

    pub fn is_fully_signed(&self) -> bool {
        self.payer_signature.is_some() && self.payee_signature.is_some()
    }
}

// ── Offline queue ────────────────────────────────────────────────────────────

/// A fully signed transaction waiting in the persisted FIFO queue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueuedTransaction {
    pub tx_id: TxId,
    pub enqueued_at: TimestampMs,
    pub attempts: u32,
    pub last_error: Option<String>,
}
