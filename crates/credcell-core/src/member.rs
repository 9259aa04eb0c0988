//! Member state and the balance/reserve update inputs to the Ledger Engine.
//!
//! The Ledger Engine exclusively owns [`MemberState`]; every other component
//! composes balanced [`BalanceUpdate`] sets and submits them for atomic
//! application. Nothing outside the ledger mutates balances or reserves.

use serde::{Deserialize, Serialize};

use crate::types::{CommitmentId, Credits, MemberId, TimestampMs};

// ── MemberStatus ─────────────────────────────────────────────────────────────

/// Membership lifecycle state.
///
/// Permitted transitions:
///   Pending   → Active | Excluded
///   Active    → Probation | Frozen | Excluded
///   Probation → Active | Frozen | Excluded
///   Frozen    → Active | Probation | Excluded
///   Excluded  → (terminal)
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberStatus {
    /// Identity created, admission not yet decided.
    Pending,
    /// Full member in good standing.
    Active,
    /// Restricted member under council watch; may still settle balances.
    Probation,
    /// Transacting suspended entirely.
    Frozen,
    /// Removed from the cell. Requires zero balance and zero reserve.
    Excluded,
}

impl MemberStatus {
    /// Whether a member in this status may be party to balance updates.
    pub fn can_transact(&self) -> bool {
        matches!(self, MemberStatus::Active | MemberStatus::Probation)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MemberStatus::Excluded)
    }

    /// Whether `self → next` is a permitted lifecycle transition.
    pub fn can_transition_to(&self, next: MemberStatus) -> bool {
        use MemberStatus::*;
        match (self, next) {
            (Pending, Active) | (Pending, Excluded) => true,
            (Active, Probation) | (Active, Frozen) | (Active, Excluded) => true,
            (Probation, Active) | (Probation, Frozen) | (Probation, Excluded) => true,
            (Frozen, Active) | (Frozen, Probation) | (Frozen, Excluded) => true,
            _ => false,
        }
    }
}

// ── MemberState ──────────────────────────────────────────────────────────────

/// Full per-member ledger state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemberState {
    pub member_id: MemberId,
    /// Signed net position. Zero at creation.
    pub balance: Credits,
    /// Debt allowance: `balance ≥ −limit` at all times.
    pub limit: Credits,
    /// Escrowed portion of capacity held against active escrowed commitments.
    pub reserve: Credits,
    pub status: MemberStatus,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl MemberState {
    /// Create a member with zero balance and zero reserve.
    pub fn new(member_id: MemberId, limit: Credits, status: MemberStatus, now: TimestampMs) -> Self {
        Self {
            member_id,
            balance: 0,
            limit,
            reserve: 0,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// `limit + balance − reserve`: what the member may still spend.
    pub fn available_capacity(&self) -> Credits {
        self.limit + self.balance - self.reserve
    }
}

// ── Update inputs ────────────────────────────────────────────────────────────

/// One signed delta within a balanced update set submitted to the ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BalanceUpdate {
    pub member_id: MemberId,
    pub delta: Credits,
    /// Short machine-readable reason, e.g. "spot-payment".
    pub reason: String,
    /// Optional reference to the originating record (tx id, commitment id, …).
    pub reference: Option<String>,
}

impl BalanceUpdate {
    pub fn new(member_id: MemberId, delta: Credits, reason: impl Into<String>) -> Self {
        Self {
            member_id,
            delta,
            reason: reason.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// A reserve increment (escrow hold) or decrement (release).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReserveUpdate {
    pub member_id: MemberId,
    pub delta: Credits,
    pub reason: String,
    pub commitment_id: Option<CommitmentId>,
}

impl ReserveUpdate {
    pub fn new(member_id: MemberId, delta: Credits, reason: impl Into<String>) -> Self {
        Self {
            member_id,
            delta,
            reason: reason.into(),
            commitment_id: None,
        }
    }

    pub fn for_commitment(mut self, id: CommitmentId) -> Self {
        self.commitment_id = Some(id);
        self
    }
}
