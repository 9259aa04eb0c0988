//! Commitments: future obligations between two members.
//!
//! A soft commitment is a recorded promise backed by trust alone. An escrowed
//! commitment additionally holds `value` in the promisee's reserve from the
//! moment it becomes active until fulfillment or cancellation, so the payer's
//! capacity to settle is guaranteed.

use serde::{Deserialize, Serialize};

use crate::scheduler::TaskCategory;
use crate::types::{CommitmentId, Credits, MemberId, TimestampMs};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommitmentKind {
    Soft,
    Escrowed,
}

/// Lifecycle: Proposed → Active → Fulfilled | Cancelled | Disputed.
/// Fulfilled, Cancelled and Disputed are terminal; a disputed commitment's
/// reserve stays held until governance resolves the dispute.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommitmentStatus {
    Proposed,
    Active,
    Fulfilled,
    Cancelled,
    Disputed,
}

impl CommitmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommitmentStatus::Fulfilled | CommitmentStatus::Cancelled | CommitmentStatus::Disputed
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commitment {
    pub id: CommitmentId,
    pub kind: CommitmentKind,
    /// The service provider: credited on fulfillment.
    pub promisor: MemberId,
    /// The beneficiary: pays on settlement; carries the escrow reserve.
    pub promisee: MemberId,
    /// Strictly positive.
    pub value: Credits,
    pub category: TaskCategory,
    pub due_at: Option<TimestampMs>,
    pub status: CommitmentStatus,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
    /// Set when the commitment reaches a terminal status.
    pub resolved_at: Option<TimestampMs>,
}

impl Commitment {
    pub fn is_party(&self, member: &MemberId) -> bool {
        self.promisor == *member || self.promisee == *member
    }

    /// Whether this commitment currently holds reserve on the promisee.
    pub fn holds_reserve(&self) -> bool {
        self.kind == CommitmentKind::Escrowed
            && matches!(
                self.status,
                CommitmentStatus::Active | CommitmentStatus::Disputed
            )
    }

    pub fn is_overdue(&self, now: TimestampMs) -> bool {
        self.status == CommitmentStatus::Active
            && self.due_at.map(|due| now > due).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitment(status: CommitmentStatus, due_at: Option<TimestampMs>) -> Commitment {
        Commitment {
            id: CommitmentId::digest(b"c"),
            kind: CommitmentKind::Escrowed,
            promisor: MemberId::new("alice"),
            promisee: MemberId::new("bob"),
            value: 30,
            category: TaskCategory::General,
            due_at,
            status,
            created_at: 0,
            updated_at: 0,
            resolved_at: None,
        }
    }

    #[test]
    fn disputed_escrow_still_holds_reserve() {
        assert!(commitment(CommitmentStatus::Disputed, None).holds_reserve());
        assert!(!commitment(CommitmentStatus::Cancelled, None).holds_reserve());
    }

    #[test]
    fn overdue_requires_active_and_past_due() {
        assert!(commitment(CommitmentStatus::Active, Some(10)).is_overdue(11));
        assert!(!commitment(CommitmentStatus::Active, Some(10)).is_overdue(10));
        assert!(!commitment(CommitmentStatus::Fulfilled, Some(10)).is_overdue(11));
        assert!(!commitment(CommitmentStatus::Active, None).is_overdue(11));
    }
}
