//! Governance data model: council, proposals with tagged actions, disputes.

use serde::{Deserialize, Serialize};

use crate::emergency::RiskState;
use crate::params::ParameterUpdate;
use crate::types::{CommitmentId, Credits, DisputeId, MemberId, ProposalId, TimestampMs};

// ── Council ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CouncilRole {
    Chair,
    Member,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CouncilMember {
    pub member_id: MemberId,
    pub role: CouncilRole,
    pub appointed_at: TimestampMs,
    /// End of the current term; None for open-ended seats.
    pub term_ends_at: Option<TimestampMs>,
}

// ── Proposals ────────────────────────────────────────────────────────────────

/// How consequential a proposal is; determines its approval threshold.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionCategory {
    Routine,
    Significant,
    Critical,
    Constitutional,
}

impl ActionCategory {
    /// Approval rate (of votes cast) required to pass.
    pub fn threshold(&self) -> f64 {
        match self {
            ActionCategory::Routine => 0.5,
            ActionCategory::Significant => 0.6,
            ActionCategory::Critical => 2.0 / 3.0,
            ActionCategory::Constitutional => 0.75,
        }
    }
}

/// The authoritative operation a passed proposal executes. One variant per
/// proposal type; execution dispatches exhaustively.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ProposalAction {
    Admission {
        candidate: MemberId,
    },
    Exclusion {
        member: MemberId,
    },
    LimitAdjustment {
        member: MemberId,
        new_limit: Credits,
    },
    CommitmentCancellation {
        commitment: CommitmentId,
    },
    EmergencyStateChange {
        target: RiskState,
        forced: bool,
    },
    ParameterChange {
        update: ParameterUpdate,
    },
    DisputeResolution {
        dispute: DisputeId,
        outcome: DisputeOutcome,
        actions: Vec<ResolutionAction>,
    },
}

impl ProposalAction {
    pub fn category(&self) -> ActionCategory {
        match self {
            ProposalAction::Admission { .. } => ActionCategory::Routine,
            ProposalAction::LimitAdjustment { .. } => ActionCategory::Routine,
            ProposalAction::CommitmentCancellation { .. } => ActionCategory::Significant,
            ProposalAction::DisputeResolution { .. } => ActionCategory::Significant,
            ProposalAction::Exclusion { .. } => ActionCategory::Critical,
            ProposalAction::EmergencyStateChange { .. } => ActionCategory::Critical,
            ProposalAction::ParameterChange { .. } => ActionCategory::Constitutional,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProposalStatus {
    Open,
    Passed,
    Rejected,
    Executed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum VoteChoice {
    Approve,
    Reject,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vote {
    pub voter: MemberId,
    pub choice: VoteChoice,
    pub cast_at: TimestampMs,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub proposer: MemberId,
    pub action: ProposalAction,
    pub description: String,
    pub status: ProposalStatus,
    pub opened_at: TimestampMs,
    pub closes_at: TimestampMs,
    pub votes: Vec<Vote>,
    pub closed_at: Option<TimestampMs>,
    pub executed_at: Option<TimestampMs>,
}

impl Proposal {
    pub fn has_voted(&self, member: &MemberId) -> bool {
        self.votes.iter().any(|v| v.voter == *member)
    }

    pub fn approvals(&self) -> usize {
        self.votes
            .iter()
            .filter(|v| v.choice == VoteChoice::Approve)
            .count()
    }
}

// ── Disputes ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DisputeStatus {
    Filed,
    UnderReview,
    Resolved,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DisputeOutcome {
    InFavorOfComplainant,
    InFavorOfRespondent,
    Compromise,
}

/// Remedies the reviewer may order alongside an outcome.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ResolutionAction {
    CancelCommitment(CommitmentId),
    /// Settle a disputed escrowed commitment as if fulfilled.
    SettleCommitment(CommitmentId),
    /// Compensation ordered as a regular dual-signature transaction.
    Compensation {
        from: MemberId,
        to: MemberId,
        amount: Credits,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Evidence {
    pub submitted_by: MemberId,
    pub submitted_at: TimestampMs,
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub complainant: MemberId,
    pub respondent: MemberId,
    /// The commitment under dispute, if the dispute concerns one.
    pub commitment: Option<CommitmentId>,
    pub reason: String,
    pub status: DisputeStatus,
    pub reviewer: Option<MemberId>,
    pub evidence: Vec<Evidence>,
    pub outcome: Option<DisputeOutcome>,
    pub filed_at: TimestampMs,
    pub resolved_at: Option<TimestampMs>,
}

impl Dispute {
    pub fn is_party(&self, member: &MemberId) -> bool {
        self.complainant == *member || self.respondent == *member
    }

    pub fn may_submit_evidence(&self, member: &MemberId) -> bool {
        self.is_party(member) || self.reviewer.as_ref() == Some(member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_thresholds_are_monotonic() {
        assert!(ActionCategory::Routine.threshold() < ActionCategory::Significant.threshold());
        assert!(ActionCategory::Significant.threshold() < ActionCategory::Critical.threshold());
        assert!(ActionCategory::Critical.threshold() < ActionCategory::Constitutional.threshold());
    }

    #[test]
    fn exclusion_is_critical() {
        let action = ProposalAction::Exclusion {
            member: MemberId::new("mallory"),
        };
        assert_eq!(action.category(), ActionCategory::Critical);
    }
}
