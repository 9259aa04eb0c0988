//! Append-only observable events.
//!
//! Every committed mutation in the cell emits exactly one event. Events are
//! totally ordered by `seq` within a cell and deduplicated by `event_id` at
//! the storage layer, so replays of an at-least-once append are harmless.

use serde::{Deserialize, Serialize};

use crate::commitment::CommitmentKind;
use crate::emergency::RiskState;
use crate::federation::QuarantineReason;
use crate::governance::{DisputeOutcome, ProposalStatus, VoteChoice};
use crate::member::MemberStatus;
use crate::scheduler::TaskCategory;
use crate::types::{
    CellId, CommitmentId, Credits, DisputeId, EventId, FederationTxId, MemberId, ProposalId,
    SlotId, TimestampMs,
};

/// One applied delta inside a `BalanceUpdates` event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BalanceDelta {
    pub member_id: MemberId,
    pub delta: Credits,
    pub resulting_balance: Credits,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum EventKind {
    // ── Ledger ───────────────────────────────────────────────────────────────
    MemberAdded {
        member_id: MemberId,
        limit: Credits,
        status: MemberStatus,
    },
    MemberRemoved {
        member_id: MemberId,
    },
    BalanceUpdates {
        updates: Vec<BalanceDelta>,
    },
    ReserveUpdate {
        member_id: MemberId,
        delta: Credits,
        resulting_reserve: Credits,
        commitment_id: Option<CommitmentId>,
    },
    LimitUpdated {
        member_id: MemberId,
        old_limit: Credits,
        new_limit: Credits,
    },
    StatusUpdated {
        member_id: MemberId,
        old_status: MemberStatus,
        new_status: MemberStatus,
    },

    // ── Commitments ──────────────────────────────────────────────────────────
    CommitmentCreated {
        commitment_id: CommitmentId,
        kind: CommitmentKind,
        promisor: MemberId,
        promisee: MemberId,
        value: Credits,
        category: TaskCategory,
    },
    CommitmentFulfilled {
        commitment_id: CommitmentId,
        value: Credits,
    },
    CommitmentCancelled {
        commitment_id: CommitmentId,
    },
    CommitmentDisputed {
        commitment_id: CommitmentId,
        raised_by: MemberId,
    },

    // ── Governance ───────────────────────────────────────────────────────────
    ProposalCreated {
        proposal_id: ProposalId,
        proposer: MemberId,
    },
    VoteCast {
        proposal_id: ProposalId,
        voter: MemberId,
        choice: VoteChoice,
    },
    VotingClosed {
        proposal_id: ProposalId,
        result: ProposalStatus,
        approvals: usize,
        votes: usize,
    },
    ProposalExecuted {
        proposal_id: ProposalId,
    },
    DisputeFiled {
        dispute_id: DisputeId,
        complainant: MemberId,
        respondent: MemberId,
    },
    DisputeReviewerAssigned {
        dispute_id: DisputeId,
        reviewer: MemberId,
    },
    DisputeResolved {
        dispute_id: DisputeId,
        outcome: DisputeOutcome,
    },

    // ── Emergency ────────────────────────────────────────────────────────────
    EmergencyStateChange {
        from: RiskState,
        to: RiskState,
        reason: String,
    },
    ForcedDeescalation {
        from: RiskState,
        to: RiskState,
        approval: ProposalId,
    },

    // ── Federation ───────────────────────────────────────────────────────────
    LinkProposed {
        peer_cell: CellId,
    },
    LinkAccepted {
        peer_cell: CellId,
    },
    LinkSuspended {
        peer_cell: CellId,
        reason: String,
    },
    LinkResumed {
        peer_cell: CellId,
    },
    FederationTxCompleted {
        federation_tx_id: FederationTxId,
        peer_cell: CellId,
        amount: Credits,
    },
    FederationTxRolledBack {
        federation_tx_id: FederationTxId,
        peer_cell: CellId,
        amount: Credits,
        reason: String,
    },
    FederationQuarantined {
        reason: QuarantineReason,
    },
    FederationQuarantineExit,
    ExposureCapUpdated {
        old_cap: Credits,
        new_cap: Credits,
    },

    // ── Scheduler ────────────────────────────────────────────────────────────
    MemberAssignedToSlot {
        slot_id: SlotId,
        member_id: MemberId,
        hours: f64,
    },
    MemberUnassignedFromSlot {
        slot_id: SlotId,
        member_id: MemberId,
    },
    TaskCompleted {
        slot_id: SlotId,
        category: TaskCategory,
        completed_members: Vec<MemberId>,
    },
    MemberNoShow {
        slot_id: SlotId,
        member_id: MemberId,
    },
}

impl EventKind {
    /// Stable event type name as exposed to observers.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::MemberAdded { .. } => "MEMBER_ADDED",
            EventKind::MemberRemoved { .. } => "MEMBER_REMOVED",
            EventKind::BalanceUpdates { .. } => "BALANCE_UPDATES",
            EventKind::ReserveUpdate { .. } => "RESERVE_UPDATE",
            EventKind::LimitUpdated { .. } => "LIMIT_UPDATED",
            EventKind::StatusUpdated { .. } => "STATUS_UPDATED",
            EventKind::CommitmentCreated { .. } => "COMMITMENT_CREATED",
            EventKind::CommitmentFulfilled { .. } => "COMMITMENT_FULFILLED",
            EventKind::CommitmentCancelled { .. } => "COMMITMENT_CANCELLED",
            EventKind::CommitmentDisputed { .. } => "COMMITMENT_DISPUTED",
            EventKind::ProposalCreated { .. } => "PROPOSAL_CREATED",
            EventKind::VoteCast { .. } => "VOTE_CAST",
            EventKind::VotingClosed { .. } => "VOTING_CLOSED",
            EventKind::ProposalExecuted { .. } => "PROPOSAL_EXECUTED",
            EventKind::DisputeFiled { .. } => "DISPUTE_FILED",
            EventKind::DisputeReviewerAssigned { .. } => "DISPUTE_REVIEWER_ASSIGNED",
            EventKind::DisputeResolved { .. } => "DISPUTE_RESOLVED",
            EventKind::EmergencyStateChange { .. } => "EMERGENCY_STATE_CHANGE",
            EventKind::ForcedDeescalation { .. } => "FORCED_DEESCALATION",
            EventKind::LinkProposed { .. } => "LINK_PROPOSED",
            EventKind::LinkAccepted { .. } => "LINK_ACCEPTED",
            EventKind::LinkSuspended { .. } => "LINK_SUSPENDED",
            EventKind::LinkResumed { .. } => "LINK_RESUMED",
            EventKind::FederationTxCompleted { .. } => "FEDERATION_TX_COMPLETED",
            EventKind::FederationTxRolledBack { .. } => "FEDERATION_TX_ROLLED_BACK",
            EventKind::FederationQuarantined { .. } => "FEDERATION_QUARANTINED",
            EventKind::FederationQuarantineExit => "FEDERATION_QUARANTINE_EXIT",
            EventKind::ExposureCapUpdated { .. } => "EXPOSURE_CAP_UPDATED",
            EventKind::MemberAssignedToSlot { .. } => "MEMBER_ASSIGNED_TO_SLOT",
            EventKind::MemberUnassignedFromSlot { .. } => "MEMBER_UNASSIGNED_FROM_SLOT",
            EventKind::TaskCompleted { .. } => "TASK_COMPLETED",
            EventKind::MemberNoShow { .. } => "MEMBER_NO_SHOW",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub cell_id: CellId,
    pub seq: u64,
    pub timestamp: TimestampMs,
    pub kind: EventKind,
}

impl Event {
    /// Build an event with an id derived from cell id and sequence number,
    /// so re-appending the same (cell, seq) is idempotent under dedup.
    pub fn new(cell_id: CellId, seq: u64, timestamp: TimestampMs, kind: EventKind) -> Self {
        let mut bytes = cell_id.as_str().as_bytes().to_vec();
        bytes.extend_from_slice(&seq.to_be_bytes());
        Self {
            event_id: EventId::digest(&bytes),
            cell_id,
            seq,
            timestamp,
            kind,
        }
    }
}
