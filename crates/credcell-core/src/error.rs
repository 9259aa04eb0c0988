//! The cell-wide error taxonomy.
//!
//! Errors are classified by kind, never by origin language type. Each variant
//! carries its context inline and maps to a stable machine code through
//! [`CellError::code`]; higher layers compose by code while the typed variant
//! keeps the context intact. Validation errors never mutate state.

use thiserror::Error;

use crate::commitment::CommitmentStatus;
use crate::emergency::RiskState;
use crate::federation::{LinkStatus, QuarantineReason};
use crate::member::MemberStatus;
use crate::transaction::TransactionStatus;
use crate::types::{
    CellId, CommitmentId, Credits, DisputeId, FederationTxId, MemberId, ProposalId, SlotId,
    TemplateId, TxId,
};

#[derive(Debug, Error)]
pub enum CellError {
    // ── Ledger invariants ────────────────────────────────────────────────────
    #[error("update set does not conserve: deltas sum to {sum}")]
    ConservationViolation { sum: i128 },

    #[error("floor violation for {member}: balance would be {attempted}, floor is {floor}")]
    FloorViolation {
        member: MemberId,
        attempted: Credits,
        floor: Credits,
    },

    #[error("escrow violation for {member}: balance {attempted} would undercut reserve {reserve}")]
    EscrowViolation {
        member: MemberId,
        attempted: Credits,
        reserve: Credits,
    },

    #[error("reserve for {member} would become negative ({attempted})")]
    NegativeReserve {
        member: MemberId,
        attempted: Credits,
    },

    // ── Members ──────────────────────────────────────────────────────────────
    #[error("member not found: {0}")]
    MemberNotFound(MemberId),

    #[error("member {member} is {status:?} and may not transact")]
    MemberNotActive {
        member: MemberId,
        status: MemberStatus,
    },

    #[error("member already exists: {0}")]
    DuplicateMember(MemberId),

    #[error("member {member} still carries balance {balance} / reserve {reserve}")]
    MemberHasObligations {
        member: MemberId,
        balance: Credits,
        reserve: Credits,
    },

    #[error("limit {limit} outside permitted range [{min}, {max}]")]
    LimitOutOfRange {
        limit: Credits,
        min: Credits,
        max: Credits,
    },

    #[error("limit {new_limit} for {member} would retro-breach the floor (balance {balance})")]
    LimitBelowDebt {
        member: MemberId,
        new_limit: Credits,
        balance: Credits,
    },

    #[error("status transition {from:?} → {to:?} not permitted for {member}")]
    InvalidStatusTransition {
        member: MemberId,
        from: MemberStatus,
        to: MemberStatus,
    },

    // ── Transactions ─────────────────────────────────────────────────────────
    #[error("amount must be a positive integer, got {0}")]
    InvalidAmount(Credits),

    #[error("payer and payee must differ")]
    SelfTransaction,

    #[error("insufficient capacity for {member}: requested {requested}, available {available}")]
    InsufficientCapacity {
        member: MemberId,
        requested: Credits,
        available: Credits,
    },

    #[error("payer signature does not verify against the payer's key")]
    InvalidPayerSignature,

    #[error("payee signature does not verify against the payee's key")]
    InvalidPayeeSignature,

    #[error("transaction {tx} is {status:?}; operation requires {required:?}")]
    InvalidTransactionState {
        tx: TxId,
        status: TransactionStatus,
        required: TransactionStatus,
    },

    #[error("transaction not found: {0}")]
    TransactionNotFound(TxId),

    // ── Commitments ──────────────────────────────────────────────────────────
    #[error("commitment not found: {0}")]
    CommitmentNotFound(CommitmentId),

    #[error("commitment {commitment} is {status:?}; operation not permitted")]
    InvalidCommitmentState {
        commitment: CommitmentId,
        status: CommitmentStatus,
    },

    #[error("{member} is not a party to commitment {commitment}")]
    NotCommitmentParty {
        commitment: CommitmentId,
        member: MemberId,
    },

    #[error("only the promisee may confirm fulfillment of {commitment}")]
    NotPromisee { commitment: CommitmentId },

    #[error("due date must be in the future")]
    DueDateInPast,

    #[error("soft commitments are refused while the cell requires full escrow")]
    EscrowRequired,

    // ── Governance ───────────────────────────────────────────────────────────
    #[error("proposal not found: {0}")]
    ProposalNotFound(ProposalId),

    #[error("proposal {0} has not passed")]
    ProposalNotPassed(ProposalId),

    #[error("voting on proposal {0} is closed")]
    VotingClosed(ProposalId),

    #[error("{member} already voted on proposal {proposal}")]
    AlreadyVoted {
        proposal: ProposalId,
        member: MemberId,
    },

    #[error("{0} is not a council member")]
    NotCouncilMember(MemberId),

    #[error("dispute not found: {0}")]
    DisputeNotFound(DisputeId),

    #[error("{member} may not act on dispute {dispute}")]
    DisputeUnauthorized {
        dispute: DisputeId,
        member: MemberId,
    },

    #[error("reviewer of dispute {dispute} must not be a party")]
    ReviewerIsParty { dispute: DisputeId },

    #[error("dispute {0} is not in a state that permits this operation")]
    InvalidDisputeState(DisputeId),

    #[error("governance approval required for this admission mode")]
    ApprovalRequired,

    #[error("a sponsoring member is required for bonded admission")]
    SponsorRequired,

    // ── Emergency ────────────────────────────────────────────────────────────
    #[error("cell is already in risk state {0:?}")]
    SameRiskState(RiskState),

    #[error("automatic transition {from:?} → {to:?} must be single-step")]
    NonAdjacentTransition { from: RiskState, to: RiskState },

    #[error("PANIC stabilization period active ({remaining_ms} ms remaining)")]
    StabilizationPeriodActive { remaining_ms: i64 },

    #[error("indicators still above de-escalation thresholds")]
    DeescalationBlocked,

    // ── Federation ───────────────────────────────────────────────────────────
    #[error("no federation link to cell {0}")]
    LinkNotFound(CellId),

    #[error("link to {peer} is {status:?}, not active")]
    LinkNotActive { peer: CellId, status: LinkStatus },

    #[error("a link to {0} already exists")]
    LinkAlreadyExists(CellId),

    #[error("link proposal from/to {0} has expired")]
    LinkProposalExpired(CellId),

    #[error("transfer of {amount} would breach exposure cap {cap} (position {position})")]
    CapExceeded {
        position: Credits,
        amount: Credits,
        cap: Credits,
    },

    #[error("cell is quarantined ({reason:?})")]
    CellQuarantined { reason: QuarantineReason },

    #[error("federation is frozen by emergency policy")]
    FederationFrozen,

    #[error("federation transaction not found: {0}")]
    FederationTxNotFound(FederationTxId),

    #[error("federation transaction {0} does not permit this operation in its current state")]
    InvalidFederationTxState(FederationTxId),

    #[error("quarantine exit refused: {reason:?} condition still holds")]
    QuarantineConditionHolds { reason: QuarantineReason },

    // ── Scheduler ────────────────────────────────────────────────────────────
    #[error("slot not found: {0}")]
    SlotNotFound(SlotId),

    #[error("task template not found: {0}")]
    TemplateNotFound(TemplateId),

    #[error("slot {slot} is full ({max} assignees)")]
    SlotFull { slot: SlotId, max: usize },

    #[error("slot time range is invalid")]
    InvalidTimeRange,

    #[error("{member} is not assigned to slot {slot}")]
    NotAssigned { slot: SlotId, member: MemberId },

    #[error("{member} is already assigned to slot {slot}")]
    AlreadyAssigned { slot: SlotId, member: MemberId },

    // ── Identity ─────────────────────────────────────────────────────────────
    #[error("identity not found: {0}")]
    IdentityNotFound(MemberId),

    #[error("an identity for this public key already exists: {0}")]
    IdentityExists(MemberId),

    // ── Infrastructure ───────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl CellError {
    /// Stable machine-readable code. Callers compose across subsystems by
    /// matching on these, never on display strings.
    pub fn code(&self) -> &'static str {
        match self {
            CellError::ConservationViolation { .. } => "CONSERVATION_VIOLATION",
            CellError::FloorViolation { .. } => "FLOOR_VIOLATION",
            CellError::EscrowViolation { .. } => "ESCROW_VIOLATION",
            CellError::NegativeReserve { .. } => "NEGATIVE_RESERVE",
            CellError::MemberNotFound(_) => "MEMBER_NOT_FOUND",
            CellError::MemberNotActive { .. } => "MEMBER_NOT_ACTIVE",
            CellError::DuplicateMember(_) => "DUPLICATE_MEMBER",
            CellError::MemberHasObligations { .. } => "MEMBER_HAS_OBLIGATIONS",
            CellError::LimitOutOfRange { .. } => "LIMIT_OUT_OF_RANGE",
            CellError::LimitBelowDebt { .. } => "LIMIT_BELOW_DEBT",
            CellError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            CellError::InvalidAmount(_) => "INVALID_AMOUNT",
            CellError::SelfTransaction => "SELF_TRANSACTION",
            CellError::InsufficientCapacity { .. } => "INSUFFICIENT_CAPACITY",
            CellError::InvalidPayerSignature => "INVALID_PAYER_SIGNATURE",
            CellError::InvalidPayeeSignature => "INVALID_PAYEE_SIGNATURE",
            CellError::InvalidTransactionState { .. } => "INVALID_TRANSACTION_STATE",
            CellError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            CellError::CommitmentNotFound(_) => "COMMITMENT_NOT_FOUND",
            CellError::InvalidCommitmentState { .. } => "INVALID_COMMITMENT_STATE",
            CellError::NotCommitmentParty { .. } => "NOT_COMMITMENT_PARTY",
            CellError::NotPromisee { .. } => "NOT_PROMISEE",
            CellError::DueDateInPast => "DUE_DATE_IN_PAST",
            CellError::EscrowRequired => "ESCROW_REQUIRED",
            CellError::ProposalNotFound(_) => "PROPOSAL_NOT_FOUND",
            CellError::ProposalNotPassed(_) => "PROPOSAL_NOT_PASSED",
            CellError::VotingClosed(_) => "VOTING_CLOSED",
            CellError::AlreadyVoted { .. } => "ALREADY_VOTED",
            CellError::NotCouncilMember(_) => "NOT_COUNCIL_MEMBER",
            CellError::DisputeNotFound(_) => "DISPUTE_NOT_FOUND",
            CellError::DisputeUnauthorized { .. } => "DISPUTE_UNAUTHORIZED",
            CellError::ReviewerIsParty { .. } => "REVIEWER_IS_PARTY",
            CellError::InvalidDisputeState(_) => "INVALID_DISPUTE_STATE",
            CellError::ApprovalRequired => "APPROVAL_REQUIRED",
            CellError::SponsorRequired => "SPONSOR_REQUIRED",
            CellError::SameRiskState(_) => "SAME_RISK_STATE",
            CellError::NonAdjacentTransition { .. } => "NON_ADJACENT_TRANSITION",
            CellError::StabilizationPeriodActive { .. } => "STABILIZATION_PERIOD_ACTIVE",
            CellError::DeescalationBlocked => "DEESCALATION_BLOCKED",
            CellError::LinkNotFound(_) => "LINK_NOT_FOUND",
            CellError::LinkNotActive { .. } => "LINK_NOT_ACTIVE",
            CellError::LinkAlreadyExists(_) => "LINK_ALREADY_EXISTS",
            CellError::LinkProposalExpired(_) => "LINK_PROPOSAL_EXPIRED",
            CellError::CapExceeded { .. } => "CAP_EXCEEDED",
            CellError::CellQuarantined { .. } => "CELL_QUARANTINED",
            CellError::FederationFrozen => "FEDERATION_FROZEN",
            CellError::FederationTxNotFound(_) => "FEDERATION_TX_NOT_FOUND",
            CellError::InvalidFederationTxState(_) => "INVALID_FEDERATION_TX_STATE",
            CellError::QuarantineConditionHolds { .. } => "QUARANTINE_CONDITION_HOLDS",
            CellError::SlotNotFound(_) => "SLOT_NOT_FOUND",
            CellError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            CellError::SlotFull { .. } => "SLOT_FULL",
            CellError::InvalidTimeRange => "INVALID_TIME_RANGE",
            CellError::NotAssigned { .. } => "NOT_ASSIGNED",
            CellError::AlreadyAssigned { .. } => "ALREADY_ASSIGNED",
            CellError::IdentityNotFound(_) => "IDENTITY_NOT_FOUND",
            CellError::IdentityExists(_) => "IDENTITY_EXISTS",
            CellError::Storage(_) => "STORAGE_ERROR",
            CellError::Serialization(_) => "SERIALIZATION_ERROR",
            CellError::Crypto(_) => "CRYPTO_ERROR",
        }
    }

    /// Whether this is a deterministic validation refusal (re-running the
    /// same request against unchanged state fails identically), as opposed
    /// to an infrastructure fault.
    pub fn is_deterministic(&self) -> bool {
        !matches!(
            self,
            CellError::Storage(_) | CellError::Serialization(_) | CellError::Crypto(_)
        )
    }
}
