//! Federation data model: bilateral links, inter-cell transfers, quarantine.

use serde::{Deserialize, Serialize};

use crate::types::{CellId, Credits, FederationTxId, MemberId, TimestampMs};

// ── Links ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LinkStatus {
    /// Proposed; lapses if not accepted within the proposal window.
    Pending,
    Active,
    Suspended,
}

/// One bilateral trade link to a remote cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FederationLink {
    pub peer_cell: CellId,
    pub status: LinkStatus,
    /// Signed net of transfers over this link (outgoing − incoming).
    pub bilateral_position: Credits,
    /// Free-form agreed terms recorded at proposal time.
    pub terms: String,
    pub proposed_at: TimestampMs,
    /// Proposal lapse time; cleared once the link is accepted.
    pub expires_at: Option<TimestampMs>,
    pub last_activity: Option<TimestampMs>,
    pub suspend_reason: Option<String>,
}

// ── Transfers ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FederationDirection {
    Outgoing,
    Incoming,
}

/// Lifecycle: Initiated → SourceConfirmed → Completed, with Failed on ledger
/// refusal and RolledBack as the compensated terminal state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum FederationTxStatus {
    Initiated,
    /// The local clearing leg committed; awaiting peer confirmation.
    SourceConfirmed,
    Completed,
    Failed,
    RolledBack { reason: String },
}

/// One inter-cell transfer as recorded by the local cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FederationTransaction {
    pub id: FederationTxId,
    pub peer_cell: CellId,
    pub direction: FederationDirection,
    /// The local member paying (outgoing) or being paid (incoming).
    pub local_member: MemberId,
    /// Opaque identifier of the counterparty in the remote cell.
    pub remote_member: String,
    pub amount: Credits,
    pub status: FederationTxStatus,
    pub created_at: TimestampMs,
    pub confirmed_at: Option<TimestampMs>,
    pub rolled_back_at: Option<TimestampMs>,
    pub failure_code: Option<String>,
}

impl FederationTransaction {
    /// Whether money moved on the local ledger and can still be compensated:
    /// the clearing leg committed but the peer has not confirmed.
    pub fn is_rollbackable(&self) -> bool {
        matches!(self.status, FederationTxStatus::SourceConfirmed)
    }
}

// ── Cell-level federation state ──────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum QuarantineReason {
    /// `|federation position| > exposure cap` (e.g. after a cap reduction).
    CapViolation,
    /// The emergency policy froze federation (beta factor 0).
    PanicMode,
    ManualSuspension,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum FederationStatus {
    Active,
    Quarantined {
        reason: QuarantineReason,
        since: TimestampMs,
    },
}

/// The cell's aggregate external position and its hard bound.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FederationState {
    pub cell_id: CellId,
    /// Equal to the clearing account's balance by construction.
    pub federation_position: Credits,
    pub exposure_cap: Credits,
    /// Effective beta: base beta × emergency federation factor.
    pub beta_factor: f64,
    pub status: FederationStatus,
    pub updated_at: TimestampMs,
}

impl FederationState {
    pub fn new(cell_id: CellId, now: TimestampMs) -> Self {
        Self {
            cell_id,
            federation_position: 0,
            exposure_cap: 0,
            beta_factor: 0.0,
            status: FederationStatus::Active,
            updated_at: now,
        }
    }

    pub fn is_quarantined(&self) -> bool {
        matches!(self.status, FederationStatus::Quarantined { .. })
    }
}

/// Point-in-time exposure report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExposureAnalysis {
    pub federation_position: Credits,
    pub exposure_cap: Credits,
    /// Remaining headroom: `cap − |position|` (0 when over cap).
    pub available: Credits,
    /// `|position| / cap`; 1.0 when the cap is 0 and any position exists.
    pub utilization: f64,
    pub warning: bool,
    pub critical: bool,
}
