//! Tunable per-cell parameters, grouped by consuming engine.

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::types::Credits;

// ── Ledger parameters ────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CellParameters {
    /// Debt allowance granted to new members.
    pub default_limit: Credits,
    pub min_limit: Credits,
    pub max_limit: Credits,
    /// Whether the escrow-safety invariant (I3) is validated on writes.
    pub enforce_escrow_safety: bool,
    /// Soft ceiling on cell membership; exceeding it logs a warning.
    pub max_members: usize,
}

impl Default for CellParameters {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            min_limit: MIN_LIMIT,
            max_limit: MAX_LIMIT,
            enforce_escrow_safety: ENFORCE_ESCROW_SAFETY,
            max_members: MAX_MEMBERS,
        }
    }
}

/// A single governance-approved parameter change, dispatched exhaustively.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ParameterUpdate {
    DefaultLimit(Credits),
    MinLimit(Credits),
    MaxLimit(Credits),
    EnforceEscrowSafety(bool),
}

// ── Federation parameters ────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FederationParameters {
    /// Base fraction of aggregate capacity exposable to peers. The effective
    /// beta is this value scaled by the emergency policy's federation factor.
    pub base_beta_factor: f64,
    pub min_exposure_cap: Credits,
    pub max_exposure_cap: Credits,
    pub warning_utilization: f64,
    pub critical_utilization: f64,
    pub link_proposal_expiry_ms: i64,
}

impl Default for FederationParameters {
    fn default() -> Self {
        Self {
            base_beta_factor: BASE_BETA_FACTOR,
            min_exposure_cap: MIN_EXPOSURE_CAP,
            max_exposure_cap: MAX_EXPOSURE_CAP,
            warning_utilization: EXPOSURE_WARNING_UTILIZATION,
            critical_utilization: EXPOSURE_CRITICAL_UTILIZATION,
            link_proposal_expiry_ms: LINK_PROPOSAL_EXPIRY_MS,
        }
    }
}

// ── Governance parameters ────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GovernanceParameters {
    pub voting_duration_ms: i64,
    pub quorum: f64,
    pub supermajority: f64,
}

impl Default for GovernanceParameters {
    fn default() -> Self {
        Self {
            voting_duration_ms: VOTING_DURATION_MS,
            quorum: COUNCIL_QUORUM,
            supermajority: COUNCIL_SUPERMAJORITY,
        }
    }
}

// ── Emergency thresholds ─────────────────────────────────────────────────────

/// Escalation / de-escalation trigger levels for the risk state machine.
/// De-escalation levels sit below escalation levels (hysteresis band).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmergencyThresholds {
    pub stressed_floor_mass: f64,
    pub panic_floor_mass: f64,
    pub stressed_dispute_rate: f64,
    pub panic_energy_stress: f64,
    pub normal_floor_mass: f64,
    pub normal_overall_stress: f64,
    /// Minimum dwell in PANIC before automatic de-escalation.
    pub panic_stabilization_ms: i64,
}

impl Default for EmergencyThresholds {
    fn default() -> Self {
        Self {
            stressed_floor_mass: STRESSED_FLOOR_MASS,
            panic_floor_mass: PANIC_FLOOR_MASS,
            stressed_dispute_rate: STRESSED_DISPUTE_RATE,
            panic_energy_stress: PANIC_ENERGY_STRESS,
            normal_floor_mass: NORMAL_FLOOR_MASS,
            normal_overall_stress: NORMAL_OVERALL_STRESS,
            panic_stabilization_ms: PANIC_STABILIZATION_MS,
        }
    }
}
