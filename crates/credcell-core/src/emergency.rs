//! Emergency risk states, stress indicators, and the policy vector.
//!
//! The Emergency Engine publishes a [`PolicyVector`] per risk state; the
//! other engines read it to tighten behavior under stress. Policy knobs are
//! scalars so consumers stay decoupled from the risk machine itself.

use serde::{Deserialize, Serialize};

use crate::types::{CellId, MemberId, ProposalId, TimestampMs};

// ── RiskState ────────────────────────────────────────────────────────────────

/// The three-state risk chain: NORMAL — STRESSED — PANIC.
/// Automatic transitions move one step; governance overrides may skip.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskState {
    Normal,
    Stressed,
    Panic,
}

impl RiskState {
    fn level(&self) -> u8 {
        match self {
            RiskState::Normal => 0,
            RiskState::Stressed => 1,
            RiskState::Panic => 2,
        }
    }

    /// Whether `self → target` is a single step on the chain.
    pub fn is_adjacent(&self, target: RiskState) -> bool {
        self.level().abs_diff(target.level()) == 1
    }

    pub fn is_escalation(&self, target: RiskState) -> bool {
        target.level() > self.level()
    }
}

// ── Policy vector ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdmissionMode {
    Standard,
    /// New members need a sponsor and enter at a reduced limit.
    Bonded,
    /// Additionally requires a passed supermajority proposal.
    SupermajorityBonded,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommitmentMode {
    Normal,
    /// Soft commitments refused; everything must be escrowed.
    EscrowAll,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulerPolicy {
    Balanced,
    /// Skip the General category.
    EssentialsFirst,
    /// Match only the survival tier.
    Survival,
}

/// The scalar knobs consumed by the other engines.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyVector {
    pub limit_factor: f64,
    pub new_member_limit_factor: f64,
    /// Scales the federation beta. 0 freezes federation entirely.
    pub federation_beta_factor: f64,
    pub admission_mode: AdmissionMode,
    pub commitment_mode: CommitmentMode,
    pub scheduler_priority: SchedulerPolicy,
    pub debtor_priority_matching: bool,
}

impl PolicyVector {
    pub fn for_state(state: RiskState) -> Self {
        match state {
            RiskState::Normal => Self {
                limit_factor: 1.0,
                new_member_limit_factor: 1.0,
                federation_beta_factor: 1.0,
                admission_mode: AdmissionMode::Standard,
                commitment_mode: CommitmentMode::Normal,
                scheduler_priority: SchedulerPolicy::Balanced,
                debtor_priority_matching: false,
            },
            RiskState::Stressed => Self {
                limit_factor: 0.75,
                new_member_limit_factor: 0.5,
                federation_beta_factor: 0.5,
                admission_mode: AdmissionMode::Bonded,
                commitment_mode: CommitmentMode::EscrowAll,
                scheduler_priority: SchedulerPolicy::EssentialsFirst,
                debtor_priority_matching: true,
            },
            RiskState::Panic => Self {
                limit_factor: 0.5,
                new_member_limit_factor: 0.25,
                federation_beta_factor: 0.0,
                admission_mode: AdmissionMode::SupermajorityBonded,
                commitment_mode: CommitmentMode::EscrowAll,
                scheduler_priority: SchedulerPolicy::Survival,
                debtor_priority_matching: true,
            },
        }
    }

    pub fn federation_frozen(&self) -> bool {
        self.federation_beta_factor == 0.0
    }
}

impl Default for PolicyVector {
    fn default() -> Self {
        Self::for_state(RiskState::Normal)
    }
}

// ── EmergencyView ────────────────────────────────────────────────────────────

/// Read-only capability over the Emergency Engine, held by the engines that
/// consume policy. Injected after construction so the engines stay free of a
/// hard dependency on the risk machine; before injection, consumers fall back
/// to the NORMAL policy.
pub trait EmergencyView: Send + Sync {
    fn current_policy(&self) -> PolicyVector;

    fn is_federation_frozen(&self) -> bool {
        self.current_policy().federation_frozen()
    }
}

// ── Indicators ───────────────────────────────────────────────────────────────

/// Snapshot of the stress indicators, cached with its computation time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StressIndicators {
    /// Σ limits of floor-proximate members ÷ aggregate capacity.
    pub floor_mass: f64,
    /// Coefficient of variation of balances. 0 when the mean is 0 — in that
    /// case `variance_conclusive` is false and the value is inconclusive,
    /// not a health signal.
    pub balance_variance: f64,
    pub variance_conclusive: bool,
    /// Active disputes ÷ member count. Clamped to [0, 1] where consumed.
    pub dispute_rate: f64,
    /// Externally supplied (0 when no energy module reports).
    pub energy_stress: f64,
    pub economic_stress: f64,
    pub overall_stress: f64,
    pub computed_at: TimestampMs,
}

// ── Engine state and history ─────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmergencyState {
    pub cell_id: CellId,
    pub risk_state: RiskState,
    pub indicators: Option<StressIndicators>,
    pub last_transition_at: Option<TimestampMs>,
    /// Set while in PANIC; start of the stabilization dwell.
    pub panic_entered_at: Option<TimestampMs>,
    pub updated_at: TimestampMs,
}

impl EmergencyState {
    pub fn new(cell_id: CellId, now: TimestampMs) -> Self {
        Self {
            cell_id,
            risk_state: RiskState::Normal,
            indicators: None,
            last_transition_at: None,
            panic_entered_at: None,
            updated_at: now,
        }
    }
}

/// Who authorized a transition, and under what terms.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum TransitionAuthority {
    /// Triggered by indicator evaluation; single-step only.
    Automatic,
    /// Council-approved; may skip levels, may force past the PANIC dwell.
    Governance {
        approval: ProposalId,
        initiator: MemberId,
        forced: bool,
    },
}

/// One entry in the per-cell transition history log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: RiskState,
    pub to: RiskState,
    pub reason: String,
    pub authority: TransitionAuthority,
    pub indicators: Option<StressIndicators>,
    pub occurred_at: TimestampMs,
}

/// Distances from the current indicator levels to the nearest state change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThresholdProximity {
    pub current: RiskState,
    /// Smallest remaining margin (in indicator units) before escalation.
    /// None in PANIC.
    pub escalation_distance: Option<f64>,
    /// How far indicators must fall before de-escalation. None in NORMAL.
    pub deescalation_distance: Option<f64>,
    /// The indicator closest to triggering the next escalation.
    pub critical_indicator: Option<String>,
    /// Remaining PANIC stabilization dwell, if any.
    pub panic_dwell_remaining_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacency_on_the_chain() {
        assert!(RiskState::Normal.is_adjacent(RiskState::Stressed));
        assert!(RiskState::Panic.is_adjacent(RiskState::Stressed));
        assert!(!RiskState::Normal.is_adjacent(RiskState::Panic));
        assert!(!RiskState::Stressed.is_adjacent(RiskState::Stressed));
    }

    #[test]
    fn panic_policy_freezes_federation() {
        assert!(PolicyVector::for_state(RiskState::Panic).federation_frozen());
        assert!(!PolicyVector::for_state(RiskState::Stressed).federation_frozen());
    }
}
