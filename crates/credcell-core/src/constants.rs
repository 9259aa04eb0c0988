//! ─── CredCell Protocol Constants ────────────────────────────────────────────
//!
//! "Credit is a promise a neighbour can audit."
//!
//! Unit: 1 credit ≈ one labor-hour of median local work.
//! All defaults are per-cell and tunable through governance parameter change.

use crate::types::Credits;

// ── Cell sizing ──────────────────────────────────────────────────────────────

/// Target community size band. Below the floor mutual knowledge is wasted;
/// above the ceiling mutual knowledge breaks down.
pub const CELL_TARGET_MIN_MEMBERS: usize = 60;
pub const CELL_TARGET_MAX_MEMBERS: usize = 100;

/// Hard upper bound on members per cell.
pub const MAX_MEMBERS: usize = 150;

// ── Limits ───────────────────────────────────────────────────────────────────

/// Default debt allowance for a new member (≈ one week of essentials).
pub const DEFAULT_LIMIT: Credits = 100;

pub const MIN_LIMIT: Credits = 0;
pub const MAX_LIMIT: Credits = 10_000;

/// Escrow-safety invariant (I3) enforcement default.
pub const ENFORCE_ESCROW_SAFETY: bool = true;

// ── Federation ───────────────────────────────────────────────────────────────

/// Base fraction of aggregate capacity a cell may expose to peers.
pub const BASE_BETA_FACTOR: f64 = 0.10;

pub const MIN_EXPOSURE_CAP: Credits = 0;
pub const MAX_EXPOSURE_CAP: Credits = 100_000;

/// Exposure utilization flags.
pub const EXPOSURE_WARNING_UTILIZATION: f64 = 0.75;
pub const EXPOSURE_CRITICAL_UTILIZATION: f64 = 0.90;

/// Link proposals lapse after 7 days.
pub const LINK_PROPOSAL_EXPIRY_MS: i64 = 7 * 24 * 3_600_000;

// ── Governance ───────────────────────────────────────────────────────────────

/// Default voting window: 72 hours.
pub const VOTING_DURATION_MS: i64 = 72 * 3_600_000;

/// Fraction of council members that must vote for a valid decision.
pub const COUNCIL_QUORUM: f64 = 0.5;

/// Supermajority approval rate (Critical actions): exactly two thirds, so a
/// 2-of-3 council clears it.
pub const COUNCIL_SUPERMAJORITY: f64 = 2.0 / 3.0;

// ── Emergency thresholds ─────────────────────────────────────────────────────

/// Escalation: floor mass that moves NORMAL → STRESSED.
pub const STRESSED_FLOOR_MASS: f64 = 0.25;

/// Escalation: floor mass that moves STRESSED → PANIC.
pub const PANIC_FLOOR_MASS: f64 = 0.40;

/// Escalation: dispute rate that moves NORMAL → STRESSED.
pub const STRESSED_DISPUTE_RATE: f64 = 0.15;

/// Escalation: energy stress that moves STRESSED → PANIC.
pub const PANIC_ENERGY_STRESS: f64 = 0.80;

/// De-escalation (hysteresis): both must hold for STRESSED → NORMAL.
pub const NORMAL_FLOOR_MASS: f64 = 0.15;
pub const NORMAL_OVERALL_STRESS: f64 = 0.20;

/// Dwell time before PANIC may de-escalate: 24 hours.
pub const PANIC_STABILIZATION_MS: i64 = 24 * 3_600_000;

/// A member is floor-proximate when remaining headroom ≤ 5% of its limit.
pub const FLOOR_PROXIMITY_FRACTION: f64 = 0.05;

/// Economic stress blend weights: floor mass, dispute rate, balance variance.
pub const STRESS_WEIGHT_FLOOR_MASS: f64 = 0.5;
pub const STRESS_WEIGHT_DISPUTE_RATE: f64 = 0.3;
pub const STRESS_WEIGHT_BALANCE_VARIANCE: f64 = 0.2;

// ── Scheduler ────────────────────────────────────────────────────────────────

/// Matching score blend weights: skill, category preference, debtor bonus.
pub const SCORE_WEIGHT_SKILL: f64 = 0.4;
pub const SCORE_WEIGHT_PREFERENCE: f64 = 0.2;
pub const SCORE_WEIGHT_DEBTOR: f64 = 0.4;

/// Debtor bonus scale: clamp(−balance/limit, 0, 1) × this.
pub const DEBTOR_BONUS_SCALE: f64 = 2.0;

/// One week in milliseconds (matching and coverage window).
pub const WEEK_MS: i64 = 7 * 24 * 3_600_000;
