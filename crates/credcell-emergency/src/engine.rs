//! The Emergency Engine: stress indicators and the three-state risk machine.
//!
//! Indicators are recomputed on demand from the ledger and the dispute log,
//! cached with their computation time. Automatic transitions move one step
//! along NORMAL — STRESSED — PANIC with hysteresis: the de-escalation
//! thresholds sit below the escalation thresholds, and PANIC additionally
//! holds a stabilization dwell. Governance-approved transitions may skip
//! levels, and a forced de-escalation may bypass the dwell.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use credcell_core::emergency::{
    EmergencyState, EmergencyView, PolicyVector, RiskState, StateTransition, StressIndicators,
    ThresholdProximity, TransitionAuthority,
};
use credcell_core::constants::{
    FLOOR_PROXIMITY_FRACTION, STRESS_WEIGHT_BALANCE_VARIANCE, STRESS_WEIGHT_DISPUTE_RATE,
    STRESS_WEIGHT_FLOOR_MASS,
};
use credcell_core::error::CellError;
use credcell_core::events::{Event, EventKind};
use credcell_core::params::EmergencyThresholds;
use credcell_core::types::{CellId, TimestampMs};
use credcell_ledger::Ledger;
use credcell_store::Store;

pub struct EmergencyEngine {
    cell_id: CellId,
    ledger: Arc<Ledger>,
    store: Arc<Store>,
    thresholds: EmergencyThresholds,
    state: Mutex<EmergencyState>,
    /// Externally supplied energy stress in [0, 1]; 0 when nothing reports.
    energy_stress: Mutex<f64>,
}

impl EmergencyView for EmergencyEngine {
    fn current_policy(&self) -> PolicyVector {
        PolicyVector::for_state(self.risk_state())
    }
}

impl EmergencyEngine {
    /// Load the persisted emergency state, or start at NORMAL.
    pub fn open(
        cell_id: CellId,
        ledger: Arc<Ledger>,
        store: Arc<Store>,
        thresholds: EmergencyThresholds,
        now: TimestampMs,
    ) -> Result<Self, CellError> {
        let state = match store.get_emergency_state(&cell_id)? {
            Some(existing) => existing,
            None => {
                let fresh = EmergencyState::new(cell_id.clone(), now);
                store.save_emergency_state(&fresh)?;
                fresh
            }
        };
        Ok(Self {
            cell_id,
            ledger,
            store,
            thresholds,
            state: Mutex::new(state),
            energy_stress: Mutex::new(0.0),
        })
    }

    fn emit(&self, kind: EventKind, now: TimestampMs) -> Result<(), CellError> {
        let seq = self.store.next_event_seq()?;
        self.store
            .append_event(&Event::new(self.cell_id.clone(), seq, now, kind))
    }

    // ── External inputs ──────────────────────────────────────────────────────

    /// Feed the externally measured energy stress level.
    pub fn set_energy_stress(&self, value: f64) {
        *self.energy_stress.lock().expect("energy mutex") = value.clamp(0.0, 1.0);
    }

    // ── Indicators ───────────────────────────────────────────────────────────

    /// Recompute the stress indicators from the live ledger and dispute log,
    /// cache the snapshot, and return it.
    pub fn recompute_indicators(&self, now: TimestampMs) -> Result<StressIndicators, CellError> {
        // Clearing accounts are bookkeeping, not people: they carry the
        // federation position and would distort every indicator.
        let members = self.ledger.all_member_states();
        let transactable: Vec<_> = members
            .iter()
            .filter(|m| m.status.can_transact() && !m.member_id.is_clearing())
            .collect();

        // Floor mass: limit-weighted share of members within 5% of their floor.
        let aggregate_capacity: i64 = transactable.iter().map(|m| m.limit).sum();
        let proximate_mass: i64 = transactable
            .iter()
            .filter(|m| {
                m.limit > 0
                    && (m.balance + m.limit) as f64 <= FLOOR_PROXIMITY_FRACTION * m.limit as f64
            })
            .map(|m| m.limit)
            .sum();
        let floor_mass = if aggregate_capacity > 0 {
            proximate_mass as f64 / aggregate_capacity as f64
        } else {
            0.0
        };

        // Balance variance: coefficient of variation. The mean of a conserved
        // ledger is usually 0, in which case the value is inconclusive.
        let n = transactable.len();
        let (balance_variance, variance_conclusive) = if n == 0 {
            (0.0, false)
        } else {
            let mean =
                transactable.iter().map(|m| m.balance as f64).sum::<f64>() / n as f64;
            if mean.abs() < f64::EPSILON {
                (0.0, false)
            } else {
                let variance = transactable
                    .iter()
                    .map(|m| (m.balance as f64 - mean).powi(2))
                    .sum::<f64>()
                    / n as f64;
                (variance.sqrt() / mean.abs(), true)
            }
        };

        let member_count = members
            .iter()
            .filter(|m| !m.member_id.is_clearing())
            .count();
        let open_disputes = self.store.count_open_disputes()?;
        let dispute_rate = if member_count > 0 {
            open_disputes as f64 / member_count as f64
        } else {
            0.0
        };

        let energy_stress = *self.energy_stress.lock().expect("energy mutex");
        let economic_stress = STRESS_WEIGHT_FLOOR_MASS * floor_mass
            + STRESS_WEIGHT_DISPUTE_RATE * dispute_rate.min(1.0)
            + STRESS_WEIGHT_BALANCE_VARIANCE * balance_variance;
        let overall_stress = economic_stress.max(energy_stress);

        let indicators = StressIndicators {
            floor_mass,
            balance_variance,
            variance_conclusive,
            dispute_rate,
            energy_stress,
            economic_stress,
            overall_stress,
            computed_at: now,
        };

        let mut state = self.state.lock().expect("emergency mutex");
        state.indicators = Some(indicators.clone());
        state.updated_at = now;
        self.store.save_emergency_state(&state)?;
        Ok(indicators)
    }

    pub fn cached_indicators(&self) -> Option<StressIndicators> {
        self.state.lock().expect("emergency mutex").indicators.clone()
    }

    pub fn risk_state(&self) -> RiskState {
        self.state.lock().expect("emergency mutex").risk_state
    }

    // ── Evaluation and transitions ───────────────────────────────────────────

    /// Recompute indicators and apply at most one automatic transition.
    /// Returns the new risk state if one occurred.
    pub fn evaluate(&self, now: TimestampMs) -> Result<Option<RiskState>, CellError> {
        let ind = self.recompute_indicators(now)?;
        let t = &self.thresholds;
        let current = self.risk_state();

        let target = match current {
            RiskState::Normal => (ind.floor_mass >= t.stressed_floor_mass
                || ind.dispute_rate.min(1.0) >= t.stressed_dispute_rate)
                .then_some(RiskState::Stressed),
            RiskState::Stressed => {
                if ind.floor_mass >= t.panic_floor_mass
                    || ind.energy_stress >= t.panic_energy_stress
                {
                    Some(RiskState::Panic)
                } else if ind.floor_mass < t.normal_floor_mass
                    && ind.overall_stress < t.normal_overall_stress
                {
                    Some(RiskState::Normal)
                } else {
                    None
                }
            }
            RiskState::Panic => {
                let calm = ind.floor_mass < t.panic_floor_mass
                    && ind.energy_stress < t.panic_energy_stress;
                // The dwell check lives in transition(); only attempt when calm.
                if calm && self.panic_dwell_remaining(now) == Some(0) {
                    Some(RiskState::Stressed)
                } else {
                    None
                }
            }
        };

        match target {
            Some(to) => {
                self.transition(to, "indicator evaluation", TransitionAuthority::Automatic, now)?;
                Ok(Some(to))
            }
            None => Ok(None),
        }
    }

    /// Apply a risk-state transition.
    ///
    /// Automatic transitions must be single-step; governance transitions may
    /// skip levels. De-escalating out of PANIC requires the stabilization
    /// dwell to have elapsed and the indicators to sit below the escalation
    /// thresholds — unless the governance authority carries the forced flag.
    pub fn transition(
        &self,
        target: RiskState,
        reason: &str,
        authority: TransitionAuthority,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        let current = self.risk_state();
        if current == target {
            return Err(CellError::SameRiskState(target));
        }
        let forced = matches!(
            authority,
            TransitionAuthority::Governance { forced: true, .. }
        );
        if matches!(authority, TransitionAuthority::Automatic) && !current.is_adjacent(target) {
            return Err(CellError::NonAdjacentTransition {
                from: current,
                to: target,
            });
        }

        if current == RiskState::Panic && !current.is_escalation(target) && !forced {
            if let Some(remaining) = self.panic_dwell_remaining(now) {
                if remaining > 0 {
                    return Err(CellError::StabilizationPeriodActive {
                        remaining_ms: remaining,
                    });
                }
            }
            let ind = self
                .cached_indicators()
                .map(Ok)
                .unwrap_or_else(|| self.recompute_indicators(now))?;
            if ind.floor_mass >= self.thresholds.panic_floor_mass
                || ind.energy_stress >= self.thresholds.panic_energy_stress
            {
                return Err(CellError::DeescalationBlocked);
            }
        }

        let mut state = self.state.lock().expect("emergency mutex");
        let from = state.risk_state;
        state.risk_state = target;
        state.last_transition_at = Some(now);
        state.panic_entered_at = if target == RiskState::Panic {
            Some(now)
        } else {
            None
        };
        state.updated_at = now;
        self.store.save_emergency_state(&state)?;

        let entry = StateTransition {
            from,
            to: target,
            reason: reason.to_string(),
            authority: authority.clone(),
            indicators: state.indicators.clone(),
            occurred_at: now,
        };
        drop(state);
        self.store.append_state_transition(&entry)?;

        self.emit(
            EventKind::EmergencyStateChange {
                from,
                to: target,
                reason: reason.to_string(),
            },
            now,
        )?;
        if forced && !from.is_escalation(target) {
            if let TransitionAuthority::Governance { approval, .. } = &authority {
                self.emit(
                    EventKind::ForcedDeescalation {
                        from,
                        to: target,
                        approval: *approval,
                    },
                    now,
                )?;
            }
        }

        if target == RiskState::Panic {
            warn!(cell = %self.cell_id, ?from, "cell entered PANIC");
        } else {
            info!(cell = %self.cell_id, ?from, ?target, reason, "risk state transition");
        }
        Ok(())
    }

    /// Remaining stabilization dwell in ms while in PANIC (0 once elapsed);
    /// None outside PANIC.
    fn panic_dwell_remaining(&self, now: TimestampMs) -> Option<i64> {
        let state = self.state.lock().expect("emergency mutex");
        if state.risk_state != RiskState::Panic {
            return None;
        }
        let entered = state.panic_entered_at?;
        Some((self.thresholds.panic_stabilization_ms - (now - entered)).max(0))
    }

    // ── Reports ──────────────────────────────────────────────────────────────

    /// How close the cell sits to its next escalation and de-escalation.
    pub fn threshold_proximity(&self, now: TimestampMs) -> Result<ThresholdProximity, CellError> {
        let ind = self.recompute_indicators(now)?;
        let t = &self.thresholds;
        let current = self.risk_state();

        let (escalation_distance, critical_indicator) = match current {
            RiskState::Normal => {
                let by_floor = (t.stressed_floor_mass - ind.floor_mass).max(0.0);
                let by_disputes = (t.stressed_dispute_rate - ind.dispute_rate.min(1.0)).max(0.0);
                if by_floor <= by_disputes {
                    (Some(by_floor), Some("floor_mass".to_string()))
                } else {
                    (Some(by_disputes), Some("dispute_rate".to_string()))
                }
            }
            RiskState::Stressed => {
                let by_floor = (t.panic_floor_mass - ind.floor_mass).max(0.0);
                let by_energy = (t.panic_energy_stress - ind.energy_stress).max(0.0);
                if by_floor <= by_energy {
                    (Some(by_floor), Some("floor_mass".to_string()))
                } else {
                    (Some(by_energy), Some("energy_stress".to_string()))
                }
            }
            RiskState::Panic => (None, None),
        };

        let deescalation_distance = match current {
            RiskState::Normal => None,
            // How far the worst indicator still sits above its calm level.
            RiskState::Stressed => Some(
                (ind.floor_mass - t.normal_floor_mass)
                    .max(ind.overall_stress - t.normal_overall_stress)
                    .max(0.0),
            ),
            RiskState::Panic => Some(
                (ind.floor_mass - t.panic_floor_mass)
                    .max(ind.energy_stress - t.panic_energy_stress)
                    .max(0.0),
            ),
        };

        Ok(ThresholdProximity {
            current,
            escalation_distance,
            deescalation_distance,
            critical_indicator,
            panic_dwell_remaining_ms: self.panic_dwell_remaining(now),
        })
    }

    pub fn history(&self) -> Result<Vec<StateTransition>, CellError> {
        self.store.state_history()
    }

    pub fn thresholds(&self) -> &EmergencyThresholds {
        &self.thresholds
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use credcell_core::member::BalanceUpdate;
    use credcell_core::params::CellParameters;
    use credcell_core::types::{MemberId, ProposalId};

    const NOW: TimestampMs = 1_000_000;

    fn setup(name: &str) -> (EmergencyEngine, Arc<Ledger>) {
        let dir = std::env::temp_dir().join(format!("credcell_emergency_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(Store::open(&dir).unwrap());
        let cell = CellId::new("valley");
        let ledger = Arc::new(
            Ledger::open(Arc::clone(&store), cell.clone(), CellParameters::default(), 0).unwrap(),
        );
        let engine = EmergencyEngine::open(
            cell,
            Arc::clone(&ledger),
            store,
            EmergencyThresholds::default(),
            0,
        )
        .unwrap();
        (engine, ledger)
    }

    /// Drive half the cell's capacity to within 5% of the floor.
    fn stress_the_ledger(ledger: &Ledger) {
        for name in ["alice", "bob", "carol", "dave"] {
            ledger.add_member(MemberId::new(name), Some(100), NOW).unwrap();
        }
        // alice and bob end at −96 (headroom 4 ≤ 5% of 100); carol absorbs.
        ledger
            .apply_balance_updates(
                &[
                    BalanceUpdate::new(MemberId::new("alice"), -96, "stress"),
                    BalanceUpdate::new(MemberId::new("bob"), -96, "stress"),
                    BalanceUpdate::new(MemberId::new("carol"), 192, "stress"),
                ],
                NOW,
            )
            .unwrap();
    }

    #[test]
    fn indicators_reflect_floor_mass() {
        let (engine, ledger) = setup("indicators");
        stress_the_ledger(&ledger);
        let ind = engine.recompute_indicators(NOW).unwrap();
        assert!((ind.floor_mass - 0.5).abs() < 1e-9);
        // Conserved ledger: mean balance is 0, variance inconclusive.
        assert!(!ind.variance_conclusive);
        assert_eq!(ind.balance_variance, 0.0);
    }

    #[test]
    fn escalation_is_single_step() {
        let (engine, ledger) = setup("single_step");
        stress_the_ledger(&ledger);

        assert_eq!(engine.evaluate(NOW).unwrap(), Some(RiskState::Stressed));
        // floor mass 0.5 ≥ panic threshold 0.4: next evaluation steps to PANIC.
        assert_eq!(engine.evaluate(NOW + 1).unwrap(), Some(RiskState::Panic));
        assert_eq!(engine.risk_state(), RiskState::Panic);
    }

    #[test]
    fn automatic_skip_rejected_same_state_rejected() {
        let (engine, _) = setup("skip");
        let err = engine
            .transition(RiskState::Panic, "x", TransitionAuthority::Automatic, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "NON_ADJACENT_TRANSITION");
        let err = engine
            .transition(RiskState::Normal, "x", TransitionAuthority::Automatic, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "SAME_RISK_STATE");
    }

    #[test]
    fn governance_may_skip_levels() {
        let (engine, _) = setup("gov_skip");
        engine
            .transition(
                RiskState::Panic,
                "council order",
                TransitionAuthority::Governance {
                    approval: ProposalId::digest(b"p"),
                    initiator: MemberId::new("chair"),
                    forced: false,
                },
                NOW,
            )
            .unwrap();
        assert_eq!(engine.risk_state(), RiskState::Panic);
        assert!(engine.current_policy().federation_frozen());
    }

    #[test]
    fn panic_dwell_blocks_early_deescalation() {
        let (engine, _) = setup("dwell");
        engine
            .transition(
                RiskState::Panic,
                "council order",
                TransitionAuthority::Governance {
                    approval: ProposalId::digest(b"p"),
                    initiator: MemberId::new("chair"),
                    forced: false,
                },
                NOW,
            )
            .unwrap();

        let err = engine
            .transition(
                RiskState::Stressed,
                "too soon",
                TransitionAuthority::Automatic,
                NOW + 1,
            )
            .unwrap_err();
        assert_eq!(err.code(), "STABILIZATION_PERIOD_ACTIVE");

        // After the dwell, with calm indicators, de-escalation proceeds.
        let after = NOW + engine.thresholds().panic_stabilization_ms + 1;
        engine.recompute_indicators(after).unwrap();
        engine
            .transition(
                RiskState::Stressed,
                "stabilized",
                TransitionAuthority::Automatic,
                after,
            )
            .unwrap();
        assert_eq!(engine.risk_state(), RiskState::Stressed);
    }

    #[test]
    fn forced_deescalation_bypasses_dwell() {
        let (engine, _) = setup("forced");
        engine
            .transition(
                RiskState::Panic,
                "council order",
                TransitionAuthority::Governance {
                    approval: ProposalId::digest(b"p"),
                    initiator: MemberId::new("chair"),
                    forced: false,
                },
                NOW,
            )
            .unwrap();
        engine
            .transition(
                RiskState::Normal,
                "all clear",
                TransitionAuthority::Governance {
                    approval: ProposalId::digest(b"q"),
                    initiator: MemberId::new("chair"),
                    forced: true,
                },
                NOW + 1,
            )
            .unwrap();
        assert_eq!(engine.risk_state(), RiskState::Normal);
        let history = engine.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].to, RiskState::Normal);
    }

    #[test]
    fn energy_stress_drives_panic() {
        let (engine, ledger) = setup("energy");
        ledger.add_member(MemberId::new("alice"), None, NOW).unwrap();
        engine
            .transition(
                RiskState::Stressed,
                "drill",
                TransitionAuthority::Governance {
                    approval: ProposalId::digest(b"p"),
                    initiator: MemberId::new("chair"),
                    forced: false,
                },
                NOW,
            )
            .unwrap();
        engine.set_energy_stress(0.9);
        assert_eq!(engine.evaluate(NOW + 1).unwrap(), Some(RiskState::Panic));
    }

    #[test]
    fn proximity_report_names_the_critical_indicator() {
        let (engine, ledger) = setup("proximity");
        stress_the_ledger(&ledger);
        let report = engine.threshold_proximity(NOW).unwrap();
        assert_eq!(report.current, RiskState::Normal);
        // floor mass 0.5 is already past the 0.25 threshold: distance 0.
        assert_eq!(report.escalation_distance, Some(0.0));
        assert_eq!(report.critical_indicator.as_deref(), Some("floor_mass"));
    }
}
