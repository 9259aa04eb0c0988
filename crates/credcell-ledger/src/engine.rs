//! The Ledger Engine: the single mutation gateway for member state.
//!
//! Every other engine composes balanced update sets and submits them here;
//! nothing else writes balances, reserves, limits or statuses. Each mutating
//! call is a serialization point: it validates against the locked state,
//! stages a full copy, persists the staged copy, and only then swaps it in.
//! Any failure in any phase leaves the observable state untouched.
//!
//! Invariants enforced on every commit:
//!   I1  Σ balances = 0 (update sets must conserve)
//!   I2  balance ≥ −limit per member
//!   I3  balance − reserve ≥ −limit per member (when escrow safety is on)
//!   I4  reserve ≥ 0 per member

use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use tracing::{info, warn};

use credcell_core::cell::{CellLedgerState, LedgerStatistics};
use credcell_core::error::CellError;
use credcell_core::events::{BalanceDelta, Event, EventKind};
use credcell_core::member::{BalanceUpdate, MemberState, MemberStatus, ReserveUpdate};
use credcell_core::params::{CellParameters, ParameterUpdate};
use credcell_core::types::{CellId, Credits, MemberId, TimestampMs};
use credcell_store::Store;

pub struct Ledger {
    cell_id: CellId,
    store: Arc<Store>,
    state: Mutex<CellLedgerState>,
}

impl Ledger {
    /// Load the cell's ledger from the store, or initialise a fresh one with
    /// the given parameters.
    pub fn open(
        store: Arc<Store>,
        cell_id: CellId,
        parameters: CellParameters,
        now: TimestampMs,
    ) -> Result<Self, CellError> {
        let state = match store.get_ledger(&cell_id)? {
            Some(existing) => existing,
            None => {
                let fresh = CellLedgerState::new(cell_id.clone(), parameters, now);
                store.save_ledger(&fresh)?;
                fresh
            }
        };
        Ok(Self {
            cell_id,
            store,
            state: Mutex::new(state),
        })
    }

    // ── Commit ───────────────────────────────────────────────────────────────

    /// Persist `staged`, swap it in, and append the event — in that order.
    /// Holding the lock across persistence keeps ledger mutations and their
    /// events totally ordered by sequence number.
    fn commit(
        &self,
        guard: &mut MutexGuard<'_, CellLedgerState>,
        staged: CellLedgerState,
        kind: EventKind,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        self.store.save_ledger(&staged)?;
        **guard = staged;
        let seq = self.store.next_event_seq()?;
        self.store
            .append_event(&Event::new(self.cell_id.clone(), seq, now, kind))
    }

    // ── Membership ───────────────────────────────────────────────────────────

    /// Create an active member with zero balance. Fails on duplicates and on
    /// limits outside `[min_limit, max_limit]`.
    pub fn add_member(
        &self,
        member_id: MemberId,
        initial_limit: Option<Credits>,
        now: TimestampMs,
    ) -> Result<MemberState, CellError> {
        self.add_member_with_status(member_id, initial_limit, MemberStatus::Active, now)
    }

    /// Create a member awaiting admission (identity registered, not yet
    /// admitted by the cell).
    pub fn add_pending_member(
        &self,
        member_id: MemberId,
        initial_limit: Option<Credits>,
        now: TimestampMs,
    ) -> Result<MemberState, CellError> {
        self.add_member_with_status(member_id, initial_limit, MemberStatus::Pending, now)
    }

    fn add_member_with_status(
        &self,
        member_id: MemberId,
        initial_limit: Option<Credits>,
        status: MemberStatus,
        now: TimestampMs,
    ) -> Result<MemberState, CellError> {
        let mut state = self.state.lock().expect("ledger mutex");
        if state.members.contains_key(&member_id) {
            return Err(CellError::DuplicateMember(member_id));
        }
        let limit = initial_limit.unwrap_or(state.parameters.default_limit);
        if limit < state.parameters.min_limit || limit > state.parameters.max_limit {
            return Err(CellError::LimitOutOfRange {
                limit,
                min: state.parameters.min_limit,
                max: state.parameters.max_limit,
            });
        }
        if state.members.len() >= state.parameters.max_members {
            warn!(
                cell = %self.cell_id,
                members = state.members.len(),
                "cell exceeds its membership ceiling"
            );
        }

        let member = MemberState::new(member_id.clone(), limit, status, now);
        let mut staged = state.clone();
        staged.members.insert(member_id.clone(), member.clone());
        staged.sequence += 1;
        staged.updated_at = now;
        self.commit(
            &mut state,
            staged,
            EventKind::MemberAdded {
                member_id: member_id.clone(),
                limit,
                status,
            },
            now,
        )?;
        info!(member = %member_id, limit, "member added");
        Ok(member)
    }

    /// Remove a member entirely. Requires a settled position: zero balance
    /// and zero reserve, so conservation survives the removal.
    pub fn remove_member(&self, member_id: &MemberId, now: TimestampMs) -> Result<(), CellError> {
        let mut state = self.state.lock().expect("ledger mutex");
        let member = state
            .members
            .get(member_id)
            .ok_or_else(|| CellError::MemberNotFound(member_id.clone()))?;
        if member.balance != 0 || member.reserve != 0 {
            return Err(CellError::MemberHasObligations {
                member: member_id.clone(),
                balance: member.balance,
                reserve: member.reserve,
            });
        }
        let mut staged = state.clone();
        staged.members.shift_remove(member_id);
        staged.sequence += 1;
        staged.updated_at = now;
        self.commit(
            &mut state,
            staged,
            EventKind::MemberRemoved {
                member_id: member_id.clone(),
            },
            now,
        )?;
        info!(member = %member_id, "member removed");
        Ok(())
    }

    // ── Balance updates (the one atomic write path) ──────────────────────────

    /// Apply a balanced update set atomically.
    ///
    /// Phase 1 rejects non-conserving sets outright. Phase 2 validates every
    /// per-member aggregate against status, floor and escrow safety without
    /// mutating. Phase 3 commits all new balances, bumps the sequence number
    /// and emits a single `BALANCE_UPDATES` event. Returns the new sequence
    /// number.
    pub fn apply_balance_updates(
        &self,
        updates: &[BalanceUpdate],
        now: TimestampMs,
    ) -> Result<u64, CellError> {
        // Phase 1 — conservation.
        let sum: i128 = updates.iter().map(|u| u.delta as i128).sum();
        if sum != 0 {
            return Err(CellError::ConservationViolation { sum });
        }

        let mut state = self.state.lock().expect("ledger mutex");

        // Phase 2 — validation, no mutation. Deltas are aggregated per member
        // first so a set touching one member twice is judged on its net effect.
        let mut aggregate: IndexMap<MemberId, Credits> = IndexMap::new();
        for u in updates {
            let entry = aggregate.entry(u.member_id.clone()).or_insert(0);
            *entry = entry
                .checked_add(u.delta)
                .ok_or(CellError::InvalidAmount(u.delta))?;
        }

        let enforce_escrow = state.parameters.enforce_escrow_safety;
        let mut new_balances: Vec<(MemberId, Credits)> = Vec::with_capacity(aggregate.len());
        for (member_id, delta) in &aggregate {
            let member = state
                .members
                .get(member_id)
                .ok_or_else(|| CellError::MemberNotFound(member_id.clone()))?;
            if !member.status.can_transact() {
                return Err(CellError::MemberNotActive {
                    member: member_id.clone(),
                    status: member.status,
                });
            }
            let new = member
                .balance
                .checked_add(*delta)
                .ok_or(CellError::InvalidAmount(*delta))?;
            if new < -member.limit {
                return Err(CellError::FloorViolation {
                    member: member_id.clone(),
                    attempted: new,
                    floor: -member.limit,
                });
            }
            if enforce_escrow && new < -member.limit + member.reserve {
                return Err(CellError::EscrowViolation {
                    member: member_id.clone(),
                    attempted: new,
                    reserve: member.reserve,
                });
            }
            new_balances.push((member_id.clone(), new));
        }

        // Phase 3 — commit.
        let mut staged = state.clone();
        for (member_id, new_balance) in &new_balances {
            let member = staged
                .members
                .get_mut(member_id)
                .expect("validated member exists");
            member.balance = *new_balance;
            member.updated_at = now;
        }
        staged.sequence += 1;
        staged.updated_at = now;
        let sequence = staged.sequence;

        let deltas: Vec<BalanceDelta> = updates
            .iter()
            .map(|u| BalanceDelta {
                member_id: u.member_id.clone(),
                delta: u.delta,
                resulting_balance: staged.members[&u.member_id].balance,
                reason: u.reason.clone(),
            })
            .collect();

        self.commit(
            &mut state,
            staged,
            EventKind::BalanceUpdates { updates: deltas },
            now,
        )?;
        info!(sequence, entries = updates.len(), "applied balance updates");
        Ok(sequence)
    }

    // ── Reserve updates ──────────────────────────────────────────────────────

    /// Increment or decrement a member's escrow reserve. Validates I4 on
    /// every delta and I3 with the new reserve on increments. Returns the
    /// resulting reserve.
    pub fn apply_reserve_update(
        &self,
        update: &ReserveUpdate,
        now: TimestampMs,
    ) -> Result<Credits, CellError> {
        let mut state = self.state.lock().expect("ledger mutex");
        let member = state
            .members
            .get(&update.member_id)
            .ok_or_else(|| CellError::MemberNotFound(update.member_id.clone()))?;

        let new_reserve = member
            .reserve
            .checked_add(update.delta)
            .ok_or(CellError::InvalidAmount(update.delta))?;
        if new_reserve < 0 {
            return Err(CellError::NegativeReserve {
                member: update.member_id.clone(),
                attempted: new_reserve,
            });
        }
        if update.delta > 0
            && state.parameters.enforce_escrow_safety
            && member.balance < -member.limit + new_reserve
        {
            return Err(CellError::EscrowViolation {
                member: update.member_id.clone(),
                attempted: member.balance,
                reserve: new_reserve,
            });
        }

        let mut staged = state.clone();
        let staged_member = staged
            .members
            .get_mut(&update.member_id)
            .expect("validated member exists");
        staged_member.reserve = new_reserve;
        staged_member.updated_at = now;
        staged.sequence += 1;
        staged.updated_at = now;

        self.commit(
            &mut state,
            staged,
            EventKind::ReserveUpdate {
                member_id: update.member_id.clone(),
                delta: update.delta,
                resulting_reserve: new_reserve,
                commitment_id: update.commitment_id,
            },
            now,
        )?;
        Ok(new_reserve)
    }

    // ── Limits, statuses, parameters ─────────────────────────────────────────

    /// Change a member's debt allowance. Refuses to shrink below `−balance`
    /// (which would retro-breach the floor) or, with escrow safety on, below
    /// `reserve − balance` (which would retro-breach escrow safety).
    pub fn update_member_limit(
        &self,
        member_id: &MemberId,
        new_limit: Credits,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        let mut state = self.state.lock().expect("ledger mutex");
        if new_limit < state.parameters.min_limit || new_limit > state.parameters.max_limit {
            return Err(CellError::LimitOutOfRange {
                limit: new_limit,
                min: state.parameters.min_limit,
                max: state.parameters.max_limit,
            });
        }
        let member = state
            .members
            .get(member_id)
            .ok_or_else(|| CellError::MemberNotFound(member_id.clone()))?;
        if new_limit < -member.balance {
            return Err(CellError::LimitBelowDebt {
                member: member_id.clone(),
                new_limit,
                balance: member.balance,
            });
        }
        if state.parameters.enforce_escrow_safety && new_limit < member.reserve - member.balance {
            return Err(CellError::EscrowViolation {
                member: member_id.clone(),
                attempted: member.balance,
                reserve: member.reserve,
            });
        }
        let old_limit = member.limit;

        let mut staged = state.clone();
        let staged_member = staged
            .members
            .get_mut(member_id)
            .expect("validated member exists");
        staged_member.limit = new_limit;
        staged_member.updated_at = now;
        staged.sequence += 1;
        staged.updated_at = now;

        self.commit(
            &mut state,
            staged,
            EventKind::LimitUpdated {
                member_id: member_id.clone(),
                old_limit,
                new_limit,
            },
            now,
        )?;
        Ok(())
    }

    /// Move a member through its lifecycle. Exclusion additionally requires a
    /// settled position (zero balance, zero reserve).
    pub fn update_member_status(
        &self,
        member_id: &MemberId,
        new_status: MemberStatus,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        let mut state = self.state.lock().expect("ledger mutex");
        let member = state
            .members
            .get(member_id)
            .ok_or_else(|| CellError::MemberNotFound(member_id.clone()))?;
        let old_status = member.status;
        if !old_status.can_transition_to(new_status) {
            return Err(CellError::InvalidStatusTransition {
                member: member_id.clone(),
                from: old_status,
                to: new_status,
            });
        }
        if new_status == MemberStatus::Excluded && (member.balance != 0 || member.reserve != 0) {
            return Err(CellError::MemberHasObligations {
                member: member_id.clone(),
                balance: member.balance,
                reserve: member.reserve,
            });
        }

        let mut staged = state.clone();
        let staged_member = staged
            .members
            .get_mut(member_id)
            .expect("validated member exists");
        staged_member.status = new_status;
        staged_member.updated_at = now;
        staged.sequence += 1;
        staged.updated_at = now;

        self.commit(
            &mut state,
            staged,
            EventKind::StatusUpdated {
                member_id: member_id.clone(),
                old_status,
                new_status,
            },
            now,
        )?;
        info!(member = %member_id, ?old_status, ?new_status, "member status updated");
        Ok(())
    }

    /// Apply a governance-approved parameter change.
    pub fn update_parameters(
        &self,
        update: &ParameterUpdate,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        let mut state = self.state.lock().expect("ledger mutex");
        let mut staged = state.clone();
        match update {
            ParameterUpdate::DefaultLimit(v) => staged.parameters.default_limit = *v,
            ParameterUpdate::MinLimit(v) => staged.parameters.min_limit = *v,
            ParameterUpdate::MaxLimit(v) => staged.parameters.max_limit = *v,
            ParameterUpdate::EnforceEscrowSafety(v) => staged.parameters.enforce_escrow_safety = *v,
        }
        staged.sequence += 1;
        staged.updated_at = now;
        self.store.save_ledger(&staged)?;
        *state = staged;
        info!(?update, "cell parameters updated");
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn member_state(&self, member_id: &MemberId) -> Result<MemberState, CellError> {
        let state = self.state.lock().expect("ledger mutex");
        state
            .members
            .get(member_id)
            .cloned()
            .ok_or_else(|| CellError::MemberNotFound(member_id.clone()))
    }

    /// All member states in insertion order (the deterministic iteration
    /// order used by matching tie-breaks and indicator sweeps).
    pub fn all_member_states(&self) -> Vec<MemberState> {
        let state = self.state.lock().expect("ledger mutex");
        state.members.values().cloned().collect()
    }

    pub fn available_capacity(&self, member_id: &MemberId) -> Result<Credits, CellError> {
        Ok(self.member_state(member_id)?.available_capacity())
    }

    /// Whether `member` may spend `amount` right now: positive amount, the
    /// member is Active, and the amount fits in its available capacity.
    pub fn can_spend(&self, member_id: &MemberId, amount: Credits) -> bool {
        if amount <= 0 {
            return false;
        }
        match self.member_state(member_id) {
            Ok(m) => m.status == MemberStatus::Active && amount <= m.available_capacity(),
            Err(_) => false,
        }
    }

    pub fn statistics(&self) -> LedgerStatistics {
        self.state.lock().expect("ledger mutex").statistics()
    }

    /// I1 check over the live state.
    pub fn verify_conservation(&self) -> bool {
        self.state.lock().expect("ledger mutex").balance_sum() == 0
    }

    /// I2/I3/I4 check over the live state.
    pub fn verify_floors(&self) -> bool {
        let state = self.state.lock().expect("ledger mutex");
        let enforce = state.parameters.enforce_escrow_safety;
        state.members.values().all(|m| {
            m.balance >= -m.limit
                && m.reserve >= 0
                && (!enforce || m.balance - m.reserve >= -m.limit)
        })
    }

    pub fn parameters(&self) -> CellParameters {
        self.state.lock().expect("ledger mutex").parameters.clone()
    }

    pub fn cell_id(&self) -> &CellId {
        &self.cell_id
    }

    pub fn sequence(&self) -> u64 {
        self.state.lock().expect("ledger mutex").sequence
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_ledger(name: &str) -> Ledger {
        let dir = std::env::temp_dir().join(format!("credcell_ledger_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(Store::open(&dir).expect("open temp store"));
        Ledger::open(
            store,
            CellId::new("valley"),
            CellParameters::default(),
            0,
        )
        .expect("open ledger")
    }

    fn pay(payer: &str, payee: &str, amount: Credits) -> Vec<BalanceUpdate> {
        vec![
            BalanceUpdate::new(MemberId::new(payer), -amount, "spot-payment"),
            BalanceUpdate::new(MemberId::new(payee), amount, "spot-payment"),
        ]
    }

    const NOW: TimestampMs = 1_000;

    #[test]
    fn simple_payment_conserves() {
        let ledger = temp_ledger("pay");
        ledger.add_member(MemberId::new("alice"), None, NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), None, NOW).unwrap();

        ledger.apply_balance_updates(&pay("alice", "bob", 50), NOW).unwrap();

        assert_eq!(ledger.member_state(&MemberId::new("alice")).unwrap().balance, -50);
        assert_eq!(ledger.member_state(&MemberId::new("bob")).unwrap().balance, 50);
        assert!(ledger.verify_conservation());
        assert!(ledger.verify_floors());
    }

    #[test]
    fn non_conserving_set_rejected_before_any_lookup() {
        let ledger = temp_ledger("conserve");
        ledger.add_member(MemberId::new("alice"), None, NOW).unwrap();
        let err = ledger
            .apply_balance_updates(
                &[BalanceUpdate::new(MemberId::new("alice"), -10, "oops")],
                NOW,
            )
            .unwrap_err();
        assert_eq!(err.code(), "CONSERVATION_VIOLATION");
        assert_eq!(ledger.member_state(&MemberId::new("alice")).unwrap().balance, 0);
    }

    #[test]
    fn floor_violation_leaves_state_unchanged() {
        let ledger = temp_ledger("floor");
        ledger.add_member(MemberId::new("alice"), Some(50), NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), Some(100), NOW).unwrap();
        let before = ledger.all_member_states();
        let seq_before = ledger.sequence();

        let err = ledger
            .apply_balance_updates(&pay("alice", "bob", 51), NOW)
            .unwrap_err();
        assert_eq!(err.code(), "FLOOR_VIOLATION");
        assert_eq!(ledger.all_member_states(), before);
        assert_eq!(ledger.sequence(), seq_before);
    }

    #[test]
    fn payer_may_spend_exactly_available_capacity() {
        let ledger = temp_ledger("boundary");
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), Some(100), NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), Some(100), NOW).unwrap();
        ledger
            .apply_reserve_update(&ReserveUpdate::new(alice.clone(), 30, "escrow"), NOW)
            .unwrap();

        // available = 100 + 0 − 30 = 70
        assert!(ledger.can_spend(&alice, 70));
        assert!(!ledger.can_spend(&alice, 71));
        ledger.apply_balance_updates(&pay("alice", "bob", 70), NOW).unwrap();

        let err = ledger
            .apply_balance_updates(&pay("alice", "bob", 1), NOW)
            .unwrap_err();
        assert_eq!(err.code(), "ESCROW_VIOLATION");
    }

    #[test]
    fn escrow_violation_without_enforcement_is_floor_only() {
        let dir = std::env::temp_dir().join("credcell_ledger_test_noescrow");
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(Store::open(&dir).unwrap());
        let params = CellParameters {
            enforce_escrow_safety: false,
            ..CellParameters::default()
        };
        let ledger = Ledger::open(store, CellId::new("valley"), params, 0).unwrap();
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), Some(100), NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), None, NOW).unwrap();
        ledger
            .apply_reserve_update(&ReserveUpdate::new(alice.clone(), 30, "escrow"), NOW)
            .unwrap();

        // With I3 off the full floor is spendable despite the reserve.
        ledger.apply_balance_updates(&pay("alice", "bob", 100), NOW).unwrap();
        assert_eq!(ledger.member_state(&alice).unwrap().balance, -100);
    }

    #[test]
    fn reserve_cannot_go_negative() {
        let ledger = temp_ledger("reserve_neg");
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), None, NOW).unwrap();
        let err = ledger
            .apply_reserve_update(&ReserveUpdate::new(alice, -1, "release"), NOW)
            .unwrap_err();
        assert_eq!(err.code(), "NEGATIVE_RESERVE");
    }

    #[test]
    fn reserve_increment_checks_escrow_safety() {
        let ledger = temp_ledger("reserve_escrow");
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), Some(100), NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), None, NOW).unwrap();
        ledger.apply_balance_updates(&pay("alice", "bob", 60), NOW).unwrap();

        // balance −60, limit 100: at most 40 can still be reserved.
        ledger
            .apply_reserve_update(&ReserveUpdate::new(alice.clone(), 40, "escrow"), NOW)
            .unwrap();
        let err = ledger
            .apply_reserve_update(&ReserveUpdate::new(alice, 1, "escrow"), NOW)
            .unwrap_err();
        assert_eq!(err.code(), "ESCROW_VIOLATION");
    }

    #[test]
    fn limit_shrink_boundary() {
        let ledger = temp_ledger("limit");
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), Some(100), NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), None, NOW).unwrap();
        ledger.apply_balance_updates(&pay("alice", "bob", 40), NOW).unwrap();

        // balance −40: shrinking to 40 is allowed, 39 is not.
        ledger.update_member_limit(&alice, 40, NOW).unwrap();
        let err = ledger.update_member_limit(&alice, 39, NOW).unwrap_err();
        assert_eq!(err.code(), "LIMIT_BELOW_DEBT");
    }

    #[test]
    fn duplicate_member_rejected() {
        let ledger = temp_ledger("dup");
        ledger.add_member(MemberId::new("alice"), None, NOW).unwrap();
        let err = ledger.add_member(MemberId::new("alice"), None, NOW).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_MEMBER");
    }

    #[test]
    fn removal_requires_settled_position() {
        let ledger = temp_ledger("remove");
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), None, NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), None, NOW).unwrap();
        ledger.apply_balance_updates(&pay("alice", "bob", 5), NOW).unwrap();

        let err = ledger.remove_member(&alice, NOW).unwrap_err();
        assert_eq!(err.code(), "MEMBER_HAS_OBLIGATIONS");

        ledger.apply_balance_updates(&pay("bob", "alice", 5), NOW).unwrap();
        ledger.remove_member(&alice, NOW).unwrap();
        assert!(ledger.member_state(&alice).is_err());
        assert!(ledger.verify_conservation());
    }

    #[test]
    fn frozen_member_cannot_be_party_to_updates() {
        let ledger = temp_ledger("frozen");
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), None, NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), None, NOW).unwrap();
        ledger
            .update_member_status(&alice, MemberStatus::Frozen, NOW)
            .unwrap();

        let err = ledger
            .apply_balance_updates(&pay("alice", "bob", 1), NOW)
            .unwrap_err();
        assert_eq!(err.code(), "MEMBER_NOT_ACTIVE");
    }

    #[test]
    fn exclusion_gate_and_terminal_state() {
        let ledger = temp_ledger("exclude");
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), None, NOW).unwrap();
        ledger
            .update_member_status(&alice, MemberStatus::Excluded, NOW)
            .unwrap();
        let err = ledger
            .update_member_status(&alice, MemberStatus::Active, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATUS_TRANSITION");
    }

    #[test]
    fn sequence_advances_once_per_commit() {
        let ledger = temp_ledger("seq");
        ledger.add_member(MemberId::new("alice"), None, NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), None, NOW).unwrap();
        let before = ledger.sequence();
        ledger.apply_balance_updates(&pay("alice", "bob", 1), NOW).unwrap();
        assert_eq!(ledger.sequence(), before + 1);
    }

    #[test]
    fn same_member_twice_in_one_set_is_judged_on_net_effect() {
        let ledger = temp_ledger("net");
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), Some(10), NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), None, NOW).unwrap();

        // −25 then +20 nets to −5, inside the floor of −10.
        let updates = vec![
            BalanceUpdate::new(alice.clone(), -25, "swap-leg"),
            BalanceUpdate::new(alice.clone(), 20, "swap-leg"),
            BalanceUpdate::new(MemberId::new("bob"), 5, "swap-leg"),
        ];
        ledger.apply_balance_updates(&updates, NOW).unwrap();
        assert_eq!(ledger.member_state(&alice).unwrap().balance, -5);
    }
}
