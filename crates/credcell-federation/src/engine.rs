//! The Federation Engine: capped bilateral trade between cells.
//!
//! All external value flows through one synthetic ledger member, the clearing
//! account, so conservation (I1) holds automatically on every inter-cell
//! transfer. The clearing account's limit mirrors the exposure cap, which
//! makes the ledger floor (I2) enforce the incoming side of the cap (I5).
//! Cross-cell atomicity is not claimed: each side's ledger is self-conserving
//! and bilateral positions agree only when both sides mirror the transfer log.

use std::sync::{Arc, Mutex, OnceLock};

use tracing::{info, warn};

use credcell_core::emergency::{EmergencyView, PolicyVector};
use credcell_core::error::CellError;
use credcell_core::events::{Event, EventKind};
use credcell_core::federation::{
    ExposureAnalysis, FederationDirection, FederationLink, FederationState, FederationStatus,
    FederationTransaction, FederationTxStatus, LinkStatus, QuarantineReason,
};
use credcell_core::member::BalanceUpdate;
use credcell_core::params::FederationParameters;
use credcell_core::types::{CellId, Credits, FederationTxId, MemberId, TimestampMs};
use credcell_ledger::Ledger;
use credcell_store::Store;

pub struct FederationEngine {
    cell_id: CellId,
    ledger: Arc<Ledger>,
    store: Arc<Store>,
    params: FederationParameters,
    state: Mutex<FederationState>,
    emergency: OnceLock<Arc<dyn EmergencyView>>,
    clearing_account: MemberId,
}

impl FederationEngine {
    /// Open the federation engine, provisioning the clearing account on first
    /// run. The initial exposure cap is 0 until `recompute_exposure_cap` runs
    /// (the cell wiring calls it right after the emergency view is attached).
    pub fn open(
        cell_id: CellId,
        ledger: Arc<Ledger>,
        store: Arc<Store>,
        params: FederationParameters,
        now: TimestampMs,
    ) -> Result<Self, CellError> {
        let clearing_account = MemberId::clearing_account(&cell_id);
        if ledger.member_state(&clearing_account).is_err() {
            ledger.add_member(clearing_account.clone(), Some(0), now)?;
            info!(account = %clearing_account, "clearing account provisioned");
        }
        let state = match store.get_federation_state(&cell_id)? {
            Some(existing) => existing,
            None => {
                let fresh = FederationState::new(cell_id.clone(), now);
                store.save_federation_state(&fresh)?;
                fresh
            }
        };
        Ok(Self {
            cell_id,
            ledger,
            store,
            params,
            state: Mutex::new(state),
            emergency: OnceLock::new(),
            clearing_account,
        })
    }

    /// Late-bind the emergency view (the E↔F back-reference is resolved by
    /// injecting E after both engines exist).
    pub fn attach_emergency(&self, view: Arc<dyn EmergencyView>) {
        let _ = self.emergency.set(view);
    }

    fn policy(&self) -> PolicyVector {
        self.emergency
            .get()
            .map(|e| e.current_policy())
            .unwrap_or_default()
    }

    fn emit(&self, kind: EventKind, now: TimestampMs) -> Result<(), CellError> {
        let seq = self.store.next_event_seq()?;
        self.store
            .append_event(&Event::new(self.cell_id.clone(), seq, now, kind))
    }

    pub fn clearing_account(&self) -> &MemberId {
        &self.clearing_account
    }

    pub fn federation_state(&self) -> FederationState {
        self.state.lock().expect("federation mutex").clone()
    }

    // ── Exposure cap ─────────────────────────────────────────────────────────

    /// Recompute `cap = clamp(⌊capacity · β⌋, min, max)` where β is the base
    /// beta scaled by the emergency policy, and capacity excludes the
    /// clearing account itself. Mirrors the cap onto the clearing account's
    /// limit and quarantines the cell if the new cap is breached or the
    /// policy froze federation. Must be called whenever membership or limits
    /// change.
    pub fn recompute_exposure_cap(&self, now: TimestampMs) -> Result<Credits, CellError> {
        let stats = self.ledger.statistics();
        let clearing_limit = self.ledger.member_state(&self.clearing_account)?.limit;
        let capacity = stats.aggregate_capacity - clearing_limit;

        let beta = self.params.base_beta_factor * self.policy().federation_beta_factor;
        let cap = ((capacity as f64 * beta).floor() as Credits)
            .clamp(self.params.min_exposure_cap, self.params.max_exposure_cap);

        let (old_cap, position) = {
            let mut state = self.state.lock().expect("federation mutex");
            let old_cap = state.exposure_cap;
            state.exposure_cap = cap;
            state.beta_factor = beta;
            state.updated_at = now;
            self.store.save_federation_state(&state)?;
            (old_cap, state.federation_position)
        };

        // Mirror onto the clearing limit so I2 covers incoming exposure. A
        // refusal (the position already exceeds the new cap) is the
        // quarantine case, not an error here.
        if let Err(err) = self
            .ledger
            .update_member_limit(&self.clearing_account, cap, now)
        {
            match err {
                CellError::LimitBelowDebt { .. }
                | CellError::LimitOutOfRange { .. }
                | CellError::EscrowViolation { .. } => {
                    warn!(cap, error = %err, "clearing limit not lowered to new cap");
                }
                other => return Err(other),
            }
        }

        if old_cap != cap {
            self.emit(
                EventKind::ExposureCapUpdated {
                    old_cap,
                    new_cap: cap,
                },
                now,
            )?;
        }

        if beta == 0.0 {
            self.quarantine(QuarantineReason::PanicMode, now)?;
        } else if position.abs() > cap {
            self.quarantine(QuarantineReason::CapViolation, now)?;
        }
        Ok(cap)
    }

    // ── Link lifecycle ───────────────────────────────────────────────────────

    /// Propose a bilateral link. The proposal lapses after the configured
    /// window (7 days by default) unless the peer accepts.
    pub fn propose_link(
        &self,
        peer: CellId,
        terms: impl Into<String>,
        now: TimestampMs,
    ) -> Result<FederationLink, CellError> {
        match self.store.get_link(&peer)? {
            Some(link)
                if link.status == LinkStatus::Pending
                    && link.expires_at.map(|e| now > e).unwrap_or(false) =>
            {
                // A lapsed proposal is replaced.
                self.store.remove_link(&peer)?;
            }
            Some(_) => return Err(CellError::LinkAlreadyExists(peer)),
            None => {}
        }
        let link = FederationLink {
            peer_cell: peer.clone(),
            status: LinkStatus::Pending,
            bilateral_position: 0,
            terms: terms.into(),
            proposed_at: now,
            expires_at: Some(now + self.params.link_proposal_expiry_ms),
            last_activity: None,
            suspend_reason: None,
        };
        self.store.put_link(&link)?;
        self.emit(EventKind::LinkProposed { peer_cell: peer }, now)?;
        Ok(link)
    }

    /// Accept a pending link proposal. Expired proposals are removed and
    /// refused.
    pub fn accept_link(&self, peer: &CellId, now: TimestampMs) -> Result<FederationLink, CellError> {
        let mut link = self
            .store
            .get_link(peer)?
            .ok_or_else(|| CellError::LinkNotFound(peer.clone()))?;
        if link.status != LinkStatus::Pending {
            return Err(CellError::LinkAlreadyExists(peer.clone()));
        }
        if link.expires_at.map(|e| now > e).unwrap_or(false) {
            self.store.remove_link(peer)?;
            return Err(CellError::LinkProposalExpired(peer.clone()));
        }
        link.status = LinkStatus::Active;
        link.expires_at = None;
        link.last_activity = Some(now);
        self.store.put_link(&link)?;
        self.emit(
            EventKind::LinkAccepted {
                peer_cell: peer.clone(),
            },
            now,
        )?;
        info!(peer = %peer, "federation link active");
        Ok(link)
    }

    /// Reject a pending proposal, removing the provisional link.
    pub fn reject_link(&self, peer: &CellId) -> Result<(), CellError> {
        let link = self
            .store
            .get_link(peer)?
            .ok_or_else(|| CellError::LinkNotFound(peer.clone()))?;
        if link.status != LinkStatus::Pending {
            return Err(CellError::LinkAlreadyExists(peer.clone()));
        }
        self.store.remove_link(peer)
    }

    /// Remove all lapsed pending proposals; returns the affected peers.
    pub fn expire_link_proposals(&self, now: TimestampMs) -> Result<Vec<CellId>, CellError> {
        let mut expired = Vec::new();
        for link in self.store.all_links()? {
            if link.status == LinkStatus::Pending
                && link.expires_at.map(|e| now > e).unwrap_or(false)
            {
                self.store.remove_link(&link.peer_cell)?;
                expired.push(link.peer_cell);
            }
        }
        Ok(expired)
    }

    pub fn suspend_link(
        &self,
        peer: &CellId,
        reason: impl Into<String>,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        let mut link = self
            .store
            .get_link(peer)?
            .ok_or_else(|| CellError::LinkNotFound(peer.clone()))?;
        if link.status != LinkStatus::Active {
            return Err(CellError::LinkNotActive {
                peer: peer.clone(),
                status: link.status,
            });
        }
        let reason = reason.into();
        link.status = LinkStatus::Suspended;
        link.suspend_reason = Some(reason.clone());
        self.store.put_link(&link)?;
        self.emit(
            EventKind::LinkSuspended {
                peer_cell: peer.clone(),
                reason,
            },
            now,
        )
    }

    pub fn resume_link(&self, peer: &CellId, now: TimestampMs) -> Result<(), CellError> {
        let mut link = self
            .store
            .get_link(peer)?
            .ok_or_else(|| CellError::LinkNotFound(peer.clone()))?;
        if link.status != LinkStatus::Suspended {
            return Err(CellError::LinkNotActive {
                peer: peer.clone(),
                status: link.status,
            });
        }
        link.status = LinkStatus::Active;
        link.suspend_reason = None;
        self.store.put_link(&link)?;
        self.emit(
            EventKind::LinkResumed {
                peer_cell: peer.clone(),
            },
            now,
        )
    }

    pub fn link(&self, peer: &CellId) -> Result<FederationLink, CellError> {
        self.store
            .get_link(peer)?
            .ok_or_else(|| CellError::LinkNotFound(peer.clone()))
    }

    pub fn links(&self) -> Result<Vec<FederationLink>, CellError> {
        self.store.all_links()
    }

    // ── Transfers ────────────────────────────────────────────────────────────

    /// Execute an outgoing transfer. Preconditions, in order: federation not
    /// frozen, cell not quarantined, positive amount, an active link, payer
    /// capacity, exposure cap headroom. On success the payer's debit lands on
    /// the clearing account in one balanced update, positions advance, and
    /// the record awaits peer confirmation as SourceConfirmed.
    pub fn execute_transfer(
        &self,
        peer: &CellId,
        payer: &MemberId,
        remote_payee: impl Into<String>,
        amount: Credits,
        now: TimestampMs,
    ) -> Result<FederationTransaction, CellError> {
        self.check_transfer_gates(peer, amount)?;
        if !self.ledger.can_spend(payer, amount) {
            let available = self.ledger.available_capacity(payer)?;
            return Err(CellError::InsufficientCapacity {
                member: payer.clone(),
                requested: amount,
                available,
            });
        }
        {
            let state = self.state.lock().expect("federation mutex");
            if (state.federation_position + amount).abs() > state.exposure_cap {
                return Err(CellError::CapExceeded {
                    position: state.federation_position,
                    amount,
                    cap: state.exposure_cap,
                });
            }
        }

        let mut tx = self.new_transaction(
            peer.clone(),
            FederationDirection::Outgoing,
            payer.clone(),
            remote_payee.into(),
            amount,
            now,
        )?;
        self.store.put_federation_tx(&tx)?;

        let updates = [
            BalanceUpdate::new(payer.clone(), -amount, "federation-transfer")
                .with_reference(tx.id.to_hex()),
            BalanceUpdate::new(self.clearing_account.clone(), amount, "federation-transfer")
                .with_reference(tx.id.to_hex()),
        ];
        if let Err(err) = self.ledger.apply_balance_updates(&updates, now) {
            if err.is_deterministic() {
                tx.status = FederationTxStatus::Failed;
                tx.failure_code = Some(err.code().to_string());
                self.store.put_federation_tx(&tx)?;
            }
            return Err(err);
        }

        self.shift_positions(peer, amount, now)?;
        tx.status = FederationTxStatus::SourceConfirmed;
        self.store.put_federation_tx(&tx)?;
        info!(tx = %tx.id, peer = %peer, amount, "outgoing federation transfer source-confirmed");
        Ok(tx)
    }

    /// Apply an incoming transfer from a peer cell: the clearing account is
    /// debited, the local payee credited. The record completes immediately —
    /// applying the mirror leg is this cell's confirmation.
    pub fn receive_transfer(
        &self,
        peer: &CellId,
        remote_payer: impl Into<String>,
        payee: &MemberId,
        amount: Credits,
        now: TimestampMs,
    ) -> Result<FederationTransaction, CellError> {
        self.check_transfer_gates(peer, amount)?;
        {
            let state = self.state.lock().expect("federation mutex");
            if (state.federation_position - amount).abs() > state.exposure_cap {
                return Err(CellError::CapExceeded {
                    position: state.federation_position,
                    amount,
                    cap: state.exposure_cap,
                });
            }
        }

        let mut tx = self.new_transaction(
            peer.clone(),
            FederationDirection::Incoming,
            payee.clone(),
            remote_payer.into(),
            amount,
            now,
        )?;
        self.store.put_federation_tx(&tx)?;

        let updates = [
            BalanceUpdate::new(self.clearing_account.clone(), -amount, "federation-transfer")
                .with_reference(tx.id.to_hex()),
            BalanceUpdate::new(payee.clone(), amount, "federation-transfer")
                .with_reference(tx.id.to_hex()),
        ];
        if let Err(err) = self.ledger.apply_balance_updates(&updates, now) {
            if err.is_deterministic() {
                tx.status = FederationTxStatus::Failed;
                tx.failure_code = Some(err.code().to_string());
                self.store.put_federation_tx(&tx)?;
            }
            return Err(err);
        }

        self.shift_positions(peer, -amount, now)?;
        tx.status = FederationTxStatus::Completed;
        tx.confirmed_at = Some(now);
        self.store.put_federation_tx(&tx)?;
        self.emit(
            EventKind::FederationTxCompleted {
                federation_tx_id: tx.id,
                peer_cell: peer.clone(),
                amount,
            },
            now,
        )?;
        Ok(tx)
    }

    /// The peer confirmed the mirror-side clearing debit: the transfer is
    /// complete and can no longer be rolled back.
    pub fn confirm_transfer(
        &self,
        id: &FederationTxId,
        now: TimestampMs,
    ) -> Result<FederationTransaction, CellError> {
        let mut tx = self.federation_transaction(id)?;
        if tx.status != FederationTxStatus::SourceConfirmed {
            return Err(CellError::InvalidFederationTxState(*id));
        }
        tx.status = FederationTxStatus::Completed;
        tx.confirmed_at = Some(now);
        self.store.put_federation_tx(&tx)?;
        self.emit(
            EventKind::FederationTxCompleted {
                federation_tx_id: *id,
                peer_cell: tx.peer_cell.clone(),
                amount: tx.amount,
            },
            now,
        )?;
        Ok(tx)
    }

    /// Roll back an unconfirmed outgoing transfer with an exactly
    /// compensating update. Completed and already-rolled-back transfers are
    /// refused, as are records whose clearing leg never committed.
    pub fn rollback_transfer(
        &self,
        id: &FederationTxId,
        reason: impl Into<String>,
        now: TimestampMs,
    ) -> Result<FederationTransaction, CellError> {
        let mut tx = self.federation_transaction(id)?;
        if !tx.is_rollbackable() || tx.direction != FederationDirection::Outgoing {
            return Err(CellError::InvalidFederationTxState(*id));
        }

        let updates = [
            BalanceUpdate::new(tx.local_member.clone(), tx.amount, "federation-rollback")
                .with_reference(tx.id.to_hex()),
            BalanceUpdate::new(
                self.clearing_account.clone(),
                -tx.amount,
                "federation-rollback",
            )
            .with_reference(tx.id.to_hex()),
        ];
        self.ledger.apply_balance_updates(&updates, now)?;
        self.shift_positions(&tx.peer_cell.clone(), -tx.amount, now)?;

        let reason = reason.into();
        tx.status = FederationTxStatus::RolledBack {
            reason: reason.clone(),
        };
        tx.rolled_back_at = Some(now);
        self.store.put_federation_tx(&tx)?;
        self.emit(
            EventKind::FederationTxRolledBack {
                federation_tx_id: *id,
                peer_cell: tx.peer_cell.clone(),
                amount: tx.amount,
                reason,
            },
            now,
        )?;
        info!(tx = %id, "federation transfer rolled back");
        Ok(tx)
    }

    fn check_transfer_gates(&self, peer: &CellId, amount: Credits) -> Result<(), CellError> {
        if self
            .emergency
            .get()
            .map(|e| e.is_federation_frozen())
            .unwrap_or(false)
        {
            return Err(CellError::FederationFrozen);
        }
        {
            let state = self.state.lock().expect("federation mutex");
            if let FederationStatus::Quarantined { reason, .. } = &state.status {
                return Err(CellError::CellQuarantined {
                    reason: reason.clone(),
                });
            }
        }
        if amount <= 0 {
            return Err(CellError::InvalidAmount(amount));
        }
        let link = self
            .store
            .get_link(peer)?
            .ok_or_else(|| CellError::LinkNotFound(peer.clone()))?;
        if link.status != LinkStatus::Active {
            return Err(CellError::LinkNotActive {
                peer: peer.clone(),
                status: link.status,
            });
        }
        Ok(())
    }

    fn new_transaction(
        &self,
        peer: CellId,
        direction: FederationDirection,
        local_member: MemberId,
        remote_member: String,
        amount: Credits,
        now: TimestampMs,
    ) -> Result<FederationTransaction, CellError> {
        let mut seed = peer.as_str().as_bytes().to_vec();
        seed.extend_from_slice(local_member.as_str().as_bytes());
        seed.extend_from_slice(&amount.to_be_bytes());
        seed.extend_from_slice(&now.to_be_bytes());
        seed.extend_from_slice(&self.store.next_record_seq()?.to_be_bytes());
        Ok(FederationTransaction {
            id: FederationTxId::digest(&seed),
            peer_cell: peer,
            direction,
            local_member,
            remote_member,
            amount,
            status: FederationTxStatus::Initiated,
            created_at: now,
            confirmed_at: None,
            rolled_back_at: None,
            failure_code: None,
        })
    }

    /// Advance the cell position and the link's bilateral position by
    /// `delta` (positive = outgoing).
    fn shift_positions(
        &self,
        peer: &CellId,
        delta: Credits,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        {
            let mut state = self.state.lock().expect("federation mutex");
            state.federation_position += delta;
            state.updated_at = now;
            self.store.save_federation_state(&state)?;
        }
        let mut link = self.link(peer)?;
        link.bilateral_position += delta;
        link.last_activity = Some(now);
        self.store.put_link(&link)
    }

    // ── Quarantine ───────────────────────────────────────────────────────────

    /// Enter quarantine. A no-op when already quarantined.
    pub fn quarantine(&self, reason: QuarantineReason, now: TimestampMs) -> Result<(), CellError> {
        {
            let mut state = self.state.lock().expect("federation mutex");
            if state.is_quarantined() {
                return Ok(());
            }
            state.status = FederationStatus::Quarantined {
                reason: reason.clone(),
                since: now,
            };
            state.updated_at = now;
            self.store.save_federation_state(&state)?;
        }
        warn!(cell = %self.cell_id, ?reason, "federation quarantined");
        self.emit(EventKind::FederationQuarantined { reason }, now)
    }

    /// Leave quarantine. Refused while the triggering condition still holds;
    /// a manual suspension may always be exited.
    pub fn exit_quarantine(&self, now: TimestampMs) -> Result<(), CellError> {
        let reason = {
            let state = self.state.lock().expect("federation mutex");
            match &state.status {
                FederationStatus::Active => return Ok(()),
                FederationStatus::Quarantined { reason, .. } => reason.clone(),
            }
        };
        match reason {
            QuarantineReason::CapViolation => {
                let state = self.state.lock().expect("federation mutex");
                if state.federation_position.abs() > state.exposure_cap {
                    return Err(CellError::QuarantineConditionHolds { reason });
                }
            }
            QuarantineReason::PanicMode => {
                if self.policy().federation_frozen() {
                    return Err(CellError::QuarantineConditionHolds { reason });
                }
            }
            QuarantineReason::ManualSuspension => {}
        }
        {
            let mut state = self.state.lock().expect("federation mutex");
            state.status = FederationStatus::Active;
            state.updated_at = now;
            self.store.save_federation_state(&state)?;
        }
        info!(cell = %self.cell_id, "federation quarantine exit");
        self.emit(EventKind::FederationQuarantineExit, now)
    }

    // ── Reports ──────────────────────────────────────────────────────────────

    pub fn exposure_analysis(&self) -> ExposureAnalysis {
        let state = self.state.lock().expect("federation mutex");
        let magnitude = state.federation_position.abs();
        let utilization = if state.exposure_cap > 0 {
            magnitude as f64 / state.exposure_cap as f64
        } else if magnitude > 0 {
            1.0
        } else {
            0.0
        };
        ExposureAnalysis {
            federation_position: state.federation_position,
            exposure_cap: state.exposure_cap,
            available: (state.exposure_cap - magnitude).max(0),
            utilization,
            warning: utilization >= self.params.warning_utilization,
            critical: utilization >= self.params.critical_utilization,
        }
    }

    pub fn federation_transaction(
        &self,
        id: &FederationTxId,
    ) -> Result<FederationTransaction, CellError> {
        self.store
            .get_federation_tx(id)?
            .ok_or(CellError::FederationTxNotFound(*id))
    }

    pub fn federation_transactions(&self) -> Result<Vec<FederationTransaction>, CellError> {
        self.store.all_federation_txs()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use credcell_core::params::CellParameters;

    const NOW: TimestampMs = 1_000;

    struct FixedPolicy(PolicyVector);

    impl EmergencyView for FixedPolicy {
        fn current_policy(&self) -> PolicyVector {
            self.0
        }
    }

    /// Cell with 2,000 aggregate capacity and alice at +500, matching the
    /// reference federation scenario: base beta 0.3 → cap 600.
    fn setup(name: &str) -> (FederationEngine, Arc<Ledger>) {
        let dir = std::env::temp_dir().join(format!("credcell_federation_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(Store::open(&dir).unwrap());
        let cell = CellId::new("cell-a");
        let ledger = Arc::new(
            Ledger::open(Arc::clone(&store), cell.clone(), CellParameters::default(), 0).unwrap(),
        );
        ledger.add_member(MemberId::new("alice"), Some(1_000), NOW).unwrap();
        ledger.add_member(MemberId::new("bob"), Some(1_000), NOW).unwrap();
        ledger
            .apply_balance_updates(
                &[
                    BalanceUpdate::new(MemberId::new("bob"), -500, "seed"),
                    BalanceUpdate::new(MemberId::new("alice"), 500, "seed"),
                ],
                NOW,
            )
            .unwrap();

        let params = FederationParameters {
            base_beta_factor: 0.3,
            ..FederationParameters::default()
        };
        let engine =
            FederationEngine::open(cell, Arc::clone(&ledger), store, params, NOW).unwrap();
        engine.recompute_exposure_cap(NOW).unwrap();
        (engine, ledger)
    }

    fn link_b(engine: &FederationEngine) {
        engine.propose_link(CellId::new("cell-b"), "weekly settlement", NOW).unwrap();
        engine.accept_link(&CellId::new("cell-b"), NOW).unwrap();
    }

    #[test]
    fn cap_is_capacity_times_beta() {
        let (engine, _) = setup("cap");
        assert_eq!(engine.federation_state().exposure_cap, 600);
    }

    #[test]
    fn transfer_and_rollback_restore_everything() {
        let (engine, ledger) = setup("roundtrip");
        link_b(&engine);
        let peer = CellId::new("cell-b");

        let tx = engine
            .execute_transfer(&peer, &MemberId::new("alice"), "remote-carol", 100, NOW)
            .unwrap();
        assert_eq!(tx.status, FederationTxStatus::SourceConfirmed);
        assert_eq!(engine.federation_state().federation_position, 100);
        assert_eq!(
            ledger.member_state(engine.clearing_account()).unwrap().balance,
            100
        );
        assert_eq!(ledger.member_state(&MemberId::new("alice")).unwrap().balance, 400);
        assert_eq!(engine.link(&peer).unwrap().bilateral_position, 100);

        let rolled = engine.rollback_transfer(&tx.id, "peer unreachable", NOW + 1).unwrap();
        assert!(matches!(rolled.status, FederationTxStatus::RolledBack { .. }));
        assert_eq!(engine.federation_state().federation_position, 0);
        assert_eq!(
            ledger.member_state(engine.clearing_account()).unwrap().balance,
            0
        );
        assert_eq!(ledger.member_state(&MemberId::new("alice")).unwrap().balance, 500);
        assert_eq!(engine.link(&peer).unwrap().bilateral_position, 0);
        assert!(ledger.verify_conservation());
    }

    #[test]
    fn completed_transfer_cannot_roll_back() {
        let (engine, _) = setup("completed");
        link_b(&engine);
        let tx = engine
            .execute_transfer(&CellId::new("cell-b"), &MemberId::new("alice"), "r", 100, NOW)
            .unwrap();
        engine.confirm_transfer(&tx.id, NOW + 1).unwrap();
        let err = engine.rollback_transfer(&tx.id, "too late", NOW + 2).unwrap_err();
        assert_eq!(err.code(), "INVALID_FEDERATION_TX_STATE");
    }

    #[test]
    fn cap_exceeded_is_refused() {
        let (engine, _) = setup("cap_exceeded");
        link_b(&engine);
        let err = engine
            .execute_transfer(&CellId::new("cell-b"), &MemberId::new("alice"), "r", 601, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "CAP_EXCEEDED");
    }

    #[test]
    fn frozen_policy_blocks_every_transfer() {
        let (engine, _) = setup("frozen");
        link_b(&engine);
        engine.attach_emergency(Arc::new(FixedPolicy(PolicyVector {
            federation_beta_factor: 0.0,
            ..PolicyVector::default()
        })));
        let err = engine
            .execute_transfer(&CellId::new("cell-b"), &MemberId::new("alice"), "r", 10, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "FEDERATION_FROZEN");
        let err = engine
            .receive_transfer(&CellId::new("cell-b"), "r", &MemberId::new("alice"), 10, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "FEDERATION_FROZEN");
    }

    #[test]
    fn zero_beta_recompute_quarantines_as_panic_mode() {
        let (engine, _) = setup("panic_quarantine");
        link_b(&engine);
        engine
            .execute_transfer(&CellId::new("cell-b"), &MemberId::new("alice"), "r", 100, NOW)
            .unwrap();
        engine.attach_emergency(Arc::new(FixedPolicy(PolicyVector {
            federation_beta_factor: 0.0,
            ..PolicyVector::default()
        })));
        engine.recompute_exposure_cap(NOW + 1).unwrap();
        let state = engine.federation_state();
        assert!(matches!(
            state.status,
            FederationStatus::Quarantined {
                reason: QuarantineReason::PanicMode,
                ..
            }
        ));
        // Position survives the freeze.
        assert_eq!(state.federation_position, 100);

        // Exit is refused while the policy still freezes federation.
        let err = engine.exit_quarantine(NOW + 2).unwrap_err();
        assert_eq!(err.code(), "QUARANTINE_CONDITION_HOLDS");
    }

    #[test]
    fn manual_suspension_always_exits() {
        let (engine, _) = setup("manual");
        engine.quarantine(QuarantineReason::ManualSuspension, NOW).unwrap();
        engine.exit_quarantine(NOW + 1).unwrap();
        assert!(!engine.federation_state().is_quarantined());
    }

    #[test]
    fn incoming_transfer_debits_clearing() {
        let (engine, ledger) = setup("incoming");
        link_b(&engine);
        let tx = engine
            .receive_transfer(&CellId::new("cell-b"), "remote-dan", &MemberId::new("bob"), 80, NOW)
            .unwrap();
        assert_eq!(tx.status, FederationTxStatus::Completed);
        assert_eq!(engine.federation_state().federation_position, -80);
        assert_eq!(
            ledger.member_state(engine.clearing_account()).unwrap().balance,
            -80
        );
        assert_eq!(ledger.member_state(&MemberId::new("bob")).unwrap().balance, -420);
        assert!(ledger.verify_conservation());
    }

    #[test]
    fn suspended_link_blocks_transfers() {
        let (engine, _) = setup("suspended");
        link_b(&engine);
        engine
            .suspend_link(&CellId::new("cell-b"), "peer audit", NOW)
            .unwrap();
        let err = engine
            .execute_transfer(&CellId::new("cell-b"), &MemberId::new("alice"), "r", 10, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "LINK_NOT_ACTIVE");
        engine.resume_link(&CellId::new("cell-b"), NOW).unwrap();
        engine
            .execute_transfer(&CellId::new("cell-b"), &MemberId::new("alice"), "r", 10, NOW)
            .unwrap();
    }

    #[test]
    fn expired_proposal_cannot_be_accepted() {
        let (engine, _) = setup("expiry");
        let peer = CellId::new("cell-b");
        let link = engine.propose_link(peer.clone(), "", NOW).unwrap();
        let after = link.expires_at.unwrap() + 1;
        let err = engine.accept_link(&peer, after).unwrap_err();
        assert_eq!(err.code(), "LINK_PROPOSAL_EXPIRED");
        assert!(engine.link(&peer).is_err());
    }

    #[test]
    fn exposure_analysis_flags_utilization() {
        let (engine, _) = setup("analysis");
        link_b(&engine);
        engine
            .execute_transfer(&CellId::new("cell-b"), &MemberId::new("alice"), "r", 480, NOW)
            .unwrap();
        let analysis = engine.exposure_analysis();
        assert_eq!(analysis.available, 120);
        assert!(analysis.warning);
        assert!(!analysis.critical);
    }
}
