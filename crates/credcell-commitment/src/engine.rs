//! The Commitment Engine: soft and escrowed future obligations.
//!
//! Escrow choreography: the reserve is held on the promisee when the
//! commitment becomes active, released before the settlement updates on
//! fulfillment, and released without settlement on cancellation. Each ledger
//! side effect that cannot be completed is reversed with a compensating
//! write, so a failed operation never leaves a dangling hold.

use std::sync::{Arc, OnceLock};

use tracing::{info, warn};

use credcell_core::commitment::{Commitment, CommitmentKind, CommitmentStatus};
use credcell_core::emergency::{CommitmentMode, EmergencyView, PolicyVector};
use credcell_core::error::CellError;
use credcell_core::events::{Event, EventKind};
use credcell_core::member::{BalanceUpdate, MemberStatus, ReserveUpdate};
use credcell_core::scheduler::TaskCategory;
use credcell_core::types::{CellId, CommitmentId, Credits, MemberId, TimestampMs};
use credcell_ledger::Ledger;
use credcell_store::Store;

pub struct CommitmentEngine {
    cell_id: CellId,
    ledger: Arc<Ledger>,
    store: Arc<Store>,
    emergency: OnceLock<Arc<dyn EmergencyView>>,
}

/// Per-member commitment tallies for the analytics surface.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CommitmentCounts {
    pub as_promisor: usize,
    pub as_promisee: usize,
    pub active: usize,
    pub fulfilled: usize,
    pub cancelled: usize,
    pub disputed: usize,
}

impl CommitmentEngine {
    pub fn new(cell_id: CellId, ledger: Arc<Ledger>, store: Arc<Store>) -> Self {
        Self {
            cell_id,
            ledger,
            store,
            emergency: OnceLock::new(),
        }
    }

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

    // ── Creation ─────────────────────────────────────────────────────────────

    /// Create a commitment directly in Active state. For an escrowed
    /// commitment the promisee's reserve is held immediately; if persisting
    /// the record then fails, the hold is reversed.
    pub fn create(
        &self,
        kind: CommitmentKind,
        promisor: MemberId,
        promisee: MemberId,
        value: Credits,
        category: TaskCategory,
        due_at: Option<TimestampMs>,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        let mut commitment =
            self.build(kind, promisor, promisee, value, category, due_at, now)?;
        commitment.status = CommitmentStatus::Active;
        self.activate_escrow_and_persist(commitment, now)
    }

    /// Record a proposed commitment awaiting the promisee's acceptance. No
    /// reserve is held until acceptance.
    pub fn propose(
        &self,
        kind: CommitmentKind,
        promisor: MemberId,
        promisee: MemberId,
        value: Credits,
        category: TaskCategory,
        due_at: Option<TimestampMs>,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        let commitment = self.build(kind, promisor, promisee, value, category, due_at, now)?;
        self.store.put_commitment(&commitment)?;
        self.emit(
            EventKind::CommitmentCreated {
                commitment_id: commitment.id,
                kind: commitment.kind,
                promisor: commitment.promisor.clone(),
                promisee: commitment.promisee.clone(),
                value: commitment.value,
                category: commitment.category,
            },
            now,
        )?;
        Ok(commitment)
    }

    /// The promisee accepts a proposed commitment, activating it (and taking
    /// the escrow hold for escrowed commitments).
    pub fn accept(
        &self,
        actor: &MemberId,
        id: &CommitmentId,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        let mut commitment = self.commitment(id)?;
        if commitment.status != CommitmentStatus::Proposed {
            return Err(CellError::InvalidCommitmentState {
                commitment: *id,
                status: commitment.status,
            });
        }
        if commitment.promisee != *actor {
            return Err(CellError::NotCommitmentParty {
                commitment: *id,
                member: actor.clone(),
            });
        }
        commitment.status = CommitmentStatus::Active;
        commitment.updated_at = now;
        if commitment.kind == CommitmentKind::Escrowed {
            self.hold_reserve(&commitment, now)?;
        }
        self.store.put_commitment(&commitment).map_err(|err| {
            self.reverse_hold_on_failure(&commitment, now);
            err
        })?;
        Ok(commitment)
    }

    fn build(
        &self,
        kind: CommitmentKind,
        promisor: MemberId,
        promisee: MemberId,
        value: Credits,
        category: TaskCategory,
        due_at: Option<TimestampMs>,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        if promisor == promisee {
            return Err(CellError::SelfTransaction);
        }
        if value <= 0 {
            return Err(CellError::InvalidAmount(value));
        }
        if let Some(due) = due_at {
            if due <= now {
                return Err(CellError::DueDateInPast);
            }
        }
        self.require_active(&promisor)?;
        self.require_active(&promisee)?;
        if kind == CommitmentKind::Soft && self.policy().commitment_mode == CommitmentMode::EscrowAll
        {
            return Err(CellError::EscrowRequired);
        }

        let mut seed = promisor.as_str().as_bytes().to_vec();
        seed.extend_from_slice(promisee.as_str().as_bytes());
        seed.extend_from_slice(&value.to_be_bytes());
        seed.extend_from_slice(&now.to_be_bytes());
        seed.extend_from_slice(&self.store.next_record_seq()?.to_be_bytes());

        Ok(Commitment {
            id: CommitmentId::digest(&seed),
            kind,
            promisor,
            promisee,
            value,
            category,
            due_at,
            status: CommitmentStatus::Proposed,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        })
    }

    fn activate_escrow_and_persist(
        &self,
        commitment: Commitment,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        if commitment.kind == CommitmentKind::Escrowed {
            self.hold_reserve(&commitment, now)?;
        }
        if let Err(err) = self.store.put_commitment(&commitment) {
            self.reverse_hold_on_failure(&commitment, now);
            return Err(err);
        }
        self.emit(
            EventKind::CommitmentCreated {
                commitment_id: commitment.id,
                kind: commitment.kind,
                promisor: commitment.promisor.clone(),
                promisee: commitment.promisee.clone(),
                value: commitment.value,
                category: commitment.category,
            },
            now,
        )?;
        info!(commitment = %commitment.id, kind = ?commitment.kind, value = commitment.value, "commitment created");
        Ok(commitment)
    }

    fn hold_reserve(&self, commitment: &Commitment, now: TimestampMs) -> Result<(), CellError> {
        let available = self.ledger.available_capacity(&commitment.promisee)?;
        if available < commitment.value {
            return Err(CellError::InsufficientCapacity {
                member: commitment.promisee.clone(),
                requested: commitment.value,
                available,
            });
        }
        self.ledger.apply_reserve_update(
            &ReserveUpdate::new(commitment.promisee.clone(), commitment.value, "escrow-hold")
                .for_commitment(commitment.id),
            now,
        )?;
        Ok(())
    }

    fn release_reserve(&self, commitment: &Commitment, now: TimestampMs) -> Result<(), CellError> {
        self.ledger.apply_reserve_update(
            &ReserveUpdate::new(
                commitment.promisee.clone(),
                -commitment.value,
                "escrow-release",
            )
            .for_commitment(commitment.id),
            now,
        )?;
        Ok(())
    }

    fn reverse_hold_on_failure(&self, commitment: &Commitment, now: TimestampMs) {
        if commitment.kind != CommitmentKind::Escrowed {
            return;
        }
        if let Err(err) = self.release_reserve(commitment, now) {
            warn!(
                commitment = %commitment.id,
                error = %err,
                "compensating escrow release failed; reserve left dangling"
            );
        }
    }

    fn require_active(&self, member: &MemberId) -> Result<(), CellError> {
        let state = self.ledger.member_state(member)?;
        if state.status != MemberStatus::Active {
            return Err(CellError::MemberNotActive {
                member: member.clone(),
                status: state.status,
            });
        }
        Ok(())
    }

    // ── Fulfillment ──────────────────────────────────────────────────────────

    /// The promisee confirms delivery. For an escrowed commitment the reserve
    /// is released before the settlement updates, so the settlement itself is
    /// judged against the freed capacity. Settlement moves exactly `value`
    /// from promisee to promisor in one balanced set.
    pub fn fulfill(
        &self,
        actor: &MemberId,
        id: &CommitmentId,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        let mut commitment = self.commitment(id)?;
        if commitment.status != CommitmentStatus::Active {
            return Err(CellError::InvalidCommitmentState {
                commitment: *id,
                status: commitment.status,
            });
        }
        if commitment.promisee != *actor {
            return Err(CellError::NotPromisee { commitment: *id });
        }
        self.require_active(&commitment.promisee)?;

        if commitment.kind == CommitmentKind::Escrowed {
            self.release_reserve(&commitment, now)?;
        }
        if let Err(err) = self.settle(&commitment, now) {
            // Settlement refused: re-take the hold so the escrow stays intact.
            if commitment.kind == CommitmentKind::Escrowed {
                if let Err(rehold) = self.hold_reserve(&commitment, now) {
                    warn!(commitment = %id, error = %rehold, "re-hold after failed settlement failed");
                }
            }
            return Err(err);
        }

        commitment.status = CommitmentStatus::Fulfilled;
        commitment.updated_at = now;
        commitment.resolved_at = Some(now);
        self.store.put_commitment(&commitment)?;
        self.emit(
            EventKind::CommitmentFulfilled {
                commitment_id: *id,
                value: commitment.value,
            },
            now,
        )?;
        info!(commitment = %id, "commitment fulfilled");
        Ok(commitment)
    }

    fn settle(&self, commitment: &Commitment, now: TimestampMs) -> Result<(), CellError> {
        let updates = [
            BalanceUpdate::new(
                commitment.promisee.clone(),
                -commitment.value,
                "commitment-settlement",
            )
            .with_reference(commitment.id.to_hex()),
            BalanceUpdate::new(
                commitment.promisor.clone(),
                commitment.value,
                "commitment-settlement",
            )
            .with_reference(commitment.id.to_hex()),
        ];
        self.ledger.apply_balance_updates(&updates, now)?;
        Ok(())
    }

    // ── Cancellation and dispute ─────────────────────────────────────────────

    /// Either party may cancel a proposed or active commitment. An active
    /// escrowed commitment releases its reserve.
    pub fn cancel(
        &self,
        actor: &MemberId,
        id: &CommitmentId,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        let commitment = self.commitment(id)?;
        if !commitment.is_party(actor) {
            return Err(CellError::NotCommitmentParty {
                commitment: *id,
                member: actor.clone(),
            });
        }
        if !matches!(
            commitment.status,
            CommitmentStatus::Proposed | CommitmentStatus::Active
        ) {
            return Err(CellError::InvalidCommitmentState {
                commitment: *id,
                status: commitment.status,
            });
        }
        self.cancel_inner(commitment, now)
    }

    /// Governance-authorized cancellation: also reaches disputed commitments,
    /// releasing any held reserve.
    pub fn cancel_by_governance(
        &self,
        id: &CommitmentId,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        let commitment = self.commitment(id)?;
        if commitment.status == CommitmentStatus::Fulfilled
            || commitment.status == CommitmentStatus::Cancelled
        {
            return Err(CellError::InvalidCommitmentState {
                commitment: *id,
                status: commitment.status,
            });
        }
        self.cancel_inner(commitment, now)
    }

    fn cancel_inner(
        &self,
        mut commitment: Commitment,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        if commitment.holds_reserve() {
            self.release_reserve(&commitment, now)?;
        }
        commitment.status = CommitmentStatus::Cancelled;
        commitment.updated_at = now;
        commitment.resolved_at = Some(now);
        self.store.put_commitment(&commitment)?;
        self.emit(
            EventKind::CommitmentCancelled {
                commitment_id: commitment.id,
            },
            now,
        )?;
        info!(commitment = %commitment.id, "commitment cancelled");
        Ok(commitment)
    }

    /// Either party raises a dispute on an active commitment. Any reserve
    /// stays held until governance resolves it.
    pub fn dispute(
        &self,
        actor: &MemberId,
        id: &CommitmentId,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        let mut commitment = self.commitment(id)?;
        if !commitment.is_party(actor) {
            return Err(CellError::NotCommitmentParty {
                commitment: *id,
                member: actor.clone(),
            });
        }
        if commitment.status != CommitmentStatus::Active {
            return Err(CellError::InvalidCommitmentState {
                commitment: *id,
                status: commitment.status,
            });
        }
        commitment.status = CommitmentStatus::Disputed;
        commitment.updated_at = now;
        self.store.put_commitment(&commitment)?;
        self.emit(
            EventKind::CommitmentDisputed {
                commitment_id: *id,
                raised_by: actor.clone(),
            },
            now,
        )?;
        Ok(commitment)
    }

    /// Governance resolution of a disputed commitment: release the reserve,
    /// then either settle as fulfilled or close as cancelled.
    pub fn resolve_disputed(
        &self,
        id: &CommitmentId,
        settle: bool,
        now: TimestampMs,
    ) -> Result<Commitment, CellError> {
        let mut commitment = self.commitment(id)?;
        if commitment.status != CommitmentStatus::Disputed {
            return Err(CellError::InvalidCommitmentState {
                commitment: *id,
                status: commitment.status,
            });
        }
        if commitment.holds_reserve() {
            self.release_reserve(&commitment, now)?;
        }
        if settle {
            self.settle(&commitment, now)?;
            commitment.status = CommitmentStatus::Fulfilled;
        } else {
            commitment.status = CommitmentStatus::Cancelled;
        }
        commitment.updated_at = now;
        commitment.resolved_at = Some(now);
        self.store.put_commitment(&commitment)?;
        let kind = if settle {
            EventKind::CommitmentFulfilled {
                commitment_id: *id,
                value: commitment.value,
            }
        } else {
            EventKind::CommitmentCancelled { commitment_id: *id }
        };
        self.emit(kind, now)?;
        Ok(commitment)
    }

    // ── Queries and analytics ────────────────────────────────────────────────

    pub fn commitment(&self, id: &CommitmentId) -> Result<Commitment, CellError> {
        self.store
            .get_commitment(id)?
            .ok_or(CellError::CommitmentNotFound(*id))
    }

    pub fn for_member(&self, member: &MemberId) -> Result<Vec<Commitment>, CellError> {
        self.store.commitments_for_member(member)
    }

    pub fn by_status(&self, status: CommitmentStatus) -> Result<Vec<Commitment>, CellError> {
        self.store.commitments_by_status(status)
    }

    /// Capacity currently reserved against `member` as promisee, derived from
    /// the commitment set. Equals the ledger's reserve for the member; kept
    /// queryable separately for diagnostics.
    pub fn reserved_for_member(&self, member: &MemberId) -> Result<Credits, CellError> {
        Ok(self
            .store
            .all_commitments()?
            .iter()
            .filter(|c| c.holds_reserve() && c.promisee == *member)
            .map(|c| c.value)
            .sum())
    }

    /// Fulfilled ÷ (fulfilled + cancelled) for a category; None when nothing
    /// in the category has concluded yet.
    pub fn category_fulfillment_ratio(
        &self,
        category: TaskCategory,
    ) -> Result<Option<f64>, CellError> {
        let mut fulfilled = 0usize;
        let mut cancelled = 0usize;
        for c in self.store.all_commitments()? {
            if c.category != category {
                continue;
            }
            match c.status {
                CommitmentStatus::Fulfilled => fulfilled += 1,
                CommitmentStatus::Cancelled => cancelled += 1,
                _ => {}
            }
        }
        let total = fulfilled + cancelled;
        Ok((total > 0).then(|| fulfilled as f64 / total as f64))
    }

    pub fn counts_for_member(&self, member: &MemberId) -> Result<CommitmentCounts, CellError> {
        let mut counts = CommitmentCounts::default();
        for c in self.store.commitments_for_member(member)? {
            if c.promisor == *member {
                counts.as_promisor += 1;
            }
            if c.promisee == *member {
                counts.as_promisee += 1;
            }
            match c.status {
                CommitmentStatus::Active => counts.active += 1,
                CommitmentStatus::Fulfilled => counts.fulfilled += 1,
                CommitmentStatus::Cancelled => counts.cancelled += 1,
                CommitmentStatus::Disputed => counts.disputed += 1,
                CommitmentStatus::Proposed => {}
            }
        }
        Ok(counts)
    }

    /// Active commitments whose due date has passed.
    pub fn overdue(&self, now: TimestampMs) -> Result<Vec<Commitment>, CellError> {
        Ok(self
            .store
            .all_commitments()?
            .into_iter()
            .filter(|c| c.is_overdue(now))
            .collect())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
