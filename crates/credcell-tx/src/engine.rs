//! The Transaction Engine: dual-signature spot payments.
//!
//! A spot transaction is validated against the ledger snapshot at creation,
//! signed by both parties over the canonical payload, and fully re-validated
//! at execution time — the ledger may have drifted between the two. Both
//! signatures are verified against the signer's registered public key at
//! insertion time, never later.

use std::sync::Arc;

use tracing::{info, warn};

use credcell_core::error::CellError;
use credcell_core::member::{BalanceUpdate, MemberStatus};
use credcell_core::transaction::{QueuedTransaction, SpotTransaction, TransactionStatus};
use credcell_core::types::{Credits, MemberId, Signature, TimestampMs, TxId};
use credcell_crypto::CryptoProvider;
use credcell_identity::IdentityEngine;
use credcell_ledger::Ledger;
use credcell_store::Store;

pub struct TransactionEngine {
    ledger: Arc<Ledger>,
    identities: Arc<IdentityEngine>,
    store: Arc<Store>,
    crypto: Arc<dyn CryptoProvider>,
}

/// Outcome of one offline-queue drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub executed: Vec<TxId>,
    /// Items put back with their failure code.
    pub requeued: Vec<(TxId, String)>,
}

impl TransactionEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        identities: Arc<IdentityEngine>,
        store: Arc<Store>,
        crypto: Arc<dyn CryptoProvider>,
    ) -> Self {
        Self {
            ledger,
            identities,
            store,
            crypto,
        }
    }

    // ── Creation ─────────────────────────────────────────────────────────────

    /// Create a spot transaction: non-self, positive amount, both parties
    /// Active, and the payer can cover the amount right now. The id commits
    /// to the canonical signing payload including a fresh nonce.
    pub fn create_spot(
        &self,
        payer: MemberId,
        payee: MemberId,
        amount: Credits,
        description: impl Into<String>,
        now: TimestampMs,
    ) -> Result<SpotTransaction, CellError> {
        if payer == payee {
            return Err(CellError::SelfTransaction);
        }
        if amount <= 0 {
            return Err(CellError::InvalidAmount(amount));
        }
        self.require_active(&payer)?;
        self.require_active(&payee)?;
        if !self.ledger.can_spend(&payer, amount) {
            let available = self.ledger.available_capacity(&payer)?;
            return Err(CellError::InsufficientCapacity {
                member: payer,
                requested: amount,
                available,
            });
        }

        let mut tx = SpotTransaction {
            tx_id: TxId::from_bytes([0u8; 32]),
            payer,
            payee,
            amount,
            description: description.into(),
            nonce: hex::encode(self.crypto.generate_nonce()),
            created_at: now,
            status: TransactionStatus::Pending,
            payer_signature: None,
            payee_signature: None,
            executed_at: None,
            failure_code: None,
        };
        tx.tx_id = TxId::digest(&tx.signing_bytes());
        self.store.put_transaction(&tx)?;
        info!(tx = %tx.tx_id, payer = %tx.payer, payee = %tx.payee, amount, "spot transaction created");
        Ok(tx)
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

    // ── Signing ──────────────────────────────────────────────────────────────

    /// Attach the payer's signature, verifying it against the payer's
    /// registered key before accepting. Both signatures present advances the
    /// transaction to Ready.
    pub fn sign_as_payer(
        &self,
        tx_id: &TxId,
        signature: Signature,
    ) -> Result<SpotTransaction, CellError> {
        let mut tx = self.transaction(tx_id)?;
        let key = self.identities.public_key_of(&tx.payer)?;
        if !self.crypto.verify(&tx.signing_bytes(), &signature, &key) {
            return Err(CellError::InvalidPayerSignature);
        }
        tx.payer_signature = Some(signature);
        self.advance_if_fully_signed(&mut tx);
        self.store.put_transaction(&tx)?;
        Ok(tx)
    }

    /// Attach the payee's signature; verified the same way.
    pub fn sign_as_payee(
        &self,
        tx_id: &TxId,
        signature: Signature,
    ) -> Result<SpotTransaction, CellError> {
        let mut tx = self.transaction(tx_id)?;
        let key = self.identities.public_key_of(&tx.payee)?;
        if !self.crypto.verify(&tx.signing_bytes(), &signature, &key) {
            return Err(CellError::InvalidPayeeSignature);
        }
        tx.payee_signature = Some(signature);
        self.advance_if_fully_signed(&mut tx);
        self.store.put_transaction(&tx)?;
        Ok(tx)
    }

    fn advance_if_fully_signed(&self, tx: &mut SpotTransaction) {
        if tx.status == TransactionStatus::Pending && tx.is_fully_signed() {
            tx.status = TransactionStatus::Ready;
        }
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Execute a fully signed transaction.
    ///
    /// Re-validates everything: the ledger may have drifted since creation.
    /// A previously Failed transaction may be retried — re-validation runs in
    /// full each time. On a ledger refusal the transaction is marked Failed
    /// with the originating code, which is surfaced unchanged.
    pub fn execute(&self, tx_id: &TxId, now: TimestampMs) -> Result<SpotTransaction, CellError> {
        let mut tx = self.transaction(tx_id)?;
        match tx.status {
            TransactionStatus::Ready | TransactionStatus::Failed => {}
            status => {
                return Err(CellError::InvalidTransactionState {
                    tx: *tx_id,
                    status,
                    required: TransactionStatus::Ready,
                })
            }
        }
        if !tx.is_fully_signed() {
            return Err(CellError::InvalidTransactionState {
                tx: *tx_id,
                status: tx.status,
                required: TransactionStatus::Ready,
            });
        }

        let outcome = self.validate_and_apply(&tx, now);
        match outcome {
            Ok(()) => {
                tx.status = TransactionStatus::Executed;
                tx.executed_at = Some(now);
                tx.failure_code = None;
                self.store.put_transaction(&tx)?;
                info!(tx = %tx.tx_id, "transaction executed");
                Ok(tx)
            }
            Err(err) if err.is_deterministic() => {
                tx.status = TransactionStatus::Failed;
                tx.failure_code = Some(err.code().to_string());
                self.store.put_transaction(&tx)?;
                warn!(tx = %tx.tx_id, code = err.code(), "transaction failed");
                Err(err)
            }
            // Infrastructure faults bubble up without changing the record.
            Err(err) => Err(err),
        }
    }

    fn validate_and_apply(&self, tx: &SpotTransaction, now: TimestampMs) -> Result<(), CellError> {
        self.require_active(&tx.payer)?;
        self.require_active(&tx.payee)?;
        if !self.ledger.can_spend(&tx.payer, tx.amount) {
            let available = self.ledger.available_capacity(&tx.payer)?;
            return Err(CellError::InsufficientCapacity {
                member: tx.payer.clone(),
                requested: tx.amount,
                available,
            });
        }
        let updates = [
            BalanceUpdate::new(tx.payer.clone(), -tx.amount, "spot-payment")
                .with_reference(tx.tx_id.to_hex()),
            BalanceUpdate::new(tx.payee.clone(), tx.amount, "spot-payment")
                .with_reference(tx.tx_id.to_hex()),
        ];
        self.ledger.apply_balance_updates(&updates, now)?;
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn transaction(&self, tx_id: &TxId) -> Result<SpotTransaction, CellError> {
        self.store
            .get_transaction(tx_id)?
            .ok_or(CellError::TransactionNotFound(*tx_id))
    }

    pub fn transactions_for_member(
        &self,
        member: &MemberId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SpotTransaction>, CellError> {
        self.store.transactions_for_member(member, offset, limit)
    }

    // ── Offline queue ────────────────────────────────────────────────────────

    /// Queue a fully signed transaction for later execution.
    pub fn enqueue(&self, tx_id: &TxId, now: TimestampMs) -> Result<(), CellError> {
        let tx = self.transaction(tx_id)?;
        if !tx.is_fully_signed() {
            return Err(CellError::InvalidTransactionState {
                tx: *tx_id,
                status: tx.status,
                required: TransactionStatus::Ready,
            });
        }
        self.store.queue_push(&QueuedTransaction {
            tx_id: *tx_id,
            enqueued_at: now,
            attempts: 0,
            last_error: None,
        })
    }

    /// Drain the queue once, executing items in FIFO order. A deterministic
    /// refusal re-queues the item with its attempt count bumped and the
    /// failure code recorded; infrastructure faults re-queue and abort the
    /// pass.
    pub fn drain_queue(&self, now: TimestampMs) -> Result<DrainReport, CellError> {
        let mut report = DrainReport::default();
        let pass_size = self.store.queue_len();
        for _ in 0..pass_size {
            let Some(mut item) = self.store.queue_pop_front()? else {
                break;
            };
            match self.execute(&item.tx_id, now) {
                Ok(_) => report.executed.push(item.tx_id),
                Err(err) if err.is_deterministic() => {
                    item.attempts += 1;
                    item.last_error = Some(err.code().to_string());
                    self.store.queue_push(&item)?;
                    report.requeued.push((item.tx_id, err.code().to_string()));
                }
                Err(err) => {
                    self.store.queue_push(&item)?;
                    return Err(err);
                }
            }
        }
        Ok(report)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
