//! Identity and membership: key-bound identities and the admission gates.
//!
//! Registration binds a public key to a derived member id and creates a
//! Pending ledger member. Admission honors the emergency policy's admission
//! mode: under stress, new members need a sponsor; under panic, additionally
//! a passed supermajority proposal. The initial limit is scaled by the
//! policy's new-member factor. Freezing, probation and exclusion delegate
//! their gates to the ledger's status machine.

use std::sync::{Arc, OnceLock};

use tracing::info;

use credcell_core::emergency::{AdmissionMode, EmergencyView, PolicyVector};
use credcell_core::error::CellError;
use credcell_core::identity::Identity;
use credcell_core::member::MemberStatus;
use credcell_core::types::{CellId, MemberId, ProposalId, PublicKey, TimestampMs};
use credcell_crypto::member_id_from_pubkey;
use credcell_ledger::Ledger;
use credcell_store::Store;

pub struct IdentityEngine {
    cell_id: CellId,
    ledger: Arc<Ledger>,
    store: Arc<Store>,
    emergency: OnceLock<Arc<dyn EmergencyView>>,
}

impl IdentityEngine {
    pub fn new(cell_id: CellId, ledger: Arc<Ledger>, store: Arc<Store>) -> Self {
        Self {
            cell_id,
            ledger,
            store,
            emergency: OnceLock::new(),
        }
    }

    /// Late-bind the emergency view. Before this is called, admission runs
    /// under the NORMAL policy.
    pub fn attach_emergency(&self, view: Arc<dyn EmergencyView>) {
        let _ = self.emergency.set(view);
    }

    fn policy(&self) -> PolicyVector {
        self.emergency
            .get()
            .map(|e| e.current_policy())
            .unwrap_or_default()
    }

    // ── Registration and admission ───────────────────────────────────────────

    /// Bind a public key to a fresh Pending member. The member id is derived
    /// from the key, so the binding is self-certifying.
    pub fn register(&self, public_key: PublicKey, now: TimestampMs) -> Result<Identity, CellError> {
        if let Some(existing) = self.store.identity_by_public_key(&public_key)? {
            return Err(CellError::IdentityExists(existing.member_id));
        }
        let member_id = member_id_from_pubkey(&public_key);
        let identity = Identity {
            member_id: member_id.clone(),
            public_key,
            cell_id: self.cell_id.clone(),
            created_at: now,
        };
        self.store.put_identity(&identity)?;
        self.ledger.add_pending_member(member_id.clone(), None, now)?;
        info!(member = %member_id, "identity registered");
        Ok(identity)
    }

    /// Admit a Pending member. The gate depends on the current admission mode:
    ///   Standard            — no extra requirement
    ///   Bonded              — an Active sponsor vouches (a governance
    ///                         approval counts as the council vouching)
    ///   SupermajorityBonded — a passed governance approval is mandatory
    /// The initial limit is the cell default scaled by the policy's
    /// new-member factor.
    pub fn admit(
        &self,
        member: &MemberId,
        sponsor: Option<&MemberId>,
        approval: Option<ProposalId>,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        let policy = self.policy();
        match policy.admission_mode {
            AdmissionMode::Standard => {}
            AdmissionMode::Bonded => {
                if approval.is_none() {
                    self.require_active_sponsor(sponsor)?;
                }
            }
            AdmissionMode::SupermajorityBonded => {
                if approval.is_none() {
                    return Err(CellError::ApprovalRequired);
                }
            }
        }

        let default_limit = self.ledger.parameters().default_limit;
        let limit = (default_limit as f64 * policy.new_member_limit_factor).floor() as i64;
        self.ledger.update_member_limit(member, limit, now)?;
        self.ledger
            .update_member_status(member, MemberStatus::Active, now)?;
        info!(member = %member, limit, "member admitted");
        Ok(())
    }

    fn require_active_sponsor(&self, sponsor: Option<&MemberId>) -> Result<(), CellError> {
        let sponsor = sponsor.ok_or(CellError::SponsorRequired)?;
        let state = self.ledger.member_state(sponsor)?;
        if state.status != MemberStatus::Active {
            return Err(CellError::MemberNotActive {
                member: sponsor.clone(),
                status: state.status,
            });
        }
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub fn freeze(&self, member: &MemberId, now: TimestampMs) -> Result<(), CellError> {
        self.ledger
            .update_member_status(member, MemberStatus::Frozen, now)
    }

    pub fn unfreeze(&self, member: &MemberId, now: TimestampMs) -> Result<(), CellError> {
        self.ledger
            .update_member_status(member, MemberStatus::Active, now)
    }

    pub fn start_probation(&self, member: &MemberId, now: TimestampMs) -> Result<(), CellError> {
        self.ledger
            .update_member_status(member, MemberStatus::Probation, now)
    }

    pub fn restore(&self, member: &MemberId, now: TimestampMs) -> Result<(), CellError> {
        self.ledger
            .update_member_status(member, MemberStatus::Active, now)
    }

    /// Exclude a member. The ledger refuses unless balance and reserve are
    /// both zero, so nobody exits carrying debt or holding escrow.
    pub fn exclude(&self, member: &MemberId, now: TimestampMs) -> Result<(), CellError> {
        self.ledger
            .update_member_status(member, MemberStatus::Excluded, now)
    }

    // ── Lookups ──────────────────────────────────────────────────────────────

    pub fn identity(&self, member: &MemberId) -> Result<Identity, CellError> {
        self.store
            .get_identity(member)?
            .ok_or_else(|| CellError::IdentityNotFound(member.clone()))
    }

    pub fn identity_by_public_key(&self, key: &PublicKey) -> Result<Option<Identity>, CellError> {
        self.store.identity_by_public_key(key)
    }

    pub fn public_key_of(&self, member: &MemberId) -> Result<PublicKey, CellError> {
        Ok(self.identity(member)?.public_key)
    }

    pub fn list(&self) -> Result<Vec<Identity>, CellError> {
        self.store.identities_for_cell(&self.cell_id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use credcell_core::emergency::RiskState;
    use credcell_core::params::CellParameters;
    use credcell_crypto::{CryptoProvider, StubCrypto};

    struct FixedPolicy(PolicyVector);

    impl EmergencyView for FixedPolicy {
        fn current_policy(&self) -> PolicyVector {
            self.0
        }
    }

    fn setup(name: &str) -> (IdentityEngine, Arc<Ledger>, StubCrypto) {
        let dir = std::env::temp_dir().join(format!("credcell_identity_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(Store::open(&dir).unwrap());
        let cell = CellId::new("valley");
        let ledger = Arc::new(
            Ledger::open(Arc::clone(&store), cell.clone(), CellParameters::default(), 0).unwrap(),
        );
        let engine = IdentityEngine::new(cell, Arc::clone(&ledger), store);
        (engine, ledger, StubCrypto::new())
    }

    const NOW: TimestampMs = 1_000;

    #[test]
    fn register_then_admit_standard() {
        let (engine, ledger, crypto) = setup("standard");
        let kp = crypto.generate_keypair();
        let identity = engine.register(kp.public_key.clone(), NOW).unwrap();

        let state = ledger.member_state(&identity.member_id).unwrap();
        assert_eq!(state.status, MemberStatus::Pending);

        engine.admit(&identity.member_id, None, None, NOW).unwrap();
        let state = ledger.member_state(&identity.member_id).unwrap();
        assert_eq!(state.status, MemberStatus::Active);
        assert_eq!(state.limit, 100);
    }

    #[test]
    fn duplicate_key_rejected() {
        let (engine, _, crypto) = setup("dupkey");
        let kp = crypto.generate_keypair();
        engine.register(kp.public_key.clone(), NOW).unwrap();
        let err = engine.register(kp.public_key.clone(), NOW).unwrap_err();
        assert_eq!(err.code(), "IDENTITY_EXISTS");
    }

    #[test]
    fn bonded_admission_needs_active_sponsor() {
        let (engine, ledger, crypto) = setup("bonded");
        engine.attach_emergency(Arc::new(FixedPolicy(PolicyVector::for_state(
            RiskState::Stressed,
        ))));
        let sponsor = MemberId::new("sponsor");
        ledger.add_member(sponsor.clone(), None, NOW).unwrap();

        let kp = crypto.generate_keypair();
        let identity = engine.register(kp.public_key.clone(), NOW).unwrap();

        let err = engine.admit(&identity.member_id, None, None, NOW).unwrap_err();
        assert_eq!(err.code(), "SPONSOR_REQUIRED");

        engine
            .admit(&identity.member_id, Some(&sponsor), None, NOW)
            .unwrap();
        // Stressed policy halves the entry limit.
        let state = ledger.member_state(&identity.member_id).unwrap();
        assert_eq!(state.limit, 50);
    }

    #[test]
    fn supermajority_admission_needs_approval() {
        let (engine, ledger, crypto) = setup("supermajority");
        engine.attach_emergency(Arc::new(FixedPolicy(PolicyVector::for_state(
            RiskState::Panic,
        ))));
        let sponsor = MemberId::new("sponsor");
        ledger.add_member(sponsor.clone(), None, NOW).unwrap();

        let kp = crypto.generate_keypair();
        let identity = engine.register(kp.public_key.clone(), NOW).unwrap();

        let err = engine
            .admit(&identity.member_id, Some(&sponsor), None, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "APPROVAL_REQUIRED");

        engine
            .admit(
                &identity.member_id,
                Some(&sponsor),
                Some(credcell_core::types::ProposalId::digest(b"approval")),
                NOW,
            )
            .unwrap();
        assert_eq!(ledger.member_state(&identity.member_id).unwrap().limit, 25);
    }

    #[test]
    fn freeze_unfreeze_cycle() {
        let (engine, ledger, _) = setup("freeze");
        let alice = MemberId::new("alice");
        ledger.add_member(alice.clone(), None, NOW).unwrap();

        engine.freeze(&alice, NOW).unwrap();
        assert_eq!(
            ledger.member_state(&alice).unwrap().status,
            MemberStatus::Frozen
        );
        engine.unfreeze(&alice, NOW).unwrap();
        assert_eq!(
            ledger.member_state(&alice).unwrap().status,
            MemberStatus::Active
        );
    }
}
