//! End-to-end scenarios over a fully wired cell.
//!
//! Each test opens a fresh cell on a temp sled directory with the stub
//! crypto double, drives a cross-engine flow, and checks the cell-wide
//! invariants at the end: conservation, floors, escrow safety, exposure cap.
//!
//! Run with:
//!   cargo test -p credcell-node --test scenarios

use std::sync::Arc;

use credcell_core::commitment::{CommitmentKind, CommitmentStatus};
use credcell_core::emergency::{RiskState, TransitionAuthority};
use credcell_core::federation::{FederationStatus, FederationTxStatus, QuarantineReason};
use credcell_core::governance::{CouncilRole, ProposalAction, VoteChoice};
use credcell_core::member::BalanceUpdate;
use credcell_core::params::FederationParameters;
use credcell_core::scheduler::{MemberSupply, TaskCategory};
use credcell_core::types::{CellId, MemberId, ProposalId, TimestampMs};
use credcell_crypto::{CryptoProvider, KeyPair, StubCrypto};
use credcell_node::{Cell, CellConfig};

const NOW: TimestampMs = 1_000_000;

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn open_cell(name: &str, config: CellConfig) -> Cell {
    let dir = std::env::temp_dir().join(format!("credcell_scenario_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    let crypto: Arc<dyn CryptoProvider> = Arc::new(StubCrypto::new());
    Cell::open(&dir, CellId::new("cell-a"), config, crypto, NOW).expect("open cell")
}

/// Register and admit a member through the identity engine; returns its
/// keypair (the derived id is `kp.member_id`).
fn admit(cell: &Cell, limit: Option<i64>) -> KeyPair {
    let kp = cell.crypto.generate_keypair();
    cell.identities.register(kp.public_key.clone(), NOW).unwrap();
    cell.identities.admit(&kp.member_id, None, None, NOW).unwrap();
    if let Some(limit) = limit {
        cell.ledger.update_member_limit(&kp.member_id, limit, NOW).unwrap();
    }
    kp
}

/// Full dual-signature payment through the transaction engine.
fn pay(cell: &Cell, payer: &KeyPair, payee: &KeyPair, amount: i64) -> Result<(), String> {
    let tx = cell
        .transactions
        .create_spot(
            payer.member_id.clone(),
            payee.member_id.clone(),
            amount,
            "scenario payment",
            NOW,
        )
        .map_err(|e| e.code().to_string())?;
    let bytes = tx.signing_bytes();
    let payer_sig = cell.crypto.sign(&bytes, payer.secret_key_bytes()).unwrap();
    let payee_sig = cell.crypto.sign(&bytes, payee.secret_key_bytes()).unwrap();
    cell.transactions.sign_as_payer(&tx.tx_id, payer_sig).unwrap();
    cell.transactions.sign_as_payee(&tx.tx_id, payee_sig).unwrap();
    cell.transactions
        .execute(&tx.tx_id, NOW)
        .map(|_| ())
        .map_err(|e| e.code().to_string())
}

/// The federation scenario cell: 2,000 aggregate capacity, alice at +500,
/// base beta 0.3 → exposure cap 600, an active link to cell-b.
fn federation_cell(name: &str) -> (Cell, MemberId) {
    let config = CellConfig {
        federation: FederationParameters {
            base_beta_factor: 0.3,
            ..FederationParameters::default()
        },
        ..CellConfig::default()
    };
    let cell = open_cell(name, config);
    let alice = MemberId::new("alice");
    let bob = MemberId::new("bob");
    cell.ledger.add_member(alice.clone(), Some(1_000), NOW).unwrap();
    cell.ledger.add_member(bob.clone(), Some(1_000), NOW).unwrap();
    cell.ledger
        .apply_balance_updates(
            &[
                BalanceUpdate::new(bob, -500, "seed"),
                BalanceUpdate::new(alice.clone(), 500, "seed"),
            ],
            NOW,
        )
        .unwrap();
    cell.federation.recompute_exposure_cap(NOW).unwrap();
    assert_eq!(cell.federation.federation_state().exposure_cap, 600);

    cell.federation
        .propose_link(CellId::new("cell-b"), "bilateral trade", NOW)
        .unwrap();
    cell.federation.accept_link(&CellId::new("cell-b"), NOW).unwrap();
    (cell, alice)
}

// ── S1: simple payment ────────────────────────────────────────────────────────

#[test]
fn s1_simple_payment() {
    let cell = open_cell("s1", CellConfig::default());
    let alice = admit(&cell, None);
    let bob = admit(&cell, None);

    pay(&cell, &alice, &bob, 50).unwrap();

    assert_eq!(cell.ledger.member_state(&alice.member_id).unwrap().balance, -50);
    assert_eq!(cell.ledger.member_state(&bob.member_id).unwrap().balance, 50);
    assert!(cell.verify_invariants());
}

// ── S2: floor refusal ─────────────────────────────────────────────────────────

#[test]
fn s2_floor_refusal_leaves_state_unchanged() {
    let cell = open_cell("s2", CellConfig::default());
    let alice = admit(&cell, Some(50));
    let bob = admit(&cell, Some(100));

    let before = cell.ledger.all_member_states();
    let err = pay(&cell, &alice, &bob, 51).unwrap_err();
    assert_eq!(err, "INSUFFICIENT_CAPACITY");

    // The raw update set hits the floor check directly.
    let err = cell
        .ledger
        .apply_balance_updates(
            &[
                BalanceUpdate::new(alice.member_id.clone(), -51, "overreach"),
                BalanceUpdate::new(bob.member_id.clone(), 51, "overreach"),
            ],
            NOW,
        )
        .unwrap_err();
    assert_eq!(err.code(), "FLOOR_VIOLATION");
    assert_eq!(cell.ledger.all_member_states(), before);
    assert!(cell.verify_invariants());
}

// ── S3 / S4: escrowed commitment round-trip and settlement ────────────────────

#[test]
fn s3_escrowed_commitment_cancel_restores_state() {
    let cell = open_cell("s3", CellConfig::default());
    let alice = admit(&cell, None);
    let bob = admit(&cell, None);

    let commitment = cell
        .commitments
        .create(
            CommitmentKind::Escrowed,
            alice.member_id.clone(),
            bob.member_id.clone(),
            30,
            TaskCategory::General,
            None,
            NOW,
        )
        .unwrap();
    assert_eq!(cell.ledger.member_state(&bob.member_id).unwrap().reserve, 30);

    cell.commitments.cancel(&alice.member_id, &commitment.id, NOW).unwrap();
    let bob_state = cell.ledger.member_state(&bob.member_id).unwrap();
    assert_eq!(bob_state.reserve, 0);
    assert_eq!(bob_state.balance, 0);
    assert_eq!(cell.ledger.member_state(&alice.member_id).unwrap().balance, 0);
    assert!(cell.verify_invariants());
}

#[test]
fn s4_escrowed_commitment_settlement() {
    let cell = open_cell("s4", CellConfig::default());
    let alice = admit(&cell, None);
    let bob = admit(&cell, None);

    let commitment = cell
        .commitments
        .create(
            CommitmentKind::Escrowed,
            alice.member_id.clone(),
            bob.member_id.clone(),
            30,
            TaskCategory::General,
            None,
            NOW,
        )
        .unwrap();
    cell.commitments.fulfill(&bob.member_id, &commitment.id, NOW).unwrap();

    let bob_state = cell.ledger.member_state(&bob.member_id).unwrap();
    assert_eq!(bob_state.reserve, 0);
    assert_eq!(bob_state.balance, -30);
    assert_eq!(cell.ledger.member_state(&alice.member_id).unwrap().balance, 30);
    assert!(cell.verify_invariants());
}

// ── S5: federation transfer and rollback ──────────────────────────────────────

#[test]
fn s5_federation_transfer_and_rollback() {
    let (cell, alice) = federation_cell("s5");
    let peer = CellId::new("cell-b");

    let tx = cell
        .federation
        .execute_transfer(&peer, &alice, "remote-payee", 100, NOW)
        .unwrap();
    assert_eq!(tx.status, FederationTxStatus::SourceConfirmed);
    assert_eq!(cell.federation.federation_state().federation_position, 100);
    assert_eq!(
        cell.ledger
            .member_state(cell.federation.clearing_account())
            .unwrap()
            .balance,
        100
    );
    assert_eq!(cell.ledger.member_state(&alice).unwrap().balance, 400);

    let rolled = cell
        .federation
        .rollback_transfer(&tx.id, "peer never confirmed", NOW + 1)
        .unwrap();
    assert!(matches!(rolled.status, FederationTxStatus::RolledBack { .. }));
    assert_eq!(cell.federation.federation_state().federation_position, 0);
    assert_eq!(cell.ledger.member_state(&alice).unwrap().balance, 500);
    assert_eq!(
        cell.ledger
            .member_state(cell.federation.clearing_account())
            .unwrap()
            .balance,
        0
    );
    assert_eq!(cell.federation.link(&peer).unwrap().bilateral_position, 0);
    assert!(cell.verify_invariants());
}

// ── S6: PANIC freezes federation ──────────────────────────────────────────────

#[test]
fn s6_panic_freezes_federation_and_preserves_position() {
    let (cell, alice) = federation_cell("s6");
    let peer = CellId::new("cell-b");
    cell.federation
        .execute_transfer(&peer, &alice, "remote-payee", 100, NOW)
        .unwrap();

    // Governance override walks the chain NORMAL → STRESSED → PANIC.
    for (i, target) in [RiskState::Stressed, RiskState::Panic].iter().enumerate() {
        cell.emergency
            .transition(
                *target,
                "governance override",
                TransitionAuthority::Governance {
                    approval: ProposalId::digest(&[i as u8]),
                    initiator: alice.clone(),
                    forced: false,
                },
                NOW + i as i64,
            )
            .unwrap();
    }
    assert_eq!(cell.emergency.risk_state(), RiskState::Panic);

    let err = cell
        .federation
        .execute_transfer(&peer, &alice, "remote-payee", 10, NOW + 10)
        .unwrap_err();
    assert_eq!(err.code(), "FEDERATION_FROZEN");

    // Recomputing the cap under beta 0 quarantines the cell as PANIC_MODE;
    // the existing position survives untouched.
    cell.federation.recompute_exposure_cap(NOW + 11).unwrap();
    let state = cell.federation.federation_state();
    assert_eq!(state.federation_position, 100);
    assert!(matches!(
        state.status,
        FederationStatus::Quarantined {
            reason: QuarantineReason::PanicMode,
            ..
        }
    ));
    assert!(cell.verify_invariants());
}

// ── S7: debtor-priority matching ──────────────────────────────────────────────

#[test]
fn s7_scheduler_matching_prefers_the_debtor_under_stress() {
    let cell = open_cell("s7", CellConfig::default());
    let debtor = MemberId::new("debtor");
    let creditor = MemberId::new("creditor");
    for id in [&debtor, &creditor] {
        cell.ledger.add_member(id.clone(), Some(100), NOW).unwrap();
    }
    cell.ledger
        .apply_balance_updates(
            &[
                BalanceUpdate::new(debtor.clone(), -80, "seed"),
                BalanceUpdate::new(creditor.clone(), 80, "seed"),
            ],
            NOW,
        )
        .unwrap();
    for id in [&debtor, &creditor] {
        cell.scheduler
            .upsert_supply(MemberSupply {
                member_id: id.clone(),
                weekly_available_hours: 10.0,
                skills: [(TaskCategory::Food, 0.5)].into_iter().collect(),
                preferred_categories: Vec::new(),
                constraints: Vec::new(),
                updated_at: NOW,
            })
            .unwrap();
    }

    // STRESSED enables debtor-priority matching.
    cell.emergency
        .transition(
            RiskState::Stressed,
            "drill",
            TransitionAuthority::Governance {
                approval: ProposalId::digest(b"drill"),
                initiator: debtor.clone(),
                forced: false,
            },
            NOW,
        )
        .unwrap();

    let week_start = NOW;
    let slot = cell
        .scheduler
        .create_slot(
            TaskCategory::Food,
            week_start + 3_600_000,
            week_start + 2 * 3_600_000,
            4.0,
            4,
            1,
            None,
            "harvest shift",
            NOW,
        )
        .unwrap();
    let report = cell.scheduler.run_matching(week_start, NOW).unwrap();
    assert_eq!(report.assignments, vec![(slot.slot_id, debtor)]);
}

// ── Governance end-to-end: proposal drives the risk machine ───────────────────

#[test]
fn governance_proposal_flows_into_emergency_and_federation() {
    let (cell, alice) = federation_cell("gov_e2e");
    let peer = CellId::new("cell-b");
    let bob = MemberId::new("bob");

    for id in [&alice, &bob] {
        cell.governance
            .add_council_member(id.clone(), CouncilRole::Member, None, NOW)
            .unwrap();
    }
    let proposal = cell
        .governance
        .submit_proposal(
            alice.clone(),
            ProposalAction::EmergencyStateChange {
                target: RiskState::Panic,
                forced: false,
            },
            "supply shock",
            NOW,
        )
        .unwrap();
    for voter in [&alice, &bob] {
        cell.governance
            .vote(voter.clone(), &proposal.id, VoteChoice::Approve, NOW)
            .unwrap();
    }
    cell.governance.close_voting(&proposal.id, NOW + 1).unwrap();
    cell.governance.execute_proposal(&proposal.id, NOW + 2).unwrap();

    assert_eq!(cell.emergency.risk_state(), RiskState::Panic);
    let err = cell
        .federation
        .execute_transfer(&peer, &alice, "remote", 10, NOW + 3)
        .unwrap_err();
    assert_eq!(err.code(), "FEDERATION_FROZEN");
}

// ── Offline queue over a wired cell ──────────────────────────────────────────

#[test]
fn offline_queue_executes_in_order() {
    let cell = open_cell("queue_e2e", CellConfig::default());
    let alice = admit(&cell, None);
    let bob = admit(&cell, None);

    let mut ids = Vec::new();
    for amount in [10, 20] {
        let tx = cell
            .transactions
            .create_spot(
                alice.member_id.clone(),
                bob.member_id.clone(),
                amount,
                "queued",
                NOW,
            )
            .unwrap();
        let bytes = tx.signing_bytes();
        let ps = cell.crypto.sign(&bytes, alice.secret_key_bytes()).unwrap();
        let qs = cell.crypto.sign(&bytes, bob.secret_key_bytes()).unwrap();
        cell.transactions.sign_as_payer(&tx.tx_id, ps).unwrap();
        cell.transactions.sign_as_payee(&tx.tx_id, qs).unwrap();
        cell.transactions.enqueue(&tx.tx_id, NOW).unwrap();
        ids.push(tx.tx_id);
    }

    let report = cell.transactions.drain_queue(NOW + 1).unwrap();
    assert_eq!(report.executed, ids);
    assert!(report.requeued.is_empty());
    assert_eq!(cell.ledger.member_state(&alice.member_id).unwrap().balance, -30);
    assert!(cell.verify_invariants());
}

// ── Lifecycle: exclusion requires a settled position ─────────────────────────

#[test]
fn exclusion_gate_holds_through_identity_engine() {
    let cell = open_cell("exclusion", CellConfig::default());
    let alice = admit(&cell, None);
    let bob = admit(&cell, None);
    pay(&cell, &alice, &bob, 25).unwrap();

    let err = cell.identities.exclude(&alice.member_id, NOW).unwrap_err();
    assert_eq!(err.code(), "MEMBER_HAS_OBLIGATIONS");

    pay(&cell, &bob, &alice, 25).unwrap();
    cell.identities.exclude(&alice.member_id, NOW).unwrap();
    assert!(cell.verify_invariants());
}

// ── Commitment disputes hold escrow until governance resolves ────────────────

#[test]
fn disputed_escrow_survives_until_resolution() {
    let cell = open_cell("dispute_e2e", CellConfig::default());
    let alice = admit(&cell, None);
    let bob = admit(&cell, None);
    let carol = admit(&cell, None);
    cell.governance
        .add_council_member(carol.member_id.clone(), CouncilRole::Chair, None, NOW)
        .unwrap();

    let commitment = cell
        .commitments
        .create(
            CommitmentKind::Escrowed,
            alice.member_id.clone(),
            bob.member_id.clone(),
            40,
            TaskCategory::ShelterRepair,
            None,
            NOW,
        )
        .unwrap();
    let dispute = cell
        .governance
        .file_dispute(
            bob.member_id.clone(),
            alice.member_id.clone(),
            Some(commitment.id),
            "roof still leaks",
            NOW,
        )
        .unwrap();
    assert_eq!(cell.ledger.member_state(&bob.member_id).unwrap().reserve, 40);

    cell.governance
        .assign_reviewer(&dispute.id, carol.member_id.clone(), NOW)
        .unwrap();
    cell.governance
        .resolve_dispute(
            &dispute.id,
            &carol.member_id,
            credcell_core::governance::DisputeOutcome::InFavorOfComplainant,
            &[credcell_core::governance::ResolutionAction::CancelCommitment(
                commitment.id,
            )],
            NOW + 5,
        )
        .unwrap();

    assert_eq!(cell.ledger.member_state(&bob.member_id).unwrap().reserve, 0);
    assert_eq!(
        cell.commitments.commitment(&commitment.id).unwrap().status,
        CommitmentStatus::Cancelled
    );
    assert!(cell.verify_invariants());
}
