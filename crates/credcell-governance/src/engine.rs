//! Governance: council, proposals with exhaustive action dispatch, disputes.
//!
//! The council votes; any active member may propose. A closed vote first
//! applies the quorum (half the council must have voted), then the approval
//! threshold of the action's category. Execution dispatches the tagged
//! action to the authoritative engine — governance never edits ledger state
//! directly.

use std::sync::Arc;

use tracing::info;

use credcell_core::emergency::TransitionAuthority;
use credcell_core::error::CellError;
use credcell_core::events::{Event, EventKind};
use credcell_core::governance::{
    CouncilMember, CouncilRole, Dispute, DisputeOutcome, DisputeStatus, Evidence, Proposal,
    ProposalAction, ProposalStatus, ResolutionAction, Vote, VoteChoice,
};
use credcell_core::member::MemberStatus;
use credcell_core::params::GovernanceParameters;
use credcell_core::types::{
    CellId, CommitmentId, DisputeId, MemberId, ProposalId, TimestampMs,
};
use credcell_commitment::CommitmentEngine;
use credcell_emergency::EmergencyEngine;
use credcell_identity::IdentityEngine;
use credcell_ledger::Ledger;
use credcell_store::Store;
use credcell_tx::TransactionEngine;

pub struct GovernanceEngine {
    cell_id: CellId,
    store: Arc<Store>,
    ledger: Arc<Ledger>,
    identities: Arc<IdentityEngine>,
    commitments: Arc<CommitmentEngine>,
    transactions: Arc<TransactionEngine>,
    emergency: Arc<EmergencyEngine>,
    params: GovernanceParameters,
}

impl GovernanceEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cell_id: CellId,
        store: Arc<Store>,
        ledger: Arc<Ledger>,
        identities: Arc<IdentityEngine>,
        commitments: Arc<CommitmentEngine>,
        transactions: Arc<TransactionEngine>,
        emergency: Arc<EmergencyEngine>,
        params: GovernanceParameters,
    ) -> Self {
        Self {
            cell_id,
            store,
            ledger,
            identities,
            commitments,
            transactions,
            emergency,
            params,
        }
    }

    fn emit(&self, kind: EventKind, now: TimestampMs) -> Result<(), CellError> {
        let seq = self.store.next_event_seq()?;
        self.store
            .append_event(&Event::new(self.cell_id.clone(), seq, now, kind))
    }

    // ── Council ──────────────────────────────────────────────────────────────

    pub fn add_council_member(
        &self,
        member: MemberId,
        role: CouncilRole,
        term_ends_at: Option<TimestampMs>,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        let state = self.ledger.member_state(&member)?;
        if state.status != MemberStatus::Active {
            return Err(CellError::MemberNotActive {
                member,
                status: state.status,
            });
        }
        self.store.put_council_member(&CouncilMember {
            member_id: member,
            role,
            appointed_at: now,
            term_ends_at,
        })
    }

    pub fn remove_council_member(&self, member: &MemberId) -> Result<(), CellError> {
        self.store.remove_council_member(member)
    }

    pub fn council(&self) -> Result<Vec<CouncilMember>, CellError> {
        self.store.all_council_members()
    }

    pub fn is_council_member(&self, member: &MemberId) -> Result<bool, CellError> {
        Ok(self.store.get_council_member(member)?.is_some())
    }

    // ── Proposals ────────────────────────────────────────────────────────────

    /// Open a proposal. Any active member may propose; only the council votes.
    pub fn submit_proposal(
        &self,
        proposer: MemberId,
        action: ProposalAction,
        description: impl Into<String>,
        now: TimestampMs,
    ) -> Result<Proposal, CellError> {
        let state = self.ledger.member_state(&proposer)?;
        if state.status != MemberStatus::Active {
            return Err(CellError::MemberNotActive {
                member: proposer,
                status: state.status,
            });
        }

        let mut seed = proposer.as_str().as_bytes().to_vec();
        seed.extend_from_slice(&now.to_be_bytes());
        seed.extend_from_slice(&self.store.next_record_seq()?.to_be_bytes());

        let proposal = Proposal {
            id: ProposalId::digest(&seed),
            proposer: proposer.clone(),
            action,
            description: description.into(),
            status: ProposalStatus::Open,
            opened_at: now,
            closes_at: now + self.params.voting_duration_ms,
            votes: Vec::new(),
            closed_at: None,
            executed_at: None,
        };
        self.store.put_proposal(&proposal)?;
        self.emit(
            EventKind::ProposalCreated {
                proposal_id: proposal.id,
                proposer,
            },
            now,
        )?;
        Ok(proposal)
    }

    /// Cast a council vote. Duplicates and late votes are rejected.
    pub fn vote(
        &self,
        voter: MemberId,
        proposal_id: &ProposalId,
        choice: VoteChoice,
        now: TimestampMs,
    ) -> Result<Proposal, CellError> {
        let mut proposal = self.proposal(proposal_id)?;
        if proposal.status != ProposalStatus::Open || now > proposal.closes_at {
            return Err(CellError::VotingClosed(*proposal_id));
        }
        if !self.is_council_member(&voter)? {
            return Err(CellError::NotCouncilMember(voter));
        }
        if proposal.has_voted(&voter) {
            return Err(CellError::AlreadyVoted {
                proposal: *proposal_id,
                member: voter,
            });
        }
        proposal.votes.push(Vote {
            voter: voter.clone(),
            choice,
            cast_at: now,
        });
        self.store.put_proposal(&proposal)?;
        self.emit(
            EventKind::VoteCast {
                proposal_id: *proposal_id,
                voter,
                choice,
            },
            now,
        )?;
        Ok(proposal)
    }

    /// Close voting: quorum first, then the category's approval threshold
    /// over the votes actually cast.
    pub fn close_voting(
        &self,
        proposal_id: &ProposalId,
        now: TimestampMs,
    ) -> Result<Proposal, CellError> {
        let mut proposal = self.proposal(proposal_id)?;
        if proposal.status != ProposalStatus::Open {
            return Err(CellError::VotingClosed(*proposal_id));
        }

        let council_size = self.council()?.len();
        let votes = proposal.votes.len();
        let approvals = proposal.approvals();

        let quorum_met =
            council_size > 0 && (votes as f64 / council_size as f64) >= self.params.quorum;
        let threshold = proposal.action.category().threshold();
        let passed =
            quorum_met && votes > 0 && (approvals as f64 / votes as f64) >= threshold;

        proposal.status = if passed {
            ProposalStatus::Passed
        } else {
            ProposalStatus::Rejected
        };
        proposal.closed_at = Some(now);
        self.store.put_proposal(&proposal)?;
        self.emit(
            EventKind::VotingClosed {
                proposal_id: *proposal_id,
                result: proposal.status,
                approvals,
                votes,
            },
            now,
        )?;
        info!(proposal = %proposal_id, result = ?proposal.status, approvals, votes, "voting closed");
        Ok(proposal)
    }

    /// Execute a passed proposal by dispatching its action to the
    /// authoritative engine.
    pub fn execute_proposal(
        &self,
        proposal_id: &ProposalId,
        now: TimestampMs,
    ) -> Result<Proposal, CellError> {
        let mut proposal = self.proposal(proposal_id)?;
        if proposal.status != ProposalStatus::Passed {
            return Err(CellError::ProposalNotPassed(*proposal_id));
        }

        match proposal.action.clone() {
            ProposalAction::Admission { candidate } => {
                self.identities.admit(&candidate, None, Some(*proposal_id), now)?;
            }
            ProposalAction::Exclusion { member } => {
                self.ledger
                    .update_member_status(&member, MemberStatus::Excluded, now)?;
                self.store.remove_council_member(&member)?;
            }
            ProposalAction::LimitAdjustment { member, new_limit } => {
                self.ledger.update_member_limit(&member, new_limit, now)?;
            }
            ProposalAction::CommitmentCancellation { commitment } => {
                self.commitments.cancel_by_governance(&commitment, now)?;
            }
            ProposalAction::EmergencyStateChange { target, forced } => {
                self.emergency.transition(
                    target,
                    "governance proposal",
                    TransitionAuthority::Governance {
                        approval: *proposal_id,
                        initiator: proposal.proposer.clone(),
                        forced,
                    },
                    now,
                )?;
            }
            ProposalAction::ParameterChange { update } => {
                self.ledger.update_parameters(&update, now)?;
            }
            ProposalAction::DisputeResolution {
                dispute,
                outcome,
                actions,
            } => {
                let record = self.dispute(&dispute)?;
                self.apply_resolution(record, outcome, &actions, now)?;
            }
        }

        proposal.status = ProposalStatus::Executed;
        proposal.executed_at = Some(now);
        self.store.put_proposal(&proposal)?;
        self.emit(
            EventKind::ProposalExecuted {
                proposal_id: *proposal_id,
            },
            now,
        )?;
        info!(proposal = %proposal_id, "proposal executed");
        Ok(proposal)
    }

    pub fn proposal(&self, id: &ProposalId) -> Result<Proposal, CellError> {
        self.store
            .get_proposal(id)?
            .ok_or(CellError::ProposalNotFound(*id))
    }

    pub fn proposals(&self) -> Result<Vec<Proposal>, CellError> {
        self.store.all_proposals()
    }

    // ── Disputes ─────────────────────────────────────────────────────────────

    /// File a dispute. If it concerns a commitment, the commitment is marked
    /// disputed too (holding any escrow until resolution).
    pub fn file_dispute(
        &self,
        complainant: MemberId,
        respondent: MemberId,
        commitment: Option<CommitmentId>,
        reason: impl Into<String>,
        now: TimestampMs,
    ) -> Result<Dispute, CellError> {
        if complainant == respondent {
            return Err(CellError::SelfTransaction);
        }
        self.ledger.member_state(&complainant)?;
        self.ledger.member_state(&respondent)?;
        if let Some(cid) = commitment {
            self.commitments.dispute(&complainant, &cid, now)?;
        }

        let mut seed = complainant.as_str().as_bytes().to_vec();
        seed.extend_from_slice(respondent.as_str().as_bytes());
        seed.extend_from_slice(&now.to_be_bytes());
        seed.extend_from_slice(&self.store.next_record_seq()?.to_be_bytes());

        let dispute = Dispute {
            id: DisputeId::digest(&seed),
            complainant: complainant.clone(),
            respondent: respondent.clone(),
            commitment,
            reason: reason.into(),
            status: DisputeStatus::Filed,
            reviewer: None,
            evidence: Vec::new(),
            outcome: None,
            filed_at: now,
            resolved_at: None,
        };
        self.store.put_dispute(&dispute)?;
        self.emit(
            EventKind::DisputeFiled {
                dispute_id: dispute.id,
                complainant,
                respondent,
            },
            now,
        )?;
        Ok(dispute)
    }

    /// Assign a reviewer: must be council and must not be a party.
    pub fn assign_reviewer(
        &self,
        dispute_id: &DisputeId,
        reviewer: MemberId,
        now: TimestampMs,
    ) -> Result<Dispute, CellError> {
        let mut dispute = self.dispute(dispute_id)?;
        if dispute.status != DisputeStatus::Filed {
            return Err(CellError::InvalidDisputeState(*dispute_id));
        }
        if !self.is_council_member(&reviewer)? {
            return Err(CellError::NotCouncilMember(reviewer));
        }
        if dispute.is_party(&reviewer) {
            return Err(CellError::ReviewerIsParty {
                dispute: *dispute_id,
            });
        }
        dispute.reviewer = Some(reviewer.clone());
        dispute.status = DisputeStatus::UnderReview;
        self.store.put_dispute(&dispute)?;
        self.emit(
            EventKind::DisputeReviewerAssigned {
                dispute_id: *dispute_id,
                reviewer,
            },
            now,
        )?;
        Ok(dispute)
    }

    /// Append evidence. Only parties and the reviewer may, and only while the
    /// dispute is open.
    pub fn append_evidence(
        &self,
        dispute_id: &DisputeId,
        author: MemberId,
        description: impl Into<String>,
        now: TimestampMs,
    ) -> Result<Dispute, CellError> {
        let mut dispute = self.dispute(dispute_id)?;
        if dispute.status == DisputeStatus::Resolved {
            return Err(CellError::InvalidDisputeState(*dispute_id));
        }
        if !dispute.may_submit_evidence(&author) {
            return Err(CellError::DisputeUnauthorized {
                dispute: *dispute_id,
                member: author,
            });
        }
        dispute.evidence.push(Evidence {
            submitted_by: author,
            submitted_at: now,
            description: description.into(),
        });
        self.store.put_dispute(&dispute)?;
        Ok(dispute)
    }

    /// The assigned reviewer resolves the dispute, ordering remedies.
    pub fn resolve_dispute(
        &self,
        dispute_id: &DisputeId,
        resolver: &MemberId,
        outcome: DisputeOutcome,
        actions: &[ResolutionAction],
        now: TimestampMs,
    ) -> Result<Dispute, CellError> {
        let dispute = self.dispute(dispute_id)?;
        if dispute.status != DisputeStatus::UnderReview {
            return Err(CellError::InvalidDisputeState(*dispute_id));
        }
        if dispute.reviewer.as_ref() != Some(resolver) {
            return Err(CellError::DisputeUnauthorized {
                dispute: *dispute_id,
                member: resolver.clone(),
            });
        }
        self.apply_resolution(dispute, outcome, actions, now)
    }

    fn apply_resolution(
        &self,
        mut dispute: Dispute,
        outcome: DisputeOutcome,
        actions: &[ResolutionAction],
        now: TimestampMs,
    ) -> Result<Dispute, CellError> {
        if dispute.status == DisputeStatus::Resolved {
            return Err(CellError::InvalidDisputeState(dispute.id));
        }
        for action in actions {
            match action {
                ResolutionAction::CancelCommitment(id) => {
                    self.commitments.cancel_by_governance(id, now)?;
                }
                ResolutionAction::SettleCommitment(id) => {
                    self.commitments.resolve_disputed(id, true, now)?;
                }
                ResolutionAction::Compensation { from, to, amount } => {
                    // Ordered as a regular dual-signature transaction; the
                    // parties sign and execute it through the normal flow.
                    self.transactions.create_spot(
                        from.clone(),
                        to.clone(),
                        *amount,
                        format!("dispute compensation ({})", dispute.id),
                        now,
                    )?;
                }
            }
        }
        dispute.status = DisputeStatus::Resolved;
        dispute.outcome = Some(outcome);
        dispute.resolved_at = Some(now);
        self.store.put_dispute(&dispute)?;
        self.emit(
            EventKind::DisputeResolved {
                dispute_id: dispute.id,
                outcome,
            },
            now,
        )?;
        info!(dispute = %dispute.id, ?outcome, "dispute resolved");
        Ok(dispute)
    }

    pub fn dispute(&self, id: &DisputeId) -> Result<Dispute, CellError> {
        self.store
            .get_dispute(id)?
            .ok_or(CellError::DisputeNotFound(*id))
    }

    pub fn disputes(&self) -> Result<Vec<Dispute>, CellError> {
        self.store.all_disputes()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use credcell_core::commitment::CommitmentKind;
    use credcell_core::emergency::{EmergencyView, RiskState};
    use credcell_core::params::{CellParameters, EmergencyThresholds};
    use credcell_core::scheduler::TaskCategory;
    use credcell_crypto::{CryptoProvider, StubCrypto};

    const NOW: TimestampMs = 1_000;

    struct Fixture {
        gov: GovernanceEngine,
        ledger: Arc<Ledger>,
        commitments: Arc<CommitmentEngine>,
        emergency: Arc<EmergencyEngine>,
    }

    fn setup(name: &str) -> Fixture {
        let dir = std::env::temp_dir().join(format!("credcell_governance_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(Store::open(&dir).unwrap());
        let cell = CellId::new("valley");
        let ledger = Arc::new(
            Ledger::open(Arc::clone(&store), cell.clone(), CellParameters::default(), 0).unwrap(),
        );
        let identities = Arc::new(IdentityEngine::new(
            cell.clone(),
            Arc::clone(&ledger),
            Arc::clone(&store),
        ));
        let commitments = Arc::new(CommitmentEngine::new(
            cell.clone(),
            Arc::clone(&ledger),
            Arc::clone(&store),
        ));
        let crypto = Arc::new(StubCrypto::new()) as Arc<dyn CryptoProvider>;
        let transactions = Arc::new(TransactionEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&identities),
            Arc::clone(&store),
            crypto,
        ));
        let emergency = Arc::new(
            EmergencyEngine::open(
                cell.clone(),
                Arc::clone(&ledger),
                Arc::clone(&store),
                EmergencyThresholds::default(),
                0,
            )
            .unwrap(),
        );

        for name in ["alice", "bob", "carol", "dave"] {
            ledger.add_member(MemberId::new(name), None, NOW).unwrap();
        }

        let gov = GovernanceEngine::new(
            cell,
            store,
            Arc::clone(&ledger),
            identities,
            Arc::clone(&commitments),
            transactions,
            Arc::clone(&emergency),
            GovernanceParameters::default(),
        );
        for name in ["alice", "bob", "carol"] {
            let role = if name == "alice" {
                CouncilRole::Chair
            } else {
                CouncilRole::Member
            };
            gov.add_council_member(MemberId::new(name), role, None, NOW)
                .unwrap();
        }
        Fixture {
            gov,
            ledger,
            commitments,
            emergency,
        }
    }

    #[test]
    fn routine_proposal_passes_and_executes() {
        let f = setup("routine");
        let proposal = f
            .gov
            .submit_proposal(
                MemberId::new("alice"),
                ProposalAction::LimitAdjustment {
                    member: MemberId::new("dave"),
                    new_limit: 200,
                },
                "dave has earned more headroom",
                NOW,
            )
            .unwrap();

        f.gov
            .vote(MemberId::new("alice"), &proposal.id, VoteChoice::Approve, NOW)
            .unwrap();
        f.gov
            .vote(MemberId::new("bob"), &proposal.id, VoteChoice::Reject, NOW)
            .unwrap();
        let closed = f.gov.close_voting(&proposal.id, NOW + 1).unwrap();
        assert_eq!(closed.status, ProposalStatus::Passed);

        f.gov.execute_proposal(&proposal.id, NOW + 2).unwrap();
        assert_eq!(
            f.ledger.member_state(&MemberId::new("dave")).unwrap().limit,
            200
        );
    }

    #[test]
    fn quorum_failure_rejects() {
        let f = setup("quorum");
        let proposal = f
            .gov
            .submit_proposal(
                MemberId::new("alice"),
                ProposalAction::LimitAdjustment {
                    member: MemberId::new("dave"),
                    new_limit: 200,
                },
                "",
                NOW,
            )
            .unwrap();
        // 1 of 3 council votes: under the 0.5 quorum.
        f.gov
            .vote(MemberId::new("alice"), &proposal.id, VoteChoice::Approve, NOW)
            .unwrap();
        let closed = f.gov.close_voting(&proposal.id, NOW + 1).unwrap();
        assert_eq!(closed.status, ProposalStatus::Rejected);

        let err = f.gov.execute_proposal(&proposal.id, NOW + 2).unwrap_err();
        assert_eq!(err.code(), "PROPOSAL_NOT_PASSED");
    }

    #[test]
    fn critical_action_needs_supermajority() {
        let f = setup("supermajority");
        let proposal = f
            .gov
            .submit_proposal(
                MemberId::new("alice"),
                ProposalAction::Exclusion {
                    member: MemberId::new("dave"),
                },
                "",
                NOW,
            )
            .unwrap();
        // 2 approve, 1 reject: exactly two thirds, which clears the bar.
        f.gov
            .vote(MemberId::new("alice"), &proposal.id, VoteChoice::Approve, NOW)
            .unwrap();
        f.gov
            .vote(MemberId::new("bob"), &proposal.id, VoteChoice::Approve, NOW)
            .unwrap();
        f.gov
            .vote(MemberId::new("carol"), &proposal.id, VoteChoice::Reject, NOW)
            .unwrap();
        let closed = f.gov.close_voting(&proposal.id, NOW + 1).unwrap();
        assert_eq!(closed.status, ProposalStatus::Passed);

        f.gov.execute_proposal(&proposal.id, NOW + 2).unwrap();
        assert_eq!(
            f.ledger.member_state(&MemberId::new("dave")).unwrap().status,
            MemberStatus::Excluded
        );
    }

    #[test]
    fn duplicate_and_non_council_votes_rejected() {
        let f = setup("votes");
        let proposal = f
            .gov
            .submit_proposal(
                MemberId::new("alice"),
                ProposalAction::LimitAdjustment {
                    member: MemberId::new("dave"),
                    new_limit: 150,
                },
                "",
                NOW,
            )
            .unwrap();
        f.gov
            .vote(MemberId::new("alice"), &proposal.id, VoteChoice::Approve, NOW)
            .unwrap();
        let err = f
            .gov
            .vote(MemberId::new("alice"), &proposal.id, VoteChoice::Reject, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "ALREADY_VOTED");
        let err = f
            .gov
            .vote(MemberId::new("dave"), &proposal.id, VoteChoice::Approve, NOW)
            .unwrap_err();
        assert_eq!(err.code(), "NOT_COUNCIL_MEMBER");
    }

    #[test]
    fn voting_after_deadline_rejected() {
        let f = setup("deadline");
        let proposal = f
            .gov
            .submit_proposal(
                MemberId::new("alice"),
                ProposalAction::LimitAdjustment {
                    member: MemberId::new("dave"),
                    new_limit: 150,
                },
                "",
                NOW,
            )
            .unwrap();
        let late = proposal.closes_at + 1;
        let err = f
            .gov
            .vote(MemberId::new("alice"), &proposal.id, VoteChoice::Approve, late)
            .unwrap_err();
        assert_eq!(err.code(), "VOTING_CLOSED");
    }

    #[test]
    fn emergency_proposal_moves_the_risk_machine() {
        let f = setup("emergency");
        let proposal = f
            .gov
            .submit_proposal(
                MemberId::new("alice"),
                ProposalAction::EmergencyStateChange {
                    target: RiskState::Panic,
                    forced: false,
                },
                "panic drill",
                NOW,
            )
            .unwrap();
        for voter in ["alice", "bob", "carol"] {
            f.gov
                .vote(MemberId::new(voter), &proposal.id, VoteChoice::Approve, NOW)
                .unwrap();
        }
        f.gov.close_voting(&proposal.id, NOW + 1).unwrap();
        f.gov.execute_proposal(&proposal.id, NOW + 2).unwrap();
        assert_eq!(f.emergency.risk_state(), RiskState::Panic);
        assert!(f.emergency.current_policy().federation_frozen());
    }

    #[test]
    fn dispute_lifecycle_with_commitment_cancellation() {
        let f = setup("dispute");
        let commitment = f
            .commitments
            .create(
                CommitmentKind::Escrowed,
                MemberId::new("dave"),
                MemberId::new("bob"),
                40,
                TaskCategory::ShelterRepair,
                None,
                NOW,
            )
            .unwrap();

        let dispute = f
            .gov
            .file_dispute(
                MemberId::new("bob"),
                MemberId::new("dave"),
                Some(commitment.id),
                "work never started",
                NOW,
            )
            .unwrap();
        assert_eq!(dispute.status, DisputeStatus::Filed);

        // Reviewer must be council and not a party.
        let err = f
            .gov
            .assign_reviewer(&dispute.id, MemberId::new("bob"), NOW)
            .unwrap_err();
        assert_eq!(err.code(), "REVIEWER_IS_PARTY");
        f.gov
            .assign_reviewer(&dispute.id, MemberId::new("carol"), NOW)
            .unwrap();

        f.gov
            .append_evidence(&dispute.id, MemberId::new("bob"), "photos of the site", NOW)
            .unwrap();
        let err = f
            .gov
            .append_evidence(&dispute.id, MemberId::new("alice"), "hearsay", NOW)
            .unwrap_err();
        assert_eq!(err.code(), "DISPUTE_UNAUTHORIZED");

        let resolved = f
            .gov
            .resolve_dispute(
                &dispute.id,
                &MemberId::new("carol"),
                DisputeOutcome::InFavorOfComplainant,
                &[ResolutionAction::CancelCommitment(commitment.id)],
                NOW + 10,
            )
            .unwrap();
        assert_eq!(resolved.status, DisputeStatus::Resolved);
        // Escrow released by the ordered cancellation.
        assert_eq!(
            f.ledger.member_state(&MemberId::new("bob")).unwrap().reserve,
            0
        );
    }
}
