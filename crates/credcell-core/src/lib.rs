pub mod cell;
pub mod commitment;
pub mod constants;
pub mod emergency;
pub mod error;
pub mod events;
pub mod federation;
pub mod governance;
pub mod identity;
pub mod member;
pub mod params;
pub mod scheduler;
pub mod transaction;
pub mod types;

pub use cell::{CellLedgerState, LedgerStatistics};
pub use commitment::{Commitment, CommitmentKind, CommitmentStatus};
pub use constants::*;
pub use emergency::{
    AdmissionMode, CommitmentMode, EmergencyState, EmergencyView, PolicyVector, RiskState,
    SchedulerPolicy, StateTransition, StressIndicators, ThresholdProximity, TransitionAuthority,
};
pub use error::CellError;
pub use events::{BalanceDelta, Event, EventKind};
pub use federation::{
    ExposureAnalysis, FederationDirection, FederationLink, FederationState, FederationStatus,
    FederationTransaction, FederationTxStatus, LinkStatus, QuarantineReason,
};
pub use governance::{
    ActionCategory, CouncilMember, CouncilRole, Dispute, DisputeOutcome, DisputeStatus, Evidence,
    Proposal, ProposalAction, ProposalStatus, ResolutionAction, Vote, VoteChoice,
};
pub use identity::Identity;
pub use member::{BalanceUpdate, MemberState, MemberStatus, ReserveUpdate};
pub use params::{
    CellParameters, EmergencyThresholds, FederationParameters, GovernanceParameters,
    ParameterUpdate,
};
pub use scheduler::{
    Assignment, AssignmentStatus, MemberSupply, SlotStatus, TaskCategory, TaskSlot, TaskTemplate,
};
pub use transaction::{QueuedTransaction, SigningPayload, SpotTransaction, TransactionStatus};
pub use types::*;
