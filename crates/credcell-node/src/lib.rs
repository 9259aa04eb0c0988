//! Cell wiring: constructs the engines leaves-first over one store and
//! resolves the emergency back-references by late binding.
//!
//! Construction order: Ledger → Identity → Transactions → Commitments →
//! Emergency → Governance → Scheduler → Federation. The read-only
//! [`EmergencyView`] is injected into the policy consumers afterwards, and
//! the exposure cap is computed once the view is in place.

use std::path::Path;
use std::sync::Arc;

use credcell_core::emergency::EmergencyView;
use credcell_core::error::CellError;
use credcell_core::params::{
    CellParameters, EmergencyThresholds, FederationParameters, GovernanceParameters,
};
use credcell_core::types::{CellId, TimestampMs};
use credcell_commitment::CommitmentEngine;
use credcell_crypto::CryptoProvider;
use credcell_emergency::EmergencyEngine;
use credcell_federation::FederationEngine;
use credcell_governance::GovernanceEngine;
use credcell_identity::IdentityEngine;
use credcell_ledger::Ledger;
use credcell_scheduler::SchedulerEngine;
use credcell_store::Store;
use credcell_tx::TransactionEngine;

/// All tunables for one cell, grouped by consuming engine.
#[derive(Clone, Debug, Default)]
pub struct CellConfig {
    pub parameters: CellParameters,
    pub federation: FederationParameters,
    pub governance: GovernanceParameters,
    pub emergency: EmergencyThresholds,
}

/// A fully wired cell: one ledger, one store, every engine sharing them.
pub struct Cell {
    pub cell_id: CellId,
    pub store: Arc<Store>,
    pub crypto: Arc<dyn CryptoProvider>,
    pub ledger: Arc<Ledger>,
    pub identities: Arc<IdentityEngine>,
    pub transactions: Arc<TransactionEngine>,
    pub commitments: Arc<CommitmentEngine>,
    pub emergency: Arc<EmergencyEngine>,
    pub governance: Arc<GovernanceEngine>,
    pub scheduler: Arc<SchedulerEngine>,
    pub federation: Arc<FederationEngine>,
}

impl Cell {
    /// Open (or initialise) a cell at `path`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        cell_id: CellId,
        config: CellConfig,
        crypto: Arc<dyn CryptoProvider>,
        now: TimestampMs,
    ) -> Result<Self, CellError> {
        let store = Arc::new(Store::open(path)?);
        let ledger = Arc::new(Ledger::open(
            Arc::clone(&store),
            cell_id.clone(),
            config.parameters,
            now,
        )?);
        let identities = Arc::new(IdentityEngine::new(
            cell_id.clone(),
            Arc::clone(&ledger),
            Arc::clone(&store),
        ));
        let transactions = Arc::new(TransactionEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&identities),
            Arc::clone(&store),
            Arc::clone(&crypto),
        ));
        let commitments = Arc::new(CommitmentEngine::new(
            cell_id.clone(),
            Arc::clone(&ledger),
            Arc::clone(&store),
        ));
        let emergency = Arc::new(EmergencyEngine::open(
            cell_id.clone(),
            Arc::clone(&ledger),
            Arc::clone(&store),
            config.emergency,
            now,
        )?);
        let governance = Arc::new(GovernanceEngine::new(
            cell_id.clone(),
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&identities),
            Arc::clone(&commitments),
            Arc::clone(&transactions),
            Arc::clone(&emergency),
            config.governance,
        ));
        let scheduler = Arc::new(SchedulerEngine::new(
            cell_id.clone(),
            Arc::clone(&ledger),
            Arc::clone(&commitments),
            Arc::clone(&store),
        ));
        let federation = Arc::new(FederationEngine::open(
            cell_id.clone(),
            Arc::clone(&ledger),
            Arc::clone(&store),
            config.federation,
            now,
        )?);

        // Late-bind the read-only emergency view into the policy consumers.
        let view: Arc<dyn EmergencyView> = Arc::clone(&emergency) as Arc<dyn EmergencyView>;
        identities.attach_emergency(Arc::clone(&view));
        commitments.attach_emergency(Arc::clone(&view));
        scheduler.attach_emergency(Arc::clone(&view));
        federation.attach_emergency(view);
        federation.recompute_exposure_cap(now)?;

        Ok(Self {
            cell_id,
            store,
            crypto,
            ledger,
            identities,
            transactions,
            commitments,
            emergency,
            governance,
            scheduler,
            federation,
        })
    }

    /// Check every cross-cutting invariant over the live state: conservation,
    /// floors and escrow safety on the ledger, and the exposure cap (unless
    /// the cell is quarantined for exactly that breach).
    pub fn verify_invariants(&self) -> bool {
        let federation_ok = {
            let state = self.federation.federation_state();
            state.is_quarantined()
                || state.federation_position.abs() <= state.exposure_cap
        };
        self.ledger.verify_conservation() && self.ledger.verify_floors() && federation_ok
    }
}
