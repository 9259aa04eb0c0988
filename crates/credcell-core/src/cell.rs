//! The cell-level ledger aggregate: the one mutable root of member state.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::member::{MemberState, MemberStatus};
use crate::params::CellParameters;
use crate::types::{CellId, Credits, MemberId, TimestampMs};

/// Complete ledger state of one cell. Mutated only through the Ledger Engine.
///
/// Members are kept in an insertion-ordered map so that every iteration that
/// affects outcomes (statistics, matching tie-breaks, indicator sweeps) is
/// deterministic across runs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellLedgerState {
    pub cell_id: CellId,
    pub parameters: CellParameters,
    pub members: IndexMap<MemberId, MemberState>,
    /// Monotonic sequence number, bumped once per committed mutation.
    pub sequence: u64,
    pub updated_at: TimestampMs,
}

impl CellLedgerState {
    pub fn new(cell_id: CellId, parameters: CellParameters, now: TimestampMs) -> Self {
        Self {
            cell_id,
            parameters,
            members: IndexMap::new(),
            sequence: 0,
            updated_at: now,
        }
    }

    /// Σ balances over all members. Zero in every consistent state (I1).
    pub fn balance_sum(&self) -> i128 {
        self.members.values().map(|m| m.balance as i128).sum()
    }

    /// Σ limits over transactable members: the cell's aggregate capacity.
    pub fn aggregate_capacity(&self) -> Credits {
        self.members
            .values()
            .filter(|m| m.status.can_transact())
            .map(|m| m.limit)
            .sum()
    }

    pub fn statistics(&self) -> LedgerStatistics {
        let mut stats = LedgerStatistics {
            member_count: self.members.len(),
            sequence: self.sequence,
            ..LedgerStatistics::default()
        };
        for m in self.members.values() {
            match m.status {
                MemberStatus::Active => stats.active_members += 1,
                MemberStatus::Pending => stats.pending_members += 1,
                MemberStatus::Probation => stats.probation_members += 1,
                MemberStatus::Frozen => stats.frozen_members += 1,
                MemberStatus::Excluded => stats.excluded_members += 1,
            }
            if m.status.can_transact() {
                stats.aggregate_capacity += m.limit;
            }
            if m.balance > 0 {
                stats.total_positive_balance += m.balance;
            } else {
                stats.total_negative_balance += m.balance;
            }
            stats.total_reserved += m.reserve;
        }
        stats
    }
}

/// Aggregate counters over one cell's ledger, recomputed on demand.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerStatistics {
    pub member_count: usize,
    pub active_members: usize,
    pub pending_members: usize,
    pub probation_members: usize,
    pub frozen_members: usize,
    pub excluded_members: usize,
    /// Σ limits over transactable members.
    pub aggregate_capacity: Credits,
    pub total_positive_balance: Credits,
    /// Σ of negative balances (≤ 0): the cell's outstanding debt mass.
    pub total_negative_balance: Credits,
    pub total_reserved: Credits,
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_count_by_status() {
        let mut state = CellLedgerState::new(CellId::new("c"), CellParameters::default(), 0);
        for (name, status) in [
            ("a", MemberStatus::Active),
            ("b", MemberStatus::Active),
            ("c", MemberStatus::Frozen),
        ] {
            let id = MemberId::new(name);
            state
                .members
                .insert(id.clone(), MemberState::new(id, 100, status, 0));
        }
        let stats = state.statistics();
        assert_eq!(stats.member_count, 3);
        assert_eq!(stats.active_members, 2);
        assert_eq!(stats.frozen_members, 1);
        // Frozen members do not contribute capacity.
        assert_eq!(stats.aggregate_capacity, 200);
    }
}
