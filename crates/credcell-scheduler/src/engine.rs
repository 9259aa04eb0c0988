//! The Scheduler: demand/supply matching over time-bounded task slots.
//!
//! Matching is deterministic given input order: slots are visited in
//! (category priority, creation time, id) order, candidates are scored and
//! ties broken by ledger insertion order. The emergency policy narrows the
//! matched categories under stress and enables debtor-priority scoring, which
//! steers earning opportunities toward members near their floor.

use std::sync::{Arc, OnceLock};

use tracing::info;

use credcell_core::commitment::CommitmentStatus;
use credcell_core::constants::{
    DEBTOR_BONUS_SCALE, SCORE_WEIGHT_DEBTOR, SCORE_WEIGHT_PREFERENCE, SCORE_WEIGHT_SKILL, WEEK_MS,
};
use credcell_core::emergency::{EmergencyView, PolicyVector, SchedulerPolicy};
use credcell_core::error::CellError;
use credcell_core::events::{Event, EventKind};
use credcell_core::member::{MemberState, MemberStatus};
use credcell_core::scheduler::{
    Assignment, AssignmentStatus, MemberSupply, SlotStatus, TaskCategory, TaskSlot, TaskTemplate,
};
use credcell_core::types::{
    CellId, CommitmentId, Credits, MemberId, SlotId, TemplateId, TimestampMs,
};
use credcell_commitment::CommitmentEngine;
use credcell_ledger::Ledger;
use credcell_store::Store;

pub struct SchedulerEngine {
    cell_id: CellId,
    ledger: Arc<Ledger>,
    commitments: Arc<CommitmentEngine>,
    store: Arc<Store>,
    emergency: OnceLock<Arc<dyn EmergencyView>>,
}

/// Outcome of one matching run.
#[derive(Debug, Default)]
pub struct MatchReport {
    pub assignments: Vec<(SlotId, MemberId)>,
    pub slots_considered: usize,
    pub slots_filled: usize,
}

#[derive(Debug, Clone)]
pub struct CategoryCoverage {
    pub category: TaskCategory,
    pub required_hours: f64,
    pub available_hours: f64,
    /// `required − available` when positive; 0 when covered.
    pub gap: f64,
}

#[derive(Debug)]
pub struct CoverageFeasibility {
    pub categories: Vec<CategoryCoverage>,
    pub feasible: bool,
    /// Uncovered categories in priority order.
    pub bottlenecks: Vec<TaskCategory>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CategoryReport {
    pub category: TaskCategory,
    pub slot_fill_ratio: f64,
    pub hour_completion_ratio: f64,
}

#[derive(Debug)]
pub struct CoverageReport {
    pub slot_fill_ratio: f64,
    pub hour_completion_ratio: f64,
    pub categories: Vec<CategoryReport>,
}

impl SchedulerEngine {
    pub fn new(
        cell_id: CellId,
        ledger: Arc<Ledger>,
        commitments: Arc<CommitmentEngine>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            cell_id,
            ledger,
            commitments,
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

    // ── Templates and slots ──────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn upsert_template(
        &self,
        category: TaskCategory,
        day_of_week: u8,
        start_hour: u8,
        duration_hours: f64,
        hours_required: f64,
        credit_value: Credits,
        max_assignees: usize,
        description: impl Into<String>,
        now: TimestampMs,
    ) -> Result<TaskTemplate, CellError> {
        if day_of_week > 6 || start_hour > 23 || duration_hours <= 0.0 {
            return Err(CellError::InvalidTimeRange);
        }
        let mut seed = vec![day_of_week, start_hour];
        seed.extend_from_slice(&now.to_be_bytes());
        seed.extend_from_slice(&self.store.next_record_seq()?.to_be_bytes());
        let template = TaskTemplate {
            template_id: TemplateId::digest(&seed),
            category,
            day_of_week,
            start_hour,
            duration_hours,
            hours_required,
            credit_value,
            max_assignees,
            description: description.into(),
        };
        self.store.put_template(&template)?;
        Ok(template)
    }

    /// Materialise a template into a concrete slot within the given week.
    pub fn instantiate_template(
        &self,
        template_id: &TemplateId,
        week_start: TimestampMs,
        now: TimestampMs,
    ) -> Result<TaskSlot, CellError> {
        let template = self
            .store
            .get_template(template_id)?
            .ok_or(CellError::TemplateNotFound(*template_id))?;
        let starts_at = week_start
            + template.day_of_week as i64 * 24 * 3_600_000
            + template.start_hour as i64 * 3_600_000;
        let ends_at = starts_at + (template.duration_hours * 3_600_000.0) as i64;
        self.create_slot(
            template.category,
            starts_at,
            ends_at,
            template.hours_required,
            template.credit_value,
            template.max_assignees,
            None,
            template.description.clone(),
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_slot(
        &self,
        category: TaskCategory,
        starts_at: TimestampMs,
        ends_at: TimestampMs,
        hours_required: f64,
        credit_value: Credits,
        max_assignees: usize,
        commitment_id: Option<CommitmentId>,
        description: impl Into<String>,
        now: TimestampMs,
    ) -> Result<TaskSlot, CellError> {
        if ends_at <= starts_at || hours_required <= 0.0 || max_assignees == 0 {
            return Err(CellError::InvalidTimeRange);
        }
        let mut seed = starts_at.to_be_bytes().to_vec();
        seed.extend_from_slice(&ends_at.to_be_bytes());
        seed.extend_from_slice(&self.store.next_record_seq()?.to_be_bytes());
        let slot = TaskSlot {
            slot_id: SlotId::digest(&seed),
            category,
            starts_at,
            ends_at,
            hours_required,
            credit_value,
            max_assignees,
            assignments: Vec::new(),
            status: SlotStatus::Open,
            commitment_id,
            created_at: now,
            description: description.into(),
        };
        self.store.put_slot(&slot)?;
        Ok(slot)
    }

    pub fn slot(&self, id: &SlotId) -> Result<TaskSlot, CellError> {
        self.store.get_slot(id)?.ok_or(CellError::SlotNotFound(*id))
    }

    // ── Supply ───────────────────────────────────────────────────────────────

    /// Record or replace a member's weekly supply. Skill levels are clamped
    /// to [0, 1].
    pub fn upsert_supply(&self, mut supply: MemberSupply) -> Result<(), CellError> {
        self.ledger.member_state(&supply.member_id)?;
        for level in supply.skills.values_mut() {
            *level = level.clamp(0.0, 1.0);
        }
        self.store.put_supply(&supply)
    }

    pub fn supply(&self, member: &MemberId) -> Result<Option<MemberSupply>, CellError> {
        self.store.get_supply(member)
    }

    // ── Assignment ───────────────────────────────────────────────────────────

    /// Manually assign a member to a slot. Each assignee carries an equal
    /// share of the required hours.
    pub fn assign_member(
        &self,
        slot_id: &SlotId,
        member: &MemberId,
        now: TimestampMs,
    ) -> Result<TaskSlot, CellError> {
        let mut slot = self.slot(slot_id)?;
        self.push_assignment(&mut slot, member, now)?;
        self.store.put_slot(&slot)?;
        self.emit(
            EventKind::MemberAssignedToSlot {
                slot_id: *slot_id,
                member_id: member.clone(),
                hours: slot.hours_required / slot.max_assignees as f64,
            },
            now,
        )?;
        Ok(slot)
    }

    fn push_assignment(
        &self,
        slot: &mut TaskSlot,
        member: &MemberId,
        now: TimestampMs,
    ) -> Result<(), CellError> {
        if !slot.status.accepts_assignments() || slot.open_seats() == 0 {
            return Err(CellError::SlotFull {
                slot: slot.slot_id,
                max: slot.max_assignees,
            });
        }
        let state = self.ledger.member_state(member)?;
        if state.status != MemberStatus::Active {
            return Err(CellError::MemberNotActive {
                member: member.clone(),
                status: state.status,
            });
        }
        if slot.is_assigned(member) {
            return Err(CellError::AlreadyAssigned {
                slot: slot.slot_id,
                member: member.clone(),
            });
        }
        slot.assignments.push(Assignment {
            member_id: member.clone(),
            hours_assigned: slot.hours_required / slot.max_assignees as f64,
            status: AssignmentStatus::Assigned,
            rating: None,
            assigned_at: now,
        });
        slot.status = if slot.open_seats() == 0 {
            SlotStatus::Filled
        } else {
            SlotStatus::PartiallyFilled
        };
        Ok(())
    }

    /// Withdraw an unstarted assignment.
    pub fn unassign_member(
        &self,
        slot_id: &SlotId,
        member: &MemberId,
        now: TimestampMs,
    ) -> Result<TaskSlot, CellError> {
        let mut slot = self.slot(slot_id)?;
        let position = slot
            .assignments
            .iter()
            .position(|a| {
                a.member_id == *member
                    && matches!(
                        a.status,
                        AssignmentStatus::Assigned | AssignmentStatus::Confirmed
                    )
            })
            .ok_or_else(|| CellError::NotAssigned {
                slot: *slot_id,
                member: member.clone(),
            })?;
        slot.assignments.remove(position);
        if slot.status == SlotStatus::Filled || slot.status == SlotStatus::PartiallyFilled {
            slot.status = if slot.assignments.is_empty() {
                SlotStatus::Open
            } else {
                SlotStatus::PartiallyFilled
            };
        }
        self.store.put_slot(&slot)?;
        self.emit(
            EventKind::MemberUnassignedFromSlot {
                slot_id: *slot_id,
                member_id: member.clone(),
            },
            now,
        )?;
        Ok(slot)
    }

    /// The member confirms they will show up.
    pub fn confirm_assignment(
        &self,
        slot_id: &SlotId,
        member: &MemberId,
        _now: TimestampMs,
    ) -> Result<(), CellError> {
        let mut slot = self.slot(slot_id)?;
        let assignment = slot
            .assignments
            .iter_mut()
            .find(|a| a.member_id == *member && a.status == AssignmentStatus::Assigned)
            .ok_or_else(|| CellError::NotAssigned {
                slot: *slot_id,
                member: member.clone(),
            })?;
        assignment.status = AssignmentStatus::Confirmed;
        self.store.put_slot(&slot)
    }

    /// Mark work on a slot as begun.
    pub fn start_slot(&self, slot_id: &SlotId, _now: TimestampMs) -> Result<(), CellError> {
        let mut slot = self.slot(slot_id)?;
        if !matches!(
            slot.status,
            SlotStatus::PartiallyFilled | SlotStatus::Filled
        ) {
            return Err(CellError::SlotFull {
                slot: *slot_id,
                max: slot.max_assignees,
            });
        }
        slot.status = SlotStatus::InProgress;
        self.store.put_slot(&slot)
    }

    // ── Matching ─────────────────────────────────────────────────────────────

    /// Match supplies to open slots for one week.
    ///
    /// Score per candidate: 0.4·skill + 0.2·preference + 0.4·debtor bonus,
    /// where the bonus is clamp(−balance/limit, 0, 1)·2 under debtor
    /// priority. Non-positive scores are dropped; ties resolve by ledger
    /// insertion order.
    pub fn run_matching(
        &self,
        week_start: TimestampMs,
        now: TimestampMs,
    ) -> Result<MatchReport, CellError> {
        let policy = self.policy();
        let members = self.ledger.all_member_states();
        let supplies: Vec<(usize, MemberState, MemberSupply)> = members
            .into_iter()
            .enumerate()
            .filter(|(_, m)| m.status == MemberStatus::Active && !m.member_id.is_clearing())
            .filter_map(|(idx, m)| {
                self.store
                    .get_supply(&m.member_id)
                    .transpose()
                    .map(|s| s.map(|supply| (idx, m, supply)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut slots = self.week_slots(week_start)?;
        slots.retain(|s| s.status.accepts_assignments() && self.category_allowed(&policy, s.category));
        slots.sort_by(|a, b| {
            (a.category.priority(), a.created_at, a.slot_id)
                .cmp(&(b.category.priority(), b.created_at, b.slot_id))
        });

        // Remaining weekly hours per member: supply minus hours already
        // standing in this week's slots.
        let standing = self.standing_hours(week_start)?;
        let mut remaining: Vec<f64> = supplies
            .iter()
            .map(|(_, m, s)| {
                s.weekly_available_hours
                    - standing
                        .iter()
                        .find(|(id, _)| id == &m.member_id)
                        .map(|(_, h)| *h)
                        .unwrap_or(0.0)
            })
            .collect();

        let mut report = MatchReport {
            slots_considered: slots.len(),
            ..MatchReport::default()
        };

        for slot in &mut slots {
            let share = slot.hours_required / slot.max_assignees as f64;
            let mut candidates: Vec<(usize, f64)> = Vec::new();
            for (pos, (_, member, supply)) in supplies.iter().enumerate() {
                if slot.is_assigned(&member.member_id) || remaining[pos] < share {
                    continue;
                }
                let score = self.score(&policy, member, supply, slot.category);
                if score > 0.0 {
                    candidates.push((pos, score));
                }
            }
            // Highest score first; insertion order breaks ties.
            candidates.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(supplies[a.0].0.cmp(&supplies[b.0].0))
            });

            for (pos, _) in candidates.into_iter().take(slot.open_seats()) {
                let member_id = supplies[pos].1.member_id.clone();
                self.push_assignment(slot, &member_id, now)?;
                remaining[pos] -= share;
                report.assignments.push((slot.slot_id, member_id.clone()));
                self.emit(
                    EventKind::MemberAssignedToSlot {
                        slot_id: slot.slot_id,
                        member_id,
                        hours: share,
                    },
                    now,
                )?;
            }
            if slot.status == SlotStatus::Filled {
                report.slots_filled += 1;
            }
            self.store.put_slot(slot)?;
        }
        info!(
            assigned = report.assignments.len(),
            considered = report.slots_considered,
            filled = report.slots_filled,
            "matching run complete"
        );
        Ok(report)
    }

    fn score(
        &self,
        policy: &PolicyVector,
        member: &MemberState,
        supply: &MemberSupply,
        category: TaskCategory,
    ) -> f64 {
        let skill = supply.skill(category);
        let preference = if supply.prefers(category) { 1.0 } else { 0.0 };
        let debtor_bonus = if policy.debtor_priority_matching && member.balance < 0 && member.limit > 0
        {
            (-member.balance as f64 / member.limit as f64).clamp(0.0, 1.0) * DEBTOR_BONUS_SCALE
        } else {
            0.0
        };
        SCORE_WEIGHT_SKILL * skill
            + SCORE_WEIGHT_PREFERENCE * preference
            + SCORE_WEIGHT_DEBTOR * debtor_bonus
    }

    fn category_allowed(&self, policy: &PolicyVector, category: TaskCategory) -> bool {
        match policy.scheduler_priority {
            SchedulerPolicy::Balanced => true,
            SchedulerPolicy::EssentialsFirst => category != TaskCategory::General,
            SchedulerPolicy::Survival => category.is_survival(),
        }
    }

    fn week_slots(&self, week_start: TimestampMs) -> Result<Vec<TaskSlot>, CellError> {
        Ok(self
            .store
            .all_slots()?
            .into_iter()
            .filter(|s| s.starts_at >= week_start && s.starts_at < week_start + WEEK_MS)
            .collect())
    }

    fn standing_hours(
        &self,
        week_start: TimestampMs,
    ) -> Result<Vec<(MemberId, f64)>, CellError> {
        let mut totals: Vec<(MemberId, f64)> = Vec::new();
        for slot in self.week_slots(week_start)? {
            for a in &slot.assignments {
                if a.status.is_terminal() {
                    continue;
                }
                match totals.iter_mut().find(|(id, _)| id == &a.member_id) {
                    Some((_, h)) => *h += a.hours_assigned,
                    None => totals.push((a.member_id.clone(), a.hours_assigned)),
                }
            }
        }
        Ok(totals)
    }

    // ── Completion ───────────────────────────────────────────────────────────

    /// Record a member's completed work. When every assignment has concluded
    /// the slot completes (or ends incomplete if nobody showed), settling any
    /// attached commitment.
    pub fn record_completion(
        &self,
        slot_id: &SlotId,
        member: &MemberId,
        rating: Option<u8>,
        now: TimestampMs,
    ) -> Result<TaskSlot, CellError> {
        let mut slot = self.slot(slot_id)?;
        let assignment = slot
            .assignments
            .iter_mut()
            .find(|a| {
                a.member_id == *member
                    && matches!(
                        a.status,
                        AssignmentStatus::Assigned | AssignmentStatus::Confirmed
                    )
            })
            .ok_or_else(|| CellError::NotAssigned {
                slot: *slot_id,
                member: member.clone(),
            })?;
        assignment.status = AssignmentStatus::Completed;
        assignment.rating = rating;

        if !slot.status.is_terminal() && slot.status != SlotStatus::InProgress {
            slot.status = SlotStatus::InProgress;
        }
        self.roll_up(&mut slot, now)?;
        self.store.put_slot(&slot)?;
        Ok(slot)
    }

    /// Record a no-show. An attached commitment still pending is cancelled.
    pub fn record_no_show(
        &self,
        slot_id: &SlotId,
        member: &MemberId,
        now: TimestampMs,
    ) -> Result<TaskSlot, CellError> {
        let mut slot = self.slot(slot_id)?;
        let assignment = slot
            .assignments
            .iter_mut()
            .find(|a| {
                a.member_id == *member
                    && matches!(
                        a.status,
                        AssignmentStatus::Assigned | AssignmentStatus::Confirmed
                    )
            })
            .ok_or_else(|| CellError::NotAssigned {
                slot: *slot_id,
                member: member.clone(),
            })?;
        assignment.status = AssignmentStatus::NoShow;
        self.emit(
            EventKind::MemberNoShow {
                slot_id: *slot_id,
                member_id: member.clone(),
            },
            now,
        )?;

        if let Some(commitment_id) = slot.commitment_id {
            if let Ok(c) = self.commitments.commitment(&commitment_id) {
                if c.status == CommitmentStatus::Active {
                    self.commitments.cancel_by_governance(&commitment_id, now)?;
                }
            }
        }

        self.roll_up(&mut slot, now)?;
        self.store.put_slot(&slot)?;
        Ok(slot)
    }

    /// When every assignment has concluded, move the slot to its terminal
    /// state and settle an attached commitment on success.
    fn roll_up(&self, slot: &mut TaskSlot, now: TimestampMs) -> Result<(), CellError> {
        if slot.assignments.is_empty() || !slot.assignments.iter().all(|a| a.status.is_terminal())
        {
            return Ok(());
        }
        let completed: Vec<MemberId> = slot
            .assignments
            .iter()
            .filter(|a| a.status == AssignmentStatus::Completed)
            .map(|a| a.member_id.clone())
            .collect();

        if completed.is_empty() {
            slot.status = SlotStatus::Incomplete;
            return Ok(());
        }
        slot.status = SlotStatus::Completed;
        self.emit(
            EventKind::TaskCompleted {
                slot_id: slot.slot_id,
                category: slot.category,
                completed_members: completed,
            },
            now,
        )?;

        if let Some(commitment_id) = slot.commitment_id {
            let commitment = self.commitments.commitment(&commitment_id)?;
            if commitment.status == CommitmentStatus::Active {
                let promisee = commitment.promisee.clone();
                self.commitments.fulfill(&promisee, &commitment_id, now)?;
            }
        }
        Ok(())
    }

    // ── Coverage ─────────────────────────────────────────────────────────────

    /// Compare the week's required hours per category with what the supplies
    /// could offer, distributing each member's hours across categories in
    /// proportion to skill.
    pub fn coverage_feasibility(
        &self,
        week_start: TimestampMs,
    ) -> Result<CoverageFeasibility, CellError> {
        let mut required = [0.0f64; TaskCategory::PRIORITY_ORDER.len()];
        for slot in self.week_slots(week_start)? {
            required[slot.category.priority()] += slot.hours_required;
        }

        let mut available = [0.0f64; TaskCategory::PRIORITY_ORDER.len()];
        for member in self.ledger.all_member_states() {
            if member.status != MemberStatus::Active {
                continue;
            }
            let Some(supply) = self.store.get_supply(&member.member_id)? else {
                continue;
            };
            let total_skill: f64 = supply.skills.values().sum();
            if total_skill <= 0.0 {
                continue;
            }
            for (category, skill) in &supply.skills {
                available[category.priority()] +=
                    supply.weekly_available_hours * skill / total_skill;
            }
        }

        let mut categories = Vec::new();
        let mut bottlenecks = Vec::new();
        let mut recommendations = Vec::new();
        for category in TaskCategory::PRIORITY_ORDER {
            let i = category.priority();
            let gap = (required[i] - available[i]).max(0.0);
            if required[i] == 0.0 && available[i] == 0.0 {
                continue;
            }
            if gap > 0.0 {
                bottlenecks.push(category);
                recommendations.push(format!(
                    "{:?}: short {:.1} hours; recruit supply or reduce slots",
                    category, gap
                ));
            }
            categories.push(CategoryCoverage {
                category,
                required_hours: required[i],
                available_hours: available[i],
                gap,
            });
        }
        Ok(CoverageFeasibility {
            feasible: bottlenecks.is_empty(),
            categories,
            bottlenecks,
            recommendations,
        })
    }

    /// Tally slot-fill and hour-completion ratios, globally and per category.
    pub fn coverage_report(&self) -> Result<CoverageReport, CellError> {
        let slots = self.store.all_slots()?;
        let mut seats = [0usize; TaskCategory::PRIORITY_ORDER.len()];
        let mut filled = [0usize; TaskCategory::PRIORITY_ORDER.len()];
        let mut required = [0.0f64; TaskCategory::PRIORITY_ORDER.len()];
        let mut completed = [0.0f64; TaskCategory::PRIORITY_ORDER.len()];

        for slot in &slots {
            let i = slot.category.priority();
            seats[i] += slot.max_assignees;
            filled[i] += slot.assignments.len();
            required[i] += slot.hours_required;
            completed[i] += slot
                .assignments
                .iter()
                .filter(|a| a.status == AssignmentStatus::Completed)
                .map(|a| a.hours_assigned)
                .sum::<f64>();
        }

        let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };
        let categories = TaskCategory::PRIORITY_ORDER
            .iter()
            .filter(|c| seats[c.priority()] > 0)
            .map(|c| {
                let i = c.priority();
                CategoryReport {
                    category: *c,
                    slot_fill_ratio: ratio(filled[i] as f64, seats[i] as f64),
                    hour_completion_ratio: ratio(completed[i], required[i]),
                }
            })
            .collect();

        Ok(CoverageReport {
            slot_fill_ratio: ratio(
                filled.iter().sum::<usize>() as f64,
                seats.iter().sum::<usize>() as f64,
            ),
            hour_completion_ratio: ratio(completed.iter().sum(), required.iter().sum()),
            categories,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
