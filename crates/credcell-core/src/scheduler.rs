//! Scheduler data model: task categories, templates, slots, member supply.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{CommitmentId, Credits, MemberId, SlotId, TemplateId, TimestampMs};

// ── TaskCategory ─────────────────────────────────────────────────────────────

/// Task categories in fixed priority order: matching fills the most critical
/// needs first. The first four form the survival tier.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskCategory {
    Medical,
    Food,
    WaterSanitation,
    EnergyHeat,
    ChildcareDependent,
    SecurityCoordination,
    ShelterRepair,
    ProcurementTransport,
    General,
}

impl TaskCategory {
    pub const PRIORITY_ORDER: [TaskCategory; 9] = [
        TaskCategory::Medical,
        TaskCategory::Food,
        TaskCategory::WaterSanitation,
        TaskCategory::EnergyHeat,
        TaskCategory::ChildcareDependent,
        TaskCategory::SecurityCoordination,
        TaskCategory::ShelterRepair,
        TaskCategory::ProcurementTransport,
        TaskCategory::General,
    ];

    /// Position in the priority order; lower is more critical.
    pub fn priority(&self) -> usize {
        Self::PRIORITY_ORDER
            .iter()
            .position(|c| c == self)
            .expect("category is in the priority order")
    }

    pub fn is_survival(&self) -> bool {
        self.priority() < 4
    }
}

// ── Templates and slots ──────────────────────────────────────────────────────

/// Recurring weekly task pattern, instantiated into concrete slots.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub template_id: TemplateId,
    pub category: TaskCategory,
    /// 0 = Monday … 6 = Sunday.
    pub day_of_week: u8,
    /// Local start hour, 0–23.
    pub start_hour: u8,
    pub duration_hours: f64,
    pub hours_required: f64,
    pub credit_value: Credits,
    pub max_assignees: usize,
    pub description: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SlotStatus {
    Open,
    PartiallyFilled,
    Filled,
    InProgress,
    Completed,
    Incomplete,
}

impl SlotStatus {
    pub fn accepts_assignments(&self) -> bool {
        matches!(self, SlotStatus::Open | SlotStatus::PartiallyFilled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SlotStatus::Completed | SlotStatus::Incomplete)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssignmentStatus {
    Assigned,
    Confirmed,
    Completed,
    NoShow,
}

impl AssignmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Completed | AssignmentStatus::NoShow)
    }
}

/// One member's stake in a slot. Ordered by insertion within the slot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assignment {
    pub member_id: MemberId,
    pub hours_assigned: f64,
    pub status: AssignmentStatus,
    /// Optional 1–5 quality rating recorded at completion.
    pub rating: Option<u8>,
    pub assigned_at: TimestampMs,
}

/// A concrete time-bounded task instance requiring hours and awarding credits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSlot {
    pub slot_id: SlotId,
    pub category: TaskCategory,
    pub starts_at: TimestampMs,
    pub ends_at: TimestampMs,
    pub hours_required: f64,
    pub credit_value: Credits,
    pub max_assignees: usize,
    pub assignments: Vec<Assignment>,
    pub status: SlotStatus,
    /// Commitment settled on completion / cancelled on no-show, if attached.
    pub commitment_id: Option<CommitmentId>,
    pub created_at: TimestampMs,
    pub description: String,
}

impl TaskSlot {
    pub fn assignment(&self, member: &MemberId) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.member_id == *member)
    }

    pub fn is_assigned(&self, member: &MemberId) -> bool {
        self.assignment(member).is_some()
    }

    pub fn open_seats(&self) -> usize {
        self.max_assignees.saturating_sub(self.assignments.len())
    }
}

// ── Member supply ────────────────────────────────────────────────────────────

/// What one member can offer in a week.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemberSupply {
    pub member_id: MemberId,
    pub weekly_available_hours: f64,
    /// Skill level per category, each in [0, 1]. Key-sorted for determinism.
    pub skills: BTreeMap<TaskCategory, f64>,
    pub preferred_categories: Vec<TaskCategory>,
    /// Free-form constraints ("no night shifts", "no heavy lifting").
    pub constraints: Vec<String>,
    pub updated_at: TimestampMs,
}

impl MemberSupply {
    pub fn skill(&self, category: TaskCategory) -> f64 {
        self.skills.get(&category).copied().unwrap_or(0.0)
    }

    pub fn prefers(&self, category: TaskCategory) -> bool {
        self.preferred_categories.contains(&category)
    }
}
