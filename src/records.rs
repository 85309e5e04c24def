//! Clinical record data model.
//!
//! Appointments are owned by the scheduling subsystem; the core only ever
//! writes their `status`. Sessions and treatment plans are owned here.
//! Goals carry a stable id so completion history survives renames; the
//! `GoalResult` keeps a text snapshot for display.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Appointments
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Done,
    Cancelled,
    Rescheduled,
}

/// Scheduling-owned appointment. External ids are opaque strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub date_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub payment_value: Option<f64>,
    pub service: Option<String>,
    pub mode: Option<String>,
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
    Rescheduled,
    NoShow,
}

/// A clinical session record.
///
/// `appointment_id` is a weak reference: the store does not enforce that an
/// appointment is referenced by at most one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub patient_id: String,
    pub appointment_id: Option<String>,
    pub session_date: NaiveDate,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub detailed_notes: Option<String>,
    pub summary: Option<String>,
    pub clinical_observations: Option<String>,
    pub transcription: Option<String>,
    pub ai_generated_summary: Option<String>,
    pub ai_insights: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Whether any clinical text usable for narrative generation is present
    pub fn has_clinical_content(&self) -> bool {
        fn filled(field: &Option<String>) -> bool {
            field.as_deref().is_some_and(|s| !s.trim().is_empty())
        }
        filled(&self.detailed_notes) || filled(&self.summary) || filled(&self.transcription)
    }
}

/// Input for registering a new session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDraft {
    pub patient_id: String,
    pub appointment_id: Option<String>,
    pub session_date: NaiveDate,
    pub duration_minutes: u32,
    #[serde(default)]
    pub detailed_notes: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub clinical_observations: Option<String>,
}

/// Partial update for a session. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    pub session_date: Option<NaiveDate>,
    pub duration_minutes: Option<u32>,
    pub status: Option<SessionStatus>,
    pub detailed_notes: Option<String>,
    pub summary: Option<String>,
    pub clinical_observations: Option<String>,
    pub transcription: Option<String>,
    pub ai_generated_summary: Option<String>,
    pub ai_insights: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl SessionPatch {
    /// Apply the patch to a record, stamping `updated_at`
    pub fn apply(&self, record: &mut SessionRecord) {
        if let Some(date) = self.session_date {
            record.session_date = date;
        }
        if let Some(minutes) = self.duration_minutes {
            record.duration_minutes = minutes;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref text) = self.detailed_notes {
            record.detailed_notes = Some(text.clone());
        }
        if let Some(ref text) = self.summary {
            record.summary = Some(text.clone());
        }
        if let Some(ref text) = self.clinical_observations {
            record.clinical_observations = Some(text.clone());
        }
        if let Some(ref text) = self.transcription {
            record.transcription = Some(text.clone());
        }
        if let Some(ref text) = self.ai_generated_summary {
            record.ai_generated_summary = Some(text.clone());
        }
        if let Some(ref text) = self.ai_insights {
            record.ai_insights = Some(text.clone());
        }
        if let Some(ref text) = self.cancellation_reason {
            record.cancellation_reason = Some(text.clone());
        }
        record.updated_at = Utc::now();
    }
}

// ============================================================================
// Treatment plans
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Archived,
}

/// Clinician-judged plan status. Any status is reachable from any other;
/// this is deliberately not a restrictive state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalStatus {
    EmAndamento,
    Progredindo,
    Estagnado,
    Dificuldades,
    ProximoAlta,
    Concluido,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalListKind {
    ShortTerm,
    LongTerm,
}

/// A therapeutic goal with a stable identity.
///
/// Results are keyed by `id`, not by the literal text, so renaming a goal
/// does not orphan its completion history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub text: String,
}

impl Goal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
        }
    }
}

/// Completion tracking for one goal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalResult {
    pub goal_id: Uuid,
    /// Text snapshot of the goal at the last write, for display
    pub goal: String,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Clinician-logged observation of progress. Append-only, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Improvement {
    pub id: Uuid,
    pub description: String,
    pub date: DateTime<Utc>,
    pub category: String,
}

/// Narrative evolution report returned by the AI collaborator. Stored
/// opaque; the core validates nothing beyond non-emptiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionReport {
    pub generated_at: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentPlan {
    pub id: Uuid,
    pub patient_id: String,
    pub status: PlanStatus,
    pub start_date: NaiveDate,
    pub estimated_sessions: u32,
    pub objectives: Vec<String>,
    pub discharge_objectives: Vec<String>,
    pub approaches: Vec<String>,
    pub short_term_goals: Vec<Goal>,
    pub long_term_goals: Vec<Goal>,
    pub notes: Option<String>,
    pub current_status: ClinicalStatus,
    pub current_status_notes: Option<String>,
    pub last_review_date: Option<NaiveDate>,
    pub next_review_date: Option<NaiveDate>,
    pub goal_results: Vec<GoalResult>,
    pub improvements: Vec<Improvement>,
    #[serde(default)]
    pub evolution_reports: Vec<EvolutionReport>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TreatmentPlan {
    /// Find a goal by its literal text across both lists, first match wins
    pub fn find_goal_by_text(&self, text: &str) -> Option<&Goal> {
        self.short_term_goals
            .iter()
            .chain(self.long_term_goals.iter())
            .find(|g| g.text == text)
    }

    /// Find a goal by its stable id across both lists
    pub fn find_goal_mut(&mut self, goal_id: Uuid) -> Option<&mut Goal> {
        self.short_term_goals
            .iter_mut()
            .chain(self.long_term_goals.iter_mut())
            .find(|g| g.id == goal_id)
    }

    pub fn total_goals(&self) -> usize {
        self.short_term_goals.len() + self.long_term_goals.len()
    }

    pub fn completed_goals(&self) -> usize {
        self.goal_results.iter().filter(|r| r.completed).count()
    }

    /// Percentage of goals completed, 0 when the plan has no goals
    pub fn goals_progress(&self) -> u8 {
        let total = self.total_goals();
        if total == 0 {
            return 0;
        }
        let ratio = self.completed_goals() as f64 / total as f64;
        (ratio * 100.0).round() as u8
    }

    /// Percentage of estimated sessions completed, clamped at 100
    pub fn sessions_progress(&self, sessions_completed: u32) -> u8 {
        if self.estimated_sessions == 0 {
            return 0;
        }
        let ratio = sessions_completed as f64 / self.estimated_sessions as f64;
        ((ratio * 100.0).round() as u32).min(100) as u8
    }
}

// ============================================================================
// Derived evolution series
// ============================================================================

/// Calendar-month bucket key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self::from_date(ts.date_naive())
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// One point of the cumulative progress series. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionPoint {
    pub period: Period,
    pub cumulative_improvements: u32,
    pub cumulative_goals_completed: u32,
}
