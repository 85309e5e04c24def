//! Treatment plan ledger.
//!
//! Enforces the single-active-plan-per-patient invariant and manages the
//! goal and improvement logs. Plan mutations are read-modify-write on the
//! whole aggregate, keyed by plan id; conflicting concurrent edits resolve
//! last-writer-wins.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::persistence::RecordStore;
use crate::records::{
    ClinicalStatus, Goal, GoalListKind, GoalResult, Improvement, PlanStatus, SessionStatus,
    TreatmentPlan,
};

/// Input for creating a treatment plan. Goal lists arrive as plain text and
/// are assigned stable ids on creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDraft {
    pub start_date: NaiveDate,
    pub estimated_sessions: u32,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub discharge_objectives: Vec<String>,
    #[serde(default)]
    pub approaches: Vec<String>,
    #[serde(default)]
    pub short_term_goals: Vec<String>,
    #[serde(default)]
    pub long_term_goals: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Computed progress view of the active plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanProgress {
    pub goals_progress: u8,
    pub sessions_progress: u8,
    pub sessions_completed: u32,
}

pub struct TreatmentPlanLedger {
    store: Arc<dyn RecordStore>,
}

impl TreatmentPlanLedger {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn get_active(&self, patient_id: &str) -> CoreResult<Option<TreatmentPlan>> {
        self.store.active_plan(patient_id).await
    }

    pub async fn list_archived(&self, patient_id: &str) -> CoreResult<Vec<TreatmentPlan>> {
        self.store.archived_plans(patient_id).await
    }

    /// Create a new active plan.
    ///
    /// Fails with `InvalidState` when an active plan already exists and
    /// `replace` is false. With `replace`, the existing plan is archived and
    /// the new one created; both writes are reported as one logical
    /// operation, though there is no cross-entity transaction underneath.
    pub async fn create_or_replace(
        &self,
        patient_id: &str,
        draft: PlanDraft,
        replace: bool,
    ) -> CoreResult<TreatmentPlan> {
        if let Some(existing) = self.store.active_plan(patient_id).await? {
            if !replace {
                return Err(CoreError::InvalidState(format!(
                    "patient {} already has an active plan",
                    patient_id
                )));
            }
            self.archive_plan(existing).await?;
        }

        let now = Utc::now();
        let plan = TreatmentPlan {
            id: Uuid::new_v4(),
            patient_id: patient_id.to_string(),
            status: PlanStatus::Active,
            start_date: draft.start_date,
            estimated_sessions: draft.estimated_sessions,
            objectives: draft.objectives,
            discharge_objectives: draft.discharge_objectives,
            approaches: draft.approaches,
            short_term_goals: draft.short_term_goals.into_iter().map(Goal::new).collect(),
            long_term_goals: draft.long_term_goals.into_iter().map(Goal::new).collect(),
            notes: draft.notes,
            current_status: ClinicalStatus::EmAndamento,
            current_status_notes: None,
            last_review_date: None,
            next_review_date: None,
            goal_results: Vec::new(),
            improvements: Vec::new(),
            evolution_reports: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.store.create_plan(plan.clone()).await?;
        info!(plan_id = %plan.id, patient_id, replaced = replace, "treatment plan created");
        Ok(plan)
    }

    /// Archive a plan. Archived plans remain readable and are never deleted
    /// in the normal flow; archiving an already archived plan is a no-op.
    pub async fn archive(&self, plan_id: Uuid) -> CoreResult<TreatmentPlan> {
        let plan = self.store.get_plan(plan_id).await?;
        if plan.status == PlanStatus::Archived {
            warn!(plan_id = %plan_id, "plan already archived");
            return Ok(plan);
        }
        self.archive_plan(plan).await
    }

    async fn archive_plan(&self, mut plan: TreatmentPlan) -> CoreResult<TreatmentPlan> {
        plan.status = PlanStatus::Archived;
        plan.updated_at = Utc::now();
        self.store.save_plan(plan.clone()).await?;
        info!(plan_id = %plan.id, patient_id = %plan.patient_id, "treatment plan archived");
        Ok(plan)
    }

    // ============================================================================
    // Goals
    // ============================================================================

    /// Flip completion of the goal with the given text. Absent results are
    /// created completed; present ones toggle, setting `completed_at` when
    /// turning true and clearing it when turning false. Two toggles restore
    /// the original state exactly.
    pub async fn toggle_goal_completion(
        &self,
        plan_id: Uuid,
        goal_text: &str,
    ) -> CoreResult<TreatmentPlan> {
        let mut plan = self.store.get_plan(plan_id).await?;
        let goal = plan
            .find_goal_by_text(goal_text)
            .ok_or_else(|| CoreError::not_found("goal", goal_text))?
            .clone();

        match plan.goal_results.iter_mut().find(|r| r.goal_id == goal.id) {
            Some(result) => {
                result.completed = !result.completed;
                result.completed_at = if result.completed {
                    Some(Utc::now())
                } else {
                    None
                };
            }
            None => plan.goal_results.push(GoalResult {
                goal_id: goal.id,
                goal: goal.text,
                completed: true,
                completed_at: Some(Utc::now()),
                result: None,
            }),
        }

        plan.updated_at = Utc::now();
        self.store.save_plan(plan.clone()).await?;
        Ok(plan)
    }

    /// Upsert the free-text result note of a goal without touching its
    /// completion state.
    pub async fn set_goal_result(
        &self,
        plan_id: Uuid,
        goal_text: &str,
        note: &str,
    ) -> CoreResult<TreatmentPlan> {
        let mut plan = self.store.get_plan(plan_id).await?;
        let goal = plan
            .find_goal_by_text(goal_text)
            .ok_or_else(|| CoreError::not_found("goal", goal_text))?
            .clone();

        match plan.goal_results.iter_mut().find(|r| r.goal_id == goal.id) {
            Some(result) => result.result = Some(note.to_string()),
            None => plan.goal_results.push(GoalResult {
                goal_id: goal.id,
                goal: goal.text,
                completed: false,
                completed_at: None,
                result: Some(note.to_string()),
            }),
        }

        plan.updated_at = Utc::now();
        self.store.save_plan(plan.clone()).await?;
        Ok(plan)
    }

    /// Append a goal to one of the lists. Duplicate text is permitted; the
    /// stable ids keep results unambiguous.
    pub async fn add_goal(
        &self,
        plan_id: Uuid,
        kind: GoalListKind,
        text: &str,
    ) -> CoreResult<TreatmentPlan> {
        if text.trim().is_empty() {
            return Err(CoreError::Validation("goal text is required".to_string()));
        }

        let mut plan = self.store.get_plan(plan_id).await?;
        let goal = Goal::new(text);
        match kind {
            GoalListKind::ShortTerm => plan.short_term_goals.push(goal),
            GoalListKind::LongTerm => plan.long_term_goals.push(goal),
        }
        plan.updated_at = Utc::now();
        self.store.save_plan(plan.clone()).await?;
        Ok(plan)
    }

    /// Rename a goal in place. The id-keyed result record keeps its
    /// completion history; only its text snapshot is refreshed.
    pub async fn rename_goal(
        &self,
        plan_id: Uuid,
        goal_id: Uuid,
        new_text: &str,
    ) -> CoreResult<TreatmentPlan> {
        if new_text.trim().is_empty() {
            return Err(CoreError::Validation("goal text is required".to_string()));
        }

        let mut plan = self.store.get_plan(plan_id).await?;
        let goal = plan
            .find_goal_mut(goal_id)
            .ok_or_else(|| CoreError::not_found("goal", goal_id.to_string()))?;
        goal.text = new_text.to_string();

        if let Some(result) = plan.goal_results.iter_mut().find(|r| r.goal_id == goal_id) {
            result.goal = new_text.to_string();
        }

        plan.updated_at = Utc::now();
        self.store.save_plan(plan.clone()).await?;
        Ok(plan)
    }

    // ============================================================================
    // Improvements
    // ============================================================================

    /// Log an improvement. Append-only: there is no edit or delete path, and
    /// identical entries on different dates are kept separately.
    pub async fn add_improvement(
        &self,
        plan_id: Uuid,
        description: &str,
        category: &str,
        date: Option<DateTime<Utc>>,
    ) -> CoreResult<TreatmentPlan> {
        if description.trim().is_empty() {
            return Err(CoreError::Validation(
                "improvement description is required".to_string(),
            ));
        }

        let mut plan = self.store.get_plan(plan_id).await?;
        plan.improvements.push(Improvement {
            id: Uuid::new_v4(),
            description: description.to_string(),
            date: date.unwrap_or_else(Utc::now),
            category: category.to_string(),
        });
        plan.updated_at = Utc::now();
        self.store.save_plan(plan.clone()).await?;
        Ok(plan)
    }

    // ============================================================================
    // Status review
    // ============================================================================

    /// Record the clinician's current judgment. Any status is reachable from
    /// any other; the review date is stamped with today.
    pub async fn update_status(
        &self,
        plan_id: Uuid,
        status: ClinicalStatus,
        notes: Option<&str>,
    ) -> CoreResult<TreatmentPlan> {
        let mut plan = self.store.get_plan(plan_id).await?;
        plan.current_status = status;
        plan.current_status_notes = notes.map(|s| s.to_string());
        plan.last_review_date = Some(Utc::now().date_naive());
        plan.updated_at = Utc::now();
        self.store.save_plan(plan.clone()).await?;
        Ok(plan)
    }

    // ============================================================================
    // Computed progress
    // ============================================================================

    /// Progress of the patient's active plan, counting completed sessions
    /// from the session store.
    pub async fn progress(&self, patient_id: &str) -> CoreResult<Option<PlanProgress>> {
        let Some(plan) = self.store.active_plan(patient_id).await? else {
            return Ok(None);
        };

        let sessions_completed = self
            .store
            .list_sessions(patient_id)
            .await?
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .count() as u32;

        Ok(Some(PlanProgress {
            goals_progress: plan.goals_progress(),
            sessions_progress: plan.sessions_progress(sessions_completed),
            sessions_completed,
        }))
    }
}
