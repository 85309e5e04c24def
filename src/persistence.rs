//! Persistence collaborator seam.
//!
//! Abstract per-entity CRUD with no cross-entity transaction. Relational and
//! blob-style physical backends are treated identically behind this trait.
//! Appointments and sessions support keyed partial updates so a status patch
//! never clobbers unrelated concurrent edits; the treatment plan is written
//! as one aggregate keyed by its id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::records::{
    Appointment, AppointmentStatus, PlanStatus, SessionPatch, SessionRecord, TreatmentPlan,
};

#[async_trait]
pub trait RecordStore: Send + Sync {
    // ============================================================================
    // Appointments (scheduling-owned, status writes only)
    // ============================================================================

    async fn list_appointments(&self, patient_id: &str) -> CoreResult<Vec<Appointment>>;

    /// Keyed status patch. The core never rewrites whole appointment
    /// collections.
    async fn set_appointment_status(
        &self,
        patient_id: &str,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> CoreResult<()>;

    /// Seeding surface for the scheduling subsystem (and tests)
    async fn put_appointment(&self, appointment: Appointment) -> CoreResult<()>;

    // ============================================================================
    // Sessions
    // ============================================================================

    async fn create_session(&self, record: SessionRecord) -> CoreResult<()>;

    async fn get_session(&self, id: Uuid) -> CoreResult<SessionRecord>;

    async fn list_sessions(&self, patient_id: &str) -> CoreResult<Vec<SessionRecord>>;

    /// Keyed partial update; returns the record as stored
    async fn update_session(&self, id: Uuid, patch: SessionPatch) -> CoreResult<SessionRecord>;

    async fn delete_session(&self, id: Uuid) -> CoreResult<()>;

    // ============================================================================
    // Treatment plans
    // ============================================================================

    async fn create_plan(&self, plan: TreatmentPlan) -> CoreResult<()>;

    async fn get_plan(&self, id: Uuid) -> CoreResult<TreatmentPlan>;

    /// Whole-aggregate write keyed by plan id
    async fn save_plan(&self, plan: TreatmentPlan) -> CoreResult<()>;

    /// Keyed lookup of the patient's active plan. Backends answer this from
    /// a (patient_id, status=active) index, not a scan over all plans.
    async fn active_plan(&self, patient_id: &str) -> CoreResult<Option<TreatmentPlan>>;

    async fn archived_plans(&self, patient_id: &str) -> CoreResult<Vec<TreatmentPlan>>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    appointments: HashMap<String, Appointment>,
    sessions: HashMap<Uuid, SessionRecord>,
    plans: HashMap<Uuid, TreatmentPlan>,
    /// (patient_id, status=active) index
    active_plans: HashMap<String, Uuid>,
}

/// In-process store for development and tests.
///
/// Mirrors the keyed-update contract of the production backend, including
/// `NotFound` on unknown ids and the active-plan index.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CoreResult<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| CoreError::external("persistence", "store lock poisoned"))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_appointments(&self, patient_id: &str) -> CoreResult<Vec<Appointment>> {
        let inner = self.lock()?;
        let mut out: Vec<Appointment> = inner
            .appointments
            .values()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect();
        out.sort_by_key(|a| a.date_time);
        Ok(out)
    }

    async fn set_appointment_status(
        &self,
        patient_id: &str,
        appointment_id: &str,
        status: AppointmentStatus,
    ) -> CoreResult<()> {
        let mut inner = self.lock()?;
        let appointment = inner
            .appointments
            .get_mut(appointment_id)
            .filter(|a| a.patient_id == patient_id)
            .ok_or_else(|| CoreError::not_found("appointment", appointment_id))?;
        appointment.status = status;
        Ok(())
    }

    async fn put_appointment(&self, appointment: Appointment) -> CoreResult<()> {
        let mut inner = self.lock()?;
        inner
            .appointments
            .insert(appointment.id.clone(), appointment);
        Ok(())
    }

    async fn create_session(&self, record: SessionRecord) -> CoreResult<()> {
        let mut inner = self.lock()?;
        inner.sessions.insert(record.id, record);
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> CoreResult<SessionRecord> {
        let inner = self.lock()?;
        inner
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("session", id.to_string()))
    }

    async fn list_sessions(&self, patient_id: &str) -> CoreResult<Vec<SessionRecord>> {
        let inner = self.lock()?;
        let mut out: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|s| s.patient_id == patient_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.session_date);
        Ok(out)
    }

    async fn update_session(&self, id: Uuid, patch: SessionPatch) -> CoreResult<SessionRecord> {
        let mut inner = self.lock()?;
        let record = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("session", id.to_string()))?;
        patch.apply(record);
        Ok(record.clone())
    }

    async fn delete_session(&self, id: Uuid) -> CoreResult<()> {
        let mut inner = self.lock()?;
        inner
            .sessions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found("session", id.to_string()))
    }

    async fn create_plan(&self, plan: TreatmentPlan) -> CoreResult<()> {
        let mut inner = self.lock()?;
        if plan.status == PlanStatus::Active {
            inner.active_plans.insert(plan.patient_id.clone(), plan.id);
        }
        inner.plans.insert(plan.id, plan);
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> CoreResult<TreatmentPlan> {
        let inner = self.lock()?;
        inner
            .plans
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("treatment_plan", id.to_string()))
    }

    async fn save_plan(&self, plan: TreatmentPlan) -> CoreResult<()> {
        let mut inner = self.lock()?;
        if !inner.plans.contains_key(&plan.id) {
            return Err(CoreError::not_found("treatment_plan", plan.id.to_string()));
        }
        match plan.status {
            PlanStatus::Active => {
                inner.active_plans.insert(plan.patient_id.clone(), plan.id);
            }
            PlanStatus::Archived => {
                if inner.active_plans.get(&plan.patient_id) == Some(&plan.id) {
                    inner.active_plans.remove(&plan.patient_id);
                }
            }
        }
        inner.plans.insert(plan.id, plan);
        Ok(())
    }

    async fn active_plan(&self, patient_id: &str) -> CoreResult<Option<TreatmentPlan>> {
        let inner = self.lock()?;
        Ok(inner
            .active_plans
            .get(patient_id)
            .and_then(|id| inner.plans.get(id))
            .cloned())
    }

    async fn archived_plans(&self, patient_id: &str) -> CoreResult<Vec<TreatmentPlan>> {
        let inner = self.lock()?;
        let mut out: Vec<TreatmentPlan> = inner
            .plans
            .values()
            .filter(|p| p.patient_id == patient_id && p.status == PlanStatus::Archived)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.start_date);
        Ok(out)
    }
}
