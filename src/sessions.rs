//! Session record store.
//!
//! CRUD for clinical sessions scoped to a patient, plus orchestration of the
//! AI enrichment collaborators. Status-changing mutations on sessions with a
//! linked appointment go through the appointment status bridge; the two
//! writes are not transactional (last-writer-wins, by policy).

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bridge::AppointmentStatusBridge;
use crate::error::{CoreError, CoreResult};
use crate::files::{FileStorage, StoredFile};
use crate::inflight::{InFlightTracker, OperationKind};
use crate::narrative::{NarrativeContext, NarrativeGenerator, NarrativeKind, SessionSnapshot};
use crate::persistence::RecordStore;
use crate::records::{
    Appointment, SessionDraft, SessionPatch, SessionRecord, SessionStatus,
};
use crate::stt::{AudioBlob, SpeechToText};

/// Separator inserted between an existing transcription and appended text
const TRANSCRIPTION_SEPARATOR: &str = "\n\n---\n\n";

/// Per-session narrative kinds. Evolution reports are generated per patient
/// by the aggregator, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Summary,
    Insights,
}

impl SummaryKind {
    fn narrative_kind(self) -> NarrativeKind {
        match self {
            SummaryKind::Summary => NarrativeKind::Summary,
            SummaryKind::Insights => NarrativeKind::Insights,
        }
    }

    fn operation_kind(self) -> OperationKind {
        match self {
            SummaryKind::Summary => OperationKind::Summary,
            SummaryKind::Insights => OperationKind::Insights,
        }
    }
}

pub struct SessionRecordStore {
    store: Arc<dyn RecordStore>,
    bridge: AppointmentStatusBridge,
    narrative: Arc<dyn NarrativeGenerator>,
    stt: Arc<dyn SpeechToText>,
    files: Arc<dyn FileStorage>,
    in_flight: InFlightTracker,
}

impl SessionRecordStore {
    pub fn new(
        store: Arc<dyn RecordStore>,
        narrative: Arc<dyn NarrativeGenerator>,
        stt: Arc<dyn SpeechToText>,
        files: Arc<dyn FileStorage>,
    ) -> Self {
        let bridge = AppointmentStatusBridge::new(Arc::clone(&store));
        Self {
            store,
            bridge,
            narrative,
            stt,
            files,
            in_flight: InFlightTracker::new(),
        }
    }

    /// In-flight flags for presentation polling
    pub fn in_flight(&self) -> &InFlightTracker {
        &self.in_flight
    }

    // ============================================================================
    // CRUD
    // ============================================================================

    /// Register a new session
    pub async fn create(&self, draft: SessionDraft) -> CoreResult<SessionRecord> {
        if draft.patient_id.trim().is_empty() {
            return Err(CoreError::Validation("patient id is required".to_string()));
        }

        let now = chrono::Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4(),
            patient_id: draft.patient_id,
            appointment_id: draft.appointment_id,
            session_date: draft.session_date,
            duration_minutes: draft.duration_minutes,
            status: SessionStatus::Scheduled,
            detailed_notes: draft.detailed_notes,
            summary: draft.summary,
            clinical_observations: draft.clinical_observations,
            transcription: None,
            ai_generated_summary: None,
            ai_insights: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        self.store.create_session(record.clone()).await?;
        info!(session_id = %record.id, patient_id = %record.patient_id, "session registered");
        Ok(record)
    }

    /// Create a session pre-filled from one of the patient's appointments
    pub async fn import_from_appointment(
        &self,
        patient_id: &str,
        appointment_id: &str,
    ) -> CoreResult<SessionRecord> {
        let appointments = self.store.list_appointments(patient_id).await?;
        let appointment = appointments
            .iter()
            .find(|a| a.id == appointment_id)
            .ok_or_else(|| CoreError::not_found("appointment", appointment_id))?;

        let draft = SessionDraft {
            patient_id: patient_id.to_string(),
            appointment_id: Some(appointment.id.clone()),
            session_date: appointment.date_time.date_naive(),
            duration_minutes: 50,
            detailed_notes: None,
            summary: None,
            clinical_observations: None,
        };
        self.create(draft).await
    }

    /// Apply a partial update; mirrors a status change onto the linked
    /// appointment after the session write succeeds.
    pub async fn update(&self, id: Uuid, patch: SessionPatch) -> CoreResult<SessionRecord> {
        let existing = self.store.get_session(id).await?;
        let status_changed = patch
            .status
            .is_some_and(|status| status != existing.status);

        let updated = self.store.update_session(id, patch).await?;

        if status_changed {
            self.bridge
                .on_session_status_change(
                    &updated.patient_id,
                    updated.appointment_id.as_deref(),
                    updated.status,
                )
                .await?;
        }
        Ok(updated)
    }

    /// Delete a session. A linked appointment reverts to `scheduled`: the
    /// encounter still exists on the calendar, only its clinical record is
    /// gone.
    pub async fn delete(&self, id: Uuid) -> CoreResult<()> {
        let existing = self.store.get_session(id).await?;
        self.store.delete_session(id).await?;

        self.bridge
            .on_session_status_change(
                &existing.patient_id,
                existing.appointment_id.as_deref(),
                SessionStatus::Scheduled,
            )
            .await?;

        info!(session_id = %id, "session deleted");
        Ok(())
    }

    pub async fn list(&self, patient_id: &str) -> CoreResult<Vec<SessionRecord>> {
        self.store.list_sessions(patient_id).await
    }

    /// Appointments of the patient not referenced by any session.
    /// Order-independent and duplicate-free even if an appointment is
    /// double-referenced.
    pub async fn unlinked_appointments(&self, patient_id: &str) -> CoreResult<Vec<Appointment>> {
        let appointments = self.store.list_appointments(patient_id).await?;
        let sessions = self.store.list_sessions(patient_id).await?;

        let referenced: HashSet<&str> = sessions
            .iter()
            .filter_map(|s| s.appointment_id.as_deref())
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let unlinked = appointments
            .into_iter()
            .filter(|a| !referenced.contains(a.id.as_str()) && seen.insert(a.id.clone()))
            .collect();
        Ok(unlinked)
    }

    // ============================================================================
    // AI enrichment
    // ============================================================================

    /// Generate a summary or insight text for one session and store it on
    /// the matching field. Single-flight per (session, kind). The patient
    /// name comes from the caller; the core has no patient directory.
    pub async fn generate_summary(
        &self,
        session_id: Uuid,
        kind: SummaryKind,
        patient_name: &str,
    ) -> CoreResult<SessionRecord> {
        let _guard = self
            .in_flight
            .begin(&session_id.to_string(), kind.operation_kind())?;

        let session = self.store.get_session(session_id).await?;
        if !session.has_clinical_content() {
            return Err(CoreError::InsufficientData(
                "session has no notes, summary, or transcription".to_string(),
            ));
        }

        let context = NarrativeContext {
            patient_name: patient_name.to_string(),
            sessions: vec![SessionSnapshot {
                date: session.session_date,
                summary: session.summary.clone(),
                notes: session.detailed_notes.clone(),
                insights: None,
            }],
            extra_instructions: session.transcription.clone(),
        };

        let output = self
            .narrative
            .generate(kind.narrative_kind(), &context)
            .await?;

        let text = match kind {
            SummaryKind::Summary => output.content,
            SummaryKind::Insights => output.insights,
        }
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| CoreError::external("narrative", "empty generation result"))?;

        let patch = match kind {
            SummaryKind::Summary => SessionPatch {
                ai_generated_summary: Some(text),
                ..Default::default()
            },
            SummaryKind::Insights => SessionPatch {
                ai_insights: Some(text),
                ..Default::default()
            },
        };
        self.store.update_session(session_id, patch).await
    }

    /// Transcribe a finished recording and append the text to the session's
    /// transcription, separated from any existing text.
    pub async fn transcribe_audio(
        &self,
        session_id: Uuid,
        audio: &AudioBlob,
    ) -> CoreResult<SessionRecord> {
        let _guard = self
            .in_flight
            .begin(&session_id.to_string(), OperationKind::Transcription)?;

        let session = self.store.get_session(session_id).await?;
        let text = self.stt.transcribe(audio).await?;
        if text.trim().is_empty() {
            return Err(CoreError::external("transcription", "empty transcript"));
        }

        let combined = match session.transcription.as_deref() {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{}{}{}", existing, TRANSCRIPTION_SEPARATOR, text)
            }
            _ => text,
        };

        let patch = SessionPatch {
            transcription: Some(combined),
            ..Default::default()
        };
        self.store.update_session(session_id, patch).await
    }

    // ============================================================================
    // Attachments
    // ============================================================================

    pub async fn attach_file(
        &self,
        session_id: Uuid,
        blob: &AudioBlob,
        is_recording: bool,
    ) -> CoreResult<StoredFile> {
        // Attachment requires an existing session
        self.store.get_session(session_id).await?;
        let file = self.files.upload(session_id, blob, is_recording).await?;
        debug!(session_id = %session_id, file = %file.name, "attachment stored");
        Ok(file)
    }

    pub async fn list_files(&self, session_id: Uuid) -> CoreResult<Vec<StoredFile>> {
        self.files.list(session_id).await
    }

    pub async fn remove_file(&self, id: Uuid, path: &str) -> CoreResult<()> {
        self.files.delete(id, path).await
    }

    pub async fn download_url(&self, path: &str) -> CoreResult<String> {
        self.files.download_url(path).await
    }
}
