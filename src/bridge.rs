//! Session → appointment status mirroring.
//!
//! One direction only: a session status change is mirrored onto its linked
//! appointment, but appointment edits made by the scheduling subsystem never
//! propagate back to a session. Appointment edits reflect logistics; session
//! edits reflect clinical outcome.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::CoreResult;
use crate::persistence::RecordStore;
use crate::records::{AppointmentStatus, SessionStatus};

/// Map a session status to the appointment status it implies
pub fn map_session_status(status: SessionStatus) -> AppointmentStatus {
    match status {
        SessionStatus::Scheduled => AppointmentStatus::Scheduled,
        SessionStatus::Completed => AppointmentStatus::Done,
        SessionStatus::Cancelled => AppointmentStatus::Cancelled,
        SessionStatus::Rescheduled => AppointmentStatus::Scheduled,
        SessionStatus::NoShow => AppointmentStatus::Cancelled,
    }
}

pub struct AppointmentStatusBridge {
    store: Arc<dyn RecordStore>,
}

impl AppointmentStatusBridge {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Mirror a session status change onto the linked appointment.
    /// No-op when the session carries no appointment link.
    pub async fn on_session_status_change(
        &self,
        patient_id: &str,
        appointment_id: Option<&str>,
        status: SessionStatus,
    ) -> CoreResult<()> {
        let Some(appointment_id) = appointment_id else {
            debug!(patient_id, "session has no linked appointment, skipping mirror");
            return Ok(());
        };

        let mapped = map_session_status(status);
        self.store
            .set_appointment_status(patient_id, appointment_id, mapped)
            .await?;

        info!(
            patient_id,
            appointment_id,
            session_status = ?status,
            appointment_status = ?mapped,
            "mirrored session status onto appointment"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::records::Appointment;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_mapping_table() {
        assert_eq!(
            map_session_status(SessionStatus::Scheduled),
            AppointmentStatus::Scheduled
        );
        assert_eq!(
            map_session_status(SessionStatus::Completed),
            AppointmentStatus::Done
        );
        assert_eq!(
            map_session_status(SessionStatus::Cancelled),
            AppointmentStatus::Cancelled
        );
        assert_eq!(
            map_session_status(SessionStatus::Rescheduled),
            AppointmentStatus::Scheduled
        );
        assert_eq!(
            map_session_status(SessionStatus::NoShow),
            AppointmentStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_no_op_without_link() {
        let store = Arc::new(MemoryStore::new());
        let bridge = AppointmentStatusBridge::new(store);
        // No appointment exists; a linked call would fail, an unlinked one must not
        bridge
            .on_session_status_change("p1", None, SessionStatus::Completed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_show_mirrors_cancelled() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_appointment(Appointment {
                id: "a1".to_string(),
                patient_id: "p1".to_string(),
                date_time: Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).unwrap(),
                status: AppointmentStatus::Confirmed,
                payment_value: None,
                service: None,
                mode: None,
            })
            .await
            .unwrap();

        let bridge = AppointmentStatusBridge::new(store.clone());
        bridge
            .on_session_status_change("p1", Some("a1"), SessionStatus::NoShow)
            .await
            .unwrap();

        let appointments = store.list_appointments("p1").await.unwrap();
        assert_eq!(appointments[0].status, AppointmentStatus::Cancelled);
    }
}
