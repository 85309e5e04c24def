//! Evolution aggregation.
//!
//! Two read paths over a patient's history: a pure monthly progress series
//! derived from the active plan, and an AI-written evolution report built
//! from the recent completed sessions. The series is computed on demand and
//! never persisted; reports are appended to the active plan.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::inflight::{InFlightTracker, OperationKind};
use crate::narrative::{NarrativeContext, NarrativeGenerator, NarrativeKind, SessionSnapshot};
use crate::persistence::RecordStore;
use crate::records::{EvolutionPoint, EvolutionReport, Period, SessionStatus, TreatmentPlan};

/// Build the cumulative monthly progress series for a plan.
///
/// Buckets improvements by their date and goal completions by their
/// `completed_at` month, then accumulates. The plan's start month is always
/// present so a chart has an origin even before anything is logged.
pub fn build_series(plan: &TreatmentPlan) -> Vec<EvolutionPoint> {
    let mut buckets: BTreeMap<Period, (u32, u32)> = BTreeMap::new();
    buckets.insert(Period::from_date(plan.start_date), (0, 0));

    for improvement in &plan.improvements {
        let entry = buckets
            .entry(Period::from_datetime(improvement.date))
            .or_insert((0, 0));
        entry.0 += 1;
    }

    for result in &plan.goal_results {
        if !result.completed {
            continue;
        }
        if let Some(completed_at) = result.completed_at {
            let entry = buckets
                .entry(Period::from_datetime(completed_at))
                .or_insert((0, 0));
            entry.1 += 1;
        }
    }

    let mut improvements_total = 0u32;
    let mut goals_total = 0u32;
    buckets
        .into_iter()
        .map(|(period, (improvements, goals))| {
            improvements_total += improvements;
            goals_total += goals;
            EvolutionPoint {
                period,
                cumulative_improvements: improvements_total,
                cumulative_goals_completed: goals_total,
            }
        })
        .collect()
}

pub struct EvolutionAggregator {
    store: Arc<dyn RecordStore>,
    narrative: Arc<dyn NarrativeGenerator>,
    in_flight: InFlightTracker,
    min_completed_sessions: usize,
    recent_session_limit: usize,
}

impl EvolutionAggregator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        narrative: Arc<dyn NarrativeGenerator>,
        min_completed_sessions: usize,
        recent_session_limit: usize,
    ) -> Self {
        Self {
            store,
            narrative,
            in_flight: InFlightTracker::new(),
            min_completed_sessions,
            recent_session_limit,
        }
    }

    /// Monthly series for the patient's active plan, empty when none exists
    pub async fn series(&self, patient_id: &str) -> CoreResult<Vec<EvolutionPoint>> {
        match self.store.active_plan(patient_id).await? {
            Some(plan) => Ok(build_series(&plan)),
            None => Ok(Vec::new()),
        }
    }

    /// Generate a narrative evolution report from the patient's recent
    /// completed sessions. Single-flight per patient; sessions without any
    /// clinical text do not count toward the minimum and are not sent.
    pub async fn generate_report(
        &self,
        patient_id: &str,
        patient_name: &str,
    ) -> CoreResult<EvolutionReport> {
        let _guard = self.in_flight.begin(patient_id, OperationKind::Evolution)?;

        let mut qualifying: Vec<_> = self
            .store
            .list_sessions(patient_id)
            .await?
            .into_iter()
            .filter(|s| s.status == SessionStatus::Completed && s.has_clinical_content())
            .collect();

        if qualifying.len() < self.min_completed_sessions {
            return Err(CoreError::InsufficientData(format!(
                "{} completed sessions with clinical content, need {}",
                qualifying.len(),
                self.min_completed_sessions
            )));
        }

        // Most recent first, capped; ties break on creation time
        qualifying.sort_by(|a, b| {
            b.session_date
                .cmp(&a.session_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        qualifying.truncate(self.recent_session_limit);
        debug!(
            patient_id,
            sessions = qualifying.len(),
            "building evolution context"
        );

        let context = NarrativeContext {
            patient_name: patient_name.to_string(),
            sessions: qualifying
                .iter()
                .map(|s| SessionSnapshot {
                    date: s.session_date,
                    summary: s.summary.clone().or_else(|| s.ai_generated_summary.clone()),
                    notes: s.detailed_notes.clone(),
                    insights: s.ai_insights.clone(),
                })
                .collect(),
            extra_instructions: None,
        };

        let output = self
            .narrative
            .generate(NarrativeKind::Evolution, &context)
            .await?;
        let content = output
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                CoreError::external("narrative", "evolution generation returned no content")
            })?;

        let report = EvolutionReport {
            generated_at: chrono::Utc::now(),
            content,
        };

        // Persist onto the active plan when one exists; a report for a
        // patient between plans is still returned to the caller
        if let Some(mut plan) = self.store.active_plan(patient_id).await? {
            plan.evolution_reports.push(report.clone());
            plan.updated_at = chrono::Utc::now();
            self.store.save_plan(plan).await?;
        }

        info!(patient_id, "evolution report generated");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::NarrativeOutput;
    use crate::persistence::MemoryStore;
    use crate::plans::{PlanDraft, TreatmentPlanLedger};
    use crate::records::{SessionDraft, SessionPatch};
    use crate::sessions::SessionRecordStore;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNarrative {
        content: Option<String>,
        calls: AtomicUsize,
    }

    impl CountingNarrative {
        fn returning(content: &str) -> Self {
            Self {
                content: Some(content.to_string()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NarrativeGenerator for CountingNarrative {
        async fn generate(
            &self,
            _kind: NarrativeKind,
            _context: &NarrativeContext,
        ) -> CoreResult<NarrativeOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(NarrativeOutput {
                content: self.content.clone(),
                insights: None,
            })
        }
    }

    fn plan_draft() -> PlanDraft {
        PlanDraft {
            start_date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            estimated_sessions: 12,
            objectives: Vec::new(),
            discharge_objectives: Vec::new(),
            approaches: Vec::new(),
            short_term_goals: vec!["Respirar".to_string()],
            long_term_goals: Vec::new(),
            notes: None,
        }
    }

    async fn seed_completed_session(
        sessions: &SessionRecordStore,
        patient: &str,
        date: NaiveDate,
        notes: Option<&str>,
    ) {
        let record = sessions
            .create(SessionDraft {
                patient_id: patient.to_string(),
                appointment_id: None,
                session_date: date,
                duration_minutes: 50,
                detailed_notes: notes.map(|s| s.to_string()),
                summary: None,
                clinical_observations: None,
            })
            .await
            .unwrap();
        sessions
            .update(
                record.id,
                SessionPatch {
                    status: Some(SessionStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    fn sessions_over(store: Arc<MemoryStore>) -> SessionRecordStore {
        use crate::files::MemoryFileStorage;
        use crate::stt::{AudioBlob, SpeechToText};

        struct NoStt;
        #[async_trait]
        impl SpeechToText for NoStt {
            async fn transcribe(&self, _audio: &AudioBlob) -> CoreResult<String> {
                Ok(String::new())
            }
        }

        SessionRecordStore::new(
            store,
            Arc::new(CountingNarrative::returning("resumo")),
            Arc::new(NoStt),
            Arc::new(MemoryFileStorage::new()),
        )
    }

    #[tokio::test]
    async fn test_series_empty_without_active_plan() {
        let store = Arc::new(MemoryStore::new());
        let narrative = Arc::new(CountingNarrative::returning("x"));
        let aggregator = EvolutionAggregator::new(store, narrative, 2, 10);
        assert!(aggregator.series("p1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_series_accumulates_by_month() {
        let store = Arc::new(MemoryStore::new());
        let ledger = TreatmentPlanLedger::new(store.clone());
        let plan = ledger
            .create_or_replace("p1", plan_draft(), false)
            .await
            .unwrap();

        let jan = Utc.with_ymd_and_hms(2026, 1, 20, 9, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2026, 3, 5, 9, 0, 0).unwrap();
        ledger
            .add_improvement(plan.id, "Menos ansiedade", "emocional", Some(jan))
            .await
            .unwrap();
        ledger
            .add_improvement(plan.id, "Sono regular", "fisico", Some(mar))
            .await
            .unwrap();
        ledger
            .add_improvement(plan.id, "Rotina de exercícios", "fisico", Some(mar))
            .await
            .unwrap();

        let current = store.get_plan(plan.id).await.unwrap();
        let series = build_series(&current);

        let labels: Vec<String> = series.iter().map(|p| p.period.to_string()).collect();
        assert_eq!(labels, vec!["2026-01", "2026-03"]);
        assert_eq!(series[0].cumulative_improvements, 1);
        assert_eq!(series[1].cumulative_improvements, 3);
    }

    #[tokio::test]
    async fn test_series_includes_goal_completions() {
        let store = Arc::new(MemoryStore::new());
        let ledger = TreatmentPlanLedger::new(store.clone());
        let plan = ledger
            .create_or_replace("p1", plan_draft(), false)
            .await
            .unwrap();
        ledger
            .toggle_goal_completion(plan.id, "Respirar")
            .await
            .unwrap();

        let current = store.get_plan(plan.id).await.unwrap();
        let series = build_series(&current);

        let total: u32 = series
            .last()
            .map(|p| p.cumulative_goals_completed)
            .unwrap_or(0);
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_series_ignores_uncompleted_results() {
        let store = Arc::new(MemoryStore::new());
        let ledger = TreatmentPlanLedger::new(store.clone());
        let plan = ledger
            .create_or_replace("p1", plan_draft(), false)
            .await
            .unwrap();
        ledger
            .set_goal_result(plan.id, "Respirar", "em andamento")
            .await
            .unwrap();

        let current = store.get_plan(plan.id).await.unwrap();
        let series = build_series(&current);
        assert!(series.iter().all(|p| p.cumulative_goals_completed == 0));
    }

    #[tokio::test]
    async fn test_report_requires_minimum_sessions_without_calling_narrative() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions_over(store.clone());
        seed_completed_session(
            &sessions,
            "p1",
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            Some("notas"),
        )
        .await;

        let narrative = Arc::new(CountingNarrative::returning("relatório"));
        let aggregator = EvolutionAggregator::new(store, narrative.clone(), 2, 10);

        let result = aggregator.generate_report("p1", "Maria").await;
        assert!(matches!(result, Err(CoreError::InsufficientData(_))));
        assert_eq!(narrative.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sessions_without_content_do_not_qualify() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions_over(store.clone());
        for day in 1..=3 {
            seed_completed_session(
                &sessions,
                "p1",
                NaiveDate::from_ymd_opt(2026, 2, day).unwrap(),
                None,
            )
            .await;
        }

        let narrative = Arc::new(CountingNarrative::returning("relatório"));
        let aggregator = EvolutionAggregator::new(store, narrative.clone(), 2, 10);

        let result = aggregator.generate_report("p1", "Maria").await;
        assert!(matches!(result, Err(CoreError::InsufficientData(_))));
        assert_eq!(narrative.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_report_appended_to_active_plan() {
        let store = Arc::new(MemoryStore::new());
        let ledger = TreatmentPlanLedger::new(store.clone());
        let plan = ledger
            .create_or_replace("p1", plan_draft(), false)
            .await
            .unwrap();

        let sessions = sessions_over(store.clone());
        for day in 1..=2 {
            seed_completed_session(
                &sessions,
                "p1",
                NaiveDate::from_ymd_opt(2026, 2, day).unwrap(),
                Some("notas da sessão"),
            )
            .await;
        }

        let narrative = Arc::new(CountingNarrative::returning("Evolução positiva"));
        let aggregator = EvolutionAggregator::new(store.clone(), narrative, 2, 10);

        let report = aggregator.generate_report("p1", "Maria").await.unwrap();
        assert_eq!(report.content, "Evolução positiva");

        let current = store.get_plan(plan.id).await.unwrap();
        assert_eq!(current.evolution_reports.len(), 1);
        assert_eq!(current.evolution_reports[0].content, "Evolução positiva");
    }

    #[tokio::test]
    async fn test_report_without_active_plan_still_returned() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions_over(store.clone());
        for day in 1..=2 {
            seed_completed_session(
                &sessions,
                "p1",
                NaiveDate::from_ymd_opt(2026, 2, day).unwrap(),
                Some("notas"),
            )
            .await;
        }

        let narrative = Arc::new(CountingNarrative::returning("Evolução"));
        let aggregator = EvolutionAggregator::new(store, narrative, 2, 10);

        let report = aggregator.generate_report("p1", "Maria").await.unwrap();
        assert_eq!(report.content, "Evolução");
    }

    #[tokio::test]
    async fn test_report_caps_sessions_at_recent_limit() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions_over(store.clone());
        for day in 1..=5 {
            seed_completed_session(
                &sessions,
                "p1",
                NaiveDate::from_ymd_opt(2026, 2, day).unwrap(),
                Some("notas"),
            )
            .await;
        }

        struct CapturingNarrative {
            sessions_seen: std::sync::Mutex<usize>,
            first_date: std::sync::Mutex<Option<NaiveDate>>,
        }

        #[async_trait]
        impl NarrativeGenerator for CapturingNarrative {
            async fn generate(
                &self,
                _kind: NarrativeKind,
                context: &NarrativeContext,
            ) -> CoreResult<NarrativeOutput> {
                *self.sessions_seen.lock().unwrap() = context.sessions.len();
                *self.first_date.lock().unwrap() = context.sessions.first().map(|s| s.date);
                Ok(NarrativeOutput {
                    content: Some("ok".to_string()),
                    insights: None,
                })
            }
        }

        let narrative = Arc::new(CapturingNarrative {
            sessions_seen: std::sync::Mutex::new(0),
            first_date: std::sync::Mutex::new(None),
        });
        let aggregator = EvolutionAggregator::new(store, narrative.clone(), 2, 3);

        aggregator.generate_report("p1", "Maria").await.unwrap();
        assert_eq!(*narrative.sessions_seen.lock().unwrap(), 3);
        // Most recent first
        assert_eq!(
            *narrative.first_date.lock().unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 5)
        );
    }

    #[tokio::test]
    async fn test_empty_report_content_is_external_error() {
        let store = Arc::new(MemoryStore::new());
        let sessions = sessions_over(store.clone());
        for day in 1..=2 {
            seed_completed_session(
                &sessions,
                "p1",
                NaiveDate::from_ymd_opt(2026, 2, day).unwrap(),
                Some("notas"),
            )
            .await;
        }

        let narrative = Arc::new(CountingNarrative {
            content: Some("  ".to_string()),
            calls: AtomicUsize::new(0),
        });
        let aggregator = EvolutionAggregator::new(store.clone(), narrative, 2, 10);

        let result = aggregator.generate_report("p1", "Maria").await;
        assert!(matches!(result, Err(CoreError::External { .. })));
    }

    mod properties {
        use super::*;
        use crate::records::{
            ClinicalStatus, Goal, GoalResult, Improvement, PlanStatus, TreatmentPlan,
        };
        use proptest::prelude::*;
        use uuid::Uuid;

        fn plan_with(
            improvement_months: Vec<(i32, u32)>,
            completion_months: Vec<(i32, u32)>,
        ) -> TreatmentPlan {
            let mut plan = TreatmentPlan {
                id: Uuid::new_v4(),
                patient_id: "p1".to_string(),
                status: PlanStatus::Active,
                start_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                estimated_sessions: 12,
                objectives: Vec::new(),
                discharge_objectives: Vec::new(),
                approaches: Vec::new(),
                short_term_goals: Vec::new(),
                long_term_goals: Vec::new(),
                notes: None,
                current_status: ClinicalStatus::EmAndamento,
                current_status_notes: None,
                last_review_date: None,
                next_review_date: None,
                goal_results: Vec::new(),
                improvements: Vec::new(),
                evolution_reports: Vec::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            for (year, month) in improvement_months {
                plan.improvements.push(Improvement {
                    id: Uuid::new_v4(),
                    description: "melhora".to_string(),
                    date: Utc.with_ymd_and_hms(year, month, 10, 12, 0, 0).unwrap(),
                    category: "geral".to_string(),
                });
            }
            for (year, month) in completion_months {
                let goal = Goal::new("meta");
                plan.goal_results.push(GoalResult {
                    goal_id: goal.id,
                    goal: goal.text.clone(),
                    completed: true,
                    completed_at: Some(Utc.with_ymd_and_hms(year, month, 10, 12, 0, 0).unwrap()),
                    result: None,
                });
                plan.short_term_goals.push(goal);
            }
            plan
        }

        fn month_strategy() -> impl Strategy<Value = (i32, u32)> {
            (2025i32..2027, 1u32..=12)
        }

        proptest! {
            #[test]
            fn prop_series_is_sorted_and_monotone(
                improvements in proptest::collection::vec(month_strategy(), 0..20),
                completions in proptest::collection::vec(month_strategy(), 0..10),
            ) {
                let total_improvements = improvements.len() as u32;
                let total_completions = completions.len() as u32;
                let plan = plan_with(improvements, completions);
                let series = build_series(&plan);

                prop_assert!(!series.is_empty());
                for pair in series.windows(2) {
                    prop_assert!(pair[0].period < pair[1].period);
                    prop_assert!(
                        pair[0].cumulative_improvements <= pair[1].cumulative_improvements
                    );
                    prop_assert!(
                        pair[0].cumulative_goals_completed <= pair[1].cumulative_goals_completed
                    );
                }

                let last = series.last().unwrap();
                prop_assert_eq!(last.cumulative_improvements, total_improvements);
                prop_assert_eq!(last.cumulative_goals_completed, total_completions);
            }
        }
    }
}
