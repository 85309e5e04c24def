//! In-flight tracking for long-running generative operations.
//!
//! Summary, insight, transcription, and evolution-report generation take
//! multiple seconds. Each is single-flight per (entity, operation kind):
//! a second submission while one is running is rejected with `InvalidState`
//! so presentation layers can suppress duplicate requests.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Summary,
    Insights,
    Transcription,
    Evolution,
}

type Key = (String, OperationKind);

/// Tracks which (entity, operation) pairs currently have a call in flight
#[derive(Clone, Default)]
pub struct InFlightTracker {
    active: Arc<Mutex<HashSet<Key>>>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the pair as in flight. Returns a guard that clears the flag on
    /// drop, or `InvalidState` when the pair is already running.
    pub fn begin(&self, entity_id: &str, kind: OperationKind) -> CoreResult<InFlightGuard> {
        let key = (entity_id.to_string(), kind);
        let mut active = self
            .active
            .lock()
            .map_err(|_| CoreError::external("in_flight", "tracker lock poisoned"))?;

        if !active.insert(key.clone()) {
            return Err(CoreError::InvalidState(format!(
                "{:?} already running for {}",
                kind, entity_id
            )));
        }

        debug!(entity_id, kind = ?kind, "operation marked in flight");
        Ok(InFlightGuard {
            key,
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_in_flight(&self, entity_id: &str, kind: OperationKind) -> bool {
        self.active
            .lock()
            .map(|set| set.contains(&(entity_id.to_string(), kind)))
            .unwrap_or(false)
    }
}

/// Clears the in-flight flag when dropped, including on error paths
pub struct InFlightGuard {
    key: Key,
    active: Arc<Mutex<HashSet<Key>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.key);
        }
    }
}
