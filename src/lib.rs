//! Clinical-record reconciliation core.
//!
//! Library backing a clinic-management app: session records, treatment
//! plans, and the derived evolution views, plus the glue that keeps session
//! status and the scheduling subsystem's appointments consistent. AI
//! collaborators (narrative generation, speech-to-text) and persistence sit
//! behind traits so the hosting app wires in its own implementations.
//!
//! The main entry points are [`sessions::SessionRecordStore`],
//! [`plans::TreatmentPlanLedger`], and [`evolution::EvolutionAggregator`],
//! all sharing one [`persistence::RecordStore`].

pub mod bridge;
pub mod config;
pub mod error;
pub mod evolution;
pub mod files;
pub mod inflight;
pub mod narrative;
pub mod persistence;
pub mod plans;
pub mod records;
pub mod sessions;
pub mod stt;

pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use evolution::EvolutionAggregator;
pub use persistence::{MemoryStore, RecordStore};
pub use plans::TreatmentPlanLedger;
pub use sessions::SessionRecordStore;

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initialize logging for hosts that don't bring their own subscriber.
/// Safe to call more than once; only the first call takes effect.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    });
}
