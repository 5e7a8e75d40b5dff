//! Crate-level error type.
//!
//! Each module keeps its own error enum; [`HeronError`] is the umbrella the
//! orchestrator and binaries surface to callers.

use crate::adapter::AdapterError;
use crate::builder::BuildError;
use crate::config::SettingsError;
use crate::drafter::DraftError;
use crate::guardrail::GuardrailError;
use crate::orchestrator::ErrorClass;
use crate::plan::PlanError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum HeronError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Draft(#[from] DraftError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An execution failure that survived the whole repair budget. Carries
    /// the classification and the last attempted SQL so callers can diagnose
    /// without re-running the query.
    #[error("query failed after {attempts} attempts ({}): {source}", class.as_str())]
    RepairExhausted {
        class: ErrorClass,
        sql: String,
        attempts: u32,
        #[source]
        source: AdapterError,
    },
}
