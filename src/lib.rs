//! # Heron
//!
//! Schema-aware analytics query synthesis with guarded, self-repairing SQL
//! execution.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Natural-language question                │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [plan normalization]
//! ┌─────────────────────────────────────────────────────────┐
//! │             Plan (intent, scope, metric, grain)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!           ┌──────────────┴──────────────┐
//!           ▼ [builder]                   ▼ [external drafter]
//! ┌───────────────────────┐   ┌───────────────────────────┐
//! │  Deterministic SQL    │   │  Drafted SQL (untrusted)  │
//! └───────────────────────┘   └───────────────────────────┘
//!                          │
//!                          ▼ [guardrail + allow-list]
//! ┌─────────────────────────────────────────────────────────┐
//! │      Orchestrator: execute / evaluate / repair loop      │
//! │   (plan→SQL cache, bounded repairs, trace log, store)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [adapter per engine]
//! ┌─────────────────────────────────────────────────────────┐
//! │            Postgres · MySQL · SQLite execution           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything that touches a database goes through the guardrail: the
//! builder's SQL because it is cheap to check, drafted SQL because it is
//! untrusted. Mining snapshots (trend fits, RFM summaries) are computed off
//! the same adapters and stored versioned in the metadata store.

pub mod adapter;
pub mod builder;
pub mod config;
pub mod drafter;
pub mod error;
pub mod guardrail;
pub mod orchestrator;
pub mod plan;
pub mod schema;
pub mod snapshot;
pub mod sql;
pub mod store;

pub use error::HeronError;
