//! Litmus Common - Shared schemas for the experimentation platform client
//!
//! This crate contains the entity and report shapes exchanged with the
//! platform over REST and the live channel. Pure data contracts, no I/O.

pub mod experiment;
pub mod metric;
pub mod report;
pub mod timestamp;

pub use experiment::{
    CondensedPerformance, ExecutiveSummary, Experiment, ExperimentCreate, ExperimentPatch,
    ExperimentStatus, LifecycleAction, TerminateRequest, UnknownStatus, Variant,
};
pub use metric::{
    DecisionAudit, DecisionOverride, DecisionSource, GuardrailCreate, GuardrailDirection,
    GuardrailMetric, GuardrailStatus,
};
pub use report::{
    sort_snapshots, BanditArm, ExperimentReport, ExperimentResults, ExportFormat, ExposurePoint,
    ExposureSeries, GuardrailObservation, LiftEstimate, MetricSummary, ReportSnapshot,
    ResultsInterval, VariantPerformance,
};

use thiserror::Error;

/// Live-channel frame errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Empty frame")]
    Empty,

    #[error("Malformed report frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Constants for the platform API
pub mod constants {
    /// Prefix of every REST and WebSocket path
    pub const API_PREFIX: &str = "/api/v1";

    /// Fallback REST base URL
    pub const DEFAULT_API_URL: &str = "http://localhost:8000";

    /// Fallback WebSocket base URL
    pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";

    /// Path of the live report channel for an experiment (relative to the prefix)
    pub fn live_path(experiment_id: &str) -> String {
        format!("/ws/experiments/{}/live", experiment_id)
    }
}
