//! Experiment entity, lifecycle payloads and list/summary shapes

use crate::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Experiment lifecycle status
///
/// The platform has used two vocabularies over time: upper-case
/// `DRAFT/RUNNING/PAUSED/STOPPED` and the lower-case outcome labels. Both
/// decode into this one enum; it always encodes lower-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    #[serde(alias = "DRAFT")]
    Draft,
    #[serde(alias = "RUNNING")]
    Running,
    #[serde(alias = "PAUSED")]
    Paused,
    #[serde(alias = "STOPPED")]
    Stopped,
    Passed,
    Failed,
    Inconclusive,
    TerminatedWithoutCause,
}

impl ExperimentStatus {
    pub const ALL: [ExperimentStatus; 8] = [
        ExperimentStatus::Draft,
        ExperimentStatus::Running,
        ExperimentStatus::Paused,
        ExperimentStatus::Stopped,
        ExperimentStatus::Passed,
        ExperimentStatus::Failed,
        ExperimentStatus::Inconclusive,
        ExperimentStatus::TerminatedWithoutCause,
    ];

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Stopped => "stopped",
            ExperimentStatus::Passed => "passed",
            ExperimentStatus::Failed => "failed",
            ExperimentStatus::Inconclusive => "inconclusive",
            ExperimentStatus::TerminatedWithoutCause => "terminated_without_cause",
        }
    }

    /// Terminal statuses: the experiment is immutable from the client's side
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExperimentStatus::Stopped
                | ExperimentStatus::Passed
                | ExperimentStatus::Failed
                | ExperimentStatus::Inconclusive
                | ExperimentStatus::TerminatedWithoutCause
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ExperimentStatus::Running)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown experiment status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ExperimentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        ExperimentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == lowered)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A traffic arm of an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Unique within the experiment
    pub name: String,

    /// Share of traffic in [0, 1]; weights across variants sum to 1
    #[serde(alias = "traffic_allocation")]
    pub weight: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_json: Option<serde_json::Value>,
}

impl Variant {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: None,
            key: None,
            name: name.into(),
            weight,
            config_json: None,
        }
    }
}

/// Experiment as returned by the platform
///
/// Fields missing from older payloads fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub hypothesis: String,

    #[serde(default)]
    pub owner_team: String,

    #[serde(default)]
    pub created_by: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub unit_type: String,

    #[serde(default)]
    pub targeting: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub ramp_pct: u8,

    #[serde(default)]
    pub version: u32,

    /// Minimum detectable effect
    #[serde(default)]
    pub mde: f64,

    #[serde(default)]
    pub baseline_rate: f64,

    #[serde(default)]
    pub alpha: f64,

    #[serde(default)]
    pub power: f64,

    #[serde(default)]
    pub sample_size_required: u64,

    pub status: ExperimentStatus,

    #[serde(default, with = "timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, with = "timestamp::option")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub termination_reason: Option<String>,

    #[serde(default)]
    pub variants: Vec<Variant>,
}

/// Body of `POST /experiments`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentCreate {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_team: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    pub mde: f64,
    pub baseline_rate: f64,
    pub alpha: f64,
    pub power: f64,
    pub variants: Vec<Variant>,
}

impl ExperimentCreate {
    /// A two-arm 50/50 control/treatment experiment with the platform's
    /// default design parameters
    pub fn ab(name: impl Into<String>, mde: f64) -> Self {
        Self {
            name: name.into(),
            hypothesis: None,
            description: None,
            owner_team: None,
            tags: Vec::new(),
            mde,
            baseline_rate: 0.1,
            alpha: 0.05,
            power: 0.8,
            variants: vec![Variant::new("control", 0.5), Variant::new("treatment", 0.5)],
        }
    }

    /// Sum of variant weights (the server rejects anything far from 1)
    pub fn total_weight(&self) -> f64 {
        self.variants.iter().map(|v| v.weight).sum()
    }
}

/// Body of `PATCH /experiments/{id}`; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_team: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_pct: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<Variant>>,
}

impl ExperimentPatch {
    pub fn is_empty(&self) -> bool {
        *self == ExperimentPatch::default()
    }
}

/// Body of the launch/pause/stop lifecycle endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_pct: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Body of `POST /experiments/{id}/terminate`
///
/// `reason` is always serialized; an empty reason is sent as an explicit null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateRequest {
    pub reason: Option<String>,
}

impl TerminateRequest {
    pub fn new(reason: Option<&str>) -> Self {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        Self { reason }
    }
}

/// One card of `GET /experiments/running`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CondensedPerformance {
    pub experiment_id: String,
    pub name: String,
    pub status: ExperimentStatus,
    pub exposures: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub uplift_vs_control: f64,
    pub confidence: f64,
    pub sample_progress: f64,
}

/// Experiment counts per status from `GET /experiments/executive-summary`
///
/// Every count defaults to zero so either generation of the endpoint decodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutiveSummary {
    pub draft: u64,
    pub running: u64,
    pub paused: u64,
    pub stopped: u64,
    pub passed: u64,
    pub failed: u64,
    pub inconclusive: u64,
    pub terminated_without_cause: u64,
}

impl ExecutiveSummary {
    /// Pairs of (status, count) in display order
    pub fn counts(&self) -> [(ExperimentStatus, u64); 8] {
        [
            (ExperimentStatus::Draft, self.draft),
            (ExperimentStatus::Running, self.running),
            (ExperimentStatus::Paused, self.paused),
            (ExperimentStatus::Stopped, self.stopped),
            (ExperimentStatus::Passed, self.passed),
            (ExperimentStatus::Failed, self.failed),
            (ExperimentStatus::Inconclusive, self.inconclusive),
            (ExperimentStatus::TerminatedWithoutCause, self.terminated_without_cause),
        ]
    }

    pub fn total(&self) -> u64 {
        self.counts().iter().map(|(_, n)| n).sum()
    }
}
