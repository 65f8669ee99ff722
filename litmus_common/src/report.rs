//! Live report shapes
//!
//! `ExperimentReport` is the richer (canonical) report schema. The older
//! report variant, with no guardrail, bandit or pre/post fields, is a subset
//! and decodes with those collections empty.

use crate::experiment::ExperimentStatus;
use crate::metric::{GuardrailDirection, GuardrailStatus};
use crate::timestamp;
use crate::FrameError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point-in-time aggregate for one experiment
///
/// Pushed frames and REST responses both carry the full report; a newer
/// report replaces an older one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub experiment_id: String,
    pub status: ExperimentStatus,

    #[serde(default)]
    pub mde: f64,

    #[serde(default)]
    pub sample_size_required: u64,

    pub exposures: u64,
    pub conversions: u64,

    /// Fraction of the required sample collected so far
    #[serde(default)]
    pub sample_progress: f64,

    #[serde(default)]
    pub control_conversion_rate: f64,

    #[serde(default)]
    pub treatment_conversion_rate: f64,

    #[serde(default)]
    pub uplift_vs_control: f64,

    #[serde(default)]
    pub uplift_ci_lower: f64,

    #[serde(default)]
    pub uplift_ci_upper: f64,

    #[serde(default = "default_p_value")]
    pub p_value: f64,

    #[serde(default)]
    pub confidence: f64,

    /// Label produced by the decision engine (e.g. "continue", "ship")
    #[serde(default)]
    pub recommendation: String,

    #[serde(default)]
    pub guardrails_breached: u32,

    #[serde(default)]
    pub guardrails: Vec<GuardrailObservation>,

    #[serde(default)]
    pub estimated_days_to_decision: Option<u32>,

    /// Only present in the advanced analysis mode
    #[serde(default)]
    pub diff_in_diff_delta: Option<f64>,

    #[serde(default)]
    pub variant_performance: Vec<VariantPerformance>,

    #[serde(default)]
    pub assignment_policy: String,

    #[serde(default)]
    pub bandit_state: Vec<BanditArm>,

    #[serde(with = "timestamp")]
    pub last_updated_at: DateTime<Utc>,
}

fn default_p_value() -> f64 {
    1.0
}

impl ExperimentReport {
    /// Decode a live-channel text frame
    pub fn from_frame(frame: &str) -> Result<Self, FrameError> {
        if frame.trim().is_empty() {
            return Err(FrameError::Empty);
        }
        Ok(serde_json::from_str(frame)?)
    }

    /// Strictly newer than the high-water mark `held`
    pub fn is_newer_than(&self, held: DateTime<Utc>) -> bool {
        self.last_updated_at > held
    }

    pub fn has_bandit_state(&self) -> bool {
        !self.bandit_state.is_empty()
    }
}

/// Per-guardrail line of a report
///
/// The server builds these from free-form dicts, so every field is optional
/// and unknown keys are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailObservation {
    pub name: String,

    #[serde(default)]
    pub value: Option<f64>,

    #[serde(default, alias = "threshold")]
    pub threshold_value: Option<f64>,

    #[serde(default)]
    pub direction: Option<GuardrailDirection>,

    #[serde(default)]
    pub status: Option<GuardrailStatus>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl GuardrailObservation {
    pub fn is_breached(&self) -> bool {
        matches!(self.status, Some(GuardrailStatus::Breached))
    }
}

/// Pre/post performance of one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantPerformance {
    #[serde(default)]
    pub variant_id: Option<String>,

    #[serde(default, alias = "name")]
    pub variant_name: Option<String>,

    #[serde(default)]
    pub exposures: Option<u64>,

    #[serde(default)]
    pub conversions: Option<u64>,

    #[serde(default)]
    pub conversion_rate: Option<f64>,

    #[serde(default)]
    pub pre_conversion_rate: Option<f64>,

    #[serde(default)]
    pub post_conversion_rate: Option<f64>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Bayesian allocation state of one bandit arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    pub variant_id: String,

    #[serde(default)]
    pub variant_name: String,

    #[serde(default)]
    pub exposures: u64,

    #[serde(default)]
    pub conversions: u64,

    /// Beta distribution parameters
    pub alpha: f64,
    pub beta: f64,

    pub expected_rate: f64,
    pub win_probability: f64,
}

/// Immutable capture of a full report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub id: String,
    pub experiment_id: String,
    pub snapshot: ExperimentReport,

    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Sort snapshots for display, newest first
pub fn sort_snapshots(snapshots: &mut [ReportSnapshot]) {
    snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

/// Response of `GET /results/{id}?interval=...`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub experiment_id: String,

    #[serde(with = "timestamp")]
    pub generated_at: DateTime<Utc>,

    #[serde(default)]
    pub exposure_totals: BTreeMap<String, u64>,

    #[serde(default)]
    pub exposure_timeseries: Vec<ExposureSeries>,

    #[serde(default)]
    pub metric_summaries: Vec<MetricSummary>,

    #[serde(default)]
    pub lift_estimates: Vec<LiftEstimate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureSeries {
    pub variant_key: String,
    pub variant_name: String,
    pub points: Vec<ExposurePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposurePoint {
    #[serde(with = "timestamp")]
    pub bucket_start: DateTime<Utc>,
    pub exposures: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub variant_key: String,
    pub variant_name: String,
    pub metric_name: String,
    pub count: u64,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiftEstimate {
    pub variant_key: String,
    pub variant_name: String,
    pub control_rate: f64,
    pub treatment_rate: f64,
    pub absolute_lift: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64,
}

/// Bucket width for `GET /results/{id}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultsInterval {
    Minute,
    #[default]
    Hour,
}

impl ResultsInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultsInterval::Minute => "minute",
            ResultsInterval::Hour => "hour",
        }
    }
}

/// Body format for `GET /experiments/{id}/export`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}
