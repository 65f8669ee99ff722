//! Guardrail observations and decision audit records

use crate::experiment::ExperimentStatus;
use crate::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of the threshold is unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailDirection {
    /// Breached when the value exceeds the threshold
    Max,
    /// Breached when the value falls below the threshold
    Min,
}

impl GuardrailDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailDirection::Max => "max",
            GuardrailDirection::Min => "min",
        }
    }
}

impl fmt::Display for GuardrailDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GuardrailDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "max" => Ok(GuardrailDirection::Max),
            "min" => Ok(GuardrailDirection::Min),
            other => Err(format!("direction must be `max` or `min`, got `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailStatus {
    Healthy,
    Breached,
}

impl GuardrailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailStatus::Healthy => "healthy",
            GuardrailStatus::Breached => "breached",
        }
    }
}

/// A recorded guardrail observation; never mutated once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailMetric {
    pub id: String,
    pub experiment_id: String,
    pub name: String,
    pub value: f64,
    pub threshold_value: f64,
    pub direction: GuardrailDirection,
    /// Derived by the server from value, threshold and direction
    pub status: GuardrailStatus,

    #[serde(with = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

/// Body of `POST /metrics/guardrails`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailCreate {
    pub experiment_id: String,
    pub name: String,
    pub value: f64,
    pub threshold_value: f64,
    pub direction: GuardrailDirection,
}

/// Who made a status decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Auto,
    Manual,
}

/// A recorded status transition (read-only for this client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAudit {
    pub id: String,
    pub experiment_id: String,
    pub previous_status: String,
    pub new_status: String,

    #[serde(default)]
    pub reason: Option<String>,

    pub source: DecisionSource,
    pub actor: String,

    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /experiments/{id}/decision`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOverride {
    pub status: ExperimentStatus,
    pub reason: Option<String>,
    pub actor: String,
}
