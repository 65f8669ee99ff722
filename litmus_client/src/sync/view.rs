//! Merged report view and its merge rules
//!
//! Everything here is synchronous and free of I/O; the controller decides
//! when to call it.

use chrono::{DateTime, Utc};
use litmus_common::{
    sort_snapshots, Experiment, ExperimentReport, GuardrailMetric, ReportSnapshot,
};
use std::collections::HashSet;

/// One independently loaded part of the view
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Slice<T> {
    /// No response yet
    #[default]
    NotLoaded,
    /// The last fetch failed; nothing stale is kept
    Failed(String),
    Loaded(T),
}

impl<T> Slice<T> {
    pub fn loaded(&self) -> Option<&T> {
        match self {
            Slice::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Slice::Loaded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Slice::Failed(_))
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            Slice::Failed(detail) => Some(detail),
            _ => None,
        }
    }
}

/// Controller lifecycle for one mount
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    #[default]
    Idle,
    Loading,
    Synced,
    /// A write action is in flight
    Updating,
    Terminated,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Loading => "loading",
            SyncPhase::Synced => "synced",
            SyncPhase::Updating => "updating",
            SyncPhase::Terminated => "terminated",
        }
    }
}

/// Push channel state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelStatus {
    #[default]
    Connecting,
    Live,
    Reconnecting {
        attempt: u32,
    },
    /// Reconnect attempts exhausted
    Offline,
    /// Closed on unmount
    Closed,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Live => "live",
            ChannelStatus::Reconnecting { .. } => "reconnecting",
            ChannelStatus::Offline => "offline",
            ChannelStatus::Closed => "closed",
        }
    }
}

/// Outcome of offering a report to the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportMerge {
    Accepted,
    /// Not strictly newer than the newest report already accepted
    Stale {
        held: DateTime<Utc>,
        offered: DateTime<Utc>,
    },
    /// Report for a different experiment
    Foreign(String),
}

/// Everything a detail view renders for one experiment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportView {
    pub experiment_id: String,
    pub phase: SyncPhase,
    pub channel: ChannelStatus,
    pub experiment: Slice<Experiment>,
    pub report: Slice<ExperimentReport>,
    /// Newest first
    pub snapshots: Slice<Vec<ReportSnapshot>>,
    /// Newest first
    pub guardrails: Slice<Vec<GuardrailMetric>>,
    /// Last write-action failure, cleared by the next successful action
    pub last_error: Option<String>,
    /// `last_updated_at` of the newest report ever accepted; survives a
    /// failed report fetch so ordering holds across failures
    report_high_water: Option<DateTime<Utc>>,
}

impl ReportView {
    pub fn new(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            ..Self::default()
        }
    }

    pub fn report_high_water(&self) -> Option<DateTime<Utc>> {
        self.report_high_water
    }

    /// Replace the report slice if `report` is strictly newer than anything
    /// accepted so far
    pub fn offer_report(&mut self, report: ExperimentReport) -> ReportMerge {
        if report.experiment_id != self.experiment_id {
            return ReportMerge::Foreign(report.experiment_id);
        }

        if let Some(held) = self.report_high_water {
            if !report.is_newer_than(held) {
                return ReportMerge::Stale {
                    held,
                    offered: report.last_updated_at,
                };
            }
        }

        self.report_high_water = Some(report.last_updated_at);
        self.report = Slice::Loaded(report);
        ReportMerge::Accepted
    }

    pub fn fail_report(&mut self, detail: String) {
        self.report = Slice::Failed(detail);
    }

    pub fn set_experiment(&mut self, experiment: Experiment) {
        self.experiment = Slice::Loaded(experiment);
    }

    pub fn fail_experiment(&mut self, detail: String) {
        self.experiment = Slice::Failed(detail);
    }

    /// The experiment has reached a terminal status
    pub fn is_terminated(&self) -> bool {
        self.experiment
            .loaded()
            .map(|e| e.status.is_terminal())
            .unwrap_or(false)
    }

    /// Merge a fetched snapshot list into the held one
    ///
    /// Snapshots are append-only, so the union by id is always correct no
    /// matter which of two overlapping fetches resolves first.
    pub fn merge_snapshots(&mut self, fetched: Vec<ReportSnapshot>) {
        let mut merged = union_by_id(self.snapshots.loaded(), fetched, |s| s.id.as_str());
        sort_snapshots(&mut merged);
        self.snapshots = Slice::Loaded(merged);
    }

    pub fn fail_snapshots(&mut self, detail: String) {
        self.snapshots = Slice::Failed(detail);
    }

    /// Merge a fetched guardrail list into the held one (append-only, like
    /// snapshots)
    pub fn merge_guardrails(&mut self, fetched: Vec<GuardrailMetric>) {
        let mut merged = union_by_id(self.guardrails.loaded(), fetched, |g| g.id.as_str());
        sort_guardrails(&mut merged);
        self.guardrails = Slice::Loaded(merged);
    }

    pub fn fail_guardrails(&mut self, detail: String) {
        self.guardrails = Slice::Failed(detail);
    }

    /// Put a freshly created guardrail at the front; `false` if already held
    pub fn prepend_guardrail(&mut self, metric: GuardrailMetric) -> bool {
        match &mut self.guardrails {
            Slice::Loaded(list) => {
                if list.iter().any(|g| g.id == metric.id) {
                    return false;
                }
                list.insert(0, metric);
            }
            other => *other = Slice::Loaded(vec![metric]),
        }
        true
    }

    /// Recompute the phase from in-flight work
    pub(crate) fn settle_phase(&mut self, loading: bool, updating: bool) {
        self.phase = if self.is_terminated() {
            SyncPhase::Terminated
        } else if updating {
            SyncPhase::Updating
        } else if loading {
            SyncPhase::Loading
        } else {
            SyncPhase::Synced
        };
    }
}

fn union_by_id<T: Clone, F>(held: Option<&Vec<T>>, fetched: Vec<T>, id: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let fetched_ids: HashSet<String> = fetched.iter().map(|item| id(item).to_string()).collect();
    let mut merged = fetched;
    if let Some(held) = held {
        merged.extend(
            held.iter()
                .filter(|item| !fetched_ids.contains(id(item)))
                .cloned(),
        );
    }
    merged
}

/// Newest first; ties keep insertion order
fn sort_guardrails(guardrails: &mut [GuardrailMetric]) {
    guardrails.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
}
