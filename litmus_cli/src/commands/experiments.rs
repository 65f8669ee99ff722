//! Experiment commands over the REST API (ls, running, summary, show, ...)

use crate::format;
use anyhow::{bail, Context, Result};
use console::style;
use litmus_client::{ApiClient, ClientConfig, ExperimentApi};
use litmus_common::{
    DecisionOverride, Experiment, ExperimentCreate, ExperimentPatch, ExperimentReport,
    ExperimentStatus, ExportFormat, ResultsInterval, Variant,
};
use std::path::Path;

/// List all experiments
pub async fn list(config: &ClientConfig) -> Result<()> {
    let api = ApiClient::new(config)?;
    let experiments = api.list_experiments().await.context("Failed to list experiments")?;

    if experiments.is_empty() {
        println!("No experiments yet.");
        println!();
        println!("Create one with: litmus create --name <NAME>");
        return Ok(());
    }

    println!("{:<38} {:<36} {:<26} {:>8}", "ID", "NAME", "STATUS", "RAMP");
    println!("{}", "-".repeat(110));

    for experiment in &experiments {
        println!(
            "{:<38} {:<36} {:<26} {:>7}%",
            experiment.id,
            format::truncate(&experiment.name, 34),
            format::status(experiment.status),
            experiment.ramp_pct
        );
    }

    Ok(())
}

/// Condensed performance of running experiments
pub async fn running(config: &ClientConfig) -> Result<()> {
    let api = ApiClient::new(config)?;
    let cards = match api.running_experiments().await {
        Ok(cards) => cards,
        Err(e) => {
            // Read-only view; an error renders as empty
            tracing::warn!("Failed to load running experiments: {}", e);
            Vec::new()
        }
    };

    if cards.is_empty() {
        println!("No running experiments.");
        return Ok(());
    }

    println!(
        "{:<36} {:>12} {:>10} {:>9} {:>10} {:>10}",
        "NAME", "EXPOSURES", "CONV", "UPLIFT", "CONF", "PROGRESS"
    );
    println!("{}", "-".repeat(92));

    for card in &cards {
        println!(
            "{:<36} {:>12} {:>10} {:>9} {:>10} {:>10}",
            format::truncate(&card.name, 34),
            format::count(card.exposures),
            format::percent(card.conversion_rate),
            format::signed_percent(card.uplift_vs_control),
            format::percent(card.confidence),
            format::percent(card.sample_progress)
        );
    }

    Ok(())
}

/// Experiment counts by status
pub async fn summary(config: &ClientConfig) -> Result<()> {
    let api = ApiClient::new(config)?;
    let summary = match api.executive_summary().await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::warn!("Failed to load executive summary: {}", e);
            Default::default()
        }
    };

    for (status, n) in summary.counts() {
        println!("  {:<26} {:>6}", format::status(status), n);
    }
    println!("  {:<26} {:>6}", style("total").bold(), summary.total());

    Ok(())
}

/// Experiment detail plus its current report
///
/// Both are fetched concurrently; a missing report (e.g. the experiment has
/// not started) does not hide the experiment itself.
pub async fn show(config: &ClientConfig, id: &str) -> Result<()> {
    let api = ApiClient::new(config)?;
    let (experiment, report) = tokio::join!(api.get_experiment(id), api.get_report(id));

    let experiment = experiment.with_context(|| format!("Failed to load experiment {}", id))?;
    print_experiment(&experiment);
    println!();

    match report {
        Ok(report) => print_report(&report),
        Err(e) => println!("{} {}", style("Report unavailable:").dim(), e.detail()),
    }

    Ok(())
}

fn print_experiment(experiment: &Experiment) {
    println!("{}  {}", style(&experiment.name).bold(), format::status(experiment.status));
    println!("  {:<16} {}", style("ID").dim(), experiment.id);
    if !experiment.hypothesis.is_empty() {
        println!("  {:<16} {}", style("Hypothesis").dim(), experiment.hypothesis);
    }
    if !experiment.owner_team.is_empty() {
        println!("  {:<16} {}", style("Owner").dim(), experiment.owner_team);
    }
    println!(
        "  {:<16} MDE {} / baseline {} / alpha {} / power {}",
        style("Design").dim(),
        format::percent(experiment.mde),
        format::percent(experiment.baseline_rate),
        experiment.alpha,
        experiment.power
    );
    println!(
        "  {:<16} {}",
        style("Sample size").dim(),
        format::count(experiment.sample_size_required)
    );
    if let Some(started) = &experiment.started_at {
        println!("  {:<16} {}", style("Started").dim(), format::timestamp(started));
    }
    if let Some(ended) = &experiment.ended_at {
        println!("  {:<16} {}", style("Ended").dim(), format::timestamp(ended));
    }
    if let Some(reason) = &experiment.termination_reason {
        println!("  {:<16} {}", style("Termination").dim(), reason);
    }
    for variant in &experiment.variants {
        println!(
            "  {:<16} {} ({})",
            style("Variant").dim(),
            variant.name,
            format::percent(variant.weight)
        );
    }
}

pub fn print_report(report: &ExperimentReport) {
    println!(
        "{}  updated {}",
        style("Report").bold(),
        format::timestamp(&report.last_updated_at)
    );
    println!(
        "  {:<16} {} exposures, {} conversions ({} of required sample)",
        style("Traffic").dim(),
        format::count(report.exposures),
        format::count(report.conversions),
        format::percent(report.sample_progress)
    );
    println!(
        "  {:<16} control {} / treatment {}",
        style("Conversion").dim(),
        format::percent(report.control_conversion_rate),
        format::percent(report.treatment_conversion_rate)
    );
    println!("  {:<16} {}", style("Uplift").dim(), format::uplift(report));
    println!(
        "  {:<16} p = {:.4}, confidence {}",
        style("Significance").dim(),
        report.p_value,
        format::percent(report.confidence)
    );
    if let Some(delta) = report.diff_in_diff_delta {
        println!("  {:<16} {}", style("Diff-in-diff").dim(), format::signed_percent(delta));
    }
    if let Some(days) = report.estimated_days_to_decision {
        println!("  {:<16} ~{} days", style("Decision in").dim(), days);
    }
    println!("  {:<16} {}", style("Recommendation").dim(), style(&report.recommendation).cyan());

    let breached = if report.guardrails_breached > 0 {
        style(report.guardrails_breached.to_string()).red().bold()
    } else {
        style(report.guardrails_breached.to_string()).green()
    };
    println!("  {:<16} {} breached", style("Guardrails").dim(), breached);
    for guardrail in &report.guardrails {
        let status = guardrail.status.map(|s| s.as_str()).unwrap_or("-");
        println!(
            "    {:<24} {:>10} / {:<10} {}",
            guardrail.name,
            guardrail.value.map(|v| format!("{:.2}", v)).unwrap_or_default(),
            guardrail.threshold_value.map(|v| format!("{:.2}", v)).unwrap_or_default(),
            status
        );
    }

    if report.has_bandit_state() {
        println!("  {} ({})", style("Bandit").dim(), report.assignment_policy);
        for arm in &report.bandit_state {
            println!(
                "    {:<24} Beta({:.1}, {:.1})  rate {}  P(best) {}",
                arm.variant_name,
                arm.alpha,
                arm.beta,
                format::percent(arm.expected_rate),
                format::percent(arm.win_probability)
            );
        }
    }
}

/// Options for `litmus create`
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub hypothesis: Option<String>,
    pub owner_team: Option<String>,
    pub tags: Vec<String>,
    pub mde: f64,
    pub baseline_rate: f64,
    pub variants: Vec<String>,
}

/// Create an experiment (prompts for the name when not given)
pub async fn create(config: &ClientConfig, opts: CreateOptions) -> Result<()> {
    let name = match opts.name {
        Some(name) => name,
        None => cliclack::input("Experiment name")
            .placeholder("Checkout Button Experiment")
            .interact()?,
    };

    let mut payload = ExperimentCreate::ab(name, opts.mde);
    payload.baseline_rate = opts.baseline_rate;
    payload.hypothesis = opts.hypothesis;
    payload.owner_team = opts.owner_team;
    payload.tags = opts.tags;
    if !opts.variants.is_empty() {
        payload.variants = opts
            .variants
            .iter()
            .map(|raw| parse_variant(raw))
            .collect::<Result<_>>()?;
    }

    let total = payload.total_weight();
    if (total - 1.0).abs() > 1e-6 {
        cliclack::log::warning(format!("Variant weights sum to {:.3}, not 1.0", total))?;
    }

    let api = ApiClient::new(config)?;
    let experiment = api
        .create_experiment(&payload)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create experiment: {}", e.detail()))?;

    cliclack::log::success(format!(
        "Created {} {}",
        style(&experiment.name).bold(),
        style(&experiment.id).cyan()
    ))?;
    Ok(())
}

/// Parse a `name=weight` variant argument
fn parse_variant(raw: &str) -> Result<Variant> {
    let Some((name, weight)) = raw.split_once('=') else {
        bail!("Invalid variant {:?}, expected NAME=WEIGHT", raw);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid variant {:?}, name is empty", raw);
    }
    let weight: f64 = weight
        .trim()
        .parse()
        .with_context(|| format!("Invalid weight in variant {:?}", raw))?;
    if !(0.0..=1.0).contains(&weight) {
        bail!("Variant weight must be between 0 and 1, got {}", weight);
    }
    Ok(Variant::new(name, weight))
}

/// Apply a partial update
pub async fn edit(config: &ClientConfig, id: &str, patch: ExperimentPatch) -> Result<()> {
    if patch.is_empty() {
        bail!("Nothing to change. Pass at least one field to update.");
    }

    let api = ApiClient::new(config)?;
    let experiment = api
        .patch_experiment(id, &patch)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to update experiment: {}", e.detail()))?;

    cliclack::log::success(format!("Updated {} (version {})", experiment.name, experiment.version))?;
    Ok(())
}

/// Lifecycle transitions that go straight to the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Launch { ramp_pct: Option<u8> },
    Pause,
    Stop,
}

pub async fn lifecycle(config: &ClientConfig, id: &str, action: Lifecycle) -> Result<()> {
    let api = ApiClient::new(config)?;
    let result = match action {
        Lifecycle::Launch { ramp_pct } => api.launch(id, ramp_pct).await,
        Lifecycle::Pause => api.pause(id).await,
        Lifecycle::Stop => api.stop(id).await,
    };
    let experiment = result.map_err(|e| anyhow::anyhow!("{}", e.detail()))?;

    cliclack::log::success(format!(
        "{} is now {}",
        style(&experiment.name).bold(),
        format::status(experiment.status)
    ))?;
    Ok(())
}

/// Snapshot history, newest first
pub async fn snapshots(config: &ClientConfig, id: &str) -> Result<()> {
    let api = ApiClient::new(config)?;
    let mut snapshots = api
        .list_snapshots(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load snapshots: {}", e.detail()))?;
    litmus_common::sort_snapshots(&mut snapshots);

    if snapshots.is_empty() {
        println!("No snapshots yet.");
        return Ok(());
    }

    println!(
        "{:<20} {:>12} {:>10} {:>24} {:>9} {:<12}",
        "CAPTURED", "EXPOSURES", "CONV", "UPLIFT", "P", "RECOMMEND"
    );
    println!("{}", "-".repeat(92));
    for snapshot in &snapshots {
        let report = &snapshot.snapshot;
        println!(
            "{:<20} {:>12} {:>10} {:>24} {:>9.4} {:<12}",
            format::timestamp(&snapshot.created_at),
            format::count(report.exposures),
            format::count(report.conversions),
            format::uplift(report),
            report.p_value,
            report.recommendation
        );
    }
    Ok(())
}

/// Export the current report as JSON or CSV, to stdout or a file
pub async fn export(config: &ClientConfig, id: &str, format: &str, output: Option<&Path>) -> Result<()> {
    let format = match format {
        "csv" => ExportFormat::Csv,
        _ => ExportFormat::Json,
    };

    let api = ApiClient::new(config)?;
    let body = api
        .export_report(id, format)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to export report: {}", e.detail()))?;

    match output {
        Some(path) => {
            std::fs::write(path, &body).with_context(|| format!("Failed to write {}", path.display()))?;
            cliclack::log::success(format!("Exported {} report to {}", format.as_str(), path.display()))?;
        }
        None => print!("{}", body),
    }
    Ok(())
}

/// Bucketed exposure series and lift estimates
pub async fn results(config: &ClientConfig, id: &str, interval: &str) -> Result<()> {
    let interval = match interval {
        "minute" => ResultsInterval::Minute,
        _ => ResultsInterval::Hour,
    };

    let api = ApiClient::new(config)?;
    let results = api
        .results(id, interval)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load results: {}", e.detail()))?;

    println!(
        "{}  generated {} ({} buckets)",
        style("Results").bold(),
        format::timestamp(&results.generated_at),
        interval.as_str()
    );

    for (variant, total) in &results.exposure_totals {
        println!("  {:<24} {:>12} exposures", variant, format::count(*total));
    }

    for series in &results.exposure_timeseries {
        println!();
        println!("  {}", style(&series.variant_name).bold());
        for point in &series.points {
            println!("    {}  {:>10}", format::timestamp(&point.bucket_start), format::count(point.exposures));
        }
    }

    if !results.lift_estimates.is_empty() {
        println!();
        println!("  {}", style("Lift").bold());
        for lift in &results.lift_estimates {
            println!(
                "    {:<20} {} -> {}  lift {} [{}, {}]  p = {:.4}",
                lift.variant_name,
                format::percent(lift.control_rate),
                format::percent(lift.treatment_rate),
                format::signed_percent(lift.absolute_lift),
                format::signed_percent(lift.ci_lower),
                format::signed_percent(lift.ci_upper),
                lift.p_value
            );
        }
    }

    for metric in &results.metric_summaries {
        println!(
            "    {:<20} {:<20} n={} mean={:.4}",
            metric.variant_name, metric.metric_name, metric.count, metric.mean
        );
    }

    Ok(())
}

/// Audit trail of status decisions
pub async fn history(config: &ClientConfig, id: &str) -> Result<()> {
    let api = ApiClient::new(config)?;
    let entries = api
        .decision_history(id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load decision history: {}", e.detail()))?;

    if entries.is_empty() {
        println!("No decisions recorded.");
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}  {} -> {}  by {} ({:?}){}",
            format::timestamp(&entry.created_at),
            entry.previous_status,
            style(&entry.new_status).bold(),
            entry.actor,
            entry.source,
            entry
                .reason
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Manually set the experiment's status
pub async fn override_decision(
    config: &ClientConfig,
    id: &str,
    status: ExperimentStatus,
    reason: Option<String>,
    actor: String,
) -> Result<()> {
    let api = ApiClient::new(config)?;
    let decision = DecisionOverride {
        status,
        reason,
        actor,
    };
    let experiment = api
        .override_decision(id, &decision)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to override decision: {}", e.detail()))?;

    cliclack::log::success(format!(
        "{} set to {}",
        style(&experiment.name).bold(),
        format::status(experiment.status)
    ))?;
    Ok(())
}
