//! Commands backed by the live report controller

use crate::format;
use crate::tui::{self, AppAction, Notice, WatchApp};
use anyhow::{bail, Context, Result};
use console::style;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::future::{BoxFuture, FutureExt};
use litmus_client::{
    live_report_sync, ActionError, ChannelStatus, ClientConfig, NewGuardrail, ReportView, Slice,
    SyncHandle,
};
use litmus_common::{Experiment, GuardrailDirection, GuardrailMetric, GuardrailStatus};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::time::Duration;

/// How long `guardrail` waits for the refreshed report
const REPORT_SETTLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Follow an experiment's report as it changes
pub async fn watch(config: &ClientConfig, id: &str, plain: bool) -> Result<()> {
    let sync = live_report_sync(config).context("Failed to build API client")?;
    let handle = sync.mount(id);

    let result = if plain {
        watch_plain(&handle).await
    } else {
        watch_tui(&handle, &config.api_url).await
    };

    handle.close().await;
    result
}

async fn watch_tui(handle: &SyncHandle, api_url: &str) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = WatchApp::new(handle.view(), api_url);
    let result = run_tui_loop(&mut terminal, &mut app, handle).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut WatchApp,
    handle: &SyncHandle,
) -> Result<()> {
    let mut views = handle.subscribe();
    let mut controller_alive = true;
    let mut pending_terminate: Option<BoxFuture<'_, Result<Experiment, ActionError>>> = None;
    let mut tick_interval = tokio::time::interval(Duration::from_millis(100));

    loop {
        terminal.draw(|f| tui::draw(f, app))?;

        tokio::select! {
            // Keyboard events (non-blocking)
            _ = tick_interval.tick() => {
                if !event::poll(Duration::from_millis(0))? {
                    continue;
                }
                let Event::Key(key) = event::read()? else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                match app.handle_key(key) {
                    Some(AppAction::Terminate) => {
                        pending_terminate = Some(handle.terminate(None).boxed());
                    }
                    Some(AppAction::Refresh) => {
                        if let Err(e) = handle.refresh().await {
                            app.notice = Some(Notice::Error(e.to_string()));
                        }
                    }
                    None => {}
                }
                if app.should_quit {
                    return Ok(());
                }
            }

            changed = views.changed(), if controller_alive => {
                match changed {
                    Ok(()) => app.update_view(views.borrow_and_update().clone()),
                    Err(_) => {
                        tracing::warn!("Report controller stopped");
                        controller_alive = false;
                    }
                }
            }

            result = maybe(&mut pending_terminate) => {
                pending_terminate = None;
                app.terminate_finished(result);
            }
        }
    }
}

/// Resolve the future if there is one; pend forever otherwise
async fn maybe<F: Future + Unpin>(future: &mut Option<F>) -> F::Output {
    match future.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn watch_plain(handle: &SyncHandle) -> Result<()> {
    let mut views = handle.subscribe();
    let mut previous = ReportView::new(handle.experiment_id());

    println!(
        "Watching {} (Ctrl+C to stop)",
        style(handle.experiment_id()).cyan()
    );

    loop {
        let current = views.borrow_and_update().clone();
        for line in describe(&previous, &current) {
            println!("{} {}", style(format::clock(&chrono::Utc::now())).dim(), line);
        }
        previous = current;

        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

/// Lines describing what changed between two published views
pub fn describe(previous: &ReportView, current: &ReportView) -> Vec<String> {
    let mut lines = Vec::new();

    if previous.channel != current.channel {
        lines.push(match current.channel {
            ChannelStatus::Reconnecting { attempt } => {
                format!("Live channel reconnecting (attempt {})", attempt)
            }
            status => format!("Live channel {}", status.as_str()),
        });
    }

    match (&previous.experiment, &current.experiment) {
        (Slice::Loaded(before), Slice::Loaded(after)) if before.status != after.status => {
            lines.push(format!("Experiment is now {}", after.status));
        }
        (Slice::Loaded(_), Slice::Loaded(_)) => {}
        (_, Slice::Loaded(after)) => {
            lines.push(format!("Experiment {} ({})", after.name, after.status));
        }
        (before, Slice::Failed(detail)) if before.failure() != Some(detail.as_str()) => {
            lines.push(format!("Experiment unavailable: {}", detail));
        }
        _ => {}
    }

    match (&previous.report, &current.report) {
        (Slice::Loaded(before), Slice::Loaded(after))
            if before.last_updated_at == after.last_updated_at => {}
        (_, Slice::Loaded(report)) => {
            lines.push(format!(
                "Report: {} exposures, {} conversions, uplift {}, p={:.4}, {} guardrails breached, {}",
                format::count(report.exposures),
                format::count(report.conversions),
                format::uplift(report),
                report.p_value,
                report.guardrails_breached,
                report.recommendation
            ));
        }
        (before, Slice::Failed(detail)) if before.failure() != Some(detail.as_str()) => {
            lines.push(format!("Report unavailable: {}", detail));
        }
        _ => {}
    }

    match (&previous.snapshots, &current.snapshots) {
        (Slice::Loaded(before), Slice::Loaded(after)) if before.len() == after.len() => {}
        (_, Slice::Loaded(after)) => lines.push(format!("Snapshots: {}", after.len())),
        (before, Slice::Failed(detail)) if before.failure() != Some(detail.as_str()) => {
            lines.push(format!("Snapshots unavailable: {}", detail));
        }
        _ => {}
    }

    match (&previous.guardrails, &current.guardrails) {
        (before, Slice::Loaded(after)) => {
            let seen: HashSet<&str> = before
                .loaded()
                .map(|list| list.iter().map(|g| g.id.as_str()).collect())
                .unwrap_or_default();
            // Oldest first so the output reads chronologically
            for g in after.iter().rev().filter(|g| !seen.contains(g.id.as_str())) {
                lines.push(format!(
                    "Guardrail {} = {:.2} ({} {:.2}): {}",
                    g.name,
                    g.value,
                    g.direction,
                    g.threshold_value,
                    g.status.as_str()
                ));
            }
        }
        (before, Slice::Failed(detail)) if before.failure() != Some(detail.as_str()) => {
            lines.push(format!("Guardrails unavailable: {}", detail));
        }
        _ => {}
    }

    if current.last_error != previous.last_error {
        if let Some(error) = &current.last_error {
            lines.push(format!("Error: {}", error));
        }
    }

    lines
}

/// Terminate a running experiment
pub async fn terminate(config: &ClientConfig, id: &str, reason: Option<String>, yes: bool) -> Result<()> {
    use cliclack::{confirm, intro, outro, outro_cancel};

    intro(style(" litmus terminate ").on_red().black().to_string())?;

    let sync = live_report_sync(config).context("Failed to build API client")?;
    let handle = sync.mount(id);

    let spinner = cliclack::spinner();
    spinner.start("Loading experiment...");
    let view = handle
        .wait_for(|view| !matches!(view.experiment, Slice::NotLoaded))
        .await?;

    let experiment = match view.experiment {
        Slice::Loaded(experiment) => experiment,
        other => {
            spinner.stop("Experiment unavailable");
            outro_cancel(other.failure().unwrap_or("Experiment is not loaded"))?;
            handle.close().await;
            bail!("Could not load experiment {}", id);
        }
    };
    spinner.stop(format!("{} is {}", experiment.name, format::status(experiment.status)));

    if !yes && experiment.status.is_running() {
        let proceed = confirm(format!("Terminate {}?", experiment.name))
            .initial_value(false)
            .interact()?;
        if !proceed {
            outro_cancel("Cancelled")?;
            handle.close().await;
            return Ok(());
        }
    }

    let spinner = cliclack::spinner();
    spinner.start("Terminating...");
    let result = handle.terminate(reason.as_deref()).await;
    handle.close().await;

    match result {
        Ok(experiment) => {
            spinner.stop("Terminate confirmed");
            outro(format!("{} is now {}", experiment.name, format::status(experiment.status)))?;
            Ok(())
        }
        Err(ActionError::Unconfirmed(e)) => {
            spinner.stop("Terminate sent");
            outro_cancel(format!(
                "Could not confirm the new status ({}); check with `litmus show {}`",
                e.detail(),
                id
            ))?;
            bail!("Terminate of {} is unconfirmed", id);
        }
        Err(e) => {
            spinner.stop("Terminate failed");
            outro_cancel(e.to_string())?;
            bail!("Failed to terminate {}", id);
        }
    }
}

/// Record a guardrail observation and show the report it produces
pub async fn guardrail(
    config: &ClientConfig,
    id: &str,
    name: String,
    value: f64,
    threshold_value: f64,
    direction: GuardrailDirection,
) -> Result<()> {
    let sync = live_report_sync(config).context("Failed to build API client")?;
    let handle = sync.mount(id);

    let guardrail = NewGuardrail {
        name,
        value,
        threshold_value,
        direction,
    };
    let (metric, refreshed) = match record_guardrail(&handle, guardrail, REPORT_SETTLE_TIMEOUT).await {
        Ok(recorded) => recorded,
        Err(e) => {
            handle.close().await;
            return Err(e).context("Failed to record guardrail");
        }
    };

    let status = match metric.status {
        GuardrailStatus::Breached => style(metric.status.as_str()).red().bold(),
        GuardrailStatus::Healthy => style(metric.status.as_str()).green(),
    };
    cliclack::log::success(format!(
        "Recorded {} = {:.2} ({} {:.2}): {}",
        metric.name, metric.value, metric.direction, metric.threshold_value, status
    ))?;

    match refreshed {
        Some(view) => {
            if let Slice::Loaded(report) = &view.report {
                cliclack::log::info(format!(
                    "Report now shows {} guardrails breached ({})",
                    report.guardrails_breached, report.recommendation
                ))?;
            }
        }
        None => match handle.view().report {
            Slice::Failed(detail) => cliclack::log::warning(format!("Report unavailable: {}", detail))?,
            _ => tracing::debug!("Report did not change within {:?}", REPORT_SETTLE_TIMEOUT),
        },
    }

    handle.close().await;
    Ok(())
}

/// Submit a guardrail, then wait up to `settle` for the report the write
/// refetches
///
/// The mount's own report is allowed to land first so it cannot pass for the
/// refreshed one. `None` means no newer report arrived in time.
async fn record_guardrail(
    handle: &SyncHandle,
    guardrail: NewGuardrail,
    settle: Duration,
) -> Result<(GuardrailMetric, Option<ReportView>), ActionError> {
    let mounted = tokio::time::timeout(
        settle,
        handle.wait_for(|view| !matches!(view.report, Slice::NotLoaded)),
    )
    .await;
    match mounted {
        Ok(Err(e)) => return Err(e),
        Ok(Ok(_)) => {}
        Err(_) => tracing::debug!("Report not loaded within {:?}, submitting anyway", settle),
    }

    let before = handle.view().report_high_water();
    let metric = handle.submit_guardrail(guardrail).await?;

    let refreshed = tokio::time::timeout(
        settle,
        handle.wait_for(|view| view.report_high_water() > before),
    )
    .await;
    match refreshed {
        Ok(view) => Ok((metric, Some(view?))),
        Err(_) => Ok((metric, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn experiment(status: &str) -> Experiment {
        serde_json::from_value(json!({"id": "exp-1", "name": "Checkout", "status": status})).unwrap()
    }

    fn report(exposures: u64, at: &str) -> litmus_common::ExperimentReport {
        serde_json::from_value(json!({
            "experiment_id": "exp-1",
            "status": "running",
            "mde": 0.05,
            "sample_size_required": 3000,
            "exposures": exposures,
            "conversions": 120,
            "sample_progress": 0.3,
            "control_conversion_rate": 0.1,
            "treatment_conversion_rate": 0.12,
            "uplift_vs_control": 0.02,
            "uplift_ci_lower": -0.01,
            "uplift_ci_upper": 0.05,
            "p_value": 0.2,
            "confidence": 0.8,
            "recommendation": "continue",
            "guardrails_breached": 0,
            "last_updated_at": at
        }))
        .unwrap()
    }

    #[test]
    fn test_describe_first_load() {
        let previous = ReportView::new("exp-1");
        let mut current = previous.clone();
        current.channel = ChannelStatus::Live;
        current.set_experiment(experiment("running"));
        current.offer_report(report(1200, "2025-01-01T12:00:00"));

        let lines = describe(&previous, &current);
        assert_eq!(lines[0], "Live channel live");
        assert_eq!(lines[1], "Experiment Checkout (running)");
        assert!(lines[2].starts_with("Report: 1,200 exposures"));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_describe_is_quiet_without_changes() {
        let mut view = ReportView::new("exp-1");
        view.set_experiment(experiment("running"));
        view.offer_report(report(1200, "2025-01-01T12:00:00"));
        view.fail_snapshots("Request timed out".to_string());

        assert!(describe(&view, &view.clone()).is_empty());
    }

    #[test]
    fn test_describe_status_and_failures() {
        let mut previous = ReportView::new("exp-1");
        previous.set_experiment(experiment("running"));
        previous.offer_report(report(1200, "2025-01-01T12:00:00"));

        let mut current = previous.clone();
        current.set_experiment(experiment("terminated_without_cause"));
        current.fail_report("Report not available".to_string());
        current.channel = ChannelStatus::Reconnecting { attempt: 2 };
        current.last_error = Some("Write failed".to_string());

        let lines = describe(&previous, &current);
        assert_eq!(
            lines,
            vec![
                "Live channel reconnecting (attempt 2)".to_string(),
                "Experiment is now terminated_without_cause".to_string(),
                "Report unavailable: Report not available".to_string(),
                "Error: Write failed".to_string(),
            ]
        );
    }

    #[test]
    fn test_describe_new_guardrails_only() {
        let metric = |id: &str, name: &str, status: &str| {
            serde_json::from_value::<litmus_common::GuardrailMetric>(json!({
                "id": id, "experiment_id": "exp-1", "name": name, "value": 460.0,
                "threshold_value": 350.0, "direction": "max", "status": status,
                "observed_at": "2025-01-01T12:00:00"
            }))
            .unwrap()
        };

        let mut previous = ReportView::new("exp-1");
        previous.merge_guardrails(vec![metric("g1", "error_rate", "healthy")]);
        let mut current = previous.clone();
        current.prepend_guardrail(metric("g2", "p95_latency_ms", "breached"));

        let lines = describe(&previous, &current);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Guardrail p95_latency_ms = 460.00"));
        assert!(lines[0].ends_with("breached"));
    }

    /// Report state on the fake platform: breaches so far and a clock tick
    type Platform = std::sync::Arc<std::sync::Mutex<(u32, i64)>>;

    /// Platform whose report GET turns slow once a guardrail was recorded
    async fn spawn_platform() -> ClientConfig {
        use axum::{
            extract::State,
            routing::{get, post},
            Json, Router,
        };
        use serde_json::Value;

        async fn get_report(State(platform): State<Platform>) -> Json<Value> {
            let (breached, tick) = *platform.lock().unwrap();
            if breached > 0 {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            Json(json!({
                "experiment_id": "exp-1",
                "status": "running",
                "exposures": 1200,
                "conversions": 120,
                "recommendation": "continue",
                "guardrails_breached": breached,
                "last_updated_at": format!("2025-01-01T12:00:{:02}", tick)
            }))
        }

        async fn create_guardrail(State(platform): State<Platform>, Json(body): Json<Value>) -> Json<Value> {
            let mut state = platform.lock().unwrap();
            state.0 += 1;
            state.1 += 1;
            Json(json!({
                "id": "gm-1", "experiment_id": "exp-1", "name": body["name"],
                "value": body["value"], "threshold_value": body["threshold_value"],
                "direction": body["direction"], "status": "breached",
                "observed_at": "2025-01-01T12:00:01"
            }))
        }

        let app = Router::new()
            .route(
                "/api/v1/experiments/{id}",
                get(|| async { Json(json!({"id": "exp-1", "name": "Checkout", "status": "running"})) }),
            )
            .route("/api/v1/experiments/{id}/report", get(get_report))
            .route("/api/v1/experiments/{id}/snapshots", get(|| async { Json(json!([])) }))
            .route("/api/v1/metrics/guardrails", post(create_guardrail))
            .route("/api/v1/metrics/guardrails/{id}", get(|| async { Json(json!([])) }))
            .with_state(Platform::default());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        ClientConfig::new(format!("http://{}", addr))
    }

    #[tokio::test]
    async fn test_record_guardrail_shows_refetched_report() {
        let config = spawn_platform().await;
        let sync = live_report_sync(&config).unwrap();
        let handle = sync.mount("exp-1");

        let guardrail = NewGuardrail {
            name: "p95_latency_ms".to_string(),
            value: 460.0,
            threshold_value: 350.0,
            direction: GuardrailDirection::Max,
        };
        let (metric, refreshed) = record_guardrail(&handle, guardrail, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(metric.status, GuardrailStatus::Breached);
        let view = refreshed.expect("report was not refetched");
        assert_eq!(view.report.loaded().unwrap().guardrails_breached, 1);
        handle.close().await;
    }
}
