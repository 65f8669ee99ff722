//! TUI rendering functions

use super::app::{Notice, Panel, WatchApp};
use crate::format;
use litmus_client::{ChannelStatus, Slice, SyncPhase};
use litmus_common::{ExperimentReport, ExperimentStatus, GuardrailStatus};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame,
};

/// Draw the TUI
pub fn draw(frame: &mut Frame, app: &WatchApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),  // Title bar
            Constraint::Length(5),  // Experiment + channel info
            Constraint::Length(8),  // Report metrics
            Constraint::Min(5),     // Panel table
            Constraint::Length(1),  // Footer
        ])
        .split(frame.area());

    draw_title_bar(frame, app, chunks[0]);
    draw_experiment(frame, app, chunks[1]);
    draw_report(frame, app, chunks[2]);
    draw_panel(frame, app, chunks[3]);
    draw_footer(frame, app, chunks[4]);
}

fn draw_title_bar(frame: &mut Frame, app: &WatchApp, area: Rect) {
    let name = app
        .view
        .experiment
        .loaded()
        .map(|e| e.name.as_str())
        .unwrap_or(app.view.experiment_id.as_str());

    let lines = vec![
        Line::from(vec![
            Span::styled(" LITMUS ", Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Span::raw("  "),
            Span::styled(name.to_string(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(""),
    ];

    frame.render_widget(Paragraph::new(lines), area);
}

fn draw_experiment(frame: &mut Frame, app: &WatchApp, area: Rect) {
    let (channel_label, channel_color) = channel_style(app.view.channel);

    let status_span = match &app.view.experiment {
        Slice::Loaded(experiment) => Span::styled(
            experiment.status.as_str(),
            Style::default().fg(status_color(experiment.status)).add_modifier(Modifier::BOLD),
        ),
        Slice::Failed(detail) => Span::styled(format!("unavailable ({})", detail), Style::default().fg(Color::Red)),
        Slice::NotLoaded => Span::styled("loading", Style::default().fg(Color::DarkGray)),
    };

    let lines = vec![
        Line::from(vec![
            Span::styled("Status          ", Style::default().fg(Color::DarkGray)),
            status_span,
        ]),
        Line::from(vec![
            Span::styled("Sync            ", Style::default().fg(Color::DarkGray)),
            Span::styled(app.view.phase.as_str(), Style::default().fg(phase_color(app.view.phase))),
        ]),
        Line::from(vec![
            Span::styled("Live channel    ", Style::default().fg(Color::DarkGray)),
            Span::styled(channel_label, Style::default().fg(channel_color).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(vec![
            Span::styled("Platform        ", Style::default().fg(Color::DarkGray)),
            Span::styled(app.api_url.as_str(), Style::default().fg(Color::Cyan)),
            Span::styled(format!("  v{}", app.version), Style::default().fg(Color::DarkGray)),
        ]),
    ];

    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(Color::DarkGray));

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_report(frame: &mut Frame, app: &WatchApp, area: Rect) {
    let lines = match &app.view.report {
        Slice::Loaded(report) => report_lines(report),
        Slice::Failed(detail) => vec![Line::from(vec![
            Span::styled("Report unavailable  ", Style::default().fg(Color::DarkGray)),
            Span::styled(detail.as_str(), Style::default().fg(Color::Yellow)),
        ])],
        Slice::NotLoaded => vec![Line::from(Span::styled(
            "Loading report...",
            Style::default().fg(Color::DarkGray),
        ))],
    };

    let block = Block::default()
        .title(" Report ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn report_lines(report: &ExperimentReport) -> Vec<Line<'static>> {
    let label = |s: &'static str| Span::styled(s, Style::default().fg(Color::DarkGray));
    let value = |s: String| Span::styled(s, Style::default().fg(Color::White));

    let uplift_color = if report.uplift_ci_lower > 0.0 {
        Color::Green
    } else if report.uplift_ci_upper < 0.0 {
        Color::Red
    } else {
        Color::White
    };
    let breached_color = if report.guardrails_breached > 0 {
        Color::Red
    } else {
        Color::Green
    };

    vec![
        Line::from(vec![
            label("Exposures   "),
            value(format::count(report.exposures)),
            label("   Conversions "),
            value(format::count(report.conversions)),
            label("   Progress "),
            value(format::percent(report.sample_progress)),
        ]),
        Line::from(vec![
            label("Control     "),
            value(format::percent(report.control_conversion_rate)),
            label("   Treatment   "),
            value(format::percent(report.treatment_conversion_rate)),
        ]),
        Line::from(vec![
            label("Uplift      "),
            Span::styled(format::uplift(report), Style::default().fg(uplift_color)),
        ]),
        Line::from(vec![
            label("p-value     "),
            value(format!("{:.4}", report.p_value)),
            label("   Confidence  "),
            value(format::percent(report.confidence)),
        ]),
        Line::from(vec![
            label("Decision    "),
            Span::styled(
                report.recommendation.clone(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            label("   Guardrails breached "),
            Span::styled(
                report.guardrails_breached.to_string(),
                Style::default().fg(breached_color).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            label("Updated     "),
            value(format::timestamp(&report.last_updated_at)),
        ]),
    ]
}

fn draw_panel(frame: &mut Frame, app: &WatchApp, area: Rect) {
    let block = Block::default()
        .title(format!(" {} (Tab to switch) ", app.panel.title()))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let table = match app.panel {
        Panel::Guardrails => guardrail_table(app),
        Panel::Snapshots => snapshot_table(app),
        Panel::Bandit => bandit_table(app),
    };

    match table {
        Ok(table) => frame.render_widget(table.block(block), area),
        Err(message) => {
            let paragraph = Paragraph::new(Span::styled(message, Style::default().fg(Color::DarkGray)))
                .block(block);
            frame.render_widget(paragraph, area);
        }
    }
}

/// Rows of a slice, or the text to show instead
fn slice_rows<'a, T>(slice: &'a Slice<Vec<T>>, empty: &str) -> Result<&'a [T], String> {
    match slice {
        Slice::Loaded(items) if items.is_empty() => Err(empty.to_string()),
        Slice::Loaded(items) => Ok(items),
        Slice::Failed(detail) => Err(format!("Failed to load: {}", detail)),
        Slice::NotLoaded => Err("Loading...".to_string()),
    }
}

fn guardrail_table(app: &WatchApp) -> Result<Table<'static>, String> {
    let guardrails = slice_rows(&app.view.guardrails, "No guardrail observations")?;

    let header = Row::new(vec!["Observed", "Metric", "Value", "Threshold", "Dir", "Status"])
        .style(Style::default().fg(Color::DarkGray));

    let rows: Vec<Row> = guardrails
        .iter()
        .skip(app.scroll_offset)
        .map(|g| {
            let status_style = match g.status {
                GuardrailStatus::Breached => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                GuardrailStatus::Healthy => Style::default().fg(Color::Green),
            };
            Row::new(vec![
                Cell::from(format::clock(&g.observed_at)),
                Cell::from(format::truncate(&g.name, 28)),
                Cell::from(format!("{:.2}", g.value)),
                Cell::from(format!("{:.2}", g.threshold_value)),
                Cell::from(g.direction.as_str()),
                Cell::from(g.status.as_str()).style(status_style),
            ])
        })
        .collect();

    Ok(Table::new(
        rows,
        [
            Constraint::Length(9),
            Constraint::Min(12),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(4),
            Constraint::Length(9),
        ],
    )
    .header(header))
}

fn snapshot_table(app: &WatchApp) -> Result<Table<'static>, String> {
    let snapshots = slice_rows(&app.view.snapshots, "No snapshots yet")?;

    let header = Row::new(vec!["Captured", "Exposures", "Uplift", "p", "Breached", "Decision"])
        .style(Style::default().fg(Color::DarkGray));

    let rows: Vec<Row> = snapshots
        .iter()
        .skip(app.scroll_offset)
        .map(|s| {
            let report = &s.snapshot;
            Row::new(vec![
                Cell::from(format::timestamp(&s.created_at)),
                Cell::from(format::count(report.exposures)),
                Cell::from(format::signed_percent(report.uplift_vs_control)),
                Cell::from(format!("{:.4}", report.p_value)),
                Cell::from(report.guardrails_breached.to_string()),
                Cell::from(report.recommendation.clone()),
            ])
        })
        .collect();

    Ok(Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Length(11),
            Constraint::Length(8),
            Constraint::Length(7),
            Constraint::Length(9),
            Constraint::Min(8),
        ],
    )
    .header(header))
}

fn bandit_table(app: &WatchApp) -> Result<Table<'static>, String> {
    let report = match &app.view.report {
        Slice::Loaded(report) => report,
        _ => return Err("No report yet".to_string()),
    };
    if !report.has_bandit_state() {
        return Err(format!("Fixed allocation ({})", report.assignment_policy));
    }

    let header = Row::new(vec!["Variant", "Exposures", "Alpha", "Beta", "Rate", "P(best)"])
        .style(Style::default().fg(Color::DarkGray));

    let rows: Vec<Row> = report
        .bandit_state
        .iter()
        .skip(app.scroll_offset)
        .map(|arm| {
            Row::new(vec![
                Cell::from(format::truncate(&arm.variant_name, 24)),
                Cell::from(format::count(arm.exposures)),
                Cell::from(format!("{:.1}", arm.alpha)),
                Cell::from(format!("{:.1}", arm.beta)),
                Cell::from(format::percent(arm.expected_rate)),
                Cell::from(format::percent(arm.win_probability)),
            ])
        })
        .collect();

    Ok(Table::new(
        rows,
        [
            Constraint::Min(12),
            Constraint::Length(11),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(8),
        ],
    )
    .header(header))
}

/// Draw the footer with key hints, the confirm prompt or the last notice
fn draw_footer(frame: &mut Frame, app: &WatchApp, area: Rect) {
    let key = |s: &'static str| Span::styled(s, Style::default().fg(Color::Cyan));
    let hint = |s: &'static str| Span::styled(s, Style::default().fg(Color::DarkGray));

    let text = if app.confirm_terminate {
        Line::from(vec![
            Span::styled("Terminate this experiment? ", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
            key("y"),
            hint(" Yes  "),
            key("n"),
            hint(" No"),
        ])
    } else {
        let mut spans = vec![
            key("t"),
            hint(" Terminate  "),
            key("r"),
            hint(" Refresh  "),
            key("Tab"),
            hint(" Panel  "),
            key("q"),
            hint(" Quit"),
        ];
        match &app.notice {
            Some(Notice::Info(message)) => {
                spans.push(hint("   "));
                spans.push(Span::styled(message.clone(), Style::default().fg(Color::Green)));
            }
            Some(Notice::Error(message)) => {
                spans.push(hint("   "));
                spans.push(Span::styled(message.clone(), Style::default().fg(Color::Red)));
            }
            None => {
                if let Some(error) = &app.view.last_error {
                    spans.push(hint("   "));
                    spans.push(Span::styled(error.clone(), Style::default().fg(Color::Red)));
                }
            }
        }
        Line::from(spans)
    };

    frame.render_widget(Paragraph::new(text), area);
}

fn channel_style(status: ChannelStatus) -> (String, Color) {
    match status {
        ChannelStatus::Live => ("live".to_string(), Color::Green),
        ChannelStatus::Connecting => ("connecting".to_string(), Color::Yellow),
        ChannelStatus::Reconnecting { attempt } => (format!("reconnecting (attempt {})", attempt), Color::Yellow),
        ChannelStatus::Offline => ("offline".to_string(), Color::Red),
        ChannelStatus::Closed => ("closed".to_string(), Color::DarkGray),
    }
}

fn phase_color(phase: SyncPhase) -> Color {
    match phase {
        SyncPhase::Synced => Color::Green,
        SyncPhase::Updating | SyncPhase::Loading => Color::Yellow,
        SyncPhase::Terminated => Color::Red,
        SyncPhase::Idle => Color::DarkGray,
    }
}

fn status_color(status: ExperimentStatus) -> Color {
    match status {
        ExperimentStatus::Running => Color::Green,
        ExperimentStatus::Paused => Color::Yellow,
        ExperimentStatus::Passed => Color::Cyan,
        ExperimentStatus::Failed | ExperimentStatus::TerminatedWithoutCause => Color::Red,
        ExperimentStatus::Draft | ExperimentStatus::Stopped | ExperimentStatus::Inconclusive => Color::White,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use litmus_client::ReportView;
    use ratatui::{backend::TestBackend, Terminal};

    fn rendered(app: &WatchApp) -> String {
        let backend = TestBackend::new(100, 30);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal.draw(|frame| draw(frame, app)).unwrap();

        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn test_renders_experiment_without_report() {
        let mut view = ReportView::new("exp-1");
        view.set_experiment(
            serde_json::from_value(serde_json::json!({
                "id": "exp-1", "name": "Checkout Button Experiment", "status": "draft"
            }))
            .unwrap(),
        );
        view.fail_report("Report not available".to_string());
        let app = WatchApp::new(view, "http://localhost:8000");

        let text = rendered(&app);
        assert!(text.contains("Checkout Button Experiment"));
        assert!(text.contains("Report not available"));
        assert!(text.contains("Loading..."));
    }

    #[test]
    fn test_confirm_prompt_replaces_hints() {
        let mut app = WatchApp::new(ReportView::new("exp-1"), "http://localhost:8000");
        app.confirm_terminate = true;
        assert!(rendered(&app).contains("Terminate this experiment?"));
    }
}
