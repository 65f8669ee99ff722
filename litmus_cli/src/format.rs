//! Formatting helpers shared by the plain and TUI renderers

use chrono::{DateTime, Utc};
use console::{style, StyledObject};
use litmus_common::{ExperimentReport, ExperimentStatus};

/// Fraction as a percentage with one decimal ("12.3%")
pub fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Signed percentage ("+4.2%", "-0.8%")
pub fn signed_percent(fraction: f64) -> String {
    format!("{:+.1}%", fraction * 100.0)
}

pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Clock time for compact tables
pub fn clock(at: &DateTime<Utc>) -> String {
    at.format("%H:%M:%S").to_string()
}

/// Thousands separators ("12,345")
pub fn count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Truncate to `max_len` characters
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return s.chars().take(max_len).collect();
    }
    let mut out: String = s.chars().take(max_len - 3).collect();
    out.push_str("...");
    out
}

/// Uplift with its confidence interval ("+4.2% [-1.0%, +9.4%]")
pub fn uplift(report: &ExperimentReport) -> String {
    format!(
        "{} [{}, {}]",
        signed_percent(report.uplift_vs_control),
        signed_percent(report.uplift_ci_lower),
        signed_percent(report.uplift_ci_upper)
    )
}

/// Colored status label for terminal output
pub fn status(status: ExperimentStatus) -> StyledObject<&'static str> {
    let label = style(status.as_str());
    match status {
        ExperimentStatus::Running => label.green().bold(),
        ExperimentStatus::Draft => label.dim(),
        ExperimentStatus::Paused => label.yellow(),
        ExperimentStatus::Passed => label.cyan().bold(),
        ExperimentStatus::Failed | ExperimentStatus::TerminatedWithoutCause => label.red(),
        ExperimentStatus::Stopped | ExperimentStatus::Inconclusive => label.white(),
    }
}
