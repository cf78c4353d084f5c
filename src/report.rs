//! Text rendering of the health report and the remediation results.
//! Everything here is a pure function of the data it is handed.

use std::fmt::Write as _;
use std::time::Duration;

use chrono::Local;
use colored::*;
use rust_i18n::t;
use sysinfo::System;

use crate::evaluate::{Evaluation, Overall};
use crate::metric::{Metric, MetricId, Section, Severity, Unavailable};
use crate::remediate::{ActionId, ActionReport, Outcome};

const LABEL_WIDTH: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub struct HostSummary {
    pub hostname: String,
    pub user: String,
    pub distro: String,
    pub kernel: String,
    pub uptime: Duration,
    pub timestamp: String,
}

impl HostSummary {
    pub fn gather() -> Self {
        HostSummary {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            user: whoami::username(),
            distro: whoami::distro(),
            kernel: System::kernel_version().unwrap_or_else(|| "unknown".to_string()),
            uptime: Duration::from_secs(System::uptime()),
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        }
    }
}

pub fn symbol(severity: Severity) -> ColoredString {
    match severity {
        Severity::Ok => "✓".green(),
        Severity::Warning => "⚠".yellow(),
        Severity::Critical => "✗".red().bold(),
        Severity::Info => "ℹ".blue(),
    }
}

fn severity_name(severity: Severity) -> ColoredString {
    match severity {
        Severity::Ok => "OK".green(),
        Severity::Warning => "WARNING".yellow(),
        Severity::Critical => "CRITICAL".red().bold(),
        Severity::Info => "INFO".blue(),
    }
}

fn section_title(section: Section) -> String {
    match section {
        Section::System => t!("section_system"),
        Section::Thermals => t!("section_thermals"),
        Section::Storage => t!("section_storage"),
        Section::Software => t!("section_software"),
        Section::Containers => t!("section_containers"),
        Section::Network => t!("section_network"),
    }
    .to_string()
}

/// Plain-language reason a value is missing. Raw tool errors never reach
/// the report.
pub fn unavailable_hint(metric: &Metric) -> String {
    let Err(reason) = &metric.value else {
        return String::new();
    };
    match reason {
        Unavailable::ToolMissing(tools) => t!("hint_tool_missing", tools = tools),
        Unavailable::CommandFailed => t!("hint_command_failed"),
        Unavailable::Unparseable => t!("hint_unparseable"),
        Unavailable::NeedsPrivileges
            if matches!(metric.id, MetricId::NvmeHealth | MetricId::NvmeTempC) =>
        {
            t!("hint_smart_privileges")
        }
        Unavailable::NeedsPrivileges => t!("hint_needs_privileges"),
        Unavailable::NoDevice => t!("hint_no_device"),
        Unavailable::Disabled => t!("hint_disabled"),
    }
    .to_string()
}

pub fn render_report(host: &HostSummary, evaluation: &Evaluation) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", t!("report_title").to_string().bold().cyan());
    let _ = writeln!(
        out,
        "| {} {} | {} {} | {} {} | {} {} |",
        t!("host_label"),
        host.hostname.bold(),
        t!("distro_label"),
        host.distro,
        t!("kernel_label"),
        host.kernel,
        t!("uptime_label"),
        human_duration(host.uptime)
    );
    let _ = writeln!(
        out,
        "{}",
        t!("generated_at", user = host.user, time = host.timestamp)
            .to_string()
            .dimmed()
    );

    for section in Section::ALL {
        let rows: Vec<_> = evaluation
            .assessments
            .iter()
            .filter(|a| a.metric.id.section() == section)
            .collect();
        if rows.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{}", format!("== {} ==", section_title(section)).bold());
        for row in rows {
            let metric = &row.metric;
            let value = metric.display_value();
            let value = match row.severity {
                Severity::Critical => value.red().bold(),
                Severity::Warning => value.yellow(),
                Severity::Info if !metric.is_available() => value.dimmed(),
                _ => value.normal(),
            };
            let _ = write!(
                out,
                "  {} {:<width$} {}",
                symbol(row.severity),
                metric.id.label(),
                value,
                width = LABEL_WIDTH
            );
            if let Some(detail) = &metric.detail {
                let _ = write!(out, " {}", format!("({detail})").dimmed());
            }
            out.push('\n');
        }
    }

    let _ = writeln!(
        out,
        "\n{}",
        format!("== {} ==", t!("issues_header", count = evaluation.issues.len())).bold()
    );
    if evaluation.issues.is_empty() {
        let _ = writeln!(out, "  {}", t!("no_issues").to_string().green());
    }
    for issue in &evaluation.issues {
        let _ = write!(
            out,
            "  {} {:<8} {}",
            symbol(issue.severity),
            severity_name(issue.severity),
            issue.message
        );
        if let Some(action) = issue.remediation {
            let _ = write!(
                out,
                " {}",
                t!("fix_available", action = action.title()).to_string().dimmed()
            );
        }
        out.push('\n');
    }

    let unavailable: Vec<&Metric> = evaluation.unavailable().collect();
    if !unavailable.is_empty() {
        let _ = writeln!(out, "\n{}", format!("== {} ==", t!("unavailable_header")).bold());
        for metric in unavailable {
            let _ = writeln!(
                out,
                "  {} {}: {}",
                symbol(Severity::Info),
                metric.id.label(),
                unavailable_hint(metric).dimmed()
            );
        }
    }

    let _ = writeln!(out, "\n{}", overall_line(evaluation.overall));
    out
}

fn overall_line(overall: Overall) -> String {
    let status = match overall {
        Overall::Healthy => t!("overall_healthy").to_string().green().bold(),
        Overall::Warning => t!("overall_warning").to_string().yellow().bold(),
        Overall::Critical => t!("overall_critical").to_string().red().bold(),
    };
    format!("{} {}", t!("overall_label").to_string().bold(), status)
}

/// Hint shown in report-only mode when actions are available.
pub fn render_plan_hint(plan: &[ActionId]) -> String {
    let actions: Vec<String> = plan.iter().map(|action| action.title()).collect();
    t!("plan_hint", actions = actions.join(", "))
        .to_string()
        .cyan()
        .to_string()
}

pub fn render_remediation(reports: &[ActionReport], reboot_recommended: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", format!("== {} ==", t!("remediation_header")).bold());

    for report in reports {
        let (mark, outcome) = match &report.outcome {
            Outcome::Completed => (symbol(Severity::Ok), t!("outcome_completed").to_string().green()),
            Outcome::Failed => (symbol(Severity::Critical), t!("outcome_failed").to_string().red()),
            Outcome::Skipped(reason) => (
                symbol(Severity::Info),
                t!("outcome_skipped", reason = reason).to_string().dimmed(),
            ),
        };
        let _ = writeln!(out, "  {} {}: {}", mark, report.action.title().bold(), outcome);
        for step in &report.steps {
            let code = match step.code {
                Some(code) => code.to_string(),
                None => "-".to_string(),
            };
            let status = t!("step_exit", code = code).to_string();
            let status = if step.success() {
                status.green()
            } else {
                status.red()
            };
            let _ = write!(out, "      $ {} {}", step.command, status);
            if let Some(held) = step.held_back.filter(|&held| held > 0) {
                let _ = write!(
                    out,
                    " {}",
                    t!("step_held_back", count = held).to_string().yellow()
                );
            }
            out.push('\n');
        }
    }

    if reboot_recommended {
        let _ = writeln!(out, "\n{}", t!("reboot_recommended").to_string().yellow().bold());
    }
    let _ = writeln!(out, "\n{}", t!("rerun_to_verify").to_string().cyan());
    out
}

pub fn human_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}
