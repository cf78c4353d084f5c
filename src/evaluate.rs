//! Turns collected metrics into severities, issues and an overall status.

use rust_i18n::t;

use crate::config::{Bounds, Thresholds};
use crate::metric::{Kind, Metric, MetricId, Reading, Severity};
use crate::remediate::ActionId;

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub metric: Metric,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub metric: MetricId,
    pub severity: Severity,
    pub message: String,
    pub remediation: Option<ActionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Overall {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Every metric in check order, unavailable ones included.
    pub assessments: Vec<Assessment>,
    pub issues: Vec<Issue>,
    pub overall: Overall,
}

impl Evaluation {
    pub fn unavailable(&self) -> impl Iterator<Item = &Metric> {
        self.assessments
            .iter()
            .map(|a| &a.metric)
            .filter(|m| !m.is_available())
    }
}

/// Strictly greater than a bound escalates; equal does not.
pub fn classify(value: f64, bounds: Bounds) -> Severity {
    if value > bounds.critical {
        Severity::Critical
    } else if value > bounds.warning {
        Severity::Warning
    } else {
        Severity::Ok
    }
}

pub fn assess(metric: &Metric, thresholds: &Thresholds) -> Severity {
    let Ok(reading) = &metric.value else {
        return Severity::Info;
    };
    match (metric.id.kind(), reading) {
        (Kind::Gauge, Reading::Number(value)) => match thresholds.get(metric.id) {
            Some(bounds) => classify(*value, bounds),
            None => Severity::Info,
        },
        (Kind::Flag, Reading::Flag(true)) => Severity::Warning,
        (Kind::Flag, Reading::Flag(false)) => Severity::Ok,
        (Kind::Health, Reading::Text(verdict)) => {
            let verdict = verdict.trim();
            if verdict.eq_ignore_ascii_case("PASSED") || verdict.eq_ignore_ascii_case("OK") {
                Severity::Ok
            } else {
                Severity::Critical
            }
        }
        _ => Severity::Info,
    }
}

pub fn evaluate(metrics: &[Metric], thresholds: &Thresholds) -> Evaluation {
    let assessments: Vec<Assessment> = metrics
        .iter()
        .map(|metric| Assessment {
            metric: metric.clone(),
            severity: assess(metric, thresholds),
        })
        .collect();

    let issues: Vec<Issue> = assessments
        .iter()
        .filter(|a| a.severity.is_issue())
        .map(|a| Issue {
            metric: a.metric.id,
            severity: a.severity,
            message: issue_message(&a.metric, a.severity, thresholds),
            remediation: ActionId::for_metric(a.metric.id),
        })
        .collect();

    let overall = overall(&issues);
    Evaluation {
        assessments,
        issues,
        overall,
    }
}

pub fn overall(issues: &[Issue]) -> Overall {
    match issues.iter().map(|issue| issue.severity).max() {
        Some(Severity::Critical) => Overall::Critical,
        Some(Severity::Warning) => Overall::Warning,
        _ => Overall::Healthy,
    }
}

fn issue_message(metric: &Metric, severity: Severity, thresholds: &Thresholds) -> String {
    let detail = metric.detail.clone().unwrap_or_default();
    let message = match metric.id {
        MetricId::PkgManagerLocked => t!("issue_pkg_manager_locked", locks = detail),
        MetricId::SystemdUpdatesPending => t!("issue_systemd_updates_pending"),
        MetricId::RebootRequired => t!("issue_reboot_required"),
        MetricId::MissingTools => t!("issue_missing_tools", tools = detail),
        MetricId::NetworkUnreachable => t!("issue_network_unreachable", url = detail),
        MetricId::NvmeHealth => t!(
            "issue_nvme_health",
            device = detail,
            verdict = metric.display_value()
        ),
        id => {
            let bounds = thresholds.get(id);
            let bound = match (severity, bounds) {
                (Severity::Critical, Some(b)) => b.critical,
                (_, Some(b)) => b.warning,
                (_, None) => 0.0,
            };
            let bound = Metric::number(id, bound).display_value();
            let value = match &metric.detail {
                Some(detail) => format!("{} ({detail})", metric.display_value()),
                None => metric.display_value(),
            };
            if severity == Severity::Critical {
                t!("issue_above_critical", label = id.label(), value = value, bound = bound)
            } else {
                t!("issue_above_warning", label = id.label(), value = value, bound = bound)
            }
        }
    };
    message.to_string()
}
