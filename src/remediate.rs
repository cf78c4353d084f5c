//! Fix mode: a fixed catalogue of corrective actions, planned from the
//! issue list and executed one step at a time.

use std::collections::{BTreeSet, HashSet};

use rust_i18n::t;
use tracing::{info, warn};

use crate::evaluate::Issue;
use crate::host::Host;
use crate::metric::{Metric, MetricId, Reading};
use crate::pkg::{PackageManager, Step, PROCESS_NAMES};
use crate::sources::HostFacts;

/// Declaration order is execution priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionId {
    ClearLocks,
    UpgradePackages,
    InstallTools,
}

impl ActionId {
    /// The action registered for an issue on `metric`, if any.
    pub fn for_metric(metric: MetricId) -> Option<Self> {
        match metric {
            MetricId::PkgManagerLocked => Some(ActionId::ClearLocks),
            MetricId::PendingUpdatesCount | MetricId::SystemdUpdatesPending => {
                Some(ActionId::UpgradePackages)
            }
            MetricId::MissingTools => Some(ActionId::InstallTools),
            _ => None,
        }
    }

    pub fn title(self) -> String {
        match self {
            ActionId::ClearLocks => t!("action_clear_locks"),
            ActionId::UpgradePackages => t!("action_upgrade_packages"),
            ActionId::InstallTools => t!("action_install_tools"),
        }
        .to_string()
    }
}

/// Distinct actions for `issues` in priority order.
pub fn plan(issues: &[Issue]) -> Vec<ActionId> {
    issues
        .iter()
        .filter_map(|issue| issue.remediation)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub command: String,
    pub code: Option<i32>,
    /// Packages left back after an upgrade step.
    pub held_back: Option<usize>,
}

impl StepResult {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Failed,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    pub action: ActionId,
    pub steps: Vec<StepResult>,
    pub outcome: Outcome,
}

impl ActionReport {
    fn skipped(action: ActionId, reason: impl Into<String>) -> Self {
        ActionReport {
            action,
            steps: Vec::new(),
            outcome: Outcome::Skipped(reason.into()),
        }
    }

    fn finished(action: ActionId, steps: Vec<StepResult>) -> Self {
        let outcome = if steps.iter().all(StepResult::success) {
            Outcome::Completed
        } else {
            Outcome::Failed
        };
        ActionReport {
            action,
            steps,
            outcome,
        }
    }
}

/// How commands get the privileges they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Elevation {
    Root,
    Sudo,
    Unavailable,
}

pub struct Remediator<'a> {
    host: &'a dyn Host,
    facts: &'a HostFacts,
    elevation: Elevation,
}

impl<'a> Remediator<'a> {
    pub fn new(host: &'a dyn Host, facts: &'a HostFacts) -> Self {
        let elevation = if host.is_root() {
            Elevation::Root
        } else if host.has_tool("sudo") {
            Elevation::Sudo
        } else {
            Elevation::Unavailable
        };
        Remediator {
            host,
            facts,
            elevation,
        }
    }

    /// Runs every planned action in order. `announce` sees each command
    /// right before it starts.
    pub fn execute(&self, plan: &[ActionId], mut announce: impl FnMut(&str)) -> Vec<ActionReport> {
        plan.iter()
            .map(|&action| {
                let report = self.run_action(action, &mut announce);
                info!(?action, outcome = ?report.outcome, steps = report.steps.len(), "action finished");
                report
            })
            .collect()
    }

    fn run_action(&self, action: ActionId, announce: &mut dyn FnMut(&str)) -> ActionReport {
        if self.elevation == Elevation::Unavailable {
            return ActionReport::skipped(action, t!("skip_no_sudo"));
        }
        let Some(manager) = self.facts.package_manager else {
            return ActionReport::skipped(action, t!("skip_no_package_manager"));
        };
        match action {
            ActionId::ClearLocks => self.clear_locks(manager, announce),
            ActionId::UpgradePackages => self.upgrade(manager, announce),
            ActionId::InstallTools => self.install_tools(manager, announce),
        }
    }

    fn clear_locks(&self, manager: PackageManager, announce: &mut dyn FnMut(&str)) -> ActionReport {
        let action = ActionId::ClearLocks;
        if let Some(process) = self.host.running_process(PROCESS_NAMES) {
            return ActionReport::skipped(
                action,
                t!("skip_pm_running", name = process.name, pid = process.pid),
            );
        }

        let mut steps = Vec::new();
        for path in manager.lock_paths() {
            if self.host.path_exists(path) {
                steps.push(self.run_step(&Step::new("rm", &["-f", *path]), announce));
            }
        }
        if let Some(step) = manager.post_unlock_step() {
            steps.push(self.run_step(&step, announce));
        }
        ActionReport::finished(action, steps)
    }

    fn upgrade(&self, manager: PackageManager, announce: &mut dyn FnMut(&str)) -> ActionReport {
        let mut steps = Vec::new();
        if let Some(refresh) = manager.refresh_step() {
            steps.push(self.run_step(&refresh, announce));
        }

        // Each rung runs once, and only while packages are still held back
        for rung in manager.upgrade_ladder() {
            let (mut result, stdout) = self.run_captured(&rung, announce);
            let held = manager.held_back(&stdout);
            result.held_back = Some(held);
            steps.push(result);
            if held == 0 {
                break;
            }
            info!(held, "packages held back, escalating upgrade");
        }
        ActionReport::finished(ActionId::UpgradePackages, steps)
    }

    fn install_tools(&self, manager: PackageManager, announce: &mut dyn FnMut(&str)) -> ActionReport {
        let mut seen = HashSet::new();
        let packages: Vec<String> = self
            .facts
            .missing_tools
            .iter()
            .map(|tool| manager.package_for_tool(tool))
            .filter(|package| seen.insert(package.clone()))
            .collect();
        if packages.is_empty() {
            return ActionReport::skipped(ActionId::InstallTools, t!("skip_nothing_to_install"));
        }
        let step = self.run_step(&manager.install_step(&packages), announce);
        ActionReport::finished(ActionId::InstallTools, vec![step])
    }

    fn run_step(&self, step: &Step, announce: &mut dyn FnMut(&str)) -> StepResult {
        self.run_captured(step, announce).0
    }

    fn run_captured(&self, step: &Step, announce: &mut dyn FnMut(&str)) -> (StepResult, String) {
        let step = self.elevate(step);
        let command = step.to_string();
        announce(&command);

        let args: Vec<&str> = step.args.iter().map(String::as_str).collect();
        let env: Vec<(&str, &str)> = step
            .env
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        match self.host.run_streamed(&step.program, &args, &env) {
            Ok(output) => {
                if !output.success() {
                    warn!(%command, code = ?output.code, "remediation step failed");
                }
                let result = StepResult {
                    command,
                    code: output.code,
                    held_back: None,
                };
                (result, output.stdout)
            }
            Err(err) => {
                warn!(%command, error = %err, "remediation step could not start");
                let result = StepResult {
                    command,
                    code: None,
                    held_back: None,
                };
                (result, String::new())
            }
        }
    }

    fn elevate(&self, step: &Step) -> Step {
        match self.elevation {
            // sudo resets the environment, so assignments travel through env(1)
            Elevation::Sudo => {
                let mut args = Vec::new();
                if !step.env.is_empty() {
                    args.push("env".to_string());
                    args.extend(step.env.iter().map(|(name, value)| format!("{name}={value}")));
                }
                args.push(step.program.clone());
                args.extend(step.args.iter().cloned());
                Step {
                    program: "sudo".to_string(),
                    args,
                    env: Vec::new(),
                }
            }
            Elevation::Root | Elevation::Unavailable => step.clone(),
        }
    }
}

/// Reboots are never performed; the report only recommends one.
pub fn reboot_recommended(metrics: &[Metric], reports: &[ActionReport]) -> bool {
    let flag_set = |id: MetricId| {
        metrics
            .iter()
            .any(|m| m.id == id && m.value == Ok(Reading::Flag(true)))
    };
    // Only ladder rungs carry a held-back count; the refresh step does not
    let upgraded = reports.iter().any(|r| {
        r.action == ActionId::UpgradePackages
            && r.steps.iter().any(|s| s.held_back.is_some() && s.success())
    });
    flag_set(MetricId::RebootRequired) || (upgraded && flag_set(MetricId::SystemdUpdatesPending))
}
