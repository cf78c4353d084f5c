//! Dependency checking module
//! Verifies availability of external command-line tools

use std::fmt::Write as _;

use colored::*;
use thiserror::Error;

use crate::host::Host;

/// Utilities every classification depends on.
pub const BASELINE: [&str; 3] = ["df", "free", "top"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartupError {
    #[error("required utilities are missing: {}", .0.join(", "))]
    MissingBaseline(Vec<String>),
}

/// Fails fast when a baseline utility is absent.
pub fn require_baseline(host: &dyn Host) -> Result<(), StartupError> {
    let missing: Vec<String> = BASELINE
        .iter()
        .filter(|tool| !host.has_tool(tool))
        .map(|tool| tool.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StartupError::MissingBaseline(missing))
    }
}

// (category, [(command, purpose, required)])
type Catalogue = [(&'static str, &'static [(&'static str, &'static str, bool)])];

const DEPENDENCIES: &Catalogue = &[
    (
        "Baseline",
        &[
            ("df", "Filesystem usage", true),
            ("free", "Memory and swap usage", true),
            ("top", "CPU load snapshot", true),
        ],
    ),
    (
        "Hardware Monitoring",
        &[
            ("sensors", "CPU temperatures", false),
            ("smartctl", "NVMe SMART health and temperature", false),
            ("nvidia-smi", "NVIDIA GPU telemetry", false),
            ("rocm-smi", "AMD GPU telemetry (ROCm)", false),
            ("intel_gpu_top", "Intel GPU activity", false),
        ],
    ),
    (
        "Logs",
        &[
            ("journalctl", "Systemd journal errors", false),
            ("dmesg", "Kernel ring buffer errors", false),
        ],
    ),
    (
        "Packages",
        &[
            ("apt-get", "Debian/Ubuntu package manager", false),
            ("dnf", "Fedora/RHEL package manager", false),
            ("pacman", "Arch package manager", false),
            ("checkupdates", "Arch update listing without root", false),
            ("needs-restarting", "Fedora/RHEL reboot detection", false),
            ("fuser", "apt lock holder detection", false),
        ],
    ),
    (
        "Containers",
        &[
            ("docker", "Docker container counts", false),
            ("podman", "Podman container counts", false),
        ],
    ),
    (
        "Network",
        &[
            ("ip", "Interface state", false),
            ("ss", "Established connections", false),
            ("vnstat", "Traffic sampling", false),
        ],
    ),
    (
        "Remediation",
        &[("sudo", "Privileged fixes without root", false)],
    ),
];

/// Availability table of every external tool syscheck may call.
pub fn render_deps(host: &dyn Host) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "External Command Dependencies".bold().underline());
    out.push('\n');

    let mut total = 0;
    let mut available = 0;

    for (category, commands) in DEPENDENCIES {
        let _ = writeln!(out, "{}", category.bold());
        for &(cmd, description, required) in commands.iter() {
            total += 1;
            let is_available = host.has_tool(cmd);
            if is_available {
                available += 1;
            }

            let status = if is_available {
                "✓".green().bold()
            } else if required {
                "✗".red().bold()
            } else {
                "○".yellow()
            };
            let _ = writeln!(out, "  {} {:<20} {}", status, cmd, description.dimmed());
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{}", "Summary".bold().underline());
    let percentage = (available as f32 / total as f32 * 100.0) as u32;
    let summary = format!("{}/{} commands available ({}%)", available, total, percentage);
    let summary = if percentage >= 80 {
        summary.green().bold()
    } else if percentage >= 50 {
        summary.yellow().bold()
    } else {
        summary.red().bold()
    };
    let _ = writeln!(out, "{summary}");

    out.push('\n');
    let _ = writeln!(out, "{}", "Legend:".dimmed());
    let _ = writeln!(out, "  {} Available", "✓".green());
    let _ = writeln!(out, "  {} Missing (optional)", "○".yellow());
    let _ = writeln!(out, "  {} Missing (required)", "✗".red());
    out
}

pub fn check_deps(host: &dyn Host) {
    print!("{}", render_deps(host));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    #[test]
    fn test_baseline_present() {
        let host = FakeHost::new()
            .with_tool("df")
            .with_tool("free")
            .with_tool("top");
        assert_eq!(require_baseline(&host), Ok(()));
    }

    #[test]
    fn test_missing_baseline_is_named() {
        let host = FakeHost::new().with_tool("free");
        let err = require_baseline(&host).unwrap_err();
        assert_eq!(
            err,
            StartupError::MissingBaseline(vec!["df".into(), "top".into()])
        );
        assert_eq!(err.to_string(), "required utilities are missing: df, top");
    }

    #[test]
    fn test_table_marks_required_and_optional() {
        colored::control::set_override(false);
        let host = FakeHost::new().with_tool("df").with_tool("docker");
        let text = render_deps(&host);
        assert!(text.contains("✓ df"));
        assert!(text.contains("✗ top"));
        assert!(text.contains("○ podman"));
        assert!(text.contains("2/"));
    }
}
