//! Package manager knowledge: detection, queries, locks and the upgrade
//! escalation ladder.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::host::Host;

lazy_static! {
    static ref APT_NOT_UPGRADED: Regex = Regex::new(r"(\d+)\s+not upgraded").unwrap();
}

/// Process names that mean a package transaction may be in flight.
/// Linux truncates process names to 15 characters.
pub const PROCESS_NAMES: &[&str] = &[
    "apt",
    "apt-get",
    "aptitude",
    "dpkg",
    "unattended-upgr",
    "packagekitd",
    "dnf",
    "yum",
    "pacman",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Pacman,
}

/// Probed in this order; the first one installed wins.
const DETECTION_ORDER: [PackageManager; 3] =
    [PackageManager::Apt, PackageManager::Dnf, PackageManager::Pacman];

/// Keeps dpkg from stopping at debconf questions and config-file prompts.
const DPKG_NONINTERACTIVE: (&str, &str) = ("DEBIAN_FRONTEND", "noninteractive");
const APT_CONF_OPTIONS: [&str; 4] = [
    "-o",
    "Dpkg::Options::=--force-confdef",
    "-o",
    "Dpkg::Options::=--force-confold",
];

/// One command of a remediation sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment, shown as `NAME=value` prefixes.
    pub env: Vec<(String, String)>,
}

impl Step {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Step {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: Vec::new(),
        }
    }

    /// `apt-get` that keeps existing config files and never asks.
    fn apt_get(args: &[&str]) -> Self {
        let mut full: Vec<&str> = APT_CONF_OPTIONS.to_vec();
        full.extend_from_slice(args);
        Step::new("apt-get", &full).with_env(DPKG_NONINTERACTIVE)
    }

    fn with_env(mut self, (name, value): (&str, &str)) -> Self {
        self.env.push((name.to_string(), value.to_string()));
        self
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.env {
            write!(f, "{name}={value} ")?;
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl PackageManager {
    pub fn detect(host: &dyn Host) -> Option<Self> {
        DETECTION_ORDER
            .into_iter()
            .find(|manager| host.has_tool(manager.binary()))
    }

    pub fn name(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
        }
    }

    pub fn binary(self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
        }
    }

    /// Command listing upgradable packages.
    pub fn pending_query(self, host: &dyn Host) -> Step {
        match self {
            PackageManager::Apt => Step::new("apt", &["list", "--upgradable"]),
            PackageManager::Dnf => Step::new("dnf", &["-q", "check-update"]),
            // checkupdates works on a private database copy and needs no root
            PackageManager::Pacman if host.has_tool("checkupdates") => {
                Step::new("checkupdates", &[])
            }
            PackageManager::Pacman => Step::new("pacman", &["-Qu"]),
        }
    }

    /// Exit codes that mean the listing worked, with or without updates.
    pub fn query_succeeded(self, code: Option<i32>) -> bool {
        match (self, code) {
            (_, Some(0)) => true,
            // dnf check-update exits 100 when updates exist
            (PackageManager::Dnf, Some(100)) => true,
            // checkupdates exits 2 and pacman -Qu exits 1 when nothing is pending
            (PackageManager::Pacman, Some(1 | 2)) => true,
            _ => false,
        }
    }

    /// Names of pending packages from the listing output.
    pub fn parse_pending(self, output: &str) -> Vec<String> {
        match self {
            PackageManager::Apt => output
                .lines()
                .map(str::trim)
                .filter(|line| {
                    !line.is_empty() && !line.starts_with("Listing") && !line.starts_with("WARNING")
                })
                .filter_map(|line| line.split('/').next())
                .map(|name| name.to_string())
                .collect(),
            PackageManager::Dnf => {
                let mut names = Vec::new();
                for line in output.lines() {
                    if line.starts_with("Obsoleting") {
                        break;
                    }
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    if fields.len() != 3 || line.starts_with("Last metadata") {
                        continue;
                    }
                    let name = match fields[0].rsplit_once('.') {
                        Some((name, _arch)) => name,
                        None => fields[0],
                    };
                    names.push(name.to_string());
                }
                names
            }
            PackageManager::Pacman => output
                .lines()
                .filter(|line| line.contains("->"))
                .filter_map(|line| line.split_whitespace().next())
                .map(|name| name.to_string())
                .collect(),
        }
    }

    pub fn lock_paths(self) -> &'static [&'static str] {
        match self {
            PackageManager::Apt => &[
                "/var/lib/dpkg/lock-frontend",
                "/var/lib/dpkg/lock",
                "/var/lib/apt/lists/lock",
                "/var/cache/apt/archives/lock",
            ],
            PackageManager::Dnf => &[
                "/var/lib/dnf/rpmdb_lock.pid",
                "/var/cache/dnf/metadata_lock.pid",
            ],
            PackageManager::Pacman => &["/var/lib/pacman/db.lck"],
        }
    }

    /// apt keeps its lock files around and takes fcntl locks on them; the
    /// others create the file only while they run.
    pub fn lock_is_presence(self) -> bool {
        !matches!(self, PackageManager::Apt)
    }

    pub fn refresh_step(self) -> Option<Step> {
        match self {
            PackageManager::Apt => Some(Step::apt_get(&["update"])),
            PackageManager::Dnf | PackageManager::Pacman => None,
        }
    }

    /// Upgrade commands from most conservative to most permissive.
    pub fn upgrade_ladder(self) -> Vec<Step> {
        match self {
            PackageManager::Apt => vec![
                Step::apt_get(&["upgrade", "-y"]),
                Step::apt_get(&["upgrade", "--with-new-pkgs", "-y"]),
                Step::apt_get(&["dist-upgrade", "-y"]),
            ],
            PackageManager::Dnf => vec![
                Step::new("dnf", &["upgrade", "-y", "--refresh"]),
                Step::new("dnf", &["upgrade", "-y", "--allowerasing"]),
                Step::new("dnf", &["distro-sync", "-y", "--allowerasing"]),
            ],
            PackageManager::Pacman => vec![Step::new("pacman", &["-Syu", "--noconfirm"])],
        }
    }

    /// Packages the manager declined to upgrade, read from upgrade output.
    pub fn held_back(self, output: &str) -> usize {
        match self {
            PackageManager::Apt => APT_NOT_UPGRADED
                .captures_iter(output)
                .last()
                .and_then(|cap| cap.get(1))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
            PackageManager::Dnf => {
                let mut in_section = false;
                let mut count = 0;
                for line in output.lines() {
                    if line.starts_with("Skipping packages") {
                        in_section = true;
                        continue;
                    }
                    if !in_section {
                        continue;
                    }
                    let trimmed = line.trim();
                    if trimmed.starts_with('(') {
                        continue;
                    }
                    if line.starts_with(' ') && !trimmed.is_empty() {
                        count += 1;
                    } else {
                        in_section = false;
                    }
                }
                count
            }
            // pacman upgrades everything or nothing
            PackageManager::Pacman => 0,
        }
    }

    /// Repairs left behind by an interrupted transaction.
    pub fn post_unlock_step(self) -> Option<Step> {
        match self {
            PackageManager::Apt => Some(
                Step::new("dpkg", &["--force-confdef", "--force-confold", "--configure", "-a"])
                    .with_env(DPKG_NONINTERACTIVE),
            ),
            PackageManager::Dnf | PackageManager::Pacman => None,
        }
    }

    pub fn install_step(self, packages: &[String]) -> Step {
        let mut step = match self {
            PackageManager::Apt => Step::apt_get(&["install", "-y"]),
            PackageManager::Dnf => Step::new("dnf", &["install", "-y"]),
            PackageManager::Pacman => Step::new("pacman", &["-S", "--needed", "--noconfirm"]),
        };
        step.args.extend(packages.iter().cloned());
        step
    }

    /// Distribution package that ships `tool`.
    pub fn package_for_tool(self, tool: &str) -> String {
        let name = match (tool, self) {
            ("sensors", PackageManager::Apt) => "lm-sensors",
            ("sensors", _) => "lm_sensors",
            ("smartctl", _) => "smartmontools",
            ("nvme", _) => "nvme-cli",
            ("fuser", _) => "psmisc",
            ("intel_gpu_top", PackageManager::Dnf) => "igt-gpu-tools",
            ("intel_gpu_top", _) => "intel-gpu-tools",
            ("iostat", _) => "sysstat",
            (other, _) => other,
        };
        name.to_string()
    }
}

/// Packages whose upgrade only takes effect after a reboot.
pub fn is_core_package(name: &str) -> bool {
    name == "systemd"
        || name.starts_with("systemd-")
        || name.starts_with("libsystemd")
        || name == "linux"
        || name.starts_with("linux-image")
        || name.starts_with("linux-generic")
        || name.starts_with("linux-lts")
        || name.starts_with("linux-zen")
        || name == "kernel"
        || name.starts_with("kernel-core")
}
