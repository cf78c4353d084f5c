use tracing::debug;

use super::{probe_failure, Context, Source};
use crate::host::Host;
use crate::metric::{Metric, MetricId, Unavailable};
use crate::pkg::{is_core_package, PackageManager};

const REBOOT_FLAG: &str = "/var/run/reboot-required";
const DPKG_UPDATES: &str = "/var/lib/dpkg/updates";
const MANAGERS: &str = "apt, dnf, pacman";

/// Pending updates, lock state and reboot need of the detected package
/// manager.
pub struct PackageState;

impl Source for PackageState {
    fn name(&self) -> &'static str {
        "packages"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        let Some(manager) = ctx.package_manager else {
            let reason = Unavailable::ToolMissing(MANAGERS.to_string());
            return vec![
                Metric::unavailable(MetricId::PendingUpdatesCount, reason.clone()),
                Metric::unavailable(MetricId::SystemdUpdatesPending, reason.clone()),
                Metric::unavailable(MetricId::PkgManagerLocked, reason),
                Metric::flag(MetricId::RebootRequired, reboot_required(ctx.host, None)),
            ];
        };

        let mut metrics = match pending_packages(ctx.host, manager) {
            Ok(pending) => {
                let core = pending.iter().any(|name| is_core_package(name));
                vec![
                    Metric::number(MetricId::PendingUpdatesCount, pending.len() as f64)
                        .with_detail(manager.name()),
                    Metric::flag(MetricId::SystemdUpdatesPending, core),
                ]
            }
            Err(reason) => vec![
                Metric::unavailable(MetricId::PendingUpdatesCount, reason.clone()),
                Metric::unavailable(MetricId::SystemdUpdatesPending, reason),
            ],
        };

        metrics.push(match held_locks(ctx.host, manager) {
            Ok(held) if held.is_empty() => Metric::flag(MetricId::PkgManagerLocked, false),
            Ok(held) => Metric::flag(MetricId::PkgManagerLocked, true).with_detail(held.join(", ")),
            Err(reason) => Metric::unavailable(MetricId::PkgManagerLocked, reason),
        });
        metrics.push(Metric::flag(
            MetricId::RebootRequired,
            reboot_required(ctx.host, Some(manager)),
        ));
        metrics
    }
}

fn pending_packages(host: &dyn Host, manager: PackageManager) -> Result<Vec<String>, Unavailable> {
    let query = manager.pending_query(host);
    let args: Vec<&str> = query.args.iter().map(String::as_str).collect();
    let output = host
        .run(&query.program, &args)
        .map_err(|err| probe_failure(&query.program, err))?;
    if !manager.query_succeeded(output.code) {
        debug!(command = %query, code = ?output.code, "update listing failed");
        return Err(if output.denied() {
            Unavailable::NeedsPrivileges
        } else {
            Unavailable::CommandFailed
        });
    }
    Ok(manager.parse_pending(&output.stdout))
}

/// Lock files currently held by a package transaction.
///
/// apt locks are only visible through `fuser`, which needs root to see the
/// descriptors of root's processes. When that check cannot run, the state is
/// unknown unless dpkg left an interrupted run behind.
pub fn held_locks(host: &dyn Host, manager: PackageManager) -> Result<Vec<String>, Unavailable> {
    let existing: Vec<&str> = manager
        .lock_paths()
        .iter()
        .copied()
        .filter(|path| host.path_exists(path))
        .collect();
    if manager.lock_is_presence() {
        return Ok(existing.into_iter().map(String::from).collect());
    }

    // Leftovers of an interrupted dpkg run block apt just the same
    let interrupted = !host.list_dir(DPKG_UPDATES).is_empty();
    let blocked = || -> Result<Vec<String>, Unavailable> { Ok(vec![DPKG_UPDATES.to_string()]) };
    if !existing.is_empty() {
        if !host.has_tool("fuser") {
            return if interrupted {
                blocked()
            } else {
                Err(Unavailable::ToolMissing("fuser".to_string()))
            };
        }
        if !host.is_root() {
            return if interrupted {
                blocked()
            } else {
                Err(Unavailable::NeedsPrivileges)
            };
        }
    }

    // fuser exits 0 only when some process has the file open
    let mut held: Vec<String> = existing
        .into_iter()
        .filter(|path| {
            host.run("fuser", &[*path])
                .map(|output| output.success())
                .unwrap_or(false)
        })
        .map(String::from)
        .collect();
    if interrupted {
        held.push(DPKG_UPDATES.to_string());
    }
    Ok(held)
}

fn reboot_required(host: &dyn Host, manager: Option<PackageManager>) -> bool {
    if host.path_exists(REBOOT_FLAG) {
        return true;
    }
    match manager {
        // needs-restarting -r exits 1 when a reboot is needed
        Some(PackageManager::Dnf) => host
            .run("needs-restarting", &["-r"])
            .map(|output| output.code == Some(1))
            .unwrap_or(false),
        // Arch removes the running kernel's modules when it upgrades
        Some(PackageManager::Pacman) => match host.run("uname", &["-r"]) {
            Ok(output) if output.success() => {
                let release = output.stdout.trim();
                !release.is_empty() && !host.path_exists(&format!("/usr/lib/modules/{release}"))
            }
            _ => false,
        },
        _ => false,
    }
}
