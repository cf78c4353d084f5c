//! Telemetry sources. Each one asks a single tool family for facts and
//! turns its text output into [`Metric`]s; parsing lives next to the source
//! so the evaluator never sees tool output.

pub mod containers;
pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod logs;
pub mod memory;
pub mod network;
pub mod packages;
pub mod smart;
pub mod thermal;
pub mod tools;

use tracing::{debug, warn};

use crate::config::Config;
use crate::host::{Host, ProbeError};
use crate::metric::{Metric, Unavailable};
use crate::pkg::PackageManager;

/// What every source gets to work with.
pub struct Context<'a> {
    pub host: &'a dyn Host,
    pub config: &'a Config,
    pub package_manager: Option<PackageManager>,
}

pub trait Source {
    fn name(&self) -> &'static str;
    fn collect(&self, ctx: &Context) -> Vec<Metric>;
}

/// Facts remediation needs beyond the metrics themselves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostFacts {
    pub package_manager: Option<PackageManager>,
    pub missing_tools: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub metrics: Vec<Metric>,
    pub facts: HostFacts,
}

/// Sources in check order. The report and the issue list keep this order.
fn registry() -> Vec<Box<dyn Source>> {
    vec![
        Box::new(cpu::CpuLoad),
        Box::new(memory::MemorySummary),
        Box::new(disk::DiskUsage),
        Box::new(thermal::CpuSensors),
        Box::new(gpu::GpuTelemetry),
        Box::new(smart::DriveHealth),
        Box::new(logs::ErrorLog),
        Box::new(packages::PackageState),
        Box::new(tools::MonitoringTools),
        Box::new(containers::ContainerRuntime),
        Box::new(network::NetworkState),
    ]
}

pub fn collect_all(host: &dyn Host, config: &Config) -> Collection {
    let package_manager = PackageManager::detect(host);
    debug!(manager = ?package_manager.map(|m| m.name()), "package manager detection");
    let ctx = Context {
        host,
        config,
        package_manager,
    };

    let mut metrics = Vec::new();
    for source in registry() {
        let collected = source.collect(&ctx);
        debug!(source = source.name(), count = collected.len(), "source collected");
        metrics.extend(collected);
    }

    Collection {
        metrics,
        facts: HostFacts {
            package_manager,
            missing_tools: tools::missing(host, &config.remediation.monitoring_tools),
        },
    }
}

/// Stdout of a successful command, or the reason it is unusable.
pub fn capture(host: &dyn Host, program: &str, args: &[&str]) -> Result<String, Unavailable> {
    match host.run(program, args) {
        Ok(output) if output.success() => Ok(output.stdout),
        Ok(output) => {
            warn!(program, code = ?output.code, "probe exited unsuccessfully");
            if output.denied() {
                Err(Unavailable::NeedsPrivileges)
            } else {
                Err(Unavailable::CommandFailed)
            }
        }
        Err(err) => Err(probe_failure(program, err)),
    }
}

pub fn probe_failure(program: &str, err: ProbeError) -> Unavailable {
    match err {
        ProbeError::Missing(tool) => Unavailable::ToolMissing(tool),
        ProbeError::Spawn { .. } => {
            warn!(program, error = %err, "probe could not start");
            Unavailable::CommandFailed
        }
    }
}

/// Value in millidegrees as exposed by hwmon and thermal zones.
pub fn parse_millidegrees(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .map(|milli| milli / 1000.0)
}
