use std::cmp::Ordering;

use lazy_static::lazy_static;
use regex::Regex;

use super::{parse_millidegrees, probe_failure, Context, Source};
use crate::host::Host;
use crate::metric::{Metric, MetricId, Unavailable};

lazy_static! {
    static ref CORE_TEMP_RE: Regex = Regex::new(
        r"^\s*(?:Core \d+|Package id \d+|Tctl|Tdie|Tccd\d+|CPU|CPU Temperature):\s+\+?(-?[0-9]+(?:\.[0-9]+)?)\s*°C"
    )
    .unwrap();
}

const THERMAL_ROOT: &str = "/sys/class/thermal";

/// Hottest CPU core or package: lm-sensors first, kernel thermal zones as
/// fallback.
pub struct CpuSensors;

impl Source for CpuSensors {
    fn name(&self) -> &'static str {
        "sensors"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        let from_sensors = match ctx.host.run("sensors", &[]) {
            Ok(output) if output.success() => {
                parse_sensors(&output.stdout).ok_or(Unavailable::Unparseable)
            }
            Ok(_) => Err(Unavailable::CommandFailed),
            Err(err) => Err(probe_failure("sensors", err)),
        };

        let metric = match from_sensors {
            Ok(temp) => Metric::number(MetricId::CpuTempMaxC, temp).with_detail("sensors"),
            Err(reason) => match thermal_zone_max(ctx.host) {
                Some(temp) => {
                    Metric::number(MetricId::CpuTempMaxC, temp).with_detail("thermal zones")
                }
                None => Metric::unavailable(MetricId::CpuTempMaxC, reason),
            },
        };
        vec![metric]
    }
}

/// Maximum of all core/package readings in `sensors` output.
pub fn parse_sensors(text: &str) -> Option<f64> {
    text.lines()
        .filter_map(|line| {
            CORE_TEMP_RE
                .captures(line)
                .and_then(|cap| cap.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        })
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
}

fn is_cpu_zone(zone_type: &str) -> bool {
    let zone_type = zone_type.trim().to_ascii_lowercase();
    zone_type == "x86_pkg_temp"
        || zone_type.contains("cpu")
        || zone_type == "k10temp"
        || zone_type == "coretemp"
        || zone_type == "soc_thermal"
}

fn thermal_zone_max(host: &dyn Host) -> Option<f64> {
    host.list_dir(THERMAL_ROOT)
        .into_iter()
        .filter(|entry| entry.starts_with("thermal_zone"))
        .filter(|zone| {
            host.read_file(&format!("{THERMAL_ROOT}/{zone}/type"))
                .map(|t| is_cpu_zone(&t))
                .unwrap_or(false)
        })
        .filter_map(|zone| {
            host.read_file(&format!("{THERMAL_ROOT}/{zone}/temp"))
                .and_then(|t| parse_millidegrees(&t))
        })
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::fake::FakeHost;

    const INTEL: &str = "coretemp-isa-0000
Adapter: ISA adapter
Package id 0:  +54.0°C  (high = +80.0°C, crit = +100.0°C)
Core 0:        +51.0°C  (high = +80.0°C, crit = +100.0°C)
Core 1:        +57.5°C  (high = +80.0°C, crit = +100.0°C)

nvme-pci-0100
Adapter: PCI adapter
Composite:    +71.9°C  (low  = -273.1°C, high = +84.8°C)
";

    const AMD: &str = "k10temp-pci-00c3
Adapter: PCI adapter
Tctl:         +62.8°C
Tccd1:        +48.2°C
";

    #[test]
    fn test_max_core_reading_ignores_other_chips() {
        assert_eq!(parse_sensors(INTEL), Some(57.5));
    }

    #[test]
    fn test_amd_tctl() {
        assert_eq!(parse_sensors(AMD), Some(62.8));
    }

    #[test]
    fn test_no_cpu_readings() {
        assert_eq!(parse_sensors("acpitz-acpi-0\nAdapter: ACPI interface\ntemp1: +27.8°C\n"), None);
    }

    #[test]
    fn test_falls_back_to_thermal_zones() {
        let host = FakeHost::new()
            .with_dir(THERMAL_ROOT, &["cooling_device0", "thermal_zone0", "thermal_zone1"])
            .with_file("/sys/class/thermal/thermal_zone0/type", "acpitz\n")
            .with_file("/sys/class/thermal/thermal_zone0/temp", "27800\n")
            .with_file("/sys/class/thermal/thermal_zone1/type", "x86_pkg_temp\n")
            .with_file("/sys/class/thermal/thermal_zone1/temp", "64000\n");
        let config = Config::from_toml("", "test").unwrap();
        let ctx = Context {
            host: &host,
            config: &config,
            package_manager: None,
        };
        let metrics = CpuSensors.collect(&ctx);
        assert_eq!(
            metrics,
            vec![Metric::number(MetricId::CpuTempMaxC, 64.0).with_detail("thermal zones")]
        );
    }

    #[test]
    fn test_nothing_available_reports_missing_sensors() {
        let host = FakeHost::new();
        let config = Config::from_toml("", "test").unwrap();
        let ctx = Context {
            host: &host,
            config: &config,
            package_manager: None,
        };
        let metrics = CpuSensors.collect(&ctx);
        assert_eq!(
            metrics[0].value,
            Err(Unavailable::ToolMissing("sensors".into()))
        );
    }
}
