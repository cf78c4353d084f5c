use serde::Deserialize;
use tracing::debug;

use super::{probe_failure, Context, Source};
use crate::host::{CommandOutput, Host};
use crate::metric::{Metric, MetricId, Unavailable};

const FALLBACK_DEVICE: &str = "/dev/nvme0";
// smartctl exit status bit 1: device open failed
const OPEN_FAILED: i32 = 0b10;

/// SMART health and temperature of the first NVMe drive.
pub struct DriveHealth;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartReading {
    pub passed: Option<bool>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SmartJson {
    smart_status: Option<SmartStatus>,
    temperature: Option<Temperature>,
}

#[derive(Debug, Deserialize)]
struct SmartStatus {
    passed: bool,
}

#[derive(Debug, Deserialize)]
struct Temperature {
    current: f64,
}

impl Source for DriveHealth {
    fn name(&self) -> &'static str {
        "smartctl"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        match read_drive(ctx.host) {
            Ok((device, reading)) => vec![
                Metric::number_or(MetricId::NvmeTempC, reading.temperature, Unavailable::Unparseable)
                    .with_detail(device.clone()),
                match reading.passed {
                    Some(true) => Metric::text(MetricId::NvmeHealth, "PASSED"),
                    Some(false) => Metric::text(MetricId::NvmeHealth, "FAILED"),
                    None => Metric::unavailable(MetricId::NvmeHealth, Unavailable::Unparseable),
                }
                .with_detail(device),
            ],
            Err(reason) => vec![
                Metric::unavailable(MetricId::NvmeTempC, reason.clone()),
                Metric::unavailable(MetricId::NvmeHealth, reason),
            ],
        }
    }
}

fn read_drive(host: &dyn Host) -> Result<(String, SmartReading), Unavailable> {
    if !host.has_tool("smartctl") {
        return Err(Unavailable::ToolMissing("smartctl".to_string()));
    }
    let device = find_nvme_device(host).ok_or(Unavailable::NoDevice)?;
    debug!(device, "reading SMART data");

    let json = host
        .run("smartctl", &["-H", "-A", "-j", &device])
        .map_err(|err| probe_failure("smartctl", err))?;
    if let Some(reading) = parse_smart_json(&json.stdout) {
        return Ok((device, reading));
    }

    // Old smartctl builds have no JSON output
    let text = host
        .run("smartctl", &["-H", "-A", &device])
        .map_err(|err| probe_failure("smartctl", err))?;
    let reading = parse_smart_text(&text.stdout);
    if reading != SmartReading::default() {
        return Ok((device, reading));
    }

    if unreadable(&json) || unreadable(&text) {
        Err(Unavailable::NeedsPrivileges)
    } else {
        Err(Unavailable::Unparseable)
    }
}

fn unreadable(output: &CommandOutput) -> bool {
    output.denied() || output.code.map_or(false, |code| code & OPEN_FAILED != 0)
}

fn find_nvme_device(host: &dyn Host) -> Option<String> {
    let scanned = host
        .run("smartctl", &["--scan"])
        .ok()
        .filter(CommandOutput::success)
        .and_then(|output| parse_scan(&output.stdout));
    scanned.or_else(|| host.path_exists(FALLBACK_DEVICE).then(|| FALLBACK_DEVICE.to_string()))
}

/// First NVMe device from `smartctl --scan`, e.g.
/// `/dev/nvme0 -d nvme # /dev/nvme0, NVMe device`.
pub fn parse_scan(text: &str) -> Option<String> {
    text.lines()
        .filter(|line| line.contains("nvme"))
        .find_map(|line| line.split_whitespace().next())
        .map(str::to_string)
}

pub fn parse_smart_json(text: &str) -> Option<SmartReading> {
    let parsed: SmartJson = serde_json::from_str(text).ok()?;
    let reading = SmartReading {
        passed: parsed.smart_status.map(|s| s.passed),
        temperature: parsed.temperature.map(|t| t.current),
    };
    if reading == SmartReading::default() {
        None
    } else {
        Some(reading)
    }
}

pub fn parse_smart_text(text: &str) -> SmartReading {
    let mut reading = SmartReading::default();
    for line in text.lines() {
        if let Some((_, verdict)) = line
            .split_once("self-assessment test result:")
            .or_else(|| line.split_once("SMART Health Status:"))
        {
            let verdict = verdict.trim();
            reading.passed = Some(verdict == "PASSED" || verdict == "OK");
        } else if let Some(rest) = line.trim_start().strip_prefix("Temperature:") {
            reading.temperature = rest
                .split_whitespace()
                .next()
                .and_then(|value| value.parse().ok());
        }
    }
    reading
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::fake::FakeHost;

    const SMART_JSON: &str = r#"{
  "json_format_version": [1, 0],
  "device": {"name": "/dev/nvme0", "type": "nvme", "protocol": "NVMe"},
  "smart_status": {"passed": true, "nvme": {"value": 0}},
  "temperature": {"current": 41},
  "power_on_time": {"hours": 8120}
}"#;

    const SMART_TEXT: &str = "smartctl 7.2 2020-12-30 r5155 [x86_64-linux-5.15.0] (local build)
=== START OF SMART DATA SECTION ===
SMART overall-health self-assessment test result: PASSED

SMART/Health Information (NVMe Log 0x02)
Critical Warning:                   0x00
Temperature:                        39 Celsius
Available Spare:                    100%
";

    fn collect_with(host: &FakeHost) -> Vec<Metric> {
        let config = Config::from_toml("", "test").unwrap();
        let ctx = Context {
            host,
            config: &config,
            package_manager: None,
        };
        DriveHealth.collect(&ctx)
    }

    #[test]
    fn test_scan_picks_nvme() {
        let scan = "/dev/sda -d scsi # /dev/sda, SCSI device\n/dev/nvme1 -d nvme # /dev/nvme1, NVMe device\n";
        assert_eq!(parse_scan(scan).as_deref(), Some("/dev/nvme1"));
        assert_eq!(parse_scan("/dev/sda -d sat # /dev/sda\n"), None);
    }

    #[test]
    fn test_json_reading() {
        let reading = parse_smart_json(SMART_JSON).unwrap();
        assert_eq!(reading.passed, Some(true));
        assert_eq!(reading.temperature, Some(41.0));
        assert_eq!(parse_smart_json("not json"), None);
        assert_eq!(parse_smart_json("{}"), None);
    }

    #[test]
    fn test_text_reading() {
        let reading = parse_smart_text(SMART_TEXT);
        assert_eq!(reading.passed, Some(true));
        assert_eq!(reading.temperature, Some(39.0));

        let failing = parse_smart_text("SMART Health Status: FAILURE PREDICTION THRESHOLD EXCEEDED\n");
        assert_eq!(failing.passed, Some(false));
    }

    #[test]
    fn test_collects_from_scanned_drive() {
        let host = FakeHost::new()
            .respond("smartctl --scan", 0, "/dev/nvme0 -d nvme # /dev/nvme0, NVMe device\n")
            .respond("smartctl -H -A -j /dev/nvme0", 0, SMART_JSON);
        let metrics = collect_with(&host);
        assert_eq!(
            metrics,
            vec![
                Metric::number(MetricId::NvmeTempC, 41.0).with_detail("/dev/nvme0"),
                Metric::text(MetricId::NvmeHealth, "PASSED").with_detail("/dev/nvme0"),
            ]
        );
    }

    #[test]
    fn test_permission_denied_needs_privileges() {
        let host = FakeHost::new()
            .respond("smartctl --scan", 0, "/dev/nvme0 -d nvme # /dev/nvme0, NVMe device\n")
            .respond("smartctl -H -A -j /dev/nvme0", 2, "{\"smartctl\": {\"exit_status\": 2}}")
            .respond("smartctl -H -A /dev/nvme0", 2, "Smartctl open device: /dev/nvme0 failed: Permission denied\n");
        let metrics = collect_with(&host);
        assert_eq!(metrics[1].value, Err(Unavailable::NeedsPrivileges));
    }

    #[test]
    fn test_no_drive_and_no_tool() {
        let host = FakeHost::new().respond("smartctl --scan", 0, "/dev/sda -d sat # /dev/sda\n");
        assert_eq!(collect_with(&host)[0].value, Err(Unavailable::NoDevice));

        let metrics = collect_with(&FakeHost::new());
        assert_eq!(
            metrics[0].value,
            Err(Unavailable::ToolMissing("smartctl".into()))
        );
    }
}
