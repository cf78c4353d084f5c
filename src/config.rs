use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::metric::{Kind, MetricId};

/// Default configuration compiled into the binary.
pub const BUNDLED_CONFIG: &str = include_str!("../syscheck.toml");

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default, rename = "threshold")]
    pub thresholds: Vec<ThresholdRule>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    #[serde(default = "default_excluded_fs_types")]
    pub excluded_fs_types: Vec<String>,
    #[serde(default = "default_excluded_mount_prefixes")]
    pub excluded_mount_prefixes: Vec<String>,
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
    #[serde(default)]
    pub noisy_log_sources: Vec<String>,
    #[serde(default = "default_sample_secs")]
    pub gpu_sample_secs: u64,
    #[serde(default = "default_sample_secs")]
    pub net_sample_secs: u64,
    #[serde(default)]
    pub connectivity_url: String,
    #[serde(default = "default_connectivity_timeout_secs")]
    pub connectivity_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemediationConfig {
    #[serde(default = "default_monitoring_tools")]
    pub monitoring_tools: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdRule {
    pub metric: MetricId,
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub warning: f64,
    pub critical: f64,
}

/// Validated threshold table, keyed by metric.
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    rules: BTreeMap<MetricId, Bounds>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration {origin} is invalid: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("threshold for {metric}: warning bound {warning} must not exceed critical bound {critical}")]
    InvertedBounds {
        metric: &'static str,
        warning: f64,
        critical: f64,
    },
    #[error("threshold for {0} is defined more than once")]
    Duplicate(&'static str),
    #[error("{0} is not a numeric gauge and cannot carry a threshold")]
    NotAGauge(&'static str),
    #[error("collector.log_lines must be greater than zero")]
    EmptyLogWindow,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            excluded_fs_types: default_excluded_fs_types(),
            excluded_mount_prefixes: default_excluded_mount_prefixes(),
            log_lines: default_log_lines(),
            noisy_log_sources: Vec::new(),
            gpu_sample_secs: default_sample_secs(),
            net_sample_secs: default_sample_secs(),
            connectivity_url: String::new(),
            connectivity_timeout_secs: default_connectivity_timeout_secs(),
        }
    }
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            monitoring_tools: default_monitoring_tools(),
        }
    }
}

impl CollectorConfig {
    pub fn gpu_sample(&self) -> Duration {
        Duration::from_secs(self.gpu_sample_secs.max(1))
    }

    pub fn net_sample(&self) -> Duration {
        Duration::from_secs(self.net_sample_secs.max(1))
    }

    pub fn connectivity_timeout(&self) -> Duration {
        Duration::from_secs(self.connectivity_timeout_secs.max(1))
    }
}

impl Config {
    /// Loads `path`, or the bundled defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml(&data, &path.display().to_string())
            }
            None => Self::from_toml(BUNDLED_CONFIG, "<bundled>"),
        }
    }

    pub fn from_toml(data: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(data).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.log_lines == 0 {
            return Err(ConfigError::EmptyLogWindow);
        }
        Thresholds::from_rules(&self.thresholds).map(|_| ())
    }

    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        Thresholds::from_rules(&self.thresholds)
    }
}

impl Thresholds {
    pub fn from_rules(rules: &[ThresholdRule]) -> Result<Self, ConfigError> {
        let mut table = BTreeMap::new();
        for rule in rules {
            let name = rule.metric.as_str();
            if rule.metric.kind() != Kind::Gauge {
                return Err(ConfigError::NotAGauge(name));
            }
            // Also rejects NaN bounds
            if !(rule.warning <= rule.critical) {
                return Err(ConfigError::InvertedBounds {
                    metric: name,
                    warning: rule.warning,
                    critical: rule.critical,
                });
            }
            let bounds = Bounds {
                warning: rule.warning,
                critical: rule.critical,
            };
            if table.insert(rule.metric, bounds).is_some() {
                return Err(ConfigError::Duplicate(name));
            }
        }
        Ok(Thresholds { rules: table })
    }

    pub fn get(&self, metric: MetricId) -> Option<Bounds> {
        self.rules.get(&metric).copied()
    }
}

fn default_excluded_fs_types() -> Vec<String> {
    ["tmpfs", "devtmpfs", "overlay", "squashfs", "efivarfs"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_excluded_mount_prefixes() -> Vec<String> {
    ["/snap/", "/run/user/", "/run/snapd/", "/dev/"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_log_lines() -> usize {
    200
}

fn default_sample_secs() -> u64 {
    2
}

fn default_connectivity_timeout_secs() -> u64 {
    5
}

fn default_monitoring_tools() -> Vec<String> {
    vec!["sensors".to_string(), "smartctl".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_config_is_valid() {
        let config = Config::load(None).expect("bundled syscheck.toml must parse");
        let thresholds = config.thresholds().expect("bundled thresholds must validate");

        let mem = thresholds.get(MetricId::MemUsedPct).expect("memory threshold");
        assert_eq!(mem, Bounds { warning: 70.0, critical: 90.0 });
        let disk = thresholds.get(MetricId::DiskUsageMaxPct).expect("disk threshold");
        assert_eq!(disk, Bounds { warning: 80.0, critical: 90.0 });
        let updates = thresholds
            .get(MetricId::PendingUpdatesCount)
            .expect("updates threshold");
        assert_eq!(updates, Bounds { warning: 10.0, critical: 50.0 });

        assert!(thresholds.get(MetricId::ContainersRunning).is_none());
        assert!(config.collector.log_lines > 0);
        assert!(config
            .remediation
            .monitoring_tools
            .iter()
            .any(|tool| tool == "sensors"));
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config = Config::from_toml("", "test").unwrap();
        assert!(config.thresholds.is_empty());
        assert_eq!(config.collector.log_lines, 200);
        assert_eq!(config.remediation.monitoring_tools, vec!["sensors", "smartctl"]);
        assert!(config.collector.connectivity_url.is_empty());
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let toml = r#"
            [[threshold]]
            metric = "disk_usage_max_pct"
            warning = 95
            critical = 90
        "#;
        match Config::from_toml(toml, "test") {
            Err(ConfigError::InvertedBounds { metric, .. }) => {
                assert_eq!(metric, "disk_usage_max_pct")
            }
            other => panic!("expected inverted bounds error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_duplicate_metric() {
        let toml = r#"
            [[threshold]]
            metric = "cpu_temp_max_c"
            warning = 70
            critical = 80

            [[threshold]]
            metric = "cpu_temp_max_c"
            warning = 75
            critical = 85
        "#;
        assert!(matches!(
            Config::from_toml(toml, "test"),
            Err(ConfigError::Duplicate("cpu_temp_max_c"))
        ));
    }

    #[test]
    fn test_rejects_threshold_on_flag() {
        let toml = r#"
            [[threshold]]
            metric = "reboot_required"
            warning = 0
            critical = 1
        "#;
        assert!(matches!(
            Config::from_toml(toml, "test"),
            Err(ConfigError::NotAGauge("reboot_required"))
        ));
    }

    #[test]
    fn test_rejects_unknown_metric_name() {
        let toml = r#"
            [[threshold]]
            metric = "fan_speed_rpm"
            warning = 1000
            critical = 3000
        "#;
        assert!(matches!(
            Config::from_toml(toml, "test"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_equal_bounds_are_allowed() {
        let rules = [ThresholdRule {
            metric: MetricId::SwapUsedPct,
            warning: 50.0,
            critical: 50.0,
        }];
        assert!(Thresholds::from_rules(&rules).is_ok());
    }

    #[test]
    fn test_rejects_empty_log_window() {
        let toml = "[collector]\nlog_lines = 0\n";
        assert!(matches!(
            Config::from_toml(toml, "test"),
            Err(ConfigError::EmptyLogWindow)
        ));
    }

    #[test]
    fn test_rejects_misspelled_keys() {
        for toml in [
            "[collector]\nlog_line = 50\n",
            "[remediation]\nmonitoring_tool = [\"sensors\"]\n",
            "[[threshold]]\nmetric = \"cpu_usage_pct\"\nwarn = 70\ncritical = 90\n",
        ] {
            assert!(
                matches!(Config::from_toml(toml, "test"), Err(ConfigError::Parse { .. })),
                "{toml}"
            );
        }
    }

    #[test]
    fn test_removable_media_mounts_are_counted() {
        let config = Config::load(None).unwrap();
        let prefixes = &config.collector.excluded_mount_prefixes;
        assert!(prefixes.iter().any(|p| p == "/run/user/"));
        assert!(!prefixes.iter().any(|p| "/run/media/ana/USB".starts_with(p.as_str())));
    }
}
