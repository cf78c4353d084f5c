//! Normalized health facts shared by the collector, evaluator and report.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricId {
    CpuUsagePct,
    MemUsedPct,
    SwapUsedPct,
    DiskUsageMaxPct,
    CpuTempMaxC,
    GpuTempC,
    GpuUtilPct,
    NvmeTempC,
    NvmeHealth,
    ErrorLogCount,
    PendingUpdatesCount,
    SystemdUpdatesPending,
    PkgManagerLocked,
    RebootRequired,
    MissingTools,
    ContainersRunning,
    ContainersTotal,
    NetInterfacesUp,
    NetConnections,
    NetRxKbps,
    NetTxKbps,
    NetworkUnreachable,
}

/// How a metric turns into a severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Numeric, compared against a threshold rule when one exists.
    Gauge,
    /// Boolean, a warning when set.
    Flag,
    /// Text verdict from a self-test.
    Health,
    /// Reported, never judged.
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Percent,
    Celsius,
    Count,
    Kbps,
    Boolean,
    Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    System,
    Thermals,
    Storage,
    Software,
    Containers,
    Network,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::System,
        Section::Thermals,
        Section::Storage,
        Section::Software,
        Section::Containers,
        Section::Network,
    ];
}

impl MetricId {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricId::CpuUsagePct => "cpu_usage_pct",
            MetricId::MemUsedPct => "mem_used_pct",
            MetricId::SwapUsedPct => "swap_used_pct",
            MetricId::DiskUsageMaxPct => "disk_usage_max_pct",
            MetricId::CpuTempMaxC => "cpu_temp_max_c",
            MetricId::GpuTempC => "gpu_temp_c",
            MetricId::GpuUtilPct => "gpu_util_pct",
            MetricId::NvmeTempC => "nvme_temp_c",
            MetricId::NvmeHealth => "nvme_health",
            MetricId::ErrorLogCount => "error_log_count",
            MetricId::PendingUpdatesCount => "pending_updates_count",
            MetricId::SystemdUpdatesPending => "systemd_updates_pending",
            MetricId::PkgManagerLocked => "pkg_manager_locked",
            MetricId::RebootRequired => "reboot_required",
            MetricId::MissingTools => "missing_tools",
            MetricId::ContainersRunning => "containers_running",
            MetricId::ContainersTotal => "containers_total",
            MetricId::NetInterfacesUp => "net_interfaces_up",
            MetricId::NetConnections => "net_connections",
            MetricId::NetRxKbps => "net_rx_kbps",
            MetricId::NetTxKbps => "net_tx_kbps",
            MetricId::NetworkUnreachable => "network_unreachable",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MetricId::CpuUsagePct => "CPU usage",
            MetricId::MemUsedPct => "Memory used",
            MetricId::SwapUsedPct => "Swap used",
            MetricId::DiskUsageMaxPct => "Fullest disk",
            MetricId::CpuTempMaxC => "CPU temperature",
            MetricId::GpuTempC => "GPU temperature",
            MetricId::GpuUtilPct => "GPU activity",
            MetricId::NvmeTempC => "NVMe temperature",
            MetricId::NvmeHealth => "NVMe SMART health",
            MetricId::ErrorLogCount => "Recent log errors",
            MetricId::PendingUpdatesCount => "Pending updates",
            MetricId::SystemdUpdatesPending => "Core system updates",
            MetricId::PkgManagerLocked => "Package manager lock",
            MetricId::RebootRequired => "Reboot required",
            MetricId::MissingTools => "Monitoring tools",
            MetricId::ContainersRunning => "Containers running",
            MetricId::ContainersTotal => "Containers total",
            MetricId::NetInterfacesUp => "Interfaces up",
            MetricId::NetConnections => "TCP connections",
            MetricId::NetRxKbps => "Download rate",
            MetricId::NetTxKbps => "Upload rate",
            MetricId::NetworkUnreachable => "Internet reachability",
        }
    }

    pub fn kind(self) -> Kind {
        match self {
            MetricId::CpuUsagePct
            | MetricId::MemUsedPct
            | MetricId::SwapUsedPct
            | MetricId::DiskUsageMaxPct
            | MetricId::CpuTempMaxC
            | MetricId::GpuTempC
            | MetricId::NvmeTempC
            | MetricId::ErrorLogCount
            | MetricId::PendingUpdatesCount => Kind::Gauge,
            MetricId::SystemdUpdatesPending
            | MetricId::PkgManagerLocked
            | MetricId::RebootRequired
            | MetricId::MissingTools
            | MetricId::NetworkUnreachable => Kind::Flag,
            MetricId::NvmeHealth => Kind::Health,
            MetricId::GpuUtilPct
            | MetricId::ContainersRunning
            | MetricId::ContainersTotal
            | MetricId::NetInterfacesUp
            | MetricId::NetConnections
            | MetricId::NetRxKbps
            | MetricId::NetTxKbps => Kind::Info,
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            MetricId::CpuUsagePct
            | MetricId::MemUsedPct
            | MetricId::SwapUsedPct
            | MetricId::DiskUsageMaxPct
            | MetricId::GpuUtilPct => Unit::Percent,
            MetricId::CpuTempMaxC | MetricId::GpuTempC | MetricId::NvmeTempC => Unit::Celsius,
            MetricId::NvmeHealth => Unit::Verdict,
            MetricId::NetRxKbps | MetricId::NetTxKbps => Unit::Kbps,
            MetricId::SystemdUpdatesPending
            | MetricId::PkgManagerLocked
            | MetricId::RebootRequired
            | MetricId::MissingTools
            | MetricId::NetworkUnreachable => Unit::Boolean,
            MetricId::ErrorLogCount
            | MetricId::PendingUpdatesCount
            | MetricId::ContainersRunning
            | MetricId::ContainersTotal
            | MetricId::NetInterfacesUp
            | MetricId::NetConnections => Unit::Count,
        }
    }

    pub fn section(self) -> Section {
        match self {
            MetricId::CpuUsagePct | MetricId::MemUsedPct | MetricId::SwapUsedPct => {
                Section::System
            }
            MetricId::CpuTempMaxC | MetricId::GpuTempC | MetricId::GpuUtilPct => {
                Section::Thermals
            }
            MetricId::DiskUsageMaxPct | MetricId::NvmeTempC | MetricId::NvmeHealth => {
                Section::Storage
            }
            MetricId::ErrorLogCount
            | MetricId::PendingUpdatesCount
            | MetricId::SystemdUpdatesPending
            | MetricId::PkgManagerLocked
            | MetricId::RebootRequired
            | MetricId::MissingTools => Section::Software,
            MetricId::ContainersRunning | MetricId::ContainersTotal => Section::Containers,
            MetricId::NetInterfacesUp
            | MetricId::NetConnections
            | MetricId::NetRxKbps
            | MetricId::NetTxKbps
            | MetricId::NetworkUnreachable => Section::Network,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Number(f64),
    Text(String),
    Flag(bool),
}

/// Why a fact could not be collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// None of the listed tools is installed.
    ToolMissing(String),
    CommandFailed,
    Unparseable,
    NeedsPrivileges,
    NoDevice,
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub id: MetricId,
    pub value: Result<Reading, Unavailable>,
    pub detail: Option<String>,
}

impl Metric {
    pub fn number(id: MetricId, value: f64) -> Self {
        Metric {
            id,
            value: Ok(Reading::Number(value)),
            detail: None,
        }
    }

    pub fn flag(id: MetricId, value: bool) -> Self {
        Metric {
            id,
            value: Ok(Reading::Flag(value)),
            detail: None,
        }
    }

    pub fn text(id: MetricId, value: impl Into<String>) -> Self {
        Metric {
            id,
            value: Ok(Reading::Text(value.into())),
            detail: None,
        }
    }

    pub fn unavailable(id: MetricId, reason: Unavailable) -> Self {
        Metric {
            id,
            value: Err(reason),
            detail: None,
        }
    }

    /// Builds a numeric metric, or an unavailable one carrying `reason`.
    pub fn number_or(id: MetricId, value: Option<f64>, reason: Unavailable) -> Self {
        match value {
            Some(value) => Metric::number(id, value),
            None => Metric::unavailable(id, reason),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_available(&self) -> bool {
        self.value.is_ok()
    }

    /// Value with its unit, or `N/A` when it could not be collected.
    pub fn display_value(&self) -> String {
        match &self.value {
            Err(_) => "N/A".to_string(),
            Ok(Reading::Text(text)) => text.clone(),
            Ok(Reading::Flag(true)) => "yes".to_string(),
            Ok(Reading::Flag(false)) => "no".to_string(),
            Ok(Reading::Number(value)) => match self.id.unit() {
                Unit::Percent => format!("{value:.1}%"),
                Unit::Celsius => format!("{value:.1}°C"),
                Unit::Kbps => format!("{value:.1} kbit/s"),
                Unit::Count | Unit::Boolean | Unit::Verdict => format!("{value:.0}"),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Ok,
    Warning,
    Critical,
}

impl Severity {
    pub fn is_issue(self) -> bool {
        matches!(self, Severity::Warning | Severity::Critical)
    }
}
