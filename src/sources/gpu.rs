use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use super::{capture, parse_millidegrees, Context, Source};
use crate::metric::{Metric, MetricId, Unavailable};

lazy_static! {
    static ref INTEL_RENDER_BUSY: Regex =
        Regex::new(r#""Render/3D(?:/\d+)?"\s*:\s*\{\s*"busy"\s*:\s*([0-9]+(?:\.[0-9]+)?)"#)
            .unwrap();
}

const DRM_ROOT: &str = "/sys/class/drm";
const INTEL_PCI_VENDOR: &str = "0x8086";
const GPU_TOOLS: &str = "nvidia-smi, rocm-smi, intel_gpu_top";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
}

/// Probed in this order; the first vendor present wins.
const GPU_PROBES: [GpuVendor; 3] = [GpuVendor::Nvidia, GpuVendor::Amd, GpuVendor::Intel];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuReading {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub utilization: Option<f64>,
}

/// GPU temperature and activity from the vendor tool that is present.
pub struct GpuTelemetry;

impl Source for GpuTelemetry {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        let found = GPU_PROBES
            .into_iter()
            .find_map(|vendor| vendor.probe(ctx).map(|reading| (vendor, reading)));

        let Some((vendor, reading)) = found else {
            let reason = Unavailable::ToolMissing(GPU_TOOLS.to_string());
            return vec![
                Metric::unavailable(MetricId::GpuTempC, reason.clone()),
                Metric::unavailable(MetricId::GpuUtilPct, reason),
            ];
        };
        debug!(vendor = vendor.label(), ?reading, "gpu probe matched");

        let detail = match &reading.model {
            Some(model) => format!("{} {}", vendor.label(), model),
            None => vendor.label().to_string(),
        };
        vec![
            Metric::number_or(
                MetricId::GpuTempC,
                reading.temperature,
                Unavailable::Unparseable,
            )
            .with_detail(detail.clone()),
            Metric::number_or(
                MetricId::GpuUtilPct,
                reading.utilization,
                vendor.utilization_gap(ctx),
            )
            .with_detail(detail),
        ]
    }
}

impl GpuVendor {
    pub fn label(self) -> &'static str {
        match self {
            GpuVendor::Nvidia => "NVIDIA",
            GpuVendor::Amd => "AMD",
            GpuVendor::Intel => "Intel",
        }
    }

    /// Why a matched probe has no activity figure.
    fn utilization_gap(self, ctx: &Context) -> Unavailable {
        match self {
            // Intel cards are found through sysfs; activity needs the tool
            GpuVendor::Intel if !ctx.host.has_tool("intel_gpu_top") => {
                Unavailable::ToolMissing("intel_gpu_top".to_string())
            }
            _ => Unavailable::Unparseable,
        }
    }

    /// `None` when this vendor's GPU or tooling is not present.
    fn probe(self, ctx: &Context) -> Option<GpuReading> {
        let host = ctx.host;
        match self {
            GpuVendor::Nvidia => {
                let text = capture(
                    host,
                    "nvidia-smi",
                    &[
                        "--query-gpu=temperature.gpu,utilization.gpu,name",
                        "--format=csv,noheader,nounits",
                    ],
                )
                .ok()?;
                parse_nvidia(&text)
            }
            GpuVendor::Amd => {
                let text = capture(
                    host,
                    "rocm-smi",
                    &["--showtemp", "--showuse", "--showproductname"],
                )
                .ok()?;
                parse_rocm(&text)
            }
            GpuVendor::Intel => {
                let cards = intel_cards(ctx);
                let has_tool = host.has_tool("intel_gpu_top");
                if cards.is_empty() && !has_tool {
                    return None;
                }
                let temperature = cards.iter().find_map(|card| hwmon_temperature(ctx, card));
                let utilization = if has_tool {
                    sample_intel_busy(ctx)
                } else {
                    None
                };
                Some(GpuReading {
                    model: None,
                    temperature,
                    utilization,
                })
            }
        }
    }
}

/// First line of `nvidia-smi --query-gpu=temperature.gpu,utilization.gpu,name`.
pub fn parse_nvidia(text: &str) -> Option<GpuReading> {
    let line = text.lines().find(|line| !line.trim().is_empty())?;
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }
    Some(GpuReading {
        temperature: parts[0].parse().ok(),
        utilization: parts[1].parse().ok(),
        model: Some(parts[2].to_string()).filter(|name| !name.is_empty()),
    })
}

/// Value after the last colon on a `rocm-smi` report line.
fn rocm_value(line: &str) -> Option<f64> {
    line.rsplit(':').next()?.trim().parse().ok()
}

pub fn parse_rocm(text: &str) -> Option<GpuReading> {
    let mut reading = GpuReading::default();
    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.contains("temperature") && reading.temperature.is_none() {
            reading.temperature = rocm_value(line);
        } else if lower.contains("gpu use") && reading.utilization.is_none() {
            reading.utilization = rocm_value(line);
        } else if lower.contains("card series") && reading.model.is_none() {
            reading.model = line.rsplit(':').next().map(|s| s.trim().to_string());
        }
    }
    if reading.temperature.is_some() || reading.utilization.is_some() {
        Some(reading)
    } else {
        None
    }
}

fn intel_cards(ctx: &Context) -> Vec<String> {
    ctx.host
        .list_dir(DRM_ROOT)
        .into_iter()
        .filter(|entry| {
            entry
                .strip_prefix("card")
                .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        })
        .filter(|card| {
            ctx.host
                .read_file(&format!("{DRM_ROOT}/{card}/device/vendor"))
                .map(|vendor| vendor.trim() == INTEL_PCI_VENDOR)
                .unwrap_or(false)
        })
        .collect()
}

fn hwmon_temperature(ctx: &Context, card: &str) -> Option<f64> {
    let hwmon_root = format!("{DRM_ROOT}/{card}/device/hwmon");
    ctx.host
        .list_dir(&hwmon_root)
        .into_iter()
        .find_map(|hwmon| {
            ctx.host
                .read_file(&format!("{hwmon_root}/{hwmon}/temp1_input"))
                .and_then(|t| parse_millidegrees(&t))
        })
}

/// `intel_gpu_top` streams forever; sample it for a bounded window.
fn sample_intel_busy(ctx: &Context) -> Option<f64> {
    let window = ctx.config.collector.gpu_sample();
    let output = ctx
        .host
        .run_bounded("intel_gpu_top", &["-J", "-s", "500"], window)
        .ok()?;
    parse_intel_busy(&output.stdout)
}

/// Render engine busy percentage from the most recent complete sample.
/// The stream is cut mid-document, so this is matched rather than parsed
/// as JSON.
pub fn parse_intel_busy(text: &str) -> Option<f64> {
    INTEL_RENDER_BUSY
        .captures_iter(text)
        .last()
        .and_then(|cap| cap.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
