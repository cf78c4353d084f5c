use super::{capture, Context, Source};
use crate::metric::{Metric, MetricId, Unavailable};

/// Memory and swap occupancy from `free`.
pub struct MemorySummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub mem_used_pct: Option<u64>,
    pub swap_used_pct: Option<u64>,
}

impl Source for MemorySummary {
    fn name(&self) -> &'static str {
        "free"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        match capture(ctx.host, "free", &["-b"]) {
            Ok(text) => {
                let usage = parse_free(&text);
                vec![
                    Metric::number_or(
                        MetricId::MemUsedPct,
                        usage.mem_used_pct.map(|v| v as f64),
                        Unavailable::Unparseable,
                    ),
                    Metric::number_or(
                        MetricId::SwapUsedPct,
                        usage.swap_used_pct.map(|v| v as f64),
                        Unavailable::Unparseable,
                    ),
                ]
            }
            Err(reason) => vec![
                Metric::unavailable(MetricId::MemUsedPct, reason.clone()),
                Metric::unavailable(MetricId::SwapUsedPct, reason),
            ],
        }
    }
}

pub fn parse_free(text: &str) -> MemoryUsage {
    let mut usage = MemoryUsage::default();
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let label = fields.next().unwrap_or_default();
        let total = fields.next().and_then(|v| v.parse::<u64>().ok());
        let used = fields.next().and_then(|v| v.parse::<u64>().ok());
        let (Some(total), Some(used)) = (total, used) else {
            continue;
        };
        match label {
            "Mem:" if total > 0 => usage.mem_used_pct = Some(used * 100 / total),
            // No swap configured counts as empty swap
            "Swap:" if total == 0 => usage.swap_used_pct = Some(0),
            "Swap:" => usage.swap_used_pct = Some(used * 100 / total),
            _ => {}
        }
    }
    usage
}
