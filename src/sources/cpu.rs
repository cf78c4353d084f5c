use lazy_static::lazy_static;
use regex::Regex;

use super::{capture, Context, Source};
use crate::metric::{Metric, MetricId, Unavailable};

lazy_static! {
    static ref USER_RE: Regex = Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*%?\s*us\b").unwrap();
    static ref SYSTEM_RE: Regex = Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*%?\s*sy\b").unwrap();
}

/// CPU load from a single `top` snapshot.
pub struct CpuLoad;

impl Source for CpuLoad {
    fn name(&self) -> &'static str {
        "top"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        let metric = match capture(ctx.host, "top", &["-bn1"]) {
            Ok(text) => Metric::number_or(
                MetricId::CpuUsagePct,
                parse_cpu_usage(&text),
                Unavailable::Unparseable,
            ),
            Err(reason) => Metric::unavailable(MetricId::CpuUsagePct, reason),
        };
        vec![metric]
    }
}

/// User plus system time from the first `%Cpu(s)` summary line.
pub fn parse_cpu_usage(text: &str) -> Option<f64> {
    let line = text.lines().find(|line| {
        let line = line.trim_start();
        line.starts_with("%Cpu(s)") || line.starts_with("Cpu(s)")
    })?;
    let user = USER_RE
        .captures(line)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()?;
    let system = SYSTEM_RE
        .captures(line)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()?;
    Some(user + system)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOP: &str = "top - 10:41:02 up 3 days,  2:11,  1 user,  load average: 0.52, 0.48, 0.41
Tasks: 312 total,   1 running, 311 sleeping,   0 stopped,   0 zombie
%Cpu(s): 12.5 us,  3.5 sy,  0.0 ni, 84.0 id,  0.0 wa,  0.0 hi,  0.0 si,  0.0 st
MiB Mem :  15894.2 total,   2011.6 free,   7321.4 used,   6561.2 buff/cache
%Cpu(s): 99.0 us,  1.0 sy,  0.0 ni,  0.0 id,  0.0 wa,  0.0 hi,  0.0 si,  0.0 st
";

    #[test]
    fn test_sums_user_and_system_from_first_line() {
        assert_eq!(parse_cpu_usage(TOP), Some(16.0));
    }

    #[test]
    fn test_legacy_percent_format() {
        let line = "Cpu(s):  7.0%us,  2.0%sy,  0.0%ni, 91.0%id,  0.0%wa";
        assert_eq!(parse_cpu_usage(line), Some(9.0));
    }

    #[test]
    fn test_missing_summary_line() {
        assert_eq!(parse_cpu_usage("Tasks: 3 total"), None);
    }
}
