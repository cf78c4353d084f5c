use super::{capture, Context, Source};
use crate::metric::{Metric, MetricId, Unavailable};

/// Error-priority entries in the recent system log window.
pub struct ErrorLog;

impl Source for ErrorLog {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        let collector = &ctx.config.collector;
        let window = collector.log_lines.to_string();

        let journal = capture(
            ctx.host,
            "journalctl",
            &["-p", "err", "-n", &window, "--no-pager", "-q", "-o", "short"],
        );
        let metric = match journal {
            Ok(text) => Metric::number(
                MetricId::ErrorLogCount,
                count_error_lines(&text, &collector.noisy_log_sources) as f64,
            )
            .with_detail("journalctl"),
            Err(journal_reason) => {
                match capture(ctx.host, "dmesg", &["--level=err,crit,alert,emerg"]) {
                    Ok(text) => {
                        let recent = last_lines(&text, collector.log_lines);
                        Metric::number(
                            MetricId::ErrorLogCount,
                            count_error_lines(&recent, &collector.noisy_log_sources) as f64,
                        )
                        .with_detail("dmesg")
                    }
                    // Prefer the more useful of the two reasons
                    Err(Unavailable::ToolMissing(_)) => {
                        Metric::unavailable(MetricId::ErrorLogCount, journal_reason)
                    }
                    Err(reason) => Metric::unavailable(MetricId::ErrorLogCount, reason),
                }
            }
        };
        vec![metric]
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Counts log entries, skipping journal markers such as `-- No entries --`
/// and lines from sources configured as noise.
pub fn count_error_lines(text: &str, noisy_sources: &[String]) -> usize {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-- "))
        .filter(|line| {
            !noisy_sources
                .iter()
                .any(|source| !source.is_empty() && line.contains(source.as_str()))
        })
        .count()
}
