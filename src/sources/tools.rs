use super::{Context, Source};
use crate::host::Host;
use crate::metric::{Metric, MetricId};

/// Whether the monitoring tools the other probes depend on are installed.
pub struct MonitoringTools;

impl Source for MonitoringTools {
    fn name(&self) -> &'static str {
        "tools"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        let missing = missing(ctx.host, &ctx.config.remediation.monitoring_tools);
        let metric = Metric::flag(MetricId::MissingTools, !missing.is_empty());
        if missing.is_empty() {
            vec![metric]
        } else {
            vec![metric.with_detail(missing.join(", "))]
        }
    }
}

/// Configured tools that are not on `PATH`, in configuration order.
pub fn missing(host: &dyn Host, tools: &[String]) -> Vec<String> {
    tools
        .iter()
        .filter(|tool| !host.has_tool(tool))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::fake::FakeHost;

    #[test]
    fn test_lists_missing_in_order() {
        let host = FakeHost::new().with_tool("smartctl");
        let tools = vec!["sensors".to_string(), "smartctl".to_string(), "vnstat".to_string()];
        assert_eq!(missing(&host, &tools), vec!["sensors", "vnstat"]);
    }

    #[test]
    fn test_flag_and_detail() {
        let config = Config::from_toml("", "test").unwrap();
        let host = FakeHost::new().with_tool("sensors");
        let ctx = Context {
            host: &host,
            config: &config,
            package_manager: None,
        };
        assert_eq!(
            MonitoringTools.collect(&ctx),
            vec![Metric::flag(MetricId::MissingTools, true).with_detail("smartctl")]
        );

        let host = host.with_tool("smartctl");
        let ctx = Context {
            host: &host,
            config: &config,
            package_manager: None,
        };
        assert_eq!(
            MonitoringTools.collect(&ctx),
            vec![Metric::flag(MetricId::MissingTools, false)]
        );
    }
}
