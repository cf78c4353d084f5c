use super::{capture, Context, Source};
use crate::metric::{Metric, MetricId, Unavailable};

/// Probed in this order; the first runtime installed wins.
const RUNTIMES: [&str; 2] = ["docker", "podman"];

/// Running and total container counts from the installed runtime.
pub struct ContainerRuntime;

impl Source for ContainerRuntime {
    fn name(&self) -> &'static str {
        "containers"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        let Some(runtime) = RUNTIMES.into_iter().find(|rt| ctx.host.has_tool(rt)) else {
            let reason = Unavailable::ToolMissing(RUNTIMES.join(", "));
            return vec![
                Metric::unavailable(MetricId::ContainersRunning, reason.clone()),
                Metric::unavailable(MetricId::ContainersTotal, reason),
            ];
        };

        vec![
            listing(ctx, runtime, &["ps", "-q"], MetricId::ContainersRunning),
            listing(ctx, runtime, &["ps", "-aq"], MetricId::ContainersTotal),
        ]
    }
}

fn listing(ctx: &Context, runtime: &str, args: &[&str], id: MetricId) -> Metric {
    match capture(ctx.host, runtime, args) {
        Ok(text) => Metric::number(id, count_ids(&text) as f64).with_detail(runtime),
        Err(reason) => Metric::unavailable(id, reason),
    }
}

pub fn count_ids(text: &str) -> usize {
    text.lines().filter(|line| !line.trim().is_empty()).count()
}
