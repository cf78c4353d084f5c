use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use super::{capture, probe_failure, Context, Source};
use crate::metric::{Metric, MetricId, Unavailable};

lazy_static! {
    static ref VNSTAT_RATE: Regex =
        Regex::new(r"^\s*(rx|tx)\s+([0-9]+(?:[.,][0-9]+)?)\s+([kKMGT]?i?[Bb](?:it)?/s)").unwrap();
}

const PROC_NET_DEV: &str = "/proc/net/dev";
// vnstat needs a moment to start sampling and to print its summary
const VNSTAT_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Traffic {
    pub rx_kbps: f64,
    pub tx_kbps: f64,
}

/// Interfaces, connections, throughput and internet reachability.
pub struct NetworkState;

impl Source for NetworkState {
    fn name(&self) -> &'static str {
        "network"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(5);

        metrics.push(match capture(ctx.host, "ip", &["-o", "link", "show", "up"]) {
            Ok(text) => Metric::number(MetricId::NetInterfacesUp, up_interfaces(&text).len() as f64),
            Err(reason) => Metric::unavailable(MetricId::NetInterfacesUp, reason),
        });

        metrics.push(match capture(ctx.host, "ss", &["-Htn", "state", "established"]) {
            Ok(text) => Metric::number(
                MetricId::NetConnections,
                text.lines().filter(|l| !l.trim().is_empty()).count() as f64,
            ),
            Err(reason) => Metric::unavailable(MetricId::NetConnections, reason),
        });

        match sample_traffic(ctx) {
            Ok((traffic, how)) => {
                metrics.push(Metric::number(MetricId::NetRxKbps, traffic.rx_kbps).with_detail(how));
                metrics.push(Metric::number(MetricId::NetTxKbps, traffic.tx_kbps).with_detail(how));
            }
            Err(reason) => {
                metrics.push(Metric::unavailable(MetricId::NetRxKbps, reason.clone()));
                metrics.push(Metric::unavailable(MetricId::NetTxKbps, reason));
            }
        }

        let collector = &ctx.config.collector;
        let url = collector.connectivity_url.trim();
        metrics.push(if url.is_empty() {
            Metric::unavailable(MetricId::NetworkUnreachable, Unavailable::Disabled)
        } else {
            let reachable = ctx.host.reachable(url, collector.connectivity_timeout());
            Metric::flag(MetricId::NetworkUnreachable, !reachable).with_detail(url)
        });
        metrics
    }
}

fn sample_traffic(ctx: &Context) -> Result<(Traffic, &'static str), Unavailable> {
    let window = ctx.config.collector.net_sample();
    let secs = window.as_secs().to_string();

    let vnstat_reason = match ctx
        .host
        .run_bounded("vnstat", &["-tr", &secs], window + VNSTAT_GRACE)
    {
        Ok(output) => match parse_vnstat(&output.stdout) {
            Some(traffic) => return Ok((traffic, "vnstat")),
            None => {
                debug!(timed_out = output.timed_out, "vnstat gave no usable sample");
                Unavailable::Unparseable
            }
        },
        Err(err) => probe_failure("vnstat", err),
    };

    // Kernel counters sampled twice
    let Some(before) = ctx.host.read_file(PROC_NET_DEV).and_then(|t| total_bytes(&t)) else {
        return Err(vnstat_reason);
    };
    ctx.host.pause(window);
    let Some(after) = ctx.host.read_file(PROC_NET_DEV).and_then(|t| total_bytes(&t)) else {
        return Err(vnstat_reason);
    };
    Ok((rate(before, after, window), "/proc/net/dev"))
}

/// Names of up interfaces from `ip -o link show up`, loopback excluded.
pub fn up_interfaces(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim())
        // veth pairs print as `veth1a2b@if5`
        .map(|name| name.split('@').next().unwrap_or(name).to_string())
        .filter(|name| !name.is_empty() && name != "lo")
        .collect()
}

/// Average rates from `vnstat -tr` in kbit/s.
pub fn parse_vnstat(text: &str) -> Option<Traffic> {
    let mut rx = None;
    let mut tx = None;
    for line in text.lines() {
        let Some(cap) = VNSTAT_RATE.captures(line) else {
            continue;
        };
        let Ok(value) = cap[2].replace(',', ".").parse::<f64>() else {
            continue;
        };
        let kbps = value * unit_to_kbps(&cap[3])?;
        match &cap[1] {
            "rx" => rx = Some(kbps),
            _ => tx = Some(kbps),
        }
    }
    Some(Traffic {
        rx_kbps: rx?,
        tx_kbps: tx?,
    })
}

fn unit_to_kbps(unit: &str) -> Option<f64> {
    let factor = match unit {
        "bit/s" => 0.001,
        "kbit/s" | "Kbit/s" => 1.0,
        "Mbit/s" => 1_000.0,
        "Gbit/s" => 1_000_000.0,
        "B/s" => 0.008,
        "kB/s" | "KB/s" => 8.0,
        "KiB/s" => 8.192,
        "MB/s" => 8_000.0,
        "MiB/s" => 8_388.608,
        "GB/s" => 8_000_000.0,
        "GiB/s" => 8_589_934.592,
        _ => return None,
    };
    Some(factor)
}

/// Received and transmitted byte totals over non-loopback interfaces.
pub fn total_bytes(text: &str) -> Option<(u64, u64)> {
    let mut seen = false;
    let mut rx = 0u64;
    let mut tx = 0u64;
    for line in text.lines() {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<u64> = counters
            .split_whitespace()
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 9 {
            continue;
        }
        seen = true;
        rx = rx.saturating_add(fields[0]);
        tx = tx.saturating_add(fields[8]);
    }
    seen.then_some((rx, tx))
}

pub fn rate(before: (u64, u64), after: (u64, u64), window: Duration) -> Traffic {
    let secs = window.as_secs_f64().max(f64::EPSILON);
    // Counters can reset when an interface goes away
    let kbps = |b: u64, a: u64| a.saturating_sub(b) as f64 * 8.0 / 1000.0 / secs;
    Traffic {
        rx_kbps: kbps(before.0, after.0),
        tx_kbps: kbps(before.1, after.1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::fake::FakeHost;
    use crate::metric::Reading;

    const IP_LINK: &str = "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT group default qlen 1000\\    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
2: enp3s0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP mode DEFAULT group default qlen 1000\\    link/ether 3c:7c:3f:aa:bb:cc brd ff:ff:ff:ff:ff:ff
7: veth1a2b3c@if6: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue master docker0 state UP mode DEFAULT group default\\    link/ether 9a:1b:2c:3d:4e:5f brd ff:ff:ff:ff:ff:ff link-netnsid 0
";

    const PROC_DEV: &str = "Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  500000    4000    0    0    0     0          0         0   500000    4000    0    0    0     0       0          0
enp3s0: 1000000    9000    0    0    0     0          0        12   250000    3000    0    0    0     0       0          0
 wlan0:   24000     100    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
";

    fn config(toml: &str) -> Config {
        Config::from_toml(toml, "test").unwrap()
    }

    #[test]
    fn test_up_interfaces_skip_loopback() {
        assert_eq!(up_interfaces(IP_LINK), vec!["enp3s0", "veth1a2b3c"]);
    }

    #[test]
    fn test_vnstat_units() {
        let text = " 2 packets sampled in 2 seconds
Traffic average for enp3s0

      rx         1.50 Mbit/s           210 packets/s
      tx       640 bit/s                 3 packets/s
";
        let traffic = parse_vnstat(text).unwrap();
        assert_eq!(traffic.rx_kbps, 1500.0);
        assert_eq!(traffic.tx_kbps, 0.64);

        let legacy = "   rx     12.00 kB/s      8 packets/s\n   tx      2,00 kB/s      4 packets/s\n";
        let traffic = parse_vnstat(legacy).unwrap();
        assert_eq!(traffic.rx_kbps, 96.0);
        assert_eq!(traffic.tx_kbps, 16.0);

        assert_eq!(parse_vnstat("Error: Unable to open database"), None);
    }

    #[test]
    fn test_proc_net_dev_totals() {
        assert_eq!(total_bytes(PROC_DEV), Some((1_024_000, 251_000)));
        assert_eq!(total_bytes("Inter-| Receive\n face |bytes\n"), None);
    }

    #[test]
    fn test_rate_from_two_samples() {
        let traffic = rate((1_000_000, 0), (1_250_000, 125_000), Duration::from_secs(2));
        assert_eq!(traffic.rx_kbps, 1000.0);
        assert_eq!(traffic.tx_kbps, 500.0);
        let reset = rate((5_000, 5_000), (10, 10), Duration::from_secs(1));
        assert_eq!(reset.rx_kbps, 0.0);
    }

    #[test]
    fn test_collects_with_proc_fallback() {
        let host = FakeHost::new()
            .respond("ip -o link show up", 0, IP_LINK)
            .respond("ss -Htn state established", 0, "0 0 10.0.0.2:22 10.0.0.9:51234\n0 0 10.0.0.2:443 1.2.3.4:6000\n")
            .with_file(PROC_NET_DEV, PROC_DEV);
        let config = config("[collector]\nconnectivity_url = \"http://example.invalid\"\n");
        let ctx = Context {
            host: &host,
            config: &config,
            package_manager: None,
        };
        let metrics = NetworkState.collect(&ctx);
        let value = |id| metrics.iter().find(|m| m.id == id).unwrap().value.clone();

        assert_eq!(value(MetricId::NetInterfacesUp), Ok(Reading::Number(2.0)));
        assert_eq!(value(MetricId::NetConnections), Ok(Reading::Number(2.0)));
        assert_eq!(value(MetricId::NetRxKbps), Ok(Reading::Number(0.0)));
        assert_eq!(value(MetricId::NetworkUnreachable), Ok(Reading::Flag(false)));
    }

    #[test]
    fn test_offline_and_disabled_connectivity() {
        let host = FakeHost::new().offline();
        let enabled = config("[collector]\nconnectivity_url = \"http://example.invalid\"\n");
        let ctx = Context {
            host: &host,
            config: &enabled,
            package_manager: None,
        };
        let metrics = NetworkState.collect(&ctx);
        assert_eq!(
            metrics.last().unwrap(),
            &Metric::flag(MetricId::NetworkUnreachable, true).with_detail("http://example.invalid")
        );
        assert_eq!(metrics[2].value, Err(Unavailable::ToolMissing("vnstat".into())));

        let disabled = config("");
        let ctx = Context {
            host: &host,
            config: &disabled,
            package_manager: None,
        };
        assert_eq!(
            NetworkState.collect(&ctx).last().unwrap().value,
            Err(Unavailable::Disabled)
        );
    }
}
