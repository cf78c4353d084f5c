use super::{capture, Context, Source};
use crate::metric::{Metric, MetricId, Unavailable};

/// Fullest real filesystem according to `df`.
pub struct DiskUsage;

#[derive(Debug, Clone, PartialEq)]
pub struct Fullest {
    pub percent: f64,
    pub mount: String,
}

impl Source for DiskUsage {
    fn name(&self) -> &'static str {
        "df"
    }

    fn collect(&self, ctx: &Context) -> Vec<Metric> {
        let collector = &ctx.config.collector;
        let metric = match capture(ctx.host, "df", &["-P", "-T"]) {
            Ok(text) => match parse_df(
                &text,
                &collector.excluded_fs_types,
                &collector.excluded_mount_prefixes,
            ) {
                Some(fullest) => Metric::number(MetricId::DiskUsageMaxPct, fullest.percent)
                    .with_detail(fullest.mount),
                None => Metric::unavailable(MetricId::DiskUsageMaxPct, Unavailable::Unparseable),
            },
            Err(reason) => Metric::unavailable(MetricId::DiskUsageMaxPct, reason),
        };
        vec![metric]
    }
}

/// Maximum capacity over mounts that are neither virtual nor excluded.
/// Expects POSIX `df -P -T` columns:
/// filesystem, type, blocks, used, available, capacity, mount point.
pub fn parse_df(text: &str, excluded_types: &[String], excluded_prefixes: &[String]) -> Option<Fullest> {
    let mut fullest: Option<Fullest> = None;
    for line in text.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            continue;
        }
        let fs_type = fields[1];
        let mount = fields[6..].join(" ");
        if excluded_types.iter().any(|t| t == fs_type) {
            continue;
        }
        if excluded_prefixes
            .iter()
            .any(|prefix| mount.starts_with(prefix.as_str()))
        {
            continue;
        }
        let Ok(percent) = fields[5].trim_end_matches('%').parse::<f64>() else {
            continue;
        };
        if fullest.as_ref().map_or(true, |f| percent > f.percent) {
            fullest = Some(Fullest { percent, mount });
        }
    }
    fullest
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF: &str = "Filesystem     Type     1024-blocks      Used Available Capacity Mounted on
/dev/nvme0n1p2 ext4       479079112 383263289  71389507      85% /
tmpfs          tmpfs        8136432   8136432         0     100% /dev/shm
/dev/nvme0n1p1 vfat          523248      6220    517028       2% /boot/efi
/dev/loop3     squashfs       64896     64896         0     100% /snap/core20/2105
/dev/sdb1      ext4       960302804 768242243 143233697      85% /mnt/My Backups
overlay        overlay    479079112 383263289  71389507      85% /var/lib/docker/overlay2/abc/merged
";

    fn types() -> Vec<String> {
        vec!["tmpfs".into(), "squashfs".into(), "overlay".into()]
    }

    #[test]
    fn test_ignores_virtual_and_excluded_mounts() {
        let fullest = parse_df(DF, &types(), &["/snap/".into()]).unwrap();
        assert_eq!(fullest.percent, 85.0);
        // First mount wins on ties
        assert_eq!(fullest.mount, "/");
    }

    #[test]
    fn test_mount_points_with_spaces() {
        let text = "Filesystem Type 1024-blocks Used Available Capacity Mounted on
/dev/sdb1 ext4 100 91 9 91% /mnt/My Backups
";
        let fullest = parse_df(text, &[], &[]).unwrap();
        assert_eq!(fullest.mount, "/mnt/My Backups");
        assert_eq!(fullest.percent, 91.0);
    }

    #[test]
    fn test_without_excludes_virtual_filesystems_count() {
        let fullest = parse_df(DF, &[], &[]).unwrap();
        assert_eq!(fullest.percent, 100.0);
        assert_eq!(fullest.mount, "/dev/shm");
    }

    #[test]
    fn test_header_only() {
        assert_eq!(parse_df("Filesystem Type 1024-blocks Used Available Capacity Mounted on\n", &[], &[]), None);
    }
}
